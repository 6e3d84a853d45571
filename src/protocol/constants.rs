//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// Plain RTMP handshake version
pub const RTMP_VERSION: u8 = 3;

/// Handshake version announcing the encrypted (RTMPE) variant
pub const RTMPE_VERSION: u8 = 6;

pub const RTMP_PORT: u16 = 1935;

/// C1/S1/C2/S2 packet size
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size both sides assume until a SetChunkSize arrives
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Chunk size announced in start and publish sequences
pub const RECOMMENDED_CHUNK_SIZE: u32 = 4096;

pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// Sanity limit on reassembled messages
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Timestamps at or above this value use the extended timestamp field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

// Chunk stream ids. Ids above CSID_PROTOCOL_CONTROL belong to a message
// stream and get re-addressed to the session's stream id.

pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_DATA: u32 = 5;
pub const CSID_VIDEO: u32 = 6;

// Message type ids

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_BYTES_READ: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF3: u8 = 15;
pub const MSG_COMMAND_AMF3: u8 = 17;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;
pub const MSG_AGGREGATE: u8 = 22;

// User control event types

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_STREAM_EOF: u16 = 1;
pub const UC_STREAM_DRY: u16 = 2;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_STREAM_IS_RECORDED: u16 = 4;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;
/// Server asks the client for its SWF verification response
pub const UC_SWF_VERIFY_REQUEST: u16 = 26;
pub const UC_SWF_VERIFY_RESPONSE: u16 = 27;
pub const UC_BUFFER_EMPTY: u16 = 31;
pub const UC_BUFFER_READY: u16 = 32;

// Peer bandwidth limit types

pub const BANDWIDTH_LIMIT_HARD: u8 = 0;
pub const BANDWIDTH_LIMIT_SOFT: u8 = 1;
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// Command names

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_SEEK: &str = "seek";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";
pub const CMD_ON_BW_DONE: &str = "onBWDone";

// Data message names

pub const DATA_SET_DATA_FRAME: &str = "@setDataFrame";
pub const DATA_ON_METADATA: &str = "onMetaData";
pub const DATA_ON_PLAY_STATUS: &str = "onPlayStatus";
pub const DATA_SAMPLE_ACCESS: &str = "|RtmpSampleAccess";
pub const DATA_ON_STATUS: &str = "onStatus";

// NetConnection status codes

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";
pub const NC_CALL_FAILED: &str = "NetConnection.Call.Failed";

// NetStream status codes

pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_RESET: &str = "NetStream.Play.Reset";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
pub const NS_PLAY_FAILED: &str = "NetStream.Play.Failed";
pub const NS_PLAY_COMPLETE: &str = "NetStream.Play.Complete";
pub const NS_PLAY_PUBLISH_NOTIFY: &str = "NetStream.Play.PublishNotify";
pub const NS_PLAY_UNPUBLISH_NOTIFY: &str = "NetStream.Play.UnpublishNotify";
pub const NS_DATA_START: &str = "NetStream.Data.Start";
pub const NS_SEEK_NOTIFY: &str = "NetStream.Seek.Notify";
pub const NS_PAUSE_NOTIFY: &str = "NetStream.Pause.Notify";
pub const NS_UNPAUSE_NOTIFY: &str = "NetStream.Unpause.Notify";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
pub const NS_UNPUBLISH_SUCCESS: &str = "NetStream.Unpublish.Success";

// Server defaults

pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;
pub const DEFAULT_PEER_BANDWIDTH: u32 = 2_500_000;

/// Version string reported in the connect result
pub const SERVER_FMS_VERSION: &str = "FMS/3,5,1,516";
