//! RTMP message types and parsing
//!
//! RTMP messages are classified into:
//! - Protocol Control Messages (types 1-6): Chunk/flow control
//! - Command Messages (types 17, 20): AMF-encoded commands
//! - Data Messages (types 15, 18): Metadata
//! - Audio/Video Messages (types 8, 9): Media data
//! - Aggregate Messages (type 22): FLV tag sequences
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Reader, Amf0Writer, AmfObject, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::media::flv::{self, FlvTag, FlvTagType};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// Addressing and sizing shared by every message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub message_type: u8,
    pub timestamp: u32,
    /// Chunk stream (channel) id
    pub csid: u32,
    /// Target message stream id
    pub stream_id: u32,
    /// Serialized payload length
    pub size: u32,
}

impl MessageHeader {
    pub fn is_audio(&self) -> bool {
        self.message_type == MSG_AUDIO
    }

    pub fn is_video(&self) -> bool {
        self.message_type == MSG_VIDEO
    }

    /// Messages on channels above protocol control belong to a message stream
    pub fn is_stream_scoped(&self) -> bool {
        self.csid > CSID_PROTOCOL_CONTROL
    }
}

/// User Control event (message type 4)
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBuffer { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    SwfVerifyRequest,
    /// `01 01 size size digest` as produced by the handshake
    SwfVerifyResponse(Bytes),
    BufferEmpty(u32),
    BufferReady(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// AMF command (connect, publish, play, onStatus, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object, null for most stream commands
    pub object: AmfValue,
    pub args: Vec<AmfValue>,
}

/// AMF data message (onMetaData, |RtmpSampleAccess, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub name: String,
    pub values: Vec<AmfValue>,
}

/// Payload of a message, one variant per message kind
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    ChunkSize(u32),
    Abort(u32),
    /// Acknowledgement carrying the peer's total bytes received
    BytesRead(u32),
    Control(ControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio(Bytes),
    Video(Bytes),
    Command(Command),
    Metadata(Metadata),
    Aggregate(Bytes),
    Unknown(Bytes),
}

impl MessageBody {
    /// Type id used when this body is sent without an explicit header
    pub fn default_message_type(&self) -> u8 {
        match self {
            MessageBody::ChunkSize(_) => MSG_SET_CHUNK_SIZE,
            MessageBody::Abort(_) => MSG_ABORT,
            MessageBody::BytesRead(_) => MSG_BYTES_READ,
            MessageBody::Control(_) => MSG_USER_CONTROL,
            MessageBody::WindowAckSize(_) => MSG_WINDOW_ACK_SIZE,
            MessageBody::SetPeerBandwidth { .. } => MSG_SET_PEER_BANDWIDTH,
            MessageBody::Audio(_) => MSG_AUDIO,
            MessageBody::Video(_) => MSG_VIDEO,
            MessageBody::Command(_) => MSG_COMMAND_AMF0,
            MessageBody::Metadata(_) => MSG_DATA_AMF0,
            MessageBody::Aggregate(_) => MSG_AGGREGATE,
            MessageBody::Unknown(_) => 0,
        }
    }

    pub fn default_csid(&self) -> u32 {
        match self {
            MessageBody::ChunkSize(_)
            | MessageBody::Abort(_)
            | MessageBody::BytesRead(_)
            | MessageBody::Control(_)
            | MessageBody::WindowAckSize(_)
            | MessageBody::SetPeerBandwidth { .. } => CSID_PROTOCOL_CONTROL,
            MessageBody::Command(_) | MessageBody::Unknown(_) => CSID_COMMAND,
            MessageBody::Metadata(_) => CSID_DATA,
            MessageBody::Audio(_) => CSID_AUDIO,
            MessageBody::Video(_) | MessageBody::Aggregate(_) => CSID_VIDEO,
        }
    }
}

/// One complete protocol message
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpMessage {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl RtmpMessage {
    /// Wrap a body with its default type and channel, timestamp 0, stream 0
    pub fn new(body: MessageBody) -> Self {
        let header = MessageHeader {
            message_type: body.default_message_type(),
            timestamp: 0,
            csid: body.default_csid(),
            stream_id: 0,
            size: 0,
        };
        let mut msg = RtmpMessage { header, body };
        msg.header.size = msg.payload().len() as u32;
        msg
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    pub fn with_stream_id(mut self, stream_id: u32) -> Self {
        self.header.stream_id = stream_id;
        self
    }

    pub fn with_csid(mut self, csid: u32) -> Self {
        self.header.csid = csid;
        self
    }

    /// Mutate the body and keep the header size in step
    pub fn update_body(&mut self, f: impl FnOnce(&mut MessageBody)) {
        f(&mut self.body);
        self.header.size = self.payload().len() as u32;
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    /// Parse a reassembled message
    pub fn from_raw(raw: &RawMessage) -> Result<Self> {
        let mut payload = raw.payload.clone();
        let truncated = |payload: &Bytes| -> crate::error::Error {
            ProtocolError::TruncatedPayload {
                message_type: raw.message_type,
                len: payload.len(),
            }
            .into()
        };

        let body = match raw.message_type {
            MSG_SET_CHUNK_SIZE | MSG_ABORT | MSG_BYTES_READ | MSG_WINDOW_ACK_SIZE => {
                if payload.len() < 4 {
                    return Err(truncated(&payload));
                }
                let value = payload.get_u32();
                match raw.message_type {
                    MSG_SET_CHUNK_SIZE => MessageBody::ChunkSize(value & 0x7FFF_FFFF),
                    MSG_ABORT => MessageBody::Abort(value),
                    MSG_BYTES_READ => MessageBody::BytesRead(value),
                    _ => MessageBody::WindowAckSize(value),
                }
            }
            MSG_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(truncated(&payload));
                }
                let size = payload.get_u32();
                let limit_type = payload.get_u8();
                MessageBody::SetPeerBandwidth { size, limit_type }
            }
            MSG_USER_CONTROL => {
                let event = parse_control(&mut payload).ok_or_else(|| truncated(&raw.payload))?;
                MessageBody::Control(event)
            }
            MSG_AUDIO => MessageBody::Audio(payload),
            MSG_VIDEO => MessageBody::Video(payload),
            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                if raw.message_type == MSG_COMMAND_AMF3 && payload.first() == Some(&0) {
                    payload.advance(1);
                }
                MessageBody::Command(parse_command(payload)?)
            }
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                if raw.message_type == MSG_DATA_AMF3 && payload.first() == Some(&0) {
                    payload.advance(1);
                }
                MessageBody::Metadata(parse_metadata(payload)?)
            }
            MSG_AGGREGATE => MessageBody::Aggregate(payload),
            _ => MessageBody::Unknown(payload),
        };

        Ok(RtmpMessage {
            header: MessageHeader {
                message_type: raw.message_type,
                timestamp: raw.timestamp,
                csid: raw.csid,
                stream_id: raw.stream_id,
                size: raw.payload.len() as u32,
            },
            body,
        })
    }

    pub fn to_raw(&self) -> RawMessage {
        RawMessage {
            csid: self.header.csid,
            timestamp: self.header.timestamp,
            message_type: self.header.message_type,
            stream_id: self.header.stream_id,
            payload: self.payload(),
        }
    }

    /// Serialize the body
    pub fn payload(&self) -> Bytes {
        let amf3 = matches!(self.header.message_type, MSG_COMMAND_AMF3 | MSG_DATA_AMF3);
        match &self.body {
            MessageBody::ChunkSize(v)
            | MessageBody::Abort(v)
            | MessageBody::BytesRead(v)
            | MessageBody::WindowAckSize(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            MessageBody::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                buf.freeze()
            }
            MessageBody::Control(event) => encode_control(event),
            MessageBody::Audio(data)
            | MessageBody::Video(data)
            | MessageBody::Aggregate(data)
            | MessageBody::Unknown(data) => data.clone(),
            MessageBody::Command(cmd) => {
                let mut writer = Amf0Writer::new();
                if amf3 {
                    writer.write_raw(&[0]);
                }
                writer
                    .write(&AmfValue::String(cmd.name.clone()))
                    .write(&AmfValue::Number(cmd.transaction_id))
                    .write(&cmd.object)
                    .write_all(&cmd.args);
                writer.finish()
            }
            MessageBody::Metadata(meta) => {
                let mut writer = Amf0Writer::new();
                if amf3 {
                    writer.write_raw(&[0]);
                }
                writer
                    .write(&AmfValue::String(meta.name.clone()))
                    .write_all(&meta.values);
                writer.finish()
            }
        }
    }

    /// Codec-init audio/video data that late joiners must receive first
    pub fn is_config(&self) -> bool {
        match &self.body {
            MessageBody::Audio(data) => flv::is_audio_config(data),
            MessageBody::Video(data) => flv::is_video_config(data),
            _ => false,
        }
    }

    pub fn as_command(&self) -> Option<&Command> {
        match &self.body {
            MessageBody::Command(cmd) => Some(cmd),
            _ => None,
        }
    }

    pub fn as_metadata(&self) -> Option<&Metadata> {
        match &self.body {
            MessageBody::Metadata(meta) => Some(meta),
            _ => None,
        }
    }

    // Protocol control

    pub fn chunk_size(size: u32) -> Self {
        Self::new(MessageBody::ChunkSize(size))
    }

    pub fn bytes_read(value: u32) -> Self {
        Self::new(MessageBody::BytesRead(value))
    }

    pub fn window_ack_size(size: u32) -> Self {
        Self::new(MessageBody::WindowAckSize(size))
    }

    pub fn set_peer_bandwidth(size: u32, limit_type: u8) -> Self {
        Self::new(MessageBody::SetPeerBandwidth { size, limit_type })
    }

    pub fn control(event: ControlEvent) -> Self {
        Self::new(MessageBody::Control(event))
    }

    // Media

    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(MessageBody::Audio(data)).with_timestamp(timestamp)
    }

    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(MessageBody::Video(data)).with_timestamp(timestamp)
    }

    /// Zero-length audio placeholder
    pub fn empty_audio() -> Self {
        Self::audio(0, Bytes::new())
    }

    /// Zero-length video placeholder
    pub fn empty_video() -> Self {
        Self::video(0, Bytes::new())
    }

    pub fn command(cmd: Command) -> Self {
        Self::new(MessageBody::Command(cmd))
    }

    pub fn metadata(meta: Metadata) -> Self {
        Self::new(MessageBody::Metadata(meta))
    }

    /// Pack audio, video and data messages into one aggregate
    ///
    /// The aggregate carries the first message's timestamp. Returns None if
    /// no message is eligible.
    pub fn aggregate_of(messages: &[RtmpMessage]) -> Option<Self> {
        let mut buf = BytesMut::new();
        let mut first_ts = None;
        let mut stream_id = 0;
        for msg in messages {
            let tag_type = match FlvTagType::from_u8(msg.header.message_type) {
                Some(t) => t,
                None => continue,
            };
            if first_ts.is_none() {
                first_ts = Some(msg.header.timestamp);
                stream_id = msg.header.stream_id;
            }
            FlvTag::new(tag_type, msg.header.timestamp, msg.payload()).write_to(&mut buf);
        }
        let timestamp = first_ts?;
        Some(
            Self::new(MessageBody::Aggregate(buf.freeze()))
                .with_timestamp(timestamp)
                .with_stream_id(stream_id),
        )
    }

    /// Unpack an aggregate into its sub-messages
    ///
    /// Sub-message timestamps are rebased so the first one matches the
    /// aggregate's own timestamp.
    pub fn split_aggregate(&self) -> Result<Vec<RtmpMessage>> {
        let data = match &self.body {
            MessageBody::Aggregate(data) => data.clone(),
            _ => return Ok(vec![self.clone()]),
        };
        let mut rest = data;
        let mut out = Vec::new();
        let mut base = None;
        let total = rest.len();
        loop {
            let offset = total - rest.len();
            let tag = match FlvTag::read_from(&mut rest, offset).map_err(|_| ProtocolError::InvalidAggregate)? {
                Some(tag) => tag,
                None => break,
            };
            let first = *base.get_or_insert(tag.timestamp);
            let timestamp = self
                .header
                .timestamp
                .wrapping_add(tag.timestamp.wrapping_sub(first));
            let raw = RawMessage {
                csid: match tag.tag_type {
                    FlvTagType::Audio => CSID_AUDIO,
                    FlvTagType::Video => CSID_VIDEO,
                    FlvTagType::Script => CSID_DATA,
                },
                timestamp,
                message_type: tag.tag_type.as_u8(),
                stream_id: self.header.stream_id,
                payload: tag.data,
            };
            out.push(RtmpMessage::from_raw(&raw)?);
        }
        Ok(out)
    }
}

fn parse_control(payload: &mut Bytes) -> Option<ControlEvent> {
    if payload.len() < 2 {
        return None;
    }
    let event_type = payload.get_u16();
    let needs = match event_type {
        UC_SET_BUFFER_LENGTH => 8,
        UC_SWF_VERIFY_REQUEST | UC_SWF_VERIFY_RESPONSE => 0,
        UC_STREAM_BEGIN | UC_STREAM_EOF | UC_STREAM_DRY | UC_STREAM_IS_RECORDED
        | UC_PING_REQUEST | UC_PING_RESPONSE | UC_BUFFER_EMPTY | UC_BUFFER_READY => 4,
        _ => 0,
    };
    if payload.len() < needs {
        return None;
    }
    let event = match event_type {
        UC_STREAM_BEGIN => ControlEvent::StreamBegin(payload.get_u32()),
        UC_STREAM_EOF => ControlEvent::StreamEof(payload.get_u32()),
        UC_STREAM_DRY => ControlEvent::StreamDry(payload.get_u32()),
        UC_SET_BUFFER_LENGTH => ControlEvent::SetBuffer {
            stream_id: payload.get_u32(),
            buffer_ms: payload.get_u32(),
        },
        UC_STREAM_IS_RECORDED => ControlEvent::StreamIsRecorded(payload.get_u32()),
        UC_PING_REQUEST => ControlEvent::PingRequest(payload.get_u32()),
        UC_PING_RESPONSE => ControlEvent::PingResponse(payload.get_u32()),
        UC_SWF_VERIFY_REQUEST => ControlEvent::SwfVerifyRequest,
        UC_SWF_VERIFY_RESPONSE => ControlEvent::SwfVerifyResponse(payload.clone()),
        UC_BUFFER_EMPTY => ControlEvent::BufferEmpty(payload.get_u32()),
        UC_BUFFER_READY => ControlEvent::BufferReady(payload.get_u32()),
        _ => ControlEvent::Unknown {
            event_type,
            data: payload.clone(),
        },
    };
    Some(event)
}

fn encode_control(event: &ControlEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    match event {
        ControlEvent::StreamBegin(id) => {
            buf.put_u16(UC_STREAM_BEGIN);
            buf.put_u32(*id);
        }
        ControlEvent::StreamEof(id) => {
            buf.put_u16(UC_STREAM_EOF);
            buf.put_u32(*id);
        }
        ControlEvent::StreamDry(id) => {
            buf.put_u16(UC_STREAM_DRY);
            buf.put_u32(*id);
        }
        ControlEvent::SetBuffer { stream_id, buffer_ms } => {
            buf.put_u16(UC_SET_BUFFER_LENGTH);
            buf.put_u32(*stream_id);
            buf.put_u32(*buffer_ms);
        }
        ControlEvent::StreamIsRecorded(id) => {
            buf.put_u16(UC_STREAM_IS_RECORDED);
            buf.put_u32(*id);
        }
        ControlEvent::PingRequest(ts) => {
            buf.put_u16(UC_PING_REQUEST);
            buf.put_u32(*ts);
        }
        ControlEvent::PingResponse(ts) => {
            buf.put_u16(UC_PING_RESPONSE);
            buf.put_u32(*ts);
        }
        ControlEvent::SwfVerifyRequest => {
            buf.put_u16(UC_SWF_VERIFY_REQUEST);
        }
        ControlEvent::SwfVerifyResponse(data) => {
            buf.put_u16(UC_SWF_VERIFY_RESPONSE);
            buf.put_slice(data);
        }
        ControlEvent::BufferEmpty(id) => {
            buf.put_u16(UC_BUFFER_EMPTY);
            buf.put_u32(*id);
        }
        ControlEvent::BufferReady(id) => {
            buf.put_u16(UC_BUFFER_READY);
            buf.put_u32(*id);
        }
        ControlEvent::Unknown { event_type, data } => {
            buf.put_u16(*event_type);
            buf.put_slice(data);
        }
    }
    buf.freeze()
}

fn parse_command(payload: Bytes) -> Result<Command> {
    let mut reader = Amf0Reader::new(payload);

    let name = match reader.read()? {
        AmfValue::String(s) => s,
        other => {
            return Err(ProtocolError::InvalidCommand(format!("Expected command name, got {:?}", other)).into())
        }
    };
    // Lenient: some encoders omit the transaction id on stream commands
    let transaction_id = if reader.has_remaining() {
        reader.read()?.as_number().unwrap_or(0.0)
    } else {
        0.0
    };
    let object = if reader.has_remaining() {
        reader.read()?
    } else {
        AmfValue::Null
    };
    let args = reader.read_all()?;

    Ok(Command {
        name,
        transaction_id,
        object,
        args,
    })
}

fn parse_metadata(payload: Bytes) -> Result<Metadata> {
    let mut reader = Amf0Reader::new(payload);
    let name = match reader.read()? {
        AmfValue::String(s) => s,
        _ => String::new(),
    };
    let values = reader.read_all()?;
    Ok(Metadata { name, values })
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64, object: AmfValue, args: Vec<AmfValue>) -> Self {
        Command {
            name: name.into(),
            transaction_id,
            object,
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&AmfValue> {
        self.args.get(index)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arg(index)?.as_str()
    }

    pub fn arg_number(&self, index: usize) -> Option<f64> {
        self.arg(index)?.as_number()
    }

    pub fn arg_bool(&self, index: usize) -> Option<bool> {
        self.arg(index)?.as_bool()
    }

    /// `code` of the info object carried by status replies
    pub fn status_code(&self) -> Option<&str> {
        self.args.iter().find_map(|a| a.get_string("code"))
    }

    // Client requests

    pub fn connect(transaction_id: f64, object: AmfObject) -> Self {
        Self::new(CMD_CONNECT, transaction_id, AmfValue::Object(object), vec![])
    }

    pub fn create_stream(transaction_id: f64) -> Self {
        Self::new(CMD_CREATE_STREAM, transaction_id, AmfValue::Null, vec![])
    }

    pub fn play(name: &str, start: i32, length: i32) -> Self {
        Self::new(
            CMD_PLAY,
            0.0,
            AmfValue::Null,
            vec![name.into(), start.into(), length.into()],
        )
    }

    pub fn publish(name: &str, publish_type: &str) -> Self {
        Self::new(CMD_PUBLISH, 0.0, AmfValue::Null, vec![name.into(), publish_type.into()])
    }

    pub fn unpublish() -> Self {
        Self::new(CMD_PUBLISH, 0.0, AmfValue::Null, vec![false.into()])
    }

    pub fn pause(paused: bool, position: u32) -> Self {
        Self::new(CMD_PAUSE, 0.0, AmfValue::Null, vec![paused.into(), position.into()])
    }

    pub fn seek(position: u32) -> Self {
        Self::new(CMD_SEEK, 0.0, AmfValue::Null, vec![position.into()])
    }

    pub fn close_stream() -> Self {
        Self::new(CMD_CLOSE_STREAM, 0.0, AmfValue::Null, vec![])
    }

    pub fn delete_stream(stream_id: u32) -> Self {
        Self::new(CMD_DELETE_STREAM, 0.0, AmfValue::Null, vec![stream_id.into()])
    }

    // Server replies

    pub fn connect_success(transaction_id: f64) -> Self {
        let properties = AmfObject::new()
            .with("fmsVer", SERVER_FMS_VERSION)
            .with("capabilities", 31.0)
            .with("mode", 1.0);
        let info = AmfObject::new()
            .with("level", "status")
            .with("code", NC_CONNECT_SUCCESS)
            .with("description", "Connection succeeded.")
            .with("objectEncoding", 0.0);
        Self::new(CMD_RESULT, transaction_id, properties.into(), vec![info.into()])
    }

    pub fn connect_rejected(transaction_id: f64, description: &str) -> Self {
        let info = AmfObject::new()
            .with("level", "error")
            .with("code", NC_CONNECT_REJECTED)
            .with("description", description);
        Self::new(CMD_ERROR, transaction_id, AmfValue::Null, vec![info.into()])
    }

    pub fn create_stream_success(transaction_id: f64, stream_id: u32) -> Self {
        Self::new(CMD_RESULT, transaction_id, AmfValue::Null, vec![stream_id.into()])
    }

    /// Generic failed-call reply, used when no stream id can be allocated
    pub fn call_failed(transaction_id: f64, description: &str) -> Self {
        let info = AmfObject::new()
            .with("level", "error")
            .with("code", NC_CALL_FAILED)
            .with("description", description);
        Self::new(CMD_ERROR, transaction_id, AmfValue::Null, vec![info.into()])
    }

    pub fn on_bw_done() -> Self {
        Self::new(CMD_ON_BW_DONE, 0.0, AmfValue::Null, vec![])
    }

    /// onStatus with the usual level/code/description info object
    pub fn on_status(level: &str, code: &str, description: &str, play_name: Option<&str>, client_id: Option<&str>) -> Self {
        let mut info = AmfObject::new()
            .with("level", level)
            .with("code", code)
            .with("description", description);
        if let Some(name) = play_name {
            info.insert("details", name);
        }
        if let Some(id) = client_id {
            info.insert("clientid", id);
        }
        Self::new(CMD_ON_STATUS, 0.0, AmfValue::Null, vec![info.into()])
    }

    pub fn play_start(play_name: &str, client_id: &str) -> Self {
        let description = format!("Started playing {}.", play_name);
        Self::on_status("status", NS_PLAY_START, &description, Some(play_name), Some(client_id))
    }

    pub fn play_reset(play_name: &str, client_id: &str) -> Self {
        let description = format!("Playing and resetting {}.", play_name);
        Self::on_status("status", NS_PLAY_RESET, &description, Some(play_name), Some(client_id))
    }

    pub fn play_failed(play_name: &str, client_id: &str) -> Self {
        let description = format!("Failed to play {}.", play_name);
        Self::on_status("error", NS_PLAY_FAILED, &description, Some(play_name), Some(client_id))
    }

    pub fn play_stop(play_name: &str, client_id: &str) -> Self {
        let description = format!("Stopped playing {}.", play_name);
        Self::on_status("status", NS_PLAY_STOP, &description, Some(play_name), Some(client_id))
    }

    pub fn seek_notify(stream_id: u32, position: u32, play_name: &str, client_id: &str) -> Self {
        let description = format!("Seeking {} (stream ID: {}).", position, stream_id);
        Self::on_status("status", NS_SEEK_NOTIFY, &description, Some(play_name), Some(client_id))
    }

    pub fn pause_notify(play_name: &str, client_id: &str) -> Self {
        let description = format!("Pausing {}.", play_name);
        Self::on_status("status", NS_PAUSE_NOTIFY, &description, Some(play_name), Some(client_id))
    }

    pub fn unpause_notify(play_name: &str, client_id: &str) -> Self {
        let description = format!("Unpausing {}.", play_name);
        Self::on_status("status", NS_UNPAUSE_NOTIFY, &description, Some(play_name), Some(client_id))
    }

    pub fn publish_start(name: &str, client_id: &str) -> Self {
        let description = format!("{} is now published.", name);
        Self::on_status("status", NS_PUBLISH_START, &description, Some(name), Some(client_id))
    }

    pub fn publish_bad_name(name: &str) -> Self {
        let description = format!("{} is already being published.", name);
        Self::on_status("error", NS_PUBLISH_BAD_NAME, &description, Some(name), None)
    }

    pub fn publish_notify(name: &str) -> Self {
        let description = format!("{} is now published.", name);
        Self::on_status("status", NS_PLAY_PUBLISH_NOTIFY, &description, Some(name), None)
    }

    pub fn unpublish_notify(name: &str) -> Self {
        let description = format!("{} is now unpublished.", name);
        Self::on_status("status", NS_PLAY_UNPUBLISH_NOTIFY, &description, Some(name), None)
    }

    pub fn unpublish_success(name: &str, client_id: &str) -> Self {
        let description = format!("{} is now unpublished.", name);
        Self::on_status("status", NS_UNPUBLISH_SUCCESS, &description, Some(name), Some(client_id))
    }
}

impl Metadata {
    pub fn new(name: impl Into<String>, values: Vec<AmfValue>) -> Self {
        Metadata {
            name: name.into(),
            values,
        }
    }

    pub fn on_meta_data(properties: AmfObject) -> Self {
        Self::new(DATA_ON_METADATA, vec![AmfValue::EcmaArray(properties)])
    }

    pub fn sample_access() -> Self {
        Self::new(DATA_SAMPLE_ACCESS, vec![false.into(), false.into()])
    }

    pub fn data_start() -> Self {
        let info = AmfObject::new().with("code", NS_DATA_START);
        Self::new(DATA_ON_STATUS, vec![info.into()])
    }

    /// End-of-playback notice; `duration` is in seconds
    pub fn on_play_status(duration: f64, bytes: u64) -> Self {
        let info = AmfObject::new()
            .with("code", NS_PLAY_COMPLETE)
            .with("level", "status")
            .with("duration", duration)
            .with("bytes", bytes);
        Self::new(DATA_ON_PLAY_STATUS, vec![info.into()])
    }

    pub fn is_on_meta_data(&self) -> bool {
        self.name == DATA_ON_METADATA
    }

    pub fn duration(&self) -> Option<f64> {
        self.values.first()?.get_number("duration")
    }

    /// Overwrite the duration property if the first value is object-like
    pub fn set_duration(&mut self, duration: f64) {
        if let Some(obj) = self.values.first_mut().and_then(|v| v.as_object_mut()) {
            obj.insert("duration", duration);
        }
    }

    /// `@setDataFrame("onMetaData", {...})` becomes `onMetaData({...})`
    pub fn unwrap_set_data_frame(self) -> Self {
        if self.name != DATA_SET_DATA_FRAME {
            return self;
        }
        let mut values = self.values.into_iter();
        match values.next() {
            Some(AmfValue::String(inner)) => Metadata {
                name: inner,
                values: values.collect(),
            },
            Some(first) => Metadata {
                name: DATA_SET_DATA_FRAME.to_string(),
                values: std::iter::once(first).chain(values).collect(),
            },
            None => Metadata {
                name: DATA_SET_DATA_FRAME.to_string(),
                values: vec![],
            },
        }
    }
}
