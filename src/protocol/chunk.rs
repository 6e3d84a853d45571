//! RTMP chunk stream codec
//!
//! ```text
//! +--------------+------------------+--------------------+-------------+
//! | Basic Header | Message Header   | Extended Timestamp | Chunk Data  |
//! | (1-3 bytes)  | (0, 3, 7, 11)    | (0 or 4 bytes)     | (<= size)   |
//! +--------------+------------------+--------------------+-------------+
//!
//! Basic header:   fmt(2) + csid(6)       csid 2-63
//!                 fmt(2) + 0 + csid-64   csid 64-319
//!                 fmt(2) + 1 + csid-64   csid 64-65599 (little-endian u16)
//! Message header: fmt 0  timestamp(3) length(3) type(1) stream_id(4, LE)
//!                 fmt 1  delta(3) length(3) type(1)
//!                 fmt 2  delta(3)
//!                 fmt 3  nothing, inherit from the previous chunk
//! ```
//!
//! The decoder only consumes bytes once a whole chunk is buffered, so a
//! short read never leaves a chunk stream half-updated. SetChunkSize and
//! Abort are applied by the codec itself at the chunk boundary where they
//! complete.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete message as it travels inside a chunk stream
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub csid: u32,
    pub timestamp: u32,
    pub message_type: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Header state remembered per chunk stream, shared by both directions
#[derive(Debug, Clone, Default)]
struct StreamHeader {
    initialized: bool,
    timestamp: u32,
    /// Last timestamp field as written on the wire (absolute for fmt 0)
    ts_field: u32,
    length: u32,
    message_type: u8,
    stream_id: u32,
    extended: bool,
}

#[derive(Debug, Default)]
struct InboundStream {
    header: StreamHeader,
    partial: BytesMut,
    in_progress: bool,
}

/// Outcome of trying to decode one chunk
enum ChunkStep {
    NeedMore,
    Partial,
    Complete(RawMessage),
}

/// Inbound chunk demultiplexer and message reassembler
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, InboundStream>,
    max_message_size: u32,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Drop a partially received message
    pub fn abort(&mut self, csid: u32) {
        if let Some(stream) = self.streams.get_mut(&csid) {
            stream.partial.clear();
            stream.in_progress = false;
        }
    }

    /// Decode the next complete message from `buf`
    ///
    /// Consumes as many chunks as are fully buffered. Returns `Ok(None)` when
    /// more bytes are needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkStep::NeedMore => return Ok(None),
                ChunkStep::Partial => continue,
                ChunkStep::Complete(msg) => {
                    self.apply_codec_control(&msg)?;
                    return Ok(Some(msg));
                }
            }
        }
    }

    fn apply_codec_control(&mut self, msg: &RawMessage) -> Result<()> {
        match msg.message_type {
            MSG_SET_CHUNK_SIZE => {
                let size = read_u32_payload(msg)? & 0x7FFF_FFFF;
                if size == 0 {
                    return Err(ProtocolError::InvalidChunkSize(size).into());
                }
                tracing::debug!(size = size, "Inbound chunk size changed");
                self.set_chunk_size(size);
            }
            MSG_ABORT => {
                let csid = read_u32_payload(msg)?;
                self.abort(csid);
            }
            _ => {}
        }
        Ok(())
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkStep> {
        let (fmt, csid, basic_len) = match parse_basic_header(buf) {
            Some(v) => v,
            None => return Ok(ChunkStep::NeedMore),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < basic_len + header_len {
            return Ok(ChunkStep::NeedMore);
        }

        let stream = self.streams.entry(csid).or_default();
        if fmt != 0 && !stream.header.initialized {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        let h = &buf[basic_len..basic_len + header_len];
        let mut next = stream.header.clone();
        let ts_field = if fmt <= 2 { read_u24(&h[0..3]) } else { next.ts_field };
        if fmt <= 1 {
            next.length = read_u24(&h[3..6]);
            next.message_type = h[6];
        }
        if fmt == 0 {
            next.stream_id = u32::from_le_bytes([h[7], h[8], h[9], h[10]]);
        }

        let extended = if fmt <= 2 {
            ts_field >= EXTENDED_TIMESTAMP_THRESHOLD
        } else {
            stream.header.extended
        };
        let ext_len = if extended { 4 } else { 0 };
        let prefix = basic_len + header_len + ext_len;
        if buf.len() < prefix {
            return Ok(ChunkStep::NeedMore);
        }
        let ts_value = if extended {
            let e = &buf[basic_len + header_len..prefix];
            u32::from_be_bytes([e[0], e[1], e[2], e[3]])
        } else {
            ts_field
        };

        if next.length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: next.length,
                max: self.max_message_size,
            }
            .into());
        }

        let continuation = fmt == 3 && stream.in_progress;
        let already = if continuation { stream.partial.len() as u32 } else { 0 };
        let data_len = next.length.saturating_sub(already).min(self.chunk_size) as usize;
        if buf.len() < prefix + data_len {
            return Ok(ChunkStep::NeedMore);
        }

        // Whole chunk is buffered: commit
        if !continuation {
            if stream.in_progress {
                tracing::debug!(csid = csid, "New message header interrupted a partial message");
                stream.partial.clear();
            }
            next.timestamp = if fmt == 0 {
                ts_value
            } else {
                stream.header.timestamp.wrapping_add(ts_value)
            };
            next.ts_field = ts_value;
            next.extended = extended;
            next.initialized = true;
            stream.header = next;
            stream.in_progress = true;
            stream.partial.reserve(stream.header.length as usize);
        }

        buf.advance(prefix);
        stream.partial.put_slice(&buf[..data_len]);
        buf.advance(data_len);

        if stream.partial.len() as u32 >= stream.header.length {
            stream.in_progress = false;
            let header = &stream.header;
            Ok(ChunkStep::Complete(RawMessage {
                csid,
                timestamp: header.timestamp,
                message_type: header.message_type,
                stream_id: header.stream_id,
                payload: stream.partial.split().freeze(),
            }))
        } else {
            Ok(ChunkStep::Partial)
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound message chunker
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, StreamHeader>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Append the chunked form of `msg` to `buf`
    ///
    /// An outbound SetChunkSize switches this encoder to the new size once
    /// the message itself has been written at the old size. Empty payloads
    /// still produce one header-only chunk.
    pub fn encode(&mut self, msg: &RawMessage, buf: &mut BytesMut) {
        let prev = self.streams.entry(msg.csid).or_default();
        let length = msg.payload.len() as u32;
        let fmt = select_format(msg, prev);
        let ts_field = if fmt == 0 {
            msg.timestamp
        } else {
            msg.timestamp.wrapping_sub(prev.timestamp)
        };
        let extended = if fmt == 3 { prev.extended } else { ts_field >= EXTENDED_TIMESTAMP_THRESHOLD };
        let wire_ts = ts_field.min(EXTENDED_TIMESTAMP_THRESHOLD);

        *prev = StreamHeader {
            initialized: true,
            timestamp: msg.timestamp,
            ts_field,
            length,
            message_type: msg.message_type,
            stream_id: msg.stream_id,
            extended,
        };

        let chunk_size = self.chunk_size as usize;
        let payload = &msg.payload[..];
        let mut offset = 0;
        loop {
            let first = offset == 0;
            write_basic_header(msg.csid, if first { fmt } else { 3 }, buf);
            if first {
                if fmt <= 2 {
                    write_u24(wire_ts, buf);
                }
                if fmt <= 1 {
                    write_u24(length, buf);
                    buf.put_u8(msg.message_type);
                }
                if fmt == 0 {
                    buf.put_u32_le(msg.stream_id);
                }
            }
            if extended {
                buf.put_u32(ts_field);
            }
            let end = (offset + chunk_size).min(payload.len());
            buf.put_slice(&payload[offset..end]);
            offset = end;
            if offset >= payload.len() {
                break;
            }
        }

        if msg.message_type == MSG_SET_CHUNK_SIZE && payload.len() >= 4 {
            let size = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            self.set_chunk_size(size & 0x7FFF_FFFF);
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn select_format(msg: &RawMessage, prev: &StreamHeader) -> u8 {
    if !prev.initialized || msg.stream_id != prev.stream_id || msg.timestamp < prev.timestamp {
        return 0;
    }
    if msg.message_type != prev.message_type || msg.payload.len() as u32 != prev.length {
        return 1;
    }
    if msg.timestamp.wrapping_sub(prev.timestamp) == prev.ts_field {
        3
    } else {
        2
    }
}

/// Returns (fmt, csid, header length) or None if more bytes are needed
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = first >> 6;
    match first & 0x3F {
        0 => Some((fmt, 64 + *buf.get(1)? as u32, 2)),
        1 => {
            let lo = *buf.get(1)? as u32;
            let hi = *buf.get(2)? as u32;
            Some((fmt, 64 + lo + (hi << 8), 3))
        }
        csid => Some((fmt, csid as u32, 1)),
    }
}

fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 320 {
        let v = csid - 64;
        buf.put_u8((fmt << 6) | 1);
        buf.put_u8((v & 0xFF) as u8);
        buf.put_u8((v >> 8) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | csid as u8);
    }
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

fn read_u32_payload(msg: &RawMessage) -> Result<u32> {
    let mut p = msg.payload.clone();
    if p.len() < 4 {
        return Err(ProtocolError::TruncatedPayload {
            message_type: msg.message_type,
            len: p.len(),
        }
        .into());
    }
    Ok(p.get_u32())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(csid: u32, timestamp: u32, message_type: u8, stream_id: u32, payload: &[u8]) -> RawMessage {
        RawMessage {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_basic_header_forms() {
        assert_eq!(parse_basic_header(&[0x03]), Some((0, 3, 1)));
        assert_eq!(parse_basic_header(&[0xC0, 0x00]), Some((3, 64, 2)));
        assert_eq!(parse_basic_header(&[0x01, 0x00, 0x01]), Some((0, 320, 3)));
        assert_eq!(parse_basic_header(&[0x01, 0x00]), None);

        for csid in [2u32, 63, 64, 319, 320, 65599] {
            let mut buf = BytesMut::new();
            write_basic_header(csid, 1, &mut buf);
            assert_eq!(parse_basic_header(&buf).map(|(f, c, _)| (f, c)), Some((1, csid)));
        }
    }

    #[test]
    fn test_fragmented_message_reassembles() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let payload: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let msg = raw(CSID_VIDEO, 40, MSG_VIDEO, 1, &payload);

        let mut wire = BytesMut::new();
        encoder.encode(&msg, &mut wire);
        // 12-byte first header, three 1-byte continuation headers
        assert_eq!(wire.len(), 500 + 12 + 3);

        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(msg));
        assert!(wire.is_empty());
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        let mut encoder = ChunkEncoder::new();
        let video = raw(CSID_VIDEO, 0, MSG_VIDEO, 1, &[7u8; 200]);
        let audio = raw(CSID_AUDIO, 0, MSG_AUDIO, 1, &[8u8; 20]);

        let mut video_wire = BytesMut::new();
        encoder.encode(&video, &mut video_wire);
        let mut audio_wire = BytesMut::new();
        encoder.encode(&audio, &mut audio_wire);

        // first video chunk, whole audio message, then the video tail
        let split = 12 + 128;
        let mut wire = BytesMut::new();
        wire.put_slice(&video_wire[..split]);
        wire.put_slice(&audio_wire);
        wire.put_slice(&video_wire[split..]);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(audio));
        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(video));
        assert_eq!(decoder.decode(&mut wire).unwrap(), None);
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let mut encoder = ChunkEncoder::new();
        let msg = raw(CSID_COMMAND, 1000, MSG_COMMAND_AMF0, 0, &[1u8; 300]);
        let mut wire = BytesMut::new();
        encoder.encode(&msg, &mut wire);

        let mut decoder = ChunkDecoder::new();
        let mut inbound = BytesMut::new();
        let mut decoded = None;
        for byte in wire.iter() {
            inbound.put_u8(*byte);
            if let Some(m) = decoder.decode(&mut inbound).unwrap() {
                decoded = Some(m);
            }
        }
        assert_eq!(decoded, Some(msg));
    }

    #[test]
    fn test_zero_length_message_round_trips() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let empty = raw(CSID_AUDIO, 0, MSG_AUDIO, 1, &[]);
        let after = raw(CSID_AUDIO, 0, MSG_AUDIO, 1, &[0xAF, 0x01]);

        let mut wire = BytesMut::new();
        encoder.encode(&empty, &mut wire);
        assert_eq!(wire.len(), 12);
        encoder.encode(&after, &mut wire);

        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(empty));
        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(after));
    }

    #[test]
    fn test_chunk_size_change_applies_at_boundary() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();

        let set_size = raw(CSID_PROTOCOL_CONTROL, 0, MSG_SET_CHUNK_SIZE, 0, &4096u32.to_be_bytes());
        let big = raw(CSID_VIDEO, 0, MSG_VIDEO, 1, &[9u8; 3000]);

        let mut wire = BytesMut::new();
        encoder.encode(&set_size, &mut wire);
        assert_eq!(encoder.chunk_size(), 4096);
        encoder.encode(&big, &mut wire);
        // single chunk at the new size
        assert_eq!(wire.len(), 16 + 12 + 3000);

        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(set_size));
        assert_eq!(decoder.chunk_size(), 4096);
        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(big));
    }

    #[test]
    fn test_header_compression_preserves_timestamps() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let msgs = vec![
            raw(CSID_AUDIO, 0, MSG_AUDIO, 1, &[1, 2, 3]),
            raw(CSID_AUDIO, 23, MSG_AUDIO, 1, &[1, 2, 3]),
            raw(CSID_AUDIO, 46, MSG_AUDIO, 1, &[1, 2, 3]),
            raw(CSID_AUDIO, 70, MSG_AUDIO, 1, &[4, 5]),
            raw(CSID_AUDIO, 10, MSG_AUDIO, 1, &[4, 5]),
        ];
        let mut wire = BytesMut::new();
        for m in &msgs {
            encoder.encode(m, &mut wire);
        }
        for m in &msgs {
            assert_eq!(decoder.decode(&mut wire).unwrap().as_ref(), Some(m));
        }
    }

    #[test]
    fn test_extended_timestamp() {
        let mut encoder = ChunkEncoder::new();
        let mut decoder = ChunkDecoder::new();
        let msg = raw(CSID_VIDEO, 0x0100_0000, MSG_VIDEO, 1, &[3u8; 200]);

        let mut wire = BytesMut::new();
        encoder.encode(&msg, &mut wire);
        assert_eq!(&wire[1..4], &[0xFF, 0xFF, 0xFF]);

        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(msg));
    }

    #[test]
    fn test_abort_discards_partial_message() {
        let mut encoder = ChunkEncoder::new();
        let video = raw(CSID_VIDEO, 0, MSG_VIDEO, 1, &[1u8; 200]);
        let mut video_wire = BytesMut::new();
        encoder.encode(&video, &mut video_wire);

        let abort = raw(CSID_PROTOCOL_CONTROL, 0, MSG_ABORT, 0, &CSID_VIDEO.to_be_bytes());
        let next = raw(CSID_VIDEO, 0, MSG_VIDEO, 1, &[2u8; 10]);

        let mut wire = BytesMut::new();
        wire.put_slice(&video_wire[..12 + 128]);
        let mut tail = ChunkEncoder::new();
        tail.encode(&abort, &mut wire);
        tail.encode(&next, &mut wire);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(abort));
        assert_eq!(decoder.decode(&mut wire).unwrap(), Some(next));
    }

    #[test]
    fn test_continuation_on_unknown_stream_is_violation() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::from(&[0xC5u8, 0x00][..]);
        assert!(decoder.decode(&mut wire).is_err());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::new();
        wire.put_u8(0x04);
        write_u24(0, &mut wire);
        write_u24(0xFF_FFFF, &mut wire);
        wire.put_u8(MSG_VIDEO);
        wire.put_u32_le(1);
        // 0xFFFFFF is below the 16 MiB limit, so shrink the limit for the check
        decoder.max_message_size = 1024;
        assert!(decoder.decode(&mut wire).is_err());
    }
}
