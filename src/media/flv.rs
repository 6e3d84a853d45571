//! FLV tag framing and codec header inspection
//!
//! FLV (Flash Video) is both the on-disk container for recorded streams and
//! the body format of RTMP aggregate messages. An RTMP audio/video message
//! is an FLV tag without the tag header.
//!
//! FLV Tag Structure:
//! ```text
//! +--------+-------------+-----------+-------------+---------+-------------+
//! | Type(1)| DataSize(3) | TS(3+1)   | StreamID(3) | Data(N) | PrevSize(4) |
//! +--------+-------------+-----------+-------------+---------+-------------+
//! ```
//!
//! RTMP Video Data:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! RTMP Audio Data:
//! ```text
//! +-----------+----------+----------+----------+
//! |SoundFormat|SoundRate |SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits) | (1 bit)  | (1 bit)  |
//! +-----------+----------+----------+----------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;
use crate::protocol::constants::{MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO};

/// Size of the tag header preceding the tag data
pub const TAG_HEADER_SIZE: usize = 11;

/// Size of the FLV file header including the first previous-tag-size field
pub const FILE_HEADER_SIZE: usize = 13;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            MSG_AUDIO => Some(FlvTagType::Audio),
            MSG_VIDEO => Some(FlvTagType::Video),
            MSG_DATA_AMF0 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    /// Tag type byte, identical to the RTMP message type id
    pub fn as_u8(&self) -> u8 {
        match self {
            FlvTagType::Audio => MSG_AUDIO,
            FlvTagType::Video => MSG_VIDEO,
            FlvTagType::Script => MSG_DATA_AMF0,
        }
    }
}

/// One FLV tag
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Raw tag data (including codec headers)
    pub data: Bytes,
}

/// Video codec id (lower 4 bits of first byte)
pub const VIDEO_CODEC_AVC: u8 = 7;

/// Sound format (upper 4 bits of first byte)
pub const AUDIO_FORMAT_AAC: u8 = 10;

/// AAC AudioSpecificConfig: codec-init data every decoder needs first
pub fn is_audio_config(data: &[u8]) -> bool {
    data.len() >= 2 && (data[0] >> 4) == AUDIO_FORMAT_AAC && data[1] == 0
}

/// AVC decoder configuration record
pub fn is_video_config(data: &[u8]) -> bool {
    data.len() >= 2 && (data[0] & 0x0F) == VIDEO_CODEC_AVC && data[1] == 0
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    /// Codec-init data for either media kind
    pub fn is_config(&self) -> bool {
        match self.tag_type {
            FlvTagType::Audio => is_audio_config(&self.data),
            FlvTagType::Video => is_video_config(&self.data),
            FlvTagType::Script => false,
        }
    }

    /// Bytes this tag occupies on disk including the trailer
    pub fn encoded_len(&self) -> usize {
        TAG_HEADER_SIZE + self.data.len() + 4
    }

    /// Append tag header, data and previous-tag-size trailer
    pub fn write_to(&self, buf: &mut BytesMut) {
        let size = self.data.len() as u32;
        buf.put_u8(self.tag_type.as_u8());
        put_u24(buf, size);
        put_u24(buf, self.timestamp & 0x00FF_FFFF);
        buf.put_u8((self.timestamp >> 24) as u8);
        put_u24(buf, 0);
        buf.put_slice(&self.data);
        buf.put_u32(size + TAG_HEADER_SIZE as u32);
    }

    /// Read one tag with its trailer from the front of `buf`
    ///
    /// `offset` is only used for error reporting. Returns `Ok(None)` at a
    /// clean end of input.
    pub fn read_from(buf: &mut Bytes, offset: usize) -> Result<Option<FlvTag>, MediaError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() < TAG_HEADER_SIZE {
            return Err(MediaError::InvalidFlvTag { offset });
        }
        let type_byte = buf[0];
        let size = get_u24(&buf[1..4]) as usize;
        if buf.len() < TAG_HEADER_SIZE + size + 4 {
            return Err(MediaError::InvalidFlvTag { offset });
        }
        let tag_type = FlvTagType::from_u8(type_byte & 0x1F)
            .ok_or(MediaError::UnsupportedTagType(type_byte))?;
        let timestamp = get_u24(&buf[4..7]) | ((buf[7] as u32) << 24);

        buf.advance(TAG_HEADER_SIZE);
        let data = buf.split_to(size);
        buf.advance(4);

        Ok(Some(FlvTag {
            tag_type,
            timestamp,
            data,
        }))
    }
}

/// Write the 9-byte FLV header plus the zero previous-tag-size
pub fn write_file_header(buf: &mut BytesMut, has_audio: bool, has_video: bool) {
    buf.put_slice(b"FLV");
    buf.put_u8(1);
    let mut flags = 0u8;
    if has_audio {
        flags |= 0x04;
    }
    if has_video {
        flags |= 0x01;
    }
    buf.put_u8(flags);
    buf.put_u32(9);
    buf.put_u32(0);
}

/// Validate and skip the FLV file header
pub fn read_file_header(buf: &mut Bytes) -> Result<(), MediaError> {
    if buf.len() < FILE_HEADER_SIZE || &buf[0..3] != b"FLV" {
        return Err(MediaError::InvalidFlvHeader);
    }
    let data_offset = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
    if data_offset < 9 || buf.len() < data_offset + 4 {
        return Err(MediaError::InvalidFlvHeader);
    }
    buf.advance(data_offset + 4);
    Ok(())
}

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_u8((v >> 16) as u8);
    buf.put_u8((v >> 8) as u8);
    buf.put_u8(v as u8);
}

fn get_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_detection() {
        assert!(is_video_config(&[0x17, 0x00, 0x00, 0x00, 0x00]));
        assert!(!is_video_config(&[0x17, 0x01, 0x00, 0x00, 0x00]));
        assert!(!is_video_config(&[0x12, 0x00]));
        assert!(is_audio_config(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(!is_audio_config(&[0xAF, 0x01, 0x21, 0x00]));
        assert!(!is_audio_config(&[0x2F, 0x00]));
        assert!(!is_audio_config(&[]));

        let tag = FlvTag::new(FlvTagType::Video, 0, Bytes::from_static(&[0x17, 0x00, 0x01]));
        assert!(tag.is_config());
    }

    #[test]
    fn test_tag_framing() {
        let tag = FlvTag::new(FlvTagType::Audio, 0x0123_4567, Bytes::from_static(&[1, 2, 3]));
        let mut buf = BytesMut::new();
        tag.write_to(&mut buf);
        assert_eq!(buf.len(), tag.encoded_len());
        // timestamp extension byte carries the high bits
        assert_eq!(&buf[4..8], &[0x23, 0x45, 0x67, 0x01]);
        assert_eq!(&buf[buf.len() - 4..], &14u32.to_be_bytes());

        let mut bytes = buf.freeze();
        assert_eq!(FlvTag::read_from(&mut bytes, 0).unwrap(), Some(tag));
        assert_eq!(FlvTag::read_from(&mut bytes, 0).unwrap(), None);
    }

    #[test]
    fn test_truncated_tag() {
        let tag = FlvTag::new(FlvTagType::Video, 10, Bytes::from_static(&[0x17, 0x01, 9, 9]));
        let mut buf = BytesMut::new();
        tag.write_to(&mut buf);
        let mut truncated = buf.freeze().slice(..12);
        assert_eq!(
            FlvTag::read_from(&mut truncated, 42),
            Err(MediaError::InvalidFlvTag { offset: 42 })
        );
    }

    #[test]
    fn test_file_header() {
        let mut buf = BytesMut::new();
        write_file_header(&mut buf, true, true);
        assert_eq!(buf.len(), FILE_HEADER_SIZE);
        assert_eq!(buf[4], 0x05);

        let mut bytes = buf.freeze();
        read_file_header(&mut bytes).unwrap();
        assert!(bytes.is_empty());

        let mut bad = Bytes::from_static(b"NOTFLV-------");
        assert_eq!(read_file_header(&mut bad), Err(MediaError::InvalidFlvHeader));
    }
}
