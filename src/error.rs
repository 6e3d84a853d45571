//! Unified error types for rtmp-engine

use std::fmt;
use std::io;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for engine operations
#[derive(Debug)]
pub enum Error {
    /// I/O error on the transport
    Io(io::Error),
    /// Chunk framing or message payload violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Recorded media container error
    Media(MediaError),
    /// Request rejected by the peer or the application
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Transport closed by the peer
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Rejected(msg) => write!(f, "Rejected: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Handshake(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<MediaError> for Error {
    fn from(err: MediaError) -> Self {
        Error::Media(err)
    }
}

/// Chunk and message framing errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    MessageTooLarge { size: u32, max: u32 },
    InvalidChunkSize(u32),
    /// Control payload shorter than its message type requires
    TruncatedPayload { message_type: u8, len: usize },
    InvalidCommand(String),
    InvalidAggregate,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidChunkSize(size) => write!(f, "Invalid chunk size: {}", size),
            ProtocolError::TruncatedPayload { message_type, len } => {
                write!(f, "Truncated payload for message type {}: {} bytes", message_type, len)
            }
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::InvalidAggregate => write!(f, "Malformed aggregate message"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug, PartialEq, Eq)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    InvalidReference(u16),
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::InvalidReference(idx) => write!(f, "Invalid AMF reference: {}", idx),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    InvalidVersion(u8),
    DigestMismatch,
    /// Encrypted handshake requested but no cipher provider is installed
    EncryptionUnavailable,
    KeyAgreement(String),
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::DigestMismatch => write!(f, "Handshake digest mismatch"),
            HandshakeError::EncryptionUnavailable => {
                write!(f, "Encrypted handshake requested without an encryption provider")
            }
            HandshakeError::KeyAgreement(msg) => write!(f, "Key agreement failed: {}", msg),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Recorded media container errors
#[derive(Debug, PartialEq, Eq)]
pub enum MediaError {
    InvalidFlvHeader,
    InvalidFlvTag { offset: usize },
    UnsupportedTagType(u8),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidFlvHeader => write!(f, "Invalid FLV header"),
            MediaError::InvalidFlvTag { offset } => write!(f, "Invalid FLV tag at offset {}", offset),
            MediaError::UnsupportedTagType(t) => write!(f, "Unsupported FLV tag type: {}", t),
        }
    }
}

impl std::error::Error for MediaError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let err = Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(err.to_string().contains("I/O error"));

        let err = Error::Protocol(ProtocolError::InvalidChunkHeader);
        assert!(err.to_string().contains("Protocol error"));
        assert!(err.to_string().contains("Invalid chunk header"));

        let err = Error::Protocol(ProtocolError::TruncatedPayload { message_type: 5, len: 2 });
        assert!(err.to_string().contains("message type 5"));

        let err = Error::Amf(AmfError::UnknownMarker(0xFF));
        assert!(err.to_string().contains("0xff"));

        let err = Error::Handshake(HandshakeError::DigestMismatch);
        assert!(err.to_string().contains("digest mismatch"));

        let err = Error::Media(MediaError::InvalidFlvTag { offset: 13 });
        assert!(err.to_string().contains("13"));

        let err = Error::Rejected("cam1 in use".into());
        assert!(err.to_string().contains("cam1 in use"));

        assert!(Error::Timeout.to_string().contains("timed out"));
        assert!(Error::ConnectionClosed.to_string().contains("closed"));
        assert!(Error::Config("bad port".into()).to_string().contains("bad port"));
    }

    #[test]
    fn test_error_source() {
        let err = Error::Io(io::Error::new(io::ErrorKind::Other, "x"));
        assert!(err.source().is_some());

        let err = Error::Handshake(HandshakeError::InvalidVersion(1));
        assert!(err.source().is_some());

        assert!(Error::Timeout.source().is_none());
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, Error::Io(_)));

        let err: Error = ProtocolError::InvalidAggregate.into();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidAggregate)));

        let err: Error = AmfError::UnexpectedEof.into();
        assert!(matches!(err, Error::Amf(AmfError::UnexpectedEof)));

        let err: Error = HandshakeError::EncryptionUnavailable.into();
        assert!(matches!(err, Error::Handshake(_)));

        let err: Error = MediaError::InvalidFlvHeader.into();
        assert!(matches!(err, Error::Media(_)));
    }
}
