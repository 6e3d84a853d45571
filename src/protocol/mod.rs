//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0C1C2/S0S1S2 exchange, digests, RTMPE key agreement)
//! - Chunk stream multiplexing and demultiplexing
//! - Message framing and parsing

pub mod chunk;
pub mod cipher;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use cipher::{CipherPair, EncryptionProvider, KeyAgreement, SharedEncryptionProvider, StreamCipher};
pub use handshake::{Handshake, HandshakeConfig, HandshakeRole, SwfVerification};
pub use message::{Command, ControlEvent, MessageBody, MessageHeader, Metadata, RtmpMessage};
