//! rtmp-engine: embeddable RTMP server and client engine
//!
//! This library provides:
//! - Server mode: handshake (plain, digest, encrypted), chunk codec,
//!   per-connection session engine
//! - Live fan-out from one publisher to many subscribers per stream name
//! - Paced playback of recorded content with seek, pause and aggregation
//! - Recording of published streams through pluggable storage
//! - Client mode for playing, publishing and load testing
//!
//! # Example: VOD server over a directory of FLV files
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtmp_engine::storage::FlvDirectory;
//! use rtmp_engine::{RtmpServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RtmpServer::new(ServerConfig::default(), Arc::new(FlvDirectory::new("./media")))?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod error;
pub mod media;
pub mod playback;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;

// Re-export main types for convenience
pub use client::{ClientOptions, RtmpConnector};
pub use error::{Error, Result};
pub use registry::{PublishMode, StreamKey, StreamRegistry};
pub use server::{RtmpServer, ServerConfig};
pub use session::SessionEngine;
pub use storage::{Application, ApplicationResolver, RecordedReader, RecordingSink};
