//! RTMP client implementation
//!
//! Provides client-side RTMP for:
//! - Playing streams into a recording sink
//! - Publishing recorded files, optionally looped
//! - Load testing a server with many concurrent players

pub mod config;
pub mod connector;
pub mod session;

pub use config::ClientOptions;
pub use connector::RtmpConnector;
pub use session::{play_to_sink, publish_from_reader, run, run_load, LoadReport, PlayReport};
