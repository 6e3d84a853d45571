//! RTMP server implementation
//!
//! This module provides the server-side transport:
//! - TCP listener accepting connections under a connection limit
//! - Per-connection driver running the handshake, chunk codec and session
//!   engine

pub mod config;
pub mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::RtmpServer;
