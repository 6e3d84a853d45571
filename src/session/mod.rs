//! RTMP session engine
//!
//! This module holds the per-connection protocol logic, independent of the
//! transport:
//! - Request parsing into a closed command set
//! - Per-connection state and flow-control accounting
//! - The engine that turns inbound messages into outbound ones and drives
//!   registry, playback and recording side effects

pub mod context;
pub mod engine;
pub mod request;

pub use context::{FlowControl, SessionContext, SessionState};
pub use engine::SessionEngine;
pub use request::Request;

use std::sync::Arc;

use crate::protocol::constants::{DEFAULT_PEER_BANDWIDTH, DEFAULT_WINDOW_ACK_SIZE, RECOMMENDED_CHUNK_SIZE};
use crate::registry::{StreamIdAllocator, StreamRegistry};
use crate::storage::ApplicationResolver;

/// Per-session protocol settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Chunk size announced in publish and play preambles
    pub chunk_size: u32,
    /// Inbound bytes between acknowledgements
    pub read_window: u32,
    /// Window announced to the peer
    pub write_window: u32,
    /// Batch due playback messages into aggregates
    pub aggregate: bool,
    /// Outbound queue length for live delivery
    pub subscriber_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            read_window: DEFAULT_WINDOW_ACK_SIZE,
            write_window: DEFAULT_PEER_BANDWIDTH,
            aggregate: true,
            subscriber_capacity: 1024,
        }
    }
}

/// State shared by every session of a server
#[derive(Clone)]
pub struct SharedServices {
    pub registry: Arc<StreamRegistry>,
    pub stream_ids: Arc<StreamIdAllocator>,
    pub resolver: Arc<dyn ApplicationResolver>,
}

impl SharedServices {
    pub fn new(
        registry: Arc<StreamRegistry>,
        stream_ids: Arc<StreamIdAllocator>,
        resolver: Arc<dyn ApplicationResolver>,
    ) -> Self {
        Self {
            registry,
            stream_ids,
            resolver,
        }
    }
}
