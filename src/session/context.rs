//! Per-connection session state
//!
//! Everything a connection mutates while it runs lives in one
//! [`SessionContext`], owned exclusively by that connection's engine.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::playback::PlaybackScheduler;
use crate::registry::{SessionId, StreamHandle};
use crate::storage::{Application, RecordingSink};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Connected,
    StreamAllocated,
    Publishing,
    Playing,
    Closed,
}

/// Byte accounting for acknowledgements
#[derive(Debug, Clone)]
pub struct FlowControl {
    /// Inbound bytes between our acknowledgements
    pub read_window: u32,
    /// Window we ask the peer to acknowledge on
    pub write_window: u32,
    bytes_read: u64,
    last_ack: u64,
    /// Last acknowledgement value received from the peer
    pub peer_acked: u32,
    bytes_written: u64,
}

impl FlowControl {
    pub fn new(read_window: u32, write_window: u32) -> Self {
        Self {
            read_window,
            write_window,
            bytes_read: 0,
            last_ack: 0,
            peer_acked: 0,
            bytes_written: 0,
        }
    }

    /// Count an inbound message; returns the acknowledgement value once more
    /// than a window's worth has arrived since the last one
    pub fn on_received(&mut self, size: u32) -> Option<u32> {
        self.bytes_read += size as u64;
        if self.bytes_read - self.last_ack > self.read_window as u64 {
            self.last_ack = self.bytes_read;
            // sequence number wraps at 32 bits
            Some(self.bytes_read as u32)
        } else {
            None
        }
    }

    pub fn on_written(&mut self, bytes: u64) {
        self.bytes_written += bytes;
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Mutable state of one connection
pub struct SessionContext {
    pub session_id: SessionId,
    pub peer_addr: Option<SocketAddr>,
    pub state: SessionState,
    /// Connect-time application name
    pub app_name: String,
    pub application: Option<Arc<dyn Application>>,
    pub client_id: String,
    /// Most recently allocated message stream id
    pub stream_id: u32,
    /// Every id taken from the shared allocator; returned on close
    pub allocated_ids: Vec<u32>,
    /// Client buffer hint from SetBuffer (ms)
    pub buffer_duration: u32,
    pub play_name: Option<String>,
    pub playback: Option<PlaybackScheduler>,
    pub recorder: Option<Box<dyn RecordingSink>>,
    /// Stream this connection publishes to
    pub publishing: Option<StreamHandle>,
    /// Live stream this connection is subscribed to
    pub subscribed: Option<StreamHandle>,
    pub flow: FlowControl,
}

impl SessionContext {
    pub fn new(session_id: SessionId, read_window: u32, write_window: u32) -> Self {
        Self {
            session_id,
            peer_addr: None,
            state: SessionState::Handshaking,
            app_name: String::new(),
            application: None,
            client_id: session_id.to_string(),
            stream_id: 0,
            allocated_ids: Vec::new(),
            buffer_duration: 0,
            play_name: None,
            playback: None,
            recorder: None,
            publishing: None,
            subscribed: None,
            flow: FlowControl::new(read_window, write_window),
        }
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("app", &self.app_name)
            .field("stream_id", &self.stream_id)
            .field("play_name", &self.play_name)
            .field("playing", &self.playback.is_some())
            .field("recording", &self.recorder.is_some())
            .field("publishing", &self.is_publishing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_ack_after_window_exceeded() {
        let mut flow = FlowControl::new(2_500_000, 2_500_000);
        assert_eq!(flow.on_received(1_250_000), None);
        assert_eq!(flow.on_received(1_250_000), None);
        assert_eq!(flow.on_received(1), Some(2_500_001));
        assert_eq!(flow.on_received(2_500_000), None);
        assert_eq!(flow.on_received(1), Some(5_000_002));
        assert_eq!(flow.bytes_read(), 5_000_002);
    }

    #[test]
    fn test_ack_value_wraps() {
        let mut flow = FlowControl::new(10, 10);
        flow.bytes_read = u32::MAX as u64;
        flow.last_ack = u32::MAX as u64;
        assert_eq!(flow.on_received(20), Some(19));
    }

    #[test]
    fn test_context_defaults() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)), 54321);
        let mut ctx = SessionContext::new(42, 100, 200);
        ctx.peer_addr = Some(addr);
        assert_eq!(ctx.session_id, 42);
        assert_eq!(ctx.peer_addr, Some(addr));
        assert_eq!(ctx.client_id, "42");
        assert_eq!(ctx.state, SessionState::Handshaking);
        assert!(!ctx.is_publishing());
        assert!(!ctx.is_closed());
    }
}
