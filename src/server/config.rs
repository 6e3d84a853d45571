//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::cipher::SharedEncryptionProvider;
use crate::protocol::constants::*;
use crate::protocol::handshake::HandshakeConfig;
use crate::session::SessionConfig;

/// Server configuration options
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Chunk size announced in publish and play preambles
    pub chunk_size: u32,

    /// Inbound bytes between our acknowledgements
    pub read_window: u32,

    /// Window announced to the peer
    pub write_window: u32,

    /// Handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Disconnect if nothing is received for this long
    pub idle_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Application-level write buffer size
    pub write_buffer_size: usize,

    /// How often an idle connection advances its playback
    pub playback_tick: Duration,

    /// Batch due playback messages into aggregates
    pub aggregate: bool,

    /// Outbound queue length per live subscriber
    pub subscriber_capacity: usize,

    /// Size of the shared message stream id space
    pub stream_id_capacity: u32,

    /// Fail handshakes whose client digest does not validate
    pub validate_client_digest: bool,

    /// Key agreement and ciphers for encrypted connections
    pub encryption: Option<SharedEncryptionProvider>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], RTMP_PORT)),
            max_connections: 0,
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            read_window: DEFAULT_WINDOW_ACK_SIZE,
            write_window: DEFAULT_PEER_BANDWIDTH,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            tcp_nodelay: true, // Important for low latency
            read_buffer_size: 64 * 1024,
            write_buffer_size: 64 * 1024,
            playback_tick: Duration::from_millis(10),
            aggregate: true,
            subscriber_capacity: 1024,
            stream_id_capacity: 1024,
            validate_client_digest: false,
            encryption: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("chunk_size", &self.chunk_size)
            .field("read_window", &self.read_window)
            .field("write_window", &self.write_window)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("playback_tick", &self.playback_tick)
            .field("aggregate", &self.aggregate)
            .field("encryption", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.min(MAX_CHUNK_SIZE);
        self
    }

    pub fn windows(mut self, read_window: u32, write_window: u32) -> Self {
        self.read_window = read_window;
        self.write_window = write_window;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn playback_tick(mut self, tick: Duration) -> Self {
        self.playback_tick = tick;
        self
    }

    /// Send recorded playback message by message
    pub fn disable_aggregation(mut self) -> Self {
        self.aggregate = false;
        self
    }

    pub fn stream_id_capacity(mut self, capacity: u32) -> Self {
        self.stream_id_capacity = capacity;
        self
    }

    pub fn validate_client_digest(mut self, validate: bool) -> Self {
        self.validate_client_digest = validate;
        self
    }

    pub fn encryption(mut self, provider: SharedEncryptionProvider) -> Self {
        self.encryption = Some(provider);
        self
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if self.read_window == 0 || self.write_window == 0 {
            return Err(Error::Config("acknowledgement windows must be positive".into()));
        }
        if self.playback_tick.is_zero() {
            return Err(Error::Config("playback tick must be positive".into()));
        }
        if self.stream_id_capacity == 0 {
            return Err(Error::Config("stream id space must not be empty".into()));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_size: self.chunk_size,
            read_window: self.read_window,
            write_window: self.write_window,
            aggregate: self.aggregate,
            subscriber_capacity: self.subscriber_capacity,
        }
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            validate_peer_digest: self.validate_client_digest,
            encryption: self.encryption.clone(),
            ..HandshakeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 1935);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.read_window, 2_500_000);
        assert_eq!(config.playback_tick, Duration::from_millis(10));
        assert!(config.aggregate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_configs() {
        let config = ServerConfig::default()
            .windows(1000, 2000)
            .disable_aggregation()
            .stream_id_capacity(8)
            .validate_client_digest(true);
        let session = config.session_config();
        assert_eq!(session.read_window, 1000);
        assert_eq!(session.write_window, 2000);
        assert!(!session.aggregate);
        assert_eq!(config.stream_id_capacity, 8);
        assert!(config.handshake_config().validate_peer_digest);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(ServerConfig::default().windows(0, 10).validate().is_err());
        assert!(ServerConfig::default().playback_tick(Duration::ZERO).validate().is_err());
        assert!(ServerConfig::default().stream_id_capacity(0).validate().is_err());
    }
}
