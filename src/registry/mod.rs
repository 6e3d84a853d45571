//! Process-wide stream registry
//!
//! Streams are keyed by (app, name) and live for the life of the process:
//! an unpublish clears the publisher slot but keeps the entry, so subscribers
//! waiting on a name keep their membership across publish cycles.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<StreamRegistry>
//!                  ┌──────────────────────────────┐
//!                  │ streams: HashMap<Key,        │
//!                  │   Arc<RwLock<Stream {        │
//!                  │     publisher, mode,         │
//!                  │     subscribers: id -> Tx,   │
//!                  │     config cache,            │
//!                  │   }>>                        │
//!                  │ >                            │
//!                  └──────────────┬───────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!    [Publisher]            [Subscriber]            [Subscriber]
//!    broadcast() ──────►  inbox.recv()   ──────►  inbox.recv() ──► TCP
//! ```
//!
//! The "check publisher absent, then set" step runs under the stream's
//! write lock, so concurrent publish attempts see exactly one winner.

pub mod allocator;
pub mod broadcast;

pub use allocator::StreamIdAllocator;
pub use broadcast::broadcast;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::protocol::message::{MessageBody, RtmpMessage};

/// Per-connection identifier used for publisher and subscriber bookkeeping
pub type SessionId = u64;

/// Outbound queue of a subscribed connection
pub type SubscriberTx = mpsc::Sender<RtmpMessage>;

/// Shared handle to one stream
pub type StreamHandle = Arc<RwLock<Stream>>;

/// Unique identifier for a stream (app + stream name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Application name (e.g., "vod")
    pub app: String,
    /// Stream name (e.g., "cam1")
    pub name: String,
}

impl StreamKey {
    /// Build a key, dropping any query string from the requested name
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        let mut name = name.into();
        if let Some(pos) = name.find('?') {
            name.truncate(pos);
        }
        Self { app: app.into(), name }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.name)
    }
}

/// How a publisher's content is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    #[default]
    Live,
    Record,
    Append,
}

impl PublishMode {
    /// Parse the publish type argument; unknown values publish live
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "record" => PublishMode::Record,
            "append" => PublishMode::Append,
            _ => PublishMode::Live,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::Live => "live",
            PublishMode::Record => "record",
            PublishMode::Append => "append",
        }
    }
}

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Stream already has a publisher
    PublisherConflict(StreamKey),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::PublisherConflict(key) => {
                write!(f, "Stream already has a publisher: {}", key)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// A named stream: publisher slot, subscriber set and config cache
#[derive(Debug)]
pub struct Stream {
    key: StreamKey,
    mode: PublishMode,
    publisher: Option<SessionId>,
    subscribers: HashMap<SessionId, SubscriberTx>,
    /// At most one message per kind (audio config, video config, metadata)
    config_messages: Vec<RtmpMessage>,
}

impl Stream {
    fn new(key: StreamKey) -> Self {
        Self {
            key,
            mode: PublishMode::Live,
            publisher: None,
            subscribers: HashMap::new(),
            config_messages: Vec::new(),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    pub fn publisher(&self) -> Option<SessionId> {
        self.publisher
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher.is_some()
    }

    /// A live publisher is attached; players join the broadcast
    pub fn is_live(&self) -> bool {
        self.publisher.is_some() && self.mode == PublishMode::Live
    }

    /// Claim the publisher slot
    ///
    /// A conflicting attempt leaves the incumbent and its state untouched.
    /// A successful claim starts a fresh config cache.
    pub fn set_publisher(&mut self, session_id: SessionId, mode: PublishMode) -> Result<(), RegistryError> {
        if let Some(current) = self.publisher {
            tracing::warn!(
                stream = %self.key,
                current = current,
                rejected = session_id,
                "Publish rejected, stream already has a publisher"
            );
            return Err(RegistryError::PublisherConflict(self.key.clone()));
        }
        self.publisher = Some(session_id);
        self.mode = mode;
        self.config_messages.clear();
        tracing::info!(
            stream = %self.key,
            session_id = session_id,
            mode = mode.as_str(),
            subscribers = self.subscribers.len(),
            "Publisher registered"
        );
        Ok(())
    }

    /// Release the publisher slot if `session_id` holds it
    pub fn clear_publisher(&mut self, session_id: SessionId) -> bool {
        if self.publisher != Some(session_id) {
            return false;
        }
        self.publisher = None;
        tracing::info!(stream = %self.key, session_id = session_id, "Publisher cleared");
        true
    }

    pub fn add_subscriber(&mut self, session_id: SessionId, tx: SubscriberTx) {
        self.subscribers.insert(session_id, tx);
        tracing::info!(
            stream = %self.key,
            session_id = session_id,
            subscribers = self.subscribers.len(),
            "Subscriber added"
        );
    }

    pub fn remove_subscriber(&mut self, session_id: SessionId) -> bool {
        let removed = self.subscribers.remove(&session_id).is_some();
        if removed {
            tracing::debug!(
                stream = %self.key,
                session_id = session_id,
                subscribers = self.subscribers.len(),
                "Subscriber removed"
            );
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Copy of the subscriber set, taken so fan-out runs without the lock
    pub fn subscribers_snapshot(&self) -> Vec<(SessionId, SubscriberTx)> {
        self.subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }

    /// Cache a configuration message, replacing any earlier one of its kind
    pub fn add_config_message(&mut self, message: RtmpMessage) {
        let kind = config_kind(&message);
        match self.config_messages.iter_mut().find(|m| config_kind(m) == kind) {
            Some(slot) => *slot = message,
            None => self.config_messages.push(message),
        }
    }

    pub fn config_messages(&self) -> &[RtmpMessage] {
        &self.config_messages
    }
}

/// Cache slot a config message occupies
fn config_kind(message: &RtmpMessage) -> u8 {
    match &message.body {
        MessageBody::Audio(_) => 0,
        MessageBody::Video(_) => 1,
        _ => 2,
    }
}

/// Statistics for a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    pub subscriber_count: usize,
    pub has_publisher: bool,
    pub mode: PublishMode,
    pub config_message_count: usize,
}

/// Central registry for all streams
///
/// The map is behind a `RwLock`; each stream has its own lock so traffic
/// on one name never blocks another.
pub struct StreamRegistry {
    streams: RwLock<HashMap<StreamKey, StreamHandle>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a stream, creating it on first reference
    pub async fn get_or_create(&self, key: &StreamKey) -> StreamHandle {
        if let Some(stream) = self.streams.read().await.get(key) {
            return Arc::clone(stream);
        }
        let mut streams = self.streams.write().await;
        Arc::clone(streams.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(stream = %key, "Stream created");
            Arc::new(RwLock::new(Stream::new(key.clone())))
        }))
    }

    pub async fn get(&self, key: &StreamKey) -> Option<StreamHandle> {
        self.streams.read().await.get(key).cloned()
    }

    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn stream_stats(&self, key: &StreamKey) -> Option<StreamStats> {
        let stream = self.get(key).await?;
        let stream = stream.read().await;
        Some(StreamStats {
            subscriber_count: stream.subscriber_count(),
            has_publisher: stream.has_publisher(),
            mode: stream.mode(),
            config_message_count: stream.config_messages().len(),
        })
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_stream_key_drops_query() {
        let key = StreamKey::new("live", "cam1?token=abc");
        assert_eq!(key.name, "cam1");
        assert_eq!(key.to_string(), "live/cam1");
    }

    #[test]
    fn test_publish_mode_parse() {
        assert_eq!(PublishMode::parse("record"), PublishMode::Record);
        assert_eq!(PublishMode::parse("APPEND"), PublishMode::Append);
        assert_eq!(PublishMode::parse("live"), PublishMode::Live);
        assert_eq!(PublishMode::parse("whatever"), PublishMode::Live);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_stream() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "cam1");

        let a = registry.get_or_create(&key).await;
        let b = registry.get_or_create(&key).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stream_count().await, 1);
        assert!(registry.get(&StreamKey::new("live", "other")).await.is_none());
    }

    #[tokio::test]
    async fn test_single_publisher() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "cam1");
        let stream = registry.get_or_create(&key).await;

        stream.write().await.set_publisher(1, PublishMode::Live).unwrap();
        assert!(stream.read().await.is_live());

        let err = stream.write().await.set_publisher(2, PublishMode::Record).unwrap_err();
        assert_eq!(err, RegistryError::PublisherConflict(key.clone()));
        // incumbent untouched
        assert_eq!(stream.read().await.publisher(), Some(1));
        assert_eq!(stream.read().await.mode(), PublishMode::Live);

        // only the holder can clear
        assert!(!stream.write().await.clear_publisher(2));
        assert!(stream.write().await.clear_publisher(1));
        stream.write().await.set_publisher(2, PublishMode::Record).unwrap();
        assert!(!stream.read().await.is_live());
    }

    #[tokio::test]
    async fn test_concurrent_publish_has_one_winner() {
        let registry = Arc::new(StreamRegistry::new());
        let key = StreamKey::new("live", "race");

        let mut handles = Vec::new();
        for id in 0..16u64 {
            let registry = Arc::clone(&registry);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let stream = registry.get_or_create(&key).await;
                let ok = stream.write().await.set_publisher(id, PublishMode::Live).is_ok();
                ok
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_config_cache_replaces_per_kind() {
        let registry = StreamRegistry::new();
        let stream = registry.get_or_create(&StreamKey::new("live", "cam1")).await;
        let mut s = stream.write().await;

        s.add_config_message(RtmpMessage::video(0, Bytes::from_static(&[0x17, 0x00, 1])));
        s.add_config_message(RtmpMessage::audio(0, Bytes::from_static(&[0xAF, 0x00, 1])));
        s.add_config_message(RtmpMessage::video(40, Bytes::from_static(&[0x17, 0x00, 2])));
        assert_eq!(s.config_messages().len(), 2);
        assert_eq!(s.config_messages()[0].timestamp(), 40);

        s.set_publisher(9, PublishMode::Live).unwrap();
        assert!(s.config_messages().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_snapshot() {
        let registry = StreamRegistry::new();
        let key = StreamKey::new("live", "cam1");
        let stream = registry.get_or_create(&key).await;
        let (tx, _rx) = mpsc::channel(4);

        stream.write().await.add_subscriber(7, tx.clone());
        stream.write().await.add_subscriber(8, tx);
        let snapshot = stream.read().await.subscribers_snapshot();
        assert_eq!(snapshot.len(), 2);

        assert!(stream.write().await.remove_subscriber(7));
        assert!(!stream.write().await.remove_subscriber(7));
        let stats = registry.stream_stats(&key).await.unwrap();
        assert_eq!(stats.subscriber_count, 1);
        assert!(!stats.has_publisher);
    }
}
