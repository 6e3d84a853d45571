//! Per-connection driver
//!
//! Owns the transport and the chunk codec, and feeds a [`SessionEngine`]:
//! 1. Handshake (with timeout), installing ciphers for encrypted sessions
//! 2. Main loop over socket reads, live deliveries and the playback tick
//! 3. Outbox flush after every step
//! 4. Engine close on the way out, whatever ended the loop

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

use crate::error::{Error, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder};
use crate::protocol::cipher::CipherPair;
use crate::protocol::handshake::{Handshake, HandshakeRole};
use crate::protocol::message::RtmpMessage;
use crate::registry::SessionId;
use crate::server::config::ServerConfig;
use crate::session::{SessionEngine, SharedServices};

/// One accepted connection
pub struct Connection<S> {
    session_id: SessionId,
    peer_addr: Option<SocketAddr>,

    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,

    /// Bytes received but not yet decoded
    read_buf: BytesMut,
    /// Chunked outbound bytes for one flush
    write_buf: BytesMut,

    decoder: ChunkDecoder,
    encoder: ChunkEncoder,

    /// Present once an encrypted handshake completed
    ciphers: Option<CipherPair>,

    config: ServerConfig,
    shared: SharedServices,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        session_id: SessionId,
        stream: S,
        peer_addr: Option<SocketAddr>,
        config: ServerConfig,
        shared: SharedServices,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            session_id,
            peer_addr,
            reader: read_half,
            writer: BufWriter::with_capacity(config.write_buffer_size, write_half),
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            ciphers: None,
            config,
            shared,
        }
    }

    /// Serve the connection until either side ends it
    pub async fn run(mut self) -> Result<()> {
        let (mut engine, mut inbox) =
            SessionEngine::new(self.session_id, self.config.session_config(), self.shared.clone());
        engine.context_mut().peer_addr = self.peer_addr;

        let result = self.serve(&mut engine, &mut inbox).await;
        engine.close().await;
        if let Err(e) = self.writer.shutdown().await {
            tracing::trace!(session_id = self.session_id, error = %e, "Shutdown after close");
        }
        result
    }

    async fn serve(
        &mut self,
        engine: &mut SessionEngine,
        inbox: &mut mpsc::Receiver<RtmpMessage>,
    ) -> Result<()> {
        self.do_handshake().await?;

        // chunks that arrived together with C2
        self.process_buffered(engine).await?;
        self.flush(engine).await?;

        let mut tick = interval(self.config.playback_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // traffic in either direction; a viewer that only receives is not idle
        let mut last_activity = Instant::now();

        loop {
            if engine.close_requested() {
                tracing::debug!(session_id = self.session_id, "Closing on session request");
                return Ok(());
            }

            tokio::select! {
                read = self.reader.read_buf(&mut self.read_buf) => {
                    let n = read?;
                    if n == 0 {
                        tracing::debug!(session_id = self.session_id, "Peer closed connection");
                        return Ok(());
                    }
                    if let Some(ciphers) = self.ciphers.as_mut() {
                        let start = self.read_buf.len() - n;
                        ciphers.inbound.apply(&mut self.read_buf[start..]);
                    }
                    last_activity = Instant::now();
                    self.process_buffered(engine).await?;
                }
                Some(message) = inbox.recv() => {
                    engine.deliver_live(message);
                }
                _ = tick.tick() => {
                    if last_activity.elapsed() >= self.config.idle_timeout {
                        tracing::info!(session_id = self.session_id, "Idle timeout");
                        return Err(Error::Timeout);
                    }
                    engine.tick(Instant::now().into_std());
                }
            }

            if self.flush(engine).await? > 0 {
                last_activity = Instant::now();
            }
        }
    }

    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = Handshake::new(HandshakeRole::Server, self.config.handshake_config());
        handshake.generate_initial()?;

        let handshake_timeout = self.config.handshake_timeout;
        timeout(handshake_timeout, async {
            while !handshake.is_done() {
                if let Some(response) = handshake.process(&mut self.read_buf)? {
                    self.writer.write_all(&response).await?;
                    self.writer.flush().await?;
                    continue;
                }
                if handshake.is_done() {
                    break;
                }
                let n = self.reader.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
            }
            Ok::<_, Error>(())
        })
        .await
        .map_err(|_| Error::Timeout)??;

        if let Some(mut ciphers) = handshake.take_ciphers() {
            ciphers.inbound.apply(&mut self.read_buf[..]);
            self.ciphers = Some(ciphers);
        }
        tracing::debug!(
            session_id = self.session_id,
            encrypted = handshake.is_encrypted(),
            digest = handshake.peer_digest_verified(),
            "Handshake complete"
        );
        Ok(())
    }

    /// Decode and dispatch every complete message in the read buffer
    async fn process_buffered(&mut self, engine: &mut SessionEngine) -> Result<()> {
        while let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
            let message = RtmpMessage::from_raw(&raw)?;
            tracing::trace!(
                session_id = self.session_id,
                message_type = message.header.message_type,
                timestamp = message.header.timestamp,
                size = message.header.size,
                "Received"
            );
            engine.handle_message(message, Instant::now().into_std()).await?;
            if engine.close_requested() {
                break;
            }
        }
        Ok(())
    }

    /// Chunk and write whatever the engine produced, returning the bytes written
    async fn flush(&mut self, engine: &mut SessionEngine) -> Result<usize> {
        let outbox = engine.take_outbox();
        if outbox.is_empty() {
            return Ok(0);
        }
        self.write_buf.clear();
        for message in &outbox {
            self.encoder.encode(&message.to_raw(), &mut self.write_buf);
        }
        if let Some(ciphers) = self.ciphers.as_mut() {
            ciphers.outbound.apply(&mut self.write_buf[..]);
        }
        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        engine.record_written(self.write_buf.len() as u64);
        tracing::trace!(
            session_id = self.session_id,
            messages = outbox.len(),
            bytes = self.write_buf.len(),
            "Flushed"
        );
        Ok(self.write_buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::DuplexStream;

    use crate::client::{ClientOptions, RtmpConnector};
    use crate::error::HandshakeError;
    use crate::protocol::constants::*;
    use crate::protocol::message::{ControlEvent, MessageBody};
    use crate::registry::{PublishMode, StreamIdAllocator, StreamKey, StreamRegistry};
    use crate::storage::MemoryStore;

    struct TestServer {
        config: ServerConfig,
        shared: SharedServices,
        store: MemoryStore,
        next_id: SessionId,
    }

    impl TestServer {
        fn new() -> Self {
            let store = MemoryStore::new("vod");
            let config = ServerConfig::default().disable_aggregation();
            let shared = SharedServices::new(
                Arc::new(StreamRegistry::new()),
                Arc::new(StreamIdAllocator::new(config.stream_id_capacity)),
                Arc::new(store.clone()),
            );
            Self {
                config,
                shared,
                store,
                next_id: 1,
            }
        }

        /// Spawn a server connection and return a handshaken client
        async fn client(&mut self, app: &str) -> RtmpConnector<DuplexStream> {
            let (client_io, server_io) = tokio::io::duplex(256 * 1024);
            let connection = Connection::new(
                self.next_id,
                server_io,
                None,
                self.config.clone(),
                self.shared.clone(),
            );
            self.next_id += 1;
            tokio::spawn(connection.run());

            let options = ClientOptions::new("localhost", app);
            RtmpConnector::handshake(client_io, options).await.unwrap()
        }
    }

    fn code(message: &RtmpMessage) -> Option<&str> {
        message.as_command().and_then(|c| c.status_code())
    }

    async fn read_until_code(client: &mut RtmpConnector<DuplexStream>, wanted: &str) -> Vec<RtmpMessage> {
        let mut seen = Vec::new();
        loop {
            let message = client.read_message().await.unwrap();
            let done = code(&message) == Some(wanted);
            seen.push(message);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn test_recorded_playback_end_to_end() {
        let mut server = TestServer::new();
        let frames: Vec<RtmpMessage> = (0..6u32)
            .map(|i| RtmpMessage::video(i * 40, Bytes::from(vec![0x27, 0x01, i as u8])))
            .collect();
        server.store.add_clip("clip", frames).await;

        let mut client = server.client("vod").await;
        client.connect().await.unwrap();
        let stream_id = client.create_stream().await.unwrap();
        assert_eq!(stream_id, 1);

        let started = std::time::Instant::now();
        client.play("clip", -2, -1).await.unwrap();

        let mut timestamps = Vec::new();
        let mut codes = Vec::new();
        loop {
            let message = client.read_message().await.unwrap();
            if let Some(c) = code(&message) {
                codes.push(c.to_string());
            }
            match &message.body {
                MessageBody::Video(data) if !data.is_empty() => timestamps.push(message.timestamp()),
                MessageBody::Control(ControlEvent::StreamEof(id)) => {
                    assert_eq!(*id, stream_id);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(timestamps, vec![0, 40, 80, 120, 160, 200]);
        assert_eq!(codes, vec![NS_PLAY_RESET, NS_PLAY_START, NS_PLAY_STOP]);
        assert!(started.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_receive_only_viewer_outlives_idle_timeout() {
        let mut server = TestServer::new();
        server.config = server.config.clone().idle_timeout(Duration::from_millis(300));
        let frames: Vec<RtmpMessage> = (0..26u32)
            .map(|i| RtmpMessage::video(i * 40, Bytes::from(vec![0x27, 0x01, i as u8])))
            .collect();
        server.store.add_clip("long", frames).await;

        let mut client = server.client("vod").await;
        client.connect().await.unwrap();
        client.create_stream().await.unwrap();
        client.play("long", -2, -1).await.unwrap();

        // the client sends nothing after play; outbound media keeps the session alive
        let mut last = 0;
        loop {
            let message = client.read_message().await.unwrap();
            match &message.body {
                MessageBody::Video(data) if !data.is_empty() => last = message.timestamp(),
                MessageBody::Control(ControlEvent::StreamEof(_)) => break,
                _ => {}
            }
        }
        assert_eq!(last, 1000);
    }

    #[tokio::test]
    async fn test_unknown_app_rejected() {
        let mut server = TestServer::new();
        let mut client = server.client("nope").await;
        assert!(matches!(client.connect().await, Err(Error::Rejected(_))));
        // the server hangs up after the rejection
        loop {
            if client.read_message().await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_second_publisher_closed_first_keeps_serving() {
        let mut server = TestServer::new();

        let mut first = server.client("vod").await;
        first.connect().await.unwrap();
        first.create_stream().await.unwrap();
        first.publish("cam1", PublishMode::Live).await.unwrap();

        let mut viewer = server.client("vod").await;
        viewer.connect().await.unwrap();
        viewer.create_stream().await.unwrap();
        viewer.play("cam1", -2, -1).await.unwrap();
        read_until_code(&mut viewer, NS_PLAY_START).await;

        let mut second = server.client("vod").await;
        second.connect().await.unwrap();
        second.create_stream().await.unwrap();
        let rejected = second.publish("cam1", PublishMode::Live).await;
        assert!(matches!(rejected, Err(Error::Rejected(ref c)) if c == NS_PUBLISH_BAD_NAME));
        loop {
            if second.read_message().await.is_err() {
                break;
            }
        }

        let key = StreamKey::new("vod", "cam1");
        let stats = server.shared.registry.stream_stats(&key).await.unwrap();
        assert!(stats.has_publisher);
        assert_eq!(stats.subscriber_count, 1);

        let frame = RtmpMessage::video(500, Bytes::from_static(&[0x27, 0x01, 0xAA]));
        first.send_media(frame).await.unwrap();
        loop {
            let message = viewer.read_message().await.unwrap();
            if message.body == MessageBody::Video(Bytes::from_static(&[0x27, 0x01, 0xAA])) {
                assert_eq!(message.header.stream_id, viewer.stream_id());
                assert_eq!(message.timestamp(), 500);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let mut server = TestServer::new();
        server.config = server.config.clone().handshake_timeout(Duration::from_millis(50));
        let (_client_io, server_io) = tokio::io::duplex(1024);
        let connection = Connection::new(9, server_io, None, server.config.clone(), server.shared.clone());
        assert!(matches!(connection.run().await, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_bad_version_closes_without_reply() {
        let server = TestServer::new();
        let mut hello = vec![0u8; 1 + HANDSHAKE_SIZE];
        hello[0] = 2;
        // any write from the server would fail the mock
        let io = tokio_test::io::Builder::new().read(&hello).build();
        let connection = Connection::new(10, io, None, server.config.clone(), server.shared.clone());
        assert!(matches!(
            connection.run().await,
            Err(Error::Handshake(HandshakeError::InvalidVersion(2)))
        ));
        assert_eq!(server.shared.stream_ids.available().await, 1024);
    }
}
