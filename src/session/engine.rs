//! Per-connection command and media state machine
//!
//! The engine is transport-agnostic: the connection feeds it decoded
//! messages, idle ticks and live deliveries, and drains the outbox after
//! every call. All mutable state sits in [`SessionContext`]; the registry
//! and id allocator are the only things shared with other sessions.
//!
//! ```text
//!  inbound msg ──► flow control ──► dispatch ──► outbox ──► chunk encoder
//!                                      │
//!                    ┌─────────────────┼──────────────────┐
//!                    ▼                 ▼                  ▼
//!               StreamRegistry   PlaybackScheduler   RecordingSink
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::context::{SessionContext, SessionState};
use super::request::Request;
use super::{SessionConfig, SharedServices};
use crate::amf::AmfObject;
use crate::error::Result;
use crate::playback::{PlaybackOptions, PlaybackScheduler};
use crate::protocol::constants::BANDWIDTH_LIMIT_DYNAMIC;
use crate::protocol::message::{
    Command, ControlEvent, MessageBody, MessageHeader, Metadata, RtmpMessage,
};
use crate::registry::{broadcast, PublishMode, SessionId, StreamKey};

pub struct SessionEngine {
    ctx: SessionContext,
    config: SessionConfig,
    shared: SharedServices,
    /// Handed to the registry as this session's live subscriber queue
    inbox: mpsc::Sender<RtmpMessage>,
    outbox: Vec<RtmpMessage>,
    close_requested: bool,
}

impl SessionEngine {
    /// Create an engine and the receiving end of its live delivery queue
    pub fn new(
        session_id: SessionId,
        config: SessionConfig,
        shared: SharedServices,
    ) -> (Self, mpsc::Receiver<RtmpMessage>) {
        let (inbox, inbox_rx) = mpsc::channel(config.subscriber_capacity.max(1));
        let ctx = SessionContext::new(session_id, config.read_window, config.write_window);
        let engine = Self {
            ctx,
            config,
            shared,
            inbox,
            outbox: Vec::new(),
            close_requested: false,
        };
        (engine, inbox_rx)
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.ctx
    }

    /// Messages produced since the last call, in send order
    pub fn take_outbox(&mut self) -> Vec<RtmpMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// The session asked for its transport to be closed after the outbox
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn record_written(&mut self, bytes: u64) {
        self.ctx.flow.on_written(bytes);
    }

    /// Process one inbound message
    pub async fn handle_message(&mut self, message: RtmpMessage, now: Instant) -> Result<()> {
        if self.ctx.is_closed() {
            return Ok(());
        }
        if let Some(ack) = self.ctx.flow.on_received(message.header.size) {
            tracing::debug!(session_id = self.ctx.session_id, bytes_read = ack, "Sending bytes read ack");
            self.outbox.push(RtmpMessage::bytes_read(ack));
        }

        let RtmpMessage { header, body } = message;
        match body {
            // applied by the chunk decoder
            MessageBody::ChunkSize(_) | MessageBody::Abort(_) => {}
            MessageBody::Control(event) => self.on_control(event),
            MessageBody::Command(cmd) => {
                let request = Request::parse(&cmd);
                if !self.on_request(request, now).await {
                    return Ok(());
                }
            }
            MessageBody::Metadata(meta) => self.on_metadata(header, meta).await,
            body @ (MessageBody::Audio(_) | MessageBody::Video(_) | MessageBody::Aggregate(_)) => {
                self.on_media(RtmpMessage { header, body }).await;
            }
            MessageBody::BytesRead(value) => {
                self.ctx.flow.peer_acked = value;
                tracing::debug!(
                    session_id = self.ctx.session_id,
                    acked = value,
                    written = self.ctx.flow.bytes_written(),
                    "Bytes read ack from peer"
                );
            }
            MessageBody::WindowAckSize(size) => {
                if size != self.ctx.flow.read_window {
                    self.outbox.push(RtmpMessage::set_peer_bandwidth(
                        self.ctx.flow.read_window,
                        BANDWIDTH_LIMIT_DYNAMIC,
                    ));
                }
            }
            MessageBody::SetPeerBandwidth { size, .. } => {
                if size != self.ctx.flow.write_window {
                    self.outbox.push(RtmpMessage::window_ack_size(self.ctx.flow.write_window));
                }
            }
            MessageBody::Unknown(_) => {
                tracing::warn!(
                    session_id = self.ctx.session_id,
                    message_type = header.message_type,
                    "Ignoring message"
                );
            }
        }
        self.advance_playback(now);
        Ok(())
    }

    /// Idle tick: let a running playback emit what has come due
    pub fn tick(&mut self, now: Instant) {
        self.advance_playback(now);
    }

    /// A message fanned out by the live stream this session subscribes to
    pub fn deliver_live(&mut self, message: RtmpMessage) {
        if self.ctx.subscribed.is_none() {
            return;
        }
        let message = self.addressed(message);
        self.outbox.push(message);
    }

    /// Release everything the session holds; safe to call more than once
    pub async fn close(&mut self) {
        if self.ctx.is_closed() {
            return;
        }
        self.stop_playback();
        self.unpublish_if_live().await;
        self.leave_live().await;
        for id in std::mem::take(&mut self.ctx.allocated_ids) {
            self.shared.stream_ids.restore(id).await;
        }
        self.ctx.state = SessionState::Closed;
        self.outbox.clear();
        tracing::info!(
            session_id = self.ctx.session_id,
            bytes_read = self.ctx.flow.bytes_read(),
            bytes_written = self.ctx.flow.bytes_written(),
            "Session closed"
        );
    }

    /// Returns whether the playback should still be serviced afterwards
    async fn on_request(&mut self, request: Request, now: Instant) -> bool {
        match request {
            Request::Connect {
                transaction_id,
                app,
                object,
            } => self.on_connect(transaction_id, app, object).await,
            Request::CreateStream { transaction_id } => self.on_create_stream(transaction_id).await,
            Request::Play {
                name,
                start,
                length,
                reset,
            } => self.on_play(name, start, length, reset, now).await,
            Request::DeleteStream { stream_id } => {
                // ids are returned to the allocator when the connection closes
                tracing::info!(session_id = self.ctx.session_id, stream_id = stream_id, "deleteStream");
            }
            Request::CloseStream => {
                tracing::info!(session_id = self.ctx.session_id, stream_id = self.ctx.stream_id, "closeStream");
                self.unpublish_if_live().await;
            }
            Request::Pause { paused, position } => self.on_pause(paused, position, now),
            Request::Seek { position } => self.on_seek(position, now),
            Request::Publish { name, mode } => self.on_publish(name, mode).await,
            Request::Unpublish => self.unpublish_if_live().await,
            Request::Malformed { command, reason } => {
                tracing::warn!(session_id = self.ctx.session_id, command = %command, reason = reason, "Malformed command");
            }
            Request::Other { command } => {
                tracing::warn!(session_id = self.ctx.session_id, command = %command, "Ignoring command");
                return true;
            }
        }
        false
    }

    async fn on_connect(&mut self, transaction_id: f64, app: String, object: AmfObject) {
        match self.shared.resolver.resolve(&app, &object).await {
            Ok(application) => {
                self.ctx.application = Some(application);
                self.ctx.app_name = app;
                self.ctx.state = SessionState::Connected;
                tracing::info!(
                    session_id = self.ctx.session_id,
                    app = %self.ctx.app_name,
                    client_id = %self.ctx.client_id,
                    "Connected"
                );
                self.outbox.extend([
                    RtmpMessage::window_ack_size(self.ctx.flow.write_window),
                    RtmpMessage::set_peer_bandwidth(self.ctx.flow.read_window, BANDWIDTH_LIMIT_DYNAMIC),
                    RtmpMessage::control(ControlEvent::StreamBegin(self.ctx.stream_id)),
                    RtmpMessage::command(Command::connect_success(transaction_id)),
                    RtmpMessage::command(Command::on_bw_done()),
                ]);
            }
            Err(reason) => {
                tracing::warn!(session_id = self.ctx.session_id, app = %app, reason = %reason, "Connect rejected");
                self.outbox
                    .push(RtmpMessage::command(Command::connect_rejected(transaction_id, &reason)));
                self.close_requested = true;
            }
        }
    }

    async fn on_create_stream(&mut self, transaction_id: f64) {
        match self.shared.stream_ids.take().await {
            Some(id) => {
                self.ctx.stream_id = id;
                self.ctx.allocated_ids.push(id);
                if self.ctx.state == SessionState::Connected {
                    self.ctx.state = SessionState::StreamAllocated;
                }
                tracing::debug!(session_id = self.ctx.session_id, stream_id = id, "Stream created");
                self.outbox
                    .push(RtmpMessage::command(Command::create_stream_success(transaction_id, id)));
            }
            None => {
                tracing::warn!(session_id = self.ctx.session_id, "Failed to allocate stream id");
                self.outbox.push(RtmpMessage::command(Command::call_failed(
                    transaction_id,
                    "No stream id available",
                )));
            }
        }
    }

    async fn on_play(&mut self, name: String, start: i32, length: i32, reset: bool, now: Instant) {
        let application = match &self.ctx.application {
            Some(app) => Arc::clone(app),
            None => {
                tracing::warn!(session_id = self.ctx.session_id, "Play before connect");
                self.write_to_stream(RtmpMessage::command(Command::play_failed(&name, &self.ctx.client_id)));
                return;
            }
        };
        tracing::debug!(
            session_id = self.ctx.session_id,
            name = %name,
            start = start,
            length = length,
            reset = reset,
            "Play requested"
        );
        self.leave_live().await;

        let key = StreamKey::new(self.ctx.app_name.clone(), name.clone());
        let stream = self.shared.registry.get_or_create(&key).await;
        let variation = reset.then(|| Command::play_reset(&name, &self.ctx.client_id));

        let live_config = {
            let mut s = stream.write().await;
            if s.is_live() {
                s.add_subscriber(self.ctx.session_id, self.inbox.clone());
                Some(s.config_messages().to_vec())
            } else {
                None
            }
        };

        if let Some(config) = live_config {
            self.stop_playback();
            self.ctx.play_name = Some(name);
            for msg in self.start_messages(variation) {
                self.write_to_stream(msg);
            }
            let mut video_config = false;
            for msg in config {
                video_config |= msg.header.is_video();
                self.write_to_stream(msg);
            }
            if !video_config {
                self.write_to_stream(RtmpMessage::empty_video());
            }
            self.ctx.subscribed = Some(stream);
            self.ctx.state = SessionState::Playing;
            tracing::info!(session_id = self.ctx.session_id, stream = %key, "Playing live stream");
            return;
        }

        let same_content = self.ctx.playback.is_some() && self.ctx.play_name.as_deref() == Some(name.as_str());
        if !same_content {
            self.stop_playback();
            self.ctx.play_name = Some(name.clone());
            let reader = match application.open_reader(&name).await {
                Ok(Some(reader)) => reader,
                Ok(None) => {
                    tracing::info!(session_id = self.ctx.session_id, stream = %key, "No content to play");
                    self.write_to_stream(RtmpMessage::command(Command::play_failed(&name, &self.ctx.client_id)));
                    return;
                }
                Err(e) => {
                    tracing::warn!(session_id = self.ctx.session_id, stream = %key, error = %e, "Failed to open reader");
                    self.write_to_stream(RtmpMessage::command(Command::play_failed(&name, &self.ctx.client_id)));
                    return;
                }
            };
            let options = PlaybackOptions {
                stream_id: self.ctx.stream_id,
                play_name: name.clone(),
                client_id: self.ctx.client_id.clone(),
                buffer_duration: self.ctx.buffer_duration,
                aggregate: self.config.aggregate,
            };
            self.ctx.playback = Some(PlaybackScheduler::new(reader, options));
        }

        let preamble = self.start_messages(variation);
        if let Some(scheduler) = self.ctx.playback.as_mut() {
            let out = scheduler.start(start, length, preamble, now);
            self.outbox.extend(out);
        }
        self.ctx.state = SessionState::Playing;
        tracing::info!(session_id = self.ctx.session_id, stream = %key, "Playing recorded stream");
    }

    fn on_pause(&mut self, paused: bool, position: u32, now: Instant) {
        if self.ctx.playback.is_none() {
            tracing::debug!(session_id = self.ctx.session_id, "Pause without recorded playback");
            return;
        }
        let name = self.ctx.play_name.clone().unwrap_or_default();
        tracing::debug!(session_id = self.ctx.session_id, paused = paused, position = position, "Pause requested");

        if paused {
            if let Some(scheduler) = self.ctx.playback.as_mut() {
                scheduler.pause(now);
            }
            let notice = Command::pause_notify(&name, &self.ctx.client_id);
            self.write_to_stream(RtmpMessage::command(notice));
            return;
        }

        let preamble = self.start_messages(Some(Command::unpause_notify(&name, &self.ctx.client_id)));
        let out = match self.ctx.playback.as_mut() {
            Some(scheduler) if scheduler.is_paused() => scheduler.resume(clamp_position(position), preamble, now),
            Some(scheduler) => scheduler.restart(clamp_position(position), preamble, now),
            None => Vec::new(),
        };
        self.outbox.extend(out);
    }

    fn on_seek(&mut self, position: u32, now: Instant) {
        match &self.ctx.playback {
            None => {
                tracing::debug!(session_id = self.ctx.session_id, "Seek without recorded playback");
                return;
            }
            Some(scheduler) if scheduler.is_paused() => {
                tracing::debug!(session_id = self.ctx.session_id, position = position, "Ignoring seek while paused");
                return;
            }
            Some(_) => {}
        }
        let name = self.ctx.play_name.clone().unwrap_or_default();
        let notice = Command::seek_notify(self.ctx.stream_id, position, &name, &self.ctx.client_id);
        let preamble = self.start_messages(Some(notice));
        if let Some(scheduler) = self.ctx.playback.as_mut() {
            let out = scheduler.restart(clamp_position(position), preamble, now);
            self.outbox.extend(out);
        }
    }

    async fn on_publish(&mut self, name: String, mode: PublishMode) {
        let application = match &self.ctx.application {
            Some(app) => Arc::clone(app),
            None => {
                tracing::warn!(session_id = self.ctx.session_id, "Publish before connect");
                return;
            }
        };
        if self.ctx.is_publishing() {
            tracing::warn!(session_id = self.ctx.session_id, name = %name, "Already publishing");
            return;
        }

        let key = StreamKey::new(self.ctx.app_name.clone(), name.clone());
        let stream = self.shared.registry.get_or_create(&key).await;
        let claimed = stream.write().await.set_publisher(self.ctx.session_id, mode);
        if let Err(e) = claimed {
            tracing::info!(session_id = self.ctx.session_id, error = %e, "Disconnecting publisher, stream already in use");
            self.write_to_stream(RtmpMessage::command(Command::publish_bad_name(&name)));
            self.close_requested = true;
            return;
        }

        self.ctx.publishing = Some(Arc::clone(&stream));
        self.ctx.state = SessionState::Publishing;
        self.write_to_stream(RtmpMessage::command(Command::publish_start(&name, &self.ctx.client_id)));
        self.outbox.push(RtmpMessage::chunk_size(self.config.chunk_size));
        self.outbox
            .push(RtmpMessage::control(ControlEvent::StreamBegin(self.ctx.stream_id)));
        tracing::info!(session_id = self.ctx.session_id, stream = %key, mode = mode.as_str(), "Publishing");

        match mode {
            PublishMode::Live => {
                let notices = [
                    RtmpMessage::command(Command::publish_notify(&name)),
                    RtmpMessage::empty_video(),
                    RtmpMessage::metadata(Metadata::sample_access()),
                    RtmpMessage::empty_audio(),
                    RtmpMessage::metadata(Metadata::data_start()),
                ];
                for msg in notices {
                    let msg = self.addressed(msg);
                    broadcast(&stream, &msg, None).await;
                }
            }
            PublishMode::Record => match application.open_writer(&name).await {
                Ok(sink) => self.ctx.recorder = Some(sink),
                Err(e) => {
                    tracing::warn!(session_id = self.ctx.session_id, stream = %key, error = %e, "Failed to open recording");
                }
            },
            PublishMode::Append => {
                tracing::warn!(session_id = self.ctx.session_id, stream = %key, "Append not supported, unpublishing");
                self.unpublish_if_live().await;
            }
        }
    }

    async fn unpublish_if_live(&mut self) {
        if let Some(stream) = self.ctx.publishing.take() {
            let (cleared, name) = {
                let mut s = stream.write().await;
                (s.clear_publisher(self.ctx.session_id), s.key().name.clone())
            };
            if cleared {
                self.write_to_stream(RtmpMessage::command(Command::unpublish_success(
                    &name,
                    &self.ctx.client_id,
                )));
                let notice = self.addressed(RtmpMessage::command(Command::unpublish_notify(&name)));
                broadcast(&stream, &notice, None).await;
                tracing::debug!(session_id = self.ctx.session_id, name = %name, "Stream unpublished");
            }
            if self.ctx.state == SessionState::Publishing {
                self.ctx.state = SessionState::StreamAllocated;
            }
        }
        if let Some(mut recorder) = self.ctx.recorder.take() {
            if let Err(e) = recorder.close().await {
                tracing::warn!(session_id = self.ctx.session_id, error = %e, "Failed to close recording");
            }
        }
    }

    async fn on_metadata(&mut self, header: MessageHeader, meta: Metadata) {
        let mut meta = meta.unwrap_set_data_frame();
        let on_meta_data = meta.is_on_meta_data();
        if on_meta_data {
            // live content has no fixed duration
            meta.set_duration(0.0);
        }
        let mut message = RtmpMessage {
            header,
            body: MessageBody::Metadata(meta),
        };
        message.header.size = message.payload().len() as u32;

        let stream = match &self.ctx.publishing {
            Some(stream) => Arc::clone(stream),
            None => {
                tracing::debug!(session_id = self.ctx.session_id, "Metadata outside of a publish");
                return;
            }
        };
        if on_meta_data {
            tracing::info!(session_id = self.ctx.session_id, "Caching onMetaData");
            stream.write().await.add_config_message(message.clone());
        }
        broadcast(&stream, &message, self.ctx.recorder.as_deref_mut()).await;
    }

    async fn on_media(&mut self, message: RtmpMessage) {
        let stream = match &self.ctx.publishing {
            Some(stream) => Arc::clone(stream),
            None => {
                tracing::trace!(session_id = self.ctx.session_id, "Media outside of a publish");
                return;
            }
        };
        if message.is_config() {
            tracing::info!(
                session_id = self.ctx.session_id,
                message_type = message.header.message_type,
                "Caching config message"
            );
            stream.write().await.add_config_message(message.clone());
        }
        broadcast(&stream, &message, self.ctx.recorder.as_deref_mut()).await;
    }

    fn on_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::SetBuffer { buffer_ms, .. } => {
                tracing::debug!(session_id = self.ctx.session_id, buffer_ms = buffer_ms, "Set buffer");
                self.ctx.buffer_duration = buffer_ms;
                if let Some(scheduler) = self.ctx.playback.as_mut() {
                    scheduler.set_buffer_duration(buffer_ms);
                }
            }
            ControlEvent::PingRequest(timestamp) => {
                self.outbox
                    .push(RtmpMessage::control(ControlEvent::PingResponse(timestamp)));
            }
            other => {
                tracing::debug!(session_id = self.ctx.session_id, event = ?other, "Ignored control");
            }
        }
    }

    fn advance_playback(&mut self, now: Instant) {
        if let Some(scheduler) = self.ctx.playback.as_mut() {
            if scheduler.is_running() {
                let out = scheduler.advance(now);
                self.outbox.extend(out);
            }
        }
    }

    fn stop_playback(&mut self) {
        if let Some(mut scheduler) = self.ctx.playback.take() {
            scheduler.close();
        }
    }

    async fn leave_live(&mut self) {
        if let Some(stream) = self.ctx.subscribed.take() {
            stream.write().await.remove_subscriber(self.ctx.session_id);
        }
    }

    /// Preamble sent before live or recorded media
    fn start_messages(&self, variation: Option<Command>) -> Vec<RtmpMessage> {
        let sid = self.ctx.stream_id;
        let name = self.ctx.play_name.as_deref().unwrap_or_default();
        let mut list = vec![
            RtmpMessage::chunk_size(self.config.chunk_size),
            RtmpMessage::control(ControlEvent::StreamIsRecorded(sid)),
            RtmpMessage::control(ControlEvent::StreamBegin(sid)),
        ];
        list.extend(variation.map(RtmpMessage::command));
        list.extend([
            RtmpMessage::command(Command::play_start(name, &self.ctx.client_id)),
            RtmpMessage::metadata(Metadata::sample_access()),
            RtmpMessage::empty_audio(),
            RtmpMessage::metadata(Metadata::data_start()),
        ]);
        list
    }

    /// Stream-scoped messages carry this session's stream id
    fn addressed(&self, mut message: RtmpMessage) -> RtmpMessage {
        if message.header.is_stream_scoped() {
            message.header.stream_id = self.ctx.stream_id;
        }
        message
    }

    fn write_to_stream(&mut self, message: RtmpMessage) {
        let message = self.addressed(message);
        self.outbox.push(message);
    }
}

fn clamp_position(position: u32) -> i32 {
    i32::try_from(position).unwrap_or(i32::MAX)
}
