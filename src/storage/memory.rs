//! In-memory application: named clips for playback, captured recordings

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Application, ApplicationResolver, RecordedReader, RecordingSink};
use crate::amf::{AmfObject, AmfValue};
use crate::error::Result;
use crate::protocol::message::{MessageBody, Metadata, RtmpMessage};

/// A recorded message sequence split into its start messages and media
#[derive(Debug, Clone)]
pub struct Clip {
    start: Vec<RtmpMessage>,
    media: Vec<RtmpMessage>,
    duration: u32,
}

impl Clip {
    /// Build a clip from messages in timestamp order
    ///
    /// The first `onMetaData` and the first audio/video config messages are
    /// lifted out of the sequence; the metadata gets the clip duration.
    pub fn new(messages: Vec<RtmpMessage>) -> Self {
        let duration = messages.iter().map(|m| m.timestamp()).max().unwrap_or(0);
        let mut metadata = None;
        let mut audio_config = None;
        let mut video_config = None;
        let mut media = Vec::with_capacity(messages.len());

        for msg in messages {
            let is_meta = msg.as_metadata().map(|m| m.is_on_meta_data()).unwrap_or(false);
            let slot = if is_meta {
                &mut metadata
            } else if msg.is_config() && msg.header.is_audio() {
                &mut audio_config
            } else if msg.is_config() {
                &mut video_config
            } else {
                media.push(msg);
                continue;
            };
            if slot.is_none() {
                *slot = Some(msg);
            } else {
                media.push(msg);
            }
        }

        let seconds = duration as f64 / 1000.0;
        let mut metadata = metadata.unwrap_or_else(|| {
            RtmpMessage::metadata(Metadata::on_meta_data(AmfObject::new()))
        });
        metadata.update_body(|body| {
            if let MessageBody::Metadata(meta) = body {
                if meta.values.is_empty() {
                    meta.values.push(AmfValue::EcmaArray(AmfObject::new()));
                }
                meta.set_duration(seconds);
            }
        });

        let start = std::iter::once(metadata)
            .chain(audio_config)
            .chain(video_config)
            .collect();

        Self { start, media, duration }
    }

    /// Timestamp of the last message
    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.media.len()
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }
}

/// Cursor over a shared clip
#[derive(Debug, Clone)]
pub struct MemoryReader {
    clip: Arc<Clip>,
    cursor: usize,
}

impl MemoryReader {
    pub fn new(clip: Arc<Clip>) -> Self {
        Self { clip, cursor: 0 }
    }
}

impl RecordedReader for MemoryReader {
    fn start_messages(&self) -> Vec<RtmpMessage> {
        self.clip.start.clone()
    }

    fn seek(&mut self, position: u32) -> u32 {
        self.cursor = self.clip.media.partition_point(|m| m.timestamp() < position);
        self.time_position()
    }

    fn next_message(&mut self) -> Option<RtmpMessage> {
        let msg = self.clip.media.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(msg)
    }

    fn time_position(&self) -> u32 {
        self.clip
            .media
            .get(self.cursor)
            .map(|m| m.timestamp())
            .unwrap_or(self.clip.duration)
    }
}

/// Captures a recording into the owning store
pub struct MemorySink {
    name: String,
    messages: Vec<RtmpMessage>,
    recordings: Arc<RwLock<HashMap<String, Vec<RtmpMessage>>>>,
}

#[async_trait]
impl RecordingSink for MemorySink {
    async fn write(&mut self, message: &RtmpMessage) -> Result<()> {
        self.messages.push(message.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let messages = std::mem::take(&mut self.messages);
        tracing::debug!(stream = %self.name, messages = messages.len(), "Recording captured");
        self.recordings.write().await.insert(self.name.clone(), messages);
        Ok(())
    }
}

/// Single-application store held entirely in memory
#[derive(Clone)]
pub struct MemoryStore {
    app: String,
    clips: Arc<RwLock<HashMap<String, Arc<Clip>>>>,
    recordings: Arc<RwLock<HashMap<String, Vec<RtmpMessage>>>>,
}

impl MemoryStore {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            clips: Arc::new(RwLock::new(HashMap::new())),
            recordings: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn add_clip(&self, name: impl Into<String>, messages: Vec<RtmpMessage>) {
        self.clips.write().await.insert(name.into(), Arc::new(Clip::new(messages)));
    }

    /// Messages captured by a closed recording
    pub async fn recording(&self, name: &str) -> Option<Vec<RtmpMessage>> {
        self.recordings.read().await.get(name).cloned()
    }
}

#[async_trait]
impl Application for MemoryStore {
    fn name(&self) -> &str {
        &self.app
    }

    async fn open_reader(&self, stream_name: &str) -> Result<Option<Box<dyn RecordedReader>>> {
        let clip = self.clips.read().await.get(stream_name).cloned();
        Ok(clip.map(|clip| Box::new(MemoryReader::new(clip)) as Box<dyn RecordedReader>))
    }

    async fn open_writer(&self, stream_name: &str) -> Result<Box<dyn RecordingSink>> {
        Ok(Box::new(MemorySink {
            name: stream_name.to_string(),
            messages: Vec::new(),
            recordings: Arc::clone(&self.recordings),
        }))
    }
}

#[async_trait]
impl ApplicationResolver for MemoryStore {
    async fn resolve(
        &self,
        app: &str,
        _connect: &AmfObject,
    ) -> std::result::Result<Arc<dyn Application>, String> {
        if app == self.app {
            Ok(Arc::new(self.clone()))
        } else {
            Err(format!("Unknown application: {}", app))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn clip_messages() -> Vec<RtmpMessage> {
        vec![
            RtmpMessage::metadata(Metadata::on_meta_data(AmfObject::new().with("width", 640.0))),
            RtmpMessage::video(0, Bytes::from_static(&[0x17, 0x00, 1])),
            RtmpMessage::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12])),
            RtmpMessage::video(0, Bytes::from_static(&[0x17, 0x01, 2])),
            RtmpMessage::audio(20, Bytes::from_static(&[0xAF, 0x01, 3])),
            RtmpMessage::video(40, Bytes::from_static(&[0x27, 0x01, 4])),
            RtmpMessage::video(80, Bytes::from_static(&[0x27, 0x01, 5])),
        ]
    }

    #[test]
    fn test_clip_lifts_start_messages() {
        let clip = Clip::new(clip_messages());
        assert_eq!(clip.duration(), 80);
        assert_eq!(clip.len(), 4);

        let reader = MemoryReader::new(Arc::new(clip));
        let start = reader.start_messages();
        assert_eq!(start.len(), 3);
        let meta = start[0].as_metadata().unwrap();
        assert_eq!(meta.duration(), Some(0.08));
        assert_eq!(meta.values[0].get_number("width"), Some(640.0));
        assert!(start[1].is_config() && start[2].is_config());
    }

    #[test]
    fn test_reader_seek() {
        let mut reader = MemoryReader::new(Arc::new(Clip::new(clip_messages())));
        assert_eq!(reader.time_position(), 0);
        assert_eq!(reader.seek(30), 40);
        assert_eq!(reader.next_message().unwrap().timestamp(), 40);
        assert_eq!(reader.next_message().unwrap().timestamp(), 80);
        assert!(reader.next_message().is_none());
        assert_eq!(reader.time_position(), 80);

        assert_eq!(reader.seek(0), 0);
        assert_eq!(reader.next_message().unwrap().timestamp(), 0);
    }

    #[test]
    fn test_clip_without_metadata_gets_one() {
        let clip = Clip::new(vec![RtmpMessage::audio(500, Bytes::from_static(&[0x2F, 1]))]);
        let start = MemoryReader::new(Arc::new(clip)).start_messages();
        assert_eq!(start.len(), 1);
        assert_eq!(start[0].as_metadata().unwrap().duration(), Some(0.5));
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = MemoryStore::new("vod");
        store.add_clip("clip", clip_messages()).await;

        assert!(store.open_reader("clip").await.unwrap().is_some());
        assert!(store.open_reader("missing").await.unwrap().is_none());

        let mut sink = store.open_writer("rec").await.unwrap();
        sink.write(&RtmpMessage::audio(5, Bytes::from_static(&[1]))).await.unwrap();
        assert!(store.recording("rec").await.is_none());
        sink.close().await.unwrap();
        assert_eq!(store.recording("rec").await.unwrap().len(), 1);

        assert!(store.resolve("vod", &AmfObject::new()).await.is_ok());
        assert!(store.resolve("live", &AmfObject::new()).await.is_err());
    }
}
