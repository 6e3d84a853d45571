//! FLV files on disk: `<root>/<app>/<name>.flv`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::memory::{Clip, MemoryReader};
use super::{is_safe_name, Application, ApplicationResolver, RecordedReader, RecordingSink};
use crate::amf::AmfObject;
use crate::error::Result;
use crate::media::flv::{self, FlvTag, FlvTagType};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::{CSID_AUDIO, CSID_DATA, CSID_VIDEO};
use crate::protocol::message::{MessageBody, RtmpMessage};

/// Decode a whole FLV file into messages
pub fn parse_flv(mut data: Bytes) -> Result<Vec<RtmpMessage>> {
    let total = data.len();
    flv::read_file_header(&mut data)?;
    let mut messages = Vec::new();
    loop {
        let offset = total - data.len();
        let tag = match FlvTag::read_from(&mut data, offset)? {
            Some(tag) => tag,
            None => break,
        };
        let csid = match tag.tag_type {
            FlvTagType::Audio => CSID_AUDIO,
            FlvTagType::Video => CSID_VIDEO,
            FlvTagType::Script => CSID_DATA,
        };
        let raw = RawMessage {
            csid,
            timestamp: tag.timestamp,
            message_type: tag.tag_type.as_u8(),
            stream_id: 0,
            payload: tag.data,
        };
        messages.push(RtmpMessage::from_raw(&raw)?);
    }
    Ok(messages)
}

/// Reader over a fully loaded FLV file
pub struct FlvFileReader {
    path: PathBuf,
    inner: MemoryReader,
}

impl FlvFileReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = tokio::fs::read(&path).await?;
        let messages = parse_flv(Bytes::from(data))?;
        tracing::debug!(path = %path.display(), messages = messages.len(), "FLV file loaded");
        Ok(Self {
            path,
            inner: MemoryReader::new(Arc::new(Clip::new(messages))),
        })
    }
}

impl RecordedReader for FlvFileReader {
    fn start_messages(&self) -> Vec<RtmpMessage> {
        self.inner.start_messages()
    }

    fn seek(&mut self, position: u32) -> u32 {
        self.inner.seek(position)
    }

    fn next_message(&mut self) -> Option<RtmpMessage> {
        self.inner.next_message()
    }

    fn time_position(&self) -> u32 {
        self.inner.time_position()
    }

    fn close(&mut self) {
        tracing::debug!(path = %self.path.display(), "FLV reader closed");
    }
}

/// Appends tags to a new FLV file
///
/// Timestamps are rebased so the first written message lands at zero.
pub struct FlvFileWriter {
    path: PathBuf,
    out: BufWriter<File>,
    base: Option<u32>,
    buf: BytesMut,
    tags: u64,
}

impl FlvFileWriter {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut out = BufWriter::new(File::create(&path).await?);
        let mut buf = BytesMut::with_capacity(flv::FILE_HEADER_SIZE);
        flv::write_file_header(&mut buf, true, true);
        out.write_all(&buf).await?;
        buf.clear();
        tracing::info!(path = %path.display(), "Recording started");
        Ok(Self {
            path,
            out,
            base: None,
            buf,
            tags: 0,
        })
    }

    async fn write_tag(&mut self, tag_type: FlvTagType, message: &RtmpMessage) -> Result<()> {
        let base = *self.base.get_or_insert(message.timestamp());
        let timestamp = message.timestamp().saturating_sub(base);
        FlvTag::new(tag_type, timestamp, message.payload()).write_to(&mut self.buf);
        self.out.write_all(&self.buf).await?;
        self.buf.clear();
        self.tags += 1;
        Ok(())
    }
}

#[async_trait]
impl RecordingSink for FlvFileWriter {
    async fn write(&mut self, message: &RtmpMessage) -> Result<()> {
        match &message.body {
            MessageBody::Aggregate(_) => {
                for sub in message.split_aggregate()? {
                    self.write(&sub).await?;
                }
                Ok(())
            }
            MessageBody::Audio(_) => self.write_tag(FlvTagType::Audio, message).await,
            MessageBody::Video(_) => self.write_tag(FlvTagType::Video, message).await,
            MessageBody::Metadata(_) => self.write_tag(FlvTagType::Script, message).await,
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.out.flush().await?;
        tracing::info!(path = %self.path.display(), tags = self.tags, "Recording closed");
        Ok(())
    }
}

/// One application directory of FLV files
pub struct FlvFileApplication {
    name: String,
    dir: PathBuf,
}

impl FlvFileApplication {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    fn file_path(&self, stream_name: &str) -> Option<PathBuf> {
        let base = stream_name.strip_suffix(".flv").unwrap_or(stream_name);
        if !is_safe_name(base) {
            return None;
        }
        Some(self.dir.join(format!("{}.flv", base)))
    }
}

#[async_trait]
impl Application for FlvFileApplication {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_reader(&self, stream_name: &str) -> Result<Option<Box<dyn RecordedReader>>> {
        let path = match self.file_path(stream_name) {
            Some(path) => path,
            None => return Ok(None),
        };
        match FlvFileReader::open(&path).await {
            Ok(reader) => Ok(Some(Box::new(reader))),
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_writer(&self, stream_name: &str) -> Result<Box<dyn RecordingSink>> {
        let path = self
            .file_path(stream_name)
            .ok_or_else(|| crate::Error::Rejected(format!("Invalid stream name: {}", stream_name)))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(Box::new(FlvFileWriter::create(path).await?))
    }
}

/// Resolves every application name to a subdirectory of `root`
pub struct FlvDirectory {
    root: PathBuf,
}

impl FlvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ApplicationResolver for FlvDirectory {
    async fn resolve(
        &self,
        app: &str,
        _connect: &AmfObject,
    ) -> std::result::Result<Arc<dyn Application>, String> {
        if !is_safe_name(app) {
            return Err(format!("Invalid application name: {}", app));
        }
        Ok(Arc::new(FlvFileApplication::new(app, self.root.join(app))))
    }
}
