//! Recorded content and recording collaborators
//!
//! The engine never touches a file format directly. A connect request is
//! mapped to an [`Application`] by an [`ApplicationResolver`]; the
//! application opens readers for VOD playback and sinks for recording.

pub mod flv_file;
pub mod memory;

pub use flv_file::{FlvDirectory, FlvFileApplication, FlvFileReader, FlvFileWriter};
pub use memory::{MemoryReader, MemorySink, MemoryStore};

use std::sync::Arc;

use async_trait::async_trait;

use crate::amf::AmfObject;
use crate::error::Result;
use crate::protocol::message::RtmpMessage;

/// Ordered, seekable source of recorded messages
///
/// Playback drives a reader synchronously from the connection task, so
/// implementations keep their content in memory or otherwise never block.
pub trait RecordedReader: Send {
    /// Messages sent once at the head of every playback (metadata, codec config)
    fn start_messages(&self) -> Vec<RtmpMessage>;

    /// Reposition at the first message at or after `position` (ms)
    ///
    /// Returns the timestamp playback actually resumes from.
    fn seek(&mut self, position: u32) -> u32;

    fn next_message(&mut self) -> Option<RtmpMessage>;

    /// Timestamp of the message the cursor points at
    fn time_position(&self) -> u32;

    fn close(&mut self) {}
}

/// Destination for a recorded publish
#[async_trait]
pub trait RecordingSink: Send {
    async fn write(&mut self, message: &RtmpMessage) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Storage scope selected by the connect-time application name
#[async_trait]
pub trait Application: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when no content exists under `stream_name`
    async fn open_reader(&self, stream_name: &str) -> Result<Option<Box<dyn RecordedReader>>>;

    async fn open_writer(&self, stream_name: &str) -> Result<Box<dyn RecordingSink>>;
}

/// Maps a connect request to its application, or a rejection reason
#[async_trait]
pub trait ApplicationResolver: Send + Sync {
    async fn resolve(
        &self,
        app: &str,
        connect: &AmfObject,
    ) -> std::result::Result<Arc<dyn Application>, String>;
}

/// Stream names are used as file names; refuse anything that escapes the app
pub(crate) fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("clip"));
        assert!(is_safe_name("cam-1.v2"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("../etc/passwd"));
        assert!(!is_safe_name("a\\b"));
    }
}
