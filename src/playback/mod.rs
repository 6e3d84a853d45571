//! Paced playback of recorded content
//!
//! A [`PlaybackScheduler`] is owned by exactly one connection. The
//! connection advances it after every inbound message and on its idle
//! tick; both paths go through `&mut` access to the session, so a
//! scheduler is never advanced re-entrantly.

pub mod scheduler;

pub use scheduler::PlaybackScheduler;

/// Per-playback settings fixed when the scheduler is created
#[derive(Debug, Clone, Default)]
pub struct PlaybackOptions {
    /// Message stream the playback is addressed to
    pub stream_id: u32,
    pub play_name: String,
    pub client_id: String,
    /// Client buffer hint (ms); bounds the timestamp span of one aggregate
    pub buffer_duration: u32,
    /// Batch messages that come due together into aggregates
    pub aggregate: bool,
}
