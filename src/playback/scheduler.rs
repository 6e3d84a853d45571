//! Wall-clock pacing of a recorded message sequence
//!
//! The scheduler is driven from outside: every call passes the current
//! `Instant`, and the returned messages are the ones whose timestamp has
//! come due. Virtual playback time is
//!
//! ```text
//! virtual(now) = anchor_position + (now - anchor)
//! ```
//!
//! `start` anchors at the seek position and `pause` stops emission.
//! `resume` seeks to the position the player reports and re-anchors there,
//! so nothing that came due during a pause is released in a burst.

use std::time::Instant;

use crate::protocol::message::{Command, ControlEvent, Metadata, RtmpMessage};
use crate::storage::RecordedReader;

use super::PlaybackOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackState {
    /// Created, `start` not called yet
    Idle,
    Running,
    Paused,
    /// End of content or length bound reached; terminal until restarted
    Stopped,
}

pub struct PlaybackScheduler {
    reader: Box<dyn RecordedReader>,
    options: PlaybackOptions,
    state: PlaybackState,
    /// Position playback actually started from
    seek_time: u32,
    play_length: Option<u32>,
    anchor: Instant,
    anchor_position: u32,
    /// Timestamp of the last emitted media message
    time_position: u32,
    /// Next message, read but not yet due
    pending: Option<RtmpMessage>,
    bytes_written: u64,
    started_at: Instant,
}

impl PlaybackScheduler {
    pub fn new(reader: Box<dyn RecordedReader>, options: PlaybackOptions) -> Self {
        let now = Instant::now();
        Self {
            reader,
            options,
            state: PlaybackState::Idle,
            seek_time: 0,
            play_length: None,
            anchor: now,
            anchor_position: 0,
            time_position: 0,
            pending: None,
            bytes_written: 0,
            started_at: now,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state != PlaybackState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.state == PlaybackState::Running
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, PlaybackState::Paused)
    }

    pub fn is_stopped(&self) -> bool {
        self.state == PlaybackState::Stopped
    }

    pub fn time_position(&self) -> u32 {
        self.time_position
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn set_buffer_duration(&mut self, buffer_ms: u32) {
        self.options.buffer_duration = buffer_ms;
    }

    /// Begin playback at `position` for `length` ms
    ///
    /// A negative position continues from where the reader stands; a
    /// negative length plays to the end. `preamble` goes out first, then
    /// the reader's start messages, then whatever is already due.
    pub fn start(
        &mut self,
        position: i32,
        length: i32,
        preamble: Vec<RtmpMessage>,
        now: Instant,
    ) -> Vec<RtmpMessage> {
        self.play_length = u32::try_from(length).ok();
        self.restart(position, preamble, now)
    }

    /// Like [`start`](Self::start), keeping the current length bound
    pub fn restart(&mut self, position: i32, preamble: Vec<RtmpMessage>, now: Instant) -> Vec<RtmpMessage> {
        self.seek_time = match u32::try_from(position) {
            Ok(position) => {
                self.pending = None;
                self.reader.seek(position)
            }
            Err(_) => self
                .pending
                .as_ref()
                .map(|m| m.timestamp())
                .unwrap_or_else(|| self.reader.time_position()),
        };
        self.time_position = self.seek_time;
        self.anchor = now;
        self.anchor_position = self.seek_time;
        self.started_at = now;
        self.state = PlaybackState::Running;

        tracing::debug!(
            stream_id = self.options.stream_id,
            requested = position,
            actual = self.seek_time,
            length = ?self.play_length,
            "Playback start"
        );

        let mut out: Vec<RtmpMessage> = preamble.into_iter().map(|m| self.stamp(m)).collect();
        for msg in self.reader.start_messages() {
            let msg = self.stamp(msg);
            out.push(msg);
        }
        out.extend(self.advance(now));
        out
    }

    /// Stop emitting until the next `resume` or `restart`
    pub fn pause(&mut self, now: Instant) {
        if self.state == PlaybackState::Running {
            let position = self.virtual_time(now);
            self.state = PlaybackState::Paused;
            tracing::debug!(stream_id = self.options.stream_id, position = position, "Playback paused");
        }
    }

    /// Leave a pause at `position` with `preamble` first
    ///
    /// Returns nothing unless paused.
    pub fn resume(&mut self, position: i32, preamble: Vec<RtmpMessage>, now: Instant) -> Vec<RtmpMessage> {
        if !self.is_paused() {
            tracing::debug!(stream_id = self.options.stream_id, "Resume while not paused");
            return Vec::new();
        }
        self.restart(position, preamble, now)
    }

    /// Emit everything due at `now`
    ///
    /// Ends with the stop sequence once the content or the length bound
    /// runs out. Does nothing unless running.
    pub fn advance(&mut self, now: Instant) -> Vec<RtmpMessage> {
        if self.state != PlaybackState::Running {
            return Vec::new();
        }
        let virtual_now = self.virtual_time(now);
        let mut out = Vec::new();
        let mut batch: Vec<RtmpMessage> = Vec::new();
        let mut finished = false;

        loop {
            let mut msg = match self.pending.take().or_else(|| self.reader.next_message()) {
                Some(msg) => msg,
                None => {
                    finished = true;
                    break;
                }
            };
            if let Some(length) = self.play_length {
                if msg.timestamp() > self.seek_time.saturating_add(length) {
                    finished = true;
                    break;
                }
            }
            if msg.timestamp() > virtual_now {
                self.pending = Some(msg);
                break;
            }

            msg.header.stream_id = self.options.stream_id;
            self.time_position = self.time_position.max(msg.timestamp());

            if self.options.aggregate && is_batchable(&msg) {
                let span_exceeded = batch.first().map_or(false, |first| {
                    self.options.buffer_duration > 0
                        && msg.timestamp().saturating_sub(first.timestamp()) > self.options.buffer_duration
                });
                if span_exceeded {
                    self.flush(&mut batch, &mut out);
                }
                batch.push(msg);
            } else {
                self.flush(&mut batch, &mut out);
                self.bytes_written += msg.header.size as u64;
                out.push(msg);
            }
        }
        self.flush(&mut batch, &mut out);

        if finished {
            self.finish(now, &mut out);
        }
        out
    }

    /// Stop without the stop sequence and release the reader
    pub fn close(&mut self) {
        self.state = PlaybackState::Stopped;
        self.pending = None;
        self.reader.close();
    }

    fn virtual_time(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.anchor).as_millis();
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        self.anchor_position.saturating_add(elapsed)
    }

    /// Address a preamble or stop message at this playback
    fn stamp(&mut self, mut msg: RtmpMessage) -> RtmpMessage {
        if msg.header.is_stream_scoped() {
            msg.header.stream_id = self.options.stream_id;
            msg.header.timestamp = self.time_position;
        }
        self.bytes_written += msg.header.size as u64;
        msg
    }

    fn flush(&mut self, batch: &mut Vec<RtmpMessage>, out: &mut Vec<RtmpMessage>) {
        let msg = match batch.len() {
            0 => return,
            1 => batch.pop(),
            _ => RtmpMessage::aggregate_of(&batch[..]).map(|m| m.with_stream_id(self.options.stream_id)),
        };
        batch.clear();
        if let Some(msg) = msg {
            self.bytes_written += msg.header.size as u64;
            out.push(msg);
        }
    }

    fn finish(&mut self, now: Instant, out: &mut Vec<RtmpMessage>) {
        self.state = PlaybackState::Stopped;
        tracing::info!(
            stream_id = self.options.stream_id,
            play_name = %self.options.play_name,
            start = self.seek_time,
            position = self.time_position,
            elapsed_ms = now.saturating_duration_since(self.started_at).as_millis() as u64,
            bytes = self.bytes_written,
            "Playback finished"
        );

        let status = Metadata::on_play_status(self.time_position as f64 / 1000.0, self.bytes_written);
        let stop = Command::play_stop(&self.options.play_name, &self.options.client_id);
        let status = self.stamp(RtmpMessage::metadata(status));
        let stop = self.stamp(RtmpMessage::command(stop));
        out.push(status);
        out.push(stop);
        out.push(RtmpMessage::control(ControlEvent::StreamEof(self.options.stream_id)));
    }
}

/// Kinds an aggregate can carry
fn is_batchable(msg: &RtmpMessage) -> bool {
    msg.header.is_audio() || msg.header.is_video() || msg.as_metadata().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::MessageBody;
    use crate::storage::memory::{Clip, MemoryReader};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    const SID: u32 = 5;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn frame(ts: u32) -> RtmpMessage {
        RtmpMessage::video(ts, Bytes::from(vec![0x27, 0x01, ts as u8]))
    }

    fn scheduler(timestamps: &[u32], aggregate: bool) -> PlaybackScheduler {
        let clip = Clip::new(timestamps.iter().map(|ts| frame(*ts)).collect());
        let options = PlaybackOptions {
            stream_id: SID,
            play_name: "clip".into(),
            client_id: "c1".into(),
            buffer_duration: 0,
            aggregate,
        };
        PlaybackScheduler::new(Box::new(MemoryReader::new(Arc::new(clip))), options)
    }

    fn media_ts(out: &[RtmpMessage]) -> Vec<u32> {
        out.iter()
            .filter(|m| matches!(m.body, MessageBody::Video(_)))
            .map(|m| m.timestamp())
            .collect()
    }

    fn is_stop_sequence(out: &[RtmpMessage]) -> bool {
        let n = out.len();
        n >= 3
            && out[n - 3].as_metadata().map(|m| m.name.as_str()) == Some("onPlayStatus")
            && out[n - 2].as_command().and_then(|c| c.status_code()) == Some("NetStream.Play.Stop")
            && out[n - 1].body == MessageBody::Control(ControlEvent::StreamEof(SID))
    }

    #[test]
    fn test_paces_by_wall_clock() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40, 80, 120], false);
        assert!(!s.is_started());

        let out = s.start(-2, -1, vec![], t0);
        // synthesized onMetaData then the first frame
        assert_eq!(out.len(), 2);
        assert!(out[0].as_metadata().unwrap().is_on_meta_data());
        assert_eq!(media_ts(&out), vec![0]);
        assert!(out.iter().all(|m| m.header.stream_id == SID));

        assert!(s.advance(t0 + ms(39)).is_empty());
        assert_eq!(media_ts(&s.advance(t0 + ms(40))), vec![40]);

        let out = s.advance(t0 + ms(500));
        assert_eq!(media_ts(&out), vec![80, 120]);
        assert!(is_stop_sequence(&out));
        assert!(s.is_stopped());
        assert!(s.advance(t0 + ms(900)).is_empty());
    }

    #[test]
    fn test_stop_reports_position_and_bytes() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 1500], false);
        s.start(0, -1, vec![], t0);
        let out = s.advance(t0 + ms(1500));
        assert!(is_stop_sequence(&out));
        let status = out[out.len() - 3].as_metadata().unwrap();
        assert_eq!(status.values[0].get_number("duration"), Some(1.5));
        assert!(status.values[0].get_number("bytes").unwrap() > 0.0);
        assert_eq!(out[out.len() - 3].timestamp(), 1500);
    }

    #[test]
    fn test_start_position() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40, 80, 120], false);
        let out = s.start(70, -1, vec![], t0);
        assert_eq!(media_ts(&out), vec![80]);
        assert_eq!(s.time_position(), 80);

        let out = s.advance(t0 + ms(40));
        assert_eq!(media_ts(&out), vec![120]);
        assert!(is_stop_sequence(&out));
    }

    #[test]
    fn test_length_bound() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40, 80, 120], false);
        s.start(0, 40, vec![], t0);
        let out = s.advance(t0 + ms(1000));
        assert_eq!(media_ts(&out), vec![40]);
        assert!(is_stop_sequence(&out));
    }

    #[test]
    fn test_resume_when_not_paused_is_noop() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40], false);
        s.start(0, -1, vec![], t0);
        assert!(s.resume(0, vec![RtmpMessage::empty_audio()], t0).is_empty());
    }

    #[test]
    fn test_resume_at_reported_position_does_not_burst() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40, 80, 120], false);
        s.start(0, -1, vec![], t0);
        assert_eq!(media_ts(&s.advance(t0 + ms(40))), vec![40]);

        s.pause(t0 + ms(50));
        assert!(s.is_paused());
        assert!(s.advance(t0 + ms(500)).is_empty());

        let notice = RtmpMessage::command(Command::unpause_notify("clip", "c1"));
        let out = s.resume(80, vec![notice], t0 + ms(1000));
        assert!(!s.is_paused());
        assert_eq!(out[0].timestamp(), 80);
        assert_eq!(media_ts(&out), vec![80]);
        assert!(s.advance(t0 + ms(1039)).is_empty());
        assert_eq!(media_ts(&s.advance(t0 + ms(1040))), vec![120]);
    }

    #[test]
    fn test_seek_discards_cursor() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40, 80, 120], false);
        s.start(0, -1, vec![], t0);
        s.advance(t0 + ms(60));

        let out = s.restart(0, vec![], t0 + ms(100));
        assert_eq!(media_ts(&out), vec![0]);
        assert_eq!(media_ts(&s.advance(t0 + ms(140))), vec![40]);
    }

    #[test]
    fn test_preamble_is_stamped() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40, 80], false);
        let preamble = vec![
            RtmpMessage::chunk_size(4096),
            RtmpMessage::command(Command::play_start("clip", "c1")),
        ];
        let out = s.start(80, -1, preamble, t0);
        // control channel untouched
        assert_eq!(out[0].header.stream_id, 0);
        assert_eq!(out[0].timestamp(), 0);
        assert_eq!(out[1].header.stream_id, SID);
        assert_eq!(out[1].timestamp(), 80);
    }

    #[test]
    fn test_aggregate_batches_due_messages() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 0, 0, 40], true);
        let out = s.start(0, -1, vec![], t0);
        assert_eq!(out.len(), 2);
        let aggregate = &out[1];
        assert!(matches!(aggregate.body, MessageBody::Aggregate(_)));
        assert_eq!(aggregate.header.stream_id, SID);
        let parts = aggregate.split_aggregate().unwrap();
        assert_eq!(parts.len(), 3);

        // a lone due message is not wrapped
        let out = s.advance(t0 + ms(40));
        assert_eq!(media_ts(&out), vec![40]);
    }

    #[test]
    fn test_close_is_silent() {
        let t0 = Instant::now();
        let mut s = scheduler(&[0, 40], false);
        s.start(0, -1, vec![], t0);
        s.close();
        assert!(s.is_stopped());
        assert!(s.advance(t0 + ms(100)).is_empty());
    }
}
