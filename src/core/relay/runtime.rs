//! Per-call runtime state.
//!
//! [`RelayRuntimeState`] is owned exclusively by the relay's control loop;
//! the two socket pumps never touch it. Every mutation happens on one
//! task, which is what makes the interruption sequence atomic.

use std::collections::VecDeque;

/// A truncation instruction computed by the interruption protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// The assistant item being cut
    pub item_id: String,
    /// Audio cut point in milliseconds from the start of the item
    pub audio_end_ms: u64,
}

/// Mutable state of one relay session.
///
/// Created when the client's start event arrives, mutated only by the
/// control loop, destroyed when either socket closes.
#[derive(Debug, Default)]
pub struct RelayRuntimeState {
    /// Media stream id from the client's start event
    pub stream_id: String,
    /// Latest media clock timestamp seen from the client
    pub latest_media_ts_ms: u64,
    /// Item id of the assistant response currently playing
    pub last_assistant_item: Option<String>,
    /// Media clock value when the current response started playing
    pub response_start_ts_ms: Option<u64>,
    /// Marks sent to the client and not yet echoed back
    pub pending_marks: VecDeque<String>,
    /// The one-shot greeting was sent
    pub greeting_sent: bool,
    /// Caller audio is being dropped instead of forwarded
    pub audio_forwarding_suspended: bool,
    /// The session has been finalized
    pub closed: bool,

    mark_seq: u64,
}

impl RelayRuntimeState {
    /// Initialize state for a new media stream and reset interruption
    /// bookkeeping.
    pub fn begin_stream(&mut self, stream_id: &str) {
        self.stream_id = stream_id.to_string();
        self.latest_media_ts_ms = 0;
        self.reset_interruption();
    }

    /// Forget everything about the response currently playing.
    pub fn reset_interruption(&mut self) {
        self.pending_marks.clear();
        self.last_assistant_item = None;
        self.response_start_ts_ms = None;
    }

    /// Record the media clock from an inbound media frame.
    pub fn note_media(&mut self, timestamp: Option<u64>) {
        if let Some(ts) = timestamp {
            self.latest_media_ts_ms = ts;
        }
    }

    /// Bookkeeping for one relayed audio delta: stamp the response start
    /// on the first delta (idempotent) and remember the item id when the
    /// delta carries one.
    pub fn note_audio_delta(&mut self, item_id: Option<&str>) {
        if self.response_start_ts_ms.is_none() {
            self.response_start_ts_ms = Some(self.latest_media_ts_ms);
        }
        if let Some(id) = item_id {
            self.last_assistant_item = Some(id.to_string());
        }
    }

    /// Mint the next mark name and queue it as pending.
    pub fn push_mark(&mut self) -> String {
        self.mark_seq += 1;
        let name = format!("resp-{}", self.mark_seq);
        self.pending_marks.push_back(name.clone());
        name
    }

    /// The client reported playback progress; drop the oldest pending mark.
    pub fn pop_mark(&mut self) {
        self.pending_marks.pop_front();
    }

    /// Run the state half of the interruption protocol.
    ///
    /// Requires an assistant item currently playing, at least one pending
    /// mark, and a stamped response start; otherwise there is nothing to
    /// truncate and nothing changes. On success the truncation point is
    /// `latest_media_ts_ms - response_start_ts_ms` and all interruption
    /// bookkeeping is reset.
    pub fn begin_interruption(&mut self) -> Option<Truncation> {
        if self.pending_marks.is_empty() {
            return None;
        }
        let item_id = self.last_assistant_item.clone()?;
        let start = self.response_start_ts_ms?;

        let truncation = Truncation {
            item_id,
            audio_end_ms: self.latest_media_ts_ms.saturating_sub(start),
        };
        self.reset_interruption();
        Some(truncation)
    }
}

// =============================================================================
// Tests
// =============================================================================
