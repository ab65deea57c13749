//! Per-source frame buffers.
//!
//! Each source owns one bounded queue kept sorted ascending by frame index.
//! Frames are immutable once pushed; they leave the buffer either consumed by
//! the aligner or evicted by the drop policy.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use camsync_models::RawFrame;

/// A raw frame plus the local time it was enqueued.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    frame: RawFrame,
    enqueued_at: Instant,
}

impl BufferedFrame {
    /// The buffered frame.
    pub fn frame(&self) -> &RawFrame {
        &self.frame
    }

    /// Frame index within its source.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame.frame_index
    }

    /// Local enqueue time.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Time spent in the buffer as of `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    fn into_frame(self) -> RawFrame {
        self.frame
    }
}

/// Index-sorted queue of frames from one source.
#[derive(Debug, Default)]
pub struct SourceBuffer {
    frames: VecDeque<BufferedFrame>,
}

impl SourceBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a frame, keeping the buffer sorted by frame index.
    ///
    /// Frames sharing an index keep arrival order.
    pub fn push(&mut self, frame: RawFrame, now: Instant) {
        let index = frame.frame_index;
        let pos = self.frames.partition_point(|f| f.frame_index() <= index);
        self.frames.insert(
            pos,
            BufferedFrame {
                frame,
                enqueued_at: now,
            },
        );
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterate frames in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = &BufferedFrame> {
        self.frames.iter()
    }

    /// Frame at `pos`, if any.
    pub fn get(&self, pos: usize) -> Option<&BufferedFrame> {
        self.frames.get(pos)
    }

    /// Frame with the highest index.
    pub fn newest(&self) -> Option<&BufferedFrame> {
        self.frames.back()
    }

    /// Newest buffered frame index.
    pub fn newest_index(&self) -> Option<u64> {
        self.newest().map(BufferedFrame::frame_index)
    }

    /// Remove and return the frame at `pos`.
    pub fn take(&mut self, pos: usize) -> Option<RawFrame> {
        self.frames.remove(pos).map(BufferedFrame::into_frame)
    }

    /// Evict frames whose age reached `max_age`. Returns the eviction count.
    pub fn evict_stale(&mut self, now: Instant, max_age: Duration) -> usize {
        self.evict_where(|f| f.age(now) >= max_age)
    }

    /// Evict every frame matching `predicate`. Returns the eviction count.
    pub fn evict_where(&mut self, mut predicate: impl FnMut(&BufferedFrame) -> bool) -> usize {
        let before = self.frames.len();
        self.frames.retain(|f| !predicate(f));
        before - self.frames.len()
    }

    /// Evict oldest frames until at most `capacity` remain. Returns the eviction count.
    pub fn evict_overflow(&mut self, capacity: usize) -> usize {
        let excess = self.frames.len().saturating_sub(capacity);
        self.frames.drain(..excess);
        excess
    }

    /// Evict every frame with an index strictly below `index`. Returns the eviction count.
    pub fn evict_before(&mut self, index: u64) -> usize {
        let cut = self.frames.partition_point(|f| f.frame_index() < index);
        self.frames.drain(..cut);
        cut
    }

    /// Whether the buffer is sorted ascending by frame index.
    pub fn is_sorted(&self) -> bool {
        self.frames
            .iter()
            .zip(self.frames.iter().skip(1))
            .all(|(a, b)| a.frame_index() <= b.frame_index())
    }

    /// Remove every frame.
    pub fn clear(&mut self) -> usize {
        let n = self.frames.len();
        self.frames.clear();
        n
    }
}
