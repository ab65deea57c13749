//! Drop/eviction policy for source buffers.
//!
//! Not a separate thread of control: the synchronizer applies it on every
//! push and around every tick. Buffers are index-sorted, so every trigger
//! evicts the oldest frames first.

use std::time::{Duration, Instant};

use camsync_models::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::buffer::SourceBuffer;

/// Why a frame left a buffer without being consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Age reached `max_frame_age`
    Stale,
    /// Buffer exceeded `max_buffer_size`
    Overflow,
    /// Older than an emitted reference while frame skipping is on
    Skipped,
    /// Below the last emitted reference and outside its window
    Late,
    /// Rejected at ingestion
    Malformed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Stale => "stale",
            DropReason::Overflow => "overflow",
            DropReason::Skipped => "skipped",
            DropReason::Late => "late",
            DropReason::Malformed => "malformed",
        }
    }
}

/// Outcome of enforcing the policy on one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evictions {
    pub stale: usize,
    pub overflow: usize,
}

impl Evictions {
    pub fn total(&self) -> usize {
        self.stale + self.overflow
    }
}

/// Age and capacity limits taken from a [`SyncConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropPolicy {
    max_frame_age: Duration,
    max_buffer_size: usize,
}

impl DropPolicy {
    pub fn new(max_frame_age: Duration, max_buffer_size: usize) -> Self {
        Self {
            max_frame_age,
            max_buffer_size,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_frame_age(), config.max_buffer_size)
    }

    /// Evict stale frames first, then any excess over capacity.
    pub fn enforce(&self, buffer: &mut SourceBuffer, now: Instant) -> Evictions {
        let stale = buffer.evict_stale(now, self.max_frame_age);
        let overflow = buffer.evict_overflow(self.max_buffer_size);
        Evictions { stale, overflow }
    }

    pub fn max_frame_age(&self) -> Duration {
        self.max_frame_age
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camsync_models::RawFrame;

    #[test]
    fn test_enforce_applies_both_triggers() {
        let start = Instant::now();
        let policy = DropPolicy::new(Duration::from_millis(100), 2);
        let mut buffer = SourceBuffer::new();

        buffer.push(RawFrame::new("cam", 1, Vec::new()), start);
        for index in 2..=5 {
            buffer.push(RawFrame::new("cam", index, Vec::new()), start + Duration::from_millis(80));
        }

        let evictions = policy.enforce(&mut buffer, start + Duration::from_millis(120));
        assert_eq!(evictions, Evictions { stale: 1, overflow: 2 });
        assert_eq!(evictions.total(), 3);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.newest_index(), Some(5));
    }

    #[test]
    fn test_drop_reason_label_matches_serde() {
        for reason in [
            DropReason::Stale,
            DropReason::Overflow,
            DropReason::Skipped,
            DropReason::Late,
            DropReason::Malformed,
        ] {
            let json = serde_json::to_value(reason).unwrap();
            assert_eq!(json, reason.as_str());
            let back: DropReason = serde_json::from_value(json).unwrap();
            assert_eq!(back, reason);
        }
    }

    #[test]
    fn test_from_config() {
        let config = SyncConfig {
            max_frame_age_ms: 250,
            max_buffer_size: 7,
            ..Default::default()
        };
        let policy = DropPolicy::from_config(&config);
        assert_eq!(policy.max_frame_age(), Duration::from_millis(250));
        assert_eq!(policy.max_buffer_size(), 7);
    }
}
