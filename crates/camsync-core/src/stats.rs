//! Per-source statistics and synchronizer health.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camsync_models::SourceId;
use serde::{Deserialize, Serialize};

/// Counters tracked for one source.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Frames pushed by the source, including rejected ones
    pub frames_received: u64,
    /// Frames evicted, skipped or rejected
    pub frames_dropped: u64,
    /// Local time the last frame arrived
    pub last_frame_at: Option<Instant>,
}

impl SourceStats {
    /// Whether the source sent a frame within `threshold` of `now`.
    pub fn is_active(&self, now: Instant, threshold: Duration) -> bool {
        self.last_frame_at
            .map(|at| now.saturating_duration_since(at) < threshold)
            .unwrap_or(false)
    }

    fn view(&self, now: Instant, threshold: Duration, buffer_depth: usize) -> SourceStatsView {
        SourceStatsView {
            frames_received: self.frames_received,
            frames_dropped: self.frames_dropped,
            last_frame_age_ms: self
                .last_frame_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            is_active: self.is_active(now, threshold),
            buffer_depth,
        }
    }
}

/// Serializable view of one source's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatsView {
    pub frames_received: u64,
    pub frames_dropped: u64,
    /// Milliseconds since the last frame, if any arrived
    pub last_frame_age_ms: Option<u64>,
    pub is_active: bool,
    pub buffer_depth: usize,
}

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncHealth {
    Excellent,
    Good,
    Poor,
    Critical,
}

impl SyncHealth {
    /// Classify from average accuracy and the active-source ratio.
    pub fn classify(average_accuracy: f64, active_ratio: f64) -> Self {
        let both_at_least = |threshold: f64| average_accuracy >= threshold && active_ratio >= threshold;
        if both_at_least(0.9) {
            SyncHealth::Excellent
        } else if both_at_least(0.7) {
            SyncHealth::Good
        } else if both_at_least(0.5) {
            SyncHealth::Poor
        } else {
            SyncHealth::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncHealth::Excellent => "excellent",
            SyncHealth::Good => "good",
            SyncHealth::Poor => "poor",
            SyncHealth::Critical => "critical",
        }
    }
}

impl std::fmt::Display for SyncHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global counters that do not belong to a single source.
#[derive(Debug, Clone, Default)]
pub struct SyncStatistics {
    composites_emitted: u64,
    average_accuracy: f64,
    frames_dropped: u64,
    frames_received: u64,
}

impl SyncStatistics {
    /// Fold a new composite's accuracy into the running mean.
    pub fn record_composite(&mut self, sync_accuracy: f64) {
        self.composites_emitted += 1;
        self.average_accuracy +=
            (sync_accuracy - self.average_accuracy) / self.composites_emitted as f64;
    }

    pub fn record_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn record_dropped(&mut self, count: u64) {
        self.frames_dropped += count;
    }

    pub fn composites_emitted(&self) -> u64 {
        self.composites_emitted
    }

    pub fn average_accuracy(&self) -> f64 {
        self.average_accuracy
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Build a read-only snapshot.
    ///
    /// `sources` yields each known source with its stats and current buffer depth.
    pub fn snapshot<'a>(
        &self,
        sources: impl IntoIterator<Item = (&'a SourceId, &'a SourceStats, usize)>,
        now: Instant,
        inactivity_threshold: Duration,
    ) -> StatisticsSnapshot {
        let sources: BTreeMap<SourceId, SourceStatsView> = sources
            .into_iter()
            .map(|(id, stats, depth)| (id.clone(), stats.view(now, inactivity_threshold, depth)))
            .collect();

        let active = sources.values().filter(|s| s.is_active).count();
        let active_source_ratio = if sources.is_empty() {
            0.0
        } else {
            active as f64 / sources.len() as f64
        };

        StatisticsSnapshot {
            health: SyncHealth::classify(self.average_accuracy, active_source_ratio),
            sources,
            composites_emitted: self.composites_emitted,
            average_sync_accuracy: self.average_accuracy,
            active_source_ratio,
            frames_received: self.frames_received,
            frames_dropped: self.frames_dropped,
        }
    }
}

/// Read-only statistics snapshot for operational tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub sources: BTreeMap<SourceId, SourceStatsView>,
    pub composites_emitted: u64,
    pub average_sync_accuracy: f64,
    pub active_source_ratio: f64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub health: SyncHealth,
}

impl StatisticsSnapshot {
    /// Buffer depth of `source`, zero when unknown.
    pub fn buffer_depth(&self, source: &SourceId) -> usize {
        self.sources.get(source).map(|s| s.buffer_depth).unwrap_or(0)
    }
}

impl Default for StatisticsSnapshot {
    fn default() -> Self {
        SyncStatistics::default().snapshot(std::iter::empty(), Instant::now(), Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_mean() {
        let mut stats = SyncStatistics::default();
        stats.record_composite(1.0);
        stats.record_composite(0.5);
        stats.record_composite(0.0);
        assert!((stats.average_accuracy() - 0.5).abs() < 1e-12);
        assert_eq!(stats.composites_emitted(), 3);
    }

    #[test]
    fn test_health_thresholds() {
        assert_eq!(SyncHealth::classify(0.95, 1.0), SyncHealth::Excellent);
        assert_eq!(SyncHealth::classify(0.95, 0.8), SyncHealth::Good);
        assert_eq!(SyncHealth::classify(0.7, 0.7), SyncHealth::Good);
        assert_eq!(SyncHealth::classify(0.6, 0.9), SyncHealth::Poor);
        assert_eq!(SyncHealth::classify(0.49, 1.0), SyncHealth::Critical);
    }

    #[test]
    fn test_source_activity() {
        let now = Instant::now();
        let stats = SourceStats {
            frames_received: 1,
            frames_dropped: 0,
            last_frame_at: Some(now),
        };
        let threshold = Duration::from_millis(500);
        assert!(stats.is_active(now + Duration::from_millis(499), threshold));
        assert!(!stats.is_active(now + Duration::from_millis(500), threshold));
        assert!(!SourceStats::default().is_active(now, threshold));
    }

    #[test]
    fn test_snapshot_active_ratio() {
        let now = Instant::now();
        let a = SourceId::from("a");
        let b = SourceId::from("b");
        let live = SourceStats {
            frames_received: 4,
            frames_dropped: 1,
            last_frame_at: Some(now),
        };
        let silent = SourceStats::default();

        let mut stats = SyncStatistics::default();
        stats.record_composite(1.0);
        let snapshot = stats.snapshot(
            [(&a, &live, 2), (&b, &silent, 0)],
            now,
            Duration::from_secs(1),
        );

        assert_eq!(snapshot.active_source_ratio, 0.5);
        assert_eq!(snapshot.buffer_depth(&a), 2);
        assert_eq!(snapshot.buffer_depth(&SourceId::from("zz")), 0);
        assert_eq!(snapshot.health, SyncHealth::Poor);
        assert_eq!(snapshot.sources[&a].last_frame_age_ms, Some(0));
    }

    #[test]
    fn test_snapshot_serializes_for_dashboards() {
        let snapshot = StatisticsSnapshot::default();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["health"], "critical");
        assert_eq!(json["composites_emitted"], 0);
        assert!(json["sources"].as_object().unwrap().is_empty());
    }
}
