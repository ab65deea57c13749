//! Reference selection and per-source frame matching.
//!
//! Each tick the aligner scores every buffered frame index by how many active
//! sources have a frame within `sync_window` of it, picks the best-covered
//! index (earliest on ties) and pulls one frame per source for it.
//!
//! Distances are measured in time. When both frames carry a capture
//! timestamp the timestamps are compared directly; otherwise the index
//! difference is converted with `target_rate_hz`.

use std::collections::{BTreeMap, BTreeSet};

use camsync_models::{Entity, RawFrame, SourceId, SyncConfig};
use chrono::{DateTime, Utc};

use crate::buffer::SourceBuffer;

/// The frame index (and capture time, if known) a composite aligns to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    pub frame_index: u64,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Chosen reference together with its coverage score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceChoice {
    pub reference: Reference,
    pub coverage: usize,
}

/// Read-only view of one source used for scoring.
#[derive(Debug, Clone, Copy)]
pub struct SourceView<'a> {
    pub id: &'a SourceId,
    pub buffer: &'a SourceBuffer,
    /// Inactive sources do not count toward coverage
    pub active: bool,
}

/// Frames pulled for one reference.
#[derive(Debug, Default)]
pub struct Alignment {
    pub per_source: BTreeMap<SourceId, Vec<Entity>>,
    pub missed_sources: BTreeSet<SourceId>,
}

/// Stateless matcher configured from a [`SyncConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aligner {
    sync_window_ms: f64,
    frame_interval_ms: f64,
}

impl Aligner {
    pub fn new(sync_window_ms: f64, frame_interval_ms: f64) -> Self {
        Self {
            sync_window_ms,
            frame_interval_ms,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.sync_window_ms as f64, config.frame_interval_ms())
    }

    /// Time distance between a frame and the reference, in milliseconds.
    pub fn distance_ms(&self, reference: &Reference, frame: &RawFrame) -> f64 {
        if let (Some(a), Some(b)) = (reference.captured_at, frame.captured_at) {
            if let Some(us) = (b - a).num_microseconds() {
                return us.unsigned_abs() as f64 / 1000.0;
            }
        }
        reference.frame_index.abs_diff(frame.frame_index) as f64 * self.frame_interval_ms
    }

    /// Whether `frame` is close enough to `reference` to contribute.
    pub fn within_window(&self, reference: &Reference, frame: &RawFrame) -> bool {
        self.distance_ms(reference, frame) <= self.sync_window_ms
    }

    /// Pick the reference index with maximum coverage; earliest index wins ties.
    ///
    /// Indices below `floor` are not candidates, which keeps emitted
    /// references non-decreasing. Returns `None` when no candidate exists.
    pub fn select_reference(
        &self,
        views: &[SourceView<'_>],
        floor: Option<u64>,
    ) -> Option<ReferenceChoice> {
        let floor = floor.unwrap_or(0);
        let mut candidates: BTreeMap<u64, Option<DateTime<Utc>>> = BTreeMap::new();
        for view in views {
            for buffered in view.buffer.iter().filter(|f| f.frame_index() >= floor) {
                let captured_at = buffered.frame().captured_at;
                candidates
                    .entry(buffered.frame_index())
                    .and_modify(|at| *at = at.or(captured_at))
                    .or_insert(captured_at);
            }
        }

        let mut best: Option<ReferenceChoice> = None;
        for (frame_index, captured_at) in candidates {
            let reference = Reference {
                frame_index,
                captured_at,
            };
            let coverage = views
                .iter()
                .filter(|view| view.active)
                .filter(|view| {
                    view.buffer
                        .iter()
                        .any(|f| self.within_window(&reference, f.frame()))
                })
                .count();

            if best.map_or(true, |b| coverage > b.coverage) {
                best = Some(ReferenceChoice {
                    reference,
                    coverage,
                });
            }
        }
        best
    }

    /// Position of the frame a source contributes for `reference`.
    ///
    /// Exact index matches win; otherwise the closest frame within the window.
    pub fn pick(&self, buffer: &SourceBuffer, reference: &Reference) -> Option<usize> {
        if let Some(pos) = buffer
            .iter()
            .position(|f| f.frame_index() == reference.frame_index)
        {
            return Some(pos);
        }

        let mut best: Option<(usize, f64)> = None;
        for (pos, buffered) in buffer.iter().enumerate() {
            let distance = self.distance_ms(reference, buffered.frame());
            if distance > self.sync_window_ms {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((pos, distance));
            }
        }
        best.map(|(pos, _)| pos)
    }

    /// Consume one frame per source for `reference`.
    ///
    /// Sources without an eligible frame are reported as missed.
    pub fn assemble<'a>(
        &self,
        reference: &Reference,
        buffers: impl IntoIterator<Item = (&'a SourceId, &'a mut SourceBuffer)>,
    ) -> Alignment {
        let mut alignment = Alignment::default();
        for (id, buffer) in buffers {
            match self.pick(buffer, reference).and_then(|pos| buffer.take(pos)) {
                Some(frame) => {
                    alignment.per_source.insert(id.clone(), frame.entities);
                }
                None => {
                    alignment.missed_sources.insert(id.clone());
                }
            }
        }
        alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Instant;

    fn buffer_with(source: &str, indices: &[u64]) -> SourceBuffer {
        let now = Instant::now();
        let mut buffer = SourceBuffer::new();
        for &index in indices {
            buffer.push(RawFrame::new(source, index, Vec::new()), now);
        }
        buffer
    }

    fn exact_only() -> Aligner {
        // 30 Hz frames are ~33ms apart; a 10ms window only admits exact matches
        Aligner::new(10.0, 1000.0 / 30.0)
    }

    #[test]
    fn test_empty_buffers_select_nothing() {
        let id = SourceId::from("a");
        let buffer = SourceBuffer::new();
        let views = [SourceView {
            id: &id,
            buffer: &buffer,
            active: true,
        }];
        assert!(exact_only().select_reference(&views, None).is_none());
    }

    #[test]
    fn test_max_coverage_wins() {
        let (a, b, c) = (SourceId::from("a"), SourceId::from("b"), SourceId::from("c"));
        let (ba, bb, bc) = (
            buffer_with("a", &[11]),
            buffer_with("b", &[11]),
            buffer_with("c", &[10, 12]),
        );
        let views = [
            SourceView { id: &a, buffer: &ba, active: true },
            SourceView { id: &b, buffer: &bb, active: true },
            SourceView { id: &c, buffer: &bc, active: true },
        ];

        let choice = exact_only().select_reference(&views, None).unwrap();
        assert_eq!(choice.reference.frame_index, 11);
        assert_eq!(choice.coverage, 2);
    }

    #[test]
    fn test_ties_prefer_earliest_index() {
        let (a, b) = (SourceId::from("a"), SourceId::from("b"));
        let (ba, bb) = (buffer_with("a", &[4, 8]), buffer_with("b", &[4, 8]));
        let views = [
            SourceView { id: &a, buffer: &ba, active: true },
            SourceView { id: &b, buffer: &bb, active: true },
        ];
        let choice = exact_only().select_reference(&views, None).unwrap();
        assert_eq!(choice.reference.frame_index, 4);
        assert_eq!(choice.coverage, 2);
    }

    #[test]
    fn test_inactive_sources_do_not_score() {
        let (a, b, c) = (SourceId::from("a"), SourceId::from("b"), SourceId::from("c"));
        let (ba, bb, bc) = (
            buffer_with("a", &[5]),
            buffer_with("b", &[9]),
            buffer_with("c", &[9]),
        );
        let views = [
            SourceView { id: &a, buffer: &ba, active: true },
            SourceView { id: &b, buffer: &bb, active: false },
            SourceView { id: &c, buffer: &bc, active: false },
        ];
        let choice = exact_only().select_reference(&views, None).unwrap();
        assert_eq!(choice.reference.frame_index, 5);
        assert_eq!(choice.coverage, 1);
    }

    #[test]
    fn test_floor_excludes_older_candidates() {
        let (a, b) = (SourceId::from("a"), SourceId::from("b"));
        let (ba, bb) = (buffer_with("a", &[3, 7]), buffer_with("b", &[3]));
        let views = [
            SourceView { id: &a, buffer: &ba, active: true },
            SourceView { id: &b, buffer: &bb, active: true },
        ];
        let choice = exact_only().select_reference(&views, Some(5)).unwrap();
        assert_eq!(choice.reference.frame_index, 7);
        assert_eq!(choice.coverage, 1);

        assert!(exact_only().select_reference(&views, Some(8)).is_none());
    }

    #[test]
    fn test_window_admits_neighbouring_index() {
        // 100ms window at 30 Hz spans three frame intervals
        let aligner = Aligner::new(100.0, 1000.0 / 30.0);
        let reference = Reference {
            frame_index: 20,
            captured_at: None,
        };
        let buffer = buffer_with("a", &[14, 18, 23, 25]);
        let pos = aligner.pick(&buffer, &reference).unwrap();
        assert_eq!(buffer.get(pos).unwrap().frame_index(), 18);

        let far = buffer_with("a", &[1, 40]);
        assert!(aligner.pick(&far, &reference).is_none());
    }

    #[test]
    fn test_timestamps_override_index_ratio() {
        let aligner = Aligner::new(50.0, 1000.0 / 30.0);
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let reference = Reference {
            frame_index: 100,
            captured_at: Some(base),
        };

        // Index is far away but the capture time is 20ms off
        let near = RawFrame::new("b", 7, Vec::new())
            .with_captured_at(base + ChronoDuration::milliseconds(20));
        assert!((aligner.distance_ms(&reference, &near) - 20.0).abs() < 1e-9);

        // Same index, but captured 400ms later
        let late = RawFrame::new("b", 101, Vec::new())
            .with_captured_at(base + ChronoDuration::milliseconds(400));
        assert!(aligner.distance_ms(&reference, &late) > 50.0);

        // Missing timestamp falls back to the index ratio
        let untimed = RawFrame::new("b", 103, Vec::new());
        assert!((aligner.distance_ms(&reference, &untimed) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_assemble_consumes_and_reports_misses() {
        let aligner = exact_only();
        let (a, b) = (SourceId::from("a"), SourceId::from("b"));
        let mut buffers: BTreeMap<SourceId, SourceBuffer> = BTreeMap::new();
        buffers.insert(a.clone(), buffer_with("a", &[3, 4]));
        buffers.insert(b.clone(), buffer_with("b", &[9]));

        let reference = Reference {
            frame_index: 3,
            captured_at: None,
        };
        let alignment = aligner.assemble(&reference, buffers.iter_mut());

        assert!(alignment.per_source.contains_key(&a));
        assert!(alignment.missed_sources.contains(&b));
        assert_eq!(buffers[&a].len(), 1);
        assert_eq!(buffers[&b].len(), 1);
    }
}
