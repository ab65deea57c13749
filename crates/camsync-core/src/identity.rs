//! Cross-camera identity resolution for the focused subject.
//!
//! Matching priority, first match wins:
//! 1. persistent id, searched in every source (own source first)
//! 2. tracker id within the focus's own source
//! 3. assignment key within the focus's own source
//! 4. bounding box closeness within the focus's own source
//!
//! A focus carrying a persistent id survives ticks where nothing matches; a
//! focus without one is lost as soon as its own source stops matching.

use std::collections::BTreeMap;

use camsync_models::{Entity, FocusState, SourceId};
use tracing::{debug, info};

/// Tunables for matching and association.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Maximum per-coordinate delta for two boxes to count as the same subject
    pub bbox_tolerance: f64,
    /// Minimum IoU for attaching a selected detection to a tracker entity
    pub min_association_iou: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            bbox_tolerance: 36.0,
            min_association_iou: 0.0,
        }
    }
}

impl ResolverConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            bbox_tolerance: std::env::var("FOCUS_BBOX_TOLERANCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(36.0),
            min_association_iou: std::env::var("FOCUS_MIN_ASSOCIATION_IOU")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0),
        }
    }
}

/// Which rule matched the focused subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    PersistentId,
    TrackId,
    AssignmentKey,
    Geometry,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchKind::PersistentId => write!(f, "persistent_id"),
            MatchKind::TrackId => write!(f, "track_id"),
            MatchKind::AssignmentKey => write!(f, "assignment_key"),
            MatchKind::Geometry => write!(f, "geometry"),
        }
    }
}

/// Result of resolving a focus against the newest data.
#[derive(Debug, Clone, PartialEq)]
pub enum FocusOutcome {
    /// Found in its own source
    Updated {
        focus: FocusState,
        matched_by: MatchKind,
    },
    /// Found by persistent id in another source
    HandedOff { focus: FocusState, from: SourceId },
    /// Not found, kept because the persistent id is known
    Retained,
    /// Not found and no persistent id: the focus must be cleared
    Lost,
}

/// Stateless resolver; the focus itself is owned by the synchronizer.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    config: ResolverConfig,
}

impl IdentityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Decide whether the focused subject is still present, and where.
    ///
    /// `newest` holds the most recent entities of each source.
    pub fn resolve(
        &self,
        focus: &FocusState,
        newest: &BTreeMap<SourceId, Vec<Entity>>,
    ) -> FocusOutcome {
        if let Some(pid) = focus.persistent_id.as_deref() {
            let own = newest.get_key_value(&focus.source_id);
            let others = newest.iter().filter(|(source, _)| **source != focus.source_id);

            for (source, entities) in own.into_iter().chain(others) {
                let Some(entity) = entities
                    .iter()
                    .find(|e| e.persistent_id.as_deref() == Some(pid))
                else {
                    continue;
                };

                let next = focus.follow(source, entity);
                if *source == focus.source_id {
                    return FocusOutcome::Updated {
                        focus: next,
                        matched_by: MatchKind::PersistentId,
                    };
                }
                info!(
                    persistent_id = pid,
                    from = %focus.source_id,
                    to = %source,
                    "Focus handed off to another camera"
                );
                return FocusOutcome::HandedOff {
                    focus: next,
                    from: focus.source_id.clone(),
                };
            }
        }

        let own_entities = newest
            .get(&focus.source_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        if let Some((entity, matched_by)) = self.match_in_source(focus, own_entities) {
            debug!(source = %focus.source_id, %matched_by, "Focus matched");
            return FocusOutcome::Updated {
                focus: focus.follow(&focus.source_id, entity),
                matched_by,
            };
        }

        if focus.persistent_id.is_some() {
            debug!(source = %focus.source_id, "Focus absent, retained by persistent id");
            FocusOutcome::Retained
        } else {
            FocusOutcome::Lost
        }
    }

    fn match_in_source<'e>(
        &self,
        focus: &FocusState,
        entities: &'e [Entity],
    ) -> Option<(&'e Entity, MatchKind)> {
        // An entity upstream already identified as someone else is never a candidate
        let compatible = |e: &&Entity| match (&e.persistent_id, &focus.persistent_id) {
            (Some(theirs), Some(ours)) => theirs == ours,
            _ => true,
        };

        if let Some(track_id) = focus.track_id {
            if let Some(e) = entities
                .iter()
                .filter(compatible)
                .find(|e| e.track_id == Some(track_id))
            {
                return Some((e, MatchKind::TrackId));
            }
        }

        if let Some(key) = focus.track_key.as_deref() {
            if let Some(e) = entities
                .iter()
                .filter(compatible)
                .find(|e| e.assignment_key.as_deref() == Some(key))
            {
                return Some((e, MatchKind::AssignmentKey));
            }
        }

        entities
            .iter()
            .filter(compatible)
            .filter(|e| e.bbox.is_close(&focus.last_bbox, self.config.bbox_tolerance))
            .min_by(|a, b| {
                let da = a.bbox.max_corner_delta(&focus.last_bbox);
                let db = b.bbox.max_corner_delta(&focus.last_bbox);
                da.total_cmp(&db)
            })
            .map(|e| (e, MatchKind::Geometry))
    }

    /// Build a new focus from an externally selected entity.
    ///
    /// Detection-only selections are associated with a tracker entity of the
    /// same source: direct track id, then assignment key, then best IoU with
    /// ties broken by the closest center. With no tracker entity available the
    /// focus keeps detection-only fields.
    pub fn associate(
        &self,
        source: &SourceId,
        selected: &Entity,
        candidates: &[Entity],
    ) -> FocusState {
        let detection_key = selected.detection_key(source);
        let trackers: Vec<&Entity> = candidates.iter().filter(|e| e.is_tracked()).collect();

        if let Some(track_id) = selected.track_id {
            let track = trackers
                .iter()
                .copied()
                .find(|e| e.track_id == Some(track_id))
                .unwrap_or(selected);
            return FocusState::from_track(source.clone(), track, detection_key);
        }

        if let Some(key) = selected.assignment_key.as_deref() {
            if let Some(track) = trackers
                .iter()
                .copied()
                .find(|e| e.assignment_key.as_deref() == Some(key))
            {
                return FocusState::from_track(source.clone(), track, detection_key);
            }
        }

        let mut best: Option<(&Entity, f64, f64)> = None;
        for track in trackers {
            let iou = selected.bbox.iou(&track.bbox);
            if iou < self.config.min_association_iou {
                continue;
            }
            let distance = selected.bbox.center_distance(&track.bbox);
            let better = match best {
                None => true,
                Some((_, best_iou, best_distance)) => {
                    iou > best_iou || (iou == best_iou && distance < best_distance)
                }
            };
            if better {
                best = Some((track, iou, distance));
            }
        }

        match best {
            Some((track, iou, _)) => {
                debug!(
                    source = %source,
                    track_id = ?track.track_id,
                    iou = format!("{:.3}", iou),
                    "Detection associated with track"
                );
                FocusState::from_track(source.clone(), track, detection_key)
            }
            None => FocusState::from_detection(source.clone(), selected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camsync_models::BoundingBox;

    fn bbox(coords: [f64; 4]) -> BoundingBox {
        BoundingBox::from_array(coords)
    }

    fn newest(entries: Vec<(&str, Vec<Entity>)>) -> BTreeMap<SourceId, Vec<Entity>> {
        entries
            .into_iter()
            .map(|(s, e)| (SourceId::from(s), e))
            .collect()
    }

    #[test]
    fn test_associate_detection_by_iou() {
        let resolver = IdentityResolver::default();
        let source = SourceId::from("cam-a");
        let detection = Entity::detection(bbox([100.0, 100.0, 150.0, 200.0]), 0.9).with_detector_id(3);
        let trackers = vec![
            Entity::tracked(bbox([102.0, 101.0, 149.0, 199.0]), 0.8, 7),
            Entity::tracked(bbox([500.0, 500.0, 550.0, 550.0]), 0.8, 8),
        ];

        let focus = resolver.associate(&source, &detection, &trackers);
        assert_eq!(focus.track_id, Some(7));
        assert_eq!(focus.track_key.as_deref(), Some("cam-a:7"));
        assert_eq!(focus.detection_key.as_deref(), Some("cam-a:det:3"));
        assert_eq!(focus.last_bbox, trackers[0].bbox);
    }

    #[test]
    fn test_associate_prefers_track_id_then_key() {
        let resolver = IdentityResolver::default();
        let source = SourceId::from("cam-a");
        let trackers = vec![
            Entity::tracked(bbox([0.0, 0.0, 10.0, 10.0]), 0.8, 1).with_assignment_key("cam-a_t1"),
            Entity::tracked(bbox([300.0, 300.0, 310.0, 310.0]), 0.8, 2)
                .with_assignment_key("cam-a_t2")
                .with_persistent_id("p-2"),
        ];

        // Overlaps track 1 geometrically but names track 2
        let by_id = Entity::tracked(bbox([0.0, 0.0, 10.0, 10.0]), 0.9, 2);
        let focus = resolver.associate(&source, &by_id, &trackers);
        assert_eq!(focus.track_id, Some(2));
        assert_eq!(focus.persistent_id.as_deref(), Some("p-2"));

        let by_key = Entity::detection(bbox([0.0, 0.0, 10.0, 10.0]), 0.9).with_assignment_key("cam-a_t2");
        let focus = resolver.associate(&source, &by_key, &trackers);
        assert_eq!(focus.track_key.as_deref(), Some("cam-a_t2"));
    }

    #[test]
    fn test_associate_tie_break_by_center_distance() {
        let resolver = IdentityResolver::default();
        let source = SourceId::from("cam-a");
        let detection = Entity::detection(bbox([0.0, 0.0, 10.0, 10.0]), 0.9);
        // Neither overlaps; IoU ties at zero so the closer center wins
        let trackers = vec![
            Entity::tracked(bbox([100.0, 100.0, 110.0, 110.0]), 0.8, 1),
            Entity::tracked(bbox([20.0, 0.0, 30.0, 10.0]), 0.8, 2),
        ];
        let focus = resolver.associate(&source, &detection, &trackers);
        assert_eq!(focus.track_id, Some(2));
    }

    #[test]
    fn test_associate_min_iou_gate() {
        let resolver = IdentityResolver::new(ResolverConfig {
            min_association_iou: 0.3,
            ..Default::default()
        });
        let source = SourceId::from("cam-a");
        let detection = Entity::detection(bbox([0.0, 0.0, 10.0, 10.0]), 0.9);
        let trackers = vec![Entity::tracked(bbox([5.0, 5.0, 15.0, 15.0]), 0.8, 1)];

        let focus = resolver.associate(&source, &detection, &trackers);
        assert!(focus.track_key.is_none());
    }

    #[test]
    fn test_associate_without_trackers_is_detection_only() {
        let resolver = IdentityResolver::default();
        let source = SourceId::from("cam-a");
        let detection = Entity::detection(bbox([0.0, 0.0, 10.0, 10.0]), 0.9).with_detector_id(5);
        let focus = resolver.associate(&source, &detection, &[detection.clone()]);

        assert!(focus.track_key.is_none());
        assert!(focus.track_id.is_none());
        assert_eq!(focus.detection_key.as_deref(), Some("cam-a:det:5"));
    }

    #[test]
    fn test_resolve_priority_order() {
        let resolver = IdentityResolver::default();
        let source = SourceId::from("cam-a");
        let track = Entity::tracked(bbox([0.0, 0.0, 50.0, 50.0]), 0.9, 4);
        let focus = FocusState::from_track(source.clone(), &track, None);

        // Track id wins over a closer box
        let data = newest(vec![(
            "cam-a",
            vec![
                Entity::detection(bbox([0.0, 0.0, 50.0, 50.0]), 0.9),
                Entity::tracked(bbox([200.0, 0.0, 250.0, 50.0]), 0.9, 4),
            ],
        )]);
        match resolver.resolve(&focus, &data) {
            FocusOutcome::Updated { focus, matched_by } => {
                assert_eq!(matched_by, MatchKind::TrackId);
                assert_eq!(focus.last_bbox.x1, 200.0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Geometry when ids disagree
        let data = newest(vec![(
            "cam-a",
            vec![Entity::tracked(bbox([10.0, 10.0, 60.0, 60.0]), 0.9, 99)],
        )]);
        match resolver.resolve(&focus, &data) {
            FocusOutcome::Updated { focus, matched_by } => {
                assert_eq!(matched_by, MatchKind::Geometry);
                assert_eq!(focus.track_id, Some(99));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_by_assignment_key() {
        let resolver = IdentityResolver::default();
        let source = SourceId::from("cam-a");
        let track = Entity::tracked(bbox([0.0, 0.0, 50.0, 50.0]), 0.9, 4).with_assignment_key("cam-a_4");
        let focus = FocusState::from_track(source, &track, None);

        let data = newest(vec![(
            "cam-a",
            vec![Entity::detection(bbox([400.0, 0.0, 450.0, 50.0]), 0.9).with_assignment_key("cam-a_4")],
        )]);
        assert!(matches!(
            resolver.resolve(&focus, &data),
            FocusOutcome::Updated {
                matched_by: MatchKind::AssignmentKey,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_without_persistent_id_is_lost() {
        let resolver = IdentityResolver::default();
        let focus = FocusState::from_detection(
            SourceId::from("cam-a"),
            &Entity::detection(bbox([0.0, 0.0, 50.0, 50.0]), 0.9),
        );
        let data = newest(vec![
            ("cam-a", vec![Entity::detection(bbox([300.0, 300.0, 350.0, 350.0]), 0.9)]),
            ("cam-b", vec![Entity::detection(bbox([0.0, 0.0, 50.0, 50.0]), 0.9)]),
        ]);
        assert_eq!(resolver.resolve(&focus, &data), FocusOutcome::Lost);
    }

    #[test]
    fn test_resolve_persistent_id_hand_off_and_retain() {
        let resolver = IdentityResolver::default();
        let track = Entity::tracked(bbox([0.0, 0.0, 50.0, 50.0]), 0.9, 4).with_persistent_id("p-9");
        let focus = FocusState::from_track(SourceId::from("cam-a"), &track, None);

        let empty = newest(vec![("cam-a", Vec::new()), ("cam-b", Vec::new())]);
        assert_eq!(resolver.resolve(&focus, &empty), FocusOutcome::Retained);

        let seen = newest(vec![
            ("cam-a", Vec::new()),
            (
                "cam-b",
                vec![Entity::tracked(bbox([500.0, 0.0, 550.0, 50.0]), 0.9, 12).with_persistent_id("p-9")],
            ),
        ]);
        match resolver.resolve(&focus, &seen) {
            FocusOutcome::HandedOff { focus, from } => {
                assert_eq!(from, SourceId::from("cam-a"));
                assert_eq!(focus.source_id, SourceId::from("cam-b"));
                assert_eq!(focus.track_id, Some(12));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_skips_entities_with_other_persistent_id() {
        let resolver = IdentityResolver::default();
        let track = Entity::tracked(bbox([0.0, 0.0, 50.0, 50.0]), 0.9, 4).with_persistent_id("p-1");
        let focus = FocusState::from_track(SourceId::from("cam-a"), &track, None);

        let data = newest(vec![(
            "cam-a",
            vec![Entity::tracked(bbox([0.0, 0.0, 50.0, 50.0]), 0.9, 4).with_persistent_id("p-2")],
        )]);
        assert_eq!(resolver.resolve(&focus, &data), FocusOutcome::Retained);
    }
}
