//! Focus state for cross-camera subject highlighting.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{BoundingBox, Entity, SourceId};

/// The subject currently selected for cross-camera highlighting.
///
/// Exists only while a subject is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FocusState {
    /// Source currently owning the focused subject
    pub source_id: SourceId,
    /// Tracker id within `source_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
    /// Assignment key of the focused track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_key: Option<String>,
    /// Cross-camera identity, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
    /// Last bounding box the subject was seen at
    pub last_bbox: BoundingBox,
    /// Key of the detection the focus was selected from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_key: Option<String>,
}

impl FocusState {
    /// Focus built from a detection with no tracker association.
    pub fn from_detection(source_id: SourceId, detection: &Entity) -> Self {
        Self {
            detection_key: detection.detection_key(&source_id),
            track_id: None,
            track_key: None,
            persistent_id: detection.persistent_id.clone(),
            last_bbox: detection.bbox,
            source_id,
        }
    }

    /// Focus attached to a tracker entity.
    pub fn from_track(source_id: SourceId, track: &Entity, detection_key: Option<String>) -> Self {
        Self {
            track_id: track.track_id,
            track_key: track.track_key(&source_id),
            persistent_id: track.persistent_id.clone(),
            last_bbox: track.bbox,
            detection_key,
            source_id,
        }
    }

    /// Whether the focus is attached to a tracker track.
    pub fn is_tracked(&self) -> bool {
        self.track_key.is_some()
    }

    /// Copy of this focus following `entity`, possibly in another source.
    ///
    /// Track identity is replaced when the entity carries one; a persistent id
    /// is never forgotten once learned.
    pub fn follow(&self, source_id: &SourceId, entity: &Entity) -> Self {
        let moved = source_id != &self.source_id;
        let (track_id, track_key) = if entity.is_tracked() || moved {
            (entity.track_id, entity.track_key(source_id))
        } else {
            (self.track_id, self.track_key.clone())
        };

        Self {
            source_id: source_id.clone(),
            track_id,
            track_key,
            persistent_id: entity
                .persistent_id
                .clone()
                .or_else(|| self.persistent_id.clone()),
            last_bbox: entity.bbox,
            detection_key: if moved { None } else { self.detection_key.clone() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_within_source_keeps_keys() {
        let source = SourceId::from("cam-a");
        let track = Entity::tracked(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 3);
        let focus = FocusState::from_track(source.clone(), &track, Some("cam-a:det:1".into()));

        let moved_box = Entity::detection(BoundingBox::new(2.0, 2.0, 12.0, 12.0), 0.8);
        let next = focus.follow(&source, &moved_box);

        assert_eq!(next.track_id, Some(3));
        assert_eq!(next.track_key.as_deref(), Some("cam-a:3"));
        assert_eq!(next.detection_key.as_deref(), Some("cam-a:det:1"));
        assert_eq!(next.last_bbox, moved_box.bbox);
    }

    #[test]
    fn test_follow_into_other_source_adopts_its_track() {
        let source = SourceId::from("cam-a");
        let track = Entity::tracked(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 3)
            .with_persistent_id("person-1");
        let focus = FocusState::from_track(source, &track, None);

        let other = SourceId::from("cam-b");
        let seen = Entity::tracked(BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0.9, 11)
            .with_persistent_id("person-1");
        let next = focus.follow(&other, &seen);

        assert_eq!(next.source_id, other);
        assert_eq!(next.track_id, Some(11));
        assert_eq!(next.track_key.as_deref(), Some("cam-b:11"));
        assert_eq!(next.persistent_id.as_deref(), Some("person-1"));
    }
}
