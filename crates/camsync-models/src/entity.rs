//! Per-source frames and the subjects detected in them.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::{BoundingBox, SourceId};

/// One detected/tracked subject within a single source's frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    /// Bounding box in source coordinates
    pub bbox: BoundingBox,
    /// Detection/tracking confidence (0.0-1.0)
    pub confidence: f64,
    /// Detector-local identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector_id: Option<u64>,
    /// Tracker identifier, stable within one source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
    /// Precomputed key combining source and track id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_key: Option<String>,
    /// Cross-camera identity assigned upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
}

impl Entity {
    /// Create a detection-only entity.
    pub fn detection(bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            bbox,
            confidence,
            detector_id: None,
            track_id: None,
            assignment_key: None,
            persistent_id: None,
        }
    }

    /// Create a tracker entity.
    pub fn tracked(bbox: BoundingBox, confidence: f64, track_id: u64) -> Self {
        Self {
            track_id: Some(track_id),
            ..Self::detection(bbox, confidence)
        }
    }

    /// Builder: set the detector id.
    pub fn with_detector_id(mut self, detector_id: u64) -> Self {
        self.detector_id = Some(detector_id);
        self
    }

    /// Builder: set the assignment key.
    pub fn with_assignment_key(mut self, key: impl Into<String>) -> Self {
        self.assignment_key = Some(key.into());
        self
    }

    /// Builder: set the persistent id.
    pub fn with_persistent_id(mut self, id: impl Into<String>) -> Self {
        self.persistent_id = Some(id.into());
        self
    }

    /// Whether the entity came from the tracker.
    pub fn is_tracked(&self) -> bool {
        self.track_id.is_some()
    }

    /// Stable key for this entity's track within `source`.
    ///
    /// Prefers the upstream assignment key; otherwise derives one from the track id.
    pub fn track_key(&self, source: &SourceId) -> Option<String> {
        match (&self.assignment_key, self.track_id) {
            (Some(key), _) => Some(key.clone()),
            (None, Some(track_id)) => Some(format!("{}:{}", source, track_id)),
            (None, None) => None,
        }
    }

    /// Key identifying the detection this entity originated from.
    pub fn detection_key(&self, source: &SourceId) -> Option<String> {
        self.detector_id
            .map(|detector_id| format!("{}:det:{}", source, detector_id))
    }

    fn validate(&self) -> ModelResult<()> {
        if !self.bbox.is_finite() {
            return Err(ModelError::NonFiniteValue { field: "bbox" });
        }
        if !self.confidence.is_finite() {
            return Err(ModelError::NonFiniteValue { field: "confidence" });
        }
        if self.bbox.x2 < self.bbox.x1 || self.bbox.y2 < self.bbox.y1 {
            return Err(ModelError::invalid_geometry(format!(
                "inverted box [{}, {}, {}, {}]",
                self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2
            )));
        }
        Ok(())
    }
}

/// A frame as received from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawFrame {
    /// Source that produced the frame
    pub source_id: SourceId,
    /// Monotonic frame index within the source
    pub frame_index: u64,
    /// Capture timestamp, when the source provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    /// Entities in detector/tracker order
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl RawFrame {
    /// Create a frame without a capture timestamp.
    pub fn new(source_id: impl Into<SourceId>, frame_index: u64, entities: Vec<Entity>) -> Self {
        Self {
            source_id: source_id.into(),
            frame_index,
            captured_at: None,
            entities,
        }
    }

    /// Builder: set the capture timestamp.
    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = Some(captured_at);
        self
    }

    /// Reject frames with non-finite or impossible geometry.
    pub fn validate(&self) -> ModelResult<()> {
        self.entities.iter().try_for_each(Entity::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_normal_frame() {
        let frame = RawFrame::new(
            "cam-a",
            3,
            vec![Entity::tracked(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9, 1)],
        );
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nan_and_inverted_boxes() {
        let nan = RawFrame::new(
            "cam-a",
            1,
            vec![Entity::detection(BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0), 0.5)],
        );
        assert_eq!(
            nan.validate(),
            Err(ModelError::NonFiniteValue { field: "bbox" })
        );

        let inverted = RawFrame::new(
            "cam-a",
            1,
            vec![Entity::detection(BoundingBox::new(10.0, 0.0, 1.0, 1.0), 0.5)],
        );
        assert!(matches!(
            inverted.validate(),
            Err(ModelError::InvalidGeometry(_))
        ));

        let confidence = RawFrame::new(
            "cam-a",
            1,
            vec![Entity::detection(BoundingBox::new(0.0, 0.0, 1.0, 1.0), f64::INFINITY)],
        );
        assert!(confidence.validate().is_err());
    }

    #[test]
    fn test_track_key_prefers_assignment_key() {
        let source = SourceId::from("cam-a");
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);

        let keyed = Entity::tracked(bbox, 0.9, 4).with_assignment_key("cam-a_track_4");
        assert_eq!(keyed.track_key(&source).as_deref(), Some("cam-a_track_4"));

        let derived = Entity::tracked(bbox, 0.9, 4);
        assert_eq!(derived.track_key(&source).as_deref(), Some("cam-a:4"));

        assert!(Entity::detection(bbox, 0.9).track_key(&source).is_none());
    }

    #[test]
    fn test_frame_deserializes_with_optional_fields_missing() {
        let json = r#"{
            "source_id": "cam-b",
            "frame_index": 42,
            "entities": [
                {"bbox": {"x1": 1.0, "y1": 2.0, "x2": 3.0, "y2": 4.0}, "confidence": 0.7, "track_id": 9}
            ]
        }"#;
        let frame: RawFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.source_id.as_str(), "cam-b");
        assert!(frame.captured_at.is_none());
        assert_eq!(frame.entities[0].track_id, Some(9));
        assert!(frame.entities[0].persistent_id.is_none());
    }
}
