//! NDJSON envelopes exchanged with transport collaborators.
//!
//! One JSON object per line; the `type` field selects the variant.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{CompositeFrame, Entity, FocusState, RawFrame, SourceId, SyncConfigPatch};

/// Messages accepted from a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A frame arriving from one source
    Frame(RawFrame),

    /// Select a subject as the cross-camera focus
    SelectFocus {
        source_id: SourceId,
        entity: Entity,
    },

    /// Drop the current focus
    ClearFocus,

    /// Replace configuration between ticks
    UpdateConfig(SyncConfigPatch),

    /// Forget a source entirely
    RemoveSource { source_id: SourceId },
}

/// Events published to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A time-aligned composite frame
    CompositeFrame(CompositeFrame),

    /// The focus was created, moved, updated or cleared
    FocusChanged { focus: Option<FocusState> },

    /// A non-fatal fault inside the synchronizer
    SyncError {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundEvent {
    /// Create a sync error event stamped with the current time.
    pub fn sync_error(message: impl Into<String>) -> Self {
        Self::SyncError {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a focus change event.
    pub fn focus_changed(focus: Option<FocusState>) -> Self {
        Self::FocusChanged { focus }
    }

    /// Event type name as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundEvent::CompositeFrame(_) => "composite_frame",
            OutboundEvent::FocusChanged { .. } => "focus_changed",
            OutboundEvent::SyncError { .. } => "sync_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    #[test]
    fn test_inbound_frame_parses() {
        let line = r#"{"type":"frame","source_id":"cam-a","frame_index":7,"entities":[]}"#;
        let msg: InboundMessage = serde_json::from_str(line).unwrap();
        match msg {
            InboundMessage::Frame(frame) => {
                assert_eq!(frame.source_id, SourceId::from("cam-a"));
                assert_eq!(frame.frame_index, 7);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_inbound_commands_parse() {
        let clear: InboundMessage = serde_json::from_str(r#"{"type":"clear_focus"}"#).unwrap();
        assert_eq!(clear, InboundMessage::ClearFocus);

        let update: InboundMessage =
            serde_json::from_str(r#"{"type":"update_config","max_buffer_size":5}"#).unwrap();
        assert_eq!(
            update,
            InboundMessage::UpdateConfig(SyncConfigPatch {
                max_buffer_size: Some(5),
                ..Default::default()
            })
        );

        let select: InboundMessage = serde_json::from_str(
            r#"{"type":"select_focus","source_id":"cam-a","entity":{"bbox":{"x1":0,"y1":0,"x2":5,"y2":5},"confidence":0.5}}"#,
        )
        .unwrap();
        assert!(matches!(select, InboundMessage::SelectFocus { .. }));
    }

    #[test]
    fn test_focus_changed_serializes_null() {
        let event = OutboundEvent::focus_changed(None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "focus_changed");
        assert!(json["focus"].is_null());
        assert_eq!(event.as_str(), "focus_changed");

        let focus = FocusState::from_detection(
            SourceId::from("cam-a"),
            &Entity::detection(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.5),
        );
        let json = serde_json::to_value(OutboundEvent::focus_changed(Some(focus))).unwrap();
        assert_eq!(json["focus"]["source_id"], "cam-a");
    }
}
