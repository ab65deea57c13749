//! Shared data models for CamSync.
//!
//! This crate provides Serde-serializable types for:
//! - Camera sources and per-frame entities
//! - Synchronizer configuration
//! - Composite (time-aligned) frames
//! - Cross-camera focus state
//! - NDJSON message envelopes exchanged with transports

pub mod composite;
pub mod config;
pub mod entity;
pub mod error;
pub mod focus;
pub mod geometry;
pub mod message;
pub mod source;

// Re-export common types
pub use composite::CompositeFrame;
pub use config::{SyncConfig, SyncConfigPatch, MAX_TARGET_RATE_HZ, MIN_TARGET_RATE_HZ};
pub use entity::{Entity, RawFrame};
pub use error::{ModelError, ModelResult};
pub use focus::FocusState;
pub use geometry::BoundingBox;
pub use message::{InboundMessage, OutboundEvent};
pub use source::SourceId;
