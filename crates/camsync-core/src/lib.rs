//! Multi-camera frame synchronization and focus identity resolution.
//!
//! This crate provides:
//! - Per-source bounded frame buffers with an age/capacity drop policy
//! - Coverage-maximizing alignment of frames into composite frames
//! - Cross-camera identity resolution for a single focused subject
//! - Statistics and health classification
//! - A tokio runtime that drives the engine on a fixed tick
//!
//! The engine ([`FrameSynchronizer`]) is synchronous and single-owner; the
//! runtime ([`SyncRuntime`]) wraps it in one task and exposes a cloneable
//! [`SyncHandle`] to producers.

pub mod aligner;
pub mod buffer;
pub mod error;
pub mod events;
pub mod identity;
pub mod metrics;
pub mod policy;
pub mod runtime;
pub mod stats;
pub mod synchronizer;


pub use aligner::{Aligner, Reference};
pub use buffer::{BufferedFrame, SourceBuffer};
pub use error::{BoxError, SyncError, SyncResult};
pub use events::{EventBus, HandlerResult};
pub use identity::{FocusOutcome, IdentityResolver, MatchKind, ResolverConfig};
pub use policy::{DropPolicy, DropReason, Evictions};
pub use runtime::{Command, SyncHandle, SyncRuntime};
pub use stats::{SourceStatsView, StatisticsSnapshot, SyncHealth};
pub use synchronizer::FrameSynchronizer;
