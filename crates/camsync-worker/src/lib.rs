//! NDJSON transport worker for the frame synchronizer.
//!
//! Reads frames and focus commands from stdin, drives a
//! [`camsync_core::SyncRuntime`] and writes emitted events to stdout.

pub mod config;
pub mod error;
pub mod transport;

pub use config::{LogFormat, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use transport::{attach_event_sink, read_commands, write_events, ReadSummary};
