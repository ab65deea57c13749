//! Prometheus-style metrics emitted by the synchronizer.
//!
//! Uses the `metrics` facade; nothing is recorded until a recorder is
//! installed by the hosting binary.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    // Ingestion
    pub const FRAMES_RECEIVED_TOTAL: &str = "camsync_frames_received_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "camsync_frames_dropped_total";
    pub const BUFFER_DEPTH: &str = "camsync_buffer_depth";

    // Alignment
    pub const COMPOSITES_EMITTED_TOTAL: &str = "camsync_composites_emitted_total";
    pub const SYNC_ACCURACY: &str = "camsync_sync_accuracy";
    pub const SYNC_ACCURACY_AVG: &str = "camsync_sync_accuracy_avg";

    // Identity
    pub const FOCUS_HANDOFFS_TOTAL: &str = "camsync_focus_handoffs_total";
    pub const FOCUS_CLEARED_TOTAL: &str = "camsync_focus_cleared_total";

    // Faults
    pub const SYNC_ERRORS_TOTAL: &str = "camsync_sync_errors_total";
}

/// Record a received frame.
pub fn record_frame_received(source: &str) {
    counter!(names::FRAMES_RECEIVED_TOTAL, "source" => source.to_string()).increment(1);
}

/// Record dropped frames for a source.
pub fn record_frames_dropped(source: &str, reason: &'static str, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        names::FRAMES_DROPPED_TOTAL,
        "source" => source.to_string(),
        "reason" => reason
    )
    .increment(count);
}

/// Record the current buffer depth of a source.
pub fn record_buffer_depth(source: &str, depth: usize) {
    gauge!(names::BUFFER_DEPTH, "source" => source.to_string()).set(depth as f64);
}

/// Record an emitted composite frame.
pub fn record_composite(sync_accuracy: f64, average_accuracy: f64) {
    counter!(names::COMPOSITES_EMITTED_TOTAL).increment(1);
    gauge!(names::SYNC_ACCURACY).set(sync_accuracy);
    gauge!(names::SYNC_ACCURACY_AVG).set(average_accuracy);
}

/// Record a cross-camera focus hand-off.
pub fn record_focus_handoff(from: &str, to: &str) {
    counter!(
        names::FOCUS_HANDOFFS_TOTAL,
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a focus lost to absence.
pub fn record_focus_cleared() {
    counter!(names::FOCUS_CLEARED_TOTAL).increment(1);
}

/// Record a sync error.
pub fn record_sync_error(kind: &'static str) {
    counter!(names::SYNC_ERRORS_TOTAL, "kind" => kind).increment(1);
}
