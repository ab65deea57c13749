//! Synchronizer configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ModelError, ModelResult};

/// Highest accepted tick rate: one tick per millisecond.
pub const MAX_TARGET_RATE_HZ: f64 = 1000.0;
/// Lowest accepted tick rate: one tick every 1000 seconds.
pub const MIN_TARGET_RATE_HZ: f64 = 0.001;

/// Configuration for one synchronizer instance.
///
/// Immutable once handed to a synchronizer; changes replace it as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyncConfig {
    /// Frames older than this are evicted (milliseconds)
    pub max_frame_age_ms: u64,
    /// Maximum distance between a source frame and the reference (milliseconds)
    pub sync_window_ms: u64,
    /// Maximum buffered frames per source
    pub max_buffer_size: usize,
    /// Alignment tick rate, also used to convert frame indices to time
    pub target_rate_hz: f64,
    /// Drop frames older than the emitted reference to bound backlog
    pub allow_frame_skipping: bool,
    /// A source is inactive once it has been silent this long (milliseconds)
    pub inactivity_threshold_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_frame_age_ms: 1000,
            sync_window_ms: 100,
            max_buffer_size: 30,
            target_rate_hz: 30.0,
            allow_frame_skipping: true,
            inactivity_threshold_ms: 5000,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_frame_age_ms: env_or("SYNC_MAX_FRAME_AGE_MS", defaults.max_frame_age_ms),
            sync_window_ms: env_or("SYNC_WINDOW_MS", defaults.sync_window_ms),
            max_buffer_size: env_or("SYNC_MAX_BUFFER_SIZE", defaults.max_buffer_size),
            target_rate_hz: env_or("SYNC_TARGET_RATE_HZ", defaults.target_rate_hz),
            allow_frame_skipping: env_or(
                "SYNC_ALLOW_FRAME_SKIPPING",
                defaults.allow_frame_skipping,
            ),
            inactivity_threshold_ms: env_or(
                "SYNC_INACTIVITY_THRESHOLD_MS",
                defaults.inactivity_threshold_ms,
            ),
        }
    }

    /// Check that the config can drive a synchronizer.
    pub fn validate(&self) -> ModelResult<()> {
        if !(MIN_TARGET_RATE_HZ..=MAX_TARGET_RATE_HZ).contains(&self.target_rate_hz) {
            return Err(ModelError::invalid_config(format!(
                "target_rate_hz must be within {}..={}, got {}",
                MIN_TARGET_RATE_HZ, MAX_TARGET_RATE_HZ, self.target_rate_hz
            )));
        }
        if self.max_buffer_size == 0 {
            return Err(ModelError::invalid_config("max_buffer_size must be at least 1"));
        }
        if self.max_frame_age_ms == 0 {
            return Err(ModelError::invalid_config("max_frame_age_ms must be positive"));
        }
        Ok(())
    }

    /// Produce a new validated config with the patch applied.
    pub fn apply(&self, patch: &SyncConfigPatch) -> ModelResult<Self> {
        let next = Self {
            max_frame_age_ms: patch.max_frame_age_ms.unwrap_or(self.max_frame_age_ms),
            sync_window_ms: patch.sync_window_ms.unwrap_or(self.sync_window_ms),
            max_buffer_size: patch.max_buffer_size.unwrap_or(self.max_buffer_size),
            target_rate_hz: patch.target_rate_hz.unwrap_or(self.target_rate_hz),
            allow_frame_skipping: patch
                .allow_frame_skipping
                .unwrap_or(self.allow_frame_skipping),
            inactivity_threshold_ms: patch
                .inactivity_threshold_ms
                .unwrap_or(self.inactivity_threshold_ms),
        };
        next.validate()?;
        Ok(next)
    }

    /// Duration of one frame at `target_rate_hz`, in milliseconds.
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.target_rate_hz
    }

    /// Period of the alignment tick, clamped to the accepted rate range.
    pub fn tick_interval(&self) -> Duration {
        const SHORTEST: Duration = Duration::from_millis(1);
        const LONGEST: Duration = Duration::from_secs(1000);
        Duration::try_from_secs_f64(1.0 / self.target_rate_hz)
            .map_or(LONGEST, |period| period.clamp(SHORTEST, LONGEST))
    }

    pub fn max_frame_age(&self) -> Duration {
        Duration::from_millis(self.max_frame_age_ms)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_millis(self.inactivity_threshold_ms)
    }
}

/// Partial config update; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyncConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_age_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_buffer_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rate_hz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_frame_skipping: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactivity_threshold_ms: Option<u64>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
