//! Worker configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub log_format: LogFormat,
    /// Address for the Prometheus scrape endpoint; metrics are off when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Input lines longer than this are rejected unparsed
    pub max_line_bytes: usize,
    /// How often to log a statistics snapshot; `None` disables it
    pub stats_log_interval: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_addr: None,
            max_line_bytes: 1024 * 1024,
            stats_log_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Unset variables fall back to defaults; set but unparseable ones are
    /// rejected.
    pub fn from_env() -> WorkerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WorkerResult<Self> {
        let defaults = Self::default();

        let max_line_bytes = match parse_var::<usize>(&lookup, "MAX_LINE_BYTES")? {
            Some(0) => return Err(WorkerError::config_error("MAX_LINE_BYTES must be positive")),
            Some(n) => n,
            None => defaults.max_line_bytes,
        };

        Ok(Self {
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            metrics_addr: parse_var(&lookup, "METRICS_ADDR")?,
            max_line_bytes,
            stats_log_interval: match parse_var::<u64>(&lookup, "STATS_LOG_INTERVAL_SECS")? {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.stats_log_interval,
            },
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> WorkerResult<Option<T>> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::config_error(format!("{} has invalid value {:?}", key, value))),
        _ => Ok(None),
    }
}
