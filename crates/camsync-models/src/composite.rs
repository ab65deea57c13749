//! Time-aligned bundles of per-source entities.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{Entity, SourceId};

/// One aligned frame combining the best-matching frame from every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositeFrame {
    /// Frame index every contribution was aligned to
    pub reference_frame_index: u64,
    /// Wall-clock time the composite was produced
    pub produced_at: DateTime<Utc>,
    /// Entities contributed by each source
    pub per_source: BTreeMap<SourceId, Vec<Entity>>,
    /// Fraction of known sources that contributed (0.0-1.0)
    pub sync_accuracy: f64,
    /// Known sources with no frame close enough to the reference
    pub missed_sources: BTreeSet<SourceId>,
}

impl CompositeFrame {
    /// Number of sources that contributed.
    pub fn contributing_sources(&self) -> usize {
        self.per_source.len()
    }

    /// Entities contributed by `source`, if it contributed.
    pub fn entities(&self, source: &SourceId) -> Option<&[Entity]> {
        self.per_source.get(source).map(Vec::as_slice)
    }

    /// Total entity count across all sources.
    pub fn entity_count(&self) -> usize {
        self.per_source.values().map(Vec::len).sum()
    }
}

/// Accuracy of a composite given the known source count and misses.
///
/// An empty deployment has nothing to miss and scores 1.0.
pub fn sync_accuracy(total_sources: usize, missed: usize) -> f64 {
    if total_sources == 0 {
        return 1.0;
    }
    total_sources.saturating_sub(missed) as f64 / total_sources as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_accuracy_bounds() {
        assert_eq!(sync_accuracy(3, 0), 1.0);
        assert!((sync_accuracy(3, 1) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(sync_accuracy(3, 3), 0.0);
        assert_eq!(sync_accuracy(1, 0), 1.0);
        assert_eq!(sync_accuracy(0, 0), 1.0);
    }
}
