//! Per leaf hub conflation counters.

use std::collections::BTreeMap;
use std::fmt;

/// Counters of one leaf hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStatistics {
    /// Bundles handled successfully.
    pub processed: u64,
    /// Bundles dropped as stale (old version, old incarnation or duplicate).
    pub stale: u64,
    /// Bundles whose handler returned an error.
    pub failed: u64,
    /// Pending complete-state bundles overwritten by a newer one.
    pub replaced: u64,
}

impl fmt::Display for HubStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} stale={} failed={} replaced={}",
            self.processed, self.stale, self.failed, self.replaced
        )
    }
}

/// Snapshot of every leaf hub's counters, keyed by leaf hub name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflationStatistics {
    pub hubs: BTreeMap<String, HubStatistics>,
}

impl ConflationStatistics {
    pub fn hub(&self, leaf_hub: &str) -> HubStatistics {
        self.hubs.get(leaf_hub).copied().unwrap_or_default()
    }

    /// Sum over all leaf hubs.
    pub fn total(&self) -> HubStatistics {
        self.hubs
            .values()
            .fold(HubStatistics::default(), |acc, s| HubStatistics {
                processed: acc.processed + s.processed,
                stale: acc.stale + s.stale,
                failed: acc.failed + s.failed,
                replaced: acc.replaced + s.replaced,
            })
    }
}
