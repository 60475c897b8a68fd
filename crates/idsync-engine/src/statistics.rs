//! Pass counters.
//!
//! Workers update [`Counters`] concurrently; a pass reads them once at the
//! end through [`Counters::snapshot`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use idsync_connector::ModificationType;
use serde::{Deserialize, Serialize};

/// Counters of one pass, as reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounters {
    /// Pivots processed.
    #[serde(default)]
    pub seen: u64,
    /// Pivots for which a change was computed, applied or not.
    #[serde(default)]
    pub attempted: u64,
    /// Changes successfully applied.
    #[serde(default)]
    pub applied: u64,
    /// Pivots whose unit failed.
    #[serde(default)]
    pub errored: u64,
    /// Applied changes broken down by modification type.
    #[serde(default)]
    pub applied_by_modification: BTreeMap<String, u64>,
}

impl PassCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applied count for one modification type.
    #[must_use]
    pub fn applied_count(&self, modification: ModificationType) -> u64 {
        self.applied_by_modification
            .get(modification.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Aggregate another pass into this one.
    pub fn merge(&mut self, other: &PassCounters) {
        self.seen += other.seen;
        self.attempted += other.attempted;
        self.applied += other.applied;
        self.errored += other.errored;
        for (key, value) in &other.applied_by_modification {
            *self.applied_by_modification.entry(key.clone()).or_insert(0) += value;
        }
    }
}

/// Thread-safe counters shared by the units of a pass.
#[derive(Debug, Default)]
pub struct Counters {
    seen: AtomicU64,
    attempted: AtomicU64,
    applied: AtomicU64,
    errored: AtomicU64,
    applied_by_modification: RwLock<HashMap<ModificationType, u64>>,
}

impl Counters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_seen(&self) {
        self.seen.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_applied(&self, modification: ModificationType) {
        self.applied.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut map) = self.applied_by_modification.write() {
            *map.entry(modification).or_insert(0) += 1;
        }
    }

    pub fn record_error(&self) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::SeqCst)
    }

    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::SeqCst)
    }

    /// Snapshot current counters.
    pub fn snapshot(&self) -> PassCounters {
        let applied_by_modification = self
            .applied_by_modification
            .read()
            .map(|map| map.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();

        PassCounters {
            seen: self.seen.load(Ordering::SeqCst),
            attempted: self.attempted.load(Ordering::SeqCst),
            applied: self.applied.load(Ordering::SeqCst),
            errored: self.errored.load(Ordering::SeqCst),
            applied_by_modification,
        }
    }
}
