//! Named job counters shared by all phases of a run.
//!
//! Tasks receive a [`Counter`] handle up front instead of looking counters up per record;
//! the handle is a shared atomic, so parallel reducers can bump it freely. Every
//! [`REPORT_EVERY`] increments a counter logs its running total.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running totals are logged each time a counter crosses a multiple of this.
pub const REPORT_EVERY: u64 = 10_000;

pub const COMMENTS_IN: &str = "comments in";
pub const COMMENTS_USED: &str = "comments used";
pub const COMMENTS_MALFORMED: &str = "comments malformed";
pub const CLUSTERS: &str = "clusters";
pub const CLUSTER_IDS: &str = "cluster ids";
pub const SITE_SUMMARIES: &str = "site summaries";
pub const SUMMARY_IDS: &str = "summary ids";
pub const SITESUMMARY_ROWS: &str = "sitesummaries rows";
pub const CLUSTER_ROWS: &str = "clusters rows";
pub const COMMENT_ROWS: &str = "comments rows";

#[derive(Clone)]
pub struct Counter {
    name: &'static str,
    value: Arc<AtomicU64>,
}

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: u64) {
        let before = self.value.fetch_add(delta, Ordering::Relaxed);
        let after = before + delta;
        if after / REPORT_EVERY > before / REPORT_EVERY {
            tracing::info!(counter = self.name, value = after, "counter progress");
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of counters for one pipeline run. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct Counters {
    inner: Arc<Mutex<BTreeMap<&'static str, Arc<AtomicU64>>>>,
}

/// Point-in-time copy of all counters, in name order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot(pub BTreeMap<String, u64>);

impl CounterSnapshot {
    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the named counter, created at zero on first use.
    pub fn counter(&self, name: &'static str) -> Counter {
        let value = self.inner.lock().entry(name).or_default().clone();
        Counter { name, value }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.inner.lock().get(name).map(|v| v.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let guard = self.inner.lock();
        CounterSnapshot(
            guard
                .iter()
                .map(|(k, v)| (k.to_string(), v.load(Ordering::Relaxed)))
                .collect(),
        )
    }

    /// Log the final totals, one field per counter.
    pub fn log_totals(&self) {
        for (name, value) in self.snapshot().0 {
            tracing::info!(counter = %name, value, "counter total");
        }
    }
}
