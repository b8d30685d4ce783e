use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const TICKS_TOTAL: &str = "lease_elector_ticks_total";
pub const ACQUIRED_TOTAL: &str = "lease_elector_acquired_total";
pub const RENEWED_TOTAL: &str = "lease_elector_renewed_total";
pub const CONFLICTS_TOTAL: &str = "lease_elector_conflicts_total";
pub const STORE_ERRORS_TOTAL: &str = "lease_elector_store_errors_total";
pub const RELEASES_TOTAL: &str = "lease_elector_releases_total";
pub const GUARDED_RUNS_TOTAL: &str = "lease_elector_guarded_runs_total";
pub const IS_LEADER: &str = "lease_elector_is_leader";

/// A lightweight, thread-safe metrics registry that renders in Prometheus text exposition format.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Counter>>,
    gauges: RwLock<BTreeMap<String, Gauge>>,
}

/// Monotonically increasing counter.
struct Counter {
    value: AtomicU64,
    help: String,
}

/// Value that can go up or down.
struct Gauge {
    value: AtomicI64,
    help: String,
}

// Metric updates never panic; a poisoned lock still holds usable atomics.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// A registry with every elector metric pre-registered.
    pub fn for_elector() -> Self {
        let registry = Self::new();
        registry.register_counter(TICKS_TOTAL, "Election ticks evaluated");
        registry.register_counter(ACQUIRED_TOTAL, "Leases taken from a free or expired state");
        registry.register_counter(RENEWED_TOTAL, "Lease renewals by the current holder");
        registry.register_counter(CONFLICTS_TOTAL, "Conditional writes lost to another writer");
        registry.register_counter(STORE_ERRORS_TOTAL, "Lease store calls that failed");
        registry.register_counter(RELEASES_TOTAL, "Leases released on shutdown");
        registry.register_counter(GUARDED_RUNS_TOTAL, "Leader-only duties executed");
        registry.register_gauge(IS_LEADER, "1 when the last tick left this instance leader");
        registry
    }

    /// Register a counter. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str) {
        write(&self.counters)
            .entry(name.to_string())
            .or_insert_with(|| Counter {
                value: AtomicU64::new(0),
                help: help.to_string(),
            });
    }

    /// Register a gauge. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| Gauge {
                value: AtomicI64::new(0),
                help: help.to_string(),
            });
    }

    /// Increment a counter by 1.
    pub fn counter_inc(&self, name: &str) {
        if let Some(c) = read(&self.counters).get(name) {
            c.value.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn counter_value(&self, name: &str) -> Option<u64> {
        read(&self.counters)
            .get(name)
            .map(|c| c.value.load(Ordering::Relaxed))
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, val: i64) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.value.store(val, Ordering::Relaxed);
        }
    }

    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        read(&self.gauges)
            .get(name)
            .map(|g| g.value.load(Ordering::Relaxed))
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        for (name, counter) in read(&self.counters).iter() {
            output.push_str(&format!("# HELP {} {}\n", name, counter.help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!(
                "{} {}\n",
                name,
                counter.value.load(Ordering::Relaxed)
            ));
        }

        for (name, gauge) in read(&self.gauges).iter() {
            output.push_str(&format!("# HELP {} {}\n", name, gauge.help));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&format!(
                "{} {}\n",
                name,
                gauge.value.load(Ordering::Relaxed)
            ));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
