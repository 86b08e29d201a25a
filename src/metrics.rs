//! The node's metrics registry (spec.md §3, "Server metrics").
//!
//! Scoped to the node instance rather than a process-wide global (spec.md
//! §9, "Singletons"), so a test harness can run several nodes in one
//! process without their counters bleeding into each other. Grounded in
//! the teacher's `Counter` in `api/monitoring.rs`: a plain `AtomicU64`
//! behind `fetch_add`/`load` with `Ordering::Relaxed`, since these are
//! cumulative counters with no cross-thread invariant beyond "never lose
//! an increment."

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// The seven named counters spec.md §3 enumerates. Monotonic for the
/// process lifetime; never reset.
#[derive(Debug, Default)]
pub struct Metrics {
    pub query_received: Counter,
    pub query_success: Counter,
    pub query_fail: Counter,
    pub execute_received: Counter,
    pub execute_tx_received: Counter,
    pub execute_success: Counter,
    pub execute_fail: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialises every counter for the `/statistics` HTTP route.
    pub fn snapshot(&self) -> Value {
        json!({
            "query.received": self.query_received.get(),
            "query.success": self.query_success.get(),
            "query.fail": self.query_fail.get(),
            "execute.received": self.execute_received.get(),
            "execute.tx.received": self.execute_tx_received.get(),
            "execute.success": self.execute_success.get(),
            "execute.fail": self.execute_fail.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let m = Metrics::new();
        assert_eq!(m.query_received.get(), 0);
        m.query_received.inc();
        m.query_received.inc();
        assert_eq!(m.query_received.get(), 2);
    }

    #[test]
    fn snapshot_reports_every_named_counter() {
        let m = Metrics::new();
        m.execute_fail.inc();
        let snap = m.snapshot();
        assert_eq!(snap["execute.fail"], 1);
        assert_eq!(snap["query.received"], 0);
    }
}
