//! Per-consumer message counters
//!
//! Each consumer (a queue reader, the ledger, the correlator) owns a
//! [`StatCounters`] with three independent counters: admitted (`total`),
//! `successful` and `failed`. A still-pending item contributes to `total`
//! only, so `total >= successful + failed` is not an invariant.
//!
//! Counters live in a *window*. Increments share the window through a read
//! lock; [`StatCounters::reset`] and [`StatCounters::take`] swap in a fresh
//! window under the write lock. An increment racing a reset therefore lands
//! wholly in the old window or wholly in the new one, and no reader ever
//! sees a half-reset triple.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counting interface shared by all message consumers
pub trait MessagesStats: Send + Sync {
    /// Count one admitted item
    fn increment_total(&self) {
        self.increment_total_by(1);
    }

    /// Count `amount` admitted items
    fn increment_total_by(&self, amount: u64);

    /// Count one successfully processed item
    fn increment_successful(&self) {
        self.increment_successful_by(1);
    }

    /// Count `amount` successfully processed items
    fn increment_successful_by(&self, amount: u64);

    /// Count one failed item
    fn increment_failed(&self) {
        self.increment_failed_by(1);
    }

    /// Count `amount` failed items
    fn increment_failed_by(&self, amount: u64);

    /// Admitted items in the current window
    fn total(&self) -> u64;

    /// Successful items in the current window
    fn successful(&self) -> u64;

    /// Failed items in the current window
    fn failed(&self) -> u64;

    /// Start a new counting window
    fn reset(&self);
}

#[derive(Debug, Default)]
struct Window {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl Window {
    fn values(&self) -> (u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Point-in-time counter values for one consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Consumer name
    pub name: String,
    /// Admitted items
    pub total: u64,
    /// Successfully processed items
    pub successful: u64,
    /// Failed items
    pub failed: u64,
}

/// Default [`MessagesStats`] implementation
#[derive(Debug)]
pub struct StatCounters {
    name: String,
    window: RwLock<Window>,
}

impl StatCounters {
    /// Create zeroed counters for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            window: RwLock::new(Window::default()),
        }
    }

    /// Consumer name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values of the current window
    pub fn snapshot(&self) -> StatsSnapshot {
        let (total, successful, failed) = self.window.read().values();
        self.snapshot_of(total, successful, failed)
    }

    /// Read and reset in one step, returning the closed window.
    ///
    /// Every increment lands in exactly one window.
    pub fn take(&self) -> StatsSnapshot {
        let closed = std::mem::take(&mut *self.window.write());
        let (total, successful, failed) = closed.values();
        self.snapshot_of(total, successful, failed)
    }

    fn snapshot_of(&self, total: u64, successful: u64, failed: u64) -> StatsSnapshot {
        StatsSnapshot {
            name: self.name.clone(),
            total,
            successful,
            failed,
        }
    }
}

impl MessagesStats for StatCounters {
    fn increment_total_by(&self, amount: u64) {
        self.window.read().total.fetch_add(amount, Ordering::Relaxed);
    }

    fn increment_successful_by(&self, amount: u64) {
        self.window
            .read()
            .successful
            .fetch_add(amount, Ordering::Relaxed);
    }

    fn increment_failed_by(&self, amount: u64) {
        self.window.read().failed.fetch_add(amount, Ordering::Relaxed);
    }

    fn total(&self) -> u64 {
        self.window.read().total.load(Ordering::Relaxed)
    }

    fn successful(&self) -> u64 {
        self.window.read().successful.load(Ordering::Relaxed)
    }

    fn failed(&self) -> u64 {
        self.window.read().failed.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        *self.window.write() = Window::default();
    }
}

/// Named counters, one [`StatCounters`] per consumer
#[derive(Debug, Default)]
pub struct StatsRegistry {
    counters: DashMap<String, Arc<StatCounters>>,
}

impl StatsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `name`, created on first use
    pub fn counters(&self, name: &str) -> Arc<StatCounters> {
        if let Some(existing) = self.counters.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(StatCounters::new(name)))
                .value(),
        )
    }

    /// Current values of every consumer, ordered by name
    pub fn snapshot_all(&self) -> Vec<StatsSnapshot> {
        let mut all: Vec<_> = self.counters.iter().map(|c| c.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Read-and-reset every consumer, ordered by name
    pub fn take_all(&self) -> Vec<StatsSnapshot> {
        let handles: Vec<Arc<StatCounters>> =
            self.counters.iter().map(|c| Arc::clone(c.value())).collect();
        let mut all: Vec<_> = handles.iter().map(|c| c.take()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn default_increments_count_one() {
        let stats = StatCounters::new("queue");
        stats.increment_total();
        stats.increment_total();
        stats.increment_successful();
        stats.increment_failed_by(3);

        assert_eq!(stats.total(), 2);
        assert_eq!(stats.successful(), 1);
        assert_eq!(stats.failed(), 3);
    }

    #[test]
    fn concurrent_increments_then_reset_start_a_new_window() {
        let stats = Arc::new(StatCounters::new("queue"));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..500 {
                        stats.increment_total_by(1);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(stats.total(), 4_000);

        stats.reset();
        stats.increment_total();
        stats.increment_successful_by(1);

        assert_eq!(stats.total(), 1);
        assert_eq!(stats.successful(), 1);
        assert_eq!(stats.failed(), 0);
    }

    #[test]
    fn take_returns_closed_window_and_zeroes() {
        let stats = StatCounters::new("ledger");
        stats.increment_total_by(5);
        stats.increment_failed();

        let closed = stats.take();
        assert_eq!(
            closed,
            StatsSnapshot {
                name: "ledger".into(),
                total: 5,
                successful: 0,
                failed: 1,
            }
        );
        assert_eq!(stats.snapshot().total, 0);
    }

    #[test]
    fn no_increment_is_lost_across_take() {
        let stats = Arc::new(StatCounters::new("race"));
        let writer = {
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    stats.increment_total();
                }
            })
        };

        let mut seen = 0;
        for _ in 0..100 {
            seen += stats.take().total;
        }
        writer.join().unwrap();
        seen += stats.take().total;

        assert_eq!(seen, 10_000);
    }

    #[test]
    fn registry_shares_counters_by_name() {
        let registry = StatsRegistry::new();
        registry.counters("a").increment_total();
        registry.counters("a").increment_total();
        registry.counters("b").increment_failed();

        let all = registry.take_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "a");
        assert_eq!(all[0].total, 2);
        assert_eq!(all[1].failed, 1);
        assert!(registry.snapshot_all().iter().all(|s| s.total == 0));
    }
}
