// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-node hit and miss accounting.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tracing::Instrument;

/// Counters collected by a cache node between two reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    /// Number of cache lookups.
    pub total: u64,
    /// Lookups answered from the cache, placeholders included.
    pub hit: u64,
    /// Lookups that found nothing or failed at the backend.
    pub miss: u64,
    /// Loader invocations that failed.
    pub db_fails: u64,
}

impl StatSnapshot {
    /// Hit ratio as a percentage of all lookups.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "ratios are diagnostic only")]
    pub fn hit_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.hit as f64 / self.total as f64
    }
}

/// Lookup counters for one cache node, reported and reset once per interval.
///
/// # Examples
///
/// ```
/// use shardcache::Stat;
///
/// let stat = Stat::new("users", "10.0.0.1:6379");
/// assert!(stat.report().is_none(), "idle intervals are not reported");
/// ```
#[derive(Debug)]
pub struct Stat {
    name: String,
    node: String,
    total: AtomicU64,
    hit: AtomicU64,
    miss: AtomicU64,
    db_fails: AtomicU64,
}

impl Stat {
    /// Creates zeroed counters for node `node` of cache `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            total: AtomicU64::new(0),
            hit: AtomicU64::new(0),
            miss: AtomicU64::new(0),
            db_fails: AtomicU64::new(0),
        }
    }

    pub(crate) fn increment_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_db_fails(&self) {
        self.db_fails.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the counters accumulated since the last report without resetting them.
    #[must_use]
    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            total: self.total.load(Ordering::Relaxed),
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            db_fails: self.db_fails.load(Ordering::Relaxed),
        }
    }

    /// Resets the counters and logs them as a `cache.stat` event.
    ///
    /// Returns `None`, without logging, when no lookup happened during the interval.
    pub fn report(&self) -> Option<StatSnapshot> {
        let snapshot = StatSnapshot {
            total: self.total.swap(0, Ordering::Relaxed),
            hit: self.hit.swap(0, Ordering::Relaxed),
            miss: self.miss.swap(0, Ordering::Relaxed),
            db_fails: self.db_fails.swap(0, Ordering::Relaxed),
        };
        if snapshot.total == 0 {
            return None;
        }

        tracing::info!(
            cache.name = %self.name,
            cache.node = %self.node,
            cache.qpm = snapshot.total,
            cache.hit_ratio = format_args!("{:.1}%", snapshot.hit_ratio()),
            cache.hit = snapshot.hit,
            cache.miss = snapshot.miss,
            cache.db_fails = snapshot.db_fails,
            "cache.stat"
        );
        Some(snapshot)
    }

    /// Reports every `interval` on the current tokio runtime until `stat` is dropped.
    ///
    /// Does nothing outside a runtime.
    pub(crate) fn start_reporting(stat: &Arc<Self>, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(cache.name = %stat.name, cache.node = %stat.node, "cache.stat.disabled");
            return;
        };

        let weak = Arc::downgrade(stat);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(stat) = weak.upgrade() else {
                    break;
                };
                stat.report();
            }
        }
        .in_current_span());
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn busy_stat() -> Stat {
        let stat = Stat::new("users", "node-a");
        for _ in 0..4 {
            stat.increment_total();
        }
        for _ in 0..3 {
            stat.increment_hit();
        }
        stat.increment_miss();
        stat.increment_db_fails();
        stat
    }

    #[test]
    fn snapshot_does_not_reset() {
        let stat = busy_stat();
        let expected = StatSnapshot {
            total: 4,
            hit: 3,
            miss: 1,
            db_fails: 1,
        };
        assert_eq!(stat.snapshot(), expected);
        assert_eq!(stat.snapshot(), expected);
    }

    #[test]
    #[traced_test]
    fn report_resets_and_logs() {
        let stat = busy_stat();

        let reported = stat.report().unwrap();
        assert_eq!(reported.total, 4);
        assert_eq!(stat.snapshot(), StatSnapshot::default());

        assert!(logs_contain("cache.stat"));
        assert!(logs_contain("cache.qpm=4"));
        assert!(logs_contain("cache.hit_ratio=75.0%"));
        assert!(logs_contain("cache.db_fails=1"));
    }

    #[test]
    #[traced_test]
    fn idle_interval_is_silent() {
        let stat = Stat::new("users", "node-a");
        stat.increment_db_fails();

        assert!(stat.report().is_none());
        assert!(!logs_contain("cache.stat"));
    }

    #[test]
    fn hit_ratio_of_idle_snapshot_is_zero() {
        assert!(StatSnapshot::default().hit_ratio().abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_runs_every_interval() {
        let stat = Arc::new(busy_stat());
        Stat::start_reporting(&stat, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stat.snapshot().total, 4);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(stat.snapshot(), StatSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_stops_when_stat_is_dropped() {
        let stat = Arc::new(Stat::new("users", "node-a"));
        let weak = Arc::downgrade(&stat);
        Stat::start_reporting(&stat, Duration::from_secs(1));
        drop(stat);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn reporting_without_runtime_is_a_no_op() {
        let stat = Arc::new(Stat::new("users", "node-a"));
        Stat::start_reporting(&stat, Duration::from_secs(1));
        assert_eq!(Arc::strong_count(&stat), 1);
    }
}
