// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delayed retries of failed cache deletes.
//!
//! A delete that fails at the backend leaves stale data behind. Rather than failing the
//! caller, the delete is handed to a [`Cleaner`], which retries it with escalating
//! backoff (see [`RetryTier`]) until it succeeds or the last tier is exhausted.

mod tier;
mod wheel;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::Instrument;

pub use tier::RetryTier;
use wheel::TimingWheel;

type Action = Arc<dyn Fn() -> BoxFuture<'static, Result<(), shardcache_store::Error>> + Send + Sync>;

/// Options for a [`Cleaner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanerOptions {
    /// Maximum number of retries running at once.
    pub workers: usize,
    /// Number of buckets in the timing wheel.
    pub slots: usize,
    /// How often the timing wheel advances by one bucket.
    pub interval: Duration,
}

impl Default for CleanerOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            slots: 300,
            interval: Duration::from_secs(1),
        }
    }
}

/// A cleanup task waiting for its next attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    /// The keys the task deletes.
    pub keys: Vec<String>,
    /// The tier the task is waiting at.
    pub tier: RetryTier,
}

struct DelayTask {
    keys: Vec<String>,
    action: Action,
    tier: RetryTier,
}

/// Schedules failed deletes for retry on a timing wheel and runs them on a bounded pool.
///
/// Call [`Cleaner::start`] from within a tokio runtime to begin ticking, and
/// [`Cleaner::shutdown`] to run every pending task one last time.
///
/// # Examples
///
/// ```
/// use shardcache::{Cleaner, CleanerOptions};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cleaner = Arc::new(Cleaner::new(CleanerOptions::default()));
/// cleaner.start();
///
/// cleaner.schedule(vec!["user:1".to_string()], || async { Ok(()) });
/// assert_eq!(cleaner.pending(), 1);
///
/// assert_eq!(cleaner.shutdown().await, 1);
/// assert_eq!(cleaner.pending(), 0);
/// # }
/// ```
pub struct Cleaner {
    options: CleanerOptions,
    wheel: Mutex<TimingWheel<DelayTask>>,
    workers: Arc<Semaphore>,
    running: AtomicUsize,
    stopped: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleaner")
            .field("options", &self.options)
            .field("pending", &self.pending())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new(CleanerOptions::default())
    }
}

impl Cleaner {
    /// Creates an idle cleaner; nothing runs until [`Cleaner::start`] is called.
    #[must_use]
    pub fn new(options: CleanerOptions) -> Self {
        Self {
            options,
            wheel: Mutex::new(TimingWheel::new(options.slots, options.interval)),
            workers: Arc::new(Semaphore::new(options.workers.max(1))),
            running: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            ticker: Mutex::new(None),
        }
    }

    /// Returns the options the cleaner was created with.
    #[must_use]
    pub fn options(&self) -> &CleanerOptions {
        &self.options
    }

    /// Starts advancing the timing wheel on the current tokio runtime.
    ///
    /// The ticking task only holds a weak reference and ends once the cleaner is dropped
    /// or shut down. Calling `start` again, or outside a runtime, does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() || self.stopped.load(Ordering::Acquire) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("cache.cleanup.not_started");
            return;
        };

        let weak = Arc::downgrade(self);
        let interval = self.options.interval;
        *ticker = Some(handle.spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticks.tick().await;
                let Some(cleaner) = weak.upgrade() else {
                    break;
                };
                cleaner.tick();
            }
        }
        .in_current_span()));
    }

    /// Schedules `action` to delete `keys` at the first retry tier.
    ///
    /// Tasks scheduled after [`Cleaner::shutdown`] are abandoned immediately.
    pub fn schedule<F, Fut>(&self, keys: Vec<String>, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), shardcache_store::Error>> + Send + 'static,
    {
        // `stopped` is only flipped under the wheel lock, so a task added here is always
        // seen by the drain in `shutdown`.
        let mut wheel = self.wheel.lock();
        if self.stopped.load(Ordering::Acquire) {
            drop(wheel);
            tracing::error!(cache.keys = ?keys, "cache.cleanup.abandoned");
            return;
        }

        let action: Action = Arc::new(move || Box::pin(action()));
        let task = DelayTask {
            keys,
            action,
            tier: RetryTier::FIRST,
        };
        wheel.add(task.tier.delay(), task);
    }

    /// Number of tasks waiting in the wheel or currently running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.wheel.lock().len() + self.running.load(Ordering::Acquire)
    }

    /// Tasks waiting in the wheel, with the tier each waits at.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<PendingTask> {
        self.wheel
            .lock()
            .iter()
            .map(|task| PendingTask {
                keys: task.keys.clone(),
                tier: task.tier,
            })
            .collect()
    }

    /// Stops ticking and runs every pending task once, one after another.
    ///
    /// Failures are logged and never rescheduled. Returns how many tasks ran.
    pub async fn shutdown(&self) -> usize {
        let tasks = {
            let mut wheel = self.wheel.lock();
            self.stopped.store(true, Ordering::Release);
            wheel.drain()
        };
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }

        let count = tasks.len();
        for task in tasks {
            if let Err(error) = (task.action)().await {
                tracing::error!(cache.keys = ?task.keys, error = %error, "cache.cleanup.abandoned");
            }
        }
        count
    }

    fn tick(self: &Arc<Self>) {
        let due = self.wheel.lock().advance();
        for task in due {
            self.running.fetch_add(1, Ordering::AcqRel);
            let cleaner = Arc::downgrade(self);
            let workers = Arc::clone(&self.workers);
            tokio::spawn(async move {
                let result = match workers.acquire_owned().await {
                    Ok(_permit) => (task.action)().await,
                    Err(_closed) => Err(shardcache_store::Error::from_message("cleanup workers closed")),
                };
                if let Some(cleaner) = cleaner.upgrade() {
                    cleaner.finish(task, result);
                }
            }
            .in_current_span());
        }
    }

    fn finish(&self, mut task: DelayTask, result: Result<(), shardcache_store::Error>) {
        let error = match result {
            Ok(()) => {
                self.running.fetch_sub(1, Ordering::AcqRel);
                tracing::debug!(cache.keys = ?task.keys, cache.tier = %task.tier, "cache.cleanup.succeeded");
                return;
            }
            Err(error) => error,
        };

        if let Some(next) = task.tier.next() {
            let mut wheel = self.wheel.lock();
            if !self.stopped.load(Ordering::Acquire) {
                tracing::warn!(
                    cache.keys = ?task.keys,
                    cache.tier = %next,
                    cache.delay_secs = next.delay().as_secs(),
                    error = %error,
                    "cache.cleanup.retry"
                );
                task.tier = next;
                wheel.add(next.delay(), task);
                self.running.fetch_sub(1, Ordering::AcqRel);
                return;
            }
        }

        self.running.fetch_sub(1, Ordering::AcqRel);
        tracing::error!(cache.keys = ?task.keys, error = %error, "cache.cleanup.abandoned");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use tracing_test::traced_test;

    use super::*;

    fn failing_action(calls: &Arc<AtomicU32>) -> impl Fn() -> BoxFuture<'static, Result<(), shardcache_store::Error>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(shardcache_store::Error::from_message("backend down")) })
        }
    }

    fn started() -> Arc<Cleaner> {
        let cleaner = Arc::new(Cleaner::default());
        cleaner.start();
        cleaner
    }

    #[tokio::test(start_paused = true)]
    async fn successful_retry_drops_the_task() {
        let cleaner = started();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        cleaner.schedule(vec!["a".to_string()], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cleaner.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_tasks_start_at_first_tier() {
        let cleaner = started();
        cleaner.schedule(vec!["a".to_string(), "b".to_string()], || async { Ok(()) });

        assert_eq!(
            cleaner.pending_tasks(),
            [PendingTask {
                keys: vec!["a".to_string(), "b".to_string()],
                tier: RetryTier::OneSecond,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn failing_task_climbs_every_tier_then_is_abandoned() {
        let cleaner = started();
        let calls = Arc::new(AtomicU32::new(0));
        cleaner.schedule(vec!["k".to_string()], failing_action(&calls));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cleaner.pending_tasks()[0].tier, RetryTier::FiveSeconds);
        assert!(logs_contain("cache.cleanup.retry"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cleaner.pending_tasks()[0].tier, RetryTier::OneMinute);

        tokio::time::sleep(Duration::from_secs(60 + 300 + 3600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(cleaner.pending(), 0);
        assert!(logs_contain("cache.cleanup.abandoned"));

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5, "abandoned tasks never run again");
    }

    #[tokio::test(start_paused = true)]
    async fn workers_bound_concurrency() {
        let cleaner = Arc::new(Cleaner::new(CleanerOptions {
            workers: 2,
            ..CleanerOptions::default()
        }));
        cleaner.start();

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for i in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            cleaner.schedule(vec![format!("k{i}")], move || {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(cleaner.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn shutdown_runs_pending_tasks_once() {
        let cleaner = started();
        let calls = Arc::new(AtomicU32::new(0));
        cleaner.schedule(vec!["a".to_string()], failing_action(&calls));
        cleaner.schedule(vec!["b".to_string()], failing_action(&calls));

        assert_eq!(cleaner.shutdown().await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cleaner.pending(), 0);
        assert!(logs_contain("cache.cleanup.abandoned"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "nothing is rescheduled after shutdown");
    }

    #[tokio::test]
    #[traced_test]
    async fn schedule_after_shutdown_is_abandoned() {
        let cleaner = started();
        cleaner.shutdown().await;

        cleaner.schedule(vec!["late".to_string()], || async { Ok(()) });

        assert_eq!(cleaner.pending(), 0);
        assert!(logs_contain("cache.cleanup.abandoned"));
    }

    #[tokio::test]
    async fn shutdown_racing_schedules_strands_nothing() {
        let cleaner = Arc::new(Cleaner::default());
        let ran = Arc::new(AtomicUsize::new(0));

        let schedulers: Vec<_> = (0..4)
            .map(|thread| {
                let cleaner = Arc::clone(&cleaner);
                let ran = Arc::clone(&ran);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let ran = Arc::clone(&ran);
                        cleaner.schedule(vec![format!("{thread}-{i}")], move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                            async { Ok(()) }
                        });
                    }
                })
            })
            .collect();

        let drained = cleaner.shutdown().await;
        for scheduler in schedulers {
            scheduler.join().unwrap();
        }

        assert_eq!(cleaner.pending(), 0, "no task may slip in after the drain");
        assert_eq!(ran.load(Ordering::SeqCst), drained);
    }

    #[test]
    fn start_outside_runtime_leaves_tasks_queued() {
        let cleaner = Arc::new(Cleaner::default());
        cleaner.start();
        cleaner.schedule(vec!["a".to_string()], || async { Ok(()) });
        assert_eq!(cleaner.pending(), 1);
        assert!(format!("{cleaner:?}").contains("pending: 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_ends_when_cleaner_is_dropped() {
        let cleaner = started();
        let weak = Arc::downgrade(&cleaner);
        drop(cleaner);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(weak.upgrade().is_none());
    }
}
