//! Polling scheduler: picks the stalest feeds each cycle and checks them concurrently.
//!
//! - [`Scheduler::run_cycle`] selects one batch and joins every worker before returning
//! - [`Scheduler::start`] drives cycles on a fixed interval until shutdown
//! - [`Scheduler::trigger_immediate_check`] checks a single feed outside the cycle
//!
//! Cycles never overlap. Workers within a cycle share nothing but the store, and
//! the store's URL uniqueness is what keeps concurrent ingestion of the same feed
//! (a cycle racing a registration trigger, say) from storing a post twice.

mod worker;

pub use worker::{IngestOutcome, IngestStats, IngestionWorker};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::storage::{Feed, FeedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between the starts of two cycles
    pub interval: Duration,
    /// Maximum feeds checked per cycle
    pub batch_size: u32,
    /// Budget for a check started by [`Scheduler::trigger_immediate_check`]
    pub trigger_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            batch_size: 10,
            trigger_timeout: Duration::from_secs(10),
        }
    }
}

/// Lifecycle of the polling loop, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Shutdown observed; waiting for the in-flight batch
    ShuttingDown,
    Stopped,
}

/// Counters for one cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub new_posts: usize,
}

impl CycleReport {
    fn record(&mut self, joined: Result<IngestOutcome, JoinError>) {
        match joined {
            Ok(outcome) => {
                self.new_posts += outcome.inserted();
                if outcome.is_success() {
                    self.succeeded += 1;
                } else {
                    self.failed += 1;
                }
            }
            Err(e) => {
                self.failed += 1;
                tracing::error!(error = %e, "Feed check task panicked");
            }
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn FeedStore>,
    worker: Arc<IngestionWorker>,
    config: SchedulerConfig,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn FeedStore>, worker: IngestionWorker, config: SchedulerConfig) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            store,
            worker: Arc::new(worker),
            config,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    /// Run one cycle: select a batch, check every feed in it concurrently, and
    /// wait for all of them.
    ///
    /// Never fails. A failed selection query skips the cycle; worker failures
    /// only show up in the returned counters and the log.
    pub async fn run_cycle(&self) -> CycleReport {
        let feeds = match self.store.next_feeds_to_check(self.config.batch_size).await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select feeds to check, skipping cycle");
                return CycleReport::default();
            }
        };

        if feeds.is_empty() {
            tracing::info!("No feeds to check");
            return CycleReport::default();
        }

        let mut report = CycleReport {
            selected: feeds.len(),
            ..CycleReport::default()
        };
        tracing::info!(batch = feeds.len(), "Checking feeds");

        let mut tasks = JoinSet::new();
        for feed in feeds {
            let worker = Arc::clone(&self.worker);
            tasks.spawn(async move { worker.run(&feed).await });
        }

        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }

        tracing::info!(
            selected = report.selected,
            succeeded = report.succeeded,
            failed = report.failed,
            new_posts = report.new_posts,
            "Polling cycle complete"
        );
        report
    }

    /// Check `feed` now, outside the regular cycle.
    ///
    /// The caller is not required to await the handle; failures are only logged.
    pub fn trigger_immediate_check(&self, feed: Feed) -> JoinHandle<()> {
        let worker = Arc::clone(&self.worker);
        let budget = self.config.trigger_timeout;
        tokio::spawn(async move {
            let outcome = worker.run_with_timeout(&feed, budget).await;
            tracing::info!(
                feed_id = feed.id,
                url = %feed.url,
                success = outcome.is_success(),
                new_posts = outcome.inserted(),
                "Immediate feed check finished"
            );
        })
    }

    /// Spawn the polling loop. The first cycle starts right away.
    ///
    /// `shutdown` set to `true` (or its sender dropped) stops the loop once the
    /// current batch, if any, has finished.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> SchedulerHandle {
        let state = self.subscribe();
        let task = tokio::spawn(async move { self.run_loop(shutdown).await });
        SchedulerHandle { task, state }
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        self.set_state(SchedulerState::Running);
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Scheduler started"
        );

        let mut timer = tokio::time::interval(self.config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = timer.tick() => {}
            }

            if self.drive_cycle(&mut shutdown).await {
                break;
            }
        }

        self.set_state(SchedulerState::ShuttingDown);
        self.set_state(SchedulerState::Stopped);
        tracing::info!("Scheduler stopped");
    }

    /// Run one cycle to completion while watching for shutdown. Returns true if
    /// shutdown was requested during the cycle.
    async fn drive_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let cycle = self.run_cycle();
        tokio::pin!(cycle);

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut cycle => return cancelled,
                changed = shutdown.changed(), if !cancelled => {
                    if changed.is_err() || *shutdown.borrow() {
                        cancelled = true;
                        self.set_state(SchedulerState::ShuttingDown);
                        tracing::info!("Shutdown requested, waiting for in-flight checks");
                    }
                }
            }
        }
    }
}

/// Handle to a started scheduler
pub struct SchedulerHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Wait for the loop to exit
    pub async fn stopped(self) -> Result<(), JoinError> {
        self.task.await
    }
}
