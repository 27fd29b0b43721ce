//! Recurring sync of every field under a fixed provider call budget.
//!
//! Runs are single-flight: a trigger that arrives while a run is in progress
//! is dropped, not queued. Fields within a run are synced strictly in
//! sequence with a fixed pause between provider-bound fields.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::geometry::PolygonRing;
use crate::model::SyncRunStats;
use crate::sync::{FieldSyncer, SyncOutcome};

/// Lower bound for the pause between provider-bound fields.
pub const MIN_FIELD_DELAY: Duration = Duration::from_millis(1100);

#[derive(Debug, Clone, Copy)]
pub struct ScheduleTiming {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub field_delay: Duration,
}

impl ScheduleTiming {
    pub fn new(initial_delay: Duration, interval: Duration, field_delay: Duration) -> Self {
        Self {
            initial_delay,
            interval,
            field_delay: field_delay.max(MIN_FIELD_DELAY),
        }
    }
}

impl Default for ScheduleTiming {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(5 * 60),
            Duration::from_secs(6 * 60 * 60),
            MIN_FIELD_DELAY,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(SyncRunStats),
    /// Another run holds the single-flight flag; nothing was done.
    AlreadyRunning,
}

/// Clears the running flag however the run ends.
struct RunGuard<'a> {
    scheduler: &'a SyncScheduler,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut stats = self.scheduler.lock_stats();
        stats.is_running = false;
        stats.last_run_at = Some(self.scheduler.clock.now());
        drop(stats);
        self.scheduler.running.store(false, Ordering::Release);
    }
}

pub struct SyncScheduler {
    syncer: Arc<FieldSyncer>,
    clock: Arc<dyn Clock>,
    timing: ScheduleTiming,
    running: AtomicBool,
    stats: Mutex<SyncRunStats>,
}

impl SyncScheduler {
    pub fn new(syncer: Arc<FieldSyncer>, clock: Arc<dyn Clock>, timing: ScheduleTiming) -> Self {
        Self {
            syncer,
            clock,
            timing,
            running: AtomicBool::new(false),
            stats: Mutex::new(SyncRunStats::default()),
        }
    }

    pub fn stats(&self) -> SyncRunStats {
        self.lock_stats().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn lock_stats(&self) -> MutexGuard<'_, SyncRunStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Operator entry point: run now and return the resulting stats.
    pub async fn force_sync(&self) -> Result<RunOutcome, SyncError> {
        if !self.syncer.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        Ok(self.trigger().await)
    }

    /// Start a run unless one is already in progress.
    pub async fn trigger(&self) -> RunOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("Sync run already in progress, ignoring trigger");
            return RunOutcome::AlreadyRunning;
        }

        {
            let mut stats = self.lock_stats();
            stats.success_count = 0;
            stats.failed_count = 0;
            stats.skipped_count = 0;
            stats.total_count = 0;
            stats.is_running = true;
        }

        {
            let _guard = RunGuard { scheduler: self };
            tracing::info!("Starting satellite sync run");
            if let Err(e) = self.run_fields().await {
                tracing::error!("Sync run aborted: {}", e);
            }
        }

        let stats = self.stats();
        tracing::info!(
            success = stats.success_count,
            failed = stats.failed_count,
            skipped = stats.skipped_count,
            total = stats.total_count,
            "Satellite sync run finished"
        );
        RunOutcome::Completed(stats)
    }

    async fn run_fields(&self) -> Result<(), SyncError> {
        let fields = self.syncer.store().get_fields_with_boundary().await?;
        self.lock_stats().total_count = fields.len();

        let mut provider_calls_made = false;
        for field in &fields {
            if PolygonRing::for_field(field).is_err() {
                tracing::debug!(field_id = %field.id, "Skipping field with unusable boundary");
                self.lock_stats().skipped_count += 1;
                continue;
            }
            if provider_calls_made {
                time::sleep(self.timing.field_delay).await;
            }
            provider_calls_made = true;

            let result = AssertUnwindSafe(self.syncer.sync(field))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(SyncOutcome::Skipped)) => {
                    self.lock_stats().skipped_count += 1;
                }
                Ok(Ok(_)) => self.lock_stats().success_count += 1,
                Ok(Err(SyncError::NotConfigured)) => return Err(SyncError::NotConfigured),
                Ok(Err(e)) => {
                    tracing::warn!(field_id = %field.id, "Field sync failed: {}", e);
                    self.lock_stats().failed_count += 1;
                }
                Err(_) => {
                    tracing::error!(field_id = %field.id, "Field sync panicked");
                    self.lock_stats().failed_count += 1;
                }
            }
        }
        Ok(())
    }

    /// Spawn the recurring loop. Returns `None` when no provider is
    /// configured; the scheduler never starts in that case.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.syncer.is_configured() {
            tracing::warn!("Satellite provider not configured; sync scheduler not started");
            return None;
        }

        let handle = tokio::spawn(async move {
            let timing = self.timing;
            tracing::info!(
                "Sync scheduler started; first run in {}s, then every {}s",
                timing.initial_delay.as_secs(),
                timing.interval.as_secs()
            );

            let mut ticker = time::interval_at(Instant::now() + timing.initial_delay, timing.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.trigger().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Sync scheduler stopping");
                            break;
                        }
                    }
                }
            }
        });
        Some(handle)
    }
}
