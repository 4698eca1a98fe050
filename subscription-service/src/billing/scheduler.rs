//! Scheduler and lock coordinator for the periodic billing cycle.
//!
//! Every instance runs its own scheduler. The shared lock key is the only
//! thing they coordinate through: whoever sets it first runs the cycle and
//! deletes it afterwards, everyone else backs off and eventually skips.

use crate::billing::engine::{BillingCycleEngine, CycleReport};
use crate::clock::Clock;
use crate::error::BillingError;
use crate::services::{
    record_billing_cycle, record_billing_cycle_duration, record_lock_acquisition,
    record_lock_release_failure, DistributedLock,
};
use chrono::{DateTime, Days, NaiveTime, Utc};
use service_core::error::AppError;
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_LOCK_KEY: &str = "billing_job_lock";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

/// Fires once a day at a fixed UTC wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    time: NaiveTime,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            time: NaiveTime::MIN,
        }
    }
}

impl DailySchedule {
    pub fn at(hour: u32, minute: u32) -> Result<Self, AppError> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(|time| Self { time })
            .ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "Invalid billing schedule time {:02}:{:02}",
                    hour,
                    minute
                ))
            })
    }

    /// Parse an `HH:MM` UTC time.
    pub fn parse(value: &str) -> Result<Self, AppError> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map(|time| Self { time })
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!(
                    "Invalid billing schedule '{}', expected HH:MM: {}",
                    value,
                    e
                ))
            })
    }

    /// The first trigger instant strictly after `now`.
    pub fn next_trigger_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.time).and_utc();
        if today > now {
            today
        } else {
            today
                .checked_add_days(Days::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        }
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} UTC", self.time.format("%H:%M"))
    }
}

/// How the billing lock is taken.
#[derive(Debug, Clone, PartialEq)]
pub struct LockSettings {
    pub key: String,
    /// Must outlast the slowest expected cycle; bounds crash recovery.
    pub ttl: Duration,
    pub retry: RetryConfig,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            key: DEFAULT_LOCK_KEY.to_string(),
            ttl: DEFAULT_LOCK_TTL,
            retry: RetryConfig::doubling(3, Duration::from_secs(1)),
        }
    }
}

/// What one scheduled trigger did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Lock held and the whole due-set was billed.
    Completed(CycleReport),
    /// Lock held but the cycle stopped early. The lock was still released.
    Failed(BillingError),
    /// The lock could not be taken; nothing was touched.
    Skipped,
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Completed(_) => "completed",
            CycleOutcome::Failed(_) => "failed",
            CycleOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Error)]
enum AcquireError {
    #[error("lock '{0}' is held by another instance")]
    Held(String),
    #[error(transparent)]
    Backend(#[from] AppError),
}

pub struct BillingScheduler {
    engine: BillingCycleEngine,
    lock: Arc<dyn DistributedLock>,
    clock: Arc<dyn Clock>,
    settings: LockSettings,
    schedule: DailySchedule,
    instance_id: String,
}

impl BillingScheduler {
    pub fn new(
        engine: BillingCycleEngine,
        lock: Arc<dyn DistributedLock>,
        clock: Arc<dyn Clock>,
        settings: LockSettings,
        schedule: DailySchedule,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            lock,
            clock,
            settings,
            schedule,
            instance_id: instance_id.into(),
        }
    }

    /// Run one billing cycle under the cluster-wide lock.
    ///
    /// Never returns an error: a lock that stays busy is a skip, and a cycle
    /// failure is reported in the outcome after the lock is released.
    pub async fn run_scheduled_cycle(&self) -> CycleOutcome {
        if let Err(e) = self.acquire().await {
            warn!(
                instance_id = %self.instance_id,
                error = %e,
                "Skipping billing cycle, lock unavailable"
            );
            record_billing_cycle(CycleOutcome::Skipped.label());
            return CycleOutcome::Skipped;
        }

        info!(instance_id = %self.instance_id, lock_key = %self.settings.key, "Billing lock acquired");

        let started = Instant::now();
        let result = self.engine.run_cycle(self.clock.now()).await;
        self.release().await;
        record_billing_cycle_duration(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(report) => {
                info!(
                    due = report.due,
                    billed = report.bills.len(),
                    "Billing cycle completed"
                );
                CycleOutcome::Completed(report)
            }
            Err(e) => {
                error!(error = %e, "Billing cycle failed");
                CycleOutcome::Failed(e)
            }
        };
        record_billing_cycle(outcome.label());
        outcome
    }

    async fn acquire(&self) -> Result<(), BillingError> {
        let this = self;
        retry_with_backoff(
            &self.settings.retry,
            "acquire_billing_lock",
            move || async move {
                match this
                    .lock
                    .set_if_absent(&this.settings.key, &this.instance_id, this.settings.ttl)
                    .await
                {
                    Ok(true) => {
                        record_lock_acquisition("acquired");
                        Ok(())
                    }
                    Ok(false) => {
                        record_lock_acquisition("contended");
                        Err(AcquireError::Held(this.settings.key.clone()))
                    }
                    Err(e) => {
                        record_lock_acquisition("error");
                        Err(AcquireError::from(e))
                    }
                }
            },
        )
        .await
        .map_err(|_| BillingError::LockUnavailable {
            key: self.settings.key.clone(),
            attempts: self.settings.retry.max_attempts,
        })
    }

    /// Delete the lock key. A failed delete leaves the key to expire.
    async fn release(&self) {
        if let Err(e) = self.lock.delete(&self.settings.key).await {
            record_lock_release_failure();
            error!(
                lock_key = %self.settings.key,
                ttl_secs = self.settings.ttl.as_secs(),
                error = %e,
                "Failed to release billing lock, it will expire on its own"
            );
        }
    }

    /// Fire `run_scheduled_cycle` at every trigger until `shutdown` is
    /// cancelled. A cycle in flight is allowed to finish.
    pub async fn run_until_cancelled(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            instance_id = %self.instance_id,
            schedule = %self.schedule,
            "Billing scheduler started"
        );

        let mut last_trigger: Option<DateTime<Utc>> = None;
        loop {
            let now = self.clock.now();
            // A trigger that already fired must not fire again
            let baseline = last_trigger.map_or(now, |t| t.max(now));
            let next = self.schedule.next_trigger_after(baseline);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            last_trigger = Some(next);
            self.run_scheduled_cycle().await;
        }

        info!(instance_id = %self.instance_id, "Billing scheduler stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run_until_cancelled(shutdown))
    }
}
