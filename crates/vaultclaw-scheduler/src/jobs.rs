//! Job definitions: what runs, when, and the per-job single-flight state.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use vaultclaw_core::{Result, VaultClawError};

use crate::cron::CronSchedule;

/// Boxed job body. Called once per firing.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every `Duration`, first firing one period after registration.
    Interval(Duration),
    /// Calendar schedule, UTC.
    Cron(CronSchedule),
}

impl Trigger {
    pub fn every_secs(secs: u64) -> Self {
        Trigger::Interval(Duration::from_secs(secs))
    }

    pub fn cron(expression: &str) -> Result<Self> {
        CronSchedule::parse(expression)
            .map(Trigger::Cron)
            .ok_or_else(|| VaultClawError::Config(format!("invalid cron expression '{expression}'")))
    }

    /// Next firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(every) => {
                let every = chrono::Duration::from_std(*every).ok()?;
                after.checked_add_signed(every)
            }
            Trigger::Cron(schedule) => schedule.next_after(after),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Interval(d) => write!(f, "every {}s", d.as_secs()),
            Trigger::Cron(_) => write!(f, "cron"),
        }
    }
}

/// Counters shared between the scheduler and a job's running instance.
#[derive(Debug, Default)]
pub(crate) struct JobState {
    pub in_flight: AtomicBool,
    pub runs: AtomicU64,
    pub skipped: AtomicU64,
    pub failures: AtomicU64,
}

/// Holds a job's in-flight flag; clears it on drop, panic included.
pub(crate) struct InFlightGuard(Arc<JobState>);

impl InFlightGuard {
    /// `None` if the job is already running.
    pub fn acquire(state: &Arc<JobState>) -> Option<Self> {
        state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(state.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// A registered job.
pub struct ScheduledJob {
    pub id: String,
    pub trigger: Trigger,
    pub(crate) target: JobFn,
    pub(crate) state: Arc<JobState>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new<F, Fut>(id: impl Into<String>, trigger: Trigger, target: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let next_run = trigger.next_after(Utc::now());
        Self {
            id: id.into(),
            trigger,
            target: Arc::new(move || target().boxed()),
            state: Arc::new(JobState::default()),
            next_run,
            last_run: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|t| t <= now)
    }

    pub fn is_running(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            id: self.id.clone(),
            trigger: self.trigger.to_string(),
            running: self.is_running(),
            runs: self.state.runs.load(Ordering::Relaxed),
            skipped: self.state.skipped.load(Ordering::Relaxed),
            failures: self.state.failures.load(Ordering::Relaxed),
            last_run: self.last_run,
            next_run: self.next_run,
        }
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStats {
    pub id: String,
    pub trigger: String,
    pub running: bool,
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_next_after() {
        let t = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let next = Trigger::every_secs(600).next_after(t).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 10, 10, 0).unwrap());
    }

    #[test]
    fn test_bad_cron_is_config_error() {
        assert!(matches!(Trigger::cron("0 8 * *"), Err(VaultClawError::Config(_))));
        assert!(Trigger::cron("0 8 * * mon").is_ok());
    }

    #[test]
    fn test_guard_is_exclusive_and_released() {
        let state = Arc::new(JobState::default());
        let guard = InFlightGuard::acquire(&state).unwrap();
        assert!(InFlightGuard::acquire(&state).is_none());
        drop(guard);
        assert!(InFlightGuard::acquire(&state).is_some());
    }

    #[test]
    fn test_new_job_is_not_due_immediately() {
        let job = ScheduledJob::new("dashboard_update", Trigger::every_secs(600), || async { Ok(()) });
        assert!(!job.is_due(Utc::now()));
        assert!(job.is_due(Utc::now() + chrono::Duration::seconds(601)));
        assert_eq!(job.stats().runs, 0);
    }
}
