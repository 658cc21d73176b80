//! Scheduler engine: the loop that checks and fires due jobs.
//! Uses tokio::interval for ticking; every firing runs on its own task.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use vaultclaw_core::{Result, VaultClawError};

use crate::jobs::{InFlightGuard, JobStats, ScheduledJob, Trigger};

/// What happened when a job was asked to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Started,
    /// The previous run of the same job is still in flight.
    Skipped,
    Unknown,
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    tick: Duration,
}

/// Smallest check period; `tokio::time::interval` refuses zero.
const MIN_TICK: Duration = Duration::from_millis(1);

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            tick: tick.max(MIN_TICK),
        }
    }

    /// Register a job. Ids must be unique.
    pub fn add_job<F, Fut>(&mut self, id: &str, trigger: Trigger, target: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.jobs.iter().any(|j| j.id == id) {
            return Err(VaultClawError::Config(format!("duplicate job id '{id}'")));
        }
        let job = ScheduledJob::new(id, trigger, target);
        tracing::info!("📅 Job added: '{}' ({})", job.id, job.trigger);
        self.jobs.push(job);
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn stats(&self) -> Vec<JobStats> {
        self.jobs.iter().map(ScheduledJob::stats).collect()
    }

    /// Fire one job now, regardless of its trigger.
    pub fn try_fire(&mut self, id: &str) -> FireOutcome {
        match self.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => fire(job, Utc::now()),
            None => FireOutcome::Unknown,
        }
    }

    /// Fire every job due at `now` and advance its next run.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Vec<(String, FireOutcome)> {
        let mut fired = Vec::new();
        for job in self.jobs.iter_mut().filter(|j| j.is_due(now)) {
            job.next_run = job.trigger.next_after(now);
            if job.next_run.is_none() {
                tracing::warn!("⚠️ Job '{}' has no future run, disabling", job.id);
            }
            let outcome = fire(job, now);
            fired.push((job.id.clone(), outcome));
        }
        fired
    }

    /// Tick until `shutdown` flips to true. Jobs still running are left to
    /// finish on their own.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Scheduler started with {} job(s) (check every {}ms)",
            self.jobs.len(),
            self.tick.as_millis()
        );
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_at(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let in_flight = self.jobs.iter().filter(|j| j.is_running()).count();
        tracing::info!("⏹️ Scheduler stopped ({in_flight} job(s) still in flight)");
    }
}

fn fire(job: &mut ScheduledJob, now: DateTime<Utc>) -> FireOutcome {
    let Some(guard) = InFlightGuard::acquire(&job.state) else {
        job.state.skipped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("⏭️ Job '{}' still running, skipping this tick", job.id);
        return FireOutcome::Skipped;
    };

    tracing::info!("🔔 Job triggered: '{}'", job.id);
    job.last_run = Some(now);
    job.state.runs.fetch_add(1, Ordering::Relaxed);

    let id = job.id.clone();
    let state = job.state.clone();
    let run = (job.target)();
    tokio::spawn(async move {
        let _guard = guard;
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(())) => tracing::debug!("✅ Job '{id}' finished"),
            Ok(Err(e)) => {
                state.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("❌ Job '{id}' failed: {e}");
            }
            Err(_) => {
                state.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("💥 Job '{id}' panicked");
            }
        }
    });
    FireOutcome::Started
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut scheduler = Scheduler::new(Duration::from_millis(10));
        let (r, n) = (release.clone(), runs.clone());
        scheduler
            .add_job("odoo_watcher", Trigger::every_secs(3600), move || {
                let (r, n) = (r.clone(), n.clone());
                async move {
                    n.fetch_add(1, Ordering::SeqCst);
                    r.notified().await;
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(scheduler.try_fire("odoo_watcher"), FireOutcome::Started);
        settle().await;
        assert_eq!(scheduler.try_fire("odoo_watcher"), FireOutcome::Skipped);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        release.notify_one();
        settle().await;
        assert_eq!(scheduler.try_fire("odoo_watcher"), FireOutcome::Started);
        release.notify_one();

        let stats = &scheduler.stats()[0];
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_failing_job_does_not_affect_others() {
        let healthy = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(Duration::from_millis(10));

        scheduler
            .add_job("facebook_watcher", Trigger::every_secs(600), || async {
                None::<()>.expect("boom");
                Ok(())
            })
            .unwrap();
        scheduler
            .add_job("twitter_watcher", Trigger::every_secs(600), || async {
                Err(VaultClawError::Upstream("HTTP 503".into()))
            })
            .unwrap();
        let h = healthy.clone();
        scheduler
            .add_job("dashboard_update", Trigger::every_secs(600), move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(601);
        let fired = scheduler.tick_at(later);
        assert_eq!(fired.len(), 3);
        assert!(fired.iter().all(|(_, o)| *o == FireOutcome::Started));
        settle().await;

        assert_eq!(healthy.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats[0].failures, 1);
        assert!(!stats[0].running, "panicked job must release its slot");
        assert_eq!(stats[1].failures, 1);
        assert_eq!(stats[2].failures, 0);

        // The panicked job can run again.
        assert_eq!(scheduler.try_fire("facebook_watcher"), FireOutcome::Started);
    }

    #[tokio::test]
    async fn test_tick_advances_next_run() {
        let mut scheduler = Scheduler::new(Duration::from_millis(10));
        scheduler
            .add_job("error_recovery", Trigger::every_secs(1800), || async { Ok(()) })
            .unwrap();

        assert!(scheduler.tick_at(Utc::now()).is_empty());
        let later = Utc::now() + chrono::Duration::seconds(1801);
        assert_eq!(scheduler.tick_at(later).len(), 1);
        assert!(scheduler.tick_at(later).is_empty());
        assert!(scheduler.stats()[0].next_run.unwrap() > later);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_ids() {
        let mut scheduler = Scheduler::new(Duration::from_millis(10));
        scheduler
            .add_job("weekly_briefing", Trigger::cron("0 8 * * mon").unwrap(), || async { Ok(()) })
            .unwrap();
        assert!(
            scheduler
                .add_job("weekly_briefing", Trigger::every_secs(1), || async { Ok(()) })
                .is_err()
        );
        assert_eq!(scheduler.try_fire("nope"), FireOutcome::Unknown);
        assert_eq!(scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut scheduler = Scheduler::new(Duration::from_millis(10));
        scheduler
            .add_job("dashboard_update", Trigger::every_secs(600), || async { Ok(()) })
            .unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            scheduler.run(rx).await;
            scheduler
        });
        settle().await;
        tx.send(true).unwrap();
        let scheduler = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_tick_still_runs() {
        let mut scheduler = Scheduler::new(Duration::ZERO);
        scheduler
            .add_job("dashboard_update", Trigger::every_secs(3600), || async { Ok(()) })
            .unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        settle().await;
        tx.send(true).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap();
        assert!(finished.is_ok(), "scheduler task must not panic");
    }
}
