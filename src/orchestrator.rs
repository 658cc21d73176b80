//! Wires the vault, watchers, maintenance jobs and the supervised drop
//! folder watcher into one running process.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use vaultclaw_channels::{
    DropFolderSource, EventSource, FacebookClient, FacebookSource, OdooClient, OdooSource,
    PollingWatcher, SeenSet, TwitterClient, TwitterSource, Watcher, run_drop_folder,
};
use vaultclaw_core::{Outcome, VaultClawConfig};
use vaultclaw_scheduler::{Scheduler, Supervisor, Trigger};
use vaultclaw_vault::{BackoffPolicy, Vault, WorkflowState, report};

const ACTOR: &str = "Orchestrator";
const DROP_WATCHER: &str = "FileSystemWatcher";
const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    config: Arc<VaultClawConfig>,
    vault: Vault,
    drop_seen: SeenSet,
}

impl Orchestrator {
    /// Open (and lay out) the configured vault.
    pub fn new(config: VaultClawConfig) -> vaultclaw_core::Result<Self> {
        let vault = Vault::open(config.vault.root())?;
        Ok(Self {
            config: Arc::new(config),
            vault,
            drop_seen: SeenSet::new(),
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Every periodic job: the three watchers, the error queue scan, the
    /// dashboard refresh and the weekly briefing.
    pub fn build_scheduler(&self) -> vaultclaw_core::Result<Scheduler> {
        let cfg = &self.config;
        let s = &cfg.schedule;
        let mut scheduler = Scheduler::new(Duration::from_millis(s.tick_ms));

        let facebook = FacebookSource::new(FacebookClient::new(cfg.facebook.clone()));
        scheduler.add_job(
            "facebook_watcher",
            Trigger::every_secs(s.facebook_interval_secs),
            watcher_job(PollingWatcher::new(facebook, self.vault.clone())),
        )?;

        let twitter = TwitterSource::new(TwitterClient::new(cfg.twitter.clone()));
        scheduler.add_job(
            "twitter_watcher",
            Trigger::every_secs(s.twitter_interval_secs),
            watcher_job(PollingWatcher::new(twitter, self.vault.clone())),
        )?;

        let odoo = OdooSource::new(
            OdooClient::new(cfg.odoo.clone(), BackoffPolicy::from_config(&cfg.recovery)),
            cfg.odoo.low_balance_threshold,
        );
        scheduler.add_job(
            "odoo_watcher",
            Trigger::every_secs(s.odoo_interval_secs),
            watcher_job(PollingWatcher::new(odoo, self.vault.clone())),
        )?;

        let vault = self.vault.clone();
        scheduler.add_job(
            "error_recovery",
            Trigger::every_secs(s.error_recovery_interval_secs),
            move || {
                let vault = vault.clone();
                async move { scan_error_queue(&vault).map(|_| ()) }
            },
        )?;

        let vault = self.vault.clone();
        scheduler.add_job(
            "dashboard_update",
            Trigger::every_secs(s.dashboard_interval_secs),
            move || {
                let vault = vault.clone();
                async move { report::write_dashboard(&vault).map(|_| ()) }
            },
        )?;

        let vault = self.vault.clone();
        scheduler.add_job(
            "weekly_briefing",
            Trigger::cron(&s.briefing_cron())?,
            move || {
                let vault = vault.clone();
                async move {
                    let path = report::generate_weekly_briefing(&vault)?;
                    tracing::info!("📰 Weekly briefing written: {}", path.display());
                    Ok(())
                }
            },
        )?;

        Ok(scheduler)
    }

    /// The supervisor with the drop folder watcher already running. Each
    /// restart builds a fresh watcher that shares the same seen set.
    pub fn build_supervisor(&self, shutdown: watch::Receiver<bool>) -> Supervisor {
        let mut supervisor = Supervisor::new(self.vault.clone());
        let vault = self.vault.clone();
        let seen = self.drop_seen.clone();
        let drop_dir = self.config.vault.drop_dir();
        let poll = Duration::from_secs(self.config.schedule.drop_poll_secs);

        supervisor.spawn(DROP_WATCHER, move || {
            let watcher = PollingWatcher::with_seen(
                DropFolderSource::new(drop_dir.clone()),
                vault.clone(),
                seen.clone(),
            )
            .quiet_when_idle();
            run_drop_folder(watcher, poll, shutdown.clone())
        });
        supervisor
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        let running = self.start()?;
        tokio::signal::ctrl_c().await?;
        tracing::info!("🛑 Shutdown requested");
        self.stop(running).await;
        Ok(())
    }

    /// Record the start, refresh the dashboard and spawn the scheduler and
    /// the health monitor.
    pub(crate) fn start(&self) -> anyhow::Result<Running> {
        let s = &self.config.schedule;
        tracing::info!("🗄️ VaultClaw orchestrator v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("   Vault:     {}", self.vault.root().display());
        tracing::info!("   Drop:      {}", self.config.vault.drop_dir().display());
        tracing::info!(
            "   Watchers:  facebook {}s, twitter {}s, odoo {}s",
            s.facebook_interval_secs,
            s.twitter_interval_secs,
            s.odoo_interval_secs
        );
        tracing::info!(
            "   Briefing:  {} {:02}:00 UTC",
            s.briefing_day.to_uppercase(),
            s.briefing_hour
        );

        self.vault
            .record("orchestrator_start", ACTOR, "Orchestrator started", Outcome::Success)?;
        report::write_dashboard(&self.vault)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let scheduler = self.build_scheduler()?;
        let supervisor = self.build_supervisor(shutdown_rx);
        Ok(Running::spawn(
            shutdown,
            scheduler,
            supervisor,
            Duration::from_secs(s.health_check_secs),
        ))
    }

    /// Record the stop and signal both loops. Jobs already running are not
    /// awaited; supervised tasks are aborted by the health monitor.
    pub(crate) async fn stop(&self, running: Running) {
        if let Err(e) = self
            .vault
            .record("orchestrator_stop", ACTOR, "Stopped by user", Outcome::Success)
        {
            tracing::warn!("⚠️ audit write failed: {e}");
        }

        let Running { shutdown, scheduler, health } = running;
        let _ = shutdown.send(true);
        match tokio::time::timeout(STOP_GRACE, async { (scheduler.await, health.await) }).await {
            Ok((Ok(scheduler), Ok(supervisor))) => log_final_stats(&scheduler, &supervisor),
            Ok(_) => tracing::warn!("⚠️ A background loop ended abnormally"),
            Err(_) => tracing::warn!(
                "⚠️ Background loops still running after {}s",
                STOP_GRACE.as_secs()
            ),
        }
        tracing::info!("👋 Orchestrator stopped");
    }
}

/// The two background loops of a started orchestrator.
pub(crate) struct Running {
    shutdown: watch::Sender<bool>,
    scheduler: JoinHandle<Scheduler>,
    health: JoinHandle<Supervisor>,
}

impl Running {
    pub(crate) fn spawn(
        shutdown: watch::Sender<bool>,
        mut scheduler: Scheduler,
        mut supervisor: Supervisor,
        health_every: Duration,
    ) -> Self {
        let scheduler_rx = shutdown.subscribe();
        let health_rx = shutdown.subscribe();
        let scheduler = tokio::spawn(async move {
            scheduler.run(scheduler_rx).await;
            scheduler
        });
        let health = tokio::spawn(async move {
            supervisor.health_loop(health_every, health_rx).await;
            supervisor
        });
        Self { shutdown, scheduler, health }
    }
}

fn log_final_stats(scheduler: &Scheduler, supervisor: &Supervisor) {
    for job in scheduler.stats() {
        tracing::info!(
            "📊 {}: {} run(s), {} skipped, {} failed",
            job.id,
            job.runs,
            job.skipped,
            job.failures
        );
    }
    for task in supervisor.stats() {
        tracing::info!("🧵 {}: {} restart(s)", task.name, task.restarts);
    }
}

/// Job body for a polling watcher. The mutex is never contended: the
/// scheduler runs at most one instance of a job at a time.
fn watcher_job<S>(
    watcher: PollingWatcher<S>,
) -> impl Fn() -> BoxFuture<'static, vaultclaw_core::Result<()>> + Send + Sync + 'static
where
    S: EventSource + 'static,
{
    let watcher = Arc::new(Mutex::new(watcher));
    move || {
        let watcher = watcher.clone();
        async move {
            let mut watcher = watcher.lock().await;
            let filed = watcher.tick().await?;
            if filed > 0 {
                tracing::info!("📥 [{}] filed {filed} new item(s)", watcher.name());
            }
            Ok(())
        }
        .boxed()
    }
}

/// Count items waiting in `Error_Queue/` and flag them for an operator.
pub(crate) fn scan_error_queue(vault: &Vault) -> vaultclaw_core::Result<usize> {
    let queued = vault.count(WorkflowState::ErrorQueue)?;
    if queued == 0 {
        tracing::info!("🧯 Error_Queue is empty");
        return Ok(0);
    }
    tracing::warn!("🧯 {queued} item(s) in Error_Queue awaiting retry");
    vault.record(
        "error_recovery_scan",
        ACTOR,
        format!("{queued} item(s) in Error_Queue awaiting retry"),
        Outcome::Warning,
    )?;
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;
    use vaultclaw_scheduler::FireOutcome;
    use vaultclaw_vault::ErrorRecovery;

    fn orchestrator() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = VaultClawConfig::default();
        config.vault.path = dir.path().join("vault").to_string_lossy().into_owned();
        config.vault.drop_folder = Some(dir.path().join("drop").to_string_lossy().into_owned());
        config.schedule.drop_poll_secs = 1;
        let orchestrator = Orchestrator::new(config).unwrap();
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn test_scheduler_has_every_job() {
        let (_dir, orchestrator) = orchestrator();
        let scheduler = orchestrator.build_scheduler().unwrap();
        let ids: Vec<String> = scheduler.stats().into_iter().map(|s| s.id).collect();
        assert_eq!(
            ids,
            [
                "facebook_watcher",
                "twitter_watcher",
                "odoo_watcher",
                "error_recovery",
                "dashboard_update",
                "weekly_briefing",
            ]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_watcher_job_succeeds() {
        let (_dir, orchestrator) = orchestrator();
        let job = watcher_job(PollingWatcher::new(
            FacebookSource::new(FacebookClient::new(Default::default())),
            orchestrator.vault().clone(),
        ));
        assert!(job().await.is_ok());

        let audit = orchestrator.vault().audit().recent(1).unwrap();
        assert_eq!(audit[0].action_type, "facebook_check");
        assert_eq!(audit[0].result, Outcome::Skipped);
    }

    #[test]
    fn test_error_queue_scan() {
        let (_dir, orchestrator) = orchestrator();
        let vault = orchestrator.vault();
        assert_eq!(scan_error_queue(vault).unwrap(), 0);
        assert!(vault.audit().recent(5).unwrap().is_empty());

        ErrorRecovery::new(vault.clone(), 3)
            .queue_for_retry("twitter_post", "Reply to mention", &serde_json::json!({}), "HTTP 429")
            .unwrap();
        assert_eq!(scan_error_queue(vault).unwrap(), 1);
        let last = vault.audit().recent(1).unwrap();
        assert_eq!(last[0].action_type, "error_recovery_scan");
        assert_eq!(last[0].result, Outcome::Warning);
    }

    #[tokio::test]
    async fn test_supervised_drop_watcher_files_drops() {
        let (dir, orchestrator) = orchestrator();
        let drop = dir.path().join("drop");
        std::fs::create_dir_all(&drop).unwrap();
        std::fs::write(drop.join("receipt.png"), b"png").unwrap();

        let (tx, rx) = watch::channel(false);
        let supervisor = orchestrator.build_supervisor(rx);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let filed = orchestrator.vault().list(WorkflowState::NeedsAction).unwrap();
        assert_eq!(filed.len(), 1);
        assert!(filed[0].starts_with("FILE_DROP_receipt-png_"));
        assert!(supervisor.stats()[0].alive);
        tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_start_then_stop_is_audited() {
        let (_dir, orchestrator) = orchestrator();
        let running = orchestrator.start().unwrap();
        assert!(orchestrator.vault().root().join("Dashboard.md").is_file());

        tokio::time::timeout(Duration::from_secs(10), orchestrator.stop(running))
            .await
            .unwrap();
        let actions: Vec<String> = orchestrator
            .vault()
            .audit()
            .recent(50)
            .unwrap()
            .into_iter()
            .map(|e| e.action_type)
            .collect();
        assert!(actions.contains(&"orchestrator_start".to_string()));
        assert!(actions.contains(&"orchestrator_stop".to_string()));
    }

    #[tokio::test]
    async fn test_stop_leaves_running_jobs_and_aborts_supervised_tasks() {
        let (_dir, orchestrator) = orchestrator();
        let vault = orchestrator.vault().clone();

        let finished = Arc::new(AtomicBool::new(false));
        let mut scheduler = Scheduler::new(Duration::from_millis(10));
        let f = finished.clone();
        scheduler
            .add_job("odoo_watcher", Trigger::every_secs(3600), move || {
                let f = f.clone();
                async move {
                    std::future::pending::<()>().await;
                    f.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(scheduler.try_fire("odoo_watcher"), FireOutcome::Started);

        // The supervised task holds the sender; aborting it drops the sender.
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let alive_tx = Arc::new(std::sync::Mutex::new(Some(alive_tx)));
        let mut supervisor = Supervisor::new(vault.clone());
        supervisor.spawn(DROP_WATCHER, move || {
            let held = alive_tx.lock().unwrap().take();
            async move {
                let _held = held;
                std::future::pending::<()>().await;
                Ok(())
            }
        });

        let (shutdown, _rx) = watch::channel(false);
        let running = Running::spawn(shutdown, scheduler, supervisor, Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), orchestrator.stop(running))
            .await
            .expect("stop must not wait for the blocked job");
        assert!(!finished.load(Ordering::SeqCst));

        let last = vault.audit().recent(1).unwrap();
        assert_eq!(last[0].action_type, "orchestrator_stop");

        let dropped = tokio::time::timeout(Duration::from_secs(2), alive_rx).await.unwrap();
        assert!(dropped.is_err());
    }
}
