//! One-for-one supervision of continuously running tasks.
//!
//! A health loop polls each task at a fixed cadence. A task that has stopped
//! for any reason (error, panic, clean return) is logged, audited and started
//! again from its factory. Restarts are unlimited and immediate; the restart
//! counter and last restart time are exposed through [`Supervisor::stats`].

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vaultclaw_core::{Outcome, Result};
use vaultclaw_vault::Vault;

const ACTOR: &str = "Orchestrator";

type TaskFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct SupervisedTask {
    name: String,
    factory: TaskFactory,
    handle: JoinHandle<Result<()>>,
    restarts: u64,
    last_restart: Option<DateTime<Utc>>,
}

impl SupervisedTask {
    fn spawn(name: String, factory: TaskFactory) -> Self {
        let handle = tokio::spawn(factory());
        Self {
            name,
            factory,
            handle,
            restarts: 0,
            last_restart: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Collect the exit reason of a finished instance and start a new one.
    async fn restart(&mut self) -> String {
        let fresh = tokio::spawn((self.factory)());
        let dead = std::mem::replace(&mut self.handle, fresh);
        self.restarts += 1;
        self.last_restart = Some(Utc::now());
        match dead.await {
            Ok(Ok(())) => "exited".to_string(),
            Ok(Err(e)) => format!("failed: {e}"),
            Err(e) if e.is_panic() => "panicked".to_string(),
            Err(e) => format!("aborted: {e}"),
        }
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            name: self.name.clone(),
            alive: self.is_alive(),
            restarts: self.restarts,
            last_restart: self.last_restart,
        }
    }
}

/// Point-in-time view of a supervised task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStats {
    pub name: String,
    pub alive: bool,
    pub restarts: u64,
    pub last_restart: Option<DateTime<Utc>>,
}

pub struct Supervisor {
    vault: Vault,
    tasks: Vec<SupervisedTask>,
}

impl Supervisor {
    pub fn new(vault: Vault) -> Self {
        Self {
            vault,
            tasks: Vec::new(),
        }
    }

    /// Start `factory()` now and keep it running.
    pub fn spawn<F, Fut>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let factory: TaskFactory = Arc::new(move || factory().boxed());
        tracing::info!("🧵 {name} started");
        self.tasks.push(SupervisedTask::spawn(name.to_string(), factory));
    }

    pub fn stats(&self) -> Vec<TaskStats> {
        self.tasks.iter().map(SupervisedTask::stats).collect()
    }

    /// Restart every task that has stopped. Returns the restarted names.
    pub async fn check_once(&mut self) -> Vec<String> {
        let mut restarted = Vec::new();
        for task in self.tasks.iter_mut().filter(|t| !t.is_alive()) {
            let reason = task.restart().await;
            tracing::warn!(
                "⚠️ {} died ({reason}), restarting (restart #{})",
                task.name,
                task.restarts
            );
            if let Err(e) = self.vault.record(
                "watcher_restart",
                ACTOR,
                format!("{} restarted after it {reason} (restart #{})", task.name, task.restarts),
                Outcome::Warning,
            ) {
                tracing::warn!("⚠️ audit write failed: {e}");
            }
            restarted.push(task.name.clone());
        }
        restarted
    }

    /// Poll liveness every `every` until `shutdown` flips to true, then abort
    /// whatever is still running.
    pub async fn health_loop(&mut self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("🩺 Health monitor started (every {}s)", every.as_secs());
        loop {
            tokio::select! {
                _ = tokio::time::sleep(every) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    self.check_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        for task in &self.tasks {
            task.handle.abort();
        }
        tracing::info!("🩺 Health monitor stopped");
    }
}
