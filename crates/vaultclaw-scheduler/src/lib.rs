//! # VaultClaw Scheduler
//!
//! Drives the periodic side of the engine: interval and cron jobs, each in
//! its own failure domain, plus a one-for-one supervisor for the tasks that
//! run continuously.
//!
//! ## Architecture
//! ```text
//! Scheduler (tokio interval, tick_ms)
//!   ├── Interval: facebook / twitter / odoo watchers
//!   ├── Interval: error_recovery scan, dashboard_update
//!   ├── Cron "0 8 * * mon": weekly_briefing
//!   └── per job: single-flight guard, panics and errors logged
//!
//! Supervisor (health loop, 30s)
//!   └── drop-folder watcher: restarted whenever it stops
//! ```

pub mod cron;
pub mod engine;
pub mod jobs;
pub mod supervisor;

pub use cron::{CronSchedule, next_run_from_cron};
pub use engine::{FireOutcome, Scheduler};
pub use jobs::{JobStats, ScheduledJob, Trigger};
pub use supervisor::{SupervisedTask, Supervisor, TaskStats};
