//! # VaultClaw Core
//!
//! Shared building blocks for every VaultClaw crate: the configuration tree,
//! the error taxonomy and the domain types that flow between watchers, the
//! vault and the scheduler.

pub mod config;
pub mod error;
pub mod types;

pub use config::VaultClawConfig;
pub use error::{Result, VaultClawError};
pub use types::{ActionItem, Outcome, Priority};
