//! # VaultClaw Channels
//! External sources polled for new work, and the outbound calls that must
//! pass the approval gate.
//!
//! Every source plugs into the same [`watcher::PollingWatcher`], which owns
//! dedup and filing into `Needs_Action/`. Sources only know how to fetch.

pub mod facebook;
pub mod filesystem;
pub mod odoo;
pub mod twitter;
pub mod watcher;

pub use facebook::{FacebookClient, FacebookPost, FacebookSource};
pub use filesystem::{DropFolderSource, run_drop_folder};
pub use odoo::{OdooClient, OdooSource, RecordPayment};
pub use twitter::{Tweet, TwitterClient, TwitterSource};
pub use watcher::{EventSource, PollingWatcher, SeenSet, Watcher};

/// Shared HTTP client with a per-request timeout.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .user_agent(concat!("vaultclaw/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("⚠️ HTTP client builder failed, using defaults: {e}");
            reqwest::Client::new()
        })
}
