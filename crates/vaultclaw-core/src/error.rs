//! Error taxonomy shared by all VaultClaw crates.

use thiserror::Error;

/// Every failure a VaultClaw component can report.
#[derive(Debug, Error)]
pub enum VaultClawError {
    /// Network or auth failure talking to an external source.
    /// Watchers swallow this and return an empty tick.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A source has no credentials configured; its tick is skipped.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Local storage failure. Always propagated to the caller.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// The referenced workflow item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// An approved request was presented with a different call than the one
    /// a human signed off on.
    #[error("approval mismatch: {0}")]
    ApprovalMismatch(String),

    /// A workflow file whose header block cannot be parsed.
    #[error("malformed document: {0}")]
    Document(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl VaultClawError {
    /// Whether this error came from an external source rather than from us.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::NotConfigured(_))
    }
}

pub type Result<T> = std::result::Result<T, VaultClawError>;
