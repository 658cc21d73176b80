//! Domain types shared between watchers, the vault and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Triage priority of a discovered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Result column of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    Warning,
    Skipped,
    PendingApproval,
    Queued,
    Retrying,
    Unrecoverable,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Warning => "warning",
            Outcome::Skipped => "skipped",
            Outcome::PendingApproval => "pending_approval",
            Outcome::Queued => "queued",
            Outcome::Retrying => "retrying",
            Outcome::Unrecoverable => "unrecoverable",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work surfaced by a watcher.
///
/// `source` + `subtype` form the item kind (`facebook` + `comment`);
/// `external_id` is the dedup key within that kind. Items such as balance
/// alerts have no external identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub source: String,
    pub subtype: String,
    pub external_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
}

impl ActionItem {
    pub fn new(source: &str, subtype: &str, title: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            subtype: subtype.to_string(),
            external_id: None,
            title: title.into(),
            summary: String::new(),
            payload: serde_json::Value::Null,
            created: Utc::now(),
            priority: Priority::Medium,
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// `facebook_comment`, `odoo_invoice`, ...
    pub fn kind(&self) -> String {
        format!("{}_{}", self.source, self.subtype)
    }

    /// Key under which a watcher remembers this item, if it has one.
    pub fn dedup_key(&self) -> Option<String> {
        self.external_id
            .as_ref()
            .map(|id| format!("{}:{}", self.subtype, id))
    }
}
