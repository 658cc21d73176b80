//! Workflow item files: a `---` delimited YAML header followed by a free-text body.
//!
//! Each item kind has its own typed header so status fields are never
//! scraped out of text. The on-disk layout stays readable for operators:
//!
//! ```text
//! ---
//! type: error_queue_item
//! action_type: facebook_post
//! retry_count: 0
//! ...
//! ---
//!
//! # Error Queue: facebook_post
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use vaultclaw_core::{Priority, Result, VaultClawError};

const FENCE: &str = "---";

/// A parsed workflow file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document<H> {
    pub header: H,
    pub body: String,
}

impl<H> Document<H> {
    pub fn new(header: H, body: impl Into<String>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }
}

impl<H: Serialize> Document<H> {
    pub fn render(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.header)?;
        let mut out = String::with_capacity(yaml.len() + self.body.len() + 16);
        out.push_str(FENCE);
        out.push('\n');
        out.push_str(&yaml);
        if !yaml.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(FENCE);
        out.push_str("\n\n");
        out.push_str(&self.body);
        Ok(out)
    }
}

impl<H: DeserializeOwned> Document<H> {
    pub fn parse(text: &str) -> Result<Self> {
        let (yaml, body) = split_header(text)?;
        let header = serde_yaml::from_str(yaml)
            .map_err(|e| VaultClawError::Document(format!("bad header: {e}")))?;
        Ok(Self {
            header,
            body: body.to_string(),
        })
    }
}

/// Split a file into its header block and body. The single blank line after
/// the closing fence belongs to the layout, not to the body.
fn split_header(text: &str) -> Result<(&str, &str)> {
    let rest = text
        .strip_prefix("---\r\n")
        .or_else(|| text.strip_prefix("---\n"))
        .ok_or_else(|| VaultClawError::Document("missing opening '---'".into()))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let yaml = &rest[..offset];
            let mut body = &rest[offset + line.len()..];
            body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            return Ok((yaml, body));
        }
        offset += line.len();
    }
    Err(VaultClawError::Document("missing closing '---'".into()))
}

/// Header of an item a watcher drops into `Needs_Action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHeader {
    /// Item kind, e.g. `facebook_comment`.
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_action_status")]
    pub status: String,
}

fn default_action_status() -> String { "pending".into() }

impl ActionHeader {
    pub fn for_item(item: &vaultclaw_core::ActionItem) -> Self {
        Self {
            kind: item.kind(),
            source: item.source.clone(),
            external_id: item.external_id.clone(),
            created: item.created,
            priority: item.priority,
            status: default_action_status(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Header of a deferred side effect waiting in `Pending_Approval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalHeader {
    #[serde(rename = "type")]
    pub kind: String,
    /// The gated action, e.g. `odoo_payment`.
    pub action: String,
    pub created: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Arguments of the call as approved. Execution must present the same.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ApprovalHeader {
    pub const TYPE: &'static str = "approval_request";

    pub fn pending(action: &str, amount: Option<f64>, payload: serde_json::Value) -> Self {
        Self {
            kind: Self::TYPE.into(),
            action: action.into(),
            created: Utc::now(),
            status: ApprovalStatus::Pending,
            amount,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    Queued,
    Retrying,
    Unrecoverable,
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorStatus::Queued => write!(f, "queued"),
            ErrorStatus::Retrying => write!(f, "retrying"),
            ErrorStatus::Unrecoverable => write!(f, "unrecoverable"),
        }
    }
}

/// Header of a failed action in `Error_Queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorItemHeader {
    #[serde(rename = "type")]
    pub kind: String,
    pub action_type: String,
    pub created: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: ErrorStatus,
}

impl ErrorItemHeader {
    pub const TYPE: &'static str = "error_queue_item";

    pub fn queued(action_type: &str, max_retries: u32) -> Self {
        Self {
            kind: Self::TYPE.into(),
            action_type: action_type.into(),
            created: Utc::now(),
            retry_count: 0,
            max_retries,
            status: ErrorStatus::Queued,
        }
    }
}
