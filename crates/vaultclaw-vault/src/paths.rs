//! Workflow states, their directories and the allowed moves between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const AUDITS_WEEKLY_DIR: &str = "Audits/Weekly";
pub const LOGS_DIR: &str = "Logs";
pub const DASHBOARD_FILE: &str = "Dashboard.md";

/// A workflow state. Each state is one directory under the vault root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    NeedsAction,
    PendingApproval,
    Approved,
    Rejected,
    Done,
    ErrorQueue,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 6] = [
        WorkflowState::NeedsAction,
        WorkflowState::PendingApproval,
        WorkflowState::Approved,
        WorkflowState::Rejected,
        WorkflowState::Done,
        WorkflowState::ErrorQueue,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            WorkflowState::NeedsAction => "Needs_Action",
            WorkflowState::PendingApproval => "Pending_Approval",
            WorkflowState::Approved => "Approved",
            WorkflowState::Rejected => "Rejected",
            WorkflowState::Done => "Done",
            WorkflowState::ErrorQueue => "Error_Queue",
        }
    }

    /// Terminal states accept no further moves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Rejected)
    }

    /// Whether an item may move from `self` to `to`.
    ///
    /// ```text
    /// Needs_Action → Pending_Approval → Approved → Done
    ///                                 ↘ Rejected
    /// Needs_Action → Done
    /// (any non-terminal) → Error_Queue → Needs_Action | Done
    /// ```
    pub fn can_transition_to(&self, to: WorkflowState) -> bool {
        use WorkflowState::*;
        match (self, to) {
            (NeedsAction, PendingApproval) | (NeedsAction, Done) => true,
            (PendingApproval, Approved) | (PendingApproval, Rejected) => true,
            (Approved, Done) => true,
            (ErrorQueue, NeedsAction) | (ErrorQueue, Done) => true,
            (from, ErrorQueue) => !from.is_terminal() && *from != ErrorQueue,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().trim_matches('/').to_ascii_lowercase().replace('-', "_");
        WorkflowState::ALL
            .into_iter()
            .find(|st| st.dir_name().to_ascii_lowercase() == norm)
            .ok_or_else(|| format!("unknown workflow state: {s}"))
    }
}

/// `20260222_150405`, the timestamp component of vault file names.
pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Make an arbitrary identifier safe to embed in a file name.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        "X".to_string()
    } else {
        trimmed.chars().take(64).collect()
    }
}

/// `<KIND>_<SUBTYPE>_<EXTERNAL_ID>_<TIMESTAMP>.md`, or `<KIND>_<SUBTYPE>_<TIMESTAMP>.md`
/// when there is no external id.
pub fn item_filename(kind: &str, subtype: &str, external_id: Option<&str>, at: DateTime<Utc>) -> String {
    let mut name = format!(
        "{}_{}",
        sanitize_component(kind).to_ascii_uppercase(),
        sanitize_component(subtype).to_ascii_uppercase()
    );
    if let Some(id) = external_id {
        name.push('_');
        name.push_str(&sanitize_component(id));
    }
    name.push('_');
    name.push_str(&timestamp_slug(at));
    name.push_str(".md");
    name
}
