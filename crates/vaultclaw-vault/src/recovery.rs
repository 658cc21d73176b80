//! Error queue: bounded retry of failed actions.
//!
//! ```text
//! queued ──retry──► retrying ──(count ≥ max)──► unrecoverable (moved to Done/)
//!    ▲                  │
//!    └── queue_for_retry on the next failure
//! ```
//!
//! A retry writes a working copy into `Needs_Action/` and leaves the
//! original in `Error_Queue/` with its counter and history updated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use vaultclaw_core::config::RecoveryConfig;
use vaultclaw_core::{Outcome, Result, VaultClawError};

use crate::document::{Document, ErrorItemHeader, ErrorStatus};
use crate::paths::{WorkflowState, item_filename};
use crate::store::Vault;

const ACTOR: &str = "ErrorRecovery";
const NO_HISTORY: &str = "*(none yet)*";

#[derive(Debug, Clone, Serialize)]
pub struct QueuedItem {
    pub file: String,
    pub path: PathBuf,
    pub action_type: String,
}

/// One row of `list_error_queue`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorQueueEntry {
    pub file: String,
    pub action_type: String,
    pub status: ErrorStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Unrecoverable {
    pub file: String,
    pub moved_to: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetryOutcome {
    Retrying {
        file: String,
        retry_count: u32,
        max_retries: u32,
        copy: PathBuf,
    },
    Unrecoverable(Unrecoverable),
}

#[derive(Debug, Clone)]
pub struct ErrorRecovery {
    vault: Vault,
    max_retries: u32,
}

impl ErrorRecovery {
    pub fn new(vault: Vault, max_retries: u32) -> Self {
        Self { vault, max_retries }
    }

    pub fn from_config(vault: Vault, config: &RecoveryConfig) -> Self {
        Self::new(vault, config.max_retries)
    }

    /// File a failed action. Only storage failures are reported.
    pub fn queue_for_retry(
        &self,
        action_type: &str,
        description: &str,
        payload: &serde_json::Value,
        error: &str,
    ) -> Result<QueuedItem> {
        let header = ErrorItemHeader::queued(action_type, self.max_retries);
        let payload = serde_json::to_string_pretty(payload)?;
        let body = format!(
            "# Error Queue: {action_type}\n\n\
             ## Description\n{description}\n\n\
             ## Original Error\n```\n{error}\n```\n\n\
             ## Payload\n```json\n{payload}\n```\n\n\
             ## Retry History\n{NO_HISTORY}\n"
        );
        let file_name = item_filename("error", action_type, None, header.created);
        let path = self
            .vault
            .write_new(WorkflowState::ErrorQueue, &file_name, &Document::new(header, body))?;
        let file = name_of(&path);

        tracing::warn!("🧯 Queued failed {action_type}: {description}");
        self.vault.record(
            "error_queued",
            ACTOR,
            format!("Queued {action_type}: {description}"),
            Outcome::Queued,
        )?;
        Ok(QueuedItem {
            file,
            path,
            action_type: action_type.to_string(),
        })
    }

    /// Every item in `Error_Queue/`. Files with unreadable headers are skipped.
    pub fn list_error_queue(&self) -> Result<Vec<ErrorQueueEntry>> {
        let mut items = Vec::new();
        for file in self.vault.list(WorkflowState::ErrorQueue)? {
            match self
                .vault
                .read_document::<ErrorItemHeader>(WorkflowState::ErrorQueue, &file)
            {
                Ok(doc) => items.push(ErrorQueueEntry {
                    file,
                    action_type: doc.header.action_type,
                    status: doc.header.status,
                    retry_count: doc.header.retry_count,
                    max_retries: doc.header.max_retries,
                    created: doc.header.created,
                }),
                Err(VaultClawError::Document(msg)) => {
                    tracing::warn!("⚠️ Skipping malformed error item: {msg}");
                }
                Err(e) => return Err(e),
            }
        }
        self.vault.record(
            "list_error_queue",
            ACTOR,
            format!("Listed {} error queue items", items.len()),
            Outcome::Success,
        )?;
        Ok(items)
    }

    /// Send an item back for another attempt, or give up on it once its
    /// counter has reached the limit.
    pub fn retry_failed_action(&self, file: &str) -> Result<RetryOutcome> {
        let mut doc: Document<ErrorItemHeader> =
            self.vault.read_document(WorkflowState::ErrorQueue, file)?;
        let max = doc.header.max_retries;
        if doc.header.retry_count >= max {
            let gave_up = self.mark_unrecoverable(file, &format!("Max retries ({max}) exceeded"))?;
            return Ok(RetryOutcome::Unrecoverable(gave_up));
        }

        let count = doc.header.retry_count + 1;
        doc.header.retry_count = count;
        doc.header.status = ErrorStatus::Retrying;
        let entry = format!("- Retry {count}: {}", Utc::now().to_rfc3339());
        if doc.body.contains(NO_HISTORY) {
            doc.body = doc.body.replacen(NO_HISTORY, &entry, 1);
        } else {
            if !doc.body.ends_with('\n') {
                doc.body.push('\n');
            }
            doc.body.push_str(&entry);
            doc.body.push('\n');
        }

        // Persist the counter before the copy so copies never outnumber it.
        self.vault.rewrite(WorkflowState::ErrorQueue, file, &doc)?;
        let copy = self.vault.write_new(
            WorkflowState::NeedsAction,
            &format!("RETRY_{count}_{file}"),
            &doc,
        )?;

        tracing::info!("🔁 Retry {count}/{max} for {file}");
        self.vault.record(
            "error_retry",
            ACTOR,
            format!("Retry {count}/{max} for {file}"),
            Outcome::Retrying,
        )?;
        Ok(RetryOutcome::Retrying {
            file: file.to_string(),
            retry_count: count,
            max_retries: max,
            copy,
        })
    }

    /// Give up on an item: status becomes `unrecoverable`, the reason is
    /// appended and the file moves to `Done/UNRECOVERABLE_<file>`.
    /// A second call for the same file is `NotFound`.
    pub fn mark_unrecoverable(&self, file: &str, reason: &str) -> Result<Unrecoverable> {
        let mut doc: Document<ErrorItemHeader> =
            self.vault.read_document(WorkflowState::ErrorQueue, file)?;
        doc.header.status = ErrorStatus::Unrecoverable;
        doc.body.push_str(&format!(
            "\n\n## Unrecoverable\n**Reason:** {reason}\n**Marked at:** {}\n",
            Utc::now().to_rfc3339()
        ));
        self.vault.rewrite(WorkflowState::ErrorQueue, file, &doc)?;
        let moved_to = self.vault.transition_as(
            file,
            WorkflowState::ErrorQueue,
            WorkflowState::Done,
            &format!("UNRECOVERABLE_{file}"),
            ACTOR,
        )?;

        tracing::error!("🪦 {file} unrecoverable: {reason}");
        self.vault.record(
            "error_unrecoverable",
            ACTOR,
            format!("{file}: {reason}"),
            Outcome::Unrecoverable,
        )?;
        Ok(Unrecoverable {
            file: file.to_string(),
            moved_to,
            reason: reason.to_string(),
        })
    }
}

fn name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recovery(dir: &std::path::Path) -> ErrorRecovery {
        ErrorRecovery::new(Vault::open(dir).unwrap(), 3)
    }

    #[test]
    fn test_queue_for_retry_creates_queued_item() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        let queued = rec
            .queue_for_retry("facebook_post", "desc", &json!({"message": "hi"}), "timeout")
            .unwrap();
        assert!(queued.file.starts_with("ERROR_FACEBOOK_POST_"));

        let doc: Document<ErrorItemHeader> = rec
            .vault
            .read_document(WorkflowState::ErrorQueue, &queued.file)
            .unwrap();
        assert_eq!(doc.header.status, ErrorStatus::Queued);
        assert_eq!(doc.header.retry_count, 0);
        assert_eq!(doc.header.max_retries, 3);
        assert!(doc.body.contains("## Original Error\n```\ntimeout\n```"));
        assert!(doc.body.contains("\"message\": \"hi\""));
        assert!(doc.body.contains(NO_HISTORY));
    }

    #[test]
    fn test_same_second_queueing_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        let a = rec.queue_for_retry("odoo_payment", "a", &json!({}), "e").unwrap();
        let b = rec.queue_for_retry("odoo_payment", "b", &json!({}), "e").unwrap();
        assert_ne!(a.file, b.file);
        assert_eq!(rec.list_error_queue().unwrap().len(), 2);
    }

    #[test]
    fn test_retry_cycle_until_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        let file = rec
            .queue_for_retry("facebook_post", "desc", &json!({}), "timeout")
            .unwrap()
            .file;

        for expected in 1..=3 {
            match rec.retry_failed_action(&file).unwrap() {
                RetryOutcome::Retrying { retry_count, copy, .. } => {
                    assert_eq!(retry_count, expected);
                    assert!(name_of(&copy).starts_with(&format!("RETRY_{expected}_ERROR_")));
                }
                other => panic!("unexpected {other:?}"),
            }
            let doc: Document<ErrorItemHeader> =
                rec.vault.read_document(WorkflowState::ErrorQueue, &file).unwrap();
            assert_eq!(doc.header.retry_count, expected);
            assert_eq!(doc.header.status, ErrorStatus::Retrying);
        }
        assert_eq!(rec.vault.count(WorkflowState::NeedsAction).unwrap(), 3);

        // Counter is at the limit: escalate, no fourth copy.
        let RetryOutcome::Unrecoverable(gave_up) = rec.retry_failed_action(&file).unwrap() else {
            panic!("expected escalation");
        };
        assert_eq!(gave_up.reason, "Max retries (3) exceeded");
        assert_eq!(rec.vault.count(WorkflowState::NeedsAction).unwrap(), 3);
        assert_eq!(rec.vault.count(WorkflowState::ErrorQueue).unwrap(), 0);

        let done_name = format!("UNRECOVERABLE_{file}");
        let doc: Document<ErrorItemHeader> =
            rec.vault.read_document(WorkflowState::Done, &done_name).unwrap();
        assert_eq!(doc.header.status, ErrorStatus::Unrecoverable);
        assert_eq!(doc.header.retry_count, 3);
        assert!(doc.body.contains("- Retry 1:"));
        assert!(doc.body.contains("- Retry 3:"));
        assert!(doc.body.contains("**Reason:** Max retries (3) exceeded"));

        // Gone from the queue: further calls are NotFound.
        assert!(matches!(
            rec.retry_failed_action(&file).unwrap_err(),
            VaultClawError::NotFound(_)
        ));
    }

    #[test]
    fn test_retry_copy_carries_updated_counter() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        let file = rec.queue_for_retry("twitter_post", "d", &json!({}), "503").unwrap().file;
        let RetryOutcome::Retrying { copy, .. } = rec.retry_failed_action(&file).unwrap() else {
            panic!("expected retrying");
        };
        let doc: Document<ErrorItemHeader> = rec
            .vault
            .read_document(WorkflowState::NeedsAction, &name_of(&copy))
            .unwrap();
        assert_eq!(doc.header.retry_count, 1);
        assert!(!doc.body.contains(NO_HISTORY));
    }

    #[test]
    fn test_retry_counter_persists_before_copy() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        let file = rec.queue_for_retry("odoo_payment", "d", &json!({}), "e").unwrap().file;

        // Needs_Action unusable: the copy cannot be written.
        let needs_action = rec.vault.dir(WorkflowState::NeedsAction);
        std::fs::remove_dir(&needs_action).unwrap();
        std::fs::write(&needs_action, "not a folder").unwrap();
        assert!(rec.retry_failed_action(&file).is_err());

        let doc: Document<ErrorItemHeader> =
            rec.vault.read_document(WorkflowState::ErrorQueue, &file).unwrap();
        assert_eq!(doc.header.retry_count, 1);

        std::fs::remove_file(&needs_action).unwrap();
        std::fs::create_dir(&needs_action).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                rec.retry_failed_action(&file).unwrap(),
                RetryOutcome::Retrying { .. }
            ));
        }
        assert!(matches!(
            rec.retry_failed_action(&file).unwrap(),
            RetryOutcome::Unrecoverable(_)
        ));
        assert_eq!(rec.vault.count(WorkflowState::NeedsAction).unwrap(), 2);
    }

    #[test]
    fn test_mark_unrecoverable_is_idempotent_in_effect() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        let file = rec.queue_for_retry("odoo_payment", "d", &json!({}), "e").unwrap().file;

        let first = rec.mark_unrecoverable(&file, "manual").unwrap();
        assert!(first.moved_to.ends_with(format!("Done/UNRECOVERABLE_{file}")));
        assert_eq!(rec.vault.locate(&file), None);

        let err = rec.mark_unrecoverable(&file, "manual").unwrap_err();
        assert!(matches!(err, VaultClawError::NotFound(_)));
        assert_eq!(rec.vault.count(WorkflowState::Done).unwrap(), 1);
    }

    #[test]
    fn test_list_skips_malformed_items() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        rec.queue_for_retry("odoo_payment", "d", &json!({}), "e").unwrap();
        std::fs::write(rec.vault.dir(WorkflowState::ErrorQueue).join("junk.md"), "no header").unwrap();

        let items = rec.list_error_queue().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].action_type, "odoo_payment");
        assert_eq!(items[0].status, ErrorStatus::Queued);
    }

    #[test]
    fn test_unknown_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recovery(dir.path());
        assert!(matches!(
            rec.retry_failed_action("nope.md").unwrap_err(),
            VaultClawError::NotFound(_)
        ));
    }
}
