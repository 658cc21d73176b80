//! # VaultClaw Vault
//!
//! The vault is a directory tree whose folders are the states of every
//! workflow item. Ownership of an item moves with its file.
//!
//! ## Layout
//! ```text
//! <vault>/
//!   ├── Needs_Action/       discovered, unprocessed
//!   ├── Pending_Approval/   awaiting a human decision
//!   ├── Approved/           signed off, picked up by an executor
//!   ├── Rejected/           terminal
//!   ├── Done/               terminal, audit trail
//!   ├── Error_Queue/        failed, awaiting bounded retry
//!   ├── Audits/Weekly/      weekly briefings
//!   ├── Logs/<date>.json    append-only audit log
//!   └── Dashboard.md
//! ```
//!
//! No locks are taken. Writers never overwrite each other because every
//! file name embeds kind, external id and timestamp, and new files are
//! persisted with no-clobber semantics.

pub mod approval;
pub mod audit;
pub mod backoff;
pub mod document;
pub mod io;
pub mod paths;
pub mod recovery;
pub mod report;
pub mod store;

pub use approval::{ApprovalPolicy, ApprovalToken, GateOutcome, GatedAction, HitlGate};
pub use audit::{AuditEntry, AuditLog};
pub use backoff::{BackoffPolicy, retry_with_backoff};
pub use document::{ActionHeader, ApprovalHeader, ApprovalStatus, Document, ErrorItemHeader, ErrorStatus};
pub use paths::WorkflowState;
pub use recovery::{ErrorQueueEntry, ErrorRecovery, QueuedItem, RetryOutcome, Unrecoverable};
pub use store::Vault;
