//! Human-in-the-loop gate for outbound side effects.
//!
//! Every side-effecting call is a [`GatedAction`]. Its `execute` needs an
//! [`ApprovalToken`], and tokens are only minted inside this module: either
//! when the policy lets the call through, or when the request has been moved
//! to `Approved/` by a human. There is no other way to run the call.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use vaultclaw_core::config::ApprovalConfig;
use vaultclaw_core::{Outcome, Result, VaultClawError};

use crate::document::{ApprovalHeader, ApprovalStatus, Document};
use crate::paths::{WorkflowState, item_filename};
use crate::store::Vault;

const ACTOR: &str = "HitlGate";

/// When a call must wait for a human.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    threshold: f64,
    always_gated: HashSet<String>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::from_config(&ApprovalConfig::default())
    }
}

impl ApprovalPolicy {
    pub fn new(threshold: f64, always_gated: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            threshold,
            always_gated: always_gated.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self::new(config.threshold, config.always_gated.iter().cloned())
    }

    /// True when the kind is always gated or the amount is strictly above
    /// the threshold.
    pub fn requires_approval(&self, kind: &str, amount: Option<f64>) -> bool {
        self.always_gated.contains(kind) || amount.is_some_and(|a| a > self.threshold)
    }
}

/// Proof that the gate cleared a call. Cannot be built outside this module.
#[derive(Debug)]
pub struct ApprovalToken {
    _sealed: (),
}

impl ApprovalToken {
    fn mint() -> Self {
        Self { _sealed: () }
    }
}

/// An outbound call that may have to wait for sign-off.
#[async_trait]
pub trait GatedAction: Send + Sized {
    /// Category used by the policy and in file names, e.g. `odoo_payment`.
    fn kind(&self) -> &str;

    /// Monetary amount, if the action moves money.
    fn amount(&self) -> Option<f64> {
        None
    }

    /// One-line human summary.
    fn describe(&self) -> String;

    /// The call's arguments, stored in the approval request.
    fn payload(&self) -> serde_json::Value;

    /// Perform the side effect.
    async fn execute(self, token: ApprovalToken) -> Result<serde_json::Value>;
}

/// What happened to a submitted action.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateOutcome {
    PendingApproval { approval_file: PathBuf },
    Executed { result: serde_json::Value },
}

impl GateOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            GateOutcome::PendingApproval { .. } => "pending_approval",
            GateOutcome::Executed { .. } => "executed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HitlGate {
    vault: Vault,
    policy: ApprovalPolicy,
}

impl HitlGate {
    pub fn new(vault: Vault, policy: ApprovalPolicy) -> Self {
        Self { vault, policy }
    }

    /// Run `action` now, or park it in `Pending_Approval` if the policy says so.
    ///
    /// A parked action is not executed. Failure to persist the request is
    /// returned as an error, since nothing else records it.
    pub async fn submit<A: GatedAction>(&self, action: A) -> Result<GateOutcome> {
        let kind = action.kind().to_string();
        if self.policy.requires_approval(&kind, action.amount()) {
            let path = self.park(&action)?;
            let name = file_name_of(&path);
            tracing::info!("⏸️ {kind} routed to approval: {name}");
            self.vault.record(
                &kind,
                ACTOR,
                format!("{} routed to HITL: {name}", action.describe()),
                Outcome::PendingApproval,
            )?;
            return Ok(GateOutcome::PendingApproval { approval_file: path });
        }

        self.run(action, ApprovalToken::mint()).await
    }

    /// Execute a request a human has already moved to `Approved/`.
    ///
    /// `action` must be the call that was approved: same kind, amount and
    /// payload. The request is filed under `Done/` before the call runs, so
    /// one approval releases at most one execution.
    pub async fn execute_approved<A: GatedAction>(
        &self,
        approval_file: &str,
        action: A,
    ) -> Result<GateOutcome> {
        let mut doc: Document<ApprovalHeader> =
            self.vault.read_document(WorkflowState::Approved, approval_file)?;
        if let Err(e) = ensure_matches(&doc.header, &action) {
            tracing::warn!("🚫 {approval_file} refused: {e}");
            if let Err(audit) =
                self.vault
                    .record(action.kind(), ACTOR, format!("{approval_file}: {e}"), Outcome::Error)
            {
                tracing::warn!("⚠️ Failed to audit refusal: {audit}");
            }
            return Err(e);
        }

        doc.body.push_str(&format!("\n## Released\n**At:** {}\n", Utc::now().to_rfc3339()));
        self.vault.rewrite(WorkflowState::Approved, approval_file, &doc)?;
        self.vault
            .transition(approval_file, WorkflowState::Approved, WorkflowState::Done, ACTOR)?;
        self.run(action, ApprovalToken::mint()).await
    }

    /// Human sign-off: `Pending_Approval` → `Approved`.
    pub fn approve(&self, approval_file: &str, actor: &str) -> Result<PathBuf> {
        self.decide(approval_file, actor, WorkflowState::Approved)
    }

    /// Human refusal: `Pending_Approval` → `Rejected`.
    pub fn reject(&self, approval_file: &str, actor: &str) -> Result<PathBuf> {
        self.decide(approval_file, actor, WorkflowState::Rejected)
    }

    fn decide(&self, approval_file: &str, actor: &str, to: WorkflowState) -> Result<PathBuf> {
        let mut doc: Document<ApprovalHeader> =
            self.vault.read_document(WorkflowState::PendingApproval, approval_file)?;
        doc.header.status = match to {
            WorkflowState::Approved => ApprovalStatus::Approved,
            _ => ApprovalStatus::Rejected,
        };
        self.vault.rewrite(WorkflowState::PendingApproval, approval_file, &doc)?;
        let dest = self
            .vault
            .transition(approval_file, WorkflowState::PendingApproval, to, actor)?;
        tracing::info!("🧑‍⚖️ {approval_file} → {to} by {actor}");
        Ok(dest)
    }

    fn park<A: GatedAction>(&self, action: &A) -> Result<PathBuf> {
        let kind = action.kind();
        let header = ApprovalHeader::pending(kind, action.amount(), action.payload());
        let payload = serde_json::to_string_pretty(&header.payload)?;

        let mut body = format!("# Approval Required: {kind}\n\n{}\n\n", action.describe());
        if let Some(amount) = action.amount().filter(|a| *a > self.policy.threshold) {
            body.push_str(&format!(
                "**Amount ${amount:.2} exceeds auto-approve threshold (${:.0})**\n\n",
                self.policy.threshold
            ));
        }
        body.push_str(&format!("## Action Details\n```json\n{payload}\n```\n\n"));
        body.push_str("## Instructions\nMove this file to `/Approved/` to confirm, or `/Rejected/` to cancel.\n");

        let file_name = item_filename("approval", kind, None, header.created);
        self.vault
            .write_new(WorkflowState::PendingApproval, &file_name, &Document::new(header, body))
    }

    async fn run<A: GatedAction>(&self, action: A, token: ApprovalToken) -> Result<GateOutcome> {
        let kind = action.kind().to_string();
        let summary = action.describe();
        match action.execute(token).await {
            Ok(result) => {
                // The call already ran; audit trouble is only logged.
                if let Err(e) = self.vault.record(&kind, ACTOR, summary, Outcome::Success) {
                    tracing::warn!("⚠️ Failed to audit {kind}: {e}");
                }
                Ok(GateOutcome::Executed { result })
            }
            Err(err) => {
                tracing::warn!("❌ {kind} failed: {err}");
                if let Err(e) =
                    self.vault
                        .record(&kind, ACTOR, format!("{summary}: {err}"), Outcome::Error)
                {
                    tracing::warn!("⚠️ Failed to audit {kind}: {e}");
                }
                Err(err)
            }
        }
    }
}

fn ensure_matches<A: GatedAction>(approved: &ApprovalHeader, action: &A) -> Result<()> {
    let mismatch = if approved.action != action.kind() {
        format!("approved {}, got {}", approved.action, action.kind())
    } else if approved.amount != action.amount() {
        format!("approved amount {:?}, got {:?}", approved.amount, action.amount())
    } else if approved.payload != action.payload() {
        format!("payload differs from the approved {}", approved.payload)
    } else {
        return Ok(());
    };
    Err(VaultClawError::ApprovalMismatch(mismatch))
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vaultclaw_core::VaultClawError;

    struct Payment {
        invoice_id: i64,
        amount: f64,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl GatedAction for Payment {
        fn kind(&self) -> &str {
            "odoo_payment"
        }
        fn amount(&self) -> Option<f64> {
            Some(self.amount)
        }
        fn describe(&self) -> String {
            format!("Payment ${:.2}", self.amount)
        }
        fn payload(&self) -> serde_json::Value {
            serde_json::json!({ "invoice_id": self.invoice_id, "amount": self.amount })
        }
        async fn execute(self, _token: ApprovalToken) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VaultClawError::Upstream("odoo down".into()));
            }
            Ok(serde_json::json!({ "paid": self.amount }))
        }
    }

    fn gate(dir: &std::path::Path) -> HitlGate {
        HitlGate::new(Vault::open(dir).unwrap(), ApprovalPolicy::default())
    }

    fn payment(amount: f64, calls: &Arc<AtomicUsize>) -> Payment {
        Payment { invoice_id: 7, amount, calls: calls.clone(), fail: false }
    }

    #[test]
    fn test_policy() {
        let policy = ApprovalPolicy::default();
        assert!(policy.requires_approval("odoo_payment", Some(100.01)));
        assert!(!policy.requires_approval("odoo_payment", Some(100.0)));
        assert!(!policy.requires_approval("odoo_payment", None));
        assert!(policy.requires_approval("facebook_post", None));
        assert!(policy.requires_approval("twitter_post", Some(0.0)));
    }

    #[tokio::test]
    async fn test_over_threshold_is_parked_not_executed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = gate.submit(payment(250.0, &calls)).await.unwrap();
        assert_eq!(outcome.status(), "pending_approval");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let GateOutcome::PendingApproval { approval_file } = outcome else {
            panic!("expected pending approval");
        };
        assert!(approval_file.starts_with(dir.path().join("Pending_Approval")));
        let name = file_name_of(&approval_file);
        assert!(name.starts_with("APPROVAL_ODOO_PAYMENT_"));

        let doc: Document<ApprovalHeader> = gate
            .vault
            .read_document(WorkflowState::PendingApproval, &name)
            .unwrap();
        assert_eq!(doc.header.status, ApprovalStatus::Pending);
        assert_eq!(doc.header.action, "odoo_payment");
        assert_eq!(doc.header.amount, Some(250.0));
        assert!(doc.body.contains("\"invoice_id\": 7"));
        assert_eq!(doc.header.payload["invoice_id"], 7);

        let audit = gate.vault.audit().recent(10).unwrap();
        assert_eq!(audit.last().unwrap().result, Outcome::PendingApproval);
    }

    #[tokio::test]
    async fn test_at_threshold_executes_directly() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = gate.submit(payment(100.0, &calls)).await.unwrap();
        assert_eq!(outcome.status(), "executed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.vault.count(WorkflowState::PendingApproval).unwrap(), 0);

        let audit = gate.vault.audit().recent(10).unwrap();
        assert_eq!(audit.last().unwrap().result, Outcome::Success);
    }

    #[tokio::test]
    async fn test_direct_failure_is_logged_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let err = gate
            .submit(Payment { fail: true, ..payment(5.0, &calls) })
            .await
            .unwrap_err();
        assert!(err.is_upstream());
        let audit = gate.vault.audit().recent(10).unwrap();
        assert_eq!(audit.last().unwrap().result, Outcome::Error);
    }

    #[tokio::test]
    async fn test_approve_then_execute() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let GateOutcome::PendingApproval { approval_file } =
            gate.submit(payment(500.0, &calls)).await.unwrap()
        else {
            panic!("expected pending approval");
        };
        let name = file_name_of(&approval_file);

        // Not approved yet.
        let err = gate.execute_approved(&name, payment(500.0, &calls)).await.unwrap_err();
        assert!(matches!(err, VaultClawError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        gate.approve(&name, "operator").unwrap();
        let outcome = gate.execute_approved(&name, payment(500.0, &calls)).await.unwrap();
        assert_eq!(outcome.status(), "executed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.vault.locate(&name), Some(WorkflowState::Done));

        // One approval, one execution.
        let err = gate.execute_approved(&name, payment(500.0, &calls)).await.unwrap_err();
        assert!(matches!(err, VaultClawError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Post {
        text: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GatedAction for Post {
        fn kind(&self) -> &str {
            "twitter_post"
        }
        fn describe(&self) -> String {
            format!("Tweet: {}", self.text)
        }
        fn payload(&self) -> serde_json::Value {
            serde_json::json!({ "text": self.text })
        }
        async fn execute(self, _token: ApprovalToken) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "id": "1" }))
        }
    }

    #[tokio::test]
    async fn test_approval_only_releases_the_approved_call() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let GateOutcome::PendingApproval { approval_file } =
            gate.submit(payment(150.0, &calls)).await.unwrap()
        else {
            panic!("expected pending approval");
        };
        let name = file_name_of(&approval_file);
        gate.approve(&name, "operator").unwrap();

        let bigger = gate.execute_approved(&name, payment(1_000_000.0, &calls)).await;
        assert!(matches!(bigger, Err(VaultClawError::ApprovalMismatch(_))));

        let other_invoice = Payment { invoice_id: 8, ..payment(150.0, &calls) };
        let err = gate.execute_approved(&name, other_invoice).await.unwrap_err();
        assert!(matches!(err, VaultClawError::ApprovalMismatch(_)));

        let post = Post { text: "hello".into(), calls: calls.clone() };
        let err = gate.execute_approved(&name, post).await.unwrap_err();
        assert!(matches!(err, VaultClawError::ApprovalMismatch(_)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(gate.vault.locate(&name), Some(WorkflowState::Approved));

        // The approved call itself still goes through.
        let outcome = gate.execute_approved(&name, payment(150.0, &calls)).await.unwrap();
        assert_eq!(outcome.status(), "executed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_approved_call_is_not_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let GateOutcome::PendingApproval { approval_file } =
            gate.submit(payment(300.0, &calls)).await.unwrap()
        else {
            panic!("expected pending approval");
        };
        let name = file_name_of(&approval_file);
        gate.approve(&name, "operator").unwrap();

        let failing = Payment { fail: true, ..payment(300.0, &calls) };
        assert!(gate.execute_approved(&name, failing).await.unwrap_err().is_upstream());
        assert_eq!(gate.vault.locate(&name), Some(WorkflowState::Done));

        let again = gate.execute_approved(&name, payment(300.0, &calls)).await;
        assert!(matches!(again, Err(VaultClawError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reject_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let GateOutcome::PendingApproval { approval_file } =
            gate.submit(payment(500.0, &calls)).await.unwrap()
        else {
            panic!("expected pending approval");
        };
        let name = file_name_of(&approval_file);
        gate.reject(&name, "operator").unwrap();

        let doc: Document<ApprovalHeader> =
            gate.vault.read_document(WorkflowState::Rejected, &name).unwrap();
        assert_eq!(doc.header.status, ApprovalStatus::Rejected);
        assert!(gate.approve(&name, "operator").is_err());
    }
}
