//! # VaultClaw
//!
//! Vault-backed workflow engine: watchers file work into a folder-per-state
//! vault, risky actions wait for human approval, failures go through a
//! bounded retry queue.
//!
//! Usage:
//!   vaultclaw run                              # Start the orchestrator
//!   vaultclaw init                             # Create config + vault layout
//!   vaultclaw status                           # Folder counts, error queue, activity
//!   vaultclaw approve APPROVAL_ODOO_PAYMENT_...md
//!   vaultclaw errors retry ERROR_FACEBOOK_POST_...md

mod orchestrator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use vaultclaw_channels::{FacebookClient, FacebookPost, OdooClient, RecordPayment, Tweet, TwitterClient};
use vaultclaw_core::VaultClawConfig;
use vaultclaw_vault::{
    ApprovalPolicy, BackoffPolicy, ErrorRecovery, GateOutcome, GatedAction, HitlGate, RetryOutcome,
    Vault, WorkflowState,
};

use crate::orchestrator::Orchestrator;

const OPERATOR: &str = "Operator";

#[derive(Parser)]
#[command(
    name = "vaultclaw",
    version,
    about = "🗄️ VaultClaw: vault-backed workflow engine with human approval"
)]
struct Cli {
    /// Config file (default: ~/.vaultclaw/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Vault root, overrides [vault].path
    #[arg(long, global = true)]
    vault: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator (watchers, maintenance jobs, drop folder)
    Run,

    /// Write a default config if none exists and create the vault layout
    Init,

    /// Show folder counts, the error queue and today's activity
    Status,

    /// Inspect and drive the error queue
    Errors {
        #[command(subcommand)]
        action: ErrorsCommand,
    },

    /// Approve a pending request (Pending_Approval → Approved)
    Approve { file: String },

    /// Reject a pending request (Pending_Approval → Rejected)
    Reject { file: String },

    /// Mark an item handled (→ Done)
    Complete {
        file: String,
        /// Folder the item is in: needs-action | approved | error-queue
        #[arg(long, default_value = "needs-action")]
        from: WorkflowState,
    },

    /// Register an invoice payment in Odoo (gated above the threshold)
    Pay {
        invoice_id: i64,
        amount: f64,
        #[arg(long, default_value = "")]
        memo: String,
    },

    /// Publish a Facebook page post (always gated)
    PostFacebook {
        message: String,
        #[arg(long)]
        link: Option<String>,
    },

    /// Post a tweet or reply (always gated)
    PostTweet {
        text: String,
        /// Tweet id to reply to
        #[arg(long)]
        reply_to: Option<String>,
    },
}

#[derive(Subcommand)]
enum ErrorsCommand {
    /// List items in Error_Queue
    List,

    /// File a failed action for retry
    Queue {
        action_type: String,
        description: String,
        /// Error message of the failed attempt
        #[arg(long)]
        error: String,
        /// JSON payload of the failed call
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Retry an item: copy it back to Needs_Action, or escalate when exhausted
    Retry { file: String },

    /// Give up on an item and move it to Done
    GiveUp {
        file: String,
        #[arg(long, default_value = "Marked unrecoverable by operator")]
        reason: String,
    },
}

fn load_config(path: Option<&Path>, vault: Option<&str>) -> Result<VaultClawConfig> {
    let mut config = match path {
        Some(path) => VaultClawConfig::load_from(path)?,
        None => VaultClawConfig::load()?,
    };
    if let Some(vault) = vault {
        config.vault.path = vault.to_string();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config: config_path,
        vault: vault_override,
        verbose,
        command,
    } = Cli::parse();

    let filter = if verbose { "vaultclaw=debug" } else { "vaultclaw=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if matches!(command, Commands::Init) {
        write_default_config(config_path.as_deref())?;
    }
    let config = load_config(config_path.as_deref(), vault_override.as_deref())?;
    let vault = Vault::open(config.vault.root())?;

    match command {
        Commands::Init => {
            std::fs::create_dir_all(config.vault.drop_dir())?;
            println!("🗄️ Vault ready: {}", vault.root().display());
            println!("📂 Drop folder: {}", config.vault.drop_dir().display());
            Ok(())
        }
        Commands::Run => Orchestrator::new(config)?.run().await,
        Commands::Status => status(&vault, &config),
        Commands::Errors { action } => errors(ErrorRecovery::from_config(vault, &config.recovery), action),
        Commands::Approve { file } => {
            let path = gate(&vault, &config).approve(&file, OPERATOR)?;
            println!("✅ Approved → {}", path.display());
            Ok(())
        }
        Commands::Reject { file } => {
            let path = gate(&vault, &config).reject(&file, OPERATOR)?;
            println!("🚫 Rejected → {}", path.display());
            Ok(())
        }
        Commands::Complete { file, from } => {
            let path = vault.transition(&file, from, WorkflowState::Done, OPERATOR)?;
            println!("✅ Done → {}", path.display());
            Ok(())
        }
        Commands::Pay { invoice_id, amount, memo } => {
            let client = OdooClient::new(config.odoo.clone(), BackoffPolicy::from_config(&config.recovery));
            let action = RecordPayment::new(client, invoice_id, amount, memo);
            submit(&vault, &config, action).await
        }
        Commands::PostFacebook { message, link } => {
            let action = FacebookPost::new(FacebookClient::new(config.facebook.clone()), message, link);
            submit(&vault, &config, action).await
        }
        Commands::PostTweet { text, reply_to } => {
            let action = Tweet::new(TwitterClient::new(config.twitter.clone()), text, reply_to);
            submit(&vault, &config, action).await
        }
    }
}

fn write_default_config(path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(VaultClawConfig::default_path);
    if path.exists() {
        println!("⚠️  Config already exists: {}", path.display());
    } else {
        VaultClawConfig::default().save_to(&path)?;
        println!("📝 Config written: {}", path.display());
    }
    Ok(())
}

fn gate(vault: &Vault, config: &VaultClawConfig) -> HitlGate {
    HitlGate::new(vault.clone(), ApprovalPolicy::from_config(&config.approval))
}

/// Run a side-effecting action through the approval gate. Upstream failures
/// of a directly executed action are filed in the error queue.
async fn submit<A: GatedAction>(vault: &Vault, config: &VaultClawConfig, action: A) -> Result<()> {
    let kind = action.kind().to_string();
    let description = action.describe();
    let payload = action.payload();

    match gate(vault, config).submit(action).await {
        Ok(GateOutcome::PendingApproval { approval_file }) => {
            println!("⏸️  Awaiting approval: {}", approval_file.display());
            println!("   Approve with: vaultclaw approve <file>");
            Ok(())
        }
        Ok(GateOutcome::Executed { result }) => {
            println!("✅ Executed {kind}");
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) if e.is_upstream() => {
            let queued = ErrorRecovery::from_config(vault.clone(), &config.recovery).queue_for_retry(
                &kind,
                &description,
                &payload,
                &e.to_string(),
            )?;
            println!("🧯 {kind} failed ({e}); queued for retry: {}", queued.file);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn status(vault: &Vault, config: &VaultClawConfig) -> Result<()> {
    println!("🗄️ Vault: {}\n", vault.root().display());
    println!("{:<18} {:>5}", "Folder", "Count");
    for (state, n) in vault.folder_counts()? {
        println!("{:<18} {:>5}", state.to_string(), n);
    }

    let queue = ErrorRecovery::from_config(vault.clone(), &config.recovery).list_error_queue()?;
    if !queue.is_empty() {
        println!("\n🧯 Error queue:");
        for item in &queue {
            println!(
                "   {} [{}] {} retry {}/{}",
                item.file, item.status, item.action_type, item.retry_count, item.max_retries
            );
        }
    }

    let recent = vault.audit().recent(10)?;
    println!("\n📜 Recent activity:");
    if recent.is_empty() {
        println!("   (none today)");
    }
    for e in &recent {
        println!(
            "   {} {:<24} {:<10} {}",
            e.timestamp.format("%H:%M:%S"),
            e.action_type,
            e.result,
            e.details
        );
    }
    Ok(())
}

fn errors(recovery: ErrorRecovery, action: ErrorsCommand) -> Result<()> {
    match action {
        ErrorsCommand::List => {
            let items = recovery.list_error_queue()?;
            if items.is_empty() {
                println!("✅ Error_Queue is empty");
            }
            for item in items {
                println!(
                    "{}  {}  status={}  retries={}/{}  created={}",
                    item.file,
                    item.action_type,
                    item.status,
                    item.retry_count,
                    item.max_retries,
                    item.created.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ErrorsCommand::Queue { action_type, description, error, payload } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let queued = recovery.queue_for_retry(&action_type, &description, &payload, &error)?;
            println!("🧯 Queued: {}", queued.file);
        }
        ErrorsCommand::Retry { file } => match recovery.retry_failed_action(&file)? {
            RetryOutcome::Retrying { retry_count, max_retries, copy, .. } => {
                println!("🔁 Retry {retry_count}/{max_retries}: {}", copy.display());
            }
            RetryOutcome::Unrecoverable(u) => {
                println!("⛔ Unrecoverable ({}): {}", u.reason, u.moved_to.display());
            }
        },
        ErrorsCommand::GiveUp { file, reason } => {
            let u = recovery.mark_unrecoverable(&file, &reason)?;
            println!("⛔ Unrecoverable: {}", u.moved_to.display());
        }
    }
    Ok(())
}
