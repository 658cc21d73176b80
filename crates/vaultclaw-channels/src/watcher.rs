//! The watcher contract and the generic dedup poller behind every source.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use vaultclaw_core::{ActionItem, Outcome, Result, VaultClawError};
use vaultclaw_vault::paths::item_filename;
use vaultclaw_vault::{ActionHeader, Document, Vault, WorkflowState};

/// A polling unit that turns external events into action items.
#[async_trait]
pub trait Watcher: Send {
    fn name(&self) -> &str;

    /// New candidates since the last call. Never fails: upstream trouble is
    /// logged and yields an empty list.
    async fn check_for_updates(&mut self) -> Vec<ActionItem>;

    /// Persist one candidate into `Needs_Action/`. Storage errors propagate.
    fn create_action_file(&self, item: &ActionItem) -> Result<PathBuf>;

    /// One full tick: check, then file every candidate.
    async fn tick(&mut self) -> Result<usize> {
        let items = self.check_for_updates().await;
        for item in &items {
            self.create_action_file(item)?;
        }
        Ok(items.len())
    }
}

/// Raw access to one external system.
#[async_trait]
pub trait EventSource: Send {
    /// Lowercase source name: `facebook`, `twitter`, `odoo`, `file`.
    fn name(&self) -> &str;

    /// Component name used in audit entries.
    fn actor(&self) -> &str;

    /// The current window of events. May include items already seen.
    async fn fetch(&mut self) -> Result<Vec<ActionItem>>;
}

/// Keys already emitted by a watcher. Clones share the same set, so a
/// restarted task keeps its memory for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`; true the first time it is seen.
    pub fn first_sight(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.insert(key.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dedup + filing on top of any [`EventSource`].
///
/// Keys are marked seen at emission, before the item is written. If writing
/// fails the item is not offered again in this process.
pub struct PollingWatcher<S> {
    source: S,
    vault: Vault,
    seen: SeenSet,
    check_action: String,
    quiet_when_idle: bool,
}

impl<S: EventSource> PollingWatcher<S> {
    pub fn new(source: S, vault: Vault) -> Self {
        Self::with_seen(source, vault, SeenSet::new())
    }

    pub fn with_seen(source: S, vault: Vault, seen: SeenSet) -> Self {
        let check_action = format!("{}_check", source.name());
        Self {
            source,
            vault,
            seen,
            check_action,
            quiet_when_idle: false,
        }
    }

    /// Skip the audit entry for ticks that found nothing new.
    pub fn quiet_when_idle(mut self) -> Self {
        self.quiet_when_idle = true;
        self
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    fn audit(&self, details: impl Into<String>, result: Outcome) {
        if let Err(e) = self
            .vault
            .record(&self.check_action, self.source.actor(), details, result)
        {
            tracing::warn!("⚠️ [{}] audit write failed: {e}", self.source.name());
        }
    }
}

#[async_trait]
impl<S: EventSource> Watcher for PollingWatcher<S> {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn check_for_updates(&mut self) -> Vec<ActionItem> {
        let fetched = match self.source.fetch().await {
            Ok(items) => items,
            Err(VaultClawError::NotConfigured(what)) => {
                tracing::debug!("[{}] not configured: {what}", self.source.name());
                self.audit(format!("{what} not configured, skipping"), Outcome::Skipped);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!("⚠️ [{}] check failed: {e}", self.source.name());
                self.audit(format!("Error: {e}"), Outcome::Error);
                return Vec::new();
            }
        };

        let fresh: Vec<ActionItem> = fetched
            .into_iter()
            .filter(|item| match item.dedup_key() {
                Some(key) => self.seen.first_sight(&key),
                None => true,
            })
            .collect();

        if fresh.is_empty() && self.quiet_when_idle {
            return fresh;
        }
        tracing::info!("🔎 [{}] {} new item(s)", self.source.name(), fresh.len());
        self.audit(
            format!("{} check complete: {} item(s) found", self.source.name(), fresh.len()),
            Outcome::Success,
        );
        fresh
    }

    fn create_action_file(&self, item: &ActionItem) -> Result<PathBuf> {
        let file_name = item_filename(
            &item.source,
            &item.subtype,
            item.external_id.as_deref(),
            item.created,
        );
        let doc = Document::new(ActionHeader::for_item(item), render_body(item)?);
        let path = self
            .vault
            .write_new(WorkflowState::NeedsAction, &file_name, &doc)?;
        let written = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.vault.record(
            &format!("{}_action_file", item.source),
            self.source.actor(),
            format!("Created {written}"),
            Outcome::Success,
        )?;
        Ok(path)
    }
}

fn render_body(item: &ActionItem) -> Result<String> {
    let mut body = format!("# {}\n\n", item.title);
    if !item.summary.is_empty() {
        body.push_str(&item.summary);
        body.push_str("\n\n");
    }
    if !item.payload.is_null() {
        body.push_str("## Details\n```json\n");
        body.push_str(&serde_json::to_string_pretty(&item.payload)?);
        body.push_str("\n```\n\n");
    }
    body.push_str("## Instructions\nDecide on a response and move this file to `/Done/` when handled.\n");
    Ok(body)
}
