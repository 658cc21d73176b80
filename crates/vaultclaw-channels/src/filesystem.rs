//! Drop folder watcher: every new file dropped in the folder becomes an
//! action item. Runs continuously under the supervisor rather than on a
//! scheduler tick.

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use vaultclaw_core::{ActionItem, Result};

use crate::watcher::{EventSource, PollingWatcher, Watcher};

pub struct DropFolderSource {
    dir: PathBuf,
}

impl DropFolderSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl EventSource for DropFolderSource {
    fn name(&self) -> &str {
        "file"
    }

    fn actor(&self) -> &str {
        "FileSystemWatcher"
    }

    async fn fetch(&mut self) -> Result<Vec<ActionItem>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            items.push(
                ActionItem::new("file", "drop", format!("New file dropped: {name}"))
                    .with_external_id(name.clone())
                    .with_summary(format!("**File:** `{}`\n**Size:** {} bytes", entry.path().display(), meta.len()))
                    .with_payload(json!({
                        "name": name,
                        "path": entry.path(),
                        "size": meta.len(),
                    })),
            );
        }
        items.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(items)
    }
}

/// Poll the drop folder until `shutdown` flips to true. Returns early with
/// the error if an item cannot be filed, so the supervisor can restart it.
pub async fn run_drop_folder(
    mut watcher: PollingWatcher<DropFolderSource>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("📂 Drop folder watcher started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let filed = watcher.tick().await?;
        if filed > 0 {
            tracing::info!("📥 Filed {filed} dropped file(s)");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("📂 Drop folder watcher stopped");
    Ok(())
}
