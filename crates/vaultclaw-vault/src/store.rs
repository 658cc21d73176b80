//! The workflow store: folder-per-state queue with an audit trail.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use vaultclaw_core::{Outcome, Result, VaultClawError};

use crate::audit::AuditLog;
use crate::document::Document;
use crate::io;
use crate::paths::{AUDITS_WEEKLY_DIR, LOGS_DIR, WorkflowState};

/// Handle on a vault directory. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
    audit: AuditLog,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let audit = AuditLog::new(root.join(LOGS_DIR));
        Self { root, audit }
    }

    /// Open a vault, creating any missing folders.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let vault = Self::new(root);
        vault.ensure_layout()?;
        Ok(vault)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, state: WorkflowState) -> PathBuf {
        self.root.join(state.dir_name())
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for state in WorkflowState::ALL {
            std::fs::create_dir_all(self.dir(state))?;
        }
        std::fs::create_dir_all(self.root.join(AUDITS_WEEKLY_DIR))?;
        std::fs::create_dir_all(self.audit.dir())?;
        Ok(())
    }

    /// Append an audit line. Thin wrapper so callers need only the vault.
    pub fn record(
        &self,
        action_type: &str,
        actor: &str,
        details: impl Into<String>,
        result: Outcome,
    ) -> Result<()> {
        self.audit.record(action_type, actor, details, result)
    }

    /// Persist a new item into `state`. Never overwrites; on a name clash
    /// a numeric suffix is added. Returns the path written.
    ///
    /// Auditing is left to the caller, which knows what the item means.
    pub fn write_new<H: Serialize>(
        &self,
        state: WorkflowState,
        file_name: &str,
        doc: &Document<H>,
    ) -> Result<PathBuf> {
        check_name(file_name)?;
        let text = doc.render()?;
        io::write_new(&self.dir(state), file_name, text.as_bytes())
    }

    /// Path of an existing item, or `NotFound`.
    pub fn path_of(&self, state: WorkflowState, file_name: &str) -> Result<PathBuf> {
        check_name(file_name)?;
        let path = self.dir(state).join(file_name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(VaultClawError::NotFound(format!("{}/{file_name}", state.dir_name())))
        }
    }

    pub fn read(&self, state: WorkflowState, file_name: &str) -> Result<String> {
        let path = self.path_of(state, file_name)?;
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn read_document<H: DeserializeOwned>(
        &self,
        state: WorkflowState,
        file_name: &str,
    ) -> Result<Document<H>> {
        let text = self.read(state, file_name)?;
        Document::parse(&text).map_err(|e| match e {
            VaultClawError::Document(msg) => {
                VaultClawError::Document(format!("{}/{file_name}: {msg}", state.dir_name()))
            }
            other => other,
        })
    }

    /// Replace the content of an existing item in place.
    pub fn rewrite<H: Serialize>(
        &self,
        state: WorkflowState,
        file_name: &str,
        doc: &Document<H>,
    ) -> Result<PathBuf> {
        let path = self.path_of(state, file_name)?;
        io::atomic_write(&path, doc.render()?.as_bytes())?;
        Ok(path)
    }

    /// Move an item to another state under the same name.
    pub fn transition(
        &self,
        file_name: &str,
        from: WorkflowState,
        to: WorkflowState,
        actor: &str,
    ) -> Result<PathBuf> {
        self.transition_as(file_name, from, to, file_name, actor)
    }

    /// Move an item to another state, renaming it on the way.
    ///
    /// The move is a single rename, so the file is in exactly one folder at
    /// any instant. If `new_name` is taken in the target folder a numeric
    /// suffix is added.
    pub fn transition_as(
        &self,
        file_name: &str,
        from: WorkflowState,
        to: WorkflowState,
        new_name: &str,
        actor: &str,
    ) -> Result<PathBuf> {
        if !from.can_transition_to(to) {
            return Err(VaultClawError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        check_name(new_name)?;
        let src = self.path_of(from, file_name)?;
        let target_dir = self.dir(to);
        std::fs::create_dir_all(&target_dir)?;
        let dest = io::free_path(&target_dir, new_name);
        std::fs::rename(&src, &dest)?;

        let dest_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::debug!("📦 {file_name}: {from} → {to}");
        self.record(
            "workflow_transition",
            actor,
            format!("{file_name}: {from} -> {to}/{dest_name}"),
            Outcome::Success,
        )?;
        Ok(dest)
    }

    /// Folder currently holding `file_name`, if any.
    pub fn locate(&self, file_name: &str) -> Option<WorkflowState> {
        if check_name(file_name).is_err() {
            return None;
        }
        WorkflowState::ALL
            .into_iter()
            .find(|s| self.dir(*s).join(file_name).is_file())
    }

    /// Item file names in `state`, sorted. Hidden files and non-markdown
    /// files are ignored.
    pub fn list(&self, state: WorkflowState) -> Result<Vec<String>> {
        let dir = self.dir(state);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".md") {
                continue;
            }
            if entry.file_type()?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn count(&self, state: WorkflowState) -> Result<usize> {
        Ok(self.list(state)?.len())
    }

    pub fn folder_counts(&self) -> Result<Vec<(WorkflowState, usize)>> {
        WorkflowState::ALL
            .into_iter()
            .map(|s| self.count(s).map(|n| (s, n)))
            .collect()
    }
}

/// Item names are plain file names; anything that could escape the folder is
/// treated as not found.
fn check_name(file_name: &str) -> Result<()> {
    let bad = file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\', '\0']);
    if bad {
        return Err(VaultClawError::NotFound(format!("invalid item name: {file_name:?}")));
    }
    Ok(())
}
