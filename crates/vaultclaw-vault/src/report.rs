//! Operator-facing summaries: the live dashboard and the weekly briefing.

use chrono::{Days, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use vaultclaw_core::{Outcome, Result};

use crate::io;
use crate::paths::{AUDITS_WEEKLY_DIR, DASHBOARD_FILE};
use crate::store::Vault;

const ACTOR: &str = "Orchestrator";
const RECENT_ROWS: usize = 5;

/// Rewrite `Dashboard.md` with folder counts and today's latest activity.
pub fn write_dashboard(vault: &Vault) -> Result<PathBuf> {
    let now = Utc::now();
    let counts = vault.folder_counts()?;
    let weekly = count_files(&vault.root().join(AUDITS_WEEKLY_DIR))?;
    let recent = vault.audit().recent(RECENT_ROWS)?;

    let mut out = String::new();
    let _ = writeln!(out, "---\ntitle: AI Employee Dashboard\nlast_updated: {}\n---\n", now.to_rfc3339());
    let _ = writeln!(out, "# AI Employee Dashboard\n");
    let _ = writeln!(out, "_Last updated {}_\n", now.format("%Y-%m-%d %H:%M:%S UTC"));

    let _ = writeln!(out, "## Folder Summary");
    let _ = writeln!(out, "| Folder | Count |\n|--------|-------|");
    for (state, n) in &counts {
        let _ = writeln!(out, "| {state} | {n} |");
    }
    let _ = writeln!(out, "| {AUDITS_WEEKLY_DIR} | {weekly} |\n");

    let _ = writeln!(out, "## Recent Activity");
    let _ = writeln!(out, "| Timestamp | Action | Details | Status |\n|-----------|--------|---------|--------|");
    if recent.is_empty() {
        let _ = writeln!(out, "| - | No activity yet | - | - |");
    }
    for e in &recent {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.action_type,
            e.details.replace('|', "\\|"),
            e.result
        );
    }

    let path = vault.root().join(DASHBOARD_FILE);
    io::atomic_write(&path, out.as_bytes())?;
    tracing::debug!("📊 Dashboard updated");
    vault.record("dashboard_update", ACTOR, "Dashboard.md refreshed", Outcome::Success)?;
    Ok(path)
}

/// Summarise the last 7 days of audit activity into
/// `Audits/Weekly/<date>_Weekly_Briefing.md`.
pub fn generate_weekly_briefing(vault: &Vault) -> Result<PathBuf> {
    let now = Utc::now();
    let today = now.date_naive();
    let from = today.checked_sub_days(Days::new(6)).unwrap_or(today);
    let entries = vault.audit().read_range(from, today)?;

    let mut by_action: BTreeMap<&str, usize> = BTreeMap::new();
    for e in &entries {
        *by_action.entry(e.action_type.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<_> = by_action.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let errors: Vec<_> = entries
        .iter()
        .filter(|e| matches!(e.result, Outcome::Error | Outcome::Unrecoverable))
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "---\ntitle: Weekly Briefing\ngenerated: {}\nperiod: {from} to {today}\n---\n", now.to_rfc3339());
    let _ = writeln!(out, "# Weekly Briefing: {}\n", now.format("%B %d, %Y"));
    let _ = writeln!(out, "**Period:** {from} to {today}\n");

    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out, "- **Total actions:** {}", entries.len());
    let _ = writeln!(out, "- **Errors encountered:** {}\n", errors.len());

    let _ = writeln!(out, "## Activity by Action");
    if ranked.is_empty() {
        let _ = writeln!(out, "- None");
    }
    for (action, n) in ranked.iter().take(10) {
        let _ = writeln!(out, "- `{action}`: {n}");
    }

    let _ = writeln!(out, "\n## Folder Counts");
    for (state, n) in vault.folder_counts()? {
        let _ = writeln!(out, "- {state}: {n}");
    }

    let _ = writeln!(out, "\n## Recent Errors");
    if errors.is_empty() {
        let _ = writeln!(out, "- None");
    }
    for e in errors.iter().rev().take(5) {
        let _ = writeln!(
            out,
            "- `{}` [{}] {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.actor,
            e.details
        );
    }

    let name = format!("{}_Weekly_Briefing.md", today.format("%Y-%m-%d"));
    let path = vault.root().join(AUDITS_WEEKLY_DIR).join(&name);
    io::atomic_write(&path, out.as_bytes())?;
    tracing::info!("📰 Weekly briefing written: {name}");
    vault.record(
        "weekly_briefing_generated",
        ACTOR,
        format!("Weekly briefing saved to {name}"),
        Outcome::Success,
    )?;
    Ok(path)
}

fn count_files(dir: &std::path::Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut n = 0;
    for entry in std::fs::read_dir(dir)? {
        if !entry?.file_name().to_string_lossy().starts_with('.') {
            n += 1;
        }
    }
    Ok(n)
}
