//! Append-only audit log: `Logs/<YYYY-MM-DD>.json`, one JSON record per line.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vaultclaw_core::{Outcome, Result};

use crate::io;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub actor: String,
    pub details: String,
    pub result: Outcome,
}

impl AuditEntry {
    pub fn now(action_type: &str, actor: &str, details: impl Into<String>, result: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            action_type: action_type.to_string(),
            actor: actor.to_string(),
            details: details.into(),
            result,
        }
    }
}

/// Handle on the `Logs/` directory. Lines are only ever appended.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    pub fn record(
        &self,
        action_type: &str,
        actor: &str,
        details: impl Into<String>,
        result: Outcome,
    ) -> Result<()> {
        self.append(&AuditEntry::now(action_type, actor, details, result))
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        io::append_line(&self.file_for(entry.timestamp.date_naive()), &line)
    }

    /// Entries of one day in write order. Unreadable lines are skipped.
    pub fn read_day(&self, day: NaiveDate) -> Result<Vec<AuditEntry>> {
        let path = self.file_for(day);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        let entries = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(e) => Some(e),
                Err(e) => {
                    tracing::debug!("skipping bad audit line in {}: {e}", path.display());
                    None
                }
            })
            .collect();
        Ok(entries)
    }

    /// Last `n` entries written today.
    pub fn recent(&self, n: usize) -> Result<Vec<AuditEntry>> {
        let mut today = self.read_day(Utc::now().date_naive())?;
        let skip = today.len().saturating_sub(n);
        Ok(today.split_off(skip))
    }

    /// Every entry from `from` through `to`, both days inclusive.
    pub fn read_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AuditEntry>> {
        let mut out = Vec::new();
        let mut day = from;
        while day <= to {
            out.extend(self.read_day(day)?);
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("Logs"));
        log.record("error_queued", "ErrorRecovery", "Queued facebook_post", Outcome::Success)
            .unwrap();
        log.record("error_retry", "ErrorRecovery", "Retry 1/3", Outcome::Retrying)
            .unwrap();

        let entries = log.read_day(Utc::now().date_naive()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action_type, "error_queued");
        assert_eq!(entries[1].result, Outcome::Retrying);
    }

    #[test]
    fn test_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        let entry = AuditEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap(),
            action_type: "watcher_restart".into(),
            actor: "Supervisor".into(),
            details: "restarted".into(),
            result: Outcome::Warning,
        };
        log.append(&entry).unwrap();

        let text = std::fs::read_to_string(dir.path().join("2026-02-22.json")).unwrap();
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["action_type"], "watcher_restart");
        assert_eq!(value["actor"], "Supervisor");
        assert_eq!(value["result"], "warning");
        assert!(value["timestamp"].as_str().unwrap().starts_with("2026-02-22T08:00:00"));
    }

    #[test]
    fn test_recent_and_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        for i in 0..7 {
            log.record("tick", "test", format!("n={i}"), Outcome::Success).unwrap();
        }
        io::append_line(&log.file_for(Utc::now().date_naive()), "not json").unwrap();

        let recent = log.recent(5).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].details, "n=2");
        assert_eq!(recent[4].details, "n=6");
    }

    #[test]
    fn test_read_range_spans_days() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path());
        for day in [20, 21, 23] {
            let mut e = AuditEntry::now("tick", "test", "", Outcome::Success);
            e.timestamp = Utc.with_ymd_and_hms(2026, 2, day, 12, 0, 0).unwrap();
            log.append(&e).unwrap();
        }
        let from = NaiveDate::from_ymd_opt(2026, 2, 21).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 2, 23).unwrap();
        assert_eq!(log.read_range(from, to).unwrap().len(), 2);
    }
}
