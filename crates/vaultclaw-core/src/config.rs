//! VaultClaw configuration system.
//!
//! One `VaultClawConfig` is built at startup and handed to every component.
//! Nothing below the binary reads the process environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultClawError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultClawConfig {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub odoo: OdooConfig,
    #[serde(default)]
    pub facebook: FacebookConfig,
    #[serde(default)]
    pub twitter: TwitterConfig,
}

impl VaultClawConfig {
    /// Load config from the default path (~/.vaultclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VaultClawError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        tracing::debug!("⚙️ Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| VaultClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        for (name, secs) in [
            ("facebook_interval_secs", s.facebook_interval_secs),
            ("twitter_interval_secs", s.twitter_interval_secs),
            ("odoo_interval_secs", s.odoo_interval_secs),
            ("error_recovery_interval_secs", s.error_recovery_interval_secs),
            ("dashboard_interval_secs", s.dashboard_interval_secs),
            ("health_check_secs", s.health_check_secs),
            ("drop_poll_secs", s.drop_poll_secs),
            ("tick_ms", s.tick_ms),
        ] {
            if secs == 0 {
                return Err(VaultClawError::Config(format!("schedule.{name} must be > 0")));
            }
        }
        if s.briefing_hour > 23 {
            return Err(VaultClawError::Config(format!(
                "schedule.briefing_hour must be 0-23, got {}",
                s.briefing_hour
            )));
        }
        for (name, value) in [
            ("approval.threshold", self.approval.threshold),
            ("odoo.low_balance_threshold", self.odoo.low_balance_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(VaultClawError::Config(format!(
                    "{name} must be a finite number >= 0, got {value}"
                )));
            }
        }
        if self.recovery.backoff_attempts == 0 {
            return Err(VaultClawError::Config("recovery.backoff_attempts must be >= 1".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the VaultClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vaultclaw")
    }
}

/// Where the vault lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_vault_path")]
    pub path: String,
    /// Drop folder watched by the continuous file watcher (default: `<vault>/Drop_Folder`).
    #[serde(default)]
    pub drop_folder: Option<String>,
}

fn default_vault_path() -> String { "~/AI_Employee_Vault".into() }

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: default_vault_path(),
            drop_folder: None,
        }
    }
}

impl VaultConfig {
    pub fn root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }

    pub fn drop_dir(&self) -> PathBuf {
        match &self.drop_folder {
            Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
            None => self.root().join("Drop_Folder"),
        }
    }
}

/// Job cadence. All intervals are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_social_interval")]
    pub facebook_interval_secs: u64,
    #[serde(default = "default_social_interval")]
    pub twitter_interval_secs: u64,
    #[serde(default = "default_odoo_interval")]
    pub odoo_interval_secs: u64,
    #[serde(default = "default_error_recovery_interval")]
    pub error_recovery_interval_secs: u64,
    #[serde(default = "default_dashboard_interval")]
    pub dashboard_interval_secs: u64,
    /// Weekly briefing day (mon, tue, ... sun), UTC.
    #[serde(default = "default_briefing_day")]
    pub briefing_day: String,
    /// Weekly briefing hour, UTC.
    #[serde(default = "default_briefing_hour")]
    pub briefing_hour: u32,
    /// Liveness poll of supervised tasks.
    #[serde(default = "default_health_check")]
    pub health_check_secs: u64,
    #[serde(default = "default_drop_poll")]
    pub drop_poll_secs: u64,
    /// How often the scheduler checks for due jobs.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_social_interval() -> u64 { 600 }
fn default_odoo_interval() -> u64 { 3600 }
fn default_error_recovery_interval() -> u64 { 1800 }
fn default_dashboard_interval() -> u64 { 600 }
fn default_briefing_day() -> String { "mon".into() }
fn default_briefing_hour() -> u32 { 8 }
fn default_health_check() -> u64 { 30 }
fn default_drop_poll() -> u64 { 10 }
fn default_tick_ms() -> u64 { 1000 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            facebook_interval_secs: default_social_interval(),
            twitter_interval_secs: default_social_interval(),
            odoo_interval_secs: default_odoo_interval(),
            error_recovery_interval_secs: default_error_recovery_interval(),
            dashboard_interval_secs: default_dashboard_interval(),
            briefing_day: default_briefing_day(),
            briefing_hour: default_briefing_hour(),
            health_check_secs: default_health_check(),
            drop_poll_secs: default_drop_poll(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl ScheduleConfig {
    /// Cron expression for the weekly briefing ("0 8 * * mon").
    pub fn briefing_cron(&self) -> String {
        format!("0 {} * * {}", self.briefing_hour, self.briefing_day)
    }
}

/// Human-in-the-loop policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Monetary amounts strictly above this need sign-off.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Action kinds that always need sign-off regardless of amount.
    #[serde(default = "default_always_gated")]
    pub always_gated: Vec<String>,
}

fn default_threshold() -> f64 { 100.0 }
fn default_always_gated() -> Vec<String> {
    vec!["facebook_post".into(), "twitter_post".into()]
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            always_gated: default_always_gated(),
        }
    }
}

/// Error queue and in-process retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_attempts")]
    pub backoff_attempts: u32,
}

fn default_max_retries() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 2_000 }
fn default_backoff_multiplier() -> u32 { 2 }
fn default_backoff_max_ms() -> u64 { 16_000 }
fn default_backoff_attempts() -> u32 { 3 }

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_attempts: default_backoff_attempts(),
        }
    }
}

/// Odoo accounting backend (JSON-RPC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdooConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_odoo_url")]
    pub url: String,
    #[serde(default = "default_odoo_db")]
    pub db: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_low_balance")]
    pub low_balance_threshold: f64,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_odoo_url() -> String { "http://localhost:8069".into() }
fn default_odoo_db() -> String { "ai_employee_db".into() }
fn default_low_balance() -> f64 { 1000.0 }
fn default_http_timeout() -> u64 { 15 }

impl Default for OdooConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_odoo_url(),
            db: default_odoo_db(),
            username: String::new(),
            password: String::new(),
            low_balance_threshold: default_low_balance(),
            timeout_secs: default_http_timeout(),
        }
    }
}

/// Facebook Page (Graph API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_graph_base")]
    pub graph_base: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_graph_base() -> String { "https://graph.facebook.com/v19.0".into() }

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            page_id: String::new(),
            access_token: String::new(),
            graph_base: default_graph_base(),
            timeout_secs: default_http_timeout(),
        }
    }
}

/// Twitter / X (API v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    /// App bearer token, used for reads.
    #[serde(default)]
    pub bearer_token: String,
    /// OAuth 2.0 user-context token, used for posting.
    #[serde(default)]
    pub user_access_token: String,
    #[serde(default = "default_twitter_base")]
    pub api_base: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_twitter_base() -> String { "https://api.twitter.com/2".into() }

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            bearer_token: String::new(),
            user_access_token: String::new(),
            api_base: default_twitter_base(),
            timeout_secs: default_http_timeout(),
        }
    }
}
