//! Central configuration -- all tunables live here.
//!
//! Loaded once at startup from an optional TOML file; every section falls
//! back to defaults so a bare `argus serve` works out of the box. Secrets
//! (reasoning API key, code-host token) are never stored in the file; they
//! are read from the environment variables named in the config.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub reasoning: ReasoningConfig,
    pub actions: ActionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the API server.
    pub bind: String,
    /// SQLite database path (archive, incidents, knowledge base).
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/argus.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Ratio over baseline at which a reading counts as anomalous.
    pub anomaly_threshold: f64,
    /// Consecutive anomalous readings before an incident opens.
    pub strike_threshold: u32,
    /// Seconds between detector polls.
    pub interval_secs: u64,
    /// Trailing window the detector aggregates per poll, in seconds.
    pub short_window_secs: i64,
    /// How long samples stay in the recent window store, in seconds.
    pub retention_secs: i64,
    /// Cron expression (sec min hour dom mon dow) for baseline recompute.
    pub baseline_cron: String,
    /// Days of archive history a baseline recompute scans.
    pub baseline_days: i64,
    /// Minimum samples for a (hour, weekday) slot to be usable.
    pub min_slot_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 3.0,
            strike_threshold: 3,
            interval_secs: 10,
            short_window_secs: 180,
            retention_secs: 1800,
            baseline_cron: "0 0 * * * *".to_string(),
            baseline_days: 7,
            min_slot_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Completion endpoint of the reasoning backend.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Per-call timeout. Timeout is a stage failure, never a hang.
    pub timeout_secs: u64,
    /// Delay before the single retry after a failed call.
    pub retry_backoff_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_key_env: "ARGUS_REASONING_API_KEY".to_string(),
            max_tokens: 2000,
            timeout_secs: 60,
            retry_backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Minimum confidence to create a PR with auto-merge and deploy it.
    pub auto_merge_confidence: f64,
    /// Minimum confidence to propose a fix at all. Below this the incident
    /// is dismissed with the record preserved.
    pub propose_floor: f64,
    /// Webhook URL for incident notifications. Absent = log only.
    pub notify_webhook: Option<String>,
    /// Code host REST base URL, e.g. "https://api.github.com".
    pub code_host_api: Option<String>,
    /// Repository in "owner/name" form.
    pub repo: Option<String>,
    /// Environment variable holding the code-host token.
    pub code_host_token_env: String,
    /// Deploy trigger URL. Absent = auto-deploy disabled.
    pub deploy_hook: Option<String>,
    /// Seconds to wait after a deploy before verification starts.
    pub verify_settle_secs: u64,
    /// Seconds between verification polls.
    pub verify_poll_secs: u64,
    /// Give up on verification after this long.
    pub verify_timeout_secs: u64,
    /// Recovered when latency is back within this multiple of baseline.
    pub recovery_threshold: f64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            auto_merge_confidence: 0.92,
            propose_floor: 0.60,
            notify_webhook: None,
            code_host_api: None,
            repo: None,
            code_host_token_env: "ARGUS_CODE_HOST_TOKEN".to_string(),
            deploy_hook: None,
            verify_settle_secs: 10,
            verify_poll_secs: 10,
            verify_timeout_secs: 300,
            recovery_threshold: 1.3,
        }
    }
}

impl Config {
    /// Load config from a TOML file, or defaults when the file is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.actions.propose_floor > self.actions.auto_merge_confidence {
            anyhow::bail!(
                "propose_floor ({}) must not exceed auto_merge_confidence ({})",
                self.actions.propose_floor,
                self.actions.auto_merge_confidence
            );
        }
        if self.detection.anomaly_threshold <= 1.0 {
            anyhow::bail!("anomaly_threshold must be > 1.0");
        }
        if self.detection.strike_threshold == 0 {
            anyhow::bail!("strike_threshold must be >= 1");
        }
        // Validate the cron expression up front rather than at first tick
        use std::str::FromStr;
        cron::Schedule::from_str(&self.detection.baseline_cron).map_err(|e| {
            anyhow::anyhow!(
                "Invalid baseline_cron '{}': {}",
                self.detection.baseline_cron,
                e
            )
        })?;
        Ok(())
    }
}
