//! Application configuration for the ABM pipeline.
//!
//! User config lives at `~/.abm/abm.toml`. It is read once at process start
//! and converted into per-adapter settings; nothing re-reads it during a run.
//! API keys never live in the file, only the names of the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AbmError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "abm.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".abm";

/// Default run-history database file name.
const DB_FILE_NAME: &str = "runs.db";

// ---------------------------------------------------------------------------
// Config structs (matching abm.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub targeting: TargetingConfig,

    /// Summarization model settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Multi-agent crew settings.
    #[serde(default)]
    pub crew: CrewConfig,

    #[serde(default)]
    pub hubspot: HubSpotConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[targeting]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingConfig {
    /// Minimum annual revenue (USD) for an account to be targeted.
    #[serde(default = "default_revenue_threshold")]
    pub revenue_threshold: u64,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            revenue_threshold: default_revenue_threshold(),
        }
    }
}

fn default_revenue_threshold() -> u64 {
    3_000_000
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model used for the deal summary.
    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_summary_temperature")]
    pub temperature: f32,

    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_summary_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt, on rate limits and timeouts only.
    #[serde(default = "default_summary_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            temperature: default_summary_temperature(),
            max_tokens: default_summary_max_tokens(),
            timeout_secs: default_summary_timeout(),
            max_retries: default_summary_retries(),
            retry_backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_openai_model() -> String {
    "gpt-4".into()
}
fn default_summary_temperature() -> f32 {
    0.3
}
fn default_summary_max_tokens() -> u32 {
    400
}
fn default_summary_timeout() -> u64 {
    30
}
fn default_summary_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    1_000
}

/// `[crew]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewConfig {
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Kept low so the analyst sticks to structured output.
    #[serde(default = "default_crew_temperature")]
    pub temperature: f32,

    #[serde(default = "default_crew_max_tokens")]
    pub max_tokens: u32,

    /// Per-task timeout in seconds.
    #[serde(default = "default_crew_timeout")]
    pub timeout_secs: u64,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            model: default_openai_model(),
            temperature: default_crew_temperature(),
            max_tokens: default_crew_max_tokens(),
            timeout_secs: default_crew_timeout(),
        }
    }
}

fn default_crew_temperature() -> f32 {
    0.1
}
fn default_crew_max_tokens() -> u32 {
    800
}
fn default_crew_timeout() -> u64 {
    60
}

/// `[hubspot]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSpotConfig {
    /// Name of the env var holding the private-app token.
    #[serde(default = "default_hubspot_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_hubspot_base_url")]
    pub base_url: String,

    /// Total attempts per upsert, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds.
    #[serde(default = "default_hubspot_timeout")]
    pub timeout_secs: u64,
}

impl Default for HubSpotConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_hubspot_key_env(),
            base_url: default_hubspot_base_url(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_backoff_ms(),
            timeout_secs: default_hubspot_timeout(),
        }
    }
}

fn default_hubspot_key_env() -> String {
    "HUBSPOT_API_KEY".into()
}
fn default_hubspot_base_url() -> String {
    "https://api.hubapi.com".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_hubspot_timeout() -> u64 {
    10
}

/// How company summaries are looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScraperMode {
    /// Built-in summaries for well-known domains, templated text otherwise.
    #[default]
    Canned,
    /// Fetch the domain's homepage and read its description.
    Http,
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default)]
    pub mode: ScraperMode,

    #[serde(default = "default_scraper_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            mode: ScraperMode::default(),
            timeout_secs: default_scraper_timeout(),
        }
    }
}

fn default_scraper_timeout() -> u64 {
    5
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Run-history database path. Defaults to `~/.abm/runs.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Retry policy (runtime, derived from config)
// ---------------------------------------------------------------------------

/// Bounded exponential backoff: the delay before retry `n` (0-based) is
/// `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to wait after the `retry`-th failed attempt (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

impl From<&HubSpotConfig> for RetryPolicy {
    fn from(config: &HubSpotConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.abm/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AbmError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.abm/abm.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AbmError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AbmError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AbmError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| AbmError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AbmError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the run-history database path.
pub fn resolve_db_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.storage.db_path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Read an API key from the env var `var_name`, rejecting empty or
/// implausibly short values.
pub fn resolve_api_key(var_name: &str, min_len: usize) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if val.len() >= min_len => Ok(val),
        Ok(val) if !val.is_empty() => Err(AbmError::config(format!(
            "invalid value for {var_name}: too short (len={}, expected at least {min_len})",
            val.len()
        ))),
        _ => Err(AbmError::config(format!(
            "missing required environment variable: {var_name}"
        ))),
    }
}
