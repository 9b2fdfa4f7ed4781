use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Engine defaults, overridable per deployment through recur.toml / RECUR_* env.
pub const DEFAULT_TARGET_GENERATE_AHEAD_DAYS: u32 = 100;
pub const DEFAULT_REFILL_THRESHOLD_DAYS: u32 = 7;
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;
pub const DEFAULT_PERSIST_BACKOFF_MS: u64 = 100;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_REFILL_INTERVAL_SECS: u64 = 3600;

/// Top-level config (recur.toml + RECUR_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecurConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub refill: RefillConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Firing and retry behaviour of the scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Failed attempts allowed for one firing before the record is finalized `failed`.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// How many times an execution-record save is attempted before giving up.
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
    /// Linear backoff step between save attempts (attempt n waits n × step).
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
    /// Capacity of the scheduler event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
            persist_backoff_ms: DEFAULT_PERSIST_BACKOFF_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Horizon settings for occurrence materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// How far ahead of today occurrences are materialized.
    #[serde(default = "default_target_generate_ahead_days")]
    pub target_generate_ahead_days: u32,
    /// A template is refilled once its horizon is closer than this.
    #[serde(default = "default_refill_threshold_days")]
    pub refill_threshold_days: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            target_generate_ahead_days: DEFAULT_TARGET_GENERATE_AHEAD_DAYS,
            refill_threshold_days: DEFAULT_REFILL_THRESHOLD_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefillConfig {
    /// Cadence of the background refill batch job.
    #[serde(default = "default_refill_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RefillConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REFILL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_max_retry_count() -> u32 {
    DEFAULT_MAX_RETRY_COUNT
}
fn default_persist_attempts() -> u32 {
    DEFAULT_PERSIST_ATTEMPTS
}
fn default_persist_backoff_ms() -> u64 {
    DEFAULT_PERSIST_BACKOFF_MS
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
fn default_target_generate_ahead_days() -> u32 {
    DEFAULT_TARGET_GENERATE_AHEAD_DAYS
}
fn default_refill_threshold_days() -> u32 {
    DEFAULT_REFILL_THRESHOLD_DAYS
}
fn default_refill_interval_secs() -> u64 {
    DEFAULT_REFILL_INTERVAL_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.recur/recur.db", home)
}

impl RecurConfig {
    /// Load config from a TOML file with RECUR_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `RECUR_SCHEDULER__MAX_RETRY_COUNT=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        if !std::path::Path::new(&path).exists() {
            tracing::warn!(%path, "config file not found; using defaults and RECUR_* overrides");
        }

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(RecurConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RECUR_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.recur/recur.toml", home)
}
