//! Connector configuration loading from file and environment variables.

use serde::Deserialize;
use thiserror::Error;

/// Top-level connector configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub interop: InteropConfig,

    #[serde(default)]
    pub signing: SigningConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Federation gateway endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct InteropConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent on every gateway request.
    #[serde(default)]
    pub auth_token: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// PKCS#8 PEM file holding the P-256 private key.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Local directories standing in for object storage.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Where downloaded key groups are written.
    #[serde(default = "default_blob_root")]
    pub blob_root: String,

    /// Where locally submitted keys are read from.
    #[serde(default = "default_submission_root")]
    pub submission_root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_history_days")]
    pub initial_history_days: u32,

    #[serde(default = "default_max_batch_count")]
    pub max_batch_count: usize,

    /// Origins whose keys are stored. Empty accepts every origin.
    #[serde(default)]
    pub valid_origins: Vec<String>,

    #[serde(default)]
    pub risk_level_default: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_history_days")]
    pub initial_history_days: u32,

    /// Submission key prefixes that mark keys ingested from the gateway.
    #[serde(default = "default_federated_key_prefixes")]
    pub federated_key_prefixes: Vec<String>,

    #[serde(default)]
    pub risk_level_default: Option<i32>,

    #[serde(default = "default_min_remaining_time_ms")]
    pub min_remaining_time_ms: u64,

    /// Wall-clock allowance for one invocation.
    #[serde(default = "default_execution_budget_secs")]
    pub execution_budget_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "keyfed_federation=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_private_key_path() -> String {
    "keys/federation.pem".to_string()
}

fn default_db_path() -> String {
    "keyfed.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_blob_root() -> String {
    "var/federated".to_string()
}

fn default_submission_root() -> String {
    "var/submissions".to_string()
}

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    "nearform".to_string()
}

fn default_history_days() -> u32 {
    14
}

fn default_max_batch_count() -> usize {
    100
}

fn default_region() -> String {
    "GB-EAW".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_federated_key_prefixes() -> Vec<String> {
    vec![default_key_prefix()]
}

fn default_min_remaining_time_ms() -> u64 {
    30_000
}

fn default_execution_budget_secs() -> u64 {
    840
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            private_key_path: default_private_key_path(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: default_blob_root(),
            submission_root: default_submission_root(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: default_key_prefix(),
            initial_history_days: default_history_days(),
            max_batch_count: default_max_batch_count(),
            valid_origins: Vec::new(),
            risk_level_default: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: default_region(),
            batch_size: default_batch_size(),
            initial_history_days: default_history_days(),
            federated_key_prefixes: default_federated_key_prefixes(),
            risk_level_default: None,
            min_remaining_time_ms: default_min_remaining_time_ms(),
            execution_budget_secs: default_execution_budget_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `KEYFED_INTEROP_BASE_URL` overrides `interop.base_url`
/// - `KEYFED_INTEROP_AUTH_TOKEN` overrides `interop.auth_token`
/// - `KEYFED_SIGNING_KEY_PATH` overrides `signing.private_key_path`
/// - `KEYFED_DB_PATH` overrides `database.path`
/// - `KEYFED_BLOB_ROOT` overrides `storage.blob_root`
/// - `KEYFED_SUBMISSION_ROOT` overrides `storage.submission_root`
/// - `KEYFED_DOWNLOAD_ENABLED` / `KEYFED_UPLOAD_ENABLED` toggle the pipelines
/// - `KEYFED_LOG_LEVEL` overrides `logging.level`
/// - `KEYFED_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// [`load_config`] with an explicit environment lookup.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config_with_env(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(url) = env("KEYFED_INTEROP_BASE_URL") {
        config.interop.base_url = url;
    }
    if let Some(token) = env("KEYFED_INTEROP_AUTH_TOKEN") {
        config.interop.auth_token = token;
    }
    if let Some(key_path) = env("KEYFED_SIGNING_KEY_PATH") {
        config.signing.private_key_path = key_path;
    }
    if let Some(db_path) = env("KEYFED_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(root) = env("KEYFED_BLOB_ROOT") {
        config.storage.blob_root = root;
    }
    if let Some(root) = env("KEYFED_SUBMISSION_ROOT") {
        config.storage.submission_root = root;
    }
    if let Some(enabled) = env("KEYFED_DOWNLOAD_ENABLED") {
        config.download.enabled = is_truthy(&enabled);
    }
    if let Some(enabled) = env("KEYFED_UPLOAD_ENABLED") {
        config.upload.enabled = is_truthy(&enabled);
    }
    if let Some(level) = env("KEYFED_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("KEYFED_LOG_JSON") {
        config.logging.json = is_truthy(&json);
    }

    Ok(config)
}

fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}
