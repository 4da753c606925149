// crates/split-test-config/src/config.rs
// ============================================================================
// Module: Split Test Configuration
// Description: Configuration loading and validation for Split Test.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: split-test-core, split-test-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section is optional; an empty file yields an in-memory store, the
//! labelled view-threshold heuristic, and audit events on stderr. Missing or
//! invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use split_test_core::AutoWinnerRule;
use split_test_core::DEFAULT_SIGNIFICANCE_VIEW_THRESHOLD;
use split_test_core::SignificanceMethod;
use split_test_core::SignificancePolicy;
use split_test_store_sqlite::SqliteStoreConfig;
use split_test_store_sqlite::SqliteStoreMode;
use split_test_store_sqlite::SqliteSyncMode;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "split-test.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SPLIT_TEST_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default bind address for the REST server.
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:8080";
/// Default maximum request body size in bytes.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;
/// Upper bound for `max_body_bytes`.
pub(crate) const MAX_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Default busy timeout for the `SQLite` store.
pub(crate) const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of cached test definitions.
pub(crate) const DEFAULT_CONFIG_CACHE_ENTRIES: usize = 1_024;
/// Upper bound for `config_cache_entries`.
pub(crate) const MAX_CONFIG_CACHE_ENTRIES: usize = 1_000_000;
/// Default minimum views per variant before automatic winner selection.
pub(crate) const DEFAULT_AUTO_WINNER_MIN_VIEWS: u64 = 500;
/// Default minimum confidence before automatic winner selection.
pub(crate) const DEFAULT_AUTO_WINNER_MIN_CONFIDENCE: f64 = 95.0;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root configuration for Split Test.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplitTestConfig {
    /// REST server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Test store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Experiment analysis settings.
    #[serde(default)]
    pub experiments: ExperimentsConfig,
    /// Audit sink settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl SplitTestConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is taken from `path`, then [`CONFIG_ENV_VAR`], then
    /// `split-test.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.store.validate()?;
        self.experiments.validate()?;
        self.audit.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// REST server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the bind address is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid server.bind address: {}", self.bind)))
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind must be non-empty".to_string()));
        }
        self.bind_addr()?;
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be at most {MAX_MAX_BODY_BYTES}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Test store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Returns the `SQLite` store config when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
            _ => None,
        }
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| ConfigError::Invalid("sqlite store requires path".to_string()))?;
                validate_store_path(path)?;
                if self.busy_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "store.busy_timeout_ms must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Test store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use `SQLite`-backed durable store.
    Sqlite,
}

// ============================================================================
// SECTION: Experiments
// ============================================================================

/// Experiment analysis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentsConfig {
    /// Significance estimate shown on dashboards.
    #[serde(default)]
    pub significance_method: SignificanceMethod,
    /// Total views at which the heuristic reports 100%.
    #[serde(default = "default_significance_view_threshold")]
    pub significance_view_threshold: u64,
    /// Number of test definitions kept in the allocation cache; 0 disables it.
    #[serde(default = "default_config_cache_entries")]
    pub config_cache_entries: usize,
    /// Automatic winner rule.
    #[serde(default)]
    pub auto_winner: AutoWinnerConfig,
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            significance_method: SignificanceMethod::default(),
            significance_view_threshold: default_significance_view_threshold(),
            config_cache_entries: default_config_cache_entries(),
            auto_winner: AutoWinnerConfig::default(),
        }
    }
}

impl ExperimentsConfig {
    /// Returns the significance policy for dashboards.
    #[must_use]
    pub const fn significance_policy(&self) -> SignificancePolicy {
        SignificancePolicy {
            method: self.significance_method,
            view_threshold: self.significance_view_threshold,
        }
    }

    /// Validates experiment configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.significance_view_threshold == 0 {
            return Err(ConfigError::Invalid(
                "experiments.significance_view_threshold must be greater than zero".to_string(),
            ));
        }
        if self.config_cache_entries > MAX_CONFIG_CACHE_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "experiments.config_cache_entries must be at most {MAX_CONFIG_CACHE_ENTRIES}"
            )));
        }
        self.auto_winner.validate()
    }
}

/// Opt-in automatic winner declaration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AutoWinnerConfig {
    /// Enables the rule.
    #[serde(default)]
    pub enabled: bool,
    /// Minimum views every variant must have.
    #[serde(default = "default_auto_winner_min_views")]
    pub min_views_per_variant: u64,
    /// Minimum z-test confidence in percent.
    #[serde(default = "default_auto_winner_min_confidence")]
    pub min_confidence_percent: f64,
}

impl Default for AutoWinnerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_views_per_variant: default_auto_winner_min_views(),
            min_confidence_percent: default_auto_winner_min_confidence(),
        }
    }
}

impl AutoWinnerConfig {
    /// Returns the rule when enabled.
    #[must_use]
    pub const fn rule(&self) -> Option<AutoWinnerRule> {
        if self.enabled {
            Some(AutoWinnerRule {
                min_views_per_variant: self.min_views_per_variant,
                min_confidence_percent: self.min_confidence_percent,
            })
        } else {
            None
        }
    }

    /// Validates the automatic winner rule.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_confidence_percent.is_finite()
            || self.min_confidence_percent <= 0.0
            || self.min_confidence_percent >= 100.0
        {
            return Err(ConfigError::Invalid(
                "experiments.auto_winner.min_confidence_percent must be within (0, 100)"
                    .to_string(),
            ));
        }
        if self.enabled && self.min_views_per_variant == 0 {
            return Err(ConfigError::Invalid(
                "experiments.auto_winner.min_views_per_variant must be greater than zero"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// JSON-lines file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.sink=file requires audit.path".to_string()))
            }
            (AuditSinkKind::File, Some(path)) => validate_path_string("audit.path", path),
            (_, Some(_)) => {
                Err(ConfigError::Invalid("audit.path requires audit.sink=file".to_string()))
            }
            (_, None) => Ok(()),
        }
    }
}

/// Audit sink kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard events.
    None,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a configured path against length constraints.
fn validate_path_string(field: &str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates the `SQLite` store path.
fn validate_store_path(path: &Path) -> Result<(), ConfigError> {
    validate_path_string("store.path", path)?;
    if path.is_dir() {
        return Err(ConfigError::Invalid("store.path must be a file, not a directory".to_string()));
    }
    Ok(())
}

/// Returns the default bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Returns the default maximum request body size.
pub(crate) const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default store busy timeout.
pub(crate) const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

/// Returns the default significance view threshold.
pub(crate) const fn default_significance_view_threshold() -> u64 {
    DEFAULT_SIGNIFICANCE_VIEW_THRESHOLD
}

/// Returns the default allocation cache size.
pub(crate) const fn default_config_cache_entries() -> usize {
    DEFAULT_CONFIG_CACHE_ENTRIES
}

/// Returns the default per-variant view minimum for automatic winners.
pub(crate) const fn default_auto_winner_min_views() -> u64 {
    DEFAULT_AUTO_WINNER_MIN_VIEWS
}

/// Returns the default confidence minimum for automatic winners.
pub(crate) const fn default_auto_winner_min_confidence() -> f64 {
    DEFAULT_AUTO_WINNER_MIN_CONFIDENCE
}
