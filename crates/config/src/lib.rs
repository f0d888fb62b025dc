//! Configuration loading, validation, and management for ctxprompt.
//!
//! Loads configuration from `~/.ctxprompt/config.toml` with environment
//! variable overrides. Validates all settings at startup so that
//! misconfiguration fails at construction time, never mid-request.

use ctxprompt_core::history::Retention;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ctxprompt/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Organization header sent with every provider request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    /// Provider base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model for the single-shot completion path
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Request protocol: classic chat or assistant run
    #[serde(default)]
    pub mode: ModeConfig,

    /// Similarity store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Context assembly settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Remote run polling settings
    #[serde(default)]
    pub run: RunConfig,

    /// Retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Final answer normalization
    #[serde(default)]
    pub normalization: NormalizationConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("organization", &self.organization)
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("mode", &self.mode)
            .field("store", &self.store)
            .field("context", &self.context)
            .field("run", &self.run)
            .field("retrieval", &self.retrieval)
            .field("normalization", &self.normalization)
            .finish()
    }
}

/// How a prompt reaches the model. Decided once, at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeConfig {
    /// Single-shot chat completion.
    #[default]
    Classic,
    /// Thread + run executed by a configured assistant.
    AssistantRun { assistant_id: String },
}

/// Which similarity store backs retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    InMemory,
    Postgres(PostgresConfig),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub database: String,

    pub table: String,

    #[serde(default = "default_id_column")]
    pub id_column: String,

    #[serde(default = "default_vector_column")]
    pub vector_column: String,

    #[serde(default = "default_metadata_column")]
    pub metadata_column: String,

    /// Fixed vector width of the table. When unset, the first insert decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

fn default_pg_port() -> u16 {
    5432
}
fn default_id_column() -> String {
    "id".into()
}
fn default_vector_column() -> String {
    "embedding".into()
}
fn default_metadata_column() -> String {
    "meta".into()
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("database", &self.database)
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .field("vector_column", &self.vector_column)
            .field("metadata_column", &self.metadata_column)
            .field("dimension", &self.dimension)
            .field("pool", &self.pool)
            .field("session", &self.session)
            .finish()
    }
}

/// Connection pool policy for the persisted backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Ping connections before handing them out
    #[serde(default = "default_true")]
    pub test_before_acquire: bool,
}

fn default_max_connections() -> u32 {
    80
}
fn default_min_connections() -> u32 {
    10
}
fn default_max_lifetime_secs() -> u64 {
    2 * 60 * 60
}
fn default_idle_timeout_secs() -> u64 {
    15 * 60
}
fn default_acquire_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            max_lifetime_secs: default_max_lifetime_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            test_before_acquire: true,
        }
    }
}

/// Server-side session parameters set on every pooled connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_application_name")]
    pub application_name: String,

    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_idle_in_transaction_timeout_ms")]
    pub idle_in_transaction_timeout_ms: u64,
}

fn default_application_name() -> String {
    "ctxprompt".into()
}
fn default_statement_timeout_ms() -> u64 {
    120_000
}
fn default_lock_timeout_ms() -> u64 {
    30_000
}
fn default_idle_in_transaction_timeout_ms() -> u64 {
    300_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            statement_timeout_ms: default_statement_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            idle_in_transaction_timeout_ms: default_idle_in_transaction_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Nominal token budget for historical context
    #[serde(default = "default_token_cap")]
    pub token_cap: usize,

    /// Maximum number of exchanges considered
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Fraction of the budget actually spent on history
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,

    /// Framing tokens charged per exchange
    #[serde(default = "default_pair_overhead")]
    pub pair_overhead: usize,

    #[serde(default)]
    pub retention: Retention,

    /// Synthetic gap between a user turn and its reply
    #[serde(default = "default_reply_offset_secs")]
    pub reply_offset_secs: i64,

    /// Synthetic gap between consecutive exchanges
    #[serde(default = "default_pair_spacing_secs")]
    pub pair_spacing_secs: i64,
}

fn default_token_cap() -> usize {
    16_384
}
fn default_history_cap() -> usize {
    20
}
fn default_safety_factor() -> f64 {
    0.8
}
fn default_pair_overhead() -> usize {
    5
}
/// Upper bound for the synthetic spacing between history exchanges (one day).
pub const MAX_PAIR_SPACING_SECS: i64 = 86_400;
/// Upper bound for a whole remote run (one day).
pub const MAX_RUN_TIMEOUT_SECS: u64 = 86_400;
/// Upper bound for the run poll interval (one hour).
pub const MAX_POLL_INTERVAL_MS: u64 = 3_600_000;

fn default_reply_offset_secs() -> i64 {
    15
}
fn default_pair_spacing_secs() -> i64 {
    30
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_cap: default_token_cap(),
            history_cap: default_history_cap(),
            safety_factor: default_safety_factor(),
            pair_overhead: default_pair_overhead(),
            retention: Retention::default(),
            reply_offset_secs: default_reply_offset_secs(),
            pair_spacing_secs: default_pair_spacing_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_run_timeout_secs")]
    pub timeout_secs: u64,

    /// Ask the provider to cancel a run that outlived the timeout
    #[serde(default)]
    pub cancel_on_timeout: bool,
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_run_timeout_secs() -> u64 {
    60
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_run_timeout_secs(),
            cancel_on_timeout: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    #[serde(default = "default_topic")]
    pub default_topic: String,

    #[serde(default = "default_category")]
    pub default_category: String,

    /// Known provider mislabels, mapped to the intended category
    #[serde(default = "default_category_remap")]
    pub category_remap: BTreeMap<String, String>,
}

fn default_topic() -> String {
    "unknown".into()
}
fn default_category() -> String {
    "general".into()
}
fn default_category_remap() -> BTreeMap<String, String> {
    BTreeMap::from([("toobad_bot".to_string(), "bad_chain".to_string())])
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            default_topic: default_topic(),
            default_category: default_category(),
            category_remap: default_category_remap(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ctxprompt/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CTXPROMPT_API_KEY`, then `OPENAI_API_KEY`
    /// - `CTXPROMPT_ORG_ID`
    /// - `CTXPROMPT_ASSISTANT_ID` (switches to assistant-run mode)
    /// - `CTXPROMPT_PG_PASSWORD`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CTXPROMPT_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Some(org) = lookup("CTXPROMPT_ORG_ID") {
            self.organization = Some(org);
        }

        if let Some(assistant_id) = lookup("CTXPROMPT_ASSISTANT_ID") {
            self.mode = ModeConfig::AssistantRun { assistant_id };
        }

        if let (Some(password), StoreConfig::Postgres(pg)) =
            (lookup("CTXPROMPT_PG_PASSWORD"), &mut self.store)
        {
            pg.password = Some(password);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ctxprompt")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.context.token_cap == 0 {
            return Err(ConfigError::ValidationError(
                "context.token_cap must be > 0".into(),
            ));
        }

        if !(self.context.safety_factor > 0.0 && self.context.safety_factor <= 1.0) {
            return Err(ConfigError::ValidationError(
                "context.safety_factor must be in (0, 1]".into(),
            ));
        }

        let (offset, spacing) = (self.context.reply_offset_secs, self.context.pair_spacing_secs);
        if !(0 < offset && offset < spacing && spacing <= MAX_PAIR_SPACING_SECS) {
            return Err(ConfigError::ValidationError(format!(
                "context requires 0 < reply_offset_secs < pair_spacing_secs <= {MAX_PAIR_SPACING_SECS}"
            )));
        }

        if !(1..=MAX_POLL_INTERVAL_MS).contains(&self.run.poll_interval_ms) {
            return Err(ConfigError::ValidationError(format!(
                "run.poll_interval_ms must be in 1..={MAX_POLL_INTERVAL_MS}"
            )));
        }

        if self.run.timeout_secs > MAX_RUN_TIMEOUT_SECS {
            return Err(ConfigError::ValidationError(format!(
                "run.timeout_secs must be <= {MAX_RUN_TIMEOUT_SECS}"
            )));
        }

        if let ModeConfig::AssistantRun { assistant_id } = &self.mode
            && assistant_id.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "mode.assistant_id must not be empty".into(),
            ));
        }

        if let StoreConfig::Postgres(pg) = &self.store {
            pg.validate()?;
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `ctxprompt init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl PostgresConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("store.host", &self.host),
            ("store.user", &self.user),
            ("store.database", &self.database),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!("{field} must not be empty")));
            }
        }

        for (field, value) in [
            ("store.table", &self.table),
            ("store.id_column", &self.id_column),
            ("store.vector_column", &self.vector_column),
            ("store.metadata_column", &self.metadata_column),
        ] {
            if !is_sql_identifier(value) {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be a plain SQL identifier, got '{value}'"
                )));
            }
        }

        if self.dimension == Some(0) {
            return Err(ConfigError::ValidationError(
                "store.dimension must be > 0".into(),
            ));
        }

        if self.pool.min_connections > self.pool.max_connections {
            return Err(ConfigError::ValidationError(
                "store.pool.min_connections exceeds max_connections".into(),
            ));
        }

        Ok(())
    }
}

/// Accepts `name` or `schema.name` made of ASCII letters, digits, and
/// underscores, not starting with a digit. These names are interpolated into
/// SQL, so anything else is refused.
pub fn is_sql_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            organization: None,
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            mode: ModeConfig::default(),
            store: StoreConfig::default(),
            context: ContextConfig::default(),
            run: RunConfig::default(),
            retrieval: RetrievalConfig::default(),
            normalization: NormalizationConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for ctxprompt_core::Error {
    fn from(err: ConfigError) -> Self {
        ctxprompt_core::Error::config(err.to_string())
    }
}
