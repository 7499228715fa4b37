use crate::mailbox::gmail::DEFAULT_API_BASE;
use crate::source::SourceKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A session token bound to a user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountConfig {
    pub token: String,
    pub email: String,
    /// OAuth access token for the user's Gmail account (mailbox source only).
    #[serde(default)]
    pub mailbox_token: Option<String>,
}

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// DuckDB database file. If not set, an in-memory database is used.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Which strategy serves recipient stats.
    #[serde(default)]
    pub recipient_source: SourceKind,
    /// Maximum rows in each ranked list from the analytics store.
    #[serde(default = "default_top_recipients_limit")]
    pub top_recipients_limit: usize,
    /// Maximum concurrent message fetches on the mailbox source.
    #[serde(default = "default_mailbox_fetch_concurrency")]
    pub mailbox_fetch_concurrency: usize,
    /// Retries for a rate-limited mailbox call before giving up.
    #[serde(default = "default_mailbox_max_retries")]
    pub mailbox_max_retries: u32,
    #[serde(default = "default_mailbox_api_base")]
    pub mailbox_api_base: String,
    /// Dashboard origin for CORS restrictions on API routes.
    /// If not set, all origins are allowed.
    #[serde(default)]
    pub dashboard_origin: Option<String>,
    /// Response cache TTL in seconds (default: 60). 0 = no caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Graceful shutdown timeout in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_top_recipients_limit() -> usize {
    50
}

const fn default_mailbox_fetch_concurrency() -> usize {
    5
}

const fn default_mailbox_max_retries() -> u32 {
    3
}

fn default_mailbox_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

const fn default_cache_ttl_secs() -> u64 {
    60
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
            recipient_source: SourceKind::default(),
            top_recipients_limit: default_top_recipients_limit(),
            mailbox_fetch_concurrency: default_mailbox_fetch_concurrency(),
            mailbox_max_retries: default_mailbox_max_retries(),
            mailbox_api_base: default_mailbox_api_base(),
            dashboard_origin: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            accounts: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `MAILPULSE_HOST` → host
    /// - `MAILPULSE_PORT` → port
    /// - `MAILPULSE_DATABASE` → database_path
    /// - `MAILPULSE_SOURCE` → recipient_source
    /// - `MAILPULSE_TOP_LIMIT` → top_recipients_limit
    /// - `MAILPULSE_FETCH_CONCURRENCY` → mailbox_fetch_concurrency
    /// - `MAILPULSE_MAX_RETRIES` → mailbox_max_retries
    /// - `MAILPULSE_MAILBOX_API` → mailbox_api_base
    /// - `MAILPULSE_DASHBOARD_ORIGIN` → dashboard_origin
    /// - `MAILPULSE_CACHE_TTL` → cache_ttl_secs
    /// - `MAILPULSE_SHUTDOWN_TIMEOUT` → shutdown_timeout_secs
    ///
    /// Accounts can only be configured in the file.
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        if let Ok(host) = std::env::var("MAILPULSE_HOST") {
            config.host = host;
        }
        override_parsed("MAILPULSE_PORT", &mut config.port);
        if let Ok(path) = std::env::var("MAILPULSE_DATABASE") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(val) = std::env::var("MAILPULSE_SOURCE") {
            match val.parse() {
                Ok(kind) => config.recipient_source = kind,
                Err(e) => tracing::warn!("{e}, keeping {}", config.recipient_source.as_str()),
            }
        }
        override_parsed("MAILPULSE_TOP_LIMIT", &mut config.top_recipients_limit);
        override_parsed(
            "MAILPULSE_FETCH_CONCURRENCY",
            &mut config.mailbox_fetch_concurrency,
        );
        override_parsed("MAILPULSE_MAX_RETRIES", &mut config.mailbox_max_retries);
        if let Ok(base) = std::env::var("MAILPULSE_MAILBOX_API") {
            config.mailbox_api_base = base;
        }
        if let Ok(origin) = std::env::var("MAILPULSE_DASHBOARD_ORIGIN") {
            config.dashboard_origin = Some(origin);
        }
        override_parsed("MAILPULSE_CACHE_TTL", &mut config.cache_ttl_secs);
        override_parsed("MAILPULSE_SHUTDOWN_TIMEOUT", &mut config.shutdown_timeout_secs);

        config
    }

    /// Socket address string to bind the server to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Replace `target` with the parsed value of env var `key`, if set and valid.
fn override_parsed<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}
