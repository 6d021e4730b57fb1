//! Configuration types for socialsweep
//!
//! Loading from files or the environment is left to the embedding
//! application: deserialize a [`Config`] with serde and hand it to
//! [`RequestManager::new`](crate::RequestManager::new).

use crate::error::{Error, Result};
use crate::types::ErrorClass;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration for the request manager
///
/// Every section has defaults, so `{}` is a valid configuration (JSON-file
/// ledger under `./state`, no HTTP source registered).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where the ledger and queue snapshot live
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Backoff and retry limits
    #[serde(default)]
    pub retry: RetryConfig,

    /// Date-range windowing
    #[serde(default)]
    pub window: WindowConfig,

    /// REST API server
    #[serde(default)]
    pub api: ApiConfig,

    /// Generic JSON-over-HTTP source (registered as a fetch adapter when set)
    #[serde(default)]
    pub http_source: Option<HttpSourceConfig>,
}

impl Config {
    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.window.validate()?;
        if let Some(http) = &self.http_source {
            http.validate()?;
        }
        Ok(())
    }
}

/// Ledger storage backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// JSON files replaced atomically on every write (default)
    #[default]
    JsonFile,
    /// SQLite database
    Sqlite,
}

/// Data storage and state management
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Storage backend (default: json_file)
    #[serde(default)]
    pub backend: LedgerBackend,

    /// Directory for the JSON ledger and queue snapshot (default: "./state")
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Ledger file name inside `state_dir` (default: "ledger.json")
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,

    /// Queue snapshot file name inside `state_dir` (default: "queue.json")
    #[serde(default = "default_queue_file")]
    pub queue_file: String,

    /// SQLite database path when `backend = sqlite` (default: "./socialsweep.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Where the default sink writes retrieved items (default: "./data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl PersistenceConfig {
    /// Full path of the JSON ledger
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(&self.ledger_file)
    }

    /// Full path of the JSON queue snapshot
    pub fn queue_path(&self) -> PathBuf {
        self.state_dir.join(&self.queue_file)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            state_dir: default_state_dir(),
            ledger_file: default_ledger_file(),
            queue_file: default_queue_file(),
            database_path: default_database_path(),
            data_dir: default_data_dir(),
        }
    }
}

/// Initial wait per error class, before backoff is applied
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitialWaits {
    /// Transport failures (default: 10 seconds)
    #[serde(default = "default_network_wait", with = "duration_serde")]
    pub network: Duration,

    /// HTTP 504 (default: 30 seconds)
    #[serde(default = "default_gateway_timeout_wait", with = "duration_serde")]
    pub gateway_timeout: Duration,

    /// Other API errors (default: 60 seconds)
    #[serde(default = "default_api_error_wait", with = "duration_serde")]
    pub api_error: Duration,

    /// HTTP 429 (default: 900 seconds)
    #[serde(default = "default_rate_limited_wait", with = "duration_serde")]
    pub rate_limited: Duration,

    /// HTTP 417, worker pool exhausted (default: 1800 seconds)
    #[serde(default = "default_no_capacity_wait", with = "duration_serde")]
    pub no_capacity: Duration,
}

impl InitialWaits {
    /// Initial wait for one class
    pub fn for_class(&self, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::Network => self.network,
            ErrorClass::GatewayTimeout => self.gateway_timeout,
            ErrorClass::ApiError => self.api_error,
            ErrorClass::RateLimited => self.rate_limited,
            ErrorClass::NoCapacity => self.no_capacity,
        }
    }
}

impl Default for InitialWaits {
    fn default() -> Self {
        Self {
            network: default_network_wait(),
            gateway_timeout: default_gateway_timeout_wait(),
            api_error: default_api_error_wait(),
            rate_limited: default_rate_limited_wait(),
            no_capacity: default_no_capacity_wait(),
        }
    }
}

/// Retry configuration with exponential backoff
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed per sub-window after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound for any single wait (default: 3600 seconds)
    #[serde(default = "default_max_wait", with = "duration_serde")]
    pub max_wait: Duration,

    /// Courtesy pause after every successful call (default: 5 seconds)
    #[serde(default = "default_success_wait", with = "duration_serde")]
    pub success_wait: Duration,

    /// Initial wait per error class
    #[serde(default)]
    pub initial_waits: InitialWaits,

    /// Classes that are retried; anything else fails the request at once
    /// (default: all classes)
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorClass>,

    /// Add random jitter to the actual sleep (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::config(
                "retry.backoff_factor",
                format!("must be a finite number >= 1.0, got {}", self.backoff_factor),
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            max_wait: default_max_wait(),
            success_wait: default_success_wait(),
            initial_waits: InitialWaits::default(),
            retryable: default_retryable(),
            jitter: false,
        }
    }
}

/// Date-range windowing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Span used when a request gives no `since` (default: 90 days)
    #[serde(default = "default_lookback", with = "duration_serde")]
    pub default_lookback: Duration,

    /// Length of each sub-window (default: 1 day)
    #[serde(default = "default_granularity", with = "duration_serde")]
    pub granularity: Duration,
}

impl WindowConfig {
    fn validate(&self) -> Result<()> {
        if self.granularity.is_zero() {
            return Err(Error::config("window.granularity", "must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_lookback: default_lookback(),
            granularity: default_granularity(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Generic JSON-over-HTTP source
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Adapter name requests refer to (default: "http")
    #[serde(default = "default_http_source_name")]
    pub name: String,

    /// Base URL; the request endpoint is joined onto it
    pub base_url: String,

    /// Extra headers sent with every call (auth tokens and the like)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-call timeout (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl HttpSourceConfig {
    /// Config for `base_url` with defaults for everything else
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            name: default_http_source_name(),
            base_url: base_url.into(),
            headers: BTreeMap::new(),
            timeout: default_http_timeout(),
        }
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url).map_err(|e| {
            Error::config("http_source.base_url", format!("invalid URL '{}': {e}", self.base_url))
        })?;
        if self.name.trim().is_empty() {
            return Err(Error::config("http_source.name", "must not be empty"));
        }
        Ok(())
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_ledger_file() -> String {
    "ledger.json".to_string()
}

fn default_queue_file() -> String {
    "queue.json".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./socialsweep.db")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

fn default_network_wait() -> Duration {
    Duration::from_secs(10)
}

fn default_gateway_timeout_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_api_error_wait() -> Duration {
    Duration::from_secs(60)
}

fn default_rate_limited_wait() -> Duration {
    Duration::from_secs(900)
}

fn default_no_capacity_wait() -> Duration {
    Duration::from_secs(1800)
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_wait() -> Duration {
    Duration::from_secs(3600)
}

fn default_success_wait() -> Duration {
    Duration::from_secs(5)
}

fn default_retryable() -> Vec<ErrorClass> {
    ErrorClass::ALL.to_vec()
}

fn default_lookback() -> Duration {
    // three 30-day months
    Duration::from_secs(90 * 24 * 60 * 60)
}

fn default_granularity() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_http_source_name() -> String {
    "http".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");

        assert_eq!(config.persistence.backend, LedgerBackend::JsonFile);
        assert_eq!(config.persistence.data_dir, PathBuf::from("./data"));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_factor, 2.0);
        assert_eq!(config.retry.max_wait, Duration::from_secs(3600));
        assert_eq!(config.retry.success_wait, Duration::from_secs(5));
        assert_eq!(config.retry.retryable.len(), ErrorClass::ALL.len());
        assert!(!config.retry.jitter);
        assert_eq!(config.window.default_lookback, Duration::from_secs(7_776_000));
        assert_eq!(config.window.granularity, Duration::from_secs(86_400));
        assert!(config.http_source.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn initial_waits_match_error_class() {
        let waits = InitialWaits::default();
        assert_eq!(waits.for_class(ErrorClass::Network), Duration::from_secs(10));
        assert_eq!(waits.for_class(ErrorClass::GatewayTimeout), Duration::from_secs(30));
        assert_eq!(waits.for_class(ErrorClass::ApiError), Duration::from_secs(60));
        assert_eq!(waits.for_class(ErrorClass::RateLimited), Duration::from_secs(900));
        assert_eq!(waits.for_class(ErrorClass::NoCapacity), Duration::from_secs(1800));
    }

    #[test]
    fn durations_are_whole_seconds_on_the_wire() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "retry": { "max_wait": 120, "initial_waits": { "rate_limited": 7 } },
            "window": { "granularity": 3600 }
        }))
        .unwrap();

        assert_eq!(config.retry.max_wait, Duration::from_secs(120));
        assert_eq!(config.retry.initial_waits.rate_limited, Duration::from_secs(7));
        assert_eq!(config.retry.initial_waits.network, Duration::from_secs(10));
        assert_eq!(config.window.granularity, Duration::from_secs(3600));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["retry"]["max_wait"], 120);
    }

    #[test]
    fn zero_granularity_is_rejected() {
        let mut config = Config::default();
        config.window.granularity = Duration::ZERO;
        let err = config.validate().unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("window.granularity")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let mut config = Config::default();
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn http_source_needs_a_valid_url() {
        let mut config = Config::default();
        config.http_source = Some(HttpSourceConfig::new("not a url"));
        assert!(config.validate().is_err());

        config.http_source = Some(HttpSourceConfig::new("https://api.example.com/v1/"));
        config.validate().unwrap();
    }

    #[test]
    fn sqlite_backend_parses() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "persistence": { "backend": "sqlite", "database_path": "/tmp/x.db" }
        }))
        .unwrap();
        assert_eq!(config.persistence.backend, LedgerBackend::Sqlite);
        assert_eq!(config.persistence.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(
            config.persistence.ledger_path(),
            PathBuf::from("./state/ledger.json")
        );
    }
}
