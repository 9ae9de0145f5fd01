//! Configuration types for airwall-bundler
//!
//! The collector is configured from a single JSON document:
//!
//! ```json
//! {
//!   "interval": "30m",
//!   "rollover": "24h",
//!   "download_path": "/tmp/bundles",
//!   "airwall_ids": ["470fda7c-eb4f-4c0d-ad72-a4ad7ada4214"],
//!   "conductor_url": "conductor.acme.com",
//!   "client_id": "loCkeaObuzP5Z2MR7XQWLw",
//!   "api_token": "<secret-token>"
//! }
//! ```
//!
//! Durations are written as `<digits>[s|m|h]` (unitless means seconds) or as a
//! plain JSON integer of seconds.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Upper bound for every configured duration (one year)
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

/// Upper bound for `retry.backoff_multiplier`
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Controller connection settings
///
/// Flattened into [`Config`], so these keys live at the top level of the JSON file.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Controller host name (HTTPS implied) or full `http(s)://` base URL
    #[serde(default)]
    pub conductor_url: String,

    /// API client id, sent as `X-API-Client-ID`
    #[serde(default)]
    pub client_id: String,

    /// API token, sent as `X-API-Token`
    #[serde(default)]
    pub api_token: String,

    /// Port override (default: the URL's port, 443 for HTTPS)
    #[serde(default)]
    pub port: Option<u16>,

    /// Per-request timeout (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Skip TLS certificate verification (default: false)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            conductor_url: String::new(),
            client_id: String::new(),
            api_token: String::new(),
            port: None,
            request_timeout: default_request_timeout(),
            accept_invalid_certs: false,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("conductor_url", &self.conductor_url)
            .field("client_id", &self.client_id)
            .field("api_token", &"<redacted>")
            .field("port", &self.port)
            .field("request_timeout", &self.request_timeout)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Job polling settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between poll rounds (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// How long a job may stay unfinished before it is marked failed (default: 30 minutes)
    #[serde(default = "default_job_timeout", with = "duration_serde")]
    pub job_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            job_timeout: default_job_timeout(),
        }
    }
}

/// Retry configuration for transient controller failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for the collector
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Time between the starts of consecutive cycles (default: 10 minutes)
    #[serde(default = "default_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Maximum age of a stored bundle before it is pruned (default: 24 hours)
    #[serde(default = "default_rollover", with = "duration_serde")]
    pub rollover: Duration,

    /// Retention store directory (default: "/tmp/bundles")
    #[serde(default = "default_download_path")]
    pub download_path: PathBuf,

    /// Devices to collect bundles from (at least one required)
    #[serde(default)]
    pub airwall_ids: Vec<String>,

    /// Controller connection settings
    #[serde(flatten)]
    pub connection: ConnectionConfig,

    /// Job polling settings
    #[serde(flatten)]
    pub polling: PollConfig,

    /// Width of the per-step worker pool (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Retry behavior for idempotent controller calls
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            rollover: default_rollover(),
            download_path: default_download_path(),
            airwall_ids: Vec::new(),
            connection: ConnectionConfig::default(),
            polling: PollConfig::default(),
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Config {
                message: format!("could not find config file '{}'", path.display()),
                key: None,
            });
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| match e {
            Error::Config { message, key } => Error::Config {
                message: format!("{message} (in {})", path.display()),
                key,
            },
            other => other,
        })
    }

    /// Parse and validate a configuration document
    pub fn from_json(raw: &str) -> Result<Self> {
        let document: serde_json::Value = serde_json::from_str(raw).map_err(|e| Error::Config {
            message: format!("failed to parse config: {e}"),
            key: None,
        })?;

        // duration errors must name their key, which serde's messages do not
        check_durations(&document)?;
        for key in unknown_keys(&document) {
            tracing::warn!(key = %key, "Ignoring unknown config param {key}");
        }

        let config: Config = serde_json::from_value(document).map_err(|e| Error::Config {
            message: format!("failed to parse config: {e}"),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting the collector relies on
    pub fn validate(&self) -> Result<()> {
        require_string("conductor_url", &self.connection.conductor_url)?;
        require_string("client_id", &self.connection.client_id)?;
        require_string("api_token", &self.connection.api_token)?;

        if self.airwall_ids.is_empty() {
            return Err(Error::config(
                "airwall_ids",
                "must provide at least one Airwall UUID in airwall_ids",
            ));
        }
        let mut seen = HashSet::new();
        for id in &self.airwall_ids {
            if id.trim().is_empty() {
                return Err(Error::config("airwall_ids", "Airwall ids must not be blank"));
            }
            if !seen.insert(id.as_str()) {
                return Err(Error::config(
                    "airwall_ids",
                    format!("Airwall id {id} is listed more than once"),
                ));
            }
        }

        for (key, value) in [
            ("interval", self.interval),
            ("rollover", self.rollover),
            ("poll_interval", self.polling.poll_interval),
            ("job_timeout", self.polling.job_timeout),
            ("request_timeout", self.connection.request_timeout),
        ] {
            require_positive(key, value)?;
            require_bounded(key, value)?;
        }
        require_bounded("retry.initial_delay", self.retry.initial_delay)?;
        require_bounded("retry.max_delay", self.retry.max_delay)?;

        if self.max_concurrent_requests == 0 {
            return Err(Error::config(
                "max_concurrent_requests",
                "config param max_concurrent_requests must be at least 1",
            ));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.retry.backoff_multiplier) {
            return Err(Error::config(
                "retry.backoff_multiplier",
                format!(
                    "config param retry.backoff_multiplier must be between 1.0 and {MAX_BACKOFF_MULTIPLIER}"
                ),
            ));
        }
        Ok(())
    }
}

fn require_string(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config(
            key,
            format!("config param {key} must be a valid string"),
        ));
    }
    Ok(())
}

fn require_positive(key: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(Error::config(
            key,
            format!("config param {key} must be greater than zero"),
        ));
    }
    Ok(())
}

fn require_bounded(key: &str, value: Duration) -> Result<()> {
    if value > MAX_DURATION {
        return Err(Error::config(
            key,
            format!(
                "config param {key} must not exceed {}h",
                MAX_DURATION.as_secs() / 3600
            ),
        ));
    }
    Ok(())
}

/// Top-level duration keys
const DURATION_KEYS: &[&str] = &[
    "interval",
    "rollover",
    "request_timeout",
    "poll_interval",
    "job_timeout",
];

/// Duration keys of the `retry` object
const RETRY_DURATION_KEYS: &[&str] = &["initial_delay", "max_delay"];

/// Every top-level key the collector understands
const KNOWN_KEYS: &[&str] = &[
    "interval",
    "rollover",
    "download_path",
    "airwall_ids",
    "conductor_url",
    "client_id",
    "api_token",
    "port",
    "request_timeout",
    "accept_invalid_certs",
    "poll_interval",
    "job_timeout",
    "max_concurrent_requests",
    "retry",
];

fn check_durations(document: &serde_json::Value) -> Result<()> {
    let invalid = |key: &str, reason: String| {
        Error::config(key, format!("config param {key} is not a valid duration: {reason}"))
    };

    for &key in DURATION_KEYS {
        if let Some(value) = document.get(key) {
            duration_from_value(value).map_err(|reason| invalid(key, reason))?;
        }
    }
    if let Some(retry) = document.get("retry") {
        for &key in RETRY_DURATION_KEYS {
            if let Some(value) = retry.get(key) {
                let path = format!("retry.{key}");
                duration_from_value(value).map_err(|reason| invalid(&path, reason))?;
            }
        }
    }
    Ok(())
}

/// Top-level keys that no setting reads, in document order
pub fn unknown_keys(document: &serde_json::Value) -> Vec<String> {
    document
        .as_object()
        .map(|map| {
            map.keys()
                .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn duration_from_value(value: &serde_json::Value) -> std::result::Result<Duration, String> {
    match value {
        serde_json::Value::String(text) => parse_duration(text),
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(Duration::from_secs)
            .ok_or_else(|| format!("{n} is not a whole number of seconds")),
        other => Err(format!("expected e.g. \"10m\" or a number of seconds, got {other}")),
    }
}

/// Parse a duration string of the form `10s`, `5m`, `12h` or `30`
///
/// # Examples
///
/// ```
/// use airwall_bundler::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
/// assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
/// assert!(parse_duration("1.5h").is_err());
/// ```
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        // the pattern is a literal, compilation cannot fail
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"^(\d+)([smh]?)$").unwrap();
        re
    });

    let trimmed = input.trim();
    let caps = pattern
        .captures(trimmed)
        .ok_or_else(|| format!("invalid duration '{input}', expected e.g. 30s, 10m or 24h"))?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| format!("duration '{input}' is out of range"))?;
    let multiplier = match &caps[2] {
        "m" => 60,
        "h" => 3600,
        _ => 1,
    };
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{input}' is out of range"))
}

fn default_true() -> bool {
    true
}

fn default_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_rollover() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_download_path() -> PathBuf {
    PathBuf::from("/tmp/bundles")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper: "<n>[s|m|h]" strings or integer seconds in, "<n>s" out
mod duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        super::duration_from_value(&value).map_err(D::Error::custom)
    }
}
