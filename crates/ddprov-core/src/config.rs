//! Configuration types for the provider
//!
//! [`ProviderConfig`] is resolved once at start-up from the explicit
//! provider block and the environment, validated, and then shared
//! read-only. [`EngineConfig`] tunes the reconcile engine.

use crate::error::Error;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Production API endpoint
pub const DEFAULT_API_URL: &str = "https://api.datadoghq.com";

/// Environment variables consulted for each setting, in priority order
const ENV_API_KEY: &[&str] = &["DD_API_KEY", "DATADOG_API_KEY"];
const ENV_APP_KEY: &[&str] = &["DD_APP_KEY", "DATADOG_APP_KEY"];
const ENV_API_URL: &[&str] = &["DATADOG_HOST", "DD_HOST"];
const ENV_RETRY_ENABLED: &[&str] = &["DD_HTTP_CLIENT_RETRY_ENABLED"];
const ENV_RETRY_TIMEOUT: &[&str] = &["DD_HTTP_CLIENT_RETRY_TIMEOUT"];
const ENV_RETRY_MULTIPLIER: &[&str] = &["DD_HTTP_CLIENT_RETRY_BACKOFF_MULTIPLIER"];
const ENV_RETRY_BASE: &[&str] = &["DD_HTTP_CLIENT_RETRY_BACKOFF_BASE"];
const ENV_RETRY_MAX: &[&str] = &["DD_HTTP_CLIENT_RETRY_MAX_RETRIES"];

/// Explicit provider block; every field is optional and falls back to the
/// environment, then to the default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderBlock {
    pub api_key: Option<String>,
    pub app_key: Option<String>,
    pub api_url: Option<String>,
    pub validate: Option<bool>,
    pub http_client_retry_enabled: Option<bool>,
    pub http_client_retry_timeout: Option<u64>,
    pub http_client_retry_backoff_multiplier: Option<u64>,
    pub http_client_retry_backoff_base: Option<u32>,
    pub http_client_retry_max_retries: Option<u32>,
}

/// Resolved provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (`DD-API-KEY` header)
    #[serde(default)]
    pub api_key: String,

    /// Application key (`DD-APPLICATION-KEY` header)
    #[serde(default)]
    pub app_key: String,

    /// Site root URL, without `/api/`
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Require keys and verify them at start-up
    #[serde(default = "default_true")]
    pub validate: bool,

    /// Retry 5xx, transport errors and 429
    #[serde(default = "default_true")]
    pub http_client_retry_enabled: bool,

    /// Total retry budget per request (seconds)
    #[serde(default = "default_retry_timeout")]
    pub http_client_retry_timeout: u64,

    /// First backoff sleep (seconds)
    #[serde(default = "default_backoff_multiplier")]
    pub http_client_retry_backoff_multiplier: u64,

    /// Backoff growth factor
    #[serde(default = "default_backoff_base")]
    pub http_client_retry_backoff_base: u32,

    /// Maximum retries per request
    #[serde(default = "default_max_retries")]
    pub http_client_retry_max_retries: u32,
}

impl ProviderConfig {
    /// Configuration with defaults and the given keys
    pub fn new(api_key: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            app_key: app_key.into(),
            ..Self::default()
        }
    }

    /// Resolve from the explicit block and the process environment
    pub fn from_env(block: ProviderBlock) -> Result<Self, Error> {
        Self::from_lookup(block, |key| std::env::var(key).ok())
    }

    /// Resolve from the explicit block and an environment lookup
    ///
    /// Explicit values win over the environment, which wins over defaults.
    /// Empty environment values count as unset.
    pub fn from_lookup<F>(block: ProviderBlock, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |names: &[&str]| -> Option<(String, String)> {
            names.iter().find_map(|name| {
                lookup(name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (name.to_string(), v))
            })
        };

        let defaults = Self::default();
        Ok(Self {
            api_key: block
                .api_key
                .or_else(|| env(ENV_API_KEY).map(|(_, v)| v))
                .unwrap_or_default(),
            app_key: block
                .app_key
                .or_else(|| env(ENV_APP_KEY).map(|(_, v)| v))
                .unwrap_or_default(),
            api_url: block
                .api_url
                .or_else(|| env(ENV_API_URL).map(|(_, v)| v))
                .unwrap_or(defaults.api_url),
            validate: block.validate.unwrap_or(defaults.validate),
            http_client_retry_enabled: match block.http_client_retry_enabled {
                Some(v) => v,
                None => parse_env(env(ENV_RETRY_ENABLED), parse_bool)?
                    .unwrap_or(defaults.http_client_retry_enabled),
            },
            http_client_retry_timeout: match block.http_client_retry_timeout {
                Some(v) => v,
                None => parse_env(env(ENV_RETRY_TIMEOUT), |s| s.parse().ok())?
                    .unwrap_or(defaults.http_client_retry_timeout),
            },
            http_client_retry_backoff_multiplier: match block.http_client_retry_backoff_multiplier {
                Some(v) => v,
                None => parse_env(env(ENV_RETRY_MULTIPLIER), |s| s.parse().ok())?
                    .unwrap_or(defaults.http_client_retry_backoff_multiplier),
            },
            http_client_retry_backoff_base: match block.http_client_retry_backoff_base {
                Some(v) => v,
                None => parse_env(env(ENV_RETRY_BASE), |s| s.parse().ok())?
                    .unwrap_or(defaults.http_client_retry_backoff_base),
            },
            http_client_retry_max_retries: match block.http_client_retry_max_retries {
                Some(v) => v,
                None => parse_env(env(ENV_RETRY_MAX), |s| s.parse().ok())?
                    .unwrap_or(defaults.http_client_retry_max_retries),
            },
        })
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.validate && (self.api_key.is_empty() || self.app_key.is_empty()) {
            return Err(Error::config("api_key and app_key must be set unless validate = false"));
        }

        let parsed = url::Url::parse(&self.api_url)
            .map_err(|e| Error::config(format!("invalid api_url {:?}: {}", self.api_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "api_url must use http or https, got {:?}",
                parsed.scheme()
            )));
        }
        if parsed.path().ends_with("/api/") || parsed.path().ends_with("/api") {
            return Err(Error::config(
                "api_url must be the site root and must not end with /api/",
            ));
        }

        if self.http_client_retry_timeout == 0 {
            return Err(Error::config("http_client_retry_timeout must be > 0"));
        }
        if self.http_client_retry_backoff_base == 0 {
            return Err(Error::config("http_client_retry_backoff_base must be > 0"));
        }

        Ok(())
    }

    /// Site root without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Retry policy for API calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_enabled(self.http_client_retry_enabled)
            .with_timeout(Duration::from_secs(self.http_client_retry_timeout))
            .with_first_backoff(Duration::from_secs(self.http_client_retry_backoff_multiplier))
            .with_factor(self.http_client_retry_backoff_base)
            .with_max_retries(self.http_client_retry_max_retries)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            app_key: String::new(),
            api_url: default_api_url(),
            validate: default_true(),
            http_client_retry_enabled: default_true(),
            http_client_retry_timeout: default_retry_timeout(),
            http_client_retry_backoff_multiplier: default_backoff_multiplier(),
            http_client_retry_backoff_base: default_backoff_base(),
            http_client_retry_max_retries: default_max_retries(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"<REDACTED>")
            .field("app_key", &"<REDACTED>")
            .field("api_url", &self.api_url)
            .field("validate", &self.validate)
            .field("http_client_retry_enabled", &self.http_client_retry_enabled)
            .field("http_client_retry_timeout", &self.http_client_retry_timeout)
            .field("http_client_retry_backoff_multiplier", &self.http_client_retry_backoff_multiplier)
            .field("http_client_retry_backoff_base", &self.http_client_retry_backoff_base)
            .field("http_client_retry_max_retries", &self.http_client_retry_max_retries)
            .finish()
    }
}

fn parse_env<T>(
    found: Option<(String, String)>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, Error> {
    match found {
        None => Ok(None),
        Some((name, raw)) => parse(raw.trim())
            .map(Some)
            .ok_or_else(|| Error::config(format!("invalid value for {}: {:?}", name, raw))),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_timeout() -> u64 {
    60
}

fn default_backoff_multiplier() -> u64 {
    2
}

fn default_backoff_base() -> u32 {
    2
}

fn default_max_retries() -> u32 {
    3
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of lifecycle handlers running at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log) rather than
    /// blocking reconciliation.
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.parallelism == 0 {
            return Err(Error::config("parallelism must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_parallelism() -> usize {
    10
}

fn default_event_channel_capacity() -> usize {
    1000
}
