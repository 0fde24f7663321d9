//! Configuration loading for Switchboard.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `SWITCHBOARD_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Application configuration derived from `SWITCHBOARD_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Base URL of the remote RPC/data-store layer
    #[serde(default = "default_api_base_url")]
    pub api_base_url: Url,
    /// Opaque bearer token for the logged-in user; issuance is out of scope
    #[serde(default, skip_serializing)]
    pub session_token: Option<String>,
    /// The logged-in user; required by the daemon and the OAuth flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Redirect URI handed to the authorization server at flow start
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: Url,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub health: HealthMonitorConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// Remote-call timeout and retry policy.
///
/// The reference behavior inherited transport defaults; an explicit policy
/// is configured here instead. Non-idempotent calls (code exchange, alert
/// dispatch) never retry regardless of `retry_max_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RpcConfig {
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_rpc_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Attempts for idempotent calls, including the first (default: 3)
    #[serde(default = "default_rpc_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Base backoff between retries in milliseconds (default: 250)
    ///
    /// Retry n sleeps `retry_base_ms * 2^(n-1)`, jittered.
    #[serde(default = "default_rpc_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Jitter factor applied to backoff (default: 0.1, range 0.0-1.0)
    #[serde(default = "default_rpc_retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

/// Realtime synchronizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RealtimeConfig {
    /// Initial reconnect backoff in milliseconds (default: 500)
    #[serde(default = "default_realtime_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Reconnect backoff ceiling in milliseconds (default: 30000)
    #[serde(default = "default_realtime_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Number of jobs whose event logs are retained in memory (default: 256)
    #[serde(default = "default_realtime_events_job_capacity")]
    pub events_job_capacity: usize,

    /// Size of the rolling activity log (default: 500 lines)
    #[serde(default = "default_realtime_log_capacity")]
    pub log_capacity: usize,
}

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HealthMonitorConfig {
    /// Seconds between probe cycles (default: 60)
    #[serde(default = "default_health_interval_seconds")]
    pub interval_seconds: u64,
}

/// Notification dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NotificationsConfig {
    /// Preferences file location; defaults under the user data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences_path: Option<PathBuf>,

    /// Recipient for email alerts, forwarded in the alert payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,
}

impl RpcConfig {
    /// Validate RPC policy bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds == 0 || self.timeout_seconds > 300 {
            return Err(ConfigError::InvalidRpcTimeout {
                value: self.timeout_seconds,
            });
        }
        if self.retry_max_attempts == 0 || self.retry_max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.retry_max_attempts,
            });
        }
        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.retry_jitter_factor,
            });
        }
        Ok(())
    }
}

impl RealtimeConfig {
    /// Validate reconnect window and cache capacities
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_base_ms == 0 || self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(ConfigError::InvalidReconnectWindow {
                base_ms: self.reconnect_base_ms,
                max_ms: self.reconnect_max_ms,
            });
        }
        if self.events_job_capacity == 0 || self.log_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }
        Ok(())
    }
}

impl HealthMonitorConfig {
    /// Validate probe interval bounds (minimum 5 seconds)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds < 5 {
            return Err(ConfigError::InvalidHealthInterval {
                value: self.interval_seconds,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Validate all subsystem sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc.validate()?;
        self.realtime.validate()?;
        self.health.validate()?;
        Ok(())
    }

    /// Serialize the configuration with secrets omitted, for startup logs
    pub fn redacted_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            api_base_url: default_api_base_url(),
            session_token: None,
            user_id: None,
            redirect_uri: default_redirect_uri(),
            rpc: RpcConfig::default(),
            realtime: RealtimeConfig::default(),
            health: HealthMonitorConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_rpc_timeout_seconds(),
            retry_max_attempts: default_rpc_retry_max_attempts(),
            retry_base_ms: default_rpc_retry_base_ms(),
            retry_jitter_factor: default_rpc_retry_jitter_factor(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_realtime_reconnect_base_ms(),
            reconnect_max_ms: default_realtime_reconnect_max_ms(),
            events_job_capacity: default_realtime_events_job_capacity(),
            log_capacity: default_realtime_log_capacity(),
        }
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval_seconds(),
        }
    }
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("invalid URL in {key}: {value}")]
    InvalidUrl { key: &'static str, value: String },
    #[error("invalid UUID in SWITCHBOARD_USER_ID: {value}")]
    InvalidUserId { value: String },
    #[error("rpc timeout must be between 1 and 300 seconds, got {value}")]
    InvalidRpcTimeout { value: u64 },
    #[error("rpc retry attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("rpc retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
    #[error("reconnect backoff window invalid: base {base_ms}ms, max {max_ms}ms")]
    InvalidReconnectWindow { base_ms: u64, max_ms: u64 },
    #[error("realtime cache capacities must be positive")]
    InvalidCacheCapacity,
    #[error("health probe interval must be at least 5 seconds, got {value}")]
    InvalidHealthInterval { value: u64 },
}

/// Loads configuration using layered `.env` files and `SWITCHBOARD_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut layered = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("SWITCHBOARD_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_profile);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);

        let api_base_url = match layered.remove("API_BASE_URL").filter(|v| !v.is_empty()) {
            Some(raw) => Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl {
                key: "SWITCHBOARD_API_BASE_URL",
                value: raw,
            })?,
            None => default_api_base_url(),
        };
        let redirect_uri = match layered.remove("REDIRECT_URI").filter(|v| !v.is_empty()) {
            Some(raw) => Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl {
                key: "SWITCHBOARD_REDIRECT_URI",
                value: raw,
            })?,
            None => default_redirect_uri(),
        };

        let session_token = layered.remove("SESSION_TOKEN").filter(|v| !v.is_empty());
        let user_id = match layered.remove("USER_ID").filter(|v| !v.is_empty()) {
            Some(raw) => Some(
                Uuid::parse_str(&raw).map_err(|_| ConfigError::InvalidUserId { value: raw })?,
            ),
            None => None,
        };

        let rpc = RpcConfig {
            timeout_seconds: parse_or(&mut layered, "RPC_TIMEOUT_SECONDS", default_rpc_timeout_seconds),
            retry_max_attempts: parse_or(
                &mut layered,
                "RPC_RETRY_MAX_ATTEMPTS",
                default_rpc_retry_max_attempts,
            ),
            retry_base_ms: parse_or(&mut layered, "RPC_RETRY_BASE_MS", default_rpc_retry_base_ms),
            retry_jitter_factor: parse_or(
                &mut layered,
                "RPC_RETRY_JITTER_FACTOR",
                default_rpc_retry_jitter_factor,
            ),
        };
        let realtime = RealtimeConfig {
            reconnect_base_ms: parse_or(
                &mut layered,
                "REALTIME_RECONNECT_BASE_MS",
                default_realtime_reconnect_base_ms,
            ),
            reconnect_max_ms: parse_or(
                &mut layered,
                "REALTIME_RECONNECT_MAX_MS",
                default_realtime_reconnect_max_ms,
            ),
            events_job_capacity: parse_or(
                &mut layered,
                "REALTIME_EVENTS_JOB_CAPACITY",
                default_realtime_events_job_capacity,
            ),
            log_capacity: parse_or(
                &mut layered,
                "REALTIME_LOG_CAPACITY",
                default_realtime_log_capacity,
            ),
        };
        let health = HealthMonitorConfig {
            interval_seconds: parse_or(
                &mut layered,
                "HEALTH_INTERVAL_SECONDS",
                default_health_interval_seconds,
            ),
        };
        let notifications = NotificationsConfig {
            preferences_path: layered
                .remove("NOTIFICATIONS_PREFERENCES_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            recipient_email: layered
                .remove("NOTIFICATIONS_RECIPIENT_EMAIL")
                .filter(|v| !v.is_empty()),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            api_base_url,
            session_token,
            user_id,
            redirect_uri,
            rpc,
            realtime,
            health,
            notifications,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read `.env` then `.env.{profile}`, later layers winning.
    fn collect_layered_env(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut layered = BTreeMap::new();

        self.merge_env_file(&self.base_dir.join(".env"), &mut layered)?;

        let profile = env::var("SWITCHBOARD_PROFILE")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| layered.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);
        self.merge_env_file(&self.base_dir.join(format!(".env.{profile}")), &mut layered)?;

        Ok(layered)
    }

    fn merge_env_file(
        &self,
        path: &PathBuf,
        layered: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        if !path.exists() {
            return Ok(());
        }
        let iter = dotenvy::from_path_iter(path).map_err(|source| ConfigError::EnvFile {
            path: path.clone(),
            source,
        })?;
        for item in iter {
            let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                path: path.clone(),
                source,
            })?;
            if let Some(stripped) = key.strip_prefix("SWITCHBOARD_") {
                layered.insert(stripped.to_string(), value);
            }
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_or<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> T,
) -> T {
    layered
        .remove(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(default)
}

fn default_profile() -> String {
    "dev".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_api_base_url() -> Url {
    Url::parse("http://127.0.0.1:8787").unwrap()
}

fn default_redirect_uri() -> Url {
    Url::parse("http://127.0.0.1:4400/oauth/callback").unwrap()
}

fn default_rpc_timeout_seconds() -> u64 {
    30
}

fn default_rpc_retry_max_attempts() -> u32 {
    3
}

fn default_rpc_retry_base_ms() -> u64 {
    250
}

fn default_rpc_retry_jitter_factor() -> f64 {
    0.1
}

fn default_realtime_reconnect_base_ms() -> u64 {
    500
}

fn default_realtime_reconnect_max_ms() -> u64 {
    30_000
}

fn default_realtime_events_job_capacity() -> usize {
    256
}

fn default_realtime_log_capacity() -> usize {
    500
}

fn default_health_interval_seconds() -> u64 {
    60
}
