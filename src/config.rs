//! Configuration for bridge sessions
//!
//! [`SessionConfig`] describes one host connection, [`RetryPolicy`] how hard
//! to try establishing it, and [`BridgeConfig`] bundles both with the screen
//! catalog in a JSON file. Configs are plain values; a live session keeps its
//! own copy.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::catalog::ScreenCatalog;
use crate::ebcdic::Charset;
use crate::error::ConfigError;

pub const DEFAULT_TERMINAL_TYPE: &str = "IBM-3179-2";

/// Host messages that mean the sign-on was rejected
pub const DEFAULT_AUTH_FAILURE_MARKERS: [&str; 5] =
    ["CPF1107", "CPF1120", "CPF1116", "CPF1394", "CPF1392"];

pub const CONFIG_PATH_ENV: &str = "AS400_BRIDGE_CONFIG";
pub const HOST_ENV: &str = "AS400_BRIDGE_HOST";
pub const PORT_ENV: &str = "AS400_BRIDGE_PORT";
pub const USER_ENV: &str = "AS400_BRIDGE_USER";
pub const PASSWORD_ENV: &str = "AS400_BRIDGE_PASSWORD";

/// Sign-on credentials. The password is never logged or serialized.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: user.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Serialize for Credentials {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Credentials", 1)?;
        state.serialize_field("user", &self.user)?;
        state.end()
    }
}

/// Connection parameters for one host session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub device_name: Option<String>,
    /// Per-operation timeout (connect attempt, receive)
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub credentials: Option<Credentials>,
    pub terminal_type: String,
    pub charset: Charset,
    pub auth_failure_markers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 23,
            device_name: None,
            timeout_ms: 5_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            credentials: None,
            terminal_type: DEFAULT_TERMINAL_TYPE.to_string(),
            charset: Charset::default(),
            auth_failure_markers: DEFAULT_AUTH_FAILURE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, ..Self::default() }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// `host:port` for socket connects and log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host", &self.host, "host must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port", "0", "port must be between 1 and 65535"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms", "0", "timeout must be positive"));
        }
        if self.terminal_type.is_empty() || !self.terminal_type.is_ascii() {
            return Err(invalid(
                "terminal_type",
                &self.terminal_type,
                "terminal type must be non-empty ASCII",
            ));
        }
        if let Some(device) = &self.device_name {
            if device.is_empty() || device.len() > 10 {
                return Err(invalid("device_name", device, "device names are 1-10 characters"));
            }
        }
        Ok(())
    }
}

/// Reconnection policy for [`crate::connection::ConnectionManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts including the first; 0 is treated as 1
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Overall budget for all attempts and sleeps
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            timeout_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Derive a policy from a session's retry fields
    pub fn from_session(config: &SessionConfig) -> Self {
        let max_attempts = config.retry_attempts.max(1);
        let max_delay_ms = 10_000;
        Self {
            max_attempts,
            initial_delay_ms: config.retry_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
            timeout_ms: u64::from(max_attempts) * (config.timeout_ms + max_delay_ms),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sleeps between consecutive attempts: `attempts() - 1` values
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay().min(self.max_delay()),
            max: self.max_delay(),
            multiplier: self.backoff_multiplier,
            remaining: self.attempts() - 1,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let multiplier = self.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(invalid(
                "backoff_multiplier",
                &multiplier.to_string(),
                "multiplier must be a finite number >= 1.0",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms", "0", "overall timeout must be positive"));
        }
        Ok(())
    }
}

/// Delay schedule: `delay = min(delay * multiplier, max_delay)`
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let current = self.next;
        let scaled = (current.as_nanos() as f64 * self.multiplier).round();
        self.next = if !scaled.is_finite() || scaled >= self.max.as_nanos() as f64 {
            self.max
        } else if scaled <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(scaled as u64)
        };
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

/// Everything a bridge deployment reads from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub session: SessionConfig,
    /// Derived from the session's retry fields when absent
    pub retry: Option<RetryPolicy>,
    pub screens: ScreenCatalog,
}

impl BridgeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .clone()
            .unwrap_or_else(|| RetryPolicy::from_session(&self.session))
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| file_error(path, e))?;
        let config = Self::from_json(&text)?;
        debug!("loaded bridge config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| file_error(parent, e))?;
        }
        fs::write(path, self.to_json()?).map_err(|e| file_error(path, e))?;
        info!("saved bridge config to {}", path.display());
        Ok(())
    }

    /// Load from [`default_config_path`] (defaults when the file is absent),
    /// apply environment overrides, then validate.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            debug!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AS400_BRIDGE_*` overrides from `lookup` (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV) {
            self.session.host = host;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.session.port = port
                .trim()
                .parse()
                .map_err(|_| invalid(PORT_ENV, &port, "not a valid port number"))?;
        }
        if let Some(user) = lookup(USER_ENV) {
            let password = lookup(PASSWORD_ENV)
                .or_else(|| self.session.credentials.as_ref().map(|c| c.password.clone()))
                .unwrap_or_default();
            self.session.credentials = Some(Credentials::new(user, password));
        } else if let (Some(password), Some(credentials)) =
            (lookup(PASSWORD_ENV), self.session.credentials.as_mut())
        {
            credentials.password = password;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}

/// Config file location.
/// Priority:
/// 1) AS400_BRIDGE_CONFIG env var
/// 2) platform config dir, e.g. ~/.config/as400-bridge/bridge.json
/// 3) ./bridge.json
pub fn default_config_path() -> PathBuf {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join("as400-bridge").join("bridge.json"))
        .unwrap_or_else(|| PathBuf::from("bridge.json"))
}

fn invalid(parameter: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn file_error(path: &Path, error: std::io::Error) -> ConfigError {
    ConfigError::FileError {
        path: path.display().to_string(),
        error: error.to_string(),
    }
}
