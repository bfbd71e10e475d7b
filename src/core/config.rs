use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default hub endpoint of the broker's streaming service
pub const DEFAULT_HUB_URL: &str = "https://www.bullmarketbrokers.com/stockPricesHub";

/// Configuration of the broadcast hub channel
///
/// Timeouts are stored in milliseconds so the struct round-trips cleanly
/// through serde; use the accessor methods to get `Duration`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Base URL of the hub; negotiation and transport URLs derive from it
    pub hub_url: String,
    /// Transport open timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Deadline for the handshake acknowledgement in milliseconds
    pub handshake_timeout_ms: u64,
    /// Deadline for each invocation acknowledgement in milliseconds
    pub invocation_timeout_ms: u64,
    /// Keepalive ping period in milliseconds
    pub keepalive_interval_ms: u64,
    /// Upper bound on waiting for the transport close in milliseconds
    pub close_timeout_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            connect_timeout_ms: 10_000,    // 10 seconds
            handshake_timeout_ms: 15_000,  // 15 seconds
            invocation_timeout_ms: 15_000, // 15 seconds
            keepalive_interval_ms: 15_000, // 15 seconds
            close_timeout_ms: 5_000,       // 5 seconds
            event_capacity: 1024,
        }
    }
}

impl HubConfig {
    /// Create a configuration pointing at a custom hub URL
    #[must_use]
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_HUB_URL` (optional, defaults to [`DEFAULT_HUB_URL`])
    /// - `{PREFIX}_CONNECT_TIMEOUT_MS` (optional)
    /// - `{PREFIX}_HANDSHAKE_TIMEOUT_MS` (optional)
    /// - `{PREFIX}_INVOCATION_TIMEOUT_MS` (optional)
    /// - `{PREFIX}_KEEPALIVE_INTERVAL_MS` (optional)
    /// - `{PREFIX}_CLOSE_TIMEOUT_MS` (optional)
    /// - `{PREFIX}_EVENT_CAPACITY` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let defaults = Self::default();

        let hub_url =
            env::var(format!("{}_HUB_URL", prefix)).unwrap_or_else(|_| defaults.hub_url.clone());
        if !hub_url.starts_with("http://") && !hub_url.starts_with("https://") {
            return Err(ConfigError::InvalidConfiguration(format!(
                "hub url must be http(s): {}",
                hub_url
            )));
        }

        let config = Self {
            hub_url,
            connect_timeout_ms: read_number(&prefix, "CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms)?,
            handshake_timeout_ms: read_number(
                &prefix,
                "HANDSHAKE_TIMEOUT_MS",
                defaults.handshake_timeout_ms,
            )?,
            invocation_timeout_ms: read_number(
                &prefix,
                "INVOCATION_TIMEOUT_MS",
                defaults.invocation_timeout_ms,
            )?,
            keepalive_interval_ms: read_number(
                &prefix,
                "KEEPALIVE_INTERVAL_MS",
                defaults.keepalive_interval_ms,
            )?,
            close_timeout_ms: read_number(&prefix, "CLOSE_TIMEOUT_MS", defaults.close_timeout_ms)?,
            event_capacity: read_number(&prefix, "EVENT_CAPACITY", defaults.event_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// A missing .env file is not an error; system environment variables
    /// are used as-is in that case.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Reject values the connection cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "keepalive interval must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "event capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub const fn invocation_timeout(&self) -> Duration {
        Duration::from_millis(self.invocation_timeout_ms)
    }

    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

fn read_number<T: std::str::FromStr>(prefix: &str, name: &str, default: T) -> Result<T, ConfigError> {
    let var = format!("{}_{}", prefix, name);
    match env::var(&var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidConfiguration(format!("{} is not a number: {}", var, raw))),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
