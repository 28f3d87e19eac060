//! Client, pool and relay configuration.

use spore::KeyPair;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid SPORE_SECRET_KEY: {0}")]
    InvalidSecretKey(String),
    #[error("invalid SPORE_RELAYS: {0}")]
    InvalidRelays(String),
    #[error("invalid SPORE_CONNECT_TIMEOUT_MS: {0}")]
    InvalidConnectTimeoutMs(String),
    #[error("invalid SPORE_PING_INTERVAL_SECONDS: {0}")]
    InvalidPingIntervalSeconds(String),
    #[error("invalid SPORE_MAX_RECONNECT_ATTEMPTS: {0}")]
    InvalidMaxReconnectAttempts(String),
    #[error("invalid SPORE_COLLECT_TIMEOUT_MS: {0}")]
    InvalidCollectTimeoutMs(String),
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// How the pool re-establishes a relay that dropped on its own.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Exponential backoff for the given 1-based attempt, capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    pub relay: RelayConfig,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relays: Vec<String>,
    pub secret_key: Option<KeyPair>,
    pub pool: PoolConfig,
    /// Upper bound on a subscribe-and-collect wait.
    pub collect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            secret_key: None,
            pool: PoolConfig::default(),
            collect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = read("SPORE_RELAYS") {
            config.relays = parse_relays(&raw)?;
        }
        if let Some(raw) = read("SPORE_SECRET_KEY") {
            let keys = KeyPair::parse(&raw)
                .map_err(|error| ConfigError::InvalidSecretKey(error.to_string()))?;
            config.secret_key = Some(keys);
        }
        if let Some(raw) = read("SPORE_CONNECT_TIMEOUT_MS") {
            let millis = raw
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidConnectTimeoutMs(error.to_string()))?;
            config.pool.relay.connect_timeout = Duration::from_millis(millis.max(1));
        }
        if let Some(raw) = read("SPORE_PING_INTERVAL_SECONDS") {
            let seconds = raw
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidPingIntervalSeconds(error.to_string()))?;
            config.pool.relay.ping_interval = Duration::from_secs(seconds.max(1));
        }
        if let Some(raw) = read("SPORE_MAX_RECONNECT_ATTEMPTS") {
            let attempts = raw
                .parse::<u32>()
                .map_err(|error| ConfigError::InvalidMaxReconnectAttempts(error.to_string()))?;
            config.pool.reconnect.max_attempts = attempts;
            config.pool.reconnect.enabled = attempts > 0;
        }
        if let Some(raw) = read("SPORE_COLLECT_TIMEOUT_MS") {
            let millis = raw
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidCollectTimeoutMs(error.to_string()))?;
            config.collect_timeout = Duration::from_millis(millis.max(1));
        }

        Ok(config)
    }
}

fn parse_relays(raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            let url = url::Url::parse(value)
                .map_err(|error| ConfigError::InvalidRelays(format!("{value}: {error}")))?;
            match url.scheme() {
                "ws" | "wss" => Ok(value.to_string()),
                scheme => Err(ConfigError::InvalidRelays(format!(
                    "{value}: unsupported scheme {scheme}"
                ))),
            }
        })
        .collect()
}
