use serde::Deserialize;
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Database pool needs at least one connection")]
    NoConnections,

    #[error("Sonar API timeout cannot be 0")]
    InvalidTimeout,
}

/// Webhook collector configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for incoming webhook deliveries
    #[serde(default)]
    pub listener: Listener,
    /// Where the measures table lives
    pub database: Database,
    /// Settings for the callbacks into the Sonar server
    #[serde(default)]
    pub sonar: Sonar,
}

impl Config {
    /// Validates the collector configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.database.validate()?;
        self.sonar.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl Listener {
    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Database {
    /// sqlx connection URL, e.g. `sqlite:///var/lib/sonar-collector/measures.db`
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Database {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyDatabaseUrl);
        }
        if self.max_connections == 0 {
            return Err(ValidationError::NoConnections);
        }
        Ok(())
    }
}

/// Values injected from the config file. Both settings are optional here;
/// see [`crate::settings::LayeredSettings`] for the fallbacks.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Sonar {
    /// Comma separated list of metric keys to request
    pub metric_keys: Option<String>,
    /// User token sent as basic auth username
    pub api_token: Option<String>,
    /// Total timeout for each call to the Sonar API
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Sonar {
    fn default() -> Self {
        Sonar {
            metric_keys: None,
            api_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Sonar {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
