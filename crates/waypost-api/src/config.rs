//! Configuration management for the Waypost service.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use waypost_core::StoreOptions;
use waypost_live::RegistryConfig;

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Without a database URL the service persists to JSON files under
/// `data_dir`.
///
/// # Example
///
/// ```no_run
/// use waypost_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Interface to bind.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Port to bind.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// Base URL of the web frontend, used to build share and update links.
    ///
    /// Environment variable: `FRONTEND_URL`
    #[serde(default = "default_frontend_url", alias = "FRONTEND_URL")]
    pub frontend_url: String,
    /// Request timeout in seconds. Does not apply to event streams.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Storage
    /// PostgreSQL connection URL. Unset selects the file backend.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default, alias = "DATABASE_URL")]
    pub database_url: Option<String>,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_connection_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,
    /// Extra connection attempts before falling back to the file backend.
    ///
    /// Environment variable: `DATABASE_CONNECT_RETRIES`
    #[serde(default = "default_connect_retries", alias = "DATABASE_CONNECT_RETRIES")]
    pub database_connect_retries: u32,
    /// Directory for the file backend.
    ///
    /// Environment variable: `DATA_DIR`
    #[serde(default = "default_data_dir", alias = "DATA_DIR")]
    pub data_dir: PathBuf,

    // Live updates
    /// Seconds between heartbeats on idle event streams.
    ///
    /// Environment variable: `KEEPALIVE_INTERVAL_SECS`
    #[serde(default = "default_keepalive_interval", alias = "KEEPALIVE_INTERVAL_SECS")]
    pub keepalive_interval_secs: u64,
    /// Events buffered per subscriber before it is evicted.
    ///
    /// Environment variable: `SUBSCRIBER_BUFFER`
    #[serde(default = "default_subscriber_buffer", alias = "SUBSCRIBER_BUFFER")]
    pub subscriber_buffer: usize,

    // Logging
    /// Log filter used when `RUST_LOG` is not otherwise consumed.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `config.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to store selection options.
    pub fn to_store_options(&self) -> StoreOptions {
        StoreOptions {
            database_url: self.database_url.clone().filter(|url| !url.trim().is_empty()),
            max_connections: self.database_max_connections,
            min_connections: self.database_min_connections,
            connection_timeout: Duration::from_secs(self.database_connection_timeout),
            connect_retries: self.database_connect_retries,
            data_dir: self.data_dir.clone(),
            ..StoreOptions::default()
        }
    }

    /// Converts to subscriber registry settings.
    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            buffer: self.subscriber_buffer,
        }
    }

    /// Returns the request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        let Some(url) = self.database_url.as_deref() else {
            return "<unset>".to_string();
        };

        if let Some(at_pos) = url.find('@') {
            if let Some(colon_pos) = url[..at_pos].rfind(':') {
                if !url[colon_pos + 1..at_pos].starts_with('/') {
                    let mut masked = url.to_string();
                    masked.replace_range(colon_pos + 1..at_pos, "***");
                    return masked;
                }
            }
        }
        url.to_string()
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        let frontend_url = self.frontend_url.trim();
        if frontend_url.is_empty() {
            anyhow::bail!("frontend_url must not be empty");
        }
        if !(frontend_url.starts_with("http://") || frontend_url.starts_with("https://")) {
            anyhow::bail!("frontend_url must start with http:// or https://");
        }

        if self.keepalive_interval_secs == 0 {
            anyhow::bail!("keepalive_interval_secs must be greater than 0");
        }

        if self.subscriber_buffer == 0 {
            anyhow::bail!("subscriber_buffer must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            frontend_url: default_frontend_url(),
            request_timeout: default_request_timeout(),
            database_url: None,
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_connection_timeout(),
            database_connect_retries: default_connect_retries(),
            data_dir: default_data_dir(),
            keepalive_interval_secs: default_keepalive_interval(),
            subscriber_buffer: default_subscriber_buffer(),
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_connect_retries() -> u32 {
    2
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_log_level() -> String {
    "info,waypost=debug,tower_http=debug".to_string()
}
