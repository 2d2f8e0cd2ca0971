use crate::error::{PoolError, Result};
use crate::proxy::endpoint::EndpointOptions;
use crate::proxy::pool::PoolConfig;
use crate::proxy::tls::TlsSettings;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway server configuration
    pub gateway: GatewayServerConfig,
    /// Upstream pool configuration
    pub pool: PoolSettings,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct GatewayServerConfig {
    /// Port for the gateway (default: 8000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Per-dial timeout in seconds
    pub connect_timeout_secs: u64,
    /// Deadline for finding a working endpoint, in seconds
    pub select_timeout_secs: u64,
    /// Require inbound Basic authentication
    pub auth_enabled: bool,
    /// Authentication username
    pub auth_username: String,
    /// Authentication password
    pub auth_password: String,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
            connect_timeout_secs: 10,
            select_timeout_secs: 30,
            auth_enabled: false,
            auth_username: String::new(),
            auth_password: String::new(),
        }
    }
}

impl GatewayServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn select_timeout(&self) -> Duration {
        Duration::from_secs(self.select_timeout_secs)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolSettings {
    /// Upstream proxy URLs in rotation order
    pub endpoints: Vec<String>,
    /// Per-host cooldown applied to every endpoint, in milliseconds
    pub cooldown_ms: u64,
    /// Backoff after a sweep in which every endpoint failed, in milliseconds
    pub sweep_backoff_ms: u64,
    /// Extra PEM roots for `https` endpoints
    pub tls_ca_file: Option<String>,
    /// Skip certificate verification for `https` endpoints
    pub tls_insecure: bool,
}

impl PoolSettings {
    pub fn endpoint_options(&self) -> EndpointOptions {
        EndpointOptions::default().cooldown_per_host(Duration::from_millis(self.cooldown_ms))
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let format = get_env_or("LOG_FORMAT", "pretty").to_lowercase();
        if format != "json" && format != "pretty" {
            return Err(PoolError::InvalidConfig(format!(
                "LOG_FORMAT must be json or pretty, got {}",
                format
            )));
        }

        Ok(Config {
            gateway: GatewayServerConfig {
                port: parse_env("GATEWAY_PORT", "8000")?,
                host: get_env_or("GATEWAY_HOST", "0.0.0.0"),
                connect_timeout_secs: parse_env("GATEWAY_CONNECT_TIMEOUT", "10")?,
                select_timeout_secs: parse_env("GATEWAY_SELECT_TIMEOUT", "30")?,
                auth_enabled: parse_env("GATEWAY_AUTH_ENABLED", "false")?,
                auth_username: get_env_or("GATEWAY_AUTH_USERNAME", ""),
                auth_password: get_env_or("GATEWAY_AUTH_PASSWORD", ""),
            },
            pool: PoolSettings {
                endpoints: get_env_or("POOL_ENDPOINTS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                cooldown_ms: parse_env("POOL_COOLDOWN_MS", "0")?,
                sweep_backoff_ms: parse_env("POOL_SWEEP_BACKOFF_MS", "50")?,
                tls_ca_file: env::var("POOL_TLS_CA_FILE")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                tls_insecure: parse_env("POOL_TLS_INSECURE", "false")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format,
            },
        })
    }

    /// Get the gateway listen address
    pub fn gateway_addr(&self) -> String {
        format!("{}:{}", self.gateway.host, self.gateway.port)
    }

    /// Pool-wide settings derived from the gateway and pool sections
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            connect_timeout: self.gateway.connect_timeout(),
            sweep_backoff: Duration::from_millis(self.pool.sweep_backoff_ms),
            tls: TlsSettings {
                ca_file: self.pool.tls_ca_file.clone(),
                insecure: self.pool.tls_insecure,
            },
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.trim()
        .parse()
        .map_err(|_| PoolError::InvalidConfig(format!("{} has an invalid value: {}", key, raw)))
}
