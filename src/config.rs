//! Configuration management for the ClickHouse MCP Server.
//!
//! Configuration is loaded from environment variables following the 12-factor
//! app pattern, collected once at startup into an explicit [`Config`] struct
//! and passed into component constructors. There is no ambient settings
//! singleton.

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DATABASE, DEFAULT_POOL_RECYCLE_SECS, DEFAULT_POOL_SIZE,
    DEFAULT_PORT, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_USER,
};
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// ClickHouse connection configuration
    pub clickhouse: ClickHouseConfig,

    /// Connection pool configuration
    pub pool: PoolConfig,
}

/// ClickHouse connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// ClickHouse hostname or IP address
    pub host: String,

    /// ClickHouse HTTP interface port (default: 8123)
    pub port: u16,

    /// Username for authentication
    pub user: String,

    /// Password for authentication
    pub password: String,

    /// Default database
    pub database: String,

    /// Use TLS for the connection
    pub secure: bool,

    /// Verify the TLS certificate
    pub verify: bool,

    /// Path to a CA certificate file
    pub ca_cert: Option<PathBuf>,

    /// Path to a client certificate file
    pub client_cert: Option<PathBuf>,

    /// Path to a client key file
    pub client_key: Option<PathBuf>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Query execution timeout, injected as `max_execution_time`
    pub query_timeout: Duration,

    /// Enable compression on the wire
    pub compression: bool,
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub pool_size: usize,

    /// Idle age after which a connection is recycled
    pub pool_recycle: Duration,
}

// Redact the password; connection coordinates end up in log fields.
impl std::fmt::Debug for ClickHouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("secure", &self.secure)
            .field("verify", &self.verify)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("compression", &self.compression)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// All variables are optional; defaults target a local ClickHouse.
    ///
    /// - `CH_HOST`: ClickHouse hostname (default: localhost)
    /// - `CH_PORT`: HTTP interface port (default: 8123)
    /// - `CH_USER`: Username (default: default)
    /// - `CH_PASSWORD`: Password (default: empty)
    /// - `CH_DATABASE`: Default database (default: default)
    /// - `CH_SECURE`: Use TLS (default: false)
    /// - `CH_VERIFY`: Verify TLS certificate (default: true)
    /// - `CH_CA_CERT`: CA certificate path
    /// - `CH_CLIENT_CERT` / `CH_CLIENT_KEY`: Client certificate pair
    /// - `CH_CONNECT_TIMEOUT`: Connection timeout in seconds (default: 10)
    /// - `CH_QUERY_TIMEOUT`: Query timeout in seconds (default: 60)
    /// - `CH_COMPRESSION`: Enable compression (default: true)
    /// - `CH_POOL_SIZE`: Maximum pool connections (default: 5)
    /// - `CH_POOL_RECYCLE`: Idle seconds before recycling (default: 3600)
    pub fn from_env() -> Result<Self, ServerError> {
        let host = env_var("CH_HOST").unwrap_or_else(|| "localhost".to_string());

        let port = parse_env("CH_PORT")?.unwrap_or(DEFAULT_PORT);

        let user = env_var("CH_USER").unwrap_or_else(|| DEFAULT_USER.to_string());
        let password = env_var("CH_PASSWORD").unwrap_or_default();
        let database = env_var("CH_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let secure = bool_env("CH_SECURE", false);
        let verify = bool_env("CH_VERIFY", true);
        let compression = bool_env("CH_COMPRESSION", true);

        let ca_cert = env_var("CH_CA_CERT").map(PathBuf::from);
        let client_cert = env_var("CH_CLIENT_CERT").map(PathBuf::from);
        let client_key = env_var("CH_CLIENT_KEY").map(PathBuf::from);

        if client_cert.is_some() != client_key.is_some() {
            return Err(ServerError::config(
                "CH_CLIENT_CERT and CH_CLIENT_KEY must be set together",
            ));
        }

        let connect_timeout_secs: u64 =
            parse_env("CH_CONNECT_TIMEOUT")?.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        let query_timeout_secs: u64 =
            parse_env("CH_QUERY_TIMEOUT")?.unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

        let pool_size: usize = parse_env("CH_POOL_SIZE")?.unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(ServerError::config("CH_POOL_SIZE must be at least 1"));
        }
        let pool_recycle_secs: u64 =
            parse_env("CH_POOL_RECYCLE")?.unwrap_or(DEFAULT_POOL_RECYCLE_SECS);

        Ok(Config {
            clickhouse: ClickHouseConfig {
                host,
                port,
                user,
                password,
                database,
                secure,
                verify,
                ca_cert,
                client_cert,
                client_key,
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                query_timeout: Duration::from_secs(query_timeout_secs),
                compression,
            },
            pool: PoolConfig {
                pool_size,
                pool_recycle: Duration::from_secs(pool_recycle_secs),
            },
        })
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            database: DEFAULT_DATABASE.to_string(),
            secure: false,
            verify: true,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            compression: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            pool_recycle: Duration::from_secs(DEFAULT_POOL_RECYCLE_SECS),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1" || v == "yes"
        })
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ServerError> {
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ServerError::config(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.pool_recycle, Duration::from_secs(3600));
    }

    #[test]
    fn test_clickhouse_config_defaults() {
        let config = ClickHouseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8123);
        assert_eq!(config.user, "default");
        assert!(config.verify);
        assert!(config.compression);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ClickHouseConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
