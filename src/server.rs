//! MCP server struct definition and initialization.

use crate::clickhouse::ClickHouseClient;
use crate::config::Config;
use crate::error::ServerError;
use rmcp::handler::server::router::tool::ToolRouter;
use std::sync::Arc;

/// The ClickHouse MCP Server instance.
///
/// This struct is cloned for each request, but the inner state is shared via
/// Arc. The server provides:
///
/// - **Resources**: Database metadata and sample data (markdown)
/// - **Tools**: Query execution, data insertion, schema management
#[derive(Clone)]
pub struct ClickHouseMcpServer {
    /// ClickHouse client owning the connection pool.
    pub(crate) client: Arc<ClickHouseClient>,

    /// Configuration.
    pub(crate) config: Arc<Config>,

    /// Tool router for dispatching tool calls.
    pub(crate) tool_router: ToolRouter<Self>,
}

impl ClickHouseMcpServer {
    /// Create a new server instance with the given configuration.
    ///
    /// The connection pool starts empty and grows on demand, so construction
    /// itself performs no network I/O.
    pub fn new(config: Config) -> Self {
        let client = Arc::new(ClickHouseClient::new(
            config.clickhouse.clone(),
            config.pool.clone(),
        ));
        Self::with_client(config, client)
    }

    /// Create a server around an existing client. Used by tests to inject a
    /// client built on a mock driver.
    pub fn with_client(config: Config, client: Arc<ClickHouseClient>) -> Self {
        Self {
            client,
            config: Arc::new(config),
            tool_router: crate::tools::create_tool_router(),
        }
    }

    /// Create a server from environment variables.
    ///
    /// This is the standard way to create a server for production use.
    pub fn from_env() -> Result<Self, ServerError> {
        let config = Config::from_env()?;
        Ok(Self::new(config))
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the shared ClickHouse client.
    pub fn client(&self) -> &Arc<ClickHouseClient> {
        &self.client
    }

    /// The default database this server is pointed at.
    pub fn current_database(&self) -> &str {
        &self.config.clickhouse.database
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_construction() {
        let server = ClickHouseMcpServer::new(Config {
            clickhouse: Default::default(),
            pool: Default::default(),
        });
        assert_eq!(server.current_database(), "default");
        assert_eq!(server.config().pool.pool_size, 5);
    }
}
