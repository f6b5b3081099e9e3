//! ServerHandler implementation for the ClickHouse MCP Server.
//!
//! This module implements the rmcp `ServerHandler` trait which defines how
//! the server responds to MCP protocol requests.

use crate::resources::{build_resource_list, build_resource_templates, read_resource};
use crate::server::ClickHouseMcpServer;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    Implementation, ListResourceTemplatesResult, ListResourcesResult, PaginatedRequestParam,
    ProtocolVersion, ReadResourceRequestParam, ReadResourceResult, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool_handler, ErrorData};
use tracing::info;

/// The `#[tool_handler]` macro wires up tool routing automatically.
/// It generates the `list_tools` and `call_tool` method implementations.
#[tool_handler]
impl ServerHandler for ClickHouseMcpServer {
    /// Server identification - called during initialization handshake.
    fn get_info(&self) -> ServerInfo {
        info!("MCP client requesting server info");

        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,

            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),

            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("ClickHouse MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },

            instructions: Some(build_instructions(self)),

            ..Default::default()
        }
    }

    /// List available resources.
    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult {
            resources: build_resource_list(self),
            ..Default::default()
        })
    }

    /// List resource templates for dynamic resources.
    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, ErrorData> {
        Ok(ListResourceTemplatesResult {
            resource_templates: build_resource_templates(self),
            ..Default::default()
        })
    }

    /// Read a specific resource.
    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        read_resource(self, &request.uri)
            .await
            .map_err(|e| ErrorData::invalid_params(e, None))
    }
}

/// Build server instructions based on current configuration.
fn build_instructions(server: &ClickHouseMcpServer) -> String {
    let mut instructions = String::new();

    instructions.push_str("# ClickHouse MCP Server\n\n");
    instructions.push_str("This server provides access to a ClickHouse analytics database.\n\n");
    instructions.push_str(&format!(
        "**Default database:** `{}`\n\n",
        server.current_database()
    ));

    instructions.push_str("## Available Operations\n\n");
    instructions.push_str("### Resources (read-only metadata)\n");
    instructions.push_str("- `clickhouse://databases` lists databases\n");
    instructions.push_str("- `clickhouse://schema/{database}` lists tables\n");
    instructions.push_str("- `clickhouse://schema/{database}/{table}` shows a table schema\n");
    instructions.push_str("- `clickhouse://data/{database}/{table}/sample` shows sample rows\n\n");

    instructions.push_str("### Tools\n");
    instructions.push_str("- `query` executes SQL with selectable output format\n");
    instructions.push_str("- `insert` bulk-inserts rows\n");
    instructions.push_str("- `list_databases` / `list_tables` / `get_table_schema` browse the catalog\n");
    instructions.push_str("- `create_database` / `create_table` manage schemas\n");
    instructions.push_str("- `health_check` verifies connectivity\n\n");

    instructions.push_str("### Best Practices\n");
    instructions.push_str("1. Explore schemas through resources before writing queries\n");
    instructions.push_str("2. Prefer parameterized queries ({name:Type} placeholders with params)\n");
    instructions.push_str("3. Use LIMIT on exploratory queries against large tables\n");

    instructions
}
