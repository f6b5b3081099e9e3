//! ClickHouse MCP Server entry point.
//!
//! This binary starts the MCP server using stdio transport for integration
//! with Claude Desktop, Cursor, and other MCP clients. The connection pool
//! is closed on the way out, whether the service ends or a shutdown signal
//! arrives.

use anyhow::Result;
use clickhouse_mcp_server::{ClickHouseMcpServer, Config};
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr (stdout is reserved for JSON-RPC)
    init_logging();

    let version = env!("CARGO_PKG_VERSION");
    eprintln!("ClickHouse MCP Server v{version} starting...");
    eprintln!("Transport: stdio");

    // Load configuration from environment
    let config = Config::from_env()?;
    eprintln!(
        "Target: {}:{} database '{}'",
        config.clickhouse.host, config.clickhouse.port, config.clickhouse.database
    );

    // Create the MCP server
    let server = ClickHouseMcpServer::new(config);
    let client = server.client().clone();
    eprintln!("Server initialized. Ready to accept requests...");

    // Start serving on stdio transport
    let service = server.serve(rmcp::transport::stdio()).await?;

    tokio::select! {
        quit_reason = service.waiting() => {
            match quit_reason {
                Ok(reason) => eprintln!("Service stopped: {reason:?}"),
                Err(e) => eprintln!("Service error: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Shutdown signal received");
        }
    }

    eprintln!("Closing connection pool...");
    client.close().await;
    eprintln!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing subscriber with stderr output.
///
/// Logs MUST go to stderr because stdout is used for JSON-RPC communication.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,clickhouse_mcp_server=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
