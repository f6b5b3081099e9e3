//! MCP Resources for ClickHouse metadata and data access.
//!
//! Resources provide passive read-only access rendered as markdown for easy
//! frontend display.
//!
//! ## URI Scheme
//!
//! Resources use the `clickhouse://` URI scheme:
//!
//! - `clickhouse://databases` - List of databases
//! - `clickhouse://schema/{database}` - Tables in a database
//! - `clickhouse://schema/{database}/{table}` - Table schema
//! - `clickhouse://data/{database}/{table}/sample?limit=N` - Sample rows
//! - `clickhouse://data/{database}/{table}/count` - Row count

use crate::clickhouse::{quote_identifier, Query};
use crate::constants::{DEFAULT_SAMPLE_LIMIT, MAX_SAMPLE_LIMIT};
use crate::server::ClickHouseMcpServer;
use rmcp::model::{
    AnnotateAble, RawResource, RawResourceTemplate, ReadResourceResult, Resource,
    ResourceContents, ResourceTemplate,
};
use tracing::{info, warn};

/// Build the list of available static resources.
pub fn build_resource_list(_server: &ClickHouseMcpServer) -> Vec<Resource> {
    vec![create_resource(
        "clickhouse://databases",
        "Databases",
        "List of all databases on the ClickHouse server",
        "text/markdown",
    )]
}

/// Build resource templates for the parameterized resources.
pub fn build_resource_templates(_server: &ClickHouseMcpServer) -> Vec<ResourceTemplate> {
    vec![
        create_resource_template(
            "clickhouse://schema/{database}",
            "Table List",
            "List of tables in a database with engines and sizes",
            "text/markdown",
        ),
        create_resource_template(
            "clickhouse://schema/{database}/{table}",
            "Table Schema",
            "Columns, engine, and CREATE TABLE statement for a table",
            "text/markdown",
        ),
        create_resource_template(
            "clickhouse://data/{database}/{table}/sample",
            "Table Sample Data",
            "A small sample of rows from a table (optional ?limit=N)",
            "text/markdown",
        ),
        create_resource_template(
            "clickhouse://data/{database}/{table}/count",
            "Table Row Count",
            "Total row count of a table",
            "text/markdown",
        ),
    ]
}

/// Read a resource by URI.
pub async fn read_resource(
    server: &ClickHouseMcpServer,
    uri: &str,
) -> Result<ReadResourceResult, String> {
    let parsed = parse_resource_uri(uri)?;

    let content = match parsed {
        ResourceUri::Databases => read_databases(server).await,
        ResourceUri::Tables { database } => read_tables(server, &database).await,
        ResourceUri::TableSchema { database, table } => {
            read_table_schema(server, &database, &table).await
        }
        ResourceUri::Sample {
            database,
            table,
            limit,
        } => read_sample(server, &database, &table, limit).await,
        ResourceUri::Count { database, table } => read_count(server, &database, &table).await,
    };

    Ok(ReadResourceResult {
        contents: vec![ResourceContents::text(content, uri.to_string())],
    })
}

// =========================================================================
// Resource URI Parsing
// =========================================================================

/// Parsed resource URI variants.
#[derive(Debug, PartialEq)]
enum ResourceUri {
    Databases,
    Tables {
        database: String,
    },
    TableSchema {
        database: String,
        table: String,
    },
    Sample {
        database: String,
        table: String,
        limit: usize,
    },
    Count {
        database: String,
        table: String,
    },
}

fn parse_resource_uri(uri: &str) -> Result<ResourceUri, String> {
    let path = uri
        .strip_prefix("clickhouse://")
        .ok_or_else(|| format!("Invalid resource URI '{}': expected clickhouse:// scheme", uri))?;

    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["databases"] => Ok(ResourceUri::Databases),
        ["schema", database] => Ok(ResourceUri::Tables {
            database: (*database).to_string(),
        }),
        ["schema", database, table] => Ok(ResourceUri::TableSchema {
            database: (*database).to_string(),
            table: (*table).to_string(),
        }),
        ["data", database, table, "sample"] => Ok(ResourceUri::Sample {
            database: (*database).to_string(),
            table: (*table).to_string(),
            limit: parse_limit(query)?,
        }),
        ["data", database, table, "count"] => Ok(ResourceUri::Count {
            database: (*database).to_string(),
            table: (*table).to_string(),
        }),
        _ => Err(format!(
            "Invalid resource URI '{}': unknown resource path",
            uri
        )),
    }
}

fn parse_limit(query: Option<&str>) -> Result<usize, String> {
    let Some(query) = query else {
        return Ok(DEFAULT_SAMPLE_LIMIT);
    };

    for pair in query.split('&') {
        if let Some(("limit", value)) = pair.split_once('=') {
            let limit: usize = value
                .parse()
                .map_err(|_| format!("Invalid sample limit: {}", value))?;
            if limit < 1 || limit > MAX_SAMPLE_LIMIT {
                return Err(format!(
                    "Invalid sample limit: {}. Must be between 1 and {}.",
                    limit, MAX_SAMPLE_LIMIT
                ));
            }
            return Ok(limit);
        }
    }

    Ok(DEFAULT_SAMPLE_LIMIT)
}

// =========================================================================
// Renderers
// =========================================================================

async fn read_databases(server: &ClickHouseMcpServer) -> String {
    match server.client.get_databases().await {
        Ok(databases) => {
            let mut content = String::from("# ClickHouse Databases\n\n");
            content.push_str("| Database |\n| -------- |\n");
            for db in &databases {
                content.push_str(&format!("| {} |\n", db));
            }
            info!(count = databases.len(), "Listed databases");
            content
        }
        Err(e) => {
            warn!(error = %e, "Error listing databases");
            format!("Error listing databases: {}", e)
        }
    }
}

async fn read_tables(server: &ClickHouseMcpServer, database: &str) -> String {
    let databases = match server.client.get_databases().await {
        Ok(d) => d,
        Err(e) => return format!("Error listing tables for {}: {}", database, e),
    };
    if !databases.iter().any(|d| d == database) {
        warn!(database = %database, "Database not found");
        return format!("Database '{}' not found", database);
    }

    let tables = match server.client.get_tables(Some(database)).await {
        Ok(t) => t,
        Err(e) => return format!("Error listing tables for {}: {}", database, e),
    };

    let mut content = format!("# Tables in {}\n\n", database);
    content.push_str("| Table | Engine | Rows | Size |\n");
    content.push_str("| ----- | ------ | ---- | ---- |\n");
    for table in &tables {
        match server.client.get_table_schema(table, Some(database)).await {
            Ok(schema) => {
                let size = schema
                    .total_bytes
                    .map(|b| format!("{:.2} MB", b as f64 / 1024.0 / 1024.0))
                    .unwrap_or_else(|| "0 MB".to_string());
                content.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    table,
                    schema.engine,
                    schema.total_rows.unwrap_or(0),
                    size
                ));
            }
            Err(e) => {
                warn!(database = %database, table = %table, error = %e, "Failed to get table schema");
                content.push_str(&format!("| {} | Error: {} | - | - |\n", table, e));
            }
        }
    }
    info!(database = %database, count = tables.len(), "Listed tables");
    content
}

async fn read_table_schema(server: &ClickHouseMcpServer, database: &str, table: &str) -> String {
    let schema = match server.client.get_table_schema(table, Some(database)).await {
        Ok(s) => s,
        Err(e) => return format!("Error getting schema for {}.{}: {}", database, table, e),
    };

    let mut content = format!("# Schema for {}.{}\n\n", database, table);
    content.push_str(&format!("**Engine**: {}\n\n", schema.engine));
    if let Some(rows) = schema.total_rows {
        content.push_str(&format!("**Rows**: {}\n\n", rows));
    }
    if let Some(bytes) = schema.total_bytes {
        content.push_str(&format!(
            "**Size**: {:.2} MB\n\n",
            bytes as f64 / 1024.0 / 1024.0
        ));
    }
    if let Some(comment) = &schema.comment {
        content.push_str(&format!("**Comment**: {}\n\n", comment));
    }

    content.push_str("## Columns\n\n");
    content.push_str("| Name | Type | Default | Comment |\n");
    content.push_str("| ---- | ---- | ------- | ------- |\n");
    for column in &schema.columns {
        let default = match (&column.default_type, &column.default_expression) {
            (Some(kind), Some(expr)) => format!("{} {}", kind, expr),
            _ => String::new(),
        };
        content.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            column.name,
            column.type_name,
            default,
            column.comment.as_deref().unwrap_or("")
        ));
    }

    if !schema.create_table_query.is_empty() {
        content.push_str("\n## Create Table SQL\n\n```sql\n");
        content.push_str(&schema.create_table_query);
        content.push_str("\n```\n");
    }

    info!(database = %database, table = %table, "Got table schema");
    content
}

async fn read_sample(
    server: &ClickHouseMcpServer,
    database: &str,
    table: &str,
    limit: usize,
) -> String {
    // Check the table exists before sampling so the caller gets a clear
    // not-found message instead of a raw backend error.
    let tables = match server.client.get_tables(Some(database)).await {
        Ok(t) => t,
        Err(e) => return format!("Error sampling {}.{}: {}", database, table, e),
    };
    if !tables.iter().any(|t| t == table) {
        warn!(database = %database, table = %table, "Table not found");
        return format!("Table '{}.{}' not found", database, table);
    }

    let sql = format!(
        "SELECT * FROM {}.{} LIMIT {}",
        quote_identifier(database),
        quote_identifier(table),
        limit
    );
    let output = match server.client.execute(Query::new(sql).with_column_types()).await {
        Ok(o) => o,
        Err(e) => return format!("Error sampling {}.{}: {}", database, table, e),
    };

    let columns = output.columns.unwrap_or_default();
    let mut content = format!("# Sample of {}.{} ({} rows)\n\n", database, table, output.rows.len());
    if columns.is_empty() {
        content.push_str("No columns.\n");
        return content;
    }

    let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    content.push_str(&format!("| {} |\n", header.join(" | ")));
    content.push_str(&format!(
        "| {} |\n",
        header
            .iter()
            .map(|h| "-".repeat(h.len().max(3)))
            .collect::<Vec<_>>()
            .join(" | ")
    ));
    for row in &output.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        content.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    info!(database = %database, table = %table, rows = output.rows.len(), "Sampled table");
    content
}

async fn read_count(server: &ClickHouseMcpServer, database: &str, table: &str) -> String {
    let sql = format!("SELECT count() FROM {}.{}", quote_identifier(database), quote_identifier(table));
    match server.client.execute(Query::new(sql)).await {
        Ok(output) => {
            let count = output
                .rows
                .first()
                .and_then(|row| row.first())
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "0".to_string());
            format!("# Row count of {}.{}\n\n**{}** rows\n", database, table, count)
        }
        Err(e) => format!("Error counting {}.{}: {}", database, table, e),
    }
}

// =========================================================================
// Constructors
// =========================================================================

/// Create a static resource definition.
fn create_resource(uri: &str, name: &str, description: &str, mime_type: &str) -> Resource {
    let mut resource = RawResource::new(uri, name);
    resource.description = Some(description.to_string());
    resource.mime_type = Some(mime_type.to_string());
    resource.no_annotation()
}

/// Create a resource template definition.
fn create_resource_template(
    uri_template: &str,
    name: &str,
    description: &str,
    mime_type: &str,
) -> ResourceTemplate {
    RawResourceTemplate {
        uri_template: uri_template.to_string(),
        name: name.to_string(),
        title: None,
        description: Some(description.to_string()),
        mime_type: Some(mime_type.to_string()),
        icons: None,
    }
    .no_annotation()
}
