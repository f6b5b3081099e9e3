//! MCP Tools for ClickHouse operations.
//!
//! Tools are action-oriented operations that execute queries and manage
//! schemas:
//!
//! - `query`: Execute arbitrary SQL queries with a selectable output format
//! - `insert`: Bulk-insert rows into a table
//! - `list_databases`: List databases on the server
//! - `list_tables`: List tables in a database
//! - `get_table_schema`: Fetch column and table metadata
//! - `create_database`: Create a database
//! - `create_table`: Create a MergeTree-family table
//! - `health_check`: Test connectivity and report pool occupancy

use crate::clickhouse::{quote_identifier, Params, Query, ResultFormat};
use crate::server::ClickHouseMcpServer;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content};
use rmcp::{tool, tool_router, ErrorData};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

// ============================================================================
// Parameter Types
// ============================================================================

/// Parameters for the query tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryToolParams {
    /// SQL query to execute.
    pub sql: String,
    /// Output format (json, jsoncompact, pretty, csv, tsv, parquet, arrow,
    /// native, null). Unknown names fall back to json.
    pub format: Option<String>,
    /// Named parameters for server-side binding ({name:Type} placeholders).
    pub params: Option<Map<String, Value>>,
}

/// Parameters for the insert tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct InsertToolParams {
    /// Table name to insert into.
    pub table: String,
    /// Rows to insert; the first row's keys define the column list.
    pub data: Vec<Map<String, Value>>,
    /// Database name (defaults to the server's default database).
    pub database: Option<String>,
}

/// Parameters for the list_tables tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListTablesParams {
    /// Database name (defaults to the server's default database).
    pub database: Option<String>,
}

/// Parameters for the get_table_schema tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TableSchemaParams {
    /// Table name.
    pub table: String,
    /// Database name (defaults to the server's default database).
    pub database: Option<String>,
}

/// Parameters for the create_database tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateDatabaseParams {
    /// Database name to create.
    pub name: String,
    /// Ignore the error if the database already exists (default: true).
    pub if_not_exists: Option<bool>,
}

/// Definition of a table column.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Column data type, e.g. `UInt64` or `LowCardinality(String)`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// DEFAULT expression for the column.
    pub default_expression: Option<String>,
    /// Column comment.
    pub comment: Option<String>,
}

/// Parameters for the create_table tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateTableParams {
    /// Table name to create.
    pub name: String,
    /// Column definitions; must not be empty.
    pub columns: Vec<ColumnDefinition>,
    /// Table engine, e.g. `MergeTree()`.
    pub engine: String,
    /// ORDER BY clause.
    pub order_by: String,
    /// Database name (defaults to the server's default database).
    pub database: Option<String>,
    /// PARTITION BY clause.
    pub partition_by: Option<String>,
    /// PRIMARY KEY clause.
    pub primary_key: Option<String>,
    /// SAMPLE BY clause.
    pub sample_by: Option<String>,
    /// TTL clause.
    pub ttl: Option<String>,
    /// Table-level SETTINGS.
    pub settings: Option<Map<String, Value>>,
    /// Ignore the error if the table already exists (default: true).
    pub if_not_exists: Option<bool>,
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl ClickHouseMcpServer {
    /// Execute a SQL query and return the results in the requested format.
    #[tool(
        description = "Execute a SQL query on the ClickHouse server. Formats: json (structured rows), jsoncompact (columns + row arrays), pretty, csv, tsv, parquet, arrow, native, null. Unknown formats fall back to json."
    )]
    pub async fn query(
        &self,
        Parameters(params): Parameters<QueryToolParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let format_name = params.format.unwrap_or_else(|| "json".to_string());
        let format = ResultFormat::parse(&format_name).unwrap_or_else(|| {
            warn!(format = %format_name, "Unknown result format, falling back to json");
            ResultFormat::Json
        });

        info!(
            sql = %truncate(&params.sql, 100),
            format = %format,
            has_params = params.params.is_some(),
            "Executing query"
        );

        let mut query = Query::new(&params.sql);
        if let Some(named) = params.params {
            query.params = Some(Params::Named(named.into_iter().collect::<BTreeMap<_, _>>()));
        }

        let (result, rows) = match format {
            ResultFormat::Json => {
                match self.client.execute(query.with_column_types()).await {
                    Ok(output) => {
                        let rows = output.rows.len();
                        // Reshape rows into column-name keyed objects.
                        let columns = output.columns.unwrap_or_default();
                        let objects: Vec<Value> = output
                            .rows
                            .into_iter()
                            .map(|row| {
                                let mut object = Map::new();
                                for (col, value) in columns.iter().zip(row) {
                                    object.insert(col.name.clone(), value);
                                }
                                Value::Object(object)
                            })
                            .collect();
                        (Value::Array(objects), rows)
                    }
                    Err(e) => return Ok(error_result(format!("Query execution failed: {}", e))),
                }
            }
            ResultFormat::JsonCompact => match self.client.execute(query.with_column_types()).await
            {
                Ok(output) => {
                    let rows = output.rows.len();
                    let result = json!({
                        "columns": output.columns.unwrap_or_default(),
                        "rows": output.rows,
                    });
                    (result, rows)
                }
                Err(e) => return Ok(error_result(format!("Query execution failed: {}", e))),
            },
            other => match self.client.execute_with_format(query, other).await {
                Ok(text) => {
                    let rows = text.lines().count();
                    (Value::String(text), rows)
                }
                Err(e) => return Ok(error_result(format!("Query execution failed: {}", e))),
            },
        };

        let duration = started.elapsed().as_secs_f64();
        info!(rows, duration, "Query executed successfully");

        json_result(&json!({
            "result": result,
            "rows": rows,
            "query": params.sql,
            "duration": duration,
            "format": format.directive(),
        }))
    }

    /// Insert rows into a ClickHouse table.
    #[tool(
        description = "Insert rows into a ClickHouse table. Each row is an object; the first row's keys define the column list."
    )]
    pub async fn insert(
        &self,
        Parameters(params): Parameters<InsertToolParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();

        if params.data.is_empty() {
            return Ok(error_result("Data cannot be empty"));
        }

        info!(
            table = %params.table,
            database = params.database.as_deref().unwrap_or(self.client.database()),
            rows = params.data.len(),
            "Inserting data"
        );

        match self
            .client
            .insert_data(&params.table, &params.data, params.database.as_deref(), None)
            .await
        {
            Ok(result) => {
                let duration = started.elapsed().as_secs_f64();
                info!(rows = result.rows_inserted, duration, "Data inserted successfully");
                json_result(&json!({
                    "database": result.database,
                    "table": result.table,
                    "rows_inserted": result.rows_inserted,
                    "duration": duration,
                }))
            }
            Err(e) => Ok(error_result(format!("Data insertion failed: {}", e))),
        }
    }

    /// List all databases on the ClickHouse server.
    #[tool(description = "List all databases on the ClickHouse server.")]
    pub async fn list_databases(&self) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        match self.client.get_databases().await {
            Ok(databases) => json_result(&json!({
                "databases": databases,
                "count": databases.len(),
                "duration": started.elapsed().as_secs_f64(),
            })),
            Err(e) => Ok(error_result(format!("Listing databases failed: {}", e))),
        }
    }

    /// List all tables in a ClickHouse database.
    #[tool(description = "List all tables in a ClickHouse database.")]
    pub async fn list_tables(
        &self,
        Parameters(params): Parameters<ListTablesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let database = params
            .database
            .unwrap_or_else(|| self.client.database().to_string());

        match self.client.get_tables(Some(&database)).await {
            Ok(tables) => json_result(&json!({
                "database": database,
                "tables": tables,
                "count": tables.len(),
                "duration": started.elapsed().as_secs_f64(),
            })),
            Err(e) => Ok(error_result(format!("Listing tables failed: {}", e))),
        }
    }

    /// Get the full schema of a table.
    #[tool(
        description = "Get the schema of a ClickHouse table: columns with types and defaults, engine, row count, size, and the CREATE TABLE statement."
    )]
    pub async fn get_table_schema(
        &self,
        Parameters(params): Parameters<TableSchemaParams>,
    ) -> Result<CallToolResult, ErrorData> {
        match self
            .client
            .get_table_schema(&params.table, params.database.as_deref())
            .await
        {
            Ok(schema) => json_result(&schema),
            Err(e) => Ok(error_result(format!("Getting table schema failed: {}", e))),
        }
    }

    /// Create a new database.
    #[tool(description = "Create a new database in ClickHouse.")]
    pub async fn create_database(
        &self,
        Parameters(params): Parameters<CreateDatabaseParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let if_not_exists = params.if_not_exists.unwrap_or(true);

        info!(name = %params.name, if_not_exists, "Creating database");

        let sql = build_create_database(&params.name, if_not_exists);
        match self.client.execute(Query::new(sql)).await {
            Ok(_) => {
                let duration = started.elapsed().as_secs_f64();
                info!(name = %params.name, duration, "Database created successfully");
                json_result(&json!({
                    "name": params.name,
                    "created": true,
                    "duration": duration,
                }))
            }
            Err(e) => Ok(error_result(format!("Database creation failed: {}", e))),
        }
    }

    /// Create a new table.
    #[tool(
        description = "Create a new table in ClickHouse with the given columns, engine, and ORDER BY clause."
    )]
    pub async fn create_table(
        &self,
        Parameters(params): Parameters<CreateTableParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();

        if params.columns.is_empty() {
            return Ok(error_result("Columns cannot be empty"));
        }

        let database = params
            .database
            .clone()
            .unwrap_or_else(|| self.client.database().to_string());

        info!(
            database = %database,
            name = %params.name,
            columns_count = params.columns.len(),
            engine = %params.engine,
            "Creating table"
        );

        let sql = build_create_table(&database, &params);
        match self.client.execute(Query::new(sql)).await {
            Ok(_) => {
                let duration = started.elapsed().as_secs_f64();
                info!(database = %database, name = %params.name, duration, "Table created successfully");
                json_result(&json!({
                    "database": database,
                    "name": params.name,
                    "created": true,
                    "duration": duration,
                    "columns_count": params.columns.len(),
                    "engine": params.engine,
                }))
            }
            Err(e) => Ok(error_result(format!("Table creation failed: {}", e))),
        }
    }

    /// Test connectivity to the backend.
    #[tool(
        description = "Check ClickHouse connectivity with a trivial query and report connection pool occupancy."
    )]
    pub async fn health_check(&self) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        match self.client.execute(Query::new("SELECT 1")).await {
            Ok(_) => {
                let pool = self.client.pool_status().await;
                json_result(&json!({
                    "status": "healthy",
                    "duration": started.elapsed().as_secs_f64(),
                    "pool": {
                        "total": pool.total_connections,
                        "available": pool.available_connections,
                        "in_use": pool.in_use_connections,
                        "max": pool.max_connections,
                    },
                }))
            }
            Err(e) => json_result(&json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "duration": started.elapsed().as_secs_f64(),
            })),
        }
    }
}

/// Build the tool router for the server.
pub fn create_tool_router() -> ToolRouter<ClickHouseMcpServer> {
    ClickHouseMcpServer::tool_router()
}

// ============================================================================
// Helpers
// ============================================================================

/// Serialize data into a successful tool result.
fn json_result<T: Serialize>(data: &T) -> Result<CallToolResult, ErrorData> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Wrap a failure message into an error tool result.
fn error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

fn build_create_database(name: &str, if_not_exists: bool) -> String {
    format!(
        "CREATE DATABASE {}{}",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_identifier(name)
    )
}

fn build_create_table(database: &str, params: &CreateTableParams) -> String {
    let mut column_defs = Vec::with_capacity(params.columns.len());
    for col in &params.columns {
        let mut def = format!("{} {}", quote_identifier(&col.name), col.type_name);
        if let Some(default) = &col.default_expression {
            def.push_str(&format!(" DEFAULT {}", default));
        }
        if let Some(comment) = &col.comment {
            def.push_str(&format!(" COMMENT '{}'", comment.replace('\'', "\\'")));
        }
        column_defs.push(def);
    }

    let mut sql = format!(
        "CREATE TABLE {}{}.{} (\n",
        if params.if_not_exists.unwrap_or(true) {
            "IF NOT EXISTS "
        } else {
            ""
        },
        quote_identifier(database),
        quote_identifier(&params.name)
    );
    sql.push_str(
        &column_defs
            .iter()
            .map(|def| format!("    {}", def))
            .collect::<Vec<_>>()
            .join(",\n"),
    );
    sql.push_str(&format!("\n) ENGINE = {}", params.engine));

    if let Some(partition_by) = &params.partition_by {
        sql.push_str(&format!("\nPARTITION BY {}", partition_by));
    }

    sql.push_str(&format!("\nORDER BY {}", params.order_by));

    if let Some(primary_key) = &params.primary_key {
        if primary_key != &params.order_by {
            sql.push_str(&format!("\nPRIMARY KEY {}", primary_key));
        }
    }

    if let Some(sample_by) = &params.sample_by {
        sql.push_str(&format!("\nSAMPLE BY {}", sample_by));
    }

    if let Some(ttl) = &params.ttl {
        sql.push_str(&format!("\nTTL {}", ttl));
    }

    if let Some(settings) = &params.settings {
        let rendered: Vec<String> = settings
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{} = '{}'", key, s),
                other => format!("{} = {}", key, other),
            })
            .collect();
        if !rendered.is_empty() {
            sql.push_str(&format!("\nSETTINGS {}", rendered.join(", ")));
        }
    }

    sql
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_create_database() {
        assert_eq!(
            build_create_database("events", true),
            "CREATE DATABASE IF NOT EXISTS `events`"
        );
        assert_eq!(
            build_create_database("events", false),
            "CREATE DATABASE `events`"
        );
    }

    #[test]
    fn test_build_create_table_minimal() {
        let params = CreateTableParams {
            name: "hits".to_string(),
            columns: vec![
                ColumnDefinition {
                    name: "id".to_string(),
                    type_name: "UInt64".to_string(),
                    default_expression: None,
                    comment: None,
                },
                ColumnDefinition {
                    name: "name".to_string(),
                    type_name: "String".to_string(),
                    default_expression: Some("''".to_string()),
                    comment: Some("display name".to_string()),
                },
            ],
            engine: "MergeTree()".to_string(),
            order_by: "id".to_string(),
            database: None,
            partition_by: None,
            primary_key: None,
            sample_by: None,
            ttl: None,
            settings: None,
            if_not_exists: Some(true),
        };

        let sql = build_create_table("web", &params);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `web`.`hits` (\n"));
        assert!(sql.contains("`id` UInt64"));
        assert!(sql.contains("`name` String DEFAULT '' COMMENT 'display name'"));
        assert!(sql.contains(") ENGINE = MergeTree()"));
        assert!(sql.contains("\nORDER BY id"));
    }

    #[test]
    fn test_build_create_table_clauses() {
        let params = CreateTableParams {
            name: "events".to_string(),
            columns: vec![ColumnDefinition {
                name: "ts".to_string(),
                type_name: "DateTime".to_string(),
                default_expression: None,
                comment: None,
            }],
            engine: "MergeTree()".to_string(),
            order_by: "ts".to_string(),
            database: None,
            partition_by: Some("toYYYYMM(ts)".to_string()),
            primary_key: Some("ts".to_string()),
            sample_by: None,
            ttl: Some("ts + INTERVAL 90 DAY".to_string()),
            settings: Some(
                [("index_granularity".to_string(), json!(8192))]
                    .into_iter()
                    .collect(),
            ),
            if_not_exists: None,
        };

        let sql = build_create_table("web", &params);
        assert!(sql.contains("\nPARTITION BY toYYYYMM(ts)"));
        // PRIMARY KEY equal to ORDER BY is omitted
        assert!(!sql.contains("PRIMARY KEY"));
        assert!(sql.contains("\nTTL ts + INTERVAL 90 DAY"));
        assert!(sql.contains("\nSETTINGS index_granularity = 8192"));
    }
}
