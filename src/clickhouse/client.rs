//! The ClickHouse client facade.
//!
//! [`ClickHouseClient`] owns the connection pool and is the single entry
//! point the MCP layer talks to. On top of raw execution it injects the
//! default query timeout, retries transient failures with exponential
//! backoff, and offers catalog convenience operations (database/table
//! listings, table schemas, bulk inserts).

use crate::clickhouse::driver::{Driver, Query, QueryOutput, Row, Settings};
use crate::clickhouse::formats::ResultFormat;
use crate::clickhouse::http::HttpDriver;
use crate::clickhouse::pool::{ConnectionPool, PoolStatus, PooledConnection};
use crate::config::{ClickHouseConfig, PoolConfig};
use crate::error::ServerError;
use crate::retry::{with_retry, RetryConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Schema of a single table column, as reported by `DESCRIBE TABLE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub default_type: Option<String>,
    pub default_expression: Option<String>,
    pub comment: Option<String>,
    pub codec_expression: Option<String>,
    pub ttl_expression: Option<String>,
}

/// Full schema record for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub database: String,
    pub table: String,
    pub engine: String,
    pub create_table_query: String,
    pub total_rows: Option<u64>,
    pub total_bytes: Option<u64>,
    pub comment: Option<String>,
    pub columns: Vec<ColumnSchema>,
}

/// Result of a bulk insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertResult {
    pub database: String,
    pub table: String,
    pub rows_inserted: usize,
}

/// A client for interacting with ClickHouse databases.
pub struct ClickHouseClient {
    options: ClickHouseConfig,
    pool: ConnectionPool,
    retry: RetryConfig,
}

impl ClickHouseClient {
    /// Create a client backed by the HTTP driver.
    pub fn new(options: ClickHouseConfig, pool: PoolConfig) -> Self {
        Self::with_driver(options, pool, Arc::new(HttpDriver::new()))
    }

    /// Create a client with a custom driver. The seam tests use to inject a
    /// scripted backend.
    pub fn with_driver(
        options: ClickHouseConfig,
        pool: PoolConfig,
        driver: Arc<dyn Driver>,
    ) -> Self {
        let pool = ConnectionPool::new(options.clone(), pool, driver);
        Self {
            options,
            pool,
            retry: RetryConfig::queries(),
        }
    }

    /// The client's default database.
    pub fn database(&self) -> &str {
        &self.options.database
    }

    /// Borrow a connection from the pool for direct use. The returned guard
    /// releases it on drop.
    pub async fn connection(&self) -> Result<PooledConnection, ServerError> {
        self.pool.get_connection().await
    }

    /// Current pool occupancy.
    pub async fn pool_status(&self) -> PoolStatus {
        self.pool.status().await
    }

    /// Execute a query through the pool.
    ///
    /// Injects `max_execution_time` from the configured query timeout unless
    /// the caller set it, and retries transient failures (3 attempts,
    /// exponential backoff between 1s and 10s).
    pub async fn execute(&self, query: Query) -> Result<QueryOutput, ServerError> {
        let query = self.apply_timeout(query);
        with_retry(&self.retry, || self.pool.execute(query.clone())).await
    }

    /// Execute a query returning backend-formatted text, with the same
    /// timeout injection and retry policy as [`execute`](Self::execute).
    pub async fn execute_with_format(
        &self,
        query: Query,
        format: ResultFormat,
    ) -> Result<String, ServerError> {
        let query = self.apply_timeout(query);
        with_retry(&self.retry, || {
            self.pool.execute_with_format(query.clone(), format)
        })
        .await
    }

    /// List all databases on the server.
    pub async fn get_databases(&self) -> Result<Vec<String>, ServerError> {
        let output = self.execute(Query::new("SHOW DATABASES")).await?;
        Ok(first_column(&output))
    }

    /// List all tables in a database (defaults to the client's database).
    pub async fn get_tables(&self, database: Option<&str>) -> Result<Vec<String>, ServerError> {
        let db = database.unwrap_or(&self.options.database);
        let output = self
            .execute(Query::new(format!(
                "SHOW TABLES FROM {}",
                quote_identifier(db)
            )))
            .await?;
        Ok(first_column(&output))
    }

    /// Fetch the schema of a table: column descriptions plus engine, DDL,
    /// and size figures from the catalog.
    ///
    /// Returns [`ServerError::TableNotFound`] when the catalog has no row for
    /// the table.
    pub async fn get_table_schema(
        &self,
        table: &str,
        database: Option<&str>,
    ) -> Result<TableSchema, ServerError> {
        let db = database.unwrap_or(&self.options.database);

        let columns_output = self
            .execute(
                Query::new(format!(
                    "DESCRIBE TABLE {}.{}",
                    quote_identifier(db),
                    quote_identifier(table)
                ))
                .with_column_types(),
            )
            .await?;

        let table_output = self
            .execute(
                Query::new(
                    "SELECT engine, create_table_query, total_rows, total_bytes, comment \
                     FROM system.tables \
                     WHERE database = {database:String} AND name = {name:String}",
                )
                .with_param("database", json!(db))
                .with_param("name", json!(table)),
            )
            .await?;

        let info = match table_output.rows.first() {
            Some(row) => row,
            None => return Err(ServerError::table_not_found(db, table)),
        };

        let columns = columns_output
            .rows
            .iter()
            .map(|row| ColumnSchema {
                name: string_at(row, 0),
                type_name: string_at(row, 1),
                default_type: opt_string_at(row, 2),
                default_expression: opt_string_at(row, 3),
                comment: opt_string_at(row, 4),
                codec_expression: opt_string_at(row, 5),
                ttl_expression: opt_string_at(row, 6),
            })
            .collect();

        Ok(TableSchema {
            database: db.to_string(),
            table: table.to_string(),
            engine: string_at(info, 0),
            create_table_query: string_at(info, 1),
            total_rows: u64_at(info, 2),
            total_bytes: u64_at(info, 3),
            comment: opt_string_at(info, 4),
            columns,
        })
    }

    /// Bulk-insert rows into a table.
    ///
    /// An empty payload is a successful zero-row no-op. The column list comes
    /// from the first row's keys in insertion order; later rows missing a key
    /// insert NULL for it, and keys absent from the first row are dropped.
    pub async fn insert_data(
        &self,
        table: &str,
        data: &[Map<String, Value>],
        database: Option<&str>,
        settings: Option<Settings>,
    ) -> Result<InsertResult, ServerError> {
        let db = database.unwrap_or(&self.options.database);

        if data.is_empty() {
            return Ok(InsertResult {
                database: db.to_string(),
                table: table.to_string(),
                rows_inserted: 0,
            });
        }

        let columns: Vec<String> = data[0].keys().cloned().collect();
        let rows: Vec<Row> = data
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        let mut query = Query::new(build_insert_statement(db, table, &columns)).with_rows(rows);
        if let Some(settings) = settings {
            query = query.with_settings(settings);
        }
        let query = self.apply_timeout(query);

        debug!(
            database = %db,
            table = %table,
            rows = data.len(),
            "Inserting data"
        );

        let conn = self.connection().await?;
        conn.execute(query).await?;

        Ok(InsertResult {
            database: db.to_string(),
            table: table.to_string(),
            rows_inserted: data.len(),
        })
    }

    /// Close the pool. Terminal.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn apply_timeout(&self, query: Query) -> Query {
        if query.settings.contains_key("max_execution_time") {
            query
        } else {
            query.with_setting(
                "max_execution_time",
                json!(self.options.query_timeout.as_secs()),
            )
        }
    }
}

impl std::fmt::Debug for ClickHouseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseClient")
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("database", &self.options.database)
            .finish()
    }
}

/// Build the parameterized bulk-insert statement head.
fn build_insert_statement(database: &str, table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {}.{} ({}) VALUES",
        quote_identifier(database),
        quote_identifier(table),
        column_list
    )
}

/// Quote an identifier with backticks, escaping embedded backticks and
/// backslashes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

fn first_column(output: &QueryOutput) -> Vec<String> {
    output
        .rows
        .iter()
        .filter_map(|row| row.first())
        .map(value_to_string)
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_at(row: &Row, idx: usize) -> String {
    row.get(idx).map(value_to_string).unwrap_or_default()
}

fn opt_string_at(row: &Row, idx: usize) -> Option<String> {
    match row.get(idx) {
        None | Some(Value::Null) => None,
        Some(value) => {
            let s = value_to_string(value);
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
    }
}

/// Read a u64 cell. JSONCompact quotes 64-bit integers by default, so both
/// numeric and string encodings are accepted.
fn u64_at(row: &Row, idx: usize) -> Option<u64> {
    match row.get(idx) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}
