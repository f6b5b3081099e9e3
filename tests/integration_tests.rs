//! Integration tests for the pool/connection/client core and the tool layer.
//!
//! The driver seam makes the backend injectable, so these tests run against a
//! scripted in-process driver instead of a live ClickHouse server. Each mock
//! session records what it executed; responders script the results per query.

use clickhouse_mcp_server::clickhouse::{
    ClickHouseClient, ColumnSpec, ConnectionPool, Driver, DriverSession, Params, Query,
    QueryOutput, ResultFormat, Row,
};
use clickhouse_mcp_server::config::{ClickHouseConfig, PoolConfig};
use clickhouse_mcp_server::error::ServerError;
use clickhouse_mcp_server::{ClickHouseMcpServer, Config};
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

// =========================================================================
// Mock driver
// =========================================================================

type Responder = dyn Fn(&Query) -> Result<QueryOutput, ServerError> + Send + Sync;

/// Shared observation state for a mock driver and all its sessions.
#[derive(Default)]
struct MockState {
    /// Sessions opened (each open runs the `SELECT 1` probe).
    opens: AtomicUsize,
    /// Sessions dropped (pool recycling and close paths).
    closes: AtomicUsize,
    /// Every query text executed, probes included, in order.
    executed: Mutex<Vec<String>>,
    /// Row params captured from bulk inserts.
    inserted_rows: Mutex<Vec<Vec<Row>>>,
}

impl MockState {
    fn executed_matching(&self, needle: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.contains(needle))
            .count()
    }

    fn last_executed(&self) -> Option<String> {
        self.executed.lock().unwrap().last().cloned()
    }
}

struct MockDriver {
    state: Arc<MockState>,
    responder: Arc<Responder>,
}

impl MockDriver {
    /// Driver whose queries all succeed with an empty result.
    fn new() -> Self {
        Self::with_responder(|_| Ok(QueryOutput::default()))
    }

    fn with_responder(
        responder: impl Fn(&Query) -> Result<QueryOutput, ServerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(MockState::default()),
            responder: Arc::new(responder),
        }
    }

    fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Driver for MockDriver {
    fn open(&self, _options: &ClickHouseConfig) -> Result<Box<dyn DriverSession>, ServerError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            responder: Arc::clone(&self.responder),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
    responder: Arc<Responder>,
}

impl DriverSession for MockSession {
    fn execute(&mut self, query: &Query) -> Result<QueryOutput, ServerError> {
        self.state
            .executed
            .lock()
            .unwrap()
            .push(query.text.clone());
        if let Some(Params::Rows(rows)) = &query.params {
            self.state.inserted_rows.lock().unwrap().push(rows.clone());
        }
        (self.responder)(query)
    }

    fn execute_text(&mut self, query: &Query) -> Result<String, ServerError> {
        self.state
            .executed
            .lock()
            .unwrap()
            .push(query.text.clone());
        // Echo the final query text so tests can inspect directive injection.
        Ok(query.text.clone())
    }

    fn execute_iter<'a>(
        &'a mut self,
        query: &Query,
    ) -> Result<Box<dyn Iterator<Item = Result<Row, ServerError>> + Send + 'a>, ServerError> {
        self.state
            .executed
            .lock()
            .unwrap()
            .push(query.text.clone());
        let rows = (self.responder)(query)?.rows;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn pool_config(pool_size: usize, pool_recycle: Duration) -> PoolConfig {
    PoolConfig {
        pool_size,
        pool_recycle,
    }
}

fn make_pool(pool_size: usize, pool_recycle: Duration, driver: MockDriver) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::new(
        ClickHouseConfig::default(),
        pool_config(pool_size, pool_recycle),
        Arc::new(driver),
    ))
}

fn make_client(driver: MockDriver) -> ClickHouseClient {
    ClickHouseClient::with_driver(
        ClickHouseConfig::default(),
        PoolConfig::default(),
        Arc::new(driver),
    )
}

fn make_server(driver: MockDriver) -> ClickHouseMcpServer {
    let config = Config {
        clickhouse: ClickHouseConfig::default(),
        pool: PoolConfig::default(),
    };
    let client = Arc::new(ClickHouseClient::with_driver(
        config.clickhouse.clone(),
        config.pool.clone(),
        Arc::new(driver),
    ));
    ClickHouseMcpServer::with_client(config, client)
}

fn tool_json(result: &CallToolResult) -> Value {
    let content = serde_json::to_value(&result.content).unwrap();
    let text = content[0]["text"].as_str().expect("text content");
    serde_json::from_str(text).unwrap()
}

/// A responder that serves rows for `SELECT 1` and nothing else.
fn select_one_responder(query: &Query) -> Result<QueryOutput, ServerError> {
    if query.text.starts_with("SELECT 1") {
        Ok(QueryOutput {
            rows: vec![vec![json!(1)]],
            columns: query.with_column_types.then(|| {
                vec![ColumnSpec {
                    name: "1".to_string(),
                    type_name: "UInt8".to_string(),
                }]
            }),
        })
    } else {
        Ok(QueryOutput::default())
    }
}

// =========================================================================
// P1: mutual exclusion
// =========================================================================

#[tokio::test]
async fn concurrent_acquisitions_never_share_a_connection() {
    let pool = make_pool(4, Duration::from_secs(3600), MockDriver::new());
    let active: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = Arc::clone(&pool);
        let active = Arc::clone(&active);
        handles.push(tokio::spawn(async move {
            let conn = pool.get_connection().await.unwrap();
            let key = Arc::as_ptr(conn.inner()) as usize;
            {
                let mut held = active.lock().unwrap();
                // A second holder of the same connection would re-insert the
                // same pointer while it is still in the set.
                assert!(held.insert(key), "connection handed to two callers");
            }
            sleep(Duration::from_millis(20)).await;
            active.lock().unwrap().remove(&key);
            drop(conn);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let status = pool.status().await;
    assert!(status.total_connections <= 4);
    assert_eq!(status.in_use_connections, 0);
}

// =========================================================================
// P2 + E2E scenario A: capacity bound, blocked third acquisition
// =========================================================================

#[tokio::test]
async fn pool_capacity_bounds_members_and_blocks_excess_acquisition() {
    let driver = MockDriver::new();
    let state = driver.state();
    let pool = make_pool(2, Duration::from_secs(3600), driver);

    let first = pool.get_connection().await.unwrap();
    let second = pool.get_connection().await.unwrap();
    assert_eq!(state.opens.load(Ordering::SeqCst), 2);

    // Third concurrent acquisition must poll, not create a member.
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.get_connection().await.unwrap() })
    };

    sleep(Duration::from_millis(250)).await;
    assert!(!waiter.is_finished(), "third acquisition returned early");
    assert_eq!(state.opens.load(Ordering::SeqCst), 2);

    drop(first);
    let third = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("third acquisition did not unblock after release")
        .unwrap();

    // The released member was reused, not replaced.
    assert_eq!(state.opens.load(Ordering::SeqCst), 2);
    drop(second);
    drop(third);
}

// =========================================================================
// P3 + E2E scenario B: recycling
// =========================================================================

#[tokio::test]
async fn idle_connection_past_recycle_age_is_replaced() {
    let driver = MockDriver::with_responder(select_one_responder);
    let state = driver.state();
    let pool = make_pool(2, Duration::from_millis(200), driver);

    pool.execute(Query::new("SELECT 1")).await.unwrap();
    assert_eq!(state.opens.load(Ordering::SeqCst), 1);

    // Let the member sit idle past the recycle threshold.
    sleep(Duration::from_millis(450)).await;

    let conn = pool.get_connection().await.unwrap();
    drop(conn);

    // The stale member was disconnected and a fresh one created.
    assert_eq!(state.opens.load(Ordering::SeqCst), 2);
    assert_eq!(state.closes.load(Ordering::SeqCst), 1);
    let status = pool.status().await;
    assert_eq!(status.total_connections, 1);
}

// =========================================================================
// P4: release on all paths
// =========================================================================

#[tokio::test]
async fn failed_execution_still_releases_the_connection() {
    let driver = MockDriver::with_responder(|query| {
        if query.text.contains("boom") {
            Err(ServerError::query_error("deliberate failure"))
        } else {
            Ok(QueryOutput::default())
        }
    });
    let state = driver.state();
    let pool = make_pool(1, Duration::from_secs(3600), driver);

    let result = pool.execute(Query::new("SELECT boom")).await;
    assert!(result.is_err());

    // The sole member must be reusable immediately; a leaked in_use flag
    // would park this acquisition in the busy-poll loop forever.
    let conn = timeout(Duration::from_secs(1), pool.get_connection())
        .await
        .expect("connection was not released after a failed execution")
        .unwrap();
    assert!(conn.is_in_use());
    drop(conn);

    assert_eq!(state.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_execution_surfaces_query_context() {
    let driver = MockDriver::with_responder(|query| {
        if query.text.contains("boom") {
            Err(ServerError::query_error("deliberate failure"))
        } else {
            Ok(QueryOutput::default())
        }
    });
    let pool = make_pool(1, Duration::from_secs(3600), driver);

    match pool.execute(Query::new("SELECT boom")).await {
        Err(ServerError::Query { query, .. }) => {
            assert_eq!(query.as_deref(), Some("SELECT boom"));
        }
        other => panic!("expected query error, got {:?}", other.map(|_| ())),
    }
}

// =========================================================================
// P5: retry bounds
// =========================================================================

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_exactly_three_times() {
    let driver = MockDriver::with_responder(|query| {
        if query.text.contains("flaky") {
            Err(ServerError::connection("backend hiccup"))
        } else {
            Ok(QueryOutput::default())
        }
    });
    let state = driver.state();
    let client = make_client(driver);

    let result = client.execute(Query::new("SELECT flaky")).await;
    assert!(result.is_err());
    assert_eq!(state.executed_matching("flaky"), 3);
}

#[tokio::test]
async fn non_transient_failures_are_not_retried() {
    let driver = MockDriver::with_responder(|query| {
        if query.text.contains("bad syntax") {
            Err(ServerError::query_error_with_code("syntax error", 62))
        } else {
            Ok(QueryOutput::default())
        }
    });
    let state = driver.state();
    let client = make_client(driver);

    let result = client.execute(Query::new("SELECT bad syntax")).await;
    assert!(result.is_err());
    assert_eq!(state.executed_matching("bad syntax"), 1);
}

// =========================================================================
// Timeout injection
// =========================================================================

#[tokio::test]
async fn query_timeout_is_injected_unless_caller_overrides() {
    let seen: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_responder = Arc::clone(&seen);
    let driver = MockDriver::with_responder(move |query| {
        seen_in_responder
            .lock()
            .unwrap()
            .push(query.settings.get("max_execution_time").cloned());
        Ok(QueryOutput::default())
    });
    let client = make_client(driver);

    client.execute(Query::new("SELECT a")).await.unwrap();
    client
        .execute(Query::new("SELECT b").with_setting("max_execution_time", json!(5)))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    // First entry is the connect probe, which carries no settings.
    assert_eq!(seen[0], None);
    // Default injected from config (60s), then the caller's override.
    assert_eq!(seen[1], Some(json!(60)));
    assert_eq!(seen[2], Some(json!(5)));
}

// =========================================================================
// P6: insert column derivation
// =========================================================================

#[tokio::test]
async fn insert_derives_columns_from_first_row() {
    let driver = MockDriver::new();
    let state = driver.state();
    let client = make_client(driver);

    let data = vec![
        serde_json::from_value(json!({"a": 1, "b": 2})).unwrap(),
        serde_json::from_value(json!({"a": 3})).unwrap(),
    ];
    let result = client.insert_data("events", &data, None, None).await.unwrap();
    assert_eq!(result.rows_inserted, 2);

    assert_eq!(
        state.last_executed().as_deref(),
        Some("INSERT INTO `default`.`events` (`a`, `b`) VALUES")
    );
    let captured = state.inserted_rows.lock().unwrap();
    assert_eq!(
        *captured,
        vec![vec![
            vec![json!(1), json!(2)],
            vec![json!(3), Value::Null],
        ]]
    );
}

#[tokio::test]
async fn insert_drops_keys_absent_from_first_row() {
    let driver = MockDriver::new();
    let state = driver.state();
    let client = make_client(driver);

    let data = vec![
        serde_json::from_value(json!({"a": 1})).unwrap(),
        serde_json::from_value(json!({"a": 2, "extra": "dropped"})).unwrap(),
    ];
    client.insert_data("events", &data, None, None).await.unwrap();

    let captured = state.inserted_rows.lock().unwrap();
    assert_eq!(*captured, vec![vec![vec![json!(1)], vec![json!(2)]]]);
}

#[tokio::test]
async fn empty_insert_is_a_no_op() {
    let driver = MockDriver::new();
    let state = driver.state();
    let client = make_client(driver);

    let result = client.insert_data("events", &[], None, None).await.unwrap();
    assert_eq!(result.rows_inserted, 0);

    // No connection was opened and nothing was executed.
    assert_eq!(state.opens.load(Ordering::SeqCst), 0);
    assert!(state.executed.lock().unwrap().is_empty());
}

// =========================================================================
// P7: format fallback
// =========================================================================

#[tokio::test]
async fn unknown_format_falls_back_to_structured_json() {
    let bogus_server = make_server(MockDriver::with_responder(select_one_responder));
    let json_server = make_server(MockDriver::with_responder(select_one_responder));

    let bogus = bogus_server
        .query(Parameters(clickhouse_mcp_server::tools::QueryToolParams {
            sql: "SELECT 1".to_string(),
            format: Some("bogus".to_string()),
            params: None,
        }))
        .await
        .unwrap();
    let plain = json_server
        .query(Parameters(clickhouse_mcp_server::tools::QueryToolParams {
            sql: "SELECT 1".to_string(),
            format: Some("json".to_string()),
            params: None,
        }))
        .await
        .unwrap();

    let bogus = tool_json(&bogus);
    let plain = tool_json(&plain);
    assert_eq!(bogus["result"], plain["result"]);
    assert_eq!(bogus["result"], json!([{"1": 1}]));
    assert_eq!(bogus["format"], plain["format"]);
}

// =========================================================================
// P8: schema not-found
// =========================================================================

#[tokio::test]
async fn schema_lookup_for_missing_table_is_not_found() {
    let driver = MockDriver::with_responder(|query| {
        if query.text.starts_with("DESCRIBE TABLE") {
            // Existence is decided by the catalog row, not DESCRIBE.
            Ok(QueryOutput {
                rows: vec![],
                columns: Some(vec![]),
            })
        } else {
            Ok(QueryOutput::default())
        }
    });
    let client = make_client(driver);

    let result = client.get_table_schema("no_such_table", None).await;
    match result {
        Err(ServerError::TableNotFound { database, table }) => {
            assert_eq!(database, "default");
            assert_eq!(table, "no_such_table");
        }
        other => panic!("expected TableNotFound, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn schema_lookup_assembles_columns_and_catalog_row() {
    let driver = MockDriver::with_responder(|query| {
        if query.text.starts_with("DESCRIBE TABLE") {
            Ok(QueryOutput {
                rows: vec![
                    vec![
                        json!("id"),
                        json!("UInt64"),
                        json!(""),
                        json!(""),
                        json!(""),
                        json!(""),
                        json!(""),
                    ],
                    vec![
                        json!("name"),
                        json!("String"),
                        json!("DEFAULT"),
                        json!("''"),
                        json!("display name"),
                        json!(""),
                        json!(""),
                    ],
                ],
                columns: Some(vec![]),
            })
        } else if query.text.contains("system.tables") {
            Ok(QueryOutput {
                rows: vec![vec![
                    json!("MergeTree"),
                    json!("CREATE TABLE default.events (...)"),
                    json!("12345"),
                    json!(67890),
                    json!(""),
                ]],
                columns: None,
            })
        } else {
            Ok(QueryOutput::default())
        }
    });
    let client = make_client(driver);

    let schema = client.get_table_schema("events", None).await.unwrap();
    assert_eq!(schema.database, "default");
    assert_eq!(schema.engine, "MergeTree");
    assert_eq!(schema.total_rows, Some(12345));
    assert_eq!(schema.total_bytes, Some(67890));
    assert_eq!(schema.columns.len(), 2);
    assert_eq!(schema.columns[0].name, "id");
    assert_eq!(schema.columns[1].default_type.as_deref(), Some("DEFAULT"));
    assert_eq!(
        schema.columns[1].comment.as_deref(),
        Some("display name")
    );
}

// =========================================================================
// E2E scenario C: idempotent FORMAT directive injection
// =========================================================================

#[tokio::test]
async fn format_directive_is_appended_exactly_once() {
    let driver = MockDriver::new();
    let client = make_client(driver);

    for _ in 0..2 {
        let text = client
            .execute_with_format(Query::new("SELECT 1"), ResultFormat::Pretty)
            .await
            .unwrap();
        assert_eq!(text, "SELECT 1 FORMAT Pretty");
        assert_eq!(text.matches("FORMAT").count(), 1);
    }
}

#[tokio::test]
async fn existing_format_directive_is_preserved() {
    let driver = MockDriver::new();
    let client = make_client(driver);

    let text = client
        .execute_with_format(Query::new("SELECT 1 FORMAT CSV"), ResultFormat::Pretty)
        .await
        .unwrap();
    assert_eq!(text, "SELECT 1 FORMAT CSV");
}

// =========================================================================
// Streaming
// =========================================================================

#[tokio::test]
async fn execute_iter_streams_rows_and_keeps_bookkeeping() {
    let driver = MockDriver::with_responder(|query| {
        if query.text.contains("numbers") {
            Ok(QueryOutput {
                rows: (0..5).map(|n| vec![json!(n)]).collect(),
                columns: None,
            })
        } else {
            Ok(QueryOutput::default())
        }
    });
    let client = make_client(driver);

    let guard = client.connection().await.unwrap();
    let conn = guard.inner().clone();
    let mut stream = conn
        .execute_iter(Query::new("SELECT number FROM system.numbers LIMIT 5"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(row) = stream.next_row().await {
        seen.push(row.unwrap());
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[4], vec![json!(4)]);

    // Bookkeeping wrapped the whole iteration: the flag is clear and the
    // timestamp stamped once the stream is exhausted.
    assert!(!guard.is_in_use());
    assert!(guard.last_used().is_some());
}

// =========================================================================
// Catalog listings
// =========================================================================

#[tokio::test]
async fn database_and_table_listings_read_first_column() {
    let driver = MockDriver::with_responder(|query| {
        if query.text == "SHOW DATABASES" {
            Ok(QueryOutput {
                rows: vec![vec![json!("default")], vec![json!("system")]],
                columns: None,
            })
        } else if query.text.starts_with("SHOW TABLES FROM") {
            Ok(QueryOutput {
                rows: vec![vec![json!("events")]],
                columns: None,
            })
        } else {
            Ok(QueryOutput::default())
        }
    });
    let client = make_client(driver);

    assert_eq!(client.get_databases().await.unwrap(), ["default", "system"]);
    assert_eq!(client.get_tables(Some("default")).await.unwrap(), ["events"]);
}

#[tokio::test]
async fn pool_close_disconnects_all_members() {
    let driver = MockDriver::new();
    let state = driver.state();
    let pool = make_pool(2, Duration::from_secs(3600), driver);

    let a = pool.get_connection().await.unwrap();
    let b = pool.get_connection().await.unwrap();
    drop(a);
    drop(b);
    assert_eq!(state.opens.load(Ordering::SeqCst), 2);

    pool.close().await;
    assert_eq!(state.closes.load(Ordering::SeqCst), 2);
    let status = pool.status().await;
    assert_eq!(status.total_connections, 0);
}
