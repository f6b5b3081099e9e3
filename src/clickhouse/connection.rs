//! A single connection to a ClickHouse server.
//!
//! A [`Connection`] owns one backend session and its bookkeeping state: the
//! `in_use` flag the pool relies on for exclusivity and the `last_used`
//! timestamp that drives recycling. The blocking driver calls run on the
//! runtime's blocking worker pool; the async scheduler is never blocked on
//! network I/O.

use crate::clickhouse::driver::{Driver, DriverSession, Query, QueryOutput, Row};
use crate::clickhouse::formats::ResultFormat;
use crate::config::ClickHouseConfig;
use crate::constants::{LOG_QUERY_TRUNCATE_LENGTH, STREAM_CHANNEL_DEPTH};
use crate::error::ServerError;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, error};

/// One physical link to the ClickHouse server.
pub struct Connection {
    options: ClickHouseConfig,
    driver: Arc<dyn Driver>,
    session: Mutex<Option<Box<dyn DriverSession>>>,
    in_use: AtomicBool,
    last_used: Mutex<Option<Instant>>,
}

impl Connection {
    /// Create a connection with no established session. The session
    /// materializes on [`connect`](Self::connect) or lazily on first execute.
    pub fn new(options: ClickHouseConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            options,
            driver,
            session: Mutex::new(None),
            in_use: AtomicBool::new(false),
            last_used: Mutex::new(None),
        }
    }

    /// Whether a backend session is currently established.
    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Whether the connection is currently held by a caller.
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    /// When the last execution attempt completed, if any.
    pub fn last_used(&self) -> Option<Instant> {
        *self.last_used.lock()
    }

    /// Atomically claim the connection. Returns false if already claimed.
    pub(crate) fn claim(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the connection. Idempotent; releasing twice is safe.
    pub(crate) fn release(&self) {
        self.in_use.store(false, Ordering::SeqCst);
    }

    /// Establish the backend session and probe it with `SELECT 1`.
    ///
    /// A failed probe discards the partially-built session before the error
    /// propagates.
    pub async fn connect(&self) -> Result<(), ServerError> {
        let session = self.open_session().await?;
        *self.session.lock() = Some(session);
        *self.last_used.lock() = Some(Instant::now());
        Ok(())
    }

    /// Drop the backend session. Idempotent.
    pub fn disconnect(&self) {
        if self.session.lock().take().is_some() {
            debug!(
                host = %self.options.host,
                port = self.options.port,
                database = %self.options.database,
                "Disconnecting from ClickHouse"
            );
        }
    }

    /// Execute a query, connecting lazily if needed.
    ///
    /// `in_use` is held for the duration and cleared on every exit path;
    /// `last_used` is stamped when the attempt completes, success or failure.
    pub async fn execute(&self, query: Query) -> Result<QueryOutput, ServerError> {
        let session = self.checkout_session().await?;
        let _guard = UseGuard::new(self);

        let started = Instant::now();
        let (session, query, result) = task::spawn_blocking(move || {
            let mut session = session;
            let result = session.execute(&query);
            (session, query, result)
        })
        .await
        .map_err(|e| ServerError::internal(format!("Query task failed: {}", e)))?;

        self.store_session(session);
        match result {
            Ok(output) => {
                debug!(
                    query = %truncate_for_log(&query.text, LOG_QUERY_TRUNCATE_LENGTH),
                    rows = output.rows.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Query executed"
                );
                Ok(output)
            }
            Err(e) => {
                error!(
                    query = %truncate_for_log(&query.text, LOG_QUERY_TRUNCATE_LENGTH),
                    params = ?query.params,
                    error = %e,
                    "Query execution failed"
                );
                Err(e.with_query(query.text))
            }
        }
    }

    /// Execute a query and return the backend-formatted text output.
    ///
    /// Appends `FORMAT <name>` to the query unless the text already contains
    /// a FORMAT keyword (case-insensitive check), so repeated calls never
    /// stack directives.
    pub async fn execute_with_format(
        &self,
        mut query: Query,
        format: ResultFormat,
    ) -> Result<String, ServerError> {
        if !query.text.to_uppercase().contains("FORMAT") {
            query.text = format!("{} FORMAT {}", query.text, format.directive());
        }

        let session = self.checkout_session().await?;
        let _guard = UseGuard::new(self);

        let started = Instant::now();
        let (session, query, result) = task::spawn_blocking(move || {
            let mut session = session;
            let result = session.execute_text(&query);
            (session, query, result)
        })
        .await
        .map_err(|e| ServerError::internal(format!("Query task failed: {}", e)))?;

        self.store_session(session);
        match result {
            Ok(text) => {
                debug!(
                    query = %truncate_for_log(&query.text, LOG_QUERY_TRUNCATE_LENGTH),
                    format = %format,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Formatted query executed"
                );
                Ok(text)
            }
            Err(e) => {
                error!(
                    query = %truncate_for_log(&query.text, LOG_QUERY_TRUNCATE_LENGTH),
                    format = %format,
                    error = %e,
                    "Formatted query execution failed"
                );
                Err(e.with_query(query.text))
            }
        }
    }

    /// Execute a query and stream rows incrementally.
    ///
    /// The returned [`RowStream`] is forward-only and non-restartable.
    /// `in_use`/`last_used` bookkeeping wraps the entire iteration, not each
    /// row; callers holding this connection through a pool guard should keep
    /// the guard alive until the stream is drained or dropped.
    pub async fn execute_iter(self: Arc<Self>, query: Query) -> Result<RowStream, ServerError> {
        let mut session = self.checkout_session().await?;
        let conn = self;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_DEPTH);

        task::spawn_blocking(move || {
            let _guard = UseGuard::new(conn.as_ref());
            match session.execute_iter(&query) {
                Ok(iter) => {
                    for item in iter {
                        let failed = item.is_err();
                        // A closed receiver means the stream was dropped;
                        // stop iterating and hand the session back.
                        if tx.blocking_send(item).is_err() || failed {
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(
                        query = %truncate_for_log(&query.text, LOG_QUERY_TRUNCATE_LENGTH),
                        error = %e,
                        "Streaming query execution failed"
                    );
                    let _ = tx.blocking_send(Err(e.with_query(query.text.clone())));
                }
            }
            conn.store_session(session);
        });

        Ok(RowStream { rx })
    }

    /// Take the session out for a blocking call, connecting lazily if absent.
    async fn checkout_session(&self) -> Result<Box<dyn DriverSession>, ServerError> {
        if let Some(session) = self.session.lock().take() {
            return Ok(session);
        }
        self.open_session().await
    }

    fn store_session(&self, session: Box<dyn DriverSession>) {
        *self.session.lock() = Some(session);
    }

    async fn open_session(&self) -> Result<Box<dyn DriverSession>, ServerError> {
        debug!(
            host = %self.options.host,
            port = self.options.port,
            user = %self.options.user,
            database = %self.options.database,
            secure = self.options.secure,
            "Connecting to ClickHouse"
        );

        let options = self.options.clone();
        let driver = Arc::clone(&self.driver);
        let outcome = task::spawn_blocking(move || -> Result<_, ServerError> {
            let mut session = driver.open(&options)?;
            session.execute(&Query::new("SELECT 1"))?;
            Ok(session)
        })
        .await
        .map_err(|e| ServerError::internal(format!("Connect task failed: {}", e)))?;

        match outcome {
            Ok(session) => {
                debug!(
                    host = %self.options.host,
                    port = self.options.port,
                    database = %self.options.database,
                    "Connected to ClickHouse"
                );
                Ok(session)
            }
            Err(e) => {
                error!(
                    host = %self.options.host,
                    port = self.options.port,
                    database = %self.options.database,
                    error = %e,
                    "Failed to connect to ClickHouse"
                );
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("database", &self.options.database)
            .field("connected", &self.is_connected())
            .field("in_use", &self.is_in_use())
            .finish()
    }
}

/// Marks the connection in use for the span of one execution attempt.
/// Dropping clears the flag and stamps `last_used`, on every exit path.
struct UseGuard<'a> {
    conn: &'a Connection,
}

impl<'a> UseGuard<'a> {
    fn new(conn: &'a Connection) -> Self {
        conn.in_use.store(true, Ordering::SeqCst);
        Self { conn }
    }
}

impl Drop for UseGuard<'_> {
    fn drop(&mut self) {
        *self.conn.last_used.lock() = Some(Instant::now());
        self.conn.in_use.store(false, Ordering::SeqCst);
    }
}

/// A lazy stream of rows from [`Connection::execute_iter`].
pub struct RowStream {
    rx: mpsc::Receiver<Result<Row, ServerError>>,
}

impl RowStream {
    /// Await the next row, or `None` once the result set is exhausted.
    pub async fn next_row(&mut self) -> Option<Result<Row, ServerError>> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for RowStream {
    type Item = Result<Row, ServerError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Truncate a string for logging purposes.
pub(crate) fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i <= max_len)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("{}...", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(
            truncate_for_log("this is a long string", 10),
            "this is a ..."
        );
    }

    #[test]
    fn test_use_guard_clears_flag_and_stamps() {
        struct NeverDriver;
        impl Driver for NeverDriver {
            fn open(
                &self,
                _options: &ClickHouseConfig,
            ) -> Result<Box<dyn DriverSession>, ServerError> {
                Err(ServerError::connection("unreachable in this test"))
            }
        }

        let conn = Connection::new(ClickHouseConfig::default(), Arc::new(NeverDriver));
        assert!(!conn.is_in_use());
        assert!(conn.last_used().is_none());

        {
            let _guard = UseGuard::new(&conn);
            assert!(conn.is_in_use());
        }

        assert!(!conn.is_in_use());
        assert!(conn.last_used().is_some());
    }

    #[test]
    fn test_claim_is_exclusive() {
        struct NeverDriver;
        impl Driver for NeverDriver {
            fn open(
                &self,
                _options: &ClickHouseConfig,
            ) -> Result<Box<dyn DriverSession>, ServerError> {
                Err(ServerError::connection("unreachable in this test"))
            }
        }

        let conn = Connection::new(ClickHouseConfig::default(), Arc::new(NeverDriver));
        assert!(conn.claim());
        assert!(!conn.claim());
        conn.release();
        conn.release(); // double release is a no-op
        assert!(conn.claim());
    }
}
