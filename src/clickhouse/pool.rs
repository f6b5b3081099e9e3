//! A bounded pool of ClickHouse connections.
//!
//! Membership mutation (create, recycle, remove, clear) happens under one
//! async mutex; holding a connection is tracked per-member via its `in_use`
//! flag, so concurrency is at connection granularity. When every member is
//! busy and the pool is at capacity, acquisition polls at a fixed interval
//! until a member is released. There is no wait queue and no fairness
//! guarantee among waiters.

use crate::clickhouse::connection::Connection;
use crate::clickhouse::driver::{Driver, Query, QueryOutput};
use crate::clickhouse::formats::ResultFormat;
use crate::config::{ClickHouseConfig, PoolConfig};
use crate::constants::POOL_WAIT_INTERVAL;
use crate::error::ServerError;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

/// A pool of ClickHouse connections, bounded at `pool_size` members.
pub struct ConnectionPool {
    options: ClickHouseConfig,
    pool_size: usize,
    pool_recycle: Duration,
    driver: Arc<dyn Driver>,
    members: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionPool {
    /// Create an empty pool. Members are created lazily as demand requires.
    pub fn new(options: ClickHouseConfig, pool: PoolConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            options,
            pool_size: pool.pool_size.max(1),
            pool_recycle: pool.pool_recycle,
            driver,
            members: Mutex::new(Vec::new()),
        }
    }

    /// Get a connection from the pool.
    ///
    /// Scans for an idle member, recycling any that have sat idle longer
    /// than `pool_recycle`. Creates a new member when none is idle and the
    /// pool is below capacity. When the pool is full and every member is
    /// busy, polls until one is released.
    pub async fn get_connection(&self) -> Result<PooledConnection, ServerError> {
        {
            let mut members = self.members.lock().await;

            let mut idx = 0;
            while idx < members.len() {
                if !members[idx].is_in_use() {
                    if self.is_stale(&members[idx]) {
                        debug!("Recycling idle connection");
                        members[idx].disconnect();
                        members.remove(idx);
                        // Scan resumes at the same index with one fewer member.
                        continue;
                    }
                    if members[idx].claim() {
                        return Ok(PooledConnection::new(Arc::clone(&members[idx])));
                    }
                }
                idx += 1;
            }

            if members.len() < self.pool_size {
                debug!(
                    pool_size = members.len(),
                    max_pool_size = self.pool_size,
                    "Creating new connection"
                );
                let conn = self.create_connection().await?;
                conn.claim();
                members.push(Arc::clone(&conn));
                return Ok(PooledConnection::new(conn));
            }
        }

        // Pool is full and every member is busy: poll until one frees up.
        debug!(
            max_pool_size = self.pool_size,
            "Waiting for a connection to become available"
        );
        loop {
            sleep(POOL_WAIT_INTERVAL).await;
            let members = self.members.lock().await;
            for conn in members.iter() {
                if conn.claim() {
                    return Ok(PooledConnection::new(Arc::clone(conn)));
                }
            }
        }
    }

    /// Execute a query on a pooled connection, releasing it afterwards
    /// regardless of outcome.
    pub async fn execute(&self, query: Query) -> Result<QueryOutput, ServerError> {
        let conn = self.get_connection().await?;
        conn.execute(query).await
    }

    /// Execute a query returning backend-formatted text, releasing the
    /// connection afterwards regardless of outcome.
    pub async fn execute_with_format(
        &self,
        query: Query,
        format: ResultFormat,
    ) -> Result<String, ServerError> {
        let conn = self.get_connection().await?;
        conn.execute_with_format(query, format).await
    }

    /// Disconnect every member and clear the pool.
    ///
    /// Terminal: not meant to run concurrently with acquisitions that expect
    /// reuse afterwards.
    pub async fn close(&self) {
        let mut members = self.members.lock().await;
        for conn in members.iter() {
            conn.disconnect();
        }
        members.clear();
        debug!("Connection pool closed");
    }

    /// Current pool occupancy.
    pub async fn status(&self) -> PoolStatus {
        let members = self.members.lock().await;
        let in_use = members.iter().filter(|c| c.is_in_use()).count();
        PoolStatus {
            total_connections: members.len(),
            in_use_connections: in_use,
            available_connections: members.len() - in_use,
            max_connections: self.pool_size,
        }
    }

    fn is_stale(&self, conn: &Connection) -> bool {
        match conn.last_used() {
            Some(at) => at.elapsed() > self.pool_recycle,
            None => false,
        }
    }

    async fn create_connection(&self) -> Result<Arc<Connection>, ServerError> {
        let conn = Arc::new(Connection::new(
            self.options.clone(),
            Arc::clone(&self.driver),
        ));
        conn.connect().await?;
        Ok(conn)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("host", &self.options.host)
            .field("port", &self.options.port)
            .field("pool_size", &self.pool_size)
            .field("pool_recycle", &self.pool_recycle)
            .finish()
    }
}

/// Pool occupancy information.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Current number of members in the pool.
    pub total_connections: usize,
    /// Members available for checkout.
    pub available_connections: usize,
    /// Members currently held by callers.
    pub in_use_connections: usize,
    /// Maximum allowed members.
    pub max_connections: usize,
}

/// A scoped borrow of a pooled connection.
///
/// Dropping the guard releases the connection back to the pool on every exit
/// path; releasing twice is safe.
pub struct PooledConnection {
    conn: Arc<Connection>,
}

impl PooledConnection {
    fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// The underlying connection, for calls that need the `Arc` itself
    /// (e.g. [`Connection::execute_iter`]).
    pub fn inner(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.conn.release();
    }
}
