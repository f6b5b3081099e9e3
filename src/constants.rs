//! Centralized constants for the ClickHouse MCP Server.
//!
//! This module contains all magic numbers and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Connection Constants
// =============================================================================

/// Default ClickHouse HTTP interface port.
pub const DEFAULT_PORT: u16 = 8123;

/// Default ClickHouse user.
pub const DEFAULT_USER: &str = "default";

/// Default ClickHouse database.
pub const DEFAULT_DATABASE: &str = "default";

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

/// Default connection timeout as Duration.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS);

/// Default query timeout as Duration.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS);

// =============================================================================
// Connection Pool Constants
// =============================================================================

/// Default maximum connections in the pool.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Default idle age in seconds before a connection is recycled.
pub const DEFAULT_POOL_RECYCLE_SECS: u64 = 3600;

/// Sleep interval while waiting for a pooled connection to become idle.
pub const POOL_WAIT_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Retry Constants
// =============================================================================

/// Maximum attempts for transient query failures.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Floor for the exponential backoff delay.
pub const DEFAULT_RETRY_MIN_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the exponential backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

// =============================================================================
// Result Size Constants
// =============================================================================

/// Default row count for table sample resources.
pub const DEFAULT_SAMPLE_LIMIT: usize = 10;

/// Maximum row count for table sample resources.
pub const MAX_SAMPLE_LIMIT: usize = 1000;

// =============================================================================
// Streaming Constants
// =============================================================================

/// Bounded channel depth for streamed row batches.
pub const STREAM_CHANNEL_DEPTH: usize = 64;

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;
