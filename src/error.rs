//! Error types for the ClickHouse MCP Server.
//!
//! This module defines semantic error types with ClickHouse exception code
//! mapping, plus the transient/non-transient classification the retry layer
//! relies on.

use rmcp::ErrorData;
use thiserror::Error;

/// Domain-specific errors for the ClickHouse MCP Server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Database not found
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// Table not found
    #[error("Table not found: {database}.{table}")]
    TableNotFound { database: String, table: String },

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Query execution error, carrying the offending query for diagnostics.
    #[error("Query execution error: {message}")]
    Query {
        message: String,
        code: Option<i64>,
        query: Option<String>,
    },

    /// Query timeout
    #[error("Query timeout: operation exceeded {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a table-not-found error.
    pub fn table_not_found(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self::TableNotFound {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Create a query execution error.
    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::Query {
            message: msg.into(),
            code: None,
            query: None,
        }
    }

    /// Create a query execution error with the ClickHouse exception code.
    pub fn query_error_with_code(msg: impl Into<String>, code: i64) -> Self {
        Self::Query {
            message: msg.into(),
            code: Some(code),
            query: None,
        }
    }

    /// Attach the originating query text to a query error.
    pub fn with_query(self, query: impl Into<String>) -> Self {
        match self {
            Self::Query { message, code, .. } => Self::Query {
                message,
                code,
                query: Some(query.into()),
            },
            other => other,
        }
    }

    /// Create a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout {
            timeout_seconds: seconds,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::Query {
                code: Some(code), ..
            } => is_transient_clickhouse_code(*code),
            _ => false,
        }
    }
}

/// Map ClickHouse exception codes to semantic ServerError types.
///
/// Codes are the stable DB::ErrorCodes values reported both in the native
/// protocol and the `X-ClickHouse-Exception-Code` HTTP header.
pub fn from_clickhouse_code(code: i64, message: &str) -> ServerError {
    match code {
        // Authentication
        516 => ServerError::auth(message.to_string()),
        194 => ServerError::auth(format!("Password required: {}", message)),

        // Missing objects
        81 => ServerError::DatabaseNotFound(message.to_string()),
        60 => ServerError::query_error_with_code(format!("Unknown table: {}", message), code),

        // Access control
        497 => ServerError::PermissionDenied(message.to_string()),
        164 => ServerError::PermissionDenied(format!("Read-only mode: {}", message)),

        // Timeouts
        159 => ServerError::timeout(0),

        // Network-level failures surfaced as server exceptions
        209 | 210 => ServerError::connection(message.to_string()),

        // Syntax / semantic query errors
        62 => ServerError::query_error_with_code(format!("Syntax error: {}", message), code),
        47 => ServerError::query_error_with_code(format!("Unknown identifier: {}", message), code),

        // Default: generic query error keeping the code for classification
        _ => ServerError::query_error_with_code(message.to_string(), code),
    }
}

/// Check if a ClickHouse exception code indicates a transient condition.
fn is_transient_clickhouse_code(code: i64) -> bool {
    matches!(
        code,
        159    // TIMEOUT_EXCEEDED
        | 202  // TOO_MANY_SIMULTANEOUS_QUERIES
        | 203  // NO_FREE_CONNECTION
        | 209  // SOCKET_TIMEOUT
        | 210  // NETWORK_ERROR
        | 241  // MEMORY_LIMIT_EXCEEDED
        | 252  // TOO_MANY_PARTS
    )
}

/// Convert ServerError to rmcp's ErrorData for protocol responses.
///
/// Tool handlers generally return error payloads in the tool result instead;
/// this conversion covers protocol-level failures (resource reads, etc.).
impl From<ServerError> for ErrorData {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::Config(msg) => ErrorData::invalid_request(msg, None),
            ServerError::InvalidInput(msg) => ErrorData::invalid_params(msg, None),
            ServerError::DatabaseNotFound(msg) => {
                ErrorData::invalid_params(format!("Database not found: {}", msg), None)
            }
            ServerError::TableNotFound { database, table } => {
                ErrorData::invalid_params(format!("Table not found: {}.{}", database, table), None)
            }
            other => ErrorData::internal_error(other.to_string(), None),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => ServerError::connection("Connection refused"),
            ErrorKind::ConnectionReset => ServerError::connection("Connection reset"),
            ErrorKind::ConnectionAborted => ServerError::connection("Connection aborted"),
            ErrorKind::NotConnected => ServerError::connection("Not connected"),
            ErrorKind::TimedOut => ServerError::timeout(0),
            _ => ServerError::connection_with_source("IO error", e),
        }
    }
}
