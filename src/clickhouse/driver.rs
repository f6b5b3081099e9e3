//! The driver seam between the connection layer and the wire protocol.
//!
//! The pool, connection, and client only ever see these traits; the concrete
//! transport lives behind them (see [`crate::clickhouse::http`]). Driver calls
//! block until the round trip completes, so callers offload them to the
//! runtime's blocking worker pool and never invoke them from the async
//! scheduler directly.

use crate::config::ClickHouseConfig;
use crate::error::ServerError;
use serde_json::Value;
use std::collections::BTreeMap;

/// One result row: column values in result-set order.
pub type Row = Vec<Value>;

/// Per-query settings map (`max_execution_time`, etc.).
pub type Settings = BTreeMap<String, Value>;

/// Column metadata as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Query parameters: a named map for server-side binding, or row tuples for
/// bulk inserts.
#[derive(Debug, Clone)]
pub enum Params {
    Named(BTreeMap<String, Value>),
    Rows(Vec<Row>),
}

/// A query plus everything that travels with it to the backend.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub params: Option<Params>,
    pub with_column_types: bool,
    pub query_id: Option<String>,
    pub settings: Settings,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: None,
            with_column_types: false,
            query_id: None,
            settings: Settings::new(),
        }
    }

    /// Bind a named parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        match &mut self.params {
            Some(Params::Named(map)) => {
                map.insert(name.into(), value);
            }
            _ => {
                let mut map = BTreeMap::new();
                map.insert(name.into(), value);
                self.params = Some(Params::Named(map));
            }
        }
        self
    }

    /// Attach bulk-insert row tuples.
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.params = Some(Params::Rows(rows));
        self
    }

    /// Request column metadata alongside the rows.
    pub fn with_column_types(mut self) -> Self {
        self.with_column_types = true;
        self
    }

    /// Tag the query with an id for tracing.
    pub fn with_query_id(mut self, id: impl Into<String>) -> Self {
        self.query_id = Some(id.into());
        self
    }

    /// Set a single backend setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Replace the whole settings map.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}

/// Result of a structured query execution.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    /// Present when the query requested column types.
    pub columns: Option<Vec<ColumnSpec>>,
}

/// Factory for backend sessions.
pub trait Driver: Send + Sync {
    /// Establish a session (network connect, authentication, TLS). Blocking.
    fn open(&self, options: &ClickHouseConfig) -> Result<Box<dyn DriverSession>, ServerError>;
}

/// One authenticated backend session. All calls are blocking round trips.
///
/// Sessions are not safe for overlapped use; exclusivity is enforced above
/// this layer by the connection's `in_use` flag.
pub trait DriverSession: Send {
    /// Execute a query, returning rows and (when requested) column metadata.
    fn execute(&mut self, query: &Query) -> Result<QueryOutput, ServerError>;

    /// Execute a query whose text carries a FORMAT directive and return the
    /// backend-serialized output verbatim.
    fn execute_text(&mut self, query: &Query) -> Result<String, ServerError>;

    /// Execute a query and yield rows incrementally as the backend streams
    /// them. The iterator is forward-only and non-restartable.
    fn execute_iter<'a>(
        &'a mut self,
        query: &Query,
    ) -> Result<Box<dyn Iterator<Item = Result<Row, ServerError>> + Send + 'a>, ServerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_builder() {
        let query = Query::new("SELECT * FROM t WHERE id = {id:UInt64}")
            .with_param("id", json!(7))
            .with_column_types()
            .with_query_id("q-1")
            .with_setting("max_execution_time", json!(30));

        assert!(query.with_column_types);
        assert_eq!(query.query_id.as_deref(), Some("q-1"));
        assert_eq!(query.settings.get("max_execution_time"), Some(&json!(30)));
        match query.params {
            Some(Params::Named(map)) => assert_eq!(map.get("id"), Some(&json!(7))),
            _ => panic!("expected named params"),
        }
    }

    #[test]
    fn test_rows_replace_named_params() {
        let query = Query::new("INSERT INTO t (a) VALUES")
            .with_param("ignored", json!(1))
            .with_rows(vec![vec![json!(1)], vec![json!(2)]]);

        match query.params {
            Some(Params::Rows(rows)) => assert_eq!(rows.len(), 2),
            _ => panic!("expected row params"),
        }
    }
}
