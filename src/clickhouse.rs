//! ClickHouse connectivity and query execution.
//!
//! The module is layered bottom-up: the [`driver`] traits pin the opaque
//! wire-protocol boundary, [`Connection`] owns one physical link,
//! [`ConnectionPool`] shares a bounded set of connections across concurrent
//! callers, and [`ClickHouseClient`] is the retrying facade everything else
//! talks to.

mod client;
mod connection;
mod formats;
mod pool;

pub mod driver;
pub mod http;

pub use client::{ClickHouseClient, ColumnSchema, InsertResult, TableSchema};
pub(crate) use client::quote_identifier;
pub use connection::{Connection, RowStream};
pub use driver::{ColumnSpec, Driver, DriverSession, Params, Query, QueryOutput, Row, Settings};
pub use formats::ResultFormat;
pub use http::HttpDriver;
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
