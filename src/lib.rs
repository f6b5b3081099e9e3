//! # ClickHouse MCP Server
//!
//! A Model Context Protocol (MCP) server for ClickHouse analytics databases.
//!
//! This crate provides:
//! - **Resources**: Browse database metadata (databases, tables, schemas) and sample data
//! - **Tools**: Execute queries, insert data, and manage schemas
//! - **Connection pooling**: A bounded pool with idle-connection recycling
//! - **Resilience**: Automatic retry with exponential backoff for transient failures
//!
//! ## Architecture
//!
//! The core is the pool/connection/client triad in [`clickhouse`]: a
//! [`clickhouse::Connection`] owns one physical link and offloads the
//! blocking driver calls to the runtime's blocking workers, the
//! [`clickhouse::ConnectionPool`] shares a bounded set of connections across
//! concurrent callers, and [`clickhouse::ClickHouseClient`] wraps pool access
//! with timeout injection and retry. The MCP layer ([`server`], [`tools`],
//! [`resources`], [`handlers`]) maps protocol requests onto client calls.

pub mod clickhouse;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod resources;
pub mod retry;
pub mod server;
pub mod tools;

pub use config::Config;
pub use error::ServerError;
pub use server::ClickHouseMcpServer;
