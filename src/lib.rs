//! Provider-neutral data access: one factory API over PostgreSQL, SQLite,
//! SQL Server and MySQL.
//!
//! [`DatabaseFactory`] owns a connection and a command and runs text, table
//! or stored-procedure commands with per-call connection management.
//! [`DatabaseClient`] sits on top and adds parameter derivation through the
//! process-wide [`DbParameterCache`], output capture and row mapping.
//! Connections can be wrapped by a [`DbProfiler`] registered with
//! [`ProfilerFactory`].

pub mod client;
pub mod config;
pub mod connection_string;
pub mod error;
pub mod exports;
pub mod factory;
pub mod parameter;
pub mod parameter_cache;
pub mod prelude;
pub mod profiler;
pub mod provider;
pub mod results;
pub mod sql_text;
pub mod statistics;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use client::DatabaseClient;
pub use config::DatabaseSetting;
pub use connection_string::ConnectionStringBuilder;
pub use error::DataError;
pub use factory::DatabaseFactory;
pub use parameter::{DbParameter, ParameterDirection};
pub use parameter_cache::DbParameterCache;
pub use profiler::{DbProfiler, ProfilerFactory};
pub use results::{DataReader, DataRow, DataSet, DataTable};
pub use statistics::ConnectionStatistics;
pub use types::{CommandType, DataProvider, DbValue, ExecutingConnectionState};
