//! Backend-specific exports.
//!
//! Conditional re-exports for each compiled-in provider, kept in one place.

// PostgreSQL exports
#[cfg(feature = "postgres")]
pub use crate::postgres::PgConnection;
#[cfg(feature = "postgres")]
pub use crate::postgres::Params as PostgresParams;
#[cfg(feature = "postgres")]
pub use crate::postgres::build_table_from_rows as postgres_build_table;

// SQLite exports
#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteConnection;
#[cfg(feature = "sqlite")]
pub use crate::sqlite::build_table as sqlite_build_table;

// SQL Server exports
#[cfg(feature = "mssql")]
pub use crate::mssql::MssqlConnection;
#[cfg(feature = "mssql")]
pub use crate::mssql::Params as MssqlParams;
#[cfg(feature = "mssql")]
pub use crate::mssql::collect_tables as mssql_collect_tables;

// MySQL exports
#[cfg(feature = "mysql")]
pub use crate::mysql::MySqlDbConnection;
#[cfg(feature = "mysql")]
pub use crate::mysql::collect_tables as mysql_collect_tables;
