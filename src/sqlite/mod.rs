// SQLite backend
//
// rusqlite is synchronous; every call runs on `spawn_blocking` against a
// pooled connection guarded by a mutex.

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{SharedSqliteConnection, SqliteManager, build_pool, sqlite_path};
pub use connection::SqliteConnection;
pub use params::{bind_parameters, db_value_to_sqlite_value};
pub use query::{build_table, sqlite_extract_value_sync};
