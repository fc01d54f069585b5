// PostgreSQL backend
//
// - config: connection-string mapping and the bb8 manager
// - params: DbValue -> tokio-postgres binding
// - query: row extraction and function-call SQL
// - connection: DbConnection implementation

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{PgManager, build_pool, pg_config_from_connection_string};
pub use connection::PgConnection;
pub use params::Params;
pub use query::{build_table_from_rows, function_call_sql, postgres_extract_value};
