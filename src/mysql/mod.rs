// MySQL backend (sqlx)
//
// sqlx brings its own pool, so there is no bb8 manager here.

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{build_pool, mysql_options};
pub use connection::MySqlDbConnection;
pub use params::{MySqlCall, bind_value, call_statements};
pub use query::{collect_tables, mysql_extract_value};
