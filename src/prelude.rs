//! Convenient imports for common functionality.
//!
//! Re-exports the types most callers need to run commands and read results.

pub use crate::client::DatabaseClient;
pub use crate::config::DatabaseSetting;
pub use crate::error::DataError;
pub use crate::factory::DatabaseFactory;
pub use crate::parameter::{DbParameter, ParameterDirection};
pub use crate::parameter_cache::DbParameterCache;
pub use crate::profiler::{DbProfiler, ProfilerFactory, TracingProfiler};
pub use crate::provider::{
    ConnectionState, DbCommand, DbConnection, PoolProviderFactory, ProviderFactory,
};
pub use crate::results::{DataReader, DataRow, DataSet, DataTable};
pub use crate::sql_text::{build_exec_text, command_as_sql};
pub use crate::types::{CommandType, DataProvider, DbValue, ExecutingConnectionState};

#[cfg(feature = "postgres")]
pub use crate::exports::{PgConnection, PostgresParams};
#[cfg(feature = "sqlite")]
pub use crate::exports::SqliteConnection;
#[cfg(feature = "mssql")]
pub use crate::exports::{MssqlConnection, MssqlParams};
#[cfg(feature = "mysql")]
pub use crate::exports::MySqlDbConnection;
