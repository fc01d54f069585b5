// SQL Server backend (tiberius)
//
// - config: ADO connection string -> tiberius config, bb8 manager
// - params: DbValue -> tiberius binding, T-SQL type declarations
// - query: result-set collection and the stored-procedure batch
// - connection: DbConnection implementation

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{MssqlClient, TiberiusManager, build_pool, build_tiberius_config};
pub use connection::MssqlConnection;
pub use params::{Params, sql_type_declaration};
pub use query::{ProcedureBatch, collect_tables, extract_value, procedure_batch};
