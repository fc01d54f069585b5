use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "mysql")]
use sqlx;
#[cfg(feature = "mssql")]
use tiberius;
#[cfg(feature = "postgres")]
use tokio_postgres;

#[derive(Debug, Error)]
pub enum DataError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MySqlError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Provider {0} is not available in this build")]
    ProviderUnavailable(String),

    #[error("Profiler error: {0}")]
    ProfilerError(String),

    #[error("Mapping error: {0}")]
    MappingError(String),
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::MappingError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DataError {
    fn from(err: tokio::task::JoinError) -> Self {
        DataError::ExecutionError(format!("blocking task join error: {err}"))
    }
}
