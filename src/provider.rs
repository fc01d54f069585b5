//! Provider abstraction: connections, commands and the factories that make them.
//!
//! Every backend implements [`DbConnection`]. [`ProviderFactory`] hands out
//! connections; [`PoolProviderFactory`] is the pooled implementation shared by
//! all compiled-in backends, and the profiler wraps any factory.

use async_trait::async_trait;

use crate::error::DataError;
use crate::parameter::DbParameter;
use crate::types::DataProvider;

pub mod command;
pub mod registry;

pub use command::{
    CommandResult, DbCommand, ExecuteMode, PlaceholderStyle, table_direct_sql, validate_identifier,
    with_timeout,
};
pub use registry::{
    PoolBackend, PoolProviderFactory, clear_pool_registry, shared_provider_factory,
};

/// Whether a connection currently holds a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// One logical connection to a data source.
///
/// `execute` writes output, input/output and return values back into
/// `command.parameters` before returning.
#[async_trait]
pub trait DbConnection: Send {
    fn provider(&self) -> DataProvider;

    fn state(&self) -> ConnectionState;

    fn in_transaction(&self) -> bool;

    async fn open(&mut self) -> Result<(), DataError>;

    /// Release the session. An open transaction is rolled back first.
    async fn close(&mut self) -> Result<(), DataError>;

    async fn begin_transaction(&mut self) -> Result<(), DataError>;

    async fn commit(&mut self) -> Result<(), DataError>;

    async fn rollback(&mut self) -> Result<(), DataError>;

    async fn execute(
        &mut self,
        command: &mut DbCommand,
        mode: ExecuteMode,
    ) -> Result<CommandResult, DataError>;

    /// Read a stored procedure's parameter signature from database metadata.
    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<DbParameter>, DataError>;
}

/// Produces connections for one provider and connection string.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    fn provider(&self) -> DataProvider;

    async fn create_connection(&self) -> Result<Box<dyn DbConnection>, DataError>;
}

pub(crate) fn not_open(provider: DataProvider) -> DataError {
    DataError::ConnectionError(format!("{provider} connection is not open"))
}
