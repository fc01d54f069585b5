//! `DatabaseFactory`: one connection and one command against a provider.
//!
//! Every `execute_*` call sets the command text and type, opens the
//! connection if needed, runs the command and then, whether it succeeded or
//! not:
//! 1. copies the parameters into the output command when requested,
//! 2. clears the command's parameters,
//! 3. closes the connection for [`ExecutingConnectionState::CloseOnExit`]
//!    unless a transaction is open.
//!
//! A failed command is logged and the factory's connection released before
//! the error is returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::DatabaseSetting;
use crate::connection_string::ConnectionStringBuilder;
use crate::error::DataError;
use crate::parameter::DbParameter;
use crate::profiler::{ProfilerFactory, ProfilerProviderFactory, TracingProfiler};
use crate::provider::{
    CommandResult, ConnectionState, DbCommand, DbConnection, ExecuteMode, ProviderFactory,
    shared_provider_factory,
};
use crate::results::{DataReader, DataSet, DataTable};
use crate::statistics::ConnectionStatistics;
use crate::types::{CommandType, DataProvider, DbValue, ExecutingConnectionState};

pub struct DatabaseFactory {
    connection_string: String,
    provider: DataProvider,
    provider_factory: Arc<dyn ProviderFactory>,
    connection: Option<Box<dyn DbConnection>>,
    command: DbCommand,
    output_command: DbCommand,
    is_output_parameter: bool,
    statistics: Option<ConnectionStatistics>,
}

impl std::fmt::Debug for DatabaseFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseFactory")
            .field("provider", &self.provider)
            .field("connected", &self.connection.is_some())
            .field("command", &self.command)
            .field("is_output_parameter", &self.is_output_parameter)
            .finish_non_exhaustive()
    }
}

impl DatabaseFactory {
    /// Factory over the process-wide pool for `(provider, connection_string)`.
    ///
    /// The command timeout comes from the connection string.
    ///
    /// # Errors
    /// Returns `DataError::ConfigError` for a malformed connection string and
    /// `DataError::ProviderUnavailable` for a provider not compiled in.
    pub fn new(connection_string: &str, provider: DataProvider) -> Result<Self, DataError> {
        let timeout = ConnectionStringBuilder::parse(connection_string)?.timeout()?;
        let provider_factory: Arc<dyn ProviderFactory> =
            shared_provider_factory(provider, connection_string)?;
        Ok(Self::with_provider_factory(connection_string, provider_factory).with_timeout(timeout))
    }

    /// Factory configured from `setting`; profiling wraps the provider factory
    /// with the registered profiler, or a [`TracingProfiler`] when none is
    /// registered.
    ///
    /// # Errors
    /// Same as [`DatabaseFactory::new`].
    pub fn from_setting(setting: &DatabaseSetting) -> Result<Self, DataError> {
        let timeout = setting.command_timeout()?;
        let mut provider_factory: Arc<dyn ProviderFactory> =
            shared_provider_factory(setting.provider, &setting.connection_string)?;
        if setting.profiling {
            let profiler = ProfilerFactory::get_profiler().unwrap_or_else(|_| {
                debug!("no profiler registered, using TracingProfiler");
                Arc::new(TracingProfiler::default())
            });
            provider_factory = Arc::new(ProfilerProviderFactory::new(provider_factory, profiler));
        }
        Ok(Self::with_provider_factory(&setting.connection_string, provider_factory)
            .with_timeout(timeout))
    }

    /// Factory over any provider factory, e.g. a profiled one.
    pub fn with_provider_factory(
        connection_string: &str,
        provider_factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            provider: provider_factory.provider(),
            provider_factory,
            connection: None,
            command: DbCommand::default(),
            output_command: DbCommand::default(),
            is_output_parameter: false,
            statistics: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command.command_timeout = timeout;
        self
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    #[must_use]
    pub fn provider(&self) -> DataProvider {
        self.provider
    }

    #[must_use]
    pub fn command(&self) -> &DbCommand {
        &self.command
    }

    pub fn command_mut(&mut self) -> &mut DbCommand {
        &mut self.command
    }

    /// Command holding the parameters captured by the last execute that had
    /// output capture requested.
    #[must_use]
    pub fn output_command(&self) -> &DbCommand {
        &self.output_command
    }

    #[must_use]
    pub fn output_parameters(&self) -> &[DbParameter] {
        &self.output_command.parameters
    }

    #[must_use]
    pub fn is_output_parameter(&self) -> bool {
        self.is_output_parameter
    }

    /// Request output capture for the next execute. The flag resets after it.
    pub fn set_output_parameter(&mut self, capture: bool) {
        self.is_output_parameter = capture;
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Closed, |c| c.state())
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.in_transaction())
    }

    /// Add an input parameter; returns its index.
    pub fn add_parameter(&mut self, name: &str, value: impl Into<DbValue>) -> usize {
        let parameter = self.command.create_parameter(name, value);
        self.command.add_parameter(parameter)
    }

    pub fn add_db_parameter(&mut self, parameter: DbParameter) -> usize {
        self.command.add_parameter(parameter)
    }

    /// Start collecting connection statistics.
    pub fn statistics_enabled(&mut self) {
        let open = self.connection_state() == ConnectionState::Open;
        let stats = self.statistics.get_or_insert_with(ConnectionStatistics::new);
        if open {
            stats.record_open();
        }
    }

    /// Statistics collected so far, `None` unless enabled.
    #[must_use]
    pub fn retrieve_statistics(&self) -> Option<BTreeMap<&'static str, u64>> {
        self.statistics.as_ref().map(ConnectionStatistics::to_map)
    }

    /// Open the connection if it is closed.
    ///
    /// # Errors
    /// Returns the driver's connection error.
    pub async fn connection_open(&mut self) -> Result<(), DataError> {
        if self.connection.is_none() {
            self.connection = Some(self.provider_factory.create_connection().await?);
        }
        let conn = self.connection_mut()?;
        if conn.state() == ConnectionState::Closed {
            conn.open().await?;
            if let Some(stats) = &mut self.statistics {
                stats.record_open();
            }
        }
        Ok(())
    }

    fn connection_mut(&mut self) -> Result<&mut Box<dyn DbConnection>, DataError> {
        self.connection
            .as_mut()
            .ok_or_else(|| DataError::ConnectionError("no connection has been created".into()))
    }

    /// Open the connection and start a transaction. Commands run inside it
    /// until [`commit_transaction`](Self::commit_transaction) or
    /// [`rollback_transaction`](Self::rollback_transaction).
    ///
    /// # Errors
    /// Returns the driver error, or `DataError::ExecutionError` if a
    /// transaction is already open.
    pub async fn begin_transaction(&mut self) -> Result<(), DataError> {
        self.connection_open().await?;
        self.connection_mut()?.begin_transaction().await?;
        if let Some(stats) = &mut self.statistics {
            stats.record_transaction();
        }
        Ok(())
    }

    /// Commit the open transaction, if any, and close the connection.
    ///
    /// # Errors
    /// Returns the driver error of the commit or the close.
    pub async fn commit_transaction(&mut self) -> Result<(), DataError> {
        if self.in_transaction() {
            self.connection_mut()?.commit().await?;
            if let Some(stats) = &mut self.statistics {
                stats.record_roundtrip();
            }
        }
        self.close().await
    }

    /// Roll back the open transaction, if any, and close the connection.
    ///
    /// # Errors
    /// Returns the driver error of the rollback or the close.
    pub async fn rollback_transaction(&mut self) -> Result<(), DataError> {
        if self.in_transaction() {
            self.connection_mut()?.rollback().await?;
            if let Some(stats) = &mut self.statistics {
                stats.record_roundtrip();
            }
        }
        self.close().await
    }

    /// Rows affected.
    ///
    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_non_query(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        connection_state: ExecutingConnectionState,
    ) -> Result<u64, DataError> {
        let result = self
            .run(command_text, command_type, ExecuteMode::NonQuery, connection_state)
            .await?;
        Ok(result.rows_affected)
    }

    /// First column of the first row, `DbValue::Null` when there is none.
    ///
    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_scalar(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        connection_state: ExecutingConnectionState,
    ) -> Result<DbValue, DataError> {
        let result = self
            .run(command_text, command_type, ExecuteMode::Scalar, connection_state)
            .await?;
        Ok(result.scalar())
    }

    /// Forward-only reader over every result set.
    ///
    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_reader(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        connection_state: ExecutingConnectionState,
    ) -> Result<DataReader, DataError> {
        let result = self
            .run(command_text, command_type, ExecuteMode::Reader, connection_state)
            .await?;
        Ok(DataReader::new(result.tables, result.rows_affected))
    }

    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_data_set(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        connection_state: ExecutingConnectionState,
    ) -> Result<DataSet, DataError> {
        let result = self
            .run(command_text, command_type, ExecuteMode::Reader, connection_state)
            .await?;
        Ok(DataSet::new(result.tables))
    }

    /// First result set; an empty table when the command returns none.
    ///
    /// # Errors
    /// Returns the connection or driver error.
    pub async fn execute_data_table(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        connection_state: ExecutingConnectionState,
    ) -> Result<DataTable, DataError> {
        Ok(self
            .execute_data_set(command_text, command_type, connection_state)
            .await?
            .into_first_table())
    }

    async fn run(
        &mut self,
        command_text: &str,
        command_type: CommandType,
        mode: ExecuteMode,
        connection_state: ExecutingConnectionState,
    ) -> Result<CommandResult, DataError> {
        self.command.command_text = command_text.to_string();
        self.command.command_type = command_type;
        debug!(
            provider = %self.provider,
            command = command_text,
            ?command_type,
            ?mode,
            parameters = self.command.parameters.len(),
            "executing command"
        );

        let outcome = self.execute_command(mode).await;

        self.capture_output_parameters();
        self.command.clear_parameters();
        let closed = if connection_state == ExecutingConnectionState::CloseOnExit
            && !self.in_transaction()
        {
            self.close().await
        } else {
            Ok(())
        };

        match outcome {
            Ok(result) => {
                closed?;
                Ok(result)
            }
            Err(err) => {
                error!(provider = %self.provider, command = command_text, %err, "command failed");
                if let Err(release_err) = self.dispose().await {
                    warn!(%release_err, "failed to release connection after command error");
                }
                Err(err)
            }
        }
    }

    async fn execute_command(&mut self, mode: ExecuteMode) -> Result<CommandResult, DataError> {
        self.connection_open().await?;
        let started = Instant::now();
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| DataError::ConnectionError("no connection has been created".into()))?;
        let result = conn.execute(&mut self.command, mode).await?;

        if let Some(stats) = &mut self.statistics {
            let rows = match mode {
                ExecuteMode::NonQuery => result.rows_affected,
                ExecuteMode::Scalar | ExecuteMode::Reader => result.record_count() as u64,
            };
            stats.record_execute(mode, started.elapsed(), result.tables.len(), rows);
        }
        Ok(result)
    }

    fn capture_output_parameters(&mut self) {
        if self.is_output_parameter {
            self.output_command.parameters = self.command.parameters.clone();
            self.is_output_parameter = false;
        }
    }

    /// Close the connection, rolling back an open transaction.
    ///
    /// # Errors
    /// Returns the driver error of the rollback.
    pub async fn close(&mut self) -> Result<(), DataError> {
        if let Some(conn) = self.connection.as_mut()
            && conn.state() == ConnectionState::Open
        {
            conn.close().await?;
            if let Some(stats) = &mut self.statistics {
                stats.record_close();
            }
        }
        Ok(())
    }

    /// Close and drop the connection and clear pending parameters. Output
    /// parameters captured by the last command stay readable.
    ///
    /// # Errors
    /// Returns the driver error of the close; the connection is dropped anyway.
    pub async fn dispose(&mut self) -> Result<(), DataError> {
        let closed = self.close().await;
        self.connection = None;
        self.command.clear_parameters();
        self.is_output_parameter = false;
        closed
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    fn sqlite_factory(dir: &tempfile::TempDir, name: &str) -> DatabaseFactory {
        let cs = format!("Data Source={}", dir.path().join(name).display());
        DatabaseFactory::new(&cs, DataProvider::Sqlite).unwrap()
    }

    #[tokio::test]
    async fn close_on_exit_closes_and_clears_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = sqlite_factory(&dir, "close.db");

        factory
            .execute_non_query(
                "CREATE TABLE t (id INTEGER, name TEXT)",
                CommandType::Text,
                ExecutingConnectionState::CloseOnExit,
            )
            .await
            .unwrap();
        assert_eq!(factory.connection_state(), ConnectionState::Closed);

        factory.add_parameter("@id", 1);
        factory.add_parameter("@name", "alpha");
        let rows = factory
            .execute_non_query(
                "INSERT INTO t (id, name) VALUES (@id, @name)",
                CommandType::Text,
                ExecutingConnectionState::KeepOpen,
            )
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert!(factory.command().parameters.is_empty());
        assert_eq!(factory.connection_state(), ConnectionState::Open);
        factory.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_command_still_clears_and_captures() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = sqlite_factory(&dir, "fail.db");

        factory.add_parameter("@x", 5);
        factory.set_output_parameter(true);
        let err = factory
            .execute_scalar(
                "SELECT * FROM missing_table WHERE x = @x",
                CommandType::Text,
                ExecutingConnectionState::KeepOpen,
            )
            .await;
        assert!(err.is_err());
        assert!(factory.command().parameters.is_empty());
        assert!(!factory.is_output_parameter());
        assert_eq!(factory.output_parameters().len(), 1);
        assert_eq!(factory.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn statistics_count_selects_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = sqlite_factory(&dir, "stats.db");
        assert!(factory.retrieve_statistics().is_none());
        factory.statistics_enabled();

        factory
            .execute_non_query(
                "CREATE TABLE s (v INTEGER); INSERT INTO s VALUES (1), (2), (3);",
                CommandType::Text,
                ExecutingConnectionState::KeepOpen,
            )
            .await
            .unwrap();
        let table = factory
            .execute_data_table("SELECT v FROM s", CommandType::Text, ExecutingConnectionState::CloseOnExit)
            .await
            .unwrap();
        assert_eq!(table.len(), 3);

        let stats = factory.retrieve_statistics().unwrap();
        assert_eq!(stats["IduCount"], 1);
        assert_eq!(stats["IduRows"], 3);
        assert_eq!(stats["SelectCount"], 1);
        assert_eq!(stats["SelectRows"], 3);
        assert_eq!(stats["SumResultSets"], 1);
    }
}
