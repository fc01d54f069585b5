use std::sync::Arc;
use std::time::Instant;

use super::DbProfiler;
use crate::error::DataError;
use crate::provider::{CommandResult, DbCommand, DbConnection, ExecuteMode};

/// Runs commands on a wrapped connection, firing the execute hooks.
pub struct ProfilerDbCommand<'c> {
    connection: &'c mut dyn DbConnection,
    profiler: Arc<dyn DbProfiler>,
}

impl<'c> ProfilerDbCommand<'c> {
    pub fn new(connection: &'c mut dyn DbConnection, profiler: Arc<dyn DbProfiler>) -> Self {
        Self {
            connection,
            profiler,
        }
    }

    /// Execute `command`, forwarding untouched when the profiler is disabled.
    ///
    /// # Errors
    /// Returns whatever the wrapped connection returns; the error hook fires first.
    pub async fn execute(
        &mut self,
        command: &mut DbCommand,
        mode: ExecuteMode,
    ) -> Result<CommandResult, DataError> {
        if !self.profiler.is_enabled() {
            return self.connection.execute(command, mode).await;
        }

        match mode {
            ExecuteMode::Reader => self.profiler.on_execute_reader_start(command),
            ExecuteMode::NonQuery => self.profiler.on_execute_non_query_start(command),
            ExecuteMode::Scalar => self.profiler.on_execute_scalar_start(command),
        }

        let started = Instant::now();
        let outcome = self.connection.execute(command, mode).await;
        let elapsed = started.elapsed();

        if let Err(err) = &outcome {
            self.profiler.on_command_error(command, err);
        }
        match (mode, &outcome) {
            (ExecuteMode::Reader, Ok(result)) => {
                self.profiler
                    .on_reader_finish(command, result.record_count(), elapsed);
            }
            (ExecuteMode::Reader, Err(_)) => {}
            (ExecuteMode::NonQuery, _) => {
                let rows = outcome.as_ref().map_or(0, |r| r.rows_affected);
                self.profiler
                    .on_execute_non_query_finish(command, rows, elapsed);
            }
            (ExecuteMode::Scalar, _) => {
                let value = outcome.as_ref().ok().map(CommandResult::scalar);
                self.profiler
                    .on_execute_scalar_finish(command, value.as_ref(), elapsed);
            }
        }
        outcome
    }
}
