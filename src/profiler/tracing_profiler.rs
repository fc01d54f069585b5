use std::time::Duration;

use tracing::{debug, trace, warn};

use super::DbProfiler;
use crate::error::DataError;
use crate::provider::DbCommand;
use crate::types::{DataProvider, DbValue};

/// Profiler that reports through `tracing`.
///
/// Commands slower than `slow_threshold` are logged at `warn`, everything
/// else at `debug`.
#[derive(Debug, Clone)]
pub struct TracingProfiler {
    pub slow_threshold: Duration,
}

impl Default for TracingProfiler {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_secs(1),
        }
    }
}

impl TracingProfiler {
    fn finished(&self, kind: &str, command: &DbCommand, elapsed: Duration, detail: &str) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        if elapsed >= self.slow_threshold {
            warn!(
                kind,
                command = %command.command_text,
                elapsed_ms,
                detail,
                "slow command"
            );
        } else {
            debug!(
                kind,
                command = %command.command_text,
                elapsed_ms,
                detail,
                "command finished"
            );
        }
    }
}

impl DbProfiler for TracingProfiler {
    fn on_opened(&self, provider: DataProvider, elapsed: Duration) {
        debug!(%provider, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "connection opened");
    }

    fn on_closed(&self, provider: DataProvider) {
        trace!(%provider, "connection closed");
    }

    fn on_started_transaction(&self, provider: DataProvider) {
        debug!(%provider, "transaction started");
    }

    fn on_committed(&self, provider: DataProvider) {
        debug!(%provider, "transaction committed");
    }

    fn on_rolled_back(&self, provider: DataProvider) {
        debug!(%provider, "transaction rolled back");
    }

    fn on_execute_reader_start(&self, command: &DbCommand) {
        trace!(command = %command.command_text, "reader start");
    }

    fn on_reader_finish(&self, command: &DbCommand, record_count: usize, elapsed: Duration) {
        self.finished("reader", command, elapsed, &format!("{record_count} records"));
    }

    fn on_execute_non_query_finish(&self, command: &DbCommand, rows: u64, elapsed: Duration) {
        self.finished("non_query", command, elapsed, &format!("{rows} rows"));
    }

    fn on_execute_scalar_finish(
        &self,
        command: &DbCommand,
        value: Option<&DbValue>,
        elapsed: Duration,
    ) {
        let detail = value.map_or_else(|| "no value".to_string(), ToString::to_string);
        self.finished("scalar", command, elapsed, &detail);
    }

    fn on_command_error(&self, command: &DbCommand, error: &DataError) {
        warn!(command = %command.command_text, %error, "command failed");
    }
}
