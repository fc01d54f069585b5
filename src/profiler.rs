//! Profiling decorators around connections, commands and provider factories.
//!
//! A [`DbProfiler`] receives lifecycle hooks. [`ProfilerProviderFactory`]
//! wraps any [`ProviderFactory`](crate::provider::ProviderFactory) so every
//! connection it hands out is a [`ProfilerDbConnection`], whose command
//! execution goes through [`ProfilerDbCommand`].

use std::time::Duration;

use crate::error::DataError;
use crate::provider::DbCommand;
use crate::types::{DataProvider, DbValue};

mod command;
mod connection;
mod factory;
mod registration;
mod tracing_profiler;

pub use command::ProfilerDbCommand;
pub use connection::ProfilerDbConnection;
pub use factory::ProfilerProviderFactory;
pub use registration::ProfilerFactory;
pub use tracing_profiler::TracingProfiler;

/// Receives profiling hooks. Every hook defaults to a no-op.
///
/// Finish hooks get the elapsed time of the wrapped call. Hooks run on the
/// caller's task and should not block.
pub trait DbProfiler: Send + Sync {
    /// When false the decorators forward calls without firing any hook.
    fn is_enabled(&self) -> bool {
        true
    }

    fn on_opening(&self, _provider: DataProvider) {}

    fn on_opened(&self, _provider: DataProvider, _elapsed: Duration) {}

    fn on_closing(&self, _provider: DataProvider) {}

    fn on_closed(&self, _provider: DataProvider) {}

    fn on_starting_transaction(&self, _provider: DataProvider) {}

    fn on_started_transaction(&self, _provider: DataProvider) {}

    fn on_committing(&self, _provider: DataProvider) {}

    fn on_committed(&self, _provider: DataProvider) {}

    fn on_rolling_back(&self, _provider: DataProvider) {}

    fn on_rolled_back(&self, _provider: DataProvider) {}

    fn on_execute_reader_start(&self, _command: &DbCommand) {}

    /// All result sets have been read.
    fn on_reader_finish(&self, _command: &DbCommand, _record_count: usize, _elapsed: Duration) {}

    fn on_execute_non_query_start(&self, _command: &DbCommand) {}

    /// Also fires after a failure, with zero rows.
    fn on_execute_non_query_finish(&self, _command: &DbCommand, _rows: u64, _elapsed: Duration) {}

    fn on_execute_scalar_start(&self, _command: &DbCommand) {}

    /// Also fires after a failure, with no value.
    fn on_execute_scalar_finish(
        &self,
        _command: &DbCommand,
        _value: Option<&DbValue>,
        _elapsed: Duration,
    ) {
    }

    fn on_command_error(&self, _command: &DbCommand, _error: &DataError) {}
}
