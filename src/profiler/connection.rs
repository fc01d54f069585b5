use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{DbProfiler, ProfilerDbCommand, ProfilerFactory};
use crate::error::DataError;
use crate::parameter::DbParameter;
use crate::provider::{CommandResult, ConnectionState, DbCommand, DbConnection, ExecuteMode};
use crate::types::DataProvider;

/// `DbConnection` decorator that fires the connection hooks and forwards.
pub struct ProfilerDbConnection {
    inner: Box<dyn DbConnection>,
    profiler: Arc<dyn DbProfiler>,
}

impl ProfilerDbConnection {
    pub fn new(inner: Box<dyn DbConnection>, profiler: Arc<dyn DbProfiler>) -> Self {
        Self { inner, profiler }
    }

    /// Wrap `inner` with the profiler registered in [`ProfilerFactory`].
    ///
    /// # Errors
    /// Returns `DataError::ProfilerError` when no profiler is registered.
    pub fn with_registered_profiler(inner: Box<dyn DbConnection>) -> Result<Self, DataError> {
        Ok(Self::new(inner, ProfilerFactory::get_profiler()?))
    }

    #[must_use]
    pub fn wrapped(&self) -> &dyn DbConnection {
        self.inner.as_ref()
    }

    #[must_use]
    pub fn profiler(&self) -> &Arc<dyn DbProfiler> {
        &self.profiler
    }

    #[must_use]
    pub fn into_inner(self) -> Box<dyn DbConnection> {
        self.inner
    }
}

#[async_trait]
impl DbConnection for ProfilerDbConnection {
    fn provider(&self) -> DataProvider {
        self.inner.provider()
    }

    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    async fn open(&mut self) -> Result<(), DataError> {
        if !self.profiler.is_enabled() {
            return self.inner.open().await;
        }
        let provider = self.provider();
        self.profiler.on_opening(provider);
        let started = Instant::now();
        self.inner.open().await?;
        self.profiler.on_opened(provider, started.elapsed());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DataError> {
        if !self.profiler.is_enabled() {
            return self.inner.close().await;
        }
        let provider = self.provider();
        self.profiler.on_closing(provider);
        self.inner.close().await?;
        self.profiler.on_closed(provider);
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<(), DataError> {
        if !self.profiler.is_enabled() {
            return self.inner.begin_transaction().await;
        }
        let provider = self.provider();
        self.profiler.on_starting_transaction(provider);
        self.inner.begin_transaction().await?;
        self.profiler.on_started_transaction(provider);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        if !self.profiler.is_enabled() {
            return self.inner.commit().await;
        }
        let provider = self.provider();
        self.profiler.on_committing(provider);
        self.inner.commit().await?;
        self.profiler.on_committed(provider);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DataError> {
        if !self.profiler.is_enabled() {
            return self.inner.rollback().await;
        }
        let provider = self.provider();
        self.profiler.on_rolling_back(provider);
        self.inner.rollback().await?;
        self.profiler.on_rolled_back(provider);
        Ok(())
    }

    async fn execute(
        &mut self,
        command: &mut DbCommand,
        mode: ExecuteMode,
    ) -> Result<CommandResult, DataError> {
        let profiler = Arc::clone(&self.profiler);
        ProfilerDbCommand::new(self.inner.as_mut(), profiler)
            .execute(command, mode)
            .await
    }

    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<DbParameter>, DataError> {
        self.inner.derive_parameters(procedure).await
    }
}
