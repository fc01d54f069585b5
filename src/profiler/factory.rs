use std::sync::Arc;

use async_trait::async_trait;

use super::{DbProfiler, ProfilerDbConnection, ProfilerFactory};
use crate::error::DataError;
use crate::provider::{DbConnection, ProviderFactory};
use crate::types::DataProvider;

/// `ProviderFactory` decorator whose connections are [`ProfilerDbConnection`]s.
pub struct ProfilerProviderFactory {
    inner: Arc<dyn ProviderFactory>,
    profiler: Arc<dyn DbProfiler>,
}

impl ProfilerProviderFactory {
    pub fn new(inner: Arc<dyn ProviderFactory>, profiler: Arc<dyn DbProfiler>) -> Self {
        Self { inner, profiler }
    }

    /// Wrap `inner` with the profiler registered in [`ProfilerFactory`].
    ///
    /// # Errors
    /// Returns `DataError::ProfilerError` when no profiler is registered.
    pub fn with_registered_profiler(inner: Arc<dyn ProviderFactory>) -> Result<Self, DataError> {
        Ok(Self::new(inner, ProfilerFactory::get_profiler()?))
    }

    #[must_use]
    pub fn wrapped(&self) -> &Arc<dyn ProviderFactory> {
        &self.inner
    }
}

#[async_trait]
impl ProviderFactory for ProfilerProviderFactory {
    fn provider(&self) -> DataProvider {
        self.inner.provider()
    }

    async fn create_connection(&self) -> Result<Box<dyn DbConnection>, DataError> {
        let conn = self.inner.create_connection().await?;
        Ok(Box::new(ProfilerDbConnection::new(
            conn,
            Arc::clone(&self.profiler),
        )))
    }
}
