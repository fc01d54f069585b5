use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lazy_static::lazy_static;
use tracing::debug;

use super::{DbConnection, ProviderFactory};
use crate::connection_string::ConnectionStringBuilder;
use crate::error::DataError;
use crate::types::DataProvider;

#[cfg(feature = "postgres")]
use crate::postgres::{PgConnection, PgManager};
#[cfg(feature = "sqlite")]
use crate::sqlite::{SqliteConnection, SqliteManager};
#[cfg(feature = "mssql")]
use crate::mssql::{MssqlConnection, TiberiusManager};
#[cfg(feature = "mysql")]
use crate::mysql::MySqlDbConnection;

lazy_static! {
    static ref POOL_REGISTRY: Mutex<HashMap<(DataProvider, String), Arc<PoolProviderFactory>>> =
        Mutex::new(HashMap::new());
}

/// Connection pool behind a [`PoolProviderFactory`].
#[derive(Clone)]
pub enum PoolBackend {
    #[cfg(feature = "postgres")]
    Postgres(bb8::Pool<PgManager>),
    #[cfg(feature = "sqlite")]
    Sqlite(bb8::Pool<SqliteManager>),
    #[cfg(feature = "mssql")]
    Mssql(bb8::Pool<TiberiusManager>),
    #[cfg(feature = "mysql")]
    MySql(sqlx::MySqlPool),
}

// Manual Debug implementation because the managers don't implement Debug
impl std::fmt::Debug for PoolBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => f.debug_tuple("Postgres").field(&"<bb8::Pool>").finish(),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => f.debug_tuple("Sqlite").field(&"<bb8::Pool>").finish(),
            #[cfg(feature = "mssql")]
            Self::Mssql(_) => f.debug_tuple("Mssql").field(&"<bb8::Pool>").finish(),
            #[cfg(feature = "mysql")]
            Self::MySql(pool) => f.debug_tuple("MySql").field(pool).finish(),
        }
    }
}

/// Pooled [`ProviderFactory`] for every compiled-in backend.
#[derive(Debug, Clone)]
pub struct PoolProviderFactory {
    provider: DataProvider,
    connection_string: String,
    backend: PoolBackend,
}

impl PoolProviderFactory {
    /// Build the pool for `provider`. Pools are lazy: nothing connects until
    /// the first checkout.
    ///
    /// Must run inside a tokio runtime; bb8 spawns its reaper task here.
    ///
    /// # Errors
    /// Returns `DataError::ProviderUnavailable` for Oracle or a backend whose
    /// feature is disabled, and `DataError::ConfigError` for a malformed
    /// connection string.
    pub fn new(provider: DataProvider, connection_string: &str) -> Result<Self, DataError> {
        let backend = Self::build_backend(provider, connection_string)?;
        debug!(provider = %provider, "built connection pool");
        Ok(Self {
            provider,
            connection_string: connection_string.to_string(),
            backend,
        })
    }

    #[allow(unused_variables)]
    fn build_backend(
        provider: DataProvider,
        connection_string: &str,
    ) -> Result<PoolBackend, DataError> {
        match provider {
            #[cfg(feature = "postgres")]
            DataProvider::PostgreSql => {
                let builder = ConnectionStringBuilder::parse(connection_string)?;
                let config = crate::postgres::pg_config_from_connection_string(&builder)?;
                Ok(PoolBackend::Postgres(crate::postgres::build_pool(
                    config,
                    builder.timeout()?,
                )))
            }
            #[cfg(feature = "sqlite")]
            DataProvider::Sqlite => {
                let (path, timeout) = crate::sqlite::sqlite_path(connection_string)?;
                let manager = SqliteManager::new(path, timeout);
                Ok(PoolBackend::Sqlite(crate::sqlite::build_pool(manager, timeout)))
            }
            #[cfg(feature = "mssql")]
            DataProvider::SqlServer => {
                let timeout = ConnectionStringBuilder::parse(connection_string)?.timeout()?;
                let config = crate::mssql::build_tiberius_config(connection_string)?;
                Ok(PoolBackend::Mssql(crate::mssql::build_pool(config, timeout)))
            }
            #[cfg(feature = "mysql")]
            DataProvider::MySql => {
                let builder = ConnectionStringBuilder::parse(connection_string)?;
                let options = crate::mysql::mysql_options(&builder)?;
                Ok(PoolBackend::MySql(crate::mysql::build_pool(
                    options,
                    builder.timeout()?,
                )))
            }
            #[allow(unreachable_patterns)]
            other => Err(DataError::ProviderUnavailable(other.to_string())),
        }
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    #[must_use]
    pub fn backend(&self) -> &PoolBackend {
        &self.backend
    }
}

#[async_trait]
impl ProviderFactory for PoolProviderFactory {
    fn provider(&self) -> DataProvider {
        self.provider
    }

    async fn create_connection(&self) -> Result<Box<dyn DbConnection>, DataError> {
        let conn: Box<dyn DbConnection> = match &self.backend {
            #[cfg(feature = "postgres")]
            PoolBackend::Postgres(pool) => Box::new(PgConnection::new(pool.clone())),
            #[cfg(feature = "sqlite")]
            PoolBackend::Sqlite(pool) => Box::new(SqliteConnection::new(pool.clone())),
            #[cfg(feature = "mssql")]
            PoolBackend::Mssql(pool) => Box::new(MssqlConnection::new(pool.clone())),
            #[cfg(feature = "mysql")]
            PoolBackend::MySql(pool) => Box::new(MySqlDbConnection::new(pool.clone())),
        };
        Ok(conn)
    }
}

/// Process-wide factory for `(provider, connection_string)`, building its pool
/// on first use.
///
/// # Errors
/// Propagates the errors of [`PoolProviderFactory::new`].
pub fn shared_provider_factory(
    provider: DataProvider,
    connection_string: &str,
) -> Result<Arc<PoolProviderFactory>, DataError> {
    let key = (provider, connection_string.to_string());
    let mut registry = POOL_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(factory) = registry.get(&key) {
        return Ok(Arc::clone(factory));
    }
    let factory = Arc::new(PoolProviderFactory::new(provider, connection_string)?);
    registry.insert(key, Arc::clone(&factory));
    Ok(factory)
}

/// Drop every registered pool. Open connections stay valid until returned.
pub fn clear_pool_registry() {
    POOL_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}
