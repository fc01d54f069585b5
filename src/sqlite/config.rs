use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bb8::{ManageConnection, Pool};
use tracing::debug;

use super::connection::run_blocking;
use crate::connection_string::{ConnectionStringBuilder, pool_connect_timeout};
use crate::error::DataError;

/// Shared rusqlite connection guarded for use from blocking tasks.
pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

const MEMORY_PATH: &str = ":memory:";

/// bb8 manager for rusqlite connections.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
    busy_timeout: Duration,
}

impl SqliteManager {
    #[must_use]
    pub fn new(path: String, busy_timeout: Duration) -> Self {
        Self { path, busy_timeout }
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = DataError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        async move {
            debug!(path = %path, "sqlite connect");
            let conn = tokio::task::spawn_blocking(move || -> Result<_, DataError> {
                let conn = rusqlite::Connection::open(&path)?;
                conn.busy_timeout(busy_timeout)?;
                Ok(conn)
            })
            .await??;
            Ok(Arc::new(Mutex::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(handle, |guard| {
                guard.execute_batch("SELECT 1")?;
                Ok(())
            })
            .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Build a pool without connecting.
///
/// An in-memory database lives only as long as its connection, so that pool
/// holds exactly one connection and never retires it. A zero timeout means
/// no limit.
#[must_use]
pub fn build_pool(manager: SqliteManager, connect_timeout: Duration) -> Pool<SqliteManager> {
    let builder = Pool::builder().connection_timeout(pool_connect_timeout(connect_timeout));
    let builder = if manager.is_memory() {
        builder.max_size(1).idle_timeout(None).max_lifetime(None)
    } else {
        builder
    };
    builder.build_unchecked(manager)
}

/// Database path from `Data Source=<path>` (or a bare path).
///
/// # Errors
/// Returns `DataError::ConfigError` when no path is present.
pub fn sqlite_path(connection_string: &str) -> Result<(String, Duration), DataError> {
    let trimmed = connection_string.trim();
    if !trimmed.contains('=') {
        if trimmed.is_empty() {
            return Err(DataError::ConfigError("sqlite path is required".into()));
        }
        return Ok((trimmed.to_string(), crate::connection_string::DEFAULT_TIMEOUT));
    }

    let builder = ConnectionStringBuilder::parse(trimmed)?;
    let path = builder
        .get(&["data source", "datasource", "filename", "database"])
        .ok_or_else(|| DataError::ConfigError("Data Source is required".into()))?;
    Ok((path.to_string(), builder.timeout()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_path_from_data_source() {
        let (path, timeout) = sqlite_path("Data Source=/tmp/app.db;Version=3;Timeout=4").unwrap();
        assert_eq!(path, "/tmp/app.db");
        assert_eq!(timeout, Duration::from_secs(4));
    }

    #[tokio::test]
    async fn zero_timeout_builds_a_usable_pool() {
        let (path, timeout) = sqlite_path("Data Source=:memory:;Connect Timeout=0").unwrap();
        assert_eq!(timeout, Duration::ZERO);
        let pool = build_pool(SqliteManager::new(path, timeout), timeout);
        let conn = pool.get_owned().await.unwrap();
        let one = run_blocking(Arc::clone(&conn), |guard| {
            Ok(guard.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?)
        })
        .await
        .unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn accepts_bare_paths() {
        let (path, _) = sqlite_path(":memory:").unwrap();
        assert_eq!(path, ":memory:");
        assert!(sqlite_path("Version=3").is_err());
        assert!(sqlite_path("  ").is_err());
    }
}
