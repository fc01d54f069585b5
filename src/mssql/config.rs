use std::future::Future;
use std::time::Duration;

use bb8::{ManageConnection, Pool};
use tiberius::{Client, Config as TiberiusConfig, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::connection_string::pool_connect_timeout;
use crate::error::DataError;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// bb8 manager for tiberius clients.
pub struct TiberiusManager {
    config: TiberiusConfig,
}

impl TiberiusManager {
    #[must_use]
    pub fn new(config: TiberiusConfig) -> Self {
        Self { config }
    }
}

impl ManageConnection for TiberiusManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let config = self.config.clone();
        async move {
            debug!(addr = %config.get_addr(), "mssql connect start");
            // resolves named instances through SQL Browser when one is set
            let tcp = TcpStream::connect_named(&config).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write()).await
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            conn.simple_query("SELECT 1").await?.into_results().await?;
            Ok(())
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Build a pool without connecting. A zero timeout means no limit.
#[must_use]
pub fn build_pool(config: TiberiusConfig, connect_timeout: Duration) -> Pool<TiberiusManager> {
    Pool::builder()
        .max_size(20)
        .connection_timeout(pool_connect_timeout(connect_timeout))
        .build_unchecked(TiberiusManager::new(config))
}

/// Parse an ADO.NET connection string into a tiberius config.
///
/// # Errors
/// Returns `DataError::ConfigError` if tiberius rejects the string.
pub fn build_tiberius_config(connection_string: &str) -> Result<TiberiusConfig, DataError> {
    TiberiusConfig::from_ado_string(connection_string)
        .map_err(|e| DataError::ConfigError(format!("invalid SQL Server connection string: {e}")))
}
