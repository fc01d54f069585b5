use std::fmt;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;

use super::config::{SharedSqliteConnection, SqliteManager};
use super::query::build_table;
use crate::error::DataError;
use crate::parameter::DbParameter;
use crate::provider::{
    CommandResult, ConnectionState, DbCommand, DbConnection, ExecuteMode, not_open,
    table_direct_sql, with_timeout,
};
use crate::types::{CommandType, DataProvider};

/// Connection wrapper backed by a bb8 pooled `SQLite` connection.
pub struct SqliteConnection {
    pool: Pool<SqliteManager>,
    conn: Option<PooledConnection<'static, SqliteManager>>,
    in_transaction: bool,
}

impl SqliteConnection {
    #[must_use]
    pub fn new(pool: Pool<SqliteManager>) -> Self {
        Self {
            pool,
            conn: None,
            in_transaction: false,
        }
    }

    fn conn_handle(&self) -> Result<SharedSqliteConnection, DataError> {
        self.conn
            .as_deref()
            .map(Arc::clone)
            .ok_or_else(|| not_open(DataProvider::Sqlite))
    }

    async fn batch(&self, sql: &'static str) -> Result<(), DataError> {
        run_blocking(self.conn_handle()?, move |conn| {
            conn.execute_batch(sql)?;
            Ok(())
        })
        .await
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("open", &self.conn.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, DataError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DataError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
        func(&mut guard)
    })
    .await
    .map_err(|e| DataError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

fn execute_blocking(
    conn: &mut rusqlite::Connection,
    sql: &str,
    parameters: &[DbParameter],
    mode: ExecuteMode,
) -> Result<CommandResult, DataError> {
    if mode == ExecuteMode::NonQuery && !parameters.iter().any(|p| p.direction.is_input()) {
        // execute_batch so multi-statement scripts work
        let before = conn.total_changes();
        conn.execute_batch(sql)?;
        let changed = conn.total_changes().saturating_sub(before);
        return Ok(CommandResult {
            tables: Vec::new(),
            rows_affected: u64::try_from(changed).unwrap_or_default(),
        });
    }

    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        super::params::bind_parameters(&mut stmt, parameters)?;
        let changed = stmt.raw_execute()?;
        return Ok(CommandResult {
            tables: Vec::new(),
            rows_affected: changed as u64,
        });
    }

    let table = build_table(&mut stmt, parameters)?;
    // a query run as a non-query changes nothing
    if mode == ExecuteMode::NonQuery {
        return Ok(CommandResult {
            tables: Vec::new(),
            rows_affected: 0,
        });
    }
    Ok(CommandResult {
        rows_affected: table.len() as u64,
        tables: vec![table],
    })
}

#[async_trait]
impl DbConnection for SqliteConnection {
    fn provider(&self) -> DataProvider {
        DataProvider::Sqlite
    }

    fn state(&self) -> ConnectionState {
        if self.conn.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn open(&mut self) -> Result<(), DataError> {
        if self.conn.is_none() {
            let conn = self.pool.get_owned().await.map_err(|e| {
                DataError::ConnectionError(format!("sqlite checkout error: {e}"))
            })?;
            self.conn = Some(conn);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DataError> {
        if self.in_transaction {
            self.rollback().await?;
        }
        self.conn = None;
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<(), DataError> {
        if self.in_transaction {
            return Err(DataError::ExecutionError(
                "SQLite transaction already in progress".into(),
            ));
        }
        self.batch("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError("no SQLite transaction to commit".into()));
        }
        self.batch("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError(
                "no SQLite transaction to roll back".into(),
            ));
        }
        let result = self.batch("ROLLBACK").await;
        self.in_transaction = false;
        result
    }

    async fn execute(
        &mut self,
        command: &mut DbCommand,
        mode: ExecuteMode,
    ) -> Result<CommandResult, DataError> {
        let (sql, mode) = match command.command_type {
            CommandType::Text => (command.command_text.clone(), mode),
            CommandType::TableDirect => (table_direct_sql(&command.command_text)?, ExecuteMode::Reader),
            CommandType::StoredProcedure => {
                return Err(DataError::Unsupported(
                    "SQLite has no stored procedures".into(),
                ));
            }
        };
        let handle = self.conn_handle()?;
        let parameters = command.parameters.clone();
        with_timeout(
            command.command_timeout,
            run_blocking(handle, move |conn| execute_blocking(conn, &sql, &parameters, mode)),
        )
        .await
    }

    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<DbParameter>, DataError> {
        Err(DataError::Unsupported(format!(
            "SQLite cannot derive parameters for `{procedure}`"
        )))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if self.in_transaction
            && let Some(conn) = self.conn.take()
        {
            let conn_handle: SharedSqliteConnection = Arc::clone(&*conn);
            // Roll back synchronously so the connection is clean before it
            // goes back into the pool.
            let rollback = move || {
                let guard = conn_handle.lock().unwrap_or_else(PoisonError::into_inner);
                let _ = guard.execute_batch("ROLLBACK");
            };
            match Handle::try_current() {
                Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    block_in_place(rollback);
                }
                _ => rollback(),
            }
        }
    }
}
