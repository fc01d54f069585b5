use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tokio::runtime::Handle;
use tokio_postgres::{Client, SimpleQueryMessage};
use tracing::debug;

use super::config::PgManager;
use super::params::Params;
use super::query::{
    DERIVE_PARAMETERS_SQL, build_table_from_rows, function_call_sql, parameters_from_rows,
    split_routine_name,
};
use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::provider::{
    CommandResult, ConnectionState, DbCommand, DbConnection, ExecuteMode, PlaceholderStyle,
    not_open, table_direct_sql, with_timeout,
};
use crate::types::{CommandType, DataProvider, DbValue};

/// `DbConnection` over a pooled tokio-postgres client.
pub struct PgConnection {
    pool: Pool<PgManager>,
    conn: Option<PooledConnection<'static, PgManager>>,
    /// True when a transaction is in-flight and needs rollback if dropped.
    in_transaction: bool,
}

impl PgConnection {
    #[must_use]
    pub fn new(pool: Pool<PgManager>) -> Self {
        Self {
            pool,
            conn: None,
            in_transaction: false,
        }
    }

    fn client(&self) -> Result<&Client, DataError> {
        self.conn
            .as_deref()
            .ok_or_else(|| not_open(DataProvider::PostgreSql))
    }
}

async fn run_sql(
    client: &Client,
    sql: &str,
    values: &[DbValue],
    mode: ExecuteMode,
) -> Result<CommandResult, DataError> {
    if mode == ExecuteMode::NonQuery && values.is_empty() {
        // simple protocol so multi-statement scripts work
        let messages = client.simple_query(sql).await?;
        let rows_affected = messages
            .iter()
            .map(|m| match m {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum();
        return Ok(CommandResult {
            tables: Vec::new(),
            rows_affected,
        });
    }

    let params = Params::convert(values)?;
    if mode == ExecuteMode::NonQuery {
        let rows_affected = client.execute(sql, params.as_refs()).await?;
        return Ok(CommandResult {
            tables: Vec::new(),
            rows_affected,
        });
    }

    let stmt = client.prepare(sql).await?;
    let rows = client.query(&stmt, params.as_refs()).await?;
    let table = build_table_from_rows(&stmt, &rows)?;
    Ok(CommandResult {
        rows_affected: rows.len() as u64,
        tables: vec![table],
    })
}

/// Copy output columns of the first row back into the command.
fn capture_outputs(command: &mut DbCommand, result: &CommandResult) {
    let Some(row) = result.tables.first().and_then(|t| t.rows.first()) else {
        return;
    };
    let (_, routine) = split_routine_name(&command.command_text);
    for param in &mut command.parameters {
        match param.direction {
            ParameterDirection::Output | ParameterDirection::InputOutput => {
                if let Some(value) = row.get(param.bare_name()) {
                    param.value = value.clone();
                }
            }
            ParameterDirection::ReturnValue => {
                param.value = row
                    .get(&routine)
                    .or_else(|| row.get_by_index(0))
                    .cloned()
                    .unwrap_or_default();
            }
            ParameterDirection::Input => {}
        }
    }
}

#[async_trait]
impl DbConnection for PgConnection {
    fn provider(&self) -> DataProvider {
        DataProvider::PostgreSql
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
                DataError::ConnectionError(format!("postgres checkout error: {e}"))
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
                "postgres transaction already in progress".into(),
            ));
        }
        self.client()?.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError(
                "no postgres transaction to commit".into(),
            ));
        }
        self.client()?.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError(
                "no postgres transaction to roll back".into(),
            ));
        }
        let result = self.client()?.batch_execute("ROLLBACK").await;
        self.in_transaction = false;
        result.map_err(DataError::from)
    }

    async fn execute(
        &mut self,
        command: &mut DbCommand,
        mode: ExecuteMode,
    ) -> Result<CommandResult, DataError> {
        let timeout = command.command_timeout;
        let client = self.client()?;
        match command.command_type {
            CommandType::Text => {
                let (sql, values) = command.bind_text(PlaceholderStyle::Dollar);
                with_timeout(timeout, run_sql(client, &sql, &values, mode)).await
            }
            CommandType::TableDirect => {
                let sql = table_direct_sql(&command.command_text)?;
                with_timeout(timeout, run_sql(client, &sql, &[], ExecuteMode::Reader)).await
            }
            CommandType::StoredProcedure => {
                let (sql, values) = function_call_sql(&command.command_text, &command.parameters)?;
                debug!(sql = %sql, "postgres function call");
                let mut result =
                    with_timeout(timeout, run_sql(client, &sql, &values, ExecuteMode::Reader))
                        .await?;
                capture_outputs(command, &result);
                if mode == ExecuteMode::NonQuery {
                    result.tables.clear();
                }
                Ok(result)
            }
        }
    }

    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<DbParameter>, DataError> {
        let (schema, routine) = split_routine_name(procedure);
        let rows = self
            .client()?
            .query(DERIVE_PARAMETERS_SQL, &[&schema, &routine])
            .await?;
        parameters_from_rows(procedure, &rows)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if self.in_transaction
            && let Some(conn) = self.conn.take()
            && let Ok(handle) = Handle::try_current()
        {
            handle.spawn(async move {
                let _ = conn.simple_query("ROLLBACK").await;
            });
        }
    }
}
