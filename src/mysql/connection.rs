use async_trait::async_trait;
use sqlx::mysql::MySqlConnection;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, MySql, MySqlPool};
use tokio::runtime::Handle;
use tracing::debug;

use super::params::{bind_value, call_statements};
use super::query::{
    DERIVE_PARAMETERS_SQL, ROUTINE_EXISTS_SQL, collect_tables, parameters_from_table,
    split_routine_name,
};
use crate::error::DataError;
use crate::parameter::DbParameter;
use crate::provider::{
    CommandResult, ConnectionState, DbCommand, DbConnection, ExecuteMode, PlaceholderStyle,
    not_open, table_direct_sql, with_timeout,
};
use crate::types::{CommandType, DataProvider, DbValue};

/// `DbConnection` over a connection checked out of a sqlx pool.
pub struct MySqlDbConnection {
    pool: MySqlPool,
    conn: Option<PoolConnection<MySql>>,
    in_transaction: bool,
}

impl MySqlDbConnection {
    #[must_use]
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            conn: None,
            in_transaction: false,
        }
    }

    fn connection(&mut self) -> Result<&mut MySqlConnection, DataError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| not_open(DataProvider::MySql))
    }
}

/// Run `sql`; without values it goes over the text protocol so batches of
/// several statements work.
async fn run_sql(
    conn: &mut MySqlConnection,
    sql: &str,
    values: &[DbValue],
    mode: ExecuteMode,
) -> Result<CommandResult, DataError> {
    let (tables, affected) = if values.is_empty() {
        collect_tables(conn, sqlx::raw_sql(sql)).await?
    } else {
        let mut query = sqlx::query(sql);
        for value in values {
            query = bind_value(query, value);
        }
        collect_tables(conn, query).await?
    };

    if mode == ExecuteMode::NonQuery {
        return Ok(CommandResult {
            tables: Vec::new(),
            rows_affected: affected,
        });
    }
    let rows_affected = tables.iter().map(|t| t.len() as u64).sum();
    Ok(CommandResult {
        tables,
        rows_affected,
    })
}

async fn run_procedure(
    conn: &mut MySqlConnection,
    command: &mut DbCommand,
    mode: ExecuteMode,
) -> Result<CommandResult, DataError> {
    let call = call_statements(&command.command_text, &command.parameters)?;
    debug!(sql = %call.call_sql, "mysql procedure call");

    for (sql, value) in &call.presets {
        let values = value.as_slice();
        run_sql(conn, sql, values, ExecuteMode::NonQuery).await?;
    }
    let result = run_sql(conn, &call.call_sql, &call.call_values, mode).await?;

    if let Some(select_sql) = &call.select_sql {
        let outputs = run_sql(conn, select_sql, &[], ExecuteMode::Reader).await?;
        if let Some(row) = outputs.tables.first().and_then(|t| t.rows.first()) {
            for (name, value) in row.column_names.iter().zip(row.values.iter()) {
                command.set_output_value(name, value.clone());
            }
        }
    }
    Ok(result)
}

#[async_trait]
impl DbConnection for MySqlDbConnection {
    fn provider(&self) -> DataProvider {
        DataProvider::MySql
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
            let conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| DataError::ConnectionError(format!("MySQL checkout error: {e}")))?;
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
                "MySQL transaction already in progress".into(),
            ));
        }
        self.connection()?.execute("START TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError(
                "no MySQL transaction to commit".into(),
            ));
        }
        self.connection()?.execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError(
                "no MySQL transaction to roll back".into(),
            ));
        }
        self.in_transaction = false;
        self.connection()?.execute("ROLLBACK").await?;
        Ok(())
    }

    async fn execute(
        &mut self,
        command: &mut DbCommand,
        mode: ExecuteMode,
    ) -> Result<CommandResult, DataError> {
        let timeout = command.command_timeout;
        let conn = self.connection()?;
        match command.command_type {
            CommandType::Text => {
                let (sql, values) = command.bind_text(PlaceholderStyle::Question);
                with_timeout(timeout, run_sql(conn, &sql, &values, mode)).await
            }
            CommandType::TableDirect => {
                let sql = table_direct_sql(&command.command_text)?;
                with_timeout(timeout, run_sql(conn, &sql, &[], ExecuteMode::Reader)).await
            }
            CommandType::StoredProcedure => {
                with_timeout(timeout, run_procedure(conn, command, mode)).await
            }
        }
    }

    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<DbParameter>, DataError> {
        let (schema, routine) = split_routine_name(procedure);
        let key = [DbValue::from(schema), DbValue::Text(routine)];
        let conn = self.connection()?;

        let exists = run_sql(conn, ROUTINE_EXISTS_SQL, &key, ExecuteMode::Scalar).await?;
        if exists.scalar().as_int().copied().unwrap_or(0) == 0 {
            return Err(DataError::ExecutionError(format!(
                "stored procedure `{procedure}` not found"
            )));
        }
        let result = run_sql(conn, DERIVE_PARAMETERS_SQL, &key, ExecuteMode::Reader).await?;
        Ok(parameters_from_table(result.tables.first()))
    }
}

impl Drop for MySqlDbConnection {
    fn drop(&mut self) {
        if self.in_transaction
            && let Some(mut conn) = self.conn.take()
            && let Ok(handle) = Handle::try_current()
        {
            handle.spawn(async move {
                let _ = (&mut *conn).execute("ROLLBACK").await;
            });
        }
    }
}
