use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tokio::runtime::Handle;
use tracing::debug;

use super::config::{MssqlClient, TiberiusManager};
use super::params::{Params, size_from_max_length};
use super::query::{DERIVE_PARAMETERS_SQL, RETURN_VALUE_COLUMN, collect_tables, procedure_batch};
use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::provider::{
    CommandResult, ConnectionState, DbCommand, DbConnection, ExecuteMode, PlaceholderStyle,
    not_open, table_direct_sql, with_timeout,
};
use crate::types::{CommandType, DataProvider, DbValue};

/// `DbConnection` over a pooled tiberius client.
pub struct MssqlConnection {
    pool: Pool<TiberiusManager>,
    conn: Option<PooledConnection<'static, TiberiusManager>>,
    in_transaction: bool,
}

impl MssqlConnection {
    #[must_use]
    pub fn new(pool: Pool<TiberiusManager>) -> Self {
        Self {
            pool,
            conn: None,
            in_transaction: false,
        }
    }

    fn client(&mut self) -> Result<&mut MssqlClient, DataError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| not_open(DataProvider::SqlServer))
    }
}

async fn run_sql(
    client: &mut MssqlClient,
    sql: &str,
    values: &[DbValue],
    mode: ExecuteMode,
) -> Result<CommandResult, DataError> {
    let params = Params::convert(values);
    if mode == ExecuteMode::NonQuery {
        let result = client.execute(sql, params.as_refs()).await?;
        return Ok(CommandResult {
            tables: Vec::new(),
            rows_affected: result.total(),
        });
    }
    let stream = client.query(sql, params.as_refs()).await?;
    let tables = collect_tables(stream).await?;
    let rows_affected = tables.iter().map(|t| t.len() as u64).sum();
    Ok(CommandResult {
        tables,
        rows_affected,
    })
}

async fn run_procedure(
    client: &mut MssqlClient,
    command: &mut DbCommand,
    mode: ExecuteMode,
) -> Result<CommandResult, DataError> {
    let batch = procedure_batch(&command.command_text, &command.parameters)?;
    debug!(sql = %batch.sql, "mssql procedure batch");
    if !batch.selects_outputs {
        return run_sql(client, &batch.sql, &batch.values, mode).await;
    }

    let mut result = run_sql(client, &batch.sql, &batch.values, ExecuteMode::Reader).await?;
    if let Some(outputs) = result.tables.pop() {
        if let Some(row) = outputs.rows.first() {
            for (name, value) in row.column_names.iter().zip(row.values.iter()) {
                if name == RETURN_VALUE_COLUMN {
                    command.set_return_value(value.clone());
                } else {
                    command.set_output_value(name, value.clone());
                }
            }
        }
        result.rows_affected = result.rows_affected.saturating_sub(outputs.len() as u64);
    }
    if mode == ExecuteMode::NonQuery {
        result.tables.clear();
    }
    Ok(result)
}

fn parameters_from_tables(
    procedure: &str,
    result: &CommandResult,
) -> Result<Vec<DbParameter>, DataError> {
    let found = result
        .tables
        .first()
        .and_then(|t| t.first_value())
        .is_some_and(|v| !v.is_null());
    if !found {
        return Err(DataError::ExecutionError(format!(
            "stored procedure `{procedure}` not found"
        )));
    }

    let mut parameters = vec![
        DbParameter::output("@RETURN_VALUE", "int").with_direction(ParameterDirection::ReturnValue),
    ];
    let Some(rows) = result.tables.get(1) else {
        return Ok(parameters);
    };
    for row in &rows.rows {
        let name = row
            .get("name")
            .and_then(DbValue::as_text)
            .unwrap_or_default()
            .to_string();
        let type_name = row
            .get("type_name")
            .and_then(DbValue::as_text)
            .unwrap_or_default()
            .to_string();
        let is_output = row
            .get("is_output")
            .and_then(DbValue::as_bool)
            .copied()
            .unwrap_or(false);
        let max_length = row.get("max_length").and_then(DbValue::as_int).copied();
        let precision = row.get("precision").and_then(DbValue::as_int).copied();
        let scale = row.get("scale").and_then(DbValue::as_int).copied();

        let mut param = DbParameter::new(name, DbValue::Null).with_direction(if is_output {
            ParameterDirection::InputOutput
        } else {
            ParameterDirection::Input
        });
        param.size = max_length.and_then(|len| size_from_max_length(&type_name, len));
        param.precision = precision.and_then(|p| u8::try_from(p).ok()).filter(|p| *p > 0);
        param.scale = scale.and_then(|s| u8::try_from(s).ok());
        param.db_type = Some(type_name);
        parameters.push(param);
    }
    Ok(parameters)
}

#[async_trait]
impl DbConnection for MssqlConnection {
    fn provider(&self) -> DataProvider {
        DataProvider::SqlServer
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
                DataError::ConnectionError(format!("SQL Server checkout error: {e}"))
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
                "SQL Server transaction already in progress".into(),
            ));
        }
        self.client()?.execute("BEGIN TRANSACTION", &[]).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError(
                "no SQL Server transaction to commit".into(),
            ));
        }
        self.client()?.execute("COMMIT TRANSACTION", &[]).await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DataError> {
        if !self.in_transaction {
            return Err(DataError::ExecutionError(
                "no SQL Server transaction to roll back".into(),
            ));
        }
        self.in_transaction = false;
        self.client()?
            .execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[])
            .await?;
        Ok(())
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
                let (sql, values) = command.bind_text(PlaceholderStyle::AtP);
                with_timeout(timeout, run_sql(client, &sql, &values, mode)).await
            }
            CommandType::TableDirect => {
                let sql = table_direct_sql(&command.command_text)?;
                with_timeout(timeout, run_sql(client, &sql, &[], ExecuteMode::Reader)).await
            }
            CommandType::StoredProcedure => {
                with_timeout(timeout, run_procedure(client, command, mode)).await
            }
        }
    }

    async fn derive_parameters(&mut self, procedure: &str) -> Result<Vec<DbParameter>, DataError> {
        let name = DbValue::Text(procedure.to_string());
        let result = run_sql(
            self.client()?,
            DERIVE_PARAMETERS_SQL,
            std::slice::from_ref(&name),
            ExecuteMode::Reader,
        )
        .await?;
        parameters_from_tables(procedure, &result)
    }
}

impl Drop for MssqlConnection {
    fn drop(&mut self) {
        if self.in_transaction
            && let Some(mut conn) = self.conn.take()
            && let Ok(handle) = Handle::try_current()
        {
            handle.spawn(async move {
                let _ = conn.execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[]).await;
            });
        }
    }
}
