use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_util::TryStreamExt;
use tiberius::numeric::Numeric;
use tiberius::{QueryItem, QueryStream, Uuid};
use tracing::warn;

use super::params::sql_type_declaration;
use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::provider::command::validate_identifier;
use crate::results::DataTable;
use crate::types::DbValue;

/// Column holding the procedure return value in the trailing output select.
pub(crate) const RETURN_VALUE_COLUMN: &str = "RETURN_VALUE";

pub(crate) const DERIVE_PARAMETERS_SQL: &str = "\
SELECT CAST(OBJECT_ID(@P1) AS int) AS object_id; \
SELECT p.name, TYPE_NAME(p.user_type_id) AS type_name, CAST(p.max_length AS int) AS max_length, \
       CAST(p.precision AS int) AS precision, CAST(p.scale AS int) AS scale, p.is_output \
FROM sys.parameters p \
WHERE p.object_id = OBJECT_ID(@P1) \
ORDER BY p.parameter_id;";

/// Collect every result set of a tiberius stream.
///
/// # Errors
/// Returns `DataError` if fetching or value extraction fails.
pub async fn collect_tables(mut stream: QueryStream<'_>) -> Result<Vec<DataTable>, DataError> {
    let mut tables: Vec<DataTable> = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let names: Vec<String> = meta
                    .columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect();
                let mut table = DataTable::with_capacity(16);
                table.set_column_names(Arc::new(names));
                tables.push(table);
            }
            QueryItem::Row(row) => {
                let Some(table) = tables.last_mut() else {
                    continue;
                };
                let mut values = Vec::with_capacity(row.len());
                for idx in 0..row.len() {
                    values.push(extract_value(&row, idx)?);
                }
                table.add_row_values(values);
            }
        }
    }
    Ok(tables)
}

/// Extract a value from a row at a specific index
///
/// tiberius only converts a column into the Rust type matching its wire type,
/// so each candidate type is tried in turn; a NULL of the matching type stops
/// the search.
///
/// # Errors
/// Currently infallible; unknown column types become `DbValue::Null`.
pub fn extract_value(row: &tiberius::Row, idx: usize) -> Result<DbValue, DataError> {
    macro_rules! try_column {
        ($ty:ty, $map:expr) => {
            match row.try_get::<$ty, _>(idx) {
                Ok(Some(val)) => return Ok($map(val)),
                Ok(None) => return Ok(DbValue::Null),
                Err(_) => {}
            }
        };
    }

    try_column!(i64, DbValue::Int);
    try_column!(i32, |v: i32| DbValue::Int(i64::from(v)));
    try_column!(i16, |v: i16| DbValue::Int(i64::from(v)));
    try_column!(u8, |v: u8| DbValue::Int(i64::from(v)));
    try_column!(f64, DbValue::Float);
    try_column!(f32, |v: f32| DbValue::Float(f64::from(v)));
    try_column!(Numeric, |v: Numeric| DbValue::Float(f64::from(v)));
    try_column!(bool, DbValue::Bool);
    try_column!(NaiveDateTime, DbValue::Timestamp);
    try_column!(DateTime<Utc>, |v: DateTime<Utc>| DbValue::Timestamp(v.naive_utc()));
    try_column!(NaiveDate, |v: NaiveDate| {
        v.and_hms_opt(0, 0, 0)
            .map_or(DbValue::Null, DbValue::Timestamp)
    });
    try_column!(&str, |v: &str| DbValue::Text(v.to_string()));
    try_column!(Uuid, |v: Uuid| DbValue::Text(v.to_string()));
    try_column!(&[u8], |v: &[u8]| DbValue::Blob(v.to_vec()));

    warn!(
        column = %row.columns()[idx].name(),
        "unsupported SQL Server column type, returning NULL"
    );
    Ok(DbValue::Null)
}

/// T-SQL batch for a stored-procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureBatch {
    pub sql: String,
    pub values: Vec<DbValue>,
    /// The batch ends with a select of the return value and output variables.
    pub selects_outputs: bool,
}

/// Build the batch that executes `procedure` with `parameters`.
///
/// Output and input/output parameters go through declared variables; a
/// trailing `SELECT` returns them with the procedure's return value:
/// ```text
/// DECLARE @__rv int;
/// DECLARE @__o1 int;
/// EXEC @__rv = dbo.Totals @Customer = @P1, @Total = @__o1 OUTPUT;
/// SELECT @__rv AS [RETURN_VALUE], @__o1 AS [Total];
/// ```
///
/// # Errors
/// Returns `DataError::ParameterError` for an invalid procedure, parameter
/// or type name.
pub fn procedure_batch(
    procedure: &str,
    parameters: &[DbParameter],
) -> Result<ProcedureBatch, DataError> {
    let procedure = validate_identifier(procedure)?;
    let selects_outputs = parameters.iter().any(DbParameter::is_output);

    let mut sql = String::new();
    let mut values = Vec::new();
    let mut args = Vec::new();
    let mut selects = vec![format!("@__rv AS [{RETURN_VALUE_COLUMN}]")];

    if selects_outputs {
        sql.push_str("DECLARE @__rv int;\n");
    }

    for (i, param) in parameters.iter().enumerate() {
        let name = param.bare_name();
        if !name.is_empty() {
            validate_identifier(name)?;
        }
        match param.direction {
            ParameterDirection::ReturnValue => {}
            ParameterDirection::Input => {
                values.push(param.value.clone());
                let placeholder = format!("@P{}", values.len());
                if name.is_empty() {
                    args.push(placeholder);
                } else {
                    args.push(format!("@{name} = {placeholder}"));
                }
            }
            ParameterDirection::Output | ParameterDirection::InputOutput => {
                let var = format!("@__o{}", i + 1);
                sql.push_str(&format!("DECLARE {var} {};\n", sql_type_declaration(param)?));
                if param.direction == ParameterDirection::InputOutput {
                    values.push(param.value.clone());
                    sql.push_str(&format!("SET {var} = @P{};\n", values.len()));
                }
                args.push(format!("@{name} = {var} OUTPUT"));
                selects.push(format!("{var} AS [{}]", name.replace(']', "]]")));
            }
        }
    }

    if selects_outputs {
        sql.push_str(&format!("EXEC @__rv = {procedure}"));
    } else {
        sql.push_str(&format!("EXEC {procedure}"));
    }
    if !args.is_empty() {
        sql.push(' ');
        sql.push_str(&args.join(", "));
    }
    sql.push(';');
    if selects_outputs {
        sql.push_str(&format!("\nSELECT {};", selects.join(", ")));
    }

    Ok(ProcedureBatch {
        sql,
        values,
        selects_outputs,
    })
}
