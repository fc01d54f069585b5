use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use tokio_postgres::Statement;

use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::provider::command::validate_identifier;
use crate::results::DataTable;
use crate::types::DbValue;

/// Parameters of a function, first overload only.
pub(crate) const DERIVE_PARAMETERS_SQL: &str = "\
SELECT r.specific_name::text, p.parameter_name::text, p.parameter_mode::text, \
       p.data_type::text, p.character_maximum_length::int4, \
       p.numeric_precision::int4, p.numeric_scale::int4, p.ordinal_position::int4 \
FROM information_schema.routines r \
LEFT JOIN information_schema.parameters p \
       ON p.specific_schema = r.specific_schema AND p.specific_name = r.specific_name \
WHERE r.routine_schema::text = COALESCE($1::text, current_schema()::text) \
  AND r.routine_name::text = $2::text \
ORDER BY r.specific_name, p.ordinal_position";

/// Extracts a `DbValue` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `DataError` if the column cannot be retrieved.
pub fn postgres_extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<DbValue, DataError> {
    let type_info = row.columns()[idx].type_();

    match type_info.name() {
        "int2" => {
            let val: Option<i16> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))))
        }
        "int4" => {
            let val: Option<i32> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))))
        }
        "int8" => {
            let val: Option<i64> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, DbValue::Int))
        }
        "float4" => {
            let val: Option<f32> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, |v| DbValue::Float(f64::from(v))))
        }
        "float8" => {
            let val: Option<f64> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, DbValue::Float))
        }
        "bool" => {
            let val: Option<bool> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, DbValue::Bool))
        }
        "timestamp" => {
            let val: Option<NaiveDateTime> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, DbValue::Timestamp))
        }
        "timestamptz" => {
            let val: Option<chrono::DateTime<chrono::Utc>> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, |v| DbValue::Timestamp(v.naive_utc())))
        }
        "date" => {
            let val: Option<NaiveDate> = row.try_get(idx)?;
            Ok(val
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map_or(DbValue::Null, DbValue::Timestamp))
        }
        "json" | "jsonb" => {
            let val: Option<Value> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, DbValue::Json))
        }
        "bytea" => {
            let val: Option<Vec<u8>> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, DbValue::Blob))
        }
        _ => {
            // text, varchar, bpchar, name and anything else with a text form
            let val: Option<String> = row.try_get(idx)?;
            Ok(val.map_or(DbValue::Null, DbValue::Text))
        }
    }
}

/// Build a table using statement metadata for column names.
///
/// # Errors
/// Returns errors from row value extraction.
pub fn build_table_from_rows(
    stmt: &Statement,
    rows: &[tokio_postgres::Row],
) -> Result<DataTable, DataError> {
    let column_names: Vec<String> = stmt
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let column_count = column_names.len();

    let mut table = DataTable::with_capacity(rows.len());
    table.set_column_names(Arc::new(column_names));

    for row in rows {
        let mut values = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            values.push(postgres_extract_value(row, idx)?);
        }
        table.add_row_values(values);
    }

    Ok(table)
}

/// `SELECT * FROM fn(name => $1, ...)` for a stored-procedure command.
///
/// Unnamed parameters are passed positionally. Returns the SQL and the values
/// to bind.
///
/// # Errors
/// Returns `DataError::ParameterError` for an invalid function or parameter name.
pub fn function_call_sql(
    function: &str,
    parameters: &[DbParameter],
) -> Result<(String, Vec<DbValue>), DataError> {
    let function = validate_identifier(function)?;
    let mut args = Vec::new();
    let mut values = Vec::new();
    for p in parameters.iter().filter(|p| p.direction.is_input()) {
        values.push(p.value.clone());
        let placeholder = format!("${}", values.len());
        let name = p.bare_name();
        // unnamed arguments come back from discovery as `$n`
        if name.is_empty() || name.chars().all(|c| c.is_ascii_digit()) {
            args.push(placeholder);
        } else {
            args.push(format!("{} => {placeholder}", validate_identifier(name)?));
        }
    }
    Ok((format!("SELECT * FROM {function}({})", args.join(", ")), values))
}

/// Split `schema.function` into its parts.
pub(crate) fn split_routine_name(name: &str) -> (Option<String>, String) {
    let unquote = |s: &str| s.trim().trim_matches('"').to_string();
    match name.rsplit_once('.') {
        Some((schema, routine)) => (Some(unquote(schema)), unquote(routine)),
        None => (None, unquote(name)),
    }
}

/// Turn `DERIVE_PARAMETERS_SQL` rows into a signature.
///
/// # Errors
/// Returns `DataError::ExecutionError` when the routine does not exist.
pub(crate) fn parameters_from_rows(
    routine: &str,
    rows: &[tokio_postgres::Row],
) -> Result<Vec<DbParameter>, DataError> {
    let Some(first) = rows.first() else {
        return Err(DataError::ExecutionError(format!(
            "function `{routine}` not found"
        )));
    };
    let specific: Option<String> = first.try_get(0)?;

    let mut parameters = Vec::new();
    for row in rows {
        let row_specific: Option<String> = row.try_get(0)?;
        if row_specific != specific {
            break;
        }
        let mode: Option<String> = row.try_get(2)?;
        let Some(mode) = mode else {
            // routine without parameters
            continue;
        };
        let ordinal: Option<i32> = row.try_get(7)?;
        let name: Option<String> = row.try_get(1)?;
        let direction = match mode.as_str() {
            "OUT" => ParameterDirection::Output,
            "INOUT" => ParameterDirection::InputOutput,
            _ => ParameterDirection::Input,
        };
        let mut param = DbParameter::new(
            name.unwrap_or_else(|| format!("${}", ordinal.unwrap_or_default())),
            DbValue::Null,
        )
        .with_direction(direction);
        param.db_type = row.try_get(3)?;
        param.size = row.try_get(4)?;
        let precision: Option<i32> = row.try_get(5)?;
        let scale: Option<i32> = row.try_get(6)?;
        param.precision = precision.and_then(|p| u8::try_from(p).ok());
        param.scale = scale.and_then(|s| u8::try_from(s).ok());
        parameters.push(param);
    }
    Ok(parameters)
}
