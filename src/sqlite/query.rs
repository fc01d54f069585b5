use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::Value;

use super::params::bind_parameters;
use crate::error::DataError;
use crate::parameter::DbParameter;
use crate::results::DataTable;
use crate::types::DbValue;

/// Extract a `DbValue` from a `SQLite` row.
///
/// # Errors
///
/// Returns `DataError` if the value cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<DbValue, DataError> {
    let value: Value = row.get(idx)?;
    match value {
        Value::Null => Ok(DbValue::Null),
        Value::Integer(i) => Ok(DbValue::Int(i)),
        Value::Real(f) => Ok(DbValue::Float(f)),
        Value::Text(s) => Ok(DbValue::Text(s)),
        Value::Blob(b) => Ok(DbValue::Blob(b)),
    }
}

/// Bind `parameters`, run the statement and collect its rows.
///
/// # Errors
/// Returns `DataError` if binding, stepping or value extraction fails.
pub fn build_table(stmt: &mut Statement<'_>, parameters: &[DbParameter]) -> Result<DataTable, DataError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    bind_parameters(stmt, parameters)?;

    let mut table = DataTable::with_capacity(16);
    table.set_column_names(Arc::new(column_names));

    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            values.push(sqlite_extract_value_sync(row, i)?);
        }
        table.add_row_values(values);
    }

    Ok(table)
}
