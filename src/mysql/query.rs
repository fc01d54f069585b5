use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Column, Either, Execute, Executor, MySql, Row, TypeInfo, ValueRef};
use tracing::warn;

use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::results::DataTable;
use crate::types::DbValue;

pub(crate) const ROUTINE_EXISTS_SQL: &str = "\
SELECT COUNT(*) AS routine_count FROM information_schema.ROUTINES \
WHERE ROUTINE_SCHEMA = COALESCE(?, DATABASE()) AND ROUTINE_NAME = ? AND ROUTINE_TYPE = 'PROCEDURE'";

pub(crate) const DERIVE_PARAMETERS_SQL: &str = "\
SELECT CAST(PARAMETER_NAME AS CHAR) AS name, CAST(PARAMETER_MODE AS CHAR) AS mode, \
       CAST(DATA_TYPE AS CHAR) AS data_type, \
       CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS max_length, \
       CAST(NUMERIC_PRECISION AS SIGNED) AS num_precision, \
       CAST(NUMERIC_SCALE AS SIGNED) AS num_scale \
FROM information_schema.PARAMETERS \
WHERE SPECIFIC_SCHEMA = COALESCE(?, DATABASE()) AND SPECIFIC_NAME = ? \
  AND ROUTINE_TYPE = 'PROCEDURE' AND ORDINAL_POSITION > 0 \
ORDER BY ORDINAL_POSITION";

/// Run a query and split its output into result sets.
///
/// Rows stream in until the server reports the end of a statement; each
/// report closes the current table. Returns the tables and the summed
/// affected-row count.
///
/// # Errors
/// Returns `DataError` if the query fails or a value cannot be decoded.
pub async fn collect_tables<'q, E>(
    conn: &mut MySqlConnection,
    query: E,
) -> Result<(Vec<DataTable>, u64), DataError>
where
    E: 'q + Execute<'q, MySql>,
{
    let mut tables = Vec::new();
    let mut current: Option<DataTable> = None;
    let mut rows_affected = 0u64;

    let mut stream = conn.fetch_many(query);
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => {
                rows_affected += done.rows_affected();
                if let Some(table) = current.take() {
                    tables.push(table);
                }
            }
            Either::Right(row) => {
                let table = current.get_or_insert_with(|| {
                    let names: Vec<String> =
                        row.columns().iter().map(|c| c.name().to_string()).collect();
                    let mut table = DataTable::with_capacity(16);
                    table.set_column_names(Arc::new(names));
                    table
                });
                let mut values = Vec::with_capacity(row.len());
                for idx in 0..row.len() {
                    values.push(mysql_extract_value(&row, idx)?);
                }
                table.add_row_values(values);
            }
        }
    }
    if let Some(table) = current.take() {
        tables.push(table);
    }
    Ok((tables, rows_affected))
}

/// Extract a value from a MySQL row at a specific index.
///
/// Dispatches on the column's reported type name; DECIMAL is read as text and
/// parsed so no precision feature is required.
///
/// # Errors
/// Returns `DataError::MySqlError` if the value does not decode as its type.
pub fn mysql_extract_value(row: &MySqlRow, idx: usize) -> Result<DbValue, DataError> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(DbValue::Null);
        }
        raw.type_info().name().to_ascii_uppercase()
    };

    let value = match type_name.as_str() {
        "BOOLEAN" => DbValue::Bool(row.try_get::<bool, _>(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            DbValue::Int(row.try_get::<i64, _>(idx)?)
        }
        t if t.ends_with("UNSIGNED") || t == "YEAR" => {
            let v = row.try_get_unchecked::<u64, _>(idx)?;
            i64::try_from(v).map_or(DbValue::Float(v as f64), DbValue::Int)
        }
        "FLOAT" => DbValue::Float(f64::from(row.try_get::<f32, _>(idx)?)),
        "DOUBLE" => DbValue::Float(row.try_get::<f64, _>(idx)?),
        "DECIMAL" => {
            let text = row.try_get_unchecked::<String, _>(idx)?;
            text.parse::<f64>()
                .map_or(DbValue::Text(text), DbValue::Float)
        }
        "DATETIME" | "TIMESTAMP" => DbValue::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)?
            .and_hms_opt(0, 0, 0)
            .map_or(DbValue::Null, DbValue::Timestamp),
        "TIME" => DbValue::Text(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        "JSON" => DbValue::Json(row.try_get::<serde_json::Value, _>(idx)?),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => DbValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        _ => match row.try_get::<String, _>(idx) {
            Ok(text) => DbValue::Text(text),
            Err(_) => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                match String::from_utf8(bytes) {
                    Ok(text) => DbValue::Text(text),
                    Err(e) => {
                        warn!(column = idx, type_name = %type_name, "undecodable MySQL column, returning bytes");
                        DbValue::Blob(e.into_bytes())
                    }
                }
            }
        },
    };
    Ok(value)
}

/// Split `schema.routine`, stripping backticks.
pub(crate) fn split_routine_name(name: &str) -> (Option<String>, String) {
    let unquote = |s: &str| s.trim().trim_matches('`').to_string();
    match name.rsplit_once('.') {
        Some((schema, routine)) => (Some(unquote(schema)), unquote(routine)),
        None => (None, unquote(name)),
    }
}

/// Turn `DERIVE_PARAMETERS_SQL` rows into a signature.
pub(crate) fn parameters_from_table(table: Option<&DataTable>) -> Vec<DbParameter> {
    let Some(table) = table else {
        return Vec::new();
    };
    table
        .rows
        .iter()
        .map(|row| {
            let name = row
                .get("name")
                .and_then(DbValue::as_text)
                .unwrap_or_default()
                .to_string();
            let direction = match row.get("mode").and_then(DbValue::as_text) {
                Some(mode) if mode.eq_ignore_ascii_case("OUT") => ParameterDirection::Output,
                Some(mode) if mode.eq_ignore_ascii_case("INOUT") => {
                    ParameterDirection::InputOutput
                }
                _ => ParameterDirection::Input,
            };
            let mut param = DbParameter::new(name, DbValue::Null).with_direction(direction);
            param.db_type = row
                .get("data_type")
                .and_then(DbValue::as_text)
                .map(str::to_string);
            param.size = row
                .get("max_length")
                .and_then(DbValue::as_int)
                .and_then(|len| i32::try_from(*len).ok());
            param.precision = row
                .get("num_precision")
                .and_then(DbValue::as_int)
                .and_then(|p| u8::try_from(*p).ok());
            param.scale = row
                .get("num_scale")
                .and_then(DbValue::as_int)
                .and_then(|s| u8::try_from(*s).ok());
            param
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_qualified_routine() {
        assert_eq!(
            split_routine_name("`shop`.`order_totals`"),
            (Some("shop".to_string()), "order_totals".to_string())
        );
        assert_eq!(split_routine_name("cleanup"), (None, "cleanup".to_string()));
    }

    #[test]
    fn maps_parameter_modes() {
        let mut table = DataTable::with_capacity(2);
        table.set_column_names(Arc::new(
            ["name", "mode", "data_type", "max_length", "num_precision", "num_scale"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        ));
        table.add_row_values(vec![
            "customer".into(),
            "IN".into(),
            "int".into(),
            DbValue::Null,
            10.into(),
            0.into(),
        ]);
        table.add_row_values(vec![
            "label".into(),
            "INOUT".into(),
            "varchar".into(),
            40.into(),
            DbValue::Null,
            DbValue::Null,
        ]);
        table.add_row_values(vec![
            "total".into(),
            "OUT".into(),
            "decimal".into(),
            DbValue::Null,
            12.into(),
            2.into(),
        ]);

        let params = parameters_from_table(Some(&table));
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].direction, ParameterDirection::Input);
        assert_eq!(params[0].precision, Some(10));
        assert_eq!(params[1].direction, ParameterDirection::InputOutput);
        assert_eq!(params[1].size, Some(40));
        assert_eq!(params[2].direction, ParameterDirection::Output);
        assert_eq!(params[2].db_type.as_deref(), Some("decimal"));
        assert_eq!(params[2].scale, Some(2));
    }
}
