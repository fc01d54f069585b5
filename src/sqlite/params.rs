use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::DataError;
use crate::parameter::{DbParameter, normalize_parameter_name};
use crate::types::DbValue;

/// Convert a single `DbValue` to a rusqlite `Value`.
#[must_use]
pub fn db_value_to_sqlite_value(value: &DbValue) -> Value {
    match value {
        DbValue::Int(i) => Value::Integer(*i),
        DbValue::Float(f) => Value::Real(*f),
        DbValue::Text(s) => Value::Text(s.clone()),
        DbValue::Bool(b) => Value::Integer(i64::from(*b)),
        DbValue::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        DbValue::Null => Value::Null,
        DbValue::Json(jval) => Value::Text(jval.to_string()),
        DbValue::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Bind the command's input parameters to a prepared statement.
///
/// Named markers (`:name`, `@name`, `$name`) bind by name, ignoring case.
/// Anonymous `?` markers take the remaining input parameters in order.
///
/// # Errors
/// Returns `DataError::ParameterError` when a marker has no value.
pub fn bind_parameters(stmt: &mut Statement<'_>, parameters: &[DbParameter]) -> Result<(), DataError> {
    let inputs: Vec<&DbParameter> = parameters
        .iter()
        .filter(|p| p.direction.is_input())
        .collect();
    let mut positional = inputs.iter();

    for idx in 1..=stmt.parameter_count() {
        let marker = stmt.parameter_name(idx).map(str::to_string);
        let param = match marker.as_deref() {
            Some(name) if !name.starts_with('?') => {
                let bare = normalize_parameter_name(name);
                inputs.iter().find(|p| p.matches_name(bare)).ok_or_else(|| {
                    DataError::ParameterError(format!("no value supplied for {name}"))
                })?
            }
            _ => positional.next().ok_or_else(|| {
                DataError::ParameterError(format!("no value supplied for parameter {idx}"))
            })?,
        };
        stmt.raw_bind_parameter(idx, db_value_to_sqlite_value(&param.value))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[test]
    fn timestamps_use_sqlite_text_format() {
        let dt = NaiveDateTime::parse_from_str("2024-05-06 07:08:09", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            db_value_to_sqlite_value(&DbValue::Timestamp(dt)),
            Value::Text("2024-05-06 07:08:09".into())
        );
        assert_eq!(db_value_to_sqlite_value(&DbValue::Bool(true)), Value::Integer(1));
    }

    #[test]
    fn binds_named_and_positional_markers() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let params = vec![DbParameter::new("@b", 2), DbParameter::new("a", 1)];

        let mut stmt = conn.prepare("SELECT :a + 10 * @B").unwrap();
        bind_parameters(&mut stmt, &params).unwrap();
        let mut rows = stmt.raw_query();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.get::<_, i64>(0).unwrap(), 21);
        drop(rows);

        let mut stmt = conn.prepare("SELECT ? - ?").unwrap();
        bind_parameters(&mut stmt, &params).unwrap();
        let mut rows = stmt.raw_query();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.get::<_, i64>(0).unwrap(), 1);
    }

    #[test]
    fn missing_named_value_is_an_error() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT :missing").unwrap();
        let err = bind_parameters(&mut stmt, &[]).unwrap_err();
        assert!(matches!(err, DataError::ParameterError(_)));
    }
}
