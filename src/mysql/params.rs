use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx::types::Json;

use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::provider::command::validate_identifier;
use crate::types::DbValue;

/// Bind a `DbValue` to a MySQL query.
pub fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q DbValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        DbValue::Null => query.bind(None::<String>),
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Int(v) => query.bind(*v),
        DbValue::Float(v) => query.bind(*v),
        DbValue::Text(v) => query.bind(v.as_str()),
        DbValue::Timestamp(v) => query.bind(*v),
        DbValue::Json(v) => query.bind(Json(v)),
        DbValue::Blob(v) => query.bind(v.as_slice()),
    }
}

/// Statements that run a stored procedure through session variables.
///
/// `presets` seed the output variables (with a bound value for input/output
/// parameters), `call_sql` is the `CALL` and `select_sql` reads the output
/// variables back.
#[derive(Debug, Clone, PartialEq)]
pub struct MySqlCall {
    pub presets: Vec<(String, Option<DbValue>)>,
    pub call_sql: String,
    pub call_values: Vec<DbValue>,
    pub select_sql: Option<String>,
}

/// Build the statements for `CALL procedure(...)`.
///
/// # Errors
/// Returns `DataError::ParameterError` for an invalid procedure or parameter name.
pub fn call_statements(
    procedure: &str,
    parameters: &[DbParameter],
) -> Result<MySqlCall, DataError> {
    let procedure = validate_identifier(procedure)?;
    let mut presets = Vec::new();
    let mut args = Vec::new();
    let mut call_values = Vec::new();
    let mut selects = Vec::new();

    for param in parameters {
        let name = param.bare_name();
        match param.direction {
            ParameterDirection::ReturnValue => {}
            ParameterDirection::Input => {
                args.push("?".to_string());
                call_values.push(param.value.clone());
            }
            ParameterDirection::Output | ParameterDirection::InputOutput => {
                validate_identifier(name)?;
                let var = format!("@__p_{name}");
                if param.direction == ParameterDirection::InputOutput {
                    presets.push((format!("SET {var} = ?"), Some(param.value.clone())));
                } else {
                    presets.push((format!("SET {var} = NULL"), None));
                }
                args.push(var.clone());
                selects.push(format!("{var} AS `{}`", name.replace('`', "``")));
            }
        }
    }

    let select_sql = if selects.is_empty() {
        None
    } else {
        Some(format!("SELECT {}", selects.join(", ")))
    };

    Ok(MySqlCall {
        presets,
        call_sql: format!("CALL {procedure}({})", args.join(", ")),
        call_values,
        select_sql,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_uses_session_variables_for_outputs() {
        let params = vec![
            DbParameter::new("customer", 3),
            DbParameter::output("total", "decimal"),
            DbParameter::new("counter", 1).with_direction(ParameterDirection::InputOutput),
        ];
        let call = call_statements("shop.order_totals", &params).unwrap();
        assert_eq!(
            call.call_sql,
            "CALL shop.order_totals(?, @__p_total, @__p_counter)"
        );
        assert_eq!(call.call_values, vec![DbValue::Int(3)]);
        assert_eq!(
            call.presets,
            vec![
                ("SET @__p_total = NULL".to_string(), None),
                ("SET @__p_counter = ?".to_string(), Some(DbValue::Int(1))),
            ]
        );
        assert_eq!(
            call.select_sql.as_deref(),
            Some("SELECT @__p_total AS `total`, @__p_counter AS `counter`")
        );
    }

    #[test]
    fn call_without_outputs_has_no_select() {
        let call = call_statements("cleanup", &[]).unwrap();
        assert_eq!(call.call_sql, "CALL cleanup()");
        assert!(call.select_sql.is_none());
        assert!(call.presets.is_empty());
    }
}
