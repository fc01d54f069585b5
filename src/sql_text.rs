//! Literal SQL renderings of commands, for logs and ad-hoc `exec` text.
//!
//! These strings inline parameter values; they are meant for debugging and
//! for SQL Server `exec` batches built from trusted values, never for
//! executing user input.

use std::fmt::Write as _;

use regex::{NoExpand, Regex};

use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection};
use crate::provider::{DbCommand, validate_identifier};
use crate::types::{CommandType, DataProvider, DbValue};

/// Literal for a parameter value.
///
/// NULL stays bare, text and timestamps are single-quoted with quotes doubled,
/// booleans become `1`/`0`, numbers use their invariant form.
#[must_use]
pub fn parameter_value_for_sql(parameter: &DbParameter) -> String {
    let quoted_type = parameter.db_type.as_deref().is_some_and(is_quoted_type);
    match &parameter.value {
        DbValue::Null => "NULL".to_string(),
        DbValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        DbValue::Int(v) if quoted_type => quote(&v.to_string()),
        DbValue::Int(v) => v.to_string(),
        DbValue::Float(v) if quoted_type => quote(&v.to_string()),
        DbValue::Float(v) => v.to_string(),
        DbValue::Text(v) => quote(v),
        DbValue::Timestamp(v) => quote(&v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        DbValue::Json(v) => quote(&v.to_string()),
        DbValue::Blob(bytes) => {
            let mut hex = String::with_capacity(2 + bytes.len() * 2);
            hex.push_str("0x");
            for b in bytes {
                let _ = write!(hex, "{b:02X}");
            }
            hex
        }
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn is_quoted_type(db_type: &str) -> bool {
    let t = db_type.to_ascii_lowercase();
    ["char", "text", "xml", "date", "time", "uuid", "uniqueidentifier"]
        .iter()
        .any(|k| t.contains(k))
}

/// Debug SQL for `command` as it would run on `provider`.
///
/// Text commands get their `@name` markers replaced with literals. Stored
/// procedures render the provider's call form; for SQL Server that is a
/// `declare`/`exec`/`select` script that also shows the output values.
#[must_use]
pub fn command_as_sql(command: &DbCommand, provider: DataProvider) -> String {
    match command.command_type {
        CommandType::Text => text_as_sql(command),
        CommandType::TableDirect => format!("SELECT * FROM {};\n", command.command_text),
        CommandType::StoredProcedure => procedure_as_sql(command, provider),
    }
}

fn text_as_sql(command: &DbCommand) -> String {
    let mut query = command.command_text.clone();
    for param in &command.parameters {
        let name = param.bare_name();
        if name.is_empty() {
            continue;
        }
        let Ok(marker) = Regex::new(&format!(r"(?i)\B@{}\b", regex::escape(name))) else {
            continue;
        };
        let literal = parameter_value_for_sql(param);
        query = marker.replace_all(&query, NoExpand(&literal)).into_owned();
    }
    query.push('\n');
    query
}

fn procedure_as_sql(command: &DbCommand, provider: DataProvider) -> String {
    let procedure = &command.command_text;
    let inputs = || {
        command
            .parameters
            .iter()
            .filter(|p| p.direction != ParameterDirection::ReturnValue)
    };
    match provider {
        DataProvider::SqlServer => sql_server_script(command),
        DataProvider::PostgreSql => {
            let args: Vec<String> = inputs()
                .filter(|p| p.direction.is_input())
                .map(|p| format!("{} => {}", p.bare_name(), parameter_value_for_sql(p)))
                .collect();
            format!("SELECT * FROM {procedure}({});\n", args.join(", "))
        }
        DataProvider::MySql => {
            let args: Vec<String> = inputs()
                .map(|p| match p.direction {
                    ParameterDirection::Input => parameter_value_for_sql(p),
                    _ => format!("@{}", p.bare_name()),
                })
                .collect();
            format!("CALL {procedure}({});\n", args.join(", "))
        }
        DataProvider::Oracle => {
            let args: Vec<String> = inputs()
                .map(|p| format!("{} => {}", p.bare_name(), parameter_value_for_sql(p)))
                .collect();
            format!("BEGIN {procedure}({}); END;\n", args.join(", "))
        }
        DataProvider::Sqlite => String::new(),
    }
}

fn sql_server_script(command: &DbCommand) -> String {
    let mut sql = String::from("declare @return_value int;\n");
    let outputs: Vec<&DbParameter> = command
        .parameters
        .iter()
        .filter(|p| {
            matches!(
                p.direction,
                ParameterDirection::Output | ParameterDirection::InputOutput
            )
        })
        .collect();

    for p in &outputs {
        let initial = if p.direction == ParameterDirection::Output {
            "null".to_string()
        } else {
            parameter_value_for_sql(p)
        };
        let _ = writeln!(
            sql,
            "declare @{} {} = {initial};",
            p.bare_name(),
            p.db_type.as_deref().unwrap_or("sql_variant")
        );
    }

    let _ = writeln!(sql, "exec @return_value = [{}]", command.command_text);
    let mut first = true;
    for p in command
        .parameters
        .iter()
        .filter(|p| p.direction != ParameterDirection::ReturnValue)
    {
        sql.push_str(if first { "\t" } else { "\t, " });
        first = false;
        let name = p.bare_name();
        if p.direction == ParameterDirection::Input {
            let _ = writeln!(sql, "@{name} = {}", parameter_value_for_sql(p));
        } else {
            let _ = writeln!(sql, "@{name} = @{name} output");
        }
    }
    sql.push_str(";\n");
    sql.push_str("select 'Return Value' = convert(varchar, @return_value);\n");
    for p in &outputs {
        let name = p.bare_name();
        let _ = writeln!(sql, "select '@{name}' = convert(varchar, @{name});");
    }
    sql
}

/// `exec procedure @a='x', @b='y';` with every value quoted as text.
///
/// # Errors
/// Returns `DataError::ParameterError` for an invalid procedure name.
pub fn build_exec_text(procedure: &str, parameters: &[DbParameter]) -> Result<String, DataError> {
    let procedure = validate_identifier(procedure)?;
    if parameters.is_empty() {
        return Ok(format!("exec {procedure};"));
    }
    let args: Vec<String> = parameters
        .iter()
        .map(|p| {
            let value = match &p.value {
                DbValue::Null => "NULL".to_string(),
                DbValue::Text(text) => quote(text),
                other => quote(&other.to_string()),
            };
            format!("@{}={value}", p.bare_name())
        })
        .collect();
    Ok(format!("exec {procedure} {};", args.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn renders_literals() {
        assert_eq!(parameter_value_for_sql(&DbParameter::new("a", DbValue::Null)), "NULL");
        assert_eq!(parameter_value_for_sql(&DbParameter::new("a", "O'Brien")), "'O''Brien'");
        assert_eq!(parameter_value_for_sql(&DbParameter::new("a", true)), "1");
        assert_eq!(parameter_value_for_sql(&DbParameter::new("a", 2.5)), "2.5");
        assert_eq!(
            parameter_value_for_sql(&DbParameter::new("a", 7).with_db_type("nvarchar")),
            "'7'"
        );
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            parameter_value_for_sql(&DbParameter::new("a", ts)),
            "'2024-03-01 08:30:00'"
        );
        assert_eq!(
            parameter_value_for_sql(&DbParameter::new("a", vec![0xAB_u8, 0x01])),
            "0xAB01"
        );
    }

    #[test]
    fn text_command_substitutes_markers() {
        let mut cmd = DbCommand::new(
            "select * from t where id = @id and name = @name and ids = @id",
            CommandType::Text,
        );
        cmd.add_parameter(DbParameter::new("@id", 3));
        cmd.add_parameter(DbParameter::new("name", "x"));
        assert_eq!(
            command_as_sql(&cmd, DataProvider::Sqlite),
            "select * from t where id = 3 and name = 'x' and ids = 3\n"
        );
    }

    #[test]
    fn sql_server_procedure_script() {
        let mut cmd = DbCommand::new("dbo.Totals", CommandType::StoredProcedure);
        cmd.add_parameter(
            DbParameter::output("@RETURN_VALUE", "int")
                .with_direction(ParameterDirection::ReturnValue),
        );
        cmd.add_parameter(DbParameter::new("@Customer", 7));
        cmd.add_parameter(DbParameter::output("@Total", "decimal(18,2)"));
        assert_eq!(
            command_as_sql(&cmd, DataProvider::SqlServer),
            "declare @return_value int;\n\
             declare @Total decimal(18,2) = null;\n\
             exec @return_value = [dbo.Totals]\n\
             \t@Customer = 7\n\
             \t, @Total = @Total output\n\
             ;\n\
             select 'Return Value' = convert(varchar, @return_value);\n\
             select '@Total' = convert(varchar, @Total);\n"
        );
    }

    #[test]
    fn exec_text_quotes_every_value() {
        let params = vec![DbParameter::new("@a", "x'y"), DbParameter::new("b", 2)];
        assert_eq!(
            build_exec_text("dbo.Run", &params).unwrap(),
            "exec dbo.Run @a='x''y', @b='2';"
        );
        assert_eq!(build_exec_text("dbo.Run", &[]).unwrap(), "exec dbo.Run;");
        assert!(build_exec_text("dbo.Run; drop", &[]).is_err());
    }
}
