use std::time::Duration;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::connection_string::DEFAULT_TIMEOUT;
use crate::error::DataError;
use crate::parameter::{DbParameter, ParameterDirection, find_parameter_mut};
use crate::results::DataTable;
use crate::types::{CommandType, DbValue};

lazy_static! {
    static ref NAMED_MARKER: Regex =
        Regex::new(r"\B@([A-Za-z_][A-Za-z0-9_]*)\b").expect("named marker regex");
    static ref IDENTIFIER: Regex = Regex::new(
        r#"^(?:[A-Za-z_][A-Za-z0-9_$#]*|\[[^\]]+\]|"[^"]+"|`[^`]+`)(?:\.(?:[A-Za-z_][A-Za-z0-9_$#]*|\[[^\]]+\]|"[^"]+"|`[^`]+`)){0,2}$"#
    )
    .expect("identifier regex");
}

/// What the caller wants back from a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecuteMode {
    /// Rows affected only.
    NonQuery,
    /// First column of the first row.
    Scalar,
    /// Every result set.
    Reader,
}

/// Placeholder syntax a driver expects for positional binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (tokio-postgres)
    Dollar,
    /// `@P1`, `@P2`, ... (tiberius)
    AtP,
    /// `?` bound in order of appearance (MySQL)
    Question,
}

/// Outcome of one command.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub tables: Vec<DataTable>,
    pub rows_affected: u64,
}

impl CommandResult {
    #[must_use]
    pub fn scalar(&self) -> DbValue {
        self.tables
            .first()
            .and_then(DataTable::first_value)
            .cloned()
            .unwrap_or(DbValue::Null)
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(DataTable::len).sum()
    }
}

/// A command: text, how to interpret it, and its parameters.
#[derive(Debug, Clone)]
pub struct DbCommand {
    pub command_text: String,
    pub command_type: CommandType,
    pub parameters: Vec<DbParameter>,
    pub command_timeout: Duration,
}

impl Default for DbCommand {
    fn default() -> Self {
        Self {
            command_text: String::new(),
            command_type: CommandType::Text,
            parameters: Vec::new(),
            command_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DbCommand {
    pub fn new(command_text: impl Into<String>, command_type: CommandType) -> Self {
        Self {
            command_text: command_text.into(),
            command_type,
            ..Self::default()
        }
    }

    /// Append a parameter and return its index.
    pub fn add_parameter(&mut self, parameter: DbParameter) -> usize {
        self.parameters.push(parameter);
        self.parameters.len() - 1
    }

    /// Build an input parameter without adding it.
    pub fn create_parameter(&self, name: impl Into<String>, value: impl Into<DbValue>) -> DbParameter {
        DbParameter::new(name, value)
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Parameters whose value goes to the server.
    pub fn input_parameters(&self) -> impl Iterator<Item = &DbParameter> {
        self.parameters.iter().filter(|p| p.direction.is_input())
    }

    /// Parameters written back after execution.
    pub fn output_parameters(&self) -> impl Iterator<Item = &DbParameter> {
        self.parameters.iter().filter(|p| p.is_output())
    }

    #[must_use]
    pub fn has_output_parameters(&self) -> bool {
        self.parameters.iter().any(DbParameter::is_output)
    }

    /// Store a value returned by the server into the matching output parameter.
    pub fn set_output_value(&mut self, name: &str, value: DbValue) {
        if let Some(p) = find_parameter_mut(&mut self.parameters, name)
            && p.is_output()
        {
            p.value = value;
        }
    }

    /// Store the procedure return value, if the command declares one.
    pub fn set_return_value(&mut self, value: DbValue) {
        if let Some(p) = self
            .parameters
            .iter_mut()
            .find(|p| p.direction == ParameterDirection::ReturnValue)
        {
            p.value = value;
        }
    }

    /// Rewrite `@name` markers into the driver's positional placeholders.
    ///
    /// Returns the rewritten text and the values to bind. Markers that name no
    /// input parameter are left alone. When no marker matches, parameters bind
    /// positionally in declaration order.
    #[must_use]
    pub fn bind_text(&self, style: PlaceholderStyle) -> (String, Vec<DbValue>) {
        let inputs: Vec<&DbParameter> = self.input_parameters().collect();
        if inputs.is_empty() {
            return (self.command_text.clone(), Vec::new());
        }

        // Positional styles number parameters by first reference, so inputs
        // the text never mentions are not bound.
        let mut referenced: Vec<usize> = Vec::new();
        let mut appearance: Vec<DbValue> = Vec::new();
        let text = NAMED_MARKER.replace_all(&self.command_text, |caps: &Captures| {
            let name = &caps[1];
            let Some(idx) = inputs
                .iter()
                .position(|p| !p.bare_name().is_empty() && p.matches_name(name))
            else {
                return caps[0].to_string();
            };
            let slot = referenced.iter().position(|i| *i == idx).unwrap_or_else(|| {
                referenced.push(idx);
                referenced.len() - 1
            });
            match style {
                PlaceholderStyle::Dollar => format!("${}", slot + 1),
                PlaceholderStyle::AtP => format!("@P{}", slot + 1),
                PlaceholderStyle::Question => {
                    appearance.push(inputs[idx].value.clone());
                    "?".to_string()
                }
            }
        });

        if referenced.is_empty() {
            let declared = inputs.iter().map(|p| p.value.clone()).collect();
            return (self.command_text.clone(), declared);
        }
        let values = match style {
            PlaceholderStyle::Question => appearance,
            PlaceholderStyle::Dollar | PlaceholderStyle::AtP => referenced
                .iter()
                .map(|i| inputs[*i].value.clone())
                .collect(),
        };
        (text.into_owned(), values)
    }
}

/// Reject procedure and table names that are not plain (optionally qualified
/// and quoted) identifiers.
///
/// # Errors
/// Returns `DataError::ParameterError` for anything else.
pub fn validate_identifier(name: &str) -> Result<&str, DataError> {
    let trimmed = name.trim();
    if IDENTIFIER.is_match(trimmed) {
        Ok(trimmed)
    } else {
        Err(DataError::ParameterError(format!(
            "`{name}` is not a valid object name"
        )))
    }
}

/// `SELECT * FROM <table>` for `CommandType::TableDirect`.
///
/// # Errors
/// Returns `DataError::ParameterError` when the table name is not an identifier.
pub fn table_direct_sql(table: &str) -> Result<String, DataError> {
    Ok(format!("SELECT * FROM {}", validate_identifier(table)?))
}

/// Run `fut` under the command timeout.
///
/// # Errors
/// Returns `DataError::Timeout` when the deadline passes, otherwise the
/// future's own result.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, DataError>
where
    F: std::future::Future<Output = Result<T, DataError>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DataError::Timeout(timeout))?
}
