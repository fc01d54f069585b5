use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DataError;

/// Values that can be stored in a database row or bound as command parameters.
///
/// The same enum is shared by every provider so factory and cache code never
/// branches on driver types:
/// ```rust
/// use sql_data_factory::prelude::*;
///
/// let values = vec![
///     DbValue::Int(1),
///     DbValue::Text("alice".into()),
///     DbValue::Bool(true),
/// ];
/// # let _ = values;
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DbValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    #[default]
    Null,
    /// JSON value
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl DbValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let DbValue::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let DbValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let DbValue::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let DbValue::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            DbValue::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            DbValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let DbValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Convert into a JSON value for dynamic row mapping.
    ///
    /// Timestamps render as ISO-8601 without offset, which is the format
    /// `chrono::NaiveDateTime` deserializes from. Blobs become arrays of bytes.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            DbValue::Int(i) => JsonValue::from(*i),
            DbValue::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(JsonValue::Null, JsonValue::Number),
            DbValue::Text(s) => JsonValue::String(s.clone()),
            DbValue::Bool(b) => JsonValue::Bool(*b),
            DbValue::Timestamp(dt) => {
                JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            DbValue::Null => JsonValue::Null,
            DbValue::Json(v) => v.clone(),
            DbValue::Blob(bytes) => {
                JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect())
            }
        }
    }
}

impl From<i64> for DbValue {
    fn from(value: i64) -> Self {
        DbValue::Int(value)
    }
}

impl From<i32> for DbValue {
    fn from(value: i32) -> Self {
        DbValue::Int(i64::from(value))
    }
}

impl From<f64> for DbValue {
    fn from(value: f64) -> Self {
        DbValue::Float(value)
    }
}

impl From<bool> for DbValue {
    fn from(value: bool) -> Self {
        DbValue::Bool(value)
    }
}

impl From<&str> for DbValue {
    fn from(value: &str) -> Self {
        DbValue::Text(value.to_string())
    }
}

impl From<String> for DbValue {
    fn from(value: String) -> Self {
        DbValue::Text(value)
    }
}

impl From<NaiveDateTime> for DbValue {
    fn from(value: NaiveDateTime) -> Self {
        DbValue::Timestamp(value)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(value: Vec<u8>) -> Self {
        DbValue::Blob(value)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(DbValue::Null, Into::into)
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Int(i) => write!(f, "{i}"),
            DbValue::Float(v) => write!(f, "{v}"),
            DbValue::Text(s) => f.write_str(s),
            DbValue::Bool(b) => write!(f, "{b}"),
            DbValue::Timestamp(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            DbValue::Null => Ok(()),
            DbValue::Json(v) => write!(f, "{v}"),
            DbValue::Blob(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
        }
    }
}

/// The data source providers the factory can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum DataProvider {
    /// SQL Server (tiberius)
    #[value(alias = "mssql")]
    SqlServer,
    /// Oracle; no driver is compiled in
    Oracle,
    /// `MySQL` (sqlx)
    #[value(name = "mysql")]
    MySql,
    /// `PostgreSQL` (tokio-postgres)
    #[value(name = "postgresql", alias = "postgres")]
    PostgreSql,
    /// `SQLite` (rusqlite)
    Sqlite,
}

impl DataProvider {
    /// Name used in cache keys and log output.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DataProvider::SqlServer => "SqlServer",
            DataProvider::Oracle => "Oracle",
            DataProvider::MySql => "MySQL",
            DataProvider::PostgreSql => "PostgreSQL",
            DataProvider::Sqlite => "SQLite",
        }
    }

    /// Whether the provider supports local transactions.
    #[must_use]
    pub fn supports_transactions(self) -> bool {
        true
    }

    /// Whether the provider exposes stored procedures.
    #[must_use]
    pub fn supports_stored_procedures(self) -> bool {
        !matches!(self, DataProvider::Sqlite)
    }

    /// Whether a driver for this provider is compiled into the current build.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            DataProvider::SqlServer => cfg!(feature = "mssql"),
            DataProvider::Oracle => false,
            DataProvider::MySql => cfg!(feature = "mysql"),
            DataProvider::PostgreSql => cfg!(feature = "postgres"),
            DataProvider::Sqlite => cfg!(feature = "sqlite"),
        }
    }
}

impl fmt::Display for DataProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataProvider {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlserver" | "mssql" | "sqlclient" => Ok(DataProvider::SqlServer),
            "oracle" => Ok(DataProvider::Oracle),
            "mysql" => Ok(DataProvider::MySql),
            "postgresql" | "postgres" | "pg" | "npgsql" => Ok(DataProvider::PostgreSql),
            "sqlite" | "sqlite3" => Ok(DataProvider::Sqlite),
            other => Err(DataError::ConfigError(format!(
                "unknown data provider: {other}"
            ))),
        }
    }
}

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommandType {
    /// SQL text
    #[default]
    Text,
    /// Stored procedure (or function) name
    StoredProcedure,
    /// Table name; every row of the table is returned
    TableDirect,
}

/// Connection state to leave behind once a command completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecutingConnectionState {
    /// Keep the connection open for further commands.
    KeepOpen,
    /// Close the connection after the command.
    #[default]
    CloseOnExit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_match_cache_key_format() {
        assert_eq!(DataProvider::SqlServer.to_string(), "SqlServer");
        assert_eq!(DataProvider::PostgreSql.to_string(), "PostgreSQL");
        assert_eq!(DataProvider::MySql.to_string(), "MySQL");
        assert_eq!(DataProvider::Sqlite.to_string(), "SQLite");
    }

    #[test]
    fn provider_parses_aliases() {
        assert_eq!("mssql".parse::<DataProvider>().ok(), Some(DataProvider::SqlServer));
        assert_eq!("Postgres".parse::<DataProvider>().ok(), Some(DataProvider::PostgreSql));
        assert_eq!("SQLite".parse::<DataProvider>().ok(), Some(DataProvider::Sqlite));
        assert!("db2".parse::<DataProvider>().is_err());
    }

    #[test]
    fn provider_value_enum_accepts_lowercase_names() {
        let parsed = DataProvider::from_str_value("postgres");
        assert_eq!(parsed, Some(DataProvider::PostgreSql));
    }

    impl DataProvider {
        fn from_str_value(s: &str) -> Option<Self> {
            <DataProvider as ValueEnum>::from_str(s, true).ok()
        }
    }

    #[test]
    fn json_conversion_handles_timestamps_and_blobs() {
        let dt = NaiveDateTime::parse_from_str("2024-01-02 03:04:05", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        assert_eq!(
            DbValue::Timestamp(dt).to_json(),
            JsonValue::String("2024-01-02T03:04:05".into())
        );
        assert_eq!(
            DbValue::Blob(vec![1, 2]).to_json(),
            serde_json::json!([1, 2])
        );
        assert_eq!(DbValue::Float(f64::NAN).to_json(), JsonValue::Null);
    }

    #[test]
    fn bool_accessor_accepts_integer_flags() {
        assert_eq!(DbValue::Int(1).as_bool(), Some(&true));
        assert_eq!(DbValue::Int(0).as_bool(), Some(&false));
        assert_eq!(DbValue::Int(7).as_bool(), None);
    }
}
