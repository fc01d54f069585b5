use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection_string::ConnectionStringBuilder;
use crate::error::DataError;
use crate::types::DataProvider;

pub const ENV_CONNECTION_STRING: &str = "DATA_FACTORY_CONNECTION_STRING";
pub const ENV_PROVIDER: &str = "DATA_FACTORY_PROVIDER";
pub const ENV_PARAMETER_CACHE: &str = "DATA_FACTORY_PARAMETER_CACHE";
pub const ENV_PROFILING: &str = "DATA_FACTORY_PROFILING";

fn default_true() -> bool {
    true
}

/// Settings for one data source.
///
/// `parameter_cache` controls whether discovered stored-procedure signatures
/// are reused; `profiling` wraps every connection in the registered profiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSetting {
    pub connection_string: String,
    pub provider: DataProvider,
    #[serde(default = "default_true")]
    pub parameter_cache: bool,
    #[serde(default)]
    pub profiling: bool,
    /// Overrides the timeout taken from the connection string.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

impl DatabaseSetting {
    pub fn new(connection_string: impl Into<String>, provider: DataProvider) -> Self {
        Self {
            connection_string: connection_string.into(),
            provider,
            parameter_cache: true,
            profiling: false,
            command_timeout_secs: None,
        }
    }

    #[must_use]
    pub fn with_parameter_cache(mut self, enabled: bool) -> Self {
        self.parameter_cache = enabled;
        self
    }

    #[must_use]
    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Build settings from `DATA_FACTORY_*` environment variables.
    ///
    /// # Errors
    /// Returns `DataError::ConfigError` when the connection string or provider
    /// is missing, or a flag is not a boolean.
    pub fn from_env() -> Result<Self, DataError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, DataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection_string = lookup(ENV_CONNECTION_STRING).ok_or_else(|| {
            DataError::ConfigError(format!("{ENV_CONNECTION_STRING} is not set"))
        })?;
        let provider = lookup(ENV_PROVIDER)
            .ok_or_else(|| DataError::ConfigError(format!("{ENV_PROVIDER} is not set")))?
            .parse::<DataProvider>()?;

        let mut setting = Self::new(connection_string, provider);
        if let Some(v) = lookup(ENV_PARAMETER_CACHE) {
            setting.parameter_cache = parse_flag(ENV_PARAMETER_CACHE, &v)?;
        }
        if let Some(v) = lookup(ENV_PROFILING) {
            setting.profiling = parse_flag(ENV_PROFILING, &v)?;
        }
        Ok(setting)
    }

    /// Timeout applied to each command.
    ///
    /// # Errors
    /// Returns `DataError::ConfigError` when the connection string cannot be parsed.
    pub fn command_timeout(&self) -> Result<Duration, DataError> {
        match self.command_timeout_secs {
            Some(secs) => Ok(Duration::from_secs(secs)),
            None => ConnectionStringBuilder::parse(&self.connection_string)?.timeout(),
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, DataError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DataError::ConfigError(format!(
            "{key} must be a boolean, got `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_settings_from_environment_lookup() {
        let setting = DatabaseSetting::from_lookup(lookup_from(&[
            (ENV_CONNECTION_STRING, "Data Source=app.db"),
            (ENV_PROVIDER, "sqlite"),
            (ENV_PARAMETER_CACHE, "false"),
            (ENV_PROFILING, "on"),
        ]))
        .unwrap();
        assert_eq!(setting.provider, DataProvider::Sqlite);
        assert!(!setting.parameter_cache);
        assert!(setting.profiling);
    }

    #[test]
    fn missing_provider_is_a_config_error() {
        let err = DatabaseSetting::from_lookup(lookup_from(&[(
            ENV_CONNECTION_STRING,
            "Data Source=app.db",
        )]))
        .unwrap_err();
        assert!(matches!(err, DataError::ConfigError(_)));
    }

    #[test]
    fn command_timeout_prefers_override() {
        let setting = DatabaseSetting::new("Data Source=a.db;Connect Timeout=9", DataProvider::Sqlite);
        assert_eq!(setting.command_timeout().unwrap(), Duration::from_secs(9));
        let setting = setting.with_command_timeout(Duration::from_secs(2));
        assert_eq!(setting.command_timeout().unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn deserializes_with_defaults() {
        let setting: DatabaseSetting = serde_json::from_str(
            r#"{"connection_string":"Data Source=a.db","provider":"Sqlite"}"#,
        )
        .unwrap();
        assert!(setting.parameter_cache);
        assert!(!setting.profiling);
    }
}
