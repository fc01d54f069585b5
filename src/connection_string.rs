use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::DataError;

/// Default connect and command timeout when the connection string sets none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect wait used when the connection string asks for no limit (`Timeout=0`).
pub const UNLIMITED_CONNECT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

const TIMEOUT_KEYS: [&str; 4] = [
    "command timeout",
    "connect timeout",
    "connection timeout",
    "timeout",
];

const SECRET_KEYS: [&str; 2] = ["password", "pwd"];

/// Parsed ADO-style connection string (`Key=Value;Key2=Value2`).
///
/// Keys are case-insensitive. Values may be wrapped in single or double quotes,
/// which lets them contain `;`. URL forms (`postgres://...`, `mysql://...`) are
/// kept verbatim and expose no keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStringBuilder {
    raw: String,
    pairs: BTreeMap<String, String>,
}

impl ConnectionStringBuilder {
    /// Parse a connection string.
    ///
    /// A string with no `=` at all is a bare file path (SQLite) and is read as
    /// `Data Source=<path>`.
    ///
    /// # Errors
    /// Returns `DataError::ConfigError` on a segment without `=` or an
    /// unterminated quoted value.
    pub fn parse(connection_string: &str) -> Result<Self, DataError> {
        let raw = connection_string.trim().to_string();
        if is_url(&raw) {
            return Ok(Self {
                raw,
                pairs: BTreeMap::new(),
            });
        }
        if !raw.is_empty() && !raw.contains('=') {
            let pairs = BTreeMap::from([("data source".to_string(), raw.clone())]);
            return Ok(Self { raw, pairs });
        }

        let mut pairs = BTreeMap::new();
        let mut chars = raw.chars().peekable();
        loop {
            while chars.peek().is_some_and(|c| *c == ';' || c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            let mut saw_equals = false;
            for c in chars.by_ref() {
                if c == '=' {
                    saw_equals = true;
                    break;
                }
                if c == ';' {
                    break;
                }
                key.push(c);
            }
            if !saw_equals {
                return Err(DataError::ConfigError(format!(
                    "connection string segment `{}` has no value",
                    key.trim()
                )));
            }

            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }

            let mut value = String::new();
            match chars.peek().copied() {
                Some(quote @ ('\'' | '"')) => {
                    chars.next();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        if c == quote {
                            // doubled quote is a literal quote
                            if chars.peek() == Some(&quote) {
                                chars.next();
                                value.push(quote);
                                continue;
                            }
                            closed = true;
                            break;
                        }
                        value.push(c);
                    }
                    if !closed {
                        return Err(DataError::ConfigError(format!(
                            "unterminated quoted value for `{}`",
                            key.trim()
                        )));
                    }
                    for c in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                    }
                }
                _ => {
                    for c in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                        value.push(c);
                    }
                    value = value.trim_end().to_string();
                }
            }

            pairs.insert(key.trim().to_ascii_lowercase(), value);
        }

        Ok(Self { raw, pairs })
    }

    /// The connection string as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn is_url(&self) -> bool {
        is_url(&self.raw)
    }

    /// First value found among `keys` (synonyms), compared case-insensitively.
    #[must_use]
    pub fn get(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.pairs.get(&k.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Boolean flag (`true`/`yes`/`1`), `None` when absent.
    #[must_use]
    pub fn get_bool(&self, keys: &[&str]) -> Option<bool> {
        self.get(keys).map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "1" | "sspi"
            )
        })
    }

    /// Set or replace a key.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.pairs.insert(key.to_ascii_lowercase(), value.into());
    }

    /// Timeout used for connecting and, by default, for commands.
    ///
    /// # Errors
    /// Returns `DataError::ConfigError` when the value is not a whole number of seconds.
    pub fn timeout(&self) -> Result<Duration, DataError> {
        match self.get(&TIMEOUT_KEYS) {
            None => Ok(DEFAULT_TIMEOUT),
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| DataError::ConfigError(format!("invalid timeout `{v}`: {e}"))),
        }
    }

    /// Timeout for the pool to wait on a connection. Zero means no limit,
    /// which pools cannot express, so it becomes [`UNLIMITED_CONNECT_TIMEOUT`].
    ///
    /// # Errors
    /// Same as [`ConnectionStringBuilder::timeout`].
    pub fn connect_timeout(&self) -> Result<Duration, DataError> {
        Ok(pool_connect_timeout(self.timeout()?))
    }

    /// Connection string with secrets replaced, for log output.
    #[must_use]
    pub fn masked(&self) -> String {
        if self.is_url() {
            return mask_url_password(&self.raw);
        }
        self.pairs
            .iter()
            .map(|(k, v)| {
                if SECRET_KEYS.contains(&k.as_str()) {
                    format!("{k}=***")
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Non-zero pool wait for a connect timeout where zero means no limit.
#[must_use]
pub fn pool_connect_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        UNLIMITED_CONNECT_TIMEOUT
    } else {
        timeout
    }
}

fn is_url(s: &str) -> bool {
    s.contains("://")
}

fn mask_url_password(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.find('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..scheme_end + 3],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_case_insensitively() {
        let cs = ConnectionStringBuilder::parse(
            "Server=localhost,1433; Database=Sales;User Id=sa;Password='p;w''d';",
        )
        .unwrap();
        assert_eq!(cs.get(&["server"]), Some("localhost,1433"));
        assert_eq!(cs.get(&["initial catalog", "DATABASE"]), Some("Sales"));
        assert_eq!(cs.get(&["user id"]), Some("sa"));
        assert_eq!(cs.get(&["password"]), Some("p;w'd"));
    }

    #[test]
    fn timeout_defaults_and_parses() {
        let cs = ConnectionStringBuilder::parse("Data Source=app.db").unwrap();
        assert_eq!(cs.timeout().unwrap(), DEFAULT_TIMEOUT);

        let cs = ConnectionStringBuilder::parse("Data Source=app.db;Connect Timeout=5").unwrap();
        assert_eq!(cs.timeout().unwrap(), Duration::from_secs(5));

        let cs = ConnectionStringBuilder::parse("Data Source=app.db;Timeout=soon").unwrap();
        assert!(cs.timeout().is_err());
    }

    #[test]
    fn zero_timeout_means_no_pool_limit() {
        let cs = ConnectionStringBuilder::parse("Data Source=app.db;Connect Timeout=0").unwrap();
        assert_eq!(cs.timeout().unwrap(), Duration::ZERO);
        assert_eq!(cs.connect_timeout().unwrap(), UNLIMITED_CONNECT_TIMEOUT);
        assert_eq!(pool_connect_timeout(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn bare_path_is_a_data_source() {
        let cs = ConnectionStringBuilder::parse(":memory:").unwrap();
        assert_eq!(cs.get(&["data source"]), Some(":memory:"));
        assert_eq!(cs.timeout().unwrap(), DEFAULT_TIMEOUT);

        let cs = ConnectionStringBuilder::parse("/var/lib/app/data.db").unwrap();
        assert_eq!(cs.get(&["data source"]), Some("/var/lib/app/data.db"));
    }

    #[test]
    fn rejects_segment_without_value() {
        assert!(ConnectionStringBuilder::parse("Server=a;justtext").is_err());
        assert!(ConnectionStringBuilder::parse("Password='open").is_err());
    }

    #[test]
    fn urls_are_kept_verbatim_and_masked() {
        let cs = ConnectionStringBuilder::parse("postgres://app:secret@db:5432/sales").unwrap();
        assert!(cs.is_url());
        assert_eq!(cs.as_str(), "postgres://app:secret@db:5432/sales");
        assert_eq!(cs.masked(), "postgres://app:***@db:5432/sales");
    }

    #[test]
    fn masked_hides_passwords() {
        let cs = ConnectionStringBuilder::parse("Host=db;Username=app;Password=secret").unwrap();
        let masked = cs.masked();
        assert!(masked.contains("password=***"));
        assert!(!masked.contains("secret"));
    }
}
