use serde::{Deserialize, Serialize};

use crate::types::DbValue;

/// Sigils that providers put in front of parameter names.
pub const PARAMETER_SIGILS: [char; 4] = ['@', ':', '?', '$'];

/// Direction of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// The value is sent to the server.
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    /// The value is written back once the command completes.
    #[must_use]
    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InputOutput | Self::ReturnValue)
    }
}

/// A named command parameter.
///
/// `db_type` carries the provider's own type name (`nvarchar`, `int4`, ...)
/// when known, typically after parameter discovery. `size` follows the ADO
/// convention where `-1` means unbounded (`max`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DbParameter {
    pub name: String,
    pub value: DbValue,
    pub direction: ParameterDirection,
    pub db_type: Option<String>,
    pub size: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl DbParameter {
    pub fn new(name: impl Into<String>, value: impl Into<DbValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// An output parameter of the given provider type with a NULL value.
    pub fn output(name: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: ParameterDirection::Output,
            db_type: Some(db_type.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_db_type(mut self, db_type: impl Into<String>) -> Self {
        self.db_type = Some(db_type.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Name without the provider sigil.
    #[must_use]
    pub fn bare_name(&self) -> &str {
        normalize_parameter_name(&self.name)
    }

    /// Case-insensitive name comparison ignoring sigils.
    #[must_use]
    pub fn matches_name(&self, other: &str) -> bool {
        self.bare_name()
            .eq_ignore_ascii_case(normalize_parameter_name(other))
    }

    #[must_use]
    pub fn is_output(&self) -> bool {
        self.direction.is_output()
    }
}

/// Strip a leading provider sigil from a parameter name.
#[must_use]
pub fn normalize_parameter_name(name: &str) -> &str {
    name.trim_start_matches(PARAMETER_SIGILS)
}

/// Ensure the parameter name starts with `sigil`.
#[must_use]
pub fn prefixed_name(name: &str, sigil: char) -> String {
    format!("{sigil}{}", normalize_parameter_name(name))
}

/// Find a parameter by name, case-insensitively.
#[must_use]
pub fn find_parameter<'a>(parameters: &'a [DbParameter], name: &str) -> Option<&'a DbParameter> {
    parameters.iter().find(|p| p.matches_name(name))
}

/// Find a parameter by name, case-insensitively, for update.
pub fn find_parameter_mut<'a>(
    parameters: &'a mut [DbParameter],
    name: &str,
) -> Option<&'a mut DbParameter> {
    parameters.iter_mut().find(|p| p.matches_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_across_sigils_and_case() {
        let param = DbParameter::new("@CustomerId", 5);
        assert!(param.matches_name("customerid"));
        assert!(param.matches_name(":CUSTOMERID"));
        assert!(!param.matches_name("customer"));
        assert_eq!(param.bare_name(), "CustomerId");
    }

    #[test]
    fn prefixed_name_does_not_double_sigil() {
        assert_eq!(prefixed_name("@total", '@'), "@total");
        assert_eq!(prefixed_name("total", '@'), "@total");
        assert_eq!(prefixed_name(":total", '@'), "@total");
    }

    #[test]
    fn output_builder_sets_direction_and_type() {
        let param = DbParameter::output("@total", "int");
        assert_eq!(param.direction, ParameterDirection::Output);
        assert_eq!(param.db_type.as_deref(), Some("int"));
        assert!(param.value.is_null());
        assert!(param.is_output());
        assert!(!param.direction.is_input());
    }

    #[test]
    fn find_parameter_mut_updates_in_place() {
        let mut params = vec![DbParameter::new("@a", 1), DbParameter::new("@b", 2)];
        if let Some(p) = find_parameter_mut(&mut params, "B") {
            p.value = DbValue::Int(20);
        }
        assert_eq!(find_parameter(&params, "b").map(|p| &p.value), Some(&DbValue::Int(20)));
    }
}
