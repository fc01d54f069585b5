use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;
use tiberius::{ColumnData, ToSql};

use crate::error::DataError;
use crate::parameter::DbParameter;
use crate::types::DbValue;

lazy_static! {
    static ref TYPE_NAME: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9_ ]*(\(\s*(?i:max|\d+)(\s*,\s*\d+)?\s*\))?$")
            .expect("type name regex");
}

/// Container for SQL Server parameters with lifetime tracking
pub struct Params<'a> {
    pub(crate) references: Vec<&'a dyn ToSql>,
}

impl<'a> Params<'a> {
    /// Convert from a slice of `DbValue` to SQL Server parameters
    #[must_use]
    pub fn convert(params: &'a [DbValue]) -> Params<'a> {
        let mut references = Vec::with_capacity(params.len());
        for p in params {
            references.push(p as &dyn ToSql);
        }
        Params { references }
    }

    #[must_use]
    pub fn as_refs(&self) -> &[&dyn ToSql] {
        &self.references
    }
}

impl ToSql for DbValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            DbValue::Int(i) => ColumnData::I64(Some(*i)),
            DbValue::Float(f) => ColumnData::F64(Some(*f)),
            DbValue::Text(s) => ColumnData::String(Some(Cow::from(s.as_str()))),
            DbValue::Bool(b) => ColumnData::Bit(Some(*b)),
            DbValue::Timestamp(dt) => {
                ColumnData::String(Some(Cow::from(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())))
            }
            DbValue::Null => ColumnData::String(None),
            DbValue::Json(jsval) => ColumnData::String(Some(Cow::from(jsval.to_string()))),
            DbValue::Blob(bytes) => ColumnData::Binary(Some(Cow::from(bytes.as_slice()))),
        }
    }
}

/// T-SQL type used to `DECLARE` a variable for `param`.
///
/// Uses `db_type` with its size, precision and scale when set, and otherwise
/// infers a type from the value.
///
/// # Errors
/// Returns `DataError::ParameterError` when `db_type` is not a plain type name.
pub fn sql_type_declaration(param: &DbParameter) -> Result<String, DataError> {
    let Some(db_type) = param.db_type.as_deref().map(str::trim) else {
        return Ok(inferred_type(&param.value).to_string());
    };
    if !TYPE_NAME.is_match(db_type) {
        return Err(DataError::ParameterError(format!(
            "`{db_type}` is not a valid SQL Server type"
        )));
    }
    if db_type.contains('(') {
        return Ok(db_type.to_string());
    }

    let lower = db_type.to_ascii_lowercase();
    let declared = match lower.as_str() {
        "varchar" | "nvarchar" | "varbinary" => match param.size {
            Some(n) if n > 0 => format!("{db_type}({n})"),
            _ => format!("{db_type}(max)"),
        },
        "char" | "nchar" | "binary" => match param.size {
            Some(n) if n > 0 => format!("{db_type}({n})"),
            _ => db_type.to_string(),
        },
        "decimal" | "numeric" => match (param.precision, param.scale) {
            (Some(p), Some(s)) if p > 0 => format!("{db_type}({p},{s})"),
            (Some(p), None) if p > 0 => format!("{db_type}({p})"),
            _ => db_type.to_string(),
        },
        "datetime2" | "time" | "datetimeoffset" => match param.scale {
            Some(s) => format!("{db_type}({s})"),
            None => db_type.to_string(),
        },
        _ => db_type.to_string(),
    };
    Ok(declared)
}

fn inferred_type(value: &DbValue) -> &'static str {
    match value {
        DbValue::Int(_) => "bigint",
        DbValue::Float(_) => "float",
        DbValue::Text(_) | DbValue::Json(_) => "nvarchar(max)",
        DbValue::Bool(_) => "bit",
        DbValue::Timestamp(_) => "datetime2",
        DbValue::Blob(_) => "varbinary(max)",
        DbValue::Null => "sql_variant",
    }
}

/// Character length from `sys.parameters.max_length` (bytes).
pub(crate) fn size_from_max_length(type_name: &str, max_length: i64) -> Option<i32> {
    if max_length < 0 {
        return Some(-1);
    }
    let chars = match type_name.to_ascii_lowercase().as_str() {
        "nvarchar" | "nchar" => max_length / 2,
        "varchar" | "char" | "varbinary" | "binary" => max_length,
        _ => return None,
    };
    i32::try_from(chars).ok()
}
