use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

use crate::error::DataError;
use crate::types::DbValue;

/// A row from a database query result
///
/// This struct represents a single row from a database query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone)]
pub struct DataRow {
    /// The column names for this row (shared across all rows in a table)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<DbValue>,
    // Shared name-to-index lookup, built once per table
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl DataRow {
    /// Create a new database row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `values` - The values for this row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<DbValue>) -> Self {
        let cache = Arc::new(build_index_cache(&column_names));
        Self {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    /// Get the index of a column by name
    ///
    /// Exact matches win; otherwise the first case-insensitive match is used.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }

        self.column_names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(column_name))
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&DbValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dynamic view of the row: one JSON property per column, NULL as `null`.
    ///
    /// When a column name repeats, the first occurrence wins.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, JsonValue> {
        let mut map = Map::with_capacity(self.column_names.len());
        for (name, value) in self.column_names.iter().zip(self.values.iter()) {
            if !map.contains_key(name) {
                map.insert(name.clone(), value.to_json());
            }
        }
        map
    }

    /// Map the row onto a serde type by column name.
    ///
    /// # Errors
    /// Returns `DataError::MappingError` when the row does not fit `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, DataError> {
        Ok(serde_json::from_value(JsonValue::Object(self.to_json_map()))?)
    }
}

pub(crate) fn build_index_cache(column_names: &[String]) -> HashMap<String, usize> {
    let mut cache = HashMap::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        cache.entry(name.clone()).or_insert(i);
    }
    cache
}
