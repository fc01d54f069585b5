use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

use super::row::{DataRow, build_index_cache};
use crate::error::DataError;
use crate::types::DbValue;

/// One result set: shared column names plus rows.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    /// The rows returned by the query
    pub rows: Vec<DataRow>,
    column_names: Option<Arc<Vec<String>>>,
    column_index_cache: Option<Arc<HashMap<String, usize>>>,
}

impl DataTable {
    /// Create a new table with a known row capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> DataTable {
        DataTable {
            rows: Vec::with_capacity(capacity),
            column_names: None,
            column_index_cache: None,
        }
    }

    /// Set the column names for this table (shared by all rows)
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index_cache = Some(Arc::new(build_index_cache(&column_names)));
        self.column_names = Some(column_names);
    }

    #[must_use]
    pub fn column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_names.as_ref().map_or(0, |c| c.len())
    }

    /// Add a row to the table
    ///
    /// Rows added before `set_column_names` are ignored.
    pub fn add_row_values(&mut self, values: Vec<DbValue>) {
        if let (Some(column_names), Some(cache)) = (&self.column_names, &self.column_index_cache)
        {
            self.rows.push(DataRow {
                column_names: Arc::clone(column_names),
                values,
                column_index_cache: Arc::clone(cache),
            });
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row.
    #[must_use]
    pub fn first_value(&self) -> Option<&DbValue> {
        self.rows.first().and_then(|r| r.get_by_index(0))
    }

    /// Every row as a dynamic JSON object.
    #[must_use]
    pub fn to_json_rows(&self) -> Vec<Map<String, JsonValue>> {
        self.rows.iter().map(DataRow::to_json_map).collect()
    }

    /// Map every row onto `T`.
    ///
    /// # Errors
    /// Returns `DataError::MappingError` on the first row that does not fit `T`.
    pub fn map_rows<T: DeserializeOwned>(&self) -> Result<Vec<T>, DataError> {
        self.rows.iter().map(DataRow::deserialize).collect()
    }
}

/// Ordered tables produced by one command.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    pub tables: Vec<DataTable>,
}

impl DataSet {
    #[must_use]
    pub fn new(tables: Vec<DataTable>) -> Self {
        Self { tables }
    }

    #[must_use]
    pub fn table(&self, index: usize) -> Option<&DataTable> {
        self.tables.get(index)
    }

    #[must_use]
    pub fn first_table(&self) -> Option<&DataTable> {
        self.tables.first()
    }

    #[must_use]
    pub fn into_first_table(self) -> DataTable {
        self.tables.into_iter().next().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Forward-only cursor over the tables produced by one command.
///
/// The rows are already materialized; the connection is free once the reader
/// is handed out.
/// ```rust
/// use sql_data_factory::prelude::*;
/// use std::sync::Arc;
///
/// let mut table = DataTable::with_capacity(1);
/// table.set_column_names(Arc::new(vec!["id".to_string()]));
/// table.add_row_values(vec![DbValue::Int(7)]);
///
/// let mut reader = DataReader::new(vec![table], 0);
/// while let Some(row) = reader.read() {
///     assert_eq!(row.get("id"), Some(&DbValue::Int(7)));
/// }
/// assert!(!reader.next_result());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DataReader {
    tables: Vec<DataTable>,
    table_index: usize,
    next_row: usize,
    records_affected: u64,
}

impl DataReader {
    #[must_use]
    pub fn new(tables: Vec<DataTable>, records_affected: u64) -> Self {
        Self {
            tables,
            table_index: 0,
            next_row: 0,
            records_affected,
        }
    }

    /// Advance to the next row of the current result set.
    pub fn read(&mut self) -> Option<&DataRow> {
        let table = self.tables.get(self.table_index)?;
        let row = table.rows.get(self.next_row)?;
        self.next_row += 1;
        Some(row)
    }

    /// Move to the next result set. Returns `false` when there is none.
    pub fn next_result(&mut self) -> bool {
        if self.table_index < self.tables.len() {
            self.table_index += 1;
        }
        self.next_row = 0;
        self.table_index < self.tables.len()
    }

    /// Column names of the current result set.
    #[must_use]
    pub fn column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.tables
            .get(self.table_index)
            .and_then(DataTable::column_names)
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.tables
            .get(self.table_index)
            .map_or(0, DataTable::column_count)
    }

    #[must_use]
    pub fn has_rows(&self) -> bool {
        self.tables
            .get(self.table_index)
            .is_some_and(|t| !t.is_empty())
    }

    #[must_use]
    pub fn records_affected(&self) -> u64 {
        self.records_affected
    }

    /// Total rows across every result set.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(DataTable::len).sum()
    }

    #[must_use]
    pub fn into_data_set(self) -> DataSet {
        DataSet::new(self.tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn people() -> DataTable {
        let mut table = DataTable::with_capacity(2);
        table.set_column_names(Arc::new(vec!["Id".into(), "Name".into(), "Nick".into()]));
        table.add_row_values(vec![
            DbValue::Int(1),
            DbValue::Text("Ada".into()),
            DbValue::Null,
        ]);
        table.add_row_values(vec![
            DbValue::Int(2),
            DbValue::Text("Grace".into()),
            DbValue::Text("amazing".into()),
        ]);
        table
    }

    #[test]
    fn column_lookup_falls_back_to_case_insensitive() {
        let table = people();
        let row = &table.rows[0];
        assert_eq!(row.get("Name"), Some(&DbValue::Text("Ada".into())));
        assert_eq!(row.get("name"), Some(&DbValue::Text("Ada".into())));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn rows_map_to_json_and_serde_types() {
        #[derive(Deserialize)]
        #[allow(non_snake_case)]
        struct Person {
            Id: i64,
            Name: String,
            Nick: Option<String>,
        }

        let table = people();
        let json = table.to_json_rows();
        assert_eq!(json[0]["Nick"], JsonValue::Null);

        let mapped: Vec<Person> = table.map_rows().unwrap();
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[1].Id, 2);
        assert_eq!(mapped[1].Name, "Grace");
        assert_eq!(mapped[1].Nick.as_deref(), Some("amazing"));
        assert!(mapped[0].Nick.is_none());
    }

    #[test]
    fn reader_walks_tables_forward_only() {
        let mut second = DataTable::with_capacity(1);
        second.set_column_names(Arc::new(vec!["total".into()]));
        second.add_row_values(vec![DbValue::Int(2)]);

        let mut reader = DataReader::new(vec![people(), second], 0);
        assert_eq!(reader.field_count(), 3);
        assert_eq!(reader.record_count(), 3);

        let mut names = Vec::new();
        while let Some(row) = reader.read() {
            names.push(row.get("Name").cloned());
        }
        assert_eq!(names.len(), 2);

        assert!(reader.next_result());
        assert_eq!(reader.read().and_then(|r| r.get("total")).cloned(), Some(DbValue::Int(2)));
        assert!(reader.read().is_none());
        assert!(!reader.next_result());
        assert!(!reader.next_result());
    }

    #[test]
    fn rows_without_columns_are_ignored() {
        let mut table = DataTable::default();
        table.add_row_values(vec![DbValue::Int(1)]);
        assert!(table.is_empty());
    }
}
