//! Row type with typed column access.
//!
//! A [`Row`] holds the decoded values of one result row and a shared
//! reference to the column descriptors of its result set, so every row of a
//! set shares one metadata allocation.

use std::sync::Arc;

use hdb_protocol::ResultField;
use hdb_types::{FromHdb, HdbValue, LobLocator, TypeError};

/// A row from a query result.
///
/// # Access Patterns
///
/// - **Typed:** `get::<T>()`, `get_by_name::<T>()`
/// - **Lenient:** `try_get::<T>()` yields `None` for NULL or a failed conversion
/// - **Raw:** `get_raw()` returns the [`HdbValue`] as decoded
///
/// LOB columns decode to a [`LobLocator`]; read them through
/// [`Rows::lob_reader`](crate::Rows::lob_reader).
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ResultField]>,
    values: Vec<HdbValue>,
}

fn out_of_bounds(index: usize) -> TypeError {
    TypeError::TypeMismatch {
        expected: "valid column index",
        actual: format!("index {index} out of bounds"),
    }
}

impl Row {
    pub(crate) fn new(columns: Arc<[ResultField]>, values: Vec<HdbValue>) -> Self {
        Self { columns, values }
    }

    /// Find a column index by name (case-insensitive).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name() == name)
            .or_else(|| self.columns.iter().position(|c| c.name().eq_ignore_ascii_case(name)))
    }

    /// Get a value by column index with type conversion.
    pub fn get<T: FromHdb>(&self, index: usize) -> Result<T, TypeError> {
        self.values
            .get(index)
            .ok_or_else(|| out_of_bounds(index))
            .and_then(T::from_hdb)
    }

    /// Get a value by column name with type conversion.
    pub fn get_by_name<T: FromHdb>(&self, name: &str) -> Result<T, TypeError> {
        let index = self
            .find_by_name(name)
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid column name",
                actual: format!("column '{name}' not found"),
            })?;
        self.get(index)
    }

    /// Try to get a value by column index, returning None if NULL or not found.
    pub fn try_get<T: FromHdb>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_hdb_nullable(v).ok().flatten())
    }

    /// Try to get a value by column name, returning None if NULL or not found.
    pub fn try_get_by_name<T: FromHdb>(&self, name: &str) -> Option<T> {
        self.try_get(self.find_by_name(name)?)
    }

    /// The raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&HdbValue> {
        self.values.get(index)
    }

    /// The LOB locator of a LOB column.
    pub fn get_lob(&self, index: usize) -> Result<LobLocator, TypeError> {
        self.get(index)
    }

    /// Whether a column value is NULL; also true for unknown columns.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(HdbValue::is_null)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column descriptors.
    #[must_use]
    pub fn columns(&self) -> &[ResultField] {
        &self.columns
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[HdbValue] {
        &self.values
    }

    /// Consume the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<HdbValue> {
        self.values
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hdb_protocol::TypeCode;

    fn row() -> Row {
        let columns: Arc<[ResultField]> = vec![
            ResultField::new("ID", TypeCode::Integer, 10, 0),
            ResultField::new("Name", TypeCode::Nvarchar, 20, 0),
            ResultField::new("NOTE", TypeCode::Nvarchar, 20, 0),
        ]
        .into();
        Row::new(
            columns,
            vec![HdbValue::Int(7), HdbValue::String("seven".into()), HdbValue::Null],
        )
    }

    #[test]
    fn test_typed_access() {
        let row = row();
        assert_eq!(row.get::<i32>(0).unwrap(), 7);
        assert_eq!(row.get::<i64>(0).unwrap(), 7);
        assert_eq!(row.get_by_name::<String>("Name").unwrap(), "seven");
        assert_eq!(row.get_by_name::<String>("name").unwrap(), "seven");
        assert_eq!(row.get::<Option<String>>(2).unwrap(), None);
        assert!(matches!(row.get::<String>(2), Err(TypeError::UnexpectedNull)));
        assert!(row.get::<i32>(9).is_err());
        assert!(row.get_by_name::<i32>("MISSING").is_err());
    }

    #[test]
    fn test_lenient_access() {
        let row = row();
        assert_eq!(row.try_get::<i32>(0), Some(7));
        assert_eq!(row.try_get::<String>(2), None);
        assert_eq!(row.try_get_by_name::<i32>("Name"), None);
        assert!(row.is_null(2));
        assert!(row.is_null(9));
        assert!(!row.is_null(0));
    }

    #[test]
    fn test_metadata() {
        let row = row();
        assert_eq!(row.len(), 3);
        assert!(!row.is_empty());
        assert_eq!(row.columns()[1].name(), "Name");
        assert_eq!(row.get_raw(0), Some(&HdbValue::Int(7)));
        assert_eq!(row.into_values().len(), 3);
    }
}
