//! The table-store contract shared by both backends.

use core::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rowforge_core::{ColumnMap, RowKey, StoreError, StoreResult};

pub type Row = (RowKey, ColumnMap);

/// Lazily produced scan results. Dropping it early is allowed.
pub type RowScan<'a> = Box<dyn Iterator<Item = StoreResult<Row>> + Send + 'a>;

/// Comparison applied by a scan's column filter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "startswith")]
    StartsWith,
}

impl FromStr for FilterOp {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(FilterOp::Equals),
            "!=" => Ok(FilterOp::NotEquals),
            "startswith" => Ok(FilterOp::StartsWith),
            other => Err(StoreError::malformed("filter op", other)),
        }
    }
}

/// `(column, op, literal)`: keep rows whose `column` satisfies `op` against
/// `literal`. Rows lacking the column are excluded for every op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: Vec<u8>,
    pub op: FilterOp,
    pub literal: Vec<u8>,
}

impl ColumnFilter {
    pub fn new(column: impl Into<Vec<u8>>, op: FilterOp, literal: impl Into<Vec<u8>>) -> Self {
        Self {
            column: column.into(),
            op,
            literal: literal.into(),
        }
    }

    pub fn matches(&self, row: &ColumnMap) -> bool {
        let Some(value) = row.get(&self.column) else {
            return false;
        };
        match self.op {
            FilterOp::Equals => value == &self.literal,
            FilterOp::NotEquals => value != &self.literal,
            FilterOp::StartsWith => value.starts_with(&self.literal),
        }
    }
}

/// Half-open `[start, stop)` scan with optional projection and filter.
///
/// A missing bound means unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub start: Option<RowKey>,
    pub stop: Option<RowKey>,
    pub columns: Vec<Vec<u8>>,
    pub filter: Option<ColumnFilter>,
    pub keys_only: bool,
}

impl ScanRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(start: impl Into<RowKey>, stop: impl Into<RowKey>) -> Self {
        Self {
            start: Some(start.into()),
            stop: Some(stop.into()),
            ..Self::default()
        }
    }

    pub fn with_columns<C: Into<Vec<u8>>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: ColumnFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn in_range(&self, key: &[u8]) -> bool {
        self.start.as_deref().is_none_or(|s| s <= key)
            && self.stop.as_deref().is_none_or(|s| key < s)
    }
}

/// Row-oriented table store.
///
/// Column names are `family:qualifier`; a `family:` entry in a column list
/// selects every qualifier of the family. Mutations are atomic per row.
pub trait StoreBackend: Send + Sync {
    /// Fetch the selected columns of a row (all when `columns` is empty).
    ///
    /// `NotFound` when the row is absent or none of the selected columns exist.
    fn get_row(&self, table: &str, key: &[u8], columns: &[Vec<u8>]) -> StoreResult<ColumnMap>;

    /// Single-column read. `NotFound` when the column is absent.
    fn get_column(&self, table: &str, key: &[u8], column: &[u8]) -> StoreResult<Vec<u8>> {
        let mut row = self.get_row(table, key, &[column.to_vec()])?;
        row.remove(column).ok_or(StoreError::NotFound)
    }

    /// Upsert every `(column, value)` pair of `columns` into the row atomically.
    fn mutate_row(&self, table: &str, key: &[u8], columns: &ColumnMap) -> StoreResult<()>;

    /// Remove the row. Absent rows are not an error.
    fn delete_row(&self, table: &str, key: &[u8]) -> StoreResult<()>;

    /// Remove one column. Absent columns are not an error.
    fn delete_column(&self, table: &str, key: &[u8], column: &[u8]) -> StoreResult<()>;

    /// Lazily produce the rows of `[start, stop)` that pass the filter.
    ///
    /// Rows whose projection is empty are skipped. With `keys_only` every
    /// returned value is empty. Ordering is backend-specific.
    fn scan<'a>(&'a self, table: &str, request: ScanRequest) -> StoreResult<RowScan<'a>>;
}

impl<S> StoreBackend for Arc<S>
where
    S: StoreBackend + ?Sized,
{
    fn get_row(&self, table: &str, key: &[u8], columns: &[Vec<u8>]) -> StoreResult<ColumnMap> {
        (**self).get_row(table, key, columns)
    }

    fn get_column(&self, table: &str, key: &[u8], column: &[u8]) -> StoreResult<Vec<u8>> {
        (**self).get_column(table, key, column)
    }

    fn mutate_row(&self, table: &str, key: &[u8], columns: &ColumnMap) -> StoreResult<()> {
        (**self).mutate_row(table, key, columns)
    }

    fn delete_row(&self, table: &str, key: &[u8]) -> StoreResult<()> {
        (**self).delete_row(table, key)
    }

    fn delete_column(&self, table: &str, key: &[u8], column: &[u8]) -> StoreResult<()> {
        (**self).delete_column(table, key, column)
    }

    fn scan<'a>(&'a self, table: &str, request: ScanRequest) -> StoreResult<RowScan<'a>> {
        (**self).scan(table, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filter_ops() {
        assert_eq!("=".parse::<FilterOp>().unwrap(), FilterOp::Equals);
        assert_eq!("!=".parse::<FilterOp>().unwrap(), FilterOp::NotEquals);
        assert_eq!("startswith".parse::<FilterOp>().unwrap(), FilterOp::StartsWith);
        assert!(matches!(
            "<".parse::<FilterOp>(),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn column_filter_excludes_rows_without_column() {
        let filter = ColumnFilter::new(b"meta:class".to_vec(), FilterOp::NotEquals, b"dog".to_vec());
        assert!(!filter.matches(&ColumnMap::new()));

        let mut row = ColumnMap::new();
        row.insert(b"meta:class".to_vec(), b"cat".to_vec());
        assert!(filter.matches(&row));

        let prefix = ColumnFilter::new(b"meta:class".to_vec(), FilterOp::StartsWith, b"ca".to_vec());
        assert!(prefix.matches(&row));
    }

    #[test]
    fn range_bounds_are_half_open() {
        let request = ScanRequest::range(b"b".to_vec(), b"d".to_vec());
        assert!(!request.in_range(b"a"));
        assert!(request.in_range(b"b"));
        assert!(request.in_range(b"c\xff"));
        assert!(!request.in_range(b"d"));
        assert!(ScanRequest::new().in_range(b"anything"));
    }
}
