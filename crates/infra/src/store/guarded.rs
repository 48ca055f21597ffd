//! Prefix-checked facade over one table of a store backend.
//!
//! Every row operation is validated against the caller's prefix grants before
//! it reaches the backend. Denials surface as `StoreError::Unauthorized`,
//! never as an empty result.

use rowforge_auth::{AccessGuard, PermissionSet, PrefixTable};
use rowforge_core::{ColumnMap, ColumnSpec, StoreError, StoreResult};

use super::backend::{ColumnFilter, Row, RowScan, ScanRequest, StoreBackend};

pub const MAX_SLICE_ROWS: usize = 10_000;
pub const MAX_SLICE_BYTES: usize = 1 << 20;

/// Bounds on a `get_slice` response. Values above the hard caps are clamped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SliceLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
    /// Drop the row whose key equals the slice start (resume-after paging).
    pub exclude_start: bool,
}

impl Default for SliceLimits {
    fn default() -> Self {
        Self {
            max_rows: 1,
            max_bytes: MAX_SLICE_BYTES,
            exclude_start: false,
        }
    }
}

impl SliceLimits {
    pub fn new(max_rows: usize, max_bytes: usize) -> Self {
        Self {
            max_rows,
            max_bytes,
            exclude_start: false,
        }
    }

    pub fn excluding_start(mut self) -> Self {
        self.exclude_start = true;
        self
    }

    fn clamped(self) -> Self {
        Self {
            max_rows: self.max_rows.min(MAX_SLICE_ROWS),
            max_bytes: self.max_bytes.min(MAX_SLICE_BYTES),
            exclude_start: self.exclude_start,
        }
    }
}

fn row_bytes(key: &[u8], columns: &ColumnMap) -> usize {
    key.len() + columns.iter().map(|(c, v)| c.len() + v.len()).sum::<usize>()
}

pub struct GuardedTable<B> {
    backend: B,
    table: String,
    guard: AccessGuard,
    writable: Option<Vec<ColumnSpec>>,
    marker_column: Vec<u8>,
}

impl<B> GuardedTable<B>
where
    B: StoreBackend,
{
    pub fn new(backend: B, table: impl Into<String>, prefixes: PrefixTable) -> Self {
        Self {
            backend,
            table: table.into(),
            guard: AccessGuard::new(prefixes),
            writable: None,
            marker_column: b"data:image".to_vec(),
        }
    }

    /// Restrict client writes to the given columns (`family:` selects a whole family).
    pub fn with_writable_columns<C: AsRef<[u8]>>(mut self, columns: &[C]) -> StoreResult<Self> {
        self.writable = Some(ColumnSpec::parse_all(columns)?);
        Ok(self)
    }

    /// Column a row must carry to be touched by `patch_slice`.
    pub fn with_marker_column(mut self, column: impl Into<Vec<u8>>) -> Self {
        self.marker_column = column.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut AccessGuard {
        &mut self.guard
    }

    fn check_key(&self, key: &[u8], requested: PermissionSet) -> StoreResult<()> {
        self.guard.validate_key(key, requested)?;
        Ok(())
    }

    /// A missing bound is only authorized by the empty prefix.
    fn check_range(
        &self,
        start: Option<&[u8]>,
        stop: Option<&[u8]>,
        requested: PermissionSet,
    ) -> StoreResult<()> {
        match (start, stop) {
            (Some(start), Some(stop)) => {
                self.guard.validate_range(start, stop, requested)?;
                Ok(())
            }
            _ => {
                let whole = self
                    .guard
                    .prefixes()
                    .get(b"")
                    .is_some_and(|granted| granted.is_superset_of(requested));
                if whole {
                    Ok(())
                } else {
                    Err(StoreError::unauthorized(format!(
                        "unbounded range on table '{}' requires a grant on the whole keyspace",
                        self.table
                    )))
                }
            }
        }
    }

    fn check_writable(&self, column: &[u8]) -> StoreResult<()> {
        let Some(policy) = &self.writable else {
            return Ok(());
        };
        if policy.iter().any(|spec| spec.matches(column)) {
            Ok(())
        } else {
            Err(StoreError::unauthorized(format!(
                "column '{}' is not writable on table '{}'",
                String::from_utf8_lossy(column),
                self.table
            )))
        }
    }

    pub fn get_row(&self, key: &[u8], columns: &[Vec<u8>]) -> StoreResult<ColumnMap> {
        self.check_key(key, PermissionSet::READ)?;
        self.backend.get_row(&self.table, key, columns)
    }

    pub fn get_column(&self, key: &[u8], column: &[u8]) -> StoreResult<Vec<u8>> {
        self.check_key(key, PermissionSet::READ)?;
        self.backend.get_column(&self.table, key, column)
    }

    pub fn mutate_row(&self, key: &[u8], columns: &ColumnMap) -> StoreResult<()> {
        self.check_key(key, PermissionSet::READ_WRITE)?;
        for column in columns.keys() {
            self.check_writable(column)?;
        }
        self.backend.mutate_row(&self.table, key, columns)
    }

    pub fn delete_row(&self, key: &[u8]) -> StoreResult<()> {
        self.check_key(key, PermissionSet::READ_WRITE)?;
        self.backend.delete_row(&self.table, key)
    }

    pub fn delete_column(&self, key: &[u8], column: &[u8]) -> StoreResult<()> {
        self.check_key(key, PermissionSet::READ_WRITE)?;
        self.check_writable(column)?;
        self.backend.delete_column(&self.table, key, column)
    }

    pub fn scan(&self, request: ScanRequest) -> StoreResult<RowScan<'_>> {
        self.check_range(
            request.start.as_deref(),
            request.stop.as_deref(),
            PermissionSet::READ,
        )?;
        self.backend.scan(&self.table, request)
    }

    /// Bounded read of `[start, stop)`.
    ///
    /// Stops after `max_rows` rows or once the accumulated key, column and
    /// value bytes reach `max_bytes` (the row crossing the limit is kept).
    pub fn get_slice(
        &self,
        start: &[u8],
        stop: &[u8],
        columns: &[Vec<u8>],
        filter: Option<ColumnFilter>,
        limits: SliceLimits,
    ) -> StoreResult<Vec<Row>> {
        self.check_range(Some(start), Some(stop), PermissionSet::READ)?;
        let limits = limits.clamped();

        let mut request = ScanRequest::range(start.to_vec(), stop.to_vec())
            .with_columns(columns.iter().cloned());
        request.filter = filter;

        let mut out = Vec::new();
        let mut bytes = 0usize;
        for row in self.backend.scan(&self.table, request)? {
            let (key, cols) = row?;
            if limits.exclude_start && key.as_slice() == start {
                continue;
            }
            if out.len() >= limits.max_rows || bytes >= limits.max_bytes {
                break;
            }
            bytes += row_bytes(&key, &cols);
            out.push((key, cols));
        }
        Ok(out)
    }

    /// Write `columns` to every row of `[start, stop)` that carries the marker
    /// column. Returns the number of rows patched.
    pub fn patch_slice(&self, start: &[u8], stop: &[u8], columns: &ColumnMap) -> StoreResult<usize> {
        self.check_range(Some(start), Some(stop), PermissionSet::WRITE)?;
        for column in columns.keys() {
            self.check_writable(column)?;
        }
        if columns.is_empty() {
            return Ok(0);
        }

        let request = ScanRequest::range(start.to_vec(), stop.to_vec())
            .with_columns([self.marker_column.clone()])
            .keys_only();
        let keys = self
            .backend
            .scan(&self.table, request)?
            .map(|row| row.map(|(key, _)| key))
            .collect::<StoreResult<Vec<_>>>()?;

        for key in &keys {
            self.backend.mutate_row(&self.table, key, columns)?;
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::hashmap::HashMapStore;
    use crate::store::ordered::OrderedStore;
    use crate::store::services::{InMemoryHashService, InMemoryOrderedService};
    use rowforge_core::increment_prefix;
    use std::sync::Arc;

    fn row(pairs: &[(&str, &str)]) -> ColumnMap {
        pairs
            .iter()
            .map(|(c, v)| (c.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    fn cats_table() -> GuardedTable<OrderedStore<InMemoryOrderedService>> {
        let prefixes = PrefixTable::new()
            .with_grant(b"cats/".to_vec(), PermissionSet::READ_WRITE)
            .unwrap();
        GuardedTable::new(OrderedStore::new(InMemoryOrderedService::new()), "images", prefixes)
            .with_writable_columns(&[b"data:image".as_slice(), b"meta:".as_slice()])
            .unwrap()
    }

    #[test]
    fn writes_outside_granted_prefix_are_unauthorized() {
        let t = cats_table();
        t.mutate_row(b"cats/1", &row(&[("data:image", "X")])).unwrap();
        assert!(matches!(
            t.mutate_row(b"dogs/1", &row(&[("data:image", "X")])),
            Err(StoreError::Unauthorized(_))
        ));
        assert!(matches!(t.get_row(b"dogs/1", &[]), Err(StoreError::Unauthorized(_))));
    }

    #[test]
    fn column_policy_rejects_other_families() {
        let t = cats_table();
        t.mutate_row(b"cats/1", &row(&[("meta:class", "cat")])).unwrap();
        assert!(matches!(
            t.mutate_row(b"cats/1", &row(&[("feat:gist", "0")])),
            Err(StoreError::Unauthorized(_))
        ));
        assert!(matches!(
            t.delete_column(b"cats/1", b"thum:320"),
            Err(StoreError::Unauthorized(_))
        ));
    }

    #[test]
    fn unbounded_scan_requires_whole_keyspace_grant() {
        let t = cats_table();
        assert!(matches!(
            t.scan(ScanRequest::new()),
            Err(StoreError::Unauthorized(_))
        ));

        let open = GuardedTable::new(
            Arc::new(HashMapStore::new(InMemoryHashService::new())),
            "images",
            PrefixTable::new().with_grant(Vec::new(), PermissionSet::READ).unwrap(),
        );
        assert!(open.scan(ScanRequest::new()).is_ok());
    }

    #[test]
    fn slice_honours_row_and_byte_limits() {
        let t = cats_table();
        for i in 0..5 {
            let key = format!("cats/{i}");
            t.mutate_row(key.as_bytes(), &row(&[("data:image", "0123456789")]))
                .unwrap();
        }
        let stop = increment_prefix(b"cats/").unwrap();

        let two = t
            .get_slice(b"cats/", &stop, &[], None, SliceLimits::new(2, MAX_SLICE_BYTES))
            .unwrap();
        assert_eq!(two.len(), 2);

        // Each row is 6 key bytes + 10 column bytes + 10 value bytes.
        let by_bytes = t
            .get_slice(b"cats/", &stop, &[], None, SliceLimits::new(100, 30))
            .unwrap();
        assert_eq!(by_bytes.len(), 2);

        let resumed = t
            .get_slice(b"cats/1", &stop, &[], None, SliceLimits::new(100, MAX_SLICE_BYTES).excluding_start())
            .unwrap();
        let keys: Vec<_> = resumed.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"cats/2".to_vec(), b"cats/3".to_vec(), b"cats/4".to_vec()]);
    }

    #[test]
    fn slice_limits_are_clamped() {
        let limits = SliceLimits::new(50_000, usize::MAX).clamped();
        assert_eq!(limits.max_rows, MAX_SLICE_ROWS);
        assert_eq!(limits.max_bytes, MAX_SLICE_BYTES);
    }

    #[test]
    fn patch_slice_only_touches_rows_with_marker() {
        let t = cats_table();
        t.mutate_row(b"cats/1", &row(&[("data:image", "X")])).unwrap();
        t.mutate_row(b"cats/2", &row(&[("meta:class", "cat")])).unwrap();
        let stop = increment_prefix(b"cats/").unwrap();

        let patched = t
            .patch_slice(b"cats/", &stop, &row(&[("meta:tag", "fluffy")]))
            .unwrap();
        assert_eq!(patched, 1);
        assert_eq!(t.get_column(b"cats/1", b"meta:tag").unwrap(), b"fluffy".to_vec());
        assert_eq!(t.get_column(b"cats/2", b"meta:tag"), Err(StoreError::NotFound));
    }
}
