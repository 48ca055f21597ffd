//! Store backend over a hash-map service.
//!
//! Each row is one hash stored under `<table>:<row key>`, with one hash field
//! per column. The service has no ordering, so scans enumerate candidate keys
//! by prefix, check bounds client-side and fetch rows one at a time. Scan
//! order is therefore unspecified.

use tracing::debug;

use rowforge_core::{ColumnMap, ColumnSpec, StoreError, StoreResult, common_prefix, project};

use super::backend::{ColumnFilter, RowScan, ScanRequest, StoreBackend};
use super::services::HashService;

fn composite_key(table: &str, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(table.len() + 1 + key.len());
    out.extend_from_slice(table.as_bytes());
    out.push(b':');
    out.extend_from_slice(key);
    out
}

/// Store backend delegating to a [`HashService`].
#[derive(Debug, Clone)]
pub struct HashMapStore<H> {
    service: H,
}

impl<H> HashMapStore<H>
where
    H: HashService,
{
    pub fn new(service: H) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &H {
        &self.service
    }

    fn fetch(&self, composite: &[u8], specs: &[ColumnSpec]) -> StoreResult<ColumnMap> {
        // Family selectors need the field names first; plain column lists can
        // be read straight out of the hash.
        if specs.is_empty() || specs.iter().any(ColumnSpec::is_family) {
            return Ok(project(self.service.hgetall(composite)?, specs));
        }
        let mut row = ColumnMap::new();
        for spec in specs {
            let column = spec.to_bytes();
            if let Some(value) = self.service.hget(composite, &column)? {
                row.insert(column, value);
            }
        }
        Ok(row)
    }
}

impl<H> StoreBackend for HashMapStore<H>
where
    H: HashService,
{
    fn get_row(&self, table: &str, key: &[u8], columns: &[Vec<u8>]) -> StoreResult<ColumnMap> {
        let specs = ColumnSpec::parse_all(columns)?;
        let row = self.fetch(&composite_key(table, key), &specs)?;
        if row.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(row)
    }

    fn mutate_row(&self, table: &str, key: &[u8], columns: &ColumnMap) -> StoreResult<()> {
        if columns.is_empty() {
            return Ok(());
        }
        let fields: Vec<(Vec<u8>, Vec<u8>)> = columns
            .iter()
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect();
        self.service
            .hset_multiple(&composite_key(table, key), &fields)?;
        Ok(())
    }

    fn delete_row(&self, table: &str, key: &[u8]) -> StoreResult<()> {
        self.service.del(&composite_key(table, key))?;
        Ok(())
    }

    fn delete_column(&self, table: &str, key: &[u8], column: &[u8]) -> StoreResult<()> {
        self.service.hdel(&composite_key(table, key), column)?;
        Ok(())
    }

    fn scan<'a>(&'a self, table: &str, request: ScanRequest) -> StoreResult<RowScan<'a>> {
        let specs = ColumnSpec::parse_all(&request.columns)?;

        // Narrow key enumeration to the longest prefix both bounds share.
        let hint: &[u8] = match (&request.start, &request.stop) {
            (Some(start), Some(stop)) => common_prefix(start, stop),
            _ => &[],
        };
        let table_prefix = composite_key(table, &[]);
        let candidates = self
            .service
            .keys_with_prefix(&composite_key(table, hint))?;
        debug!(
            table = %table,
            hint = %String::from_utf8_lossy(hint),
            candidates = candidates.len(),
            "hash scan"
        );

        let keys: Vec<Vec<u8>> = candidates
            .into_iter()
            .filter_map(|composite| composite.strip_prefix(table_prefix.as_slice()).map(<[u8]>::to_vec))
            .filter(|key| request.in_range(key))
            .collect();

        Ok(Box::new(HashScan {
            store: self,
            table_prefix,
            keys: keys.into_iter(),
            specs,
            filter: request.filter,
            keys_only: request.keys_only,
        }))
    }
}

/// Lazy per-row fetch over the candidate keys of a hash scan.
struct HashScan<'a, H> {
    store: &'a HashMapStore<H>,
    table_prefix: Vec<u8>,
    keys: std::vec::IntoIter<Vec<u8>>,
    specs: Vec<ColumnSpec>,
    filter: Option<ColumnFilter>,
    keys_only: bool,
}

impl<H> HashScan<'_, H>
where
    H: HashService,
{
    fn load(&self, key: &[u8]) -> StoreResult<Option<ColumnMap>> {
        let mut composite = self.table_prefix.clone();
        composite.extend_from_slice(key);
        let full = self.store.service.hgetall(&composite)?;
        // Deleted after enumeration.
        if full.is_empty() {
            return Ok(None);
        }
        if let Some(filter) = &self.filter {
            if !filter.matches(&full) {
                return Ok(None);
            }
        }
        let mut row = project(full, &self.specs);
        if row.is_empty() {
            return Ok(None);
        }
        if self.keys_only {
            for value in row.values_mut() {
                value.clear();
            }
        }
        Ok(Some(row))
    }
}

impl<H> Iterator for HashScan<'_, H>
where
    H: HashService,
{
    type Item = StoreResult<(Vec<u8>, ColumnMap)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            match self.load(&key) {
                Ok(Some(row)) => return Some(Ok((key, row))),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
