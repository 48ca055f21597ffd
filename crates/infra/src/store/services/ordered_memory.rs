use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::RwLock;

use rowforge_core::{ColumnMap, ColumnSpec, project};

use crate::store::filter::FilterExpr;

use super::{Mutation, OrderedScan, OrderedService, ServiceError, ServiceRows};

type Table = BTreeMap<Vec<u8>, ColumnMap>;

const DEFAULT_PAGE_SIZE: usize = 64;

fn parse_columns(columns: &[Vec<u8>]) -> Result<Vec<ColumnSpec>, ServiceError> {
    ColumnSpec::parse_all(columns).map_err(|e| ServiceError::Command(e.to_string()))
}

/// In-memory ordered table service.
///
/// Intended for tests/dev. Scans fetch `page_size` rows per lock acquisition
/// and resume after the last returned key, so writes between pages are
/// visible to a scan in progress.
#[derive(Debug)]
pub struct InMemoryOrderedService {
    tables: RwLock<HashMap<String, Table>>,
    page_size: usize,
}

impl Default for InMemoryOrderedService {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl InMemoryOrderedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }

    fn fetch_page(
        &self,
        table: &str,
        after: &Bound<Vec<u8>>,
        stop: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, ColumnMap)>, ServiceError> {
        let tables = self.tables.read().map_err(|_| ServiceError::Poisoned)?;
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        let page = rows
            .range((after.clone(), Bound::Unbounded))
            .take_while(|(key, _)| stop.is_none_or(|s| key.as_slice() < s))
            .take(self.page_size)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(page)
    }
}

impl OrderedService for InMemoryOrderedService {
    fn mutate_row(
        &self,
        table: &str,
        row: &[u8],
        mutations: &[Mutation],
    ) -> Result<(), ServiceError> {
        let mut tables = self.tables.write().map_err(|_| ServiceError::Poisoned)?;
        let rows = tables.entry(table.to_string()).or_default();
        let columns = rows.entry(row.to_vec()).or_default();
        for m in mutations {
            match &m.value {
                Some(value) => {
                    columns.insert(m.column.clone(), value.clone());
                }
                None => {
                    columns.remove(&m.column);
                }
            }
        }
        if columns.is_empty() {
            rows.remove(row);
        }
        Ok(())
    }

    fn delete_all_row(&self, table: &str, row: &[u8]) -> Result<(), ServiceError> {
        let mut tables = self.tables.write().map_err(|_| ServiceError::Poisoned)?;
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(row);
        }
        Ok(())
    }

    fn get_row(
        &self,
        table: &str,
        row: &[u8],
        columns: &[Vec<u8>],
    ) -> Result<ColumnMap, ServiceError> {
        let specs = parse_columns(columns)?;
        let tables = self.tables.read().map_err(|_| ServiceError::Poisoned)?;
        let found = tables
            .get(table)
            .and_then(|rows| rows.get(row))
            .cloned()
            .unwrap_or_default();
        Ok(project(found, &specs))
    }

    fn scan<'a>(
        &'a self,
        table: &str,
        request: OrderedScan,
    ) -> Result<ServiceRows<'a>, ServiceError> {
        let specs = parse_columns(&request.columns)?;
        let cursor = match request.start {
            Some(start) => Bound::Included(start),
            None => Bound::Unbounded,
        };
        Ok(Box::new(PagedScan {
            service: self,
            table: table.to_string(),
            cursor,
            stop: request.stop,
            specs,
            filter: request.filter,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }
}

/// Lazy scan cursor over an `InMemoryOrderedService` table.
struct PagedScan<'a> {
    service: &'a InMemoryOrderedService,
    table: String,
    cursor: Bound<Vec<u8>>,
    stop: Option<Vec<u8>>,
    specs: Vec<ColumnSpec>,
    filter: Option<FilterExpr>,
    buffer: VecDeque<(Vec<u8>, ColumnMap)>,
    exhausted: bool,
}

impl PagedScan<'_> {
    fn refill(&mut self) -> Result<(), ServiceError> {
        let page = self
            .service
            .fetch_page(&self.table, &self.cursor, self.stop.as_deref())?;
        if page.len() < self.service.page_size {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.cursor = Bound::Excluded(last.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }

    fn shape(&self, row: ColumnMap) -> Option<ColumnMap> {
        if let Some(filter) = &self.filter {
            if !filter.row_matches(&row) {
                return None;
            }
        }
        let mut projected = project(row, &self.specs);
        if projected.is_empty() {
            return None;
        }
        if self.filter.as_ref().is_some_and(FilterExpr::is_key_only) {
            for value in projected.values_mut() {
                value.clear();
            }
        }
        Some(projected)
    }
}

impl Iterator for PagedScan<'_> {
    type Item = Result<(Vec<u8>, ColumnMap), ServiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, row)) = self.buffer.pop_front() {
                if let Some(shaped) = self.shape(row) {
                    return Some(Ok((key, shaped)));
                }
                continue;
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}
