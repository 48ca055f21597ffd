//! Store backend over a natively ordered table service.
//!
//! Scans come back in ascending key order; filters are translated into the
//! service's filter language and evaluated server-side.

use tracing::debug;

use rowforge_core::{ColumnMap, ColumnSpec, StoreError, StoreResult, split_column};

use super::backend::{ColumnFilter, FilterOp, RowScan, ScanRequest, StoreBackend};
use super::filter::{CompareOp, Comparator, FilterExpr, ensure_sanitary};
use super::services::{Mutation, OrderedScan, OrderedService};

/// Translate a scan's column filter into a server-side filter expression.
///
/// The family, the qualifier and the rendered comparator (`binary:<literal>`
/// or `binaryprefix:<literal>`) must be sanitary, otherwise the request is
/// rejected as malformed before reaching the service. An empty literal is
/// fine; a literal with characters outside `[a-zA-Z0-9@.:]` is not, even
/// though the hash-map store would evaluate it.
pub fn translate_filter(filter: &ColumnFilter) -> StoreResult<FilterExpr> {
    let (family, qualifier) = split_column(&filter.column).ok_or_else(|| {
        StoreError::malformed("filter", String::from_utf8_lossy(&filter.column))
    })?;
    ensure_sanitary(family)?;
    ensure_sanitary(qualifier)?;

    let literal = filter.literal.clone();
    let (op, comparator) = match filter.op {
        FilterOp::Equals => (CompareOp::Equal, Comparator::Binary(literal)),
        FilterOp::NotEquals => (CompareOp::NotEqual, Comparator::Binary(literal)),
        FilterOp::StartsWith => (CompareOp::Equal, Comparator::BinaryPrefix(literal)),
    };
    ensure_sanitary(comparator.rendered().as_bytes())?;
    Ok(FilterExpr::SingleColumnValue {
        family: family.to_vec(),
        qualifier: qualifier.to_vec(),
        op,
        comparator,
    })
}

/// Store backend delegating to an [`OrderedService`].
#[derive(Debug, Clone)]
pub struct OrderedStore<S> {
    service: S,
}

impl<S> OrderedStore<S>
where
    S: OrderedService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}

impl<S> StoreBackend for OrderedStore<S>
where
    S: OrderedService,
{
    fn get_row(&self, table: &str, key: &[u8], columns: &[Vec<u8>]) -> StoreResult<ColumnMap> {
        ColumnSpec::parse_all(columns)?;
        let row = self.service.get_row(table, key, columns)?;
        if row.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(row)
    }

    fn mutate_row(&self, table: &str, key: &[u8], columns: &ColumnMap) -> StoreResult<()> {
        if columns.is_empty() {
            return Ok(());
        }
        let mutations: Vec<Mutation> = columns
            .iter()
            .map(|(column, value)| Mutation::put(column.clone(), value.clone()))
            .collect();
        self.service.mutate_row(table, key, &mutations)?;
        Ok(())
    }

    fn delete_row(&self, table: &str, key: &[u8]) -> StoreResult<()> {
        self.service.delete_all_row(table, key)?;
        Ok(())
    }

    fn delete_column(&self, table: &str, key: &[u8], column: &[u8]) -> StoreResult<()> {
        self.service
            .mutate_row(table, key, &[Mutation::delete(column.to_vec())])?;
        Ok(())
    }

    fn scan<'a>(&'a self, table: &str, request: ScanRequest) -> StoreResult<RowScan<'a>> {
        ColumnSpec::parse_all(&request.columns)?;

        let mut terms = Vec::new();
        if let Some(filter) = &request.filter {
            terms.push(translate_filter(filter)?);
        }
        if request.keys_only {
            terms.push(FilterExpr::KeyOnly);
        }
        let filter = FilterExpr::and(terms);

        if let Some(expr) = &filter {
            debug!(table = %table, filter = %expr, "ordered scan");
        }

        let rows = self.service.scan(
            table,
            OrderedScan {
                start: request.start,
                stop: request.stop,
                columns: request.columns,
                filter,
            },
        )?;
        Ok(Box::new(rows.map(|r| r.map_err(StoreError::from))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::services::InMemoryOrderedService;

    fn store() -> OrderedStore<InMemoryOrderedService> {
        OrderedStore::new(InMemoryOrderedService::with_page_size(3))
    }

    fn row(pairs: &[(&str, &str)]) -> ColumnMap {
        pairs
            .iter()
            .map(|(c, v)| (c.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn translates_ops_to_filter_language() {
        let eq = ColumnFilter::new(b"meta:class".to_vec(), FilterOp::Equals, b"cat".to_vec());
        assert_eq!(
            translate_filter(&eq).unwrap().to_string(),
            "SingleColumnValueFilter ('meta', 'class', =, 'binary:cat', true, true)"
        );
        let prefix = ColumnFilter::new(b"meta:owner".to_vec(), FilterOp::StartsWith, b"bob@".to_vec());
        assert_eq!(
            translate_filter(&prefix).unwrap().to_string(),
            "SingleColumnValueFilter ('meta', 'owner', =, 'binaryprefix:bob@', true, true)"
        );
        let ne = ColumnFilter::new(b"meta:class".to_vec(), FilterOp::NotEquals, b"dog".to_vec());
        assert_eq!(
            translate_filter(&ne).unwrap().to_string(),
            "SingleColumnValueFilter ('meta', 'class', !=, 'binary:dog', true, true)"
        );
    }

    #[test]
    fn unsanitary_filter_is_malformed() {
        let injected = ColumnFilter::new(
            b"meta:class".to_vec(),
            FilterOp::Equals,
            b"cat', true, true) OR (".to_vec(),
        );
        assert!(matches!(translate_filter(&injected), Err(StoreError::Backend(_))));

        let s = store();
        assert!(s
            .scan("images", ScanRequest::new().with_filter(injected))
            .is_err());
    }

    #[test]
    fn empty_literal_is_accepted() {
        let prefix = ColumnFilter::new(b"meta:class".to_vec(), FilterOp::StartsWith, Vec::new());
        assert_eq!(
            translate_filter(&prefix).unwrap().to_string(),
            "SingleColumnValueFilter ('meta', 'class', =, 'binaryprefix:', true, true)"
        );
        let eq = ColumnFilter::new(b"meta:class".to_vec(), FilterOp::Equals, Vec::new());
        assert!(translate_filter(&eq).is_ok());

        let underscore = ColumnFilter::new(b"meta:class".to_vec(), FilterOp::Equals, b"cat_1".to_vec());
        assert!(matches!(translate_filter(&underscore), Err(StoreError::Backend(_))));
    }

    #[test]
    fn get_row_absent_is_not_found() {
        let s = store();
        assert_eq!(s.get_row("images", b"nope", &[]), Err(StoreError::NotFound));

        s.mutate_row("images", b"a", &row(&[("data:image", "X")])).unwrap();
        assert_eq!(
            s.get_row("images", b"a", &[b"meta:".to_vec()]),
            Err(StoreError::NotFound)
        );
        assert_eq!(s.get_column("images", b"a", b"data:image").unwrap(), b"X".to_vec());
    }

    #[test]
    fn scan_returns_ascending_keys_with_filter_and_keys_only() {
        let s = store();
        for (key, class) in [("d", "cat"), ("a", "cat"), ("c", "dog"), ("b", "cat"), ("e", "cat")] {
            s.mutate_row("images", key.as_bytes(), &row(&[("data:image", key), ("meta:class", class)]))
                .unwrap();
        }

        let request = ScanRequest::range(b"a".to_vec(), b"e".to_vec())
            .with_columns([b"data:image".to_vec()])
            .with_filter(ColumnFilter::new(b"meta:class".to_vec(), FilterOp::Equals, b"cat".to_vec()))
            .keys_only();
        let rows: Vec<_> = s
            .scan("images", request)
            .unwrap()
            .map(Result::unwrap)
            .collect();

        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"d".to_vec()]);
        assert!(rows.iter().all(|(_, cols)| cols.values().all(Vec::is_empty)));
    }

    #[test]
    fn delete_column_and_row() {
        let s = store();
        s.mutate_row("t", b"r", &row(&[("f:a", "1"), ("f:b", "2")])).unwrap();
        s.delete_column("t", b"r", b"f:a").unwrap();
        assert_eq!(s.get_row("t", b"r", &[]).unwrap(), row(&[("f:b", "2")]));
        s.delete_row("t", b"r").unwrap();
        s.delete_row("t", b"r").unwrap();
        assert_eq!(s.get_row("t", b"r", &[]), Err(StoreError::NotFound));
    }
}
