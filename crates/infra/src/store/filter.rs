//! Server-side filter expressions for the ordered table service.
//!
//! Rendered in the service's textual filter language, e.g.
//! `SingleColumnValueFilter ('meta', 'class', =, 'binary:cat', true, true)`.
//! A row missing the tested column never matches (both flags are `true`:
//! filter-if-missing, latest-version-only).

use core::fmt;

use rowforge_core::{ColumnMap, StoreError, StoreResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
}

impl CompareOp {
    fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparator {
    Binary(Vec<u8>),
    BinaryPrefix(Vec<u8>),
}

impl Comparator {
    /// Comparator as it appears in a rendered filter, e.g. `binary:cat`.
    pub fn rendered(&self) -> String {
        let (kind, literal) = match self {
            Comparator::Binary(v) => ("binary", v),
            Comparator::BinaryPrefix(v) => ("binaryprefix", v),
        };
        format!("{kind}:{}", String::from_utf8_lossy(literal))
    }

    fn matches(&self, value: &[u8]) -> bool {
        match self {
            Comparator::Binary(literal) => value == literal.as_slice(),
            Comparator::BinaryPrefix(prefix) => value.starts_with(prefix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    KeyOnly,
    SingleColumnValue {
        family: Vec<u8>,
        qualifier: Vec<u8>,
        op: CompareOp,
        comparator: Comparator,
    },
    And(Vec<FilterExpr>),
}

/// Characters allowed inside a rendered filter literal.
pub fn is_sanitary(part: &[u8]) -> bool {
    !part.is_empty()
        && part
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'@' | b'.' | b':'))
}

pub fn ensure_sanitary(part: &[u8]) -> StoreResult<()> {
    if is_sanitary(part) {
        Ok(())
    } else {
        Err(StoreError::malformed(
            "filter",
            String::from_utf8_lossy(part),
        ))
    }
}

impl FilterExpr {
    /// Conjunction, flattening nested `And`s and dropping the wrapper for a
    /// single term.
    pub fn and(terms: impl IntoIterator<Item = FilterExpr>) -> Option<FilterExpr> {
        let mut flat = Vec::new();
        for term in terms {
            match term {
                FilterExpr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(FilterExpr::And(flat)),
        }
    }

    pub fn is_key_only(&self) -> bool {
        match self {
            FilterExpr::KeyOnly => true,
            FilterExpr::SingleColumnValue { .. } => false,
            FilterExpr::And(terms) => terms.iter().any(FilterExpr::is_key_only),
        }
    }

    /// Evaluate the value predicates against a full row.
    pub fn row_matches(&self, row: &ColumnMap) -> bool {
        match self {
            FilterExpr::KeyOnly => true,
            FilterExpr::SingleColumnValue {
                family,
                qualifier,
                op,
                comparator,
            } => {
                let mut column = family.clone();
                column.push(b':');
                column.extend_from_slice(qualifier);
                match row.get(&column) {
                    None => false,
                    Some(value) => match op {
                        CompareOp::Equal => comparator.matches(value),
                        CompareOp::NotEqual => !comparator.matches(value),
                    },
                }
            }
            FilterExpr::And(terms) => terms.iter().all(|t| t.row_matches(row)),
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::KeyOnly => f.write_str("KeyOnlyFilter()"),
            FilterExpr::SingleColumnValue {
                family,
                qualifier,
                op,
                comparator,
            } => {
                write!(
                    f,
                    "SingleColumnValueFilter ('{}', '{}', {}, '{}', true, true)",
                    String::from_utf8_lossy(family),
                    String::from_utf8_lossy(qualifier),
                    op.as_str(),
                    comparator.rendered()
                )
            }
            FilterExpr::And(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "{term}")?;
                }
                Ok(())
            }
        }
    }
}
