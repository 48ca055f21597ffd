//! Column addressing (`family:qualifier`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Column name → value for one row. Ordered so rows compare and print stably.
pub type ColumnMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Split a column name at its first `:` into `(family, qualifier)`.
pub fn split_column(column: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = column.iter().position(|b| *b == b':')?;
    Some((&column[..idx], &column[idx + 1..]))
}

/// A column selector as accepted by `get_row` / `scan`.
///
/// `family:` (empty qualifier) selects every qualifier in the family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnSpec {
    Family(Vec<u8>),
    Qualified { family: Vec<u8>, qualifier: Vec<u8> },
}

impl ColumnSpec {
    pub fn parse(column: &[u8]) -> StoreResult<Self> {
        let (family, qualifier) = split_column(column).ok_or_else(|| {
            StoreError::malformed("column", String::from_utf8_lossy(column))
        })?;
        if family.is_empty() {
            return Err(StoreError::malformed(
                "column",
                String::from_utf8_lossy(column),
            ));
        }
        if qualifier.is_empty() {
            Ok(Self::Family(family.to_vec()))
        } else {
            Ok(Self::Qualified {
                family: family.to_vec(),
                qualifier: qualifier.to_vec(),
            })
        }
    }

    pub fn parse_all<C: AsRef<[u8]>>(columns: &[C]) -> StoreResult<Vec<Self>> {
        columns.iter().map(|c| Self::parse(c.as_ref())).collect()
    }

    pub fn family(&self) -> &[u8] {
        match self {
            ColumnSpec::Family(family) => family,
            ColumnSpec::Qualified { family, .. } => family,
        }
    }

    pub fn is_family(&self) -> bool {
        matches!(self, ColumnSpec::Family(_))
    }

    /// Whether a concrete stored column is selected by this spec.
    pub fn matches(&self, column: &[u8]) -> bool {
        match self {
            ColumnSpec::Family(family) => {
                split_column(column).is_some_and(|(f, _)| f == family.as_slice())
            }
            ColumnSpec::Qualified { family, qualifier } => split_column(column)
                .is_some_and(|(f, q)| f == family.as_slice() && q == qualifier.as_slice()),
        }
    }

    /// Wire form (`family:` or `family:qualifier`).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ColumnSpec::Family(family) => {
                let mut out = family.clone();
                out.push(b':');
                out
            }
            ColumnSpec::Qualified { family, qualifier } => {
                let mut out = Vec::with_capacity(family.len() + qualifier.len() + 1);
                out.extend_from_slice(family);
                out.push(b':');
                out.extend_from_slice(qualifier);
                out
            }
        }
    }
}

/// Keep only the columns selected by `specs` (all columns when `specs` is empty).
pub fn project(columns: ColumnMap, specs: &[ColumnSpec]) -> ColumnMap {
    if specs.is_empty() {
        return columns;
    }
    columns
        .into_iter()
        .filter(|(name, _)| specs.iter().any(|s| s.matches(name)))
        .collect()
}
