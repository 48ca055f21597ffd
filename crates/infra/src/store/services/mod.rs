//! Client seams to the external services the stores delegate to.
//!
//! `OrderedService` stands for a natively ordered table service (row keys
//! sorted, range scans, server-side filters). `HashService` stands for a
//! hash-map service with hash fields, sets, lists and blocking pops. The
//! in-memory implementations back tests/dev; the Redis adapter is gated behind
//! the `redis` feature.

pub mod hash_memory;
pub mod ordered_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use rowforge_core::{ColumnMap, StoreError};

use crate::store::filter::FilterExpr;

pub use hash_memory::InMemoryHashService;
pub use ordered_memory::InMemoryOrderedService;
#[cfg(feature = "redis")]
pub use self::redis::RedisHashService;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("service connection error: {0}")]
    Connection(String),

    #[error("service command error: {0}")]
    Command(String),

    #[error("service state lock poisoned")]
    Poisoned,
}

impl From<ServiceError> for StoreError {
    fn from(value: ServiceError) -> Self {
        StoreError::Backend(value.to_string())
    }
}

/// One column change inside a single-row mutation (`None` deletes the column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub column: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl Mutation {
    pub fn put(column: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            column: column.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(column: impl Into<Vec<u8>>) -> Self {
        Self {
            column: column.into(),
            value: None,
        }
    }
}

/// Native scan request of the ordered service.
///
/// `columns` are passed through as written by the caller: the service itself
/// understands `family:` as "every qualifier in the family".
#[derive(Debug, Clone, Default)]
pub struct OrderedScan {
    pub start: Option<Vec<u8>>,
    pub stop: Option<Vec<u8>>,
    pub columns: Vec<Vec<u8>>,
    pub filter: Option<FilterExpr>,
}

/// Lazily fetched `(row key, columns)` pairs.
pub type ServiceRows<'a> =
    Box<dyn Iterator<Item = Result<(Vec<u8>, ColumnMap), ServiceError>> + Send + 'a>;

/// Natively ordered table service.
pub trait OrderedService: Send + Sync {
    /// Apply all mutations to one row atomically.
    fn mutate_row(&self, table: &str, row: &[u8], mutations: &[Mutation])
        -> Result<(), ServiceError>;

    fn delete_all_row(&self, table: &str, row: &[u8]) -> Result<(), ServiceError>;

    /// Fetch a row (empty map when the row or every selected column is absent).
    fn get_row(&self, table: &str, row: &[u8], columns: &[Vec<u8>])
        -> Result<ColumnMap, ServiceError>;

    /// Ascending scan over `[start, stop)`.
    fn scan<'a>(&'a self, table: &str, request: OrderedScan)
        -> Result<ServiceRows<'a>, ServiceError>;
}

impl<S> OrderedService for Arc<S>
where
    S: OrderedService + ?Sized,
{
    fn mutate_row(
        &self,
        table: &str,
        row: &[u8],
        mutations: &[Mutation],
    ) -> Result<(), ServiceError> {
        (**self).mutate_row(table, row, mutations)
    }

    fn delete_all_row(&self, table: &str, row: &[u8]) -> Result<(), ServiceError> {
        (**self).delete_all_row(table, row)
    }

    fn get_row(
        &self,
        table: &str,
        row: &[u8],
        columns: &[Vec<u8>],
    ) -> Result<ColumnMap, ServiceError> {
        (**self).get_row(table, row, columns)
    }

    fn scan<'a>(
        &'a self,
        table: &str,
        request: OrderedScan,
    ) -> Result<ServiceRows<'a>, ServiceError> {
        (**self).scan(table, request)
    }
}

/// End of a list to push onto. Pops always take from the head.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ListEnd {
    Head,
    Tail,
}

/// Hash-map service primitives (hash fields, strings, sets, lists).
///
/// Key enumeration carries no ordering guarantee.
pub trait HashService: Send + Sync {
    /// Set several fields of one hash in a single atomic command.
    fn hset_multiple(&self, key: &[u8], fields: &[(Vec<u8>, Vec<u8>)])
        -> Result<(), ServiceError>;

    fn hgetall(&self, key: &[u8]) -> Result<ColumnMap, ServiceError>;

    fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError>;

    fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>, ServiceError>;

    fn hdel(&self, key: &[u8], field: &[u8]) -> Result<(), ServiceError>;

    fn del(&self, key: &[u8]) -> Result<(), ServiceError>;

    fn exists(&self, key: &[u8]) -> Result<bool, ServiceError>;

    /// Atomic set-if-absent; `true` when this call created the key.
    fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool, ServiceError>;

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError>;

    fn sadd(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError>;

    fn srem(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError>;

    fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError>;

    fn push(&self, key: &[u8], value: &[u8], end: ListEnd) -> Result<(), ServiceError>;

    /// Pop the head of the first non-empty list among `keys`, waiting up to
    /// `timeout`. Returns `(key, value)` or `None` on timeout.
    fn blocking_pop(
        &self,
        keys: &[Vec<u8>],
        timeout: Duration,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, ServiceError>;

    fn list_len(&self, key: &[u8]) -> Result<usize, ServiceError>;

    /// Drop every key in the service's database.
    fn flush_all(&self) -> Result<(), ServiceError>;
}

impl<S> HashService for Arc<S>
where
    S: HashService + ?Sized,
{
    fn hset_multiple(
        &self,
        key: &[u8],
        fields: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), ServiceError> {
        (**self).hset_multiple(key, fields)
    }

    fn hgetall(&self, key: &[u8]) -> Result<ColumnMap, ServiceError> {
        (**self).hgetall(key)
    }

    fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        (**self).hkeys(key)
    }

    fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        (**self).hget(key, field)
    }

    fn hdel(&self, key: &[u8], field: &[u8]) -> Result<(), ServiceError> {
        (**self).hdel(key, field)
    }

    fn del(&self, key: &[u8]) -> Result<(), ServiceError> {
        (**self).del(key)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, ServiceError> {
        (**self).exists(key)
    }

    fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool, ServiceError> {
        (**self).set_nx(key, value)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        (**self).keys_with_prefix(prefix)
    }

    fn sadd(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
        (**self).sadd(key, member)
    }

    fn srem(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
        (**self).srem(key, member)
    }

    fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        (**self).smembers(key)
    }

    fn push(&self, key: &[u8], value: &[u8], end: ListEnd) -> Result<(), ServiceError> {
        (**self).push(key, value, end)
    }

    fn blocking_pop(
        &self,
        keys: &[Vec<u8>],
        timeout: Duration,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, ServiceError> {
        (**self).blocking_pop(keys, timeout)
    }

    fn list_len(&self, key: &[u8]) -> Result<usize, ServiceError> {
        (**self).list_len(key)
    }

    fn flush_all(&self) -> Result<(), ServiceError> {
        (**self).flush_all()
    }
}
