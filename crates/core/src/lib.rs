//! `rowforge-core`: byte-key and column primitives shared by every backend.
//!
//! This crate contains no IO: just the key arithmetic, column addressing and
//! the error taxonomy that synchronous callers observe.

pub mod column;
pub mod error;
pub mod key;

pub use column::{ColumnMap, ColumnSpec, project, split_column};
pub use error::{StoreError, StoreResult};
pub use key::{RowKey, common_prefix, has_prefix, increment_prefix};
