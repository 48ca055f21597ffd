//! Row stores: the backend contract, its two implementations and the
//! prefix-checked table facade.

pub mod backend;
pub mod filter;
pub mod guarded;
pub mod hashmap;
pub mod ordered;
pub mod services;

pub use backend::{ColumnFilter, FilterOp, Row, RowScan, ScanRequest, StoreBackend};
pub use filter::{CompareOp, Comparator, FilterExpr};
pub use guarded::{GuardedTable, SliceLimits};
pub use hashmap::HashMapStore;
pub use ordered::OrderedStore;
