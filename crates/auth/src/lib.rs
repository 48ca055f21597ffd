//! `rowforge-auth`: prefix-interval access control over row keys.
//!
//! This crate does not touch storage. It answers whether a
//! principal's prefix grants cover a key or a key range, nothing more.

pub mod authorize;
pub mod permissions;
pub mod prefixes;
pub mod principal;

pub use authorize::{AccessGuard, AccessTarget, AuthError};
pub use permissions::{Permission, PermissionSet};
pub use prefixes::{PrefixPermission, PrefixTable};
pub use principal::PrincipalId;
