use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use rowforge_core::{has_prefix, increment_prefix};

use crate::authorize::AuthError;
use crate::permissions::PermissionSet;

/// Rights granted over every key `K` with `prefix <= K < increment(prefix)`.
///
/// The empty prefix covers the whole keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPermission {
    pub prefix: Vec<u8>,
    pub permissions: PermissionSet,
}

impl PrefixPermission {
    /// Exclusive upper bound of the covered interval (`None` for the empty prefix).
    pub fn upper_bound(&self) -> Option<Vec<u8>> {
        increment_prefix(&self.prefix)
    }

    pub fn covers_key(&self, key: &[u8]) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        match self.upper_bound() {
            Some(upper) => self.prefix.as_slice() <= key && key < upper.as_slice(),
            None => false,
        }
    }

    /// Both bounds must sit in the interval; `stop` may equal the exclusive
    /// upper bound exactly.
    pub fn covers_range(&self, start: &[u8], stop: &[u8]) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        match self.upper_bound() {
            Some(upper) => {
                let lower = self.prefix.as_slice();
                lower <= start
                    && start < upper.as_slice()
                    && lower <= stop
                    && stop <= upper.as_slice()
            }
            None => false,
        }
    }
}

/// One principal's registered prefix grants for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixTable {
    grants: BTreeMap<Vec<u8>, PermissionSet>,
}

impl PrefixTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a grant.
    ///
    /// Prefixes ending in `0xff` are rejected: their interval has no upper bound.
    pub fn grant(
        &mut self,
        prefix: impl Into<Vec<u8>>,
        permissions: PermissionSet,
    ) -> Result<(), AuthError> {
        let prefix = prefix.into();
        if prefix.last() == Some(&u8::MAX) {
            return Err(AuthError::InvalidPrefix(
                String::from_utf8_lossy(&prefix).into_owned(),
            ));
        }
        if permissions.is_empty() {
            return Err(AuthError::InvalidPermissions(String::new()));
        }
        debug!(
            prefix = %String::from_utf8_lossy(&prefix),
            permissions = %permissions,
            "prefix granted"
        );
        self.grants.insert(prefix, permissions);
        Ok(())
    }

    /// Builder-style `grant` for fixtures and configuration.
    pub fn with_grant(
        mut self,
        prefix: impl Into<Vec<u8>>,
        permissions: PermissionSet,
    ) -> Result<Self, AuthError> {
        self.grant(prefix, permissions)?;
        Ok(self)
    }

    /// Register `prefix` on behalf of `grantor`, which must already hold a
    /// prefix that `prefix` starts with and whose rights include `permissions`.
    pub fn delegate(
        &mut self,
        grantor: &PrefixTable,
        prefix: impl Into<Vec<u8>>,
        permissions: PermissionSet,
    ) -> Result<(), AuthError> {
        let prefix = prefix.into();
        let allowed = grantor.iter().any(|grant| {
            has_prefix(&prefix, &grant.prefix) && grant.permissions.is_superset_of(permissions)
        });
        if !allowed {
            return Err(AuthError::Unauthorized {
                target: String::from_utf8_lossy(&prefix).into_owned(),
                requested: permissions,
            });
        }
        self.grant(prefix, permissions)
    }

    /// Remove a grant; absent prefixes are ignored.
    pub fn revoke(&mut self, prefix: &[u8]) {
        self.grants.remove(prefix);
    }

    pub fn get(&self, prefix: &[u8]) -> Option<PermissionSet> {
        self.grants.get(prefix).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = PrefixPermission> + '_ {
        self.grants.iter().map(|(prefix, permissions)| PrefixPermission {
            prefix: prefix.clone(),
            permissions: *permissions,
        })
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_rejects_prefix_ending_in_max_byte() {
        let mut table = PrefixTable::new();
        let err = table.grant(vec![b'a', 0xff], PermissionSet::READ).unwrap_err();
        assert!(matches!(err, AuthError::InvalidPrefix(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn covers_key_uses_half_open_interval() {
        let grant = PrefixPermission {
            prefix: b"cats/".to_vec(),
            permissions: PermissionSet::READ,
        };
        assert!(grant.covers_key(b"cats/"));
        assert!(grant.covers_key(b"cats/1"));
        assert!(!grant.covers_key(b"cats0"));
        assert!(!grant.covers_key(b"cats"));
        assert!(!grant.covers_key(b"dogs/1"));
    }

    #[test]
    fn covers_range_allows_stop_at_upper_bound() {
        let grant = PrefixPermission {
            prefix: b"cats/".to_vec(),
            permissions: PermissionSet::READ,
        };
        assert!(grant.covers_range(b"cats/", b"cats0"));
        assert!(grant.covers_range(b"cats/1", b"cats/5"));
        assert!(!grant.covers_range(b"cats/", b"cats1"));
        assert!(!grant.covers_range(b"cat", b"cats0"));
    }

    #[test]
    fn delegate_requires_covering_grant_with_superset_rights() {
        let grantor = PrefixTable::new()
            .with_grant(b"users/alice/".to_vec(), PermissionSet::READ_WRITE)
            .unwrap()
            .with_grant(b"public/".to_vec(), PermissionSet::READ)
            .unwrap();

        let mut grantee = PrefixTable::new();
        grantee
            .delegate(&grantor, b"users/alice/cats/".to_vec(), PermissionSet::READ)
            .unwrap();
        assert_eq!(
            grantee.get(b"users/alice/cats/"),
            Some(PermissionSet::READ)
        );

        assert!(grantee
            .delegate(&grantor, b"public/x/".to_vec(), PermissionSet::READ_WRITE)
            .is_err());
        assert!(grantee
            .delegate(&grantor, b"users/bob/".to_vec(), PermissionSet::READ)
            .is_err());
    }

    #[test]
    fn revoke_removes_grant() {
        let mut table = PrefixTable::new()
            .with_grant(b"cats/".to_vec(), PermissionSet::READ)
            .unwrap();
        table.revoke(b"cats/");
        table.revoke(b"never-granted/");
        assert!(table.is_empty());
    }
}
