use thiserror::Error;
use tracing::debug;

use rowforge_core::StoreError;

use crate::permissions::PermissionSet;
use crate::prefixes::{PrefixPermission, PrefixTable};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid prefix '{0}': must not end in 0xff")]
    InvalidPrefix(String),

    #[error("invalid permissions '{0}'")]
    InvalidPermissions(String),

    #[error("no prefix grants '{requested}' on {target}")]
    Unauthorized {
        target: String,
        requested: PermissionSet,
    },
}

impl From<AuthError> for StoreError {
    fn from(value: AuthError) -> Self {
        StoreError::Unauthorized(value.to_string())
    }
}

/// What an operation touches: one row key or a half-open `[start, stop)` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTarget<'a> {
    Key(&'a [u8]),
    Range { start: &'a [u8], stop: &'a [u8] },
}

impl AccessTarget<'_> {
    fn describe(&self) -> String {
        match self {
            AccessTarget::Key(key) => format!("key '{}'", String::from_utf8_lossy(key)),
            AccessTarget::Range { start, stop } => format!(
                "range ['{}', '{}')",
                String::from_utf8_lossy(start),
                String::from_utf8_lossy(stop)
            ),
        }
    }
}

/// Check `target` against every grant whose rights include `requested`.
///
/// - No IO
/// - Succeeds on the first covering grant, which is returned
/// - Never returns an empty "allowed nothing" result: denial is an error
pub fn authorize(
    target: AccessTarget<'_>,
    requested: PermissionSet,
    table: &PrefixTable,
) -> Result<PrefixPermission, AuthError> {
    for grant in table
        .iter()
        .filter(|g| g.permissions.is_superset_of(requested))
    {
        let covered = match target {
            AccessTarget::Key(key) => grant.covers_key(key),
            AccessTarget::Range { start, stop } => grant.covers_range(start, stop),
        };
        if covered {
            return Ok(grant);
        }
    }

    debug!(access = %target.describe(), requested = %requested, "access denied");
    Err(AuthError::Unauthorized {
        target: target.describe(),
        requested,
    })
}

/// Prefix guard bound to one principal's grants for one table.
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    table: PrefixTable,
}

impl AccessGuard {
    pub fn new(table: PrefixTable) -> Self {
        Self { table }
    }

    pub fn prefixes(&self) -> &PrefixTable {
        &self.table
    }

    pub fn prefixes_mut(&mut self) -> &mut PrefixTable {
        &mut self.table
    }

    pub fn validate(
        &self,
        target: AccessTarget<'_>,
        requested: PermissionSet,
    ) -> Result<PrefixPermission, AuthError> {
        authorize(target, requested, &self.table)
    }

    pub fn validate_key(&self, key: &[u8], requested: PermissionSet) -> Result<(), AuthError> {
        self.validate(AccessTarget::Key(key), requested).map(|_| ())
    }

    pub fn validate_range(
        &self,
        start: &[u8],
        stop: &[u8],
        requested: PermissionSet,
    ) -> Result<(), AuthError> {
        self.validate(AccessTarget::Range { start, stop }, requested)
            .map(|_| ())
    }
}
