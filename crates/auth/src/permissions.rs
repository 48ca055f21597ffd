use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::authorize::AuthError;

/// A single right over a key interval.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
}

/// Subset of `{read, write}`.
///
/// Textual form follows the grant strings clients send: `"r"`, `"w"`, `"rw"`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionSet {
    pub read: bool,
    pub write: bool,
}

impl PermissionSet {
    pub const NONE: Self = Self {
        read: false,
        write: false,
    };
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };

    pub fn contains(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
        }
    }

    /// `true` iff every right in `requested` is also granted here.
    pub fn is_superset_of(&self, requested: PermissionSet) -> bool {
        (!requested.read || self.read) && (!requested.write || self.write)
    }

    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }

    pub fn as_str(&self) -> &'static str {
        match (self.read, self.write) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "",
        }
    }
}

impl From<Permission> for PermissionSet {
    fn from(value: Permission) -> Self {
        match value {
            Permission::Read => Self::READ,
            Permission::Write => Self::WRITE,
        }
    }
}

impl FromStr for PermissionSet {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = PermissionSet::NONE;
        for c in s.chars() {
            match c {
                'r' => set.read = true,
                'w' => set.write = true,
                _ => {
                    return Err(AuthError::InvalidPermissions(s.to_string()));
                }
            }
        }
        Ok(set)
    }
}

impl core::fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
