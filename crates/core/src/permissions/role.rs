//! Capabilities and the roles that bundle them.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PermissionError;

/// Name of the role every user holds implicitly.
pub const DEFAULT_ROLE: &str = "default";

/// One boolean permission primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    AddLock,
    RemoveLock,
    Write,
    GrantPermissions,
    ModifyRoles,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Self::AddLock,
        Self::RemoveLock,
        Self::Write,
        Self::GrantPermissions,
        Self::ModifyRoles,
    ];

    /// Canonical (field) name.
    pub fn name(self) -> &'static str {
        match self {
            Self::AddLock => "can_add_lock",
            Self::RemoveLock => "can_remove_lock",
            Self::Write => "can_write",
            Self::GrantPermissions => "can_grant_permissions",
            Self::ModifyRoles => "can_modify_roles",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = PermissionError;

    /// Accepts the canonical names and the legacy `roles_*` registry names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "can_add_lock" | "roles_add_locks" => Ok(Self::AddLock),
            "can_remove_lock" | "roles_remove_locks" => Ok(Self::RemoveLock),
            "can_write" | "roles_write" => Ok(Self::Write),
            "can_grant_permissions" | "roles_grant" => Ok(Self::GrantPermissions),
            "can_modify_roles" | "roles_modify_roles" => Ok(Self::ModifyRoles),
            other => Err(PermissionError::UnknownCapability(other.to_string())),
        }
    }
}

/// A named bundle of capability grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub can_add_lock: bool,
    #[serde(default)]
    pub can_remove_lock: bool,
    #[serde(default)]
    pub can_write: bool,
    #[serde(default)]
    pub can_grant_permissions: bool,
    #[serde(default)]
    pub can_modify_roles: bool,
}

impl Role {
    /// A role with no capabilities.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A role granting every capability in `capabilities`.
    pub fn with(name: impl Into<String>, capabilities: &[Capability]) -> Self {
        let mut role = Self::new(name);
        for cap in capabilities {
            role.set(*cap, true);
        }
        role
    }

    /// The implicit role of a registry that has never been configured:
    /// anyone may lock and write, nobody may administer.
    pub fn default_role() -> Self {
        Self::with(DEFAULT_ROLE, &[Capability::AddLock, Capability::Write])
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::AddLock => self.can_add_lock,
            Capability::RemoveLock => self.can_remove_lock,
            Capability::Write => self.can_write,
            Capability::GrantPermissions => self.can_grant_permissions,
            Capability::ModifyRoles => self.can_modify_roles,
        }
    }

    pub fn set(&mut self, capability: Capability, granted: bool) {
        let slot = match capability {
            Capability::AddLock => &mut self.can_add_lock,
            Capability::RemoveLock => &mut self.can_remove_lock,
            Capability::Write => &mut self.can_write,
            Capability::GrantPermissions => &mut self.can_grant_permissions,
            Capability::ModifyRoles => &mut self.can_modify_roles,
        };
        *slot = granted;
    }

    /// Capabilities this role grants, in declaration order.
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL.into_iter().filter(|c| self.has(*c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_spellings() {
        assert_eq!("can_write".parse::<Capability>().unwrap(), Capability::Write);
        assert_eq!("roles_write".parse::<Capability>().unwrap(), Capability::Write);
        assert_eq!(
            "roles_modify_roles".parse::<Capability>().unwrap(),
            Capability::ModifyRoles
        );
        for cap in Capability::ALL {
            assert_eq!(cap.name().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            "can_teleport".parse::<Capability>(),
            Err(PermissionError::UnknownCapability("can_teleport".into()))
        );
    }

    #[test]
    fn test_set_and_has() {
        let mut role = Role::new("engineer");
        assert!(role.capabilities().is_empty());
        role.set(Capability::RemoveLock, true);
        assert!(role.has(Capability::RemoveLock));
        assert!(!role.has(Capability::Write));
        role.set(Capability::RemoveLock, false);
        assert!(!role.has(Capability::RemoveLock));
    }

    #[test]
    fn test_default_role() {
        let role = Role::default_role();
        assert_eq!(role.name, DEFAULT_ROLE);
        assert_eq!(role.capabilities(), vec![Capability::AddLock, Capability::Write]);
    }
}
