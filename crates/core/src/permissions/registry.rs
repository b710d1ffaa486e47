//! The permission registry: role definitions, user → role assignments and
//! per-file overrides, persisted as `.meg/permissions.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::role::{Capability, Role, DEFAULT_ROLE};
use crate::errors::{LedgerError, PermissionError};
use crate::ledger;

/// Name of the role created by [`PermissionRegistry::bootstrap`].
pub const ADMIN_ROLE: &str = "admin";

/// Per-path exception to global permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOverride {
    #[serde(default)]
    pub readonly: bool,
    /// Roles granted write access to this path.
    #[serde(default, rename = "roles")]
    pub granted_roles: BTreeSet<String>,
    /// Users granted write access to this path.
    #[serde(default, rename = "users")]
    pub granted_users: BTreeSet<String>,
}

impl FileOverride {
    fn is_empty(&self) -> bool {
        !self.readonly && self.granted_roles.is_empty() && self.granted_users.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    roles: BTreeMap<String, Role>,
    #[serde(default)]
    users: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    files: BTreeMap<String, FileOverride>,
}

impl RegistryData {
    /// Restore the invariants: `default` exists, every role has its name,
    /// and no assignment or override references an undefined role.
    fn sanitize(&mut self) {
        for (name, role) in self.roles.iter_mut() {
            role.name = name.clone();
        }
        self.roles
            .entry(DEFAULT_ROLE.to_string())
            .or_insert_with(Role::default_role);

        let roles = &self.roles;
        for (user, assigned) in self.users.iter_mut() {
            assigned.retain(|r| {
                let keep = r != DEFAULT_ROLE && roles.contains_key(r);
                if !keep && r != DEFAULT_ROLE {
                    warn!(user = %user, role = %r, "dropping assignment of undefined role");
                }
                keep
            });
        }
        self.users.retain(|_, assigned| !assigned.is_empty());

        for ov in self.files.values_mut() {
            ov.granted_roles.retain(|r| roles.contains_key(r));
        }
        self.files.retain(|_, ov| !ov.is_empty());
    }
}

/// Roles, user role assignments and per-file overrides, with the
/// authorization queries built on them.
#[derive(Debug, Clone)]
pub struct PermissionRegistry {
    location: Option<PathBuf>,
    data: RegistryData,
}

impl Default for PermissionRegistry {
    fn default() -> Self {
        let mut data = RegistryData::default();
        data.sanitize();
        Self {
            location: None,
            data,
        }
    }
}

impl PartialEq for PermissionRegistry {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl PermissionRegistry {
    // -----------------------------------------------------------------------
    // Construction & persistence
    // -----------------------------------------------------------------------

    /// A default registry that saves to `location`.
    pub fn new<P: Into<PathBuf>>(location: P) -> Self {
        Self {
            location: Some(location.into()),
            ..Default::default()
        }
    }

    /// A fresh registry in which `owner` holds an `admin` role granting
    /// every capability.
    pub fn bootstrap<P: Into<PathBuf>>(location: P, owner: &str) -> Self {
        let mut registry = Self::new(location);
        registry
            .data
            .roles
            .insert(ADMIN_ROLE.to_string(), Role::with(ADMIN_ROLE, &Capability::ALL));
        registry
            .data
            .users
            .entry(owner.to_string())
            .or_default()
            .insert(ADMIN_ROLE.to_string());
        info!(owner, "bootstrapped permission registry");
        registry
    }

    /// Open the registry at `location`; missing or corrupt files yield the
    /// default registry.
    pub fn open<P: Into<PathBuf>>(location: P) -> Self {
        let mut registry = Self::new(location);
        if let Some(path) = registry.location.clone() {
            registry.load(&path);
        }
        registry
    }

    /// Parse a registry from raw bytes. The result has no file location.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            location: None,
            data: parse_data(bytes),
        }
    }

    /// Parse a registry from raw bytes, e.g. a committed blob, that saves
    /// to `location`.
    pub fn from_slice_at<P: Into<PathBuf>>(location: P, bytes: &[u8]) -> Self {
        Self {
            location: Some(location.into()),
            data: parse_data(bytes),
        }
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Replace the in-memory state with the registry stored at `source`.
    pub fn load(&mut self, source: &Path) {
        self.data = ledger::read_if_present(source)
            .map(|bytes| parse_data(&bytes))
            .unwrap_or_else(|| {
                let mut data = RegistryData::default();
                data.sanitize();
                data
            });
        debug!(
            path = %source.display(),
            roles = self.data.roles.len(),
            users = self.data.users.len(),
            "permission registry loaded"
        );
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let mut bytes = serde_json::to_vec_pretty(&self.data)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn save(&self) -> Result<(), LedgerError> {
        let location = self.location.as_deref().ok_or(LedgerError::NoLocation)?;
        ledger::write_atomic(location, &self.to_json_bytes()?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Names of every role `user` holds, `default` included.
    fn role_names_for<'a>(&'a self, user: &str) -> impl Iterator<Item = &'a str> + 'a {
        std::iter::once(DEFAULT_ROLE).chain(
            self.data
                .users
                .get(user)
                .into_iter()
                .flat_map(|set| set.iter().map(String::as_str)),
        )
    }

    /// `true` if any role held by `user` grants `capability`.
    pub fn has_capability(&self, user: &str, capability: Capability) -> bool {
        self.role_names_for(user)
            .filter_map(|name| self.data.roles.get(name))
            .any(|role| role.has(capability))
    }

    pub fn can_lock(&self, user: &str) -> bool {
        self.has_capability(user, Capability::AddLock)
    }

    /// Whether `user` may remove locks held by others. Owners may always
    /// remove their own locks; that rule lives in `Locking`.
    pub fn can_remove_lock(&self, user: &str) -> bool {
        self.has_capability(user, Capability::RemoveLock)
    }

    /// Whether `user` may edit the registry itself.
    pub fn can_administer(&self, user: &str) -> bool {
        self.has_capability(user, Capability::GrantPermissions)
            || self.has_capability(user, Capability::ModifyRoles)
    }

    /// Whether `user` may write `path`, honouring per-file overrides.
    pub fn can_write(&self, user: &str, path: &str) -> bool {
        match self.data.files.get(path) {
            Some(ov) => !ov.readonly && self.override_grants(ov, user),
            None => self.has_capability(user, Capability::Write),
        }
    }

    fn override_grants(&self, ov: &FileOverride, user: &str) -> bool {
        ov.granted_users.contains(user)
            || self
                .role_names_for(user)
                .any(|r| ov.granted_roles.contains(r))
            || self.has_capability(user, Capability::Write)
    }

    /// `can_write` evaluated as if the path were not readonly.
    fn could_write(&self, user: &str, path: &str) -> bool {
        match self.data.files.get(path) {
            Some(ov) => self.override_grants(ov, user),
            None => self.has_capability(user, Capability::Write),
        }
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.data.roles.get(name)
    }

    pub fn file_override(&self, path: &str) -> Option<&FileOverride> {
        self.data.files.get(path)
    }

    pub fn file_overrides(&self) -> impl Iterator<Item = (&str, &FileOverride)> {
        self.data.files.iter().map(|(path, o)| (path.as_str(), o))
    }

    pub fn get_roles(&self) -> Vec<&Role> {
        self.data.roles.values().collect()
    }

    /// Users with at least one explicit role assignment.
    pub fn get_users(&self) -> Vec<&str> {
        self.data.users.keys().map(String::as_str).collect()
    }

    /// Roles held by `user`, `default` first.
    pub fn get_roles_for_user(&self, user: &str) -> Vec<String> {
        self.role_names_for(user).map(str::to_string).collect()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    fn require(&self, actor: &str, capability: Capability) -> Result<(), PermissionError> {
        if self.has_capability(actor, capability) {
            Ok(())
        } else {
            warn!(actor, %capability, "permission denied");
            Err(PermissionError::Denied {
                user: actor.to_string(),
                capability: capability.to_string(),
            })
        }
    }

    fn require_role(&self, name: &str) -> Result<(), PermissionError> {
        if self.data.roles.contains_key(name) {
            Ok(())
        } else {
            Err(PermissionError::RoleNotFound(name.to_string()))
        }
    }

    pub fn create_role(&mut self, actor: &str, name: &str) -> Result<&Role, PermissionError> {
        self.require(actor, Capability::ModifyRoles)?;
        if name == DEFAULT_ROLE {
            return Err(PermissionError::ReservedRole(name.to_string()));
        }
        if self.data.roles.contains_key(name) {
            return Err(PermissionError::RoleExists(name.to_string()));
        }
        info!(actor, role = name, "role created");
        Ok(self
            .data
            .roles
            .entry(name.to_string())
            .or_insert_with(|| Role::new(name)))
    }

    /// Delete a role and strip it from every assignment and file override.
    pub fn delete_role(&mut self, actor: &str, name: &str) -> Result<Role, PermissionError> {
        self.require(actor, Capability::ModifyRoles)?;
        if name == DEFAULT_ROLE {
            return Err(PermissionError::ReservedRole(name.to_string()));
        }
        let role = self
            .data
            .roles
            .remove(name)
            .ok_or_else(|| PermissionError::RoleNotFound(name.to_string()))?;

        for assigned in self.data.users.values_mut() {
            assigned.remove(name);
        }
        self.data.users.retain(|_, assigned| !assigned.is_empty());
        for ov in self.data.files.values_mut() {
            ov.granted_roles.remove(name);
        }
        self.data.files.retain(|_, ov| !ov.is_empty());

        info!(actor, role = name, "role deleted");
        Ok(role)
    }

    /// Assign `role` to `user`.
    pub fn grant_role(&mut self, actor: &str, user: &str, role: &str) -> Result<(), PermissionError> {
        self.require(actor, Capability::GrantPermissions)?;
        self.require_role(role)?;
        if role == DEFAULT_ROLE {
            return Err(PermissionError::ReservedRole(role.to_string()));
        }
        self.data
            .users
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string());
        info!(actor, user, role, "role granted");
        Ok(())
    }

    /// Unassign `role` from `user`.
    pub fn remove_role(&mut self, actor: &str, user: &str, role: &str) -> Result<(), PermissionError> {
        self.require(actor, Capability::GrantPermissions)?;
        self.require_role(role)?;
        if role == DEFAULT_ROLE {
            return Err(PermissionError::ReservedRole(role.to_string()));
        }
        if let Some(assigned) = self.data.users.get_mut(user) {
            assigned.remove(role);
            if assigned.is_empty() {
                self.data.users.remove(user);
            }
        }
        info!(actor, user, role, "role removed");
        Ok(())
    }

    /// Grant `capability` to `role`, globally or (for `can_write`) on `path`.
    pub fn add_role_permission(
        &mut self,
        actor: &str,
        role: &str,
        capability: &str,
        path: Option<&str>,
    ) -> Result<(), PermissionError> {
        self.set_role_permission(actor, role, capability, path, true)
    }

    /// Revoke `capability` from `role`, globally or (for `can_write`) on `path`.
    pub fn remove_role_permission(
        &mut self,
        actor: &str,
        role: &str,
        capability: &str,
        path: Option<&str>,
    ) -> Result<(), PermissionError> {
        self.set_role_permission(actor, role, capability, path, false)
    }

    fn set_role_permission(
        &mut self,
        actor: &str,
        role: &str,
        capability: &str,
        path: Option<&str>,
        granted: bool,
    ) -> Result<(), PermissionError> {
        // Unknown names are rejected before any authorization check.
        let capability: Capability = capability.parse()?;
        self.require(actor, Capability::ModifyRoles)?;
        self.require_role(role)?;

        match path {
            None => {
                if let Some(r) = self.data.roles.get_mut(role) {
                    r.set(capability, granted);
                }
            }
            Some(path) => {
                if capability != Capability::Write {
                    return Err(PermissionError::NotPathScoped(capability.to_string()));
                }
                let ov = self.data.files.entry(path.to_string()).or_default();
                if granted {
                    ov.granted_roles.insert(role.to_string());
                } else {
                    ov.granted_roles.remove(role);
                }
                self.prune_override(path);
            }
        }
        info!(actor, role, %capability, ?path, granted, "role permission updated");
        Ok(())
    }

    /// Mark `path` readonly for everyone, or clear the flag.
    ///
    /// The actor must be able to write the path. The flag itself is left
    /// out of that check: a readonly path stays unwritable only until the
    /// override is cleared, so someone with write access must be able to
    /// clear it.
    pub fn set_file_readonly(&mut self, actor: &str, path: &str, readonly: bool) -> Result<(), PermissionError> {
        if !self.could_write(actor, path) {
            warn!(actor, path, "readonly change denied");
            return Err(PermissionError::Denied {
                user: actor.to_string(),
                capability: Capability::Write.to_string(),
            });
        }
        self.data.files.entry(path.to_string()).or_default().readonly = readonly;
        self.prune_override(path);
        info!(actor, path, readonly, "file readonly flag set");
        Ok(())
    }

    /// Give `user` write access to `path` regardless of their roles.
    pub fn grant_user_file_write(&mut self, actor: &str, user: &str, path: &str) -> Result<(), PermissionError> {
        self.require(actor, Capability::GrantPermissions)?;
        self.data
            .files
            .entry(path.to_string())
            .or_default()
            .granted_users
            .insert(user.to_string());
        info!(actor, user, path, "file write granted to user");
        Ok(())
    }

    pub fn revoke_user_file_write(&mut self, actor: &str, user: &str, path: &str) -> Result<(), PermissionError> {
        self.require(actor, Capability::GrantPermissions)?;
        if let Some(ov) = self.data.files.get_mut(path) {
            ov.granted_users.remove(user);
        }
        self.prune_override(path);
        info!(actor, user, path, "file write revoked from user");
        Ok(())
    }

    fn prune_override(&mut self, path: &str) {
        if self.data.files.get(path).is_some_and(FileOverride::is_empty) {
            self.data.files.remove(path);
        }
    }
}

fn parse_data(bytes: &[u8]) -> RegistryData {
    let mut data = if bytes.iter().all(u8::is_ascii_whitespace) {
        RegistryData::default()
    } else {
        serde_json::from_slice::<RegistryData>(bytes).unwrap_or_else(|e| {
            warn!(error = %e, "corrupt permission registry, using defaults");
            RegistryData::default()
        })
    };
    data.sanitize();
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A registry where `default` grants nothing, `manager` may do
    /// everything and `engineer` may only lock.
    fn team_registry() -> PermissionRegistry {
        let json = r#"{
            "roles": {
                "default": {},
                "manager": {
                    "can_add_lock": true, "can_remove_lock": true, "can_write": true,
                    "can_grant_permissions": true, "can_modify_roles": true
                },
                "engineer": { "can_add_lock": true }
            },
            "users": {
                "boss": ["manager"],
                "A": ["engineer"],
                "writer": ["manager"]
            }
        }"#;
        PermissionRegistry::from_slice(json.as_bytes())
    }

    #[test]
    fn test_default_registry_is_open_but_unadministered() {
        let reg = PermissionRegistry::default();
        assert!(reg.can_write("anyone", "a.txt"));
        assert!(reg.can_lock("anyone"));
        assert!(!reg.can_remove_lock("anyone"));
        assert!(!reg.can_administer("anyone"));
        assert_eq!(reg.get_roles_for_user("anyone"), vec!["default"]);
    }

    #[test]
    fn test_engineer_gains_write_through_role_permission() {
        let mut reg = team_registry();
        assert!(!reg.can_write("A", "misc.txt"));

        reg.add_role_permission("boss", "engineer", "can_write", None).unwrap();
        assert!(reg.can_write("A", "misc.txt"));
    }

    #[test]
    fn test_readonly_override_beats_global_write() {
        let mut reg = team_registry();
        assert!(reg.can_write("writer", "potato.obj"));

        reg.set_file_readonly("boss", "potato.obj", true).unwrap();
        assert!(!reg.can_write("writer", "potato.obj"));
        assert!(!reg.can_write("boss", "potato.obj"));
        assert!(reg.can_write("writer", "other.obj"));

        reg.set_file_readonly("boss", "potato.obj", false).unwrap();
        assert!(reg.can_write("writer", "potato.obj"));
        assert!(reg.file_override("potato.obj").is_none());
    }

    #[test]
    fn test_readonly_cleared_only_by_underlying_writer() {
        let mut reg = team_registry();
        reg.set_file_readonly("writer", "potato.obj", true).unwrap();
        assert!(!reg.can_write("writer", "potato.obj"));

        // A user without write access cannot lift the flag.
        let err = reg.set_file_readonly("A", "potato.obj", false).unwrap_err();
        assert!(matches!(err, PermissionError::Denied { .. }));
        assert!(reg.file_override("potato.obj").is_some_and(|o| o.readonly));

        // The flag does not lock out the writer who could otherwise write.
        reg.set_file_readonly("writer", "potato.obj", false).unwrap();
        assert!(reg.can_write("writer", "potato.obj"));
    }

    #[test]
    fn test_set_readonly_requires_write() {
        let mut reg = team_registry();
        let err = reg.set_file_readonly("A", "potato.obj", true).unwrap_err();
        assert!(matches!(err, PermissionError::Denied { .. }));
        assert!(reg.file_override("potato.obj").is_none());
    }

    #[test]
    fn test_file_scoped_role_grant() {
        let mut reg = team_registry();
        reg.add_role_permission("boss", "engineer", "can_write", Some("rig.blend"))
            .unwrap();
        assert!(reg.can_write("A", "rig.blend"));
        assert!(!reg.can_write("A", "other.blend"));

        reg.remove_role_permission("boss", "engineer", "roles_write", Some("rig.blend"))
            .unwrap();
        assert!(!reg.can_write("A", "rig.blend"));
        assert!(reg.file_override("rig.blend").is_none());
    }

    #[test]
    fn test_file_scoped_non_write_capability_rejected() {
        let mut reg = team_registry();
        let err = reg
            .add_role_permission("boss", "engineer", "can_remove_lock", Some("x"))
            .unwrap_err();
        assert_eq!(err, PermissionError::NotPathScoped("can_remove_lock".into()));
        assert!(!err.is_denial());
    }

    #[test]
    fn test_user_file_grant() {
        let mut reg = team_registry();
        reg.grant_user_file_write("boss", "A", "notes.txt").unwrap();
        assert!(reg.can_write("A", "notes.txt"));
        reg.revoke_user_file_write("boss", "A", "notes.txt").unwrap();
        assert!(!reg.can_write("A", "notes.txt"));

        assert!(reg.grant_user_file_write("A", "A", "notes.txt").is_err());
    }

    #[test]
    fn test_unknown_capability_always_errors() {
        let mut reg = team_registry();
        for actor in ["boss", "A", "nobody"] {
            for role in ["engineer", "ghost"] {
                let err = reg
                    .add_role_permission(actor, role, "can_fly", None)
                    .unwrap_err();
                assert_eq!(err, PermissionError::UnknownCapability("can_fly".into()));
            }
        }
        let err = reg
            .remove_role_permission("boss", "engineer", "", Some("x"))
            .unwrap_err();
        assert!(!err.is_denial());
    }

    #[test]
    fn test_role_permission_denials() {
        let mut reg = team_registry();
        assert!(matches!(
            reg.add_role_permission("A", "engineer", "can_write", None),
            Err(PermissionError::Denied { .. })
        ));
        assert_eq!(
            reg.add_role_permission("boss", "ghost", "can_write", None),
            Err(PermissionError::RoleNotFound("ghost".into()))
        );
    }

    #[test]
    fn test_default_role_cannot_be_created_or_deleted() {
        let mut reg = team_registry();
        for actor in ["boss", "A"] {
            assert!(reg.create_role(actor, "default").is_err());
            assert!(reg.delete_role(actor, "default").is_err());
        }
        assert!(reg.role("default").is_some());
        assert_eq!(
            reg.create_role("boss", "default").unwrap_err(),
            PermissionError::ReservedRole("default".into())
        );
    }

    #[test]
    fn test_create_role() {
        let mut reg = team_registry();
        assert!(matches!(
            reg.create_role("A", "artist"),
            Err(PermissionError::Denied { .. })
        ));
        let role = reg.create_role("boss", "artist").unwrap();
        assert_eq!(role.name, "artist");
        assert!(role.capabilities().is_empty());
        assert_eq!(
            reg.create_role("boss", "artist").unwrap_err(),
            PermissionError::RoleExists("artist".into())
        );
    }

    #[test]
    fn test_delete_role_strips_references() {
        let mut reg = team_registry();
        reg.add_role_permission("boss", "engineer", "can_write", Some("rig.blend"))
            .unwrap();
        reg.delete_role("boss", "engineer").unwrap();

        assert!(reg.role("engineer").is_none());
        assert_eq!(reg.get_roles_for_user("A"), vec!["default"]);
        assert!(!reg.get_users().contains(&"A"));
        assert!(reg.file_override("rig.blend").is_none());
        assert_eq!(
            reg.delete_role("boss", "engineer").unwrap_err(),
            PermissionError::RoleNotFound("engineer".into())
        );
    }

    #[test]
    fn test_grant_and_remove_role() {
        let mut reg = team_registry();
        assert!(!reg.can_remove_lock("A"));
        reg.grant_role("boss", "A", "manager").unwrap();
        assert!(reg.can_remove_lock("A"));
        assert_eq!(reg.get_roles_for_user("A"), vec!["default", "engineer", "manager"]);

        reg.remove_role("boss", "A", "manager").unwrap();
        assert!(!reg.can_remove_lock("A"));

        assert!(matches!(
            reg.grant_role("A", "A", "manager"),
            Err(PermissionError::Denied { .. })
        ));
        assert_eq!(
            reg.grant_role("boss", "A", "ghost").unwrap_err(),
            PermissionError::RoleNotFound("ghost".into())
        );
        assert_eq!(
            reg.remove_role("boss", "A", "default").unwrap_err(),
            PermissionError::ReservedRole("default".into())
        );
    }

    #[test]
    fn test_load_sanitizes_dangling_roles() {
        let json = r#"{
            "roles": { "artist": { "can_write": true } },
            "users": { "amy": ["artist", "ghost", "default"], "bob": ["ghost"] },
            "files": { "a.png": { "roles": ["ghost"] } }
        }"#;
        let reg = PermissionRegistry::from_slice(json.as_bytes());
        assert!(reg.role("default").is_some());
        assert_eq!(reg.get_roles_for_user("amy"), vec!["default", "artist"]);
        assert_eq!(reg.get_users(), vec!["amy"]);
        assert!(reg.file_override("a.png").is_none());
    }

    #[test]
    fn test_corrupt_registry_is_default() {
        let reg = PermissionRegistry::from_slice(b"not json at all");
        assert_eq!(reg, PermissionRegistry::default());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".meg").join("permissions.json");
        let mut reg = PermissionRegistry::bootstrap(&path, "boss");
        reg.create_role("boss", "artist").unwrap();
        reg.add_role_permission("boss", "artist", "can_write", Some("hero.psd"))
            .unwrap();
        reg.set_file_readonly("boss", "final.mov", true).unwrap();
        reg.save().unwrap();
        let first = std::fs::read(&path).unwrap();

        let reopened = PermissionRegistry::open(&path);
        assert_eq!(reopened, reg);
        reopened.save().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_bootstrap_owner_is_admin() {
        let reg = PermissionRegistry::bootstrap("/tmp/unused.json", "boss");
        for cap in Capability::ALL {
            assert!(reg.has_capability("boss", cap));
        }
        assert!(!reg.can_administer("someone-else"));
    }
}
