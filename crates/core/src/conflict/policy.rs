//! Lock- and permission-aware decisions for staging and for resolving
//! merge conflicts.
//!
//! Conflicts are resolved by the first matching rule:
//!
//! 1. the acting user may not write the path: take remote
//! 2. the path is locked by someone else: take remote
//! 3. the path is locked by the acting user: take local
//! 4. the path is the lock ledger: three-way merge the ledgers
//! 5. the path is the permission registry: take remote
//! 6. otherwise: ask the [`FallbackStrategy`]

use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::strategy::FallbackStrategy;
use crate::ledger::{LOCKFILE_PATH, PERMISSIONS_PATH};
use crate::locking::LockFile;
use crate::models::ExclusionReason;
use crate::permissions::PermissionRegistry;

/// One side of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// How a conflicted path is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Take(Side),
    MergeLocks,
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Take(side) => write!(f, "{side}"),
            Self::MergeLocks => write!(f, "merged"),
        }
    }
}

/// The rule that produced a [`Choice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    NotWritable,
    ForeignLock,
    OwnLock,
    LockLedger,
    Registry,
    Fallback,
}

impl Rule {
    /// Position in the priority order, starting at 1.
    pub fn number(self) -> u8 {
        match self {
            Self::NotWritable => 1,
            Self::ForeignLock => 2,
            Self::OwnLock => 3,
            Self::LockLedger => 4,
            Self::Registry => 5,
            Self::Fallback => 6,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotWritable => "not writable",
            Self::ForeignLock => "locked by another user",
            Self::OwnLock => "locked by acting user",
            Self::LockLedger => "lock ledger",
            Self::Registry => "permission registry",
            Self::Fallback => "fallback",
        };
        write!(f, "{} ({})", self.number(), name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub choice: Choice,
    pub rule: Rule,
}

impl Decision {
    fn new(choice: Choice, rule: Rule) -> Self {
        Self { choice, rule }
    }
}

/// The lock and permission state a decision is made against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub user: &'a str,
    pub locks: &'a LockFile,
    pub registry: &'a PermissionRegistry,
}

impl<'a> PolicyContext<'a> {
    pub fn new(user: &'a str, locks: &'a LockFile, registry: &'a PermissionRegistry) -> Self {
        Self {
            user,
            locks,
            registry,
        }
    }

    /// Write permission with the ledger paths special-cased: the lock ledger
    /// is only ever changed through lock operations, and the registry needs
    /// an administrative capability.
    pub fn may_write(&self, path: &str) -> bool {
        match path {
            LOCKFILE_PATH => true,
            PERMISSIONS_PATH => self.registry.can_administer(self.user),
            _ => self.registry.can_write(self.user, path),
        }
    }

    /// Whether a locally modified `path` may be staged.
    pub fn stage_check(&self, path: &str) -> Result<(), ExclusionReason> {
        if let Some(lock) = self.locks.get(path) {
            if lock.user != self.user {
                return Err(ExclusionReason::LockedBy(lock.user.clone()));
            }
        }
        if !self.may_write(path) {
            return Err(ExclusionReason::NotWritable);
        }
        Ok(())
    }

    /// Resolve a conflict on `path`. `local_present` and `remote_present`
    /// are false where that side deleted the path.
    pub fn decide(
        &self,
        path: &str,
        local_present: bool,
        remote_present: bool,
        fallback: &dyn FallbackStrategy,
    ) -> Decision {
        let decision = if !self.may_write(path) {
            Decision::new(Choice::Take(Side::Remote), Rule::NotWritable)
        } else if let Some(lock) = self.locks.get(path) {
            if lock.user != self.user {
                Decision::new(Choice::Take(Side::Remote), Rule::ForeignLock)
            } else {
                Decision::new(Choice::Take(Side::Local), Rule::OwnLock)
            }
        } else if path == LOCKFILE_PATH {
            Decision::new(Choice::MergeLocks, Rule::LockLedger)
        } else if path == PERMISSIONS_PATH {
            Decision::new(Choice::Take(Side::Remote), Rule::Registry)
        } else {
            let side = fallback.choose(path, local_present, remote_present);
            Decision::new(Choice::Take(side), Rule::Fallback)
        };
        debug!(
            path,
            user = self.user,
            choice = %decision.choice,
            rule = %decision.rule,
            fallback = fallback.name(),
            "conflict decision"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::strategy::{KeepLocal, KeepRemote};
    use crate::locking::LockEntry;

    fn registry() -> PermissionRegistry {
        PermissionRegistry::from_slice(
            br#"{
                "roles": {
                    "default": { "can_add_lock": true, "can_write": true },
                    "admin": { "can_grant_permissions": true, "can_modify_roles": true }
                },
                "users": { "boss": ["admin"] },
                "files": { "final.mov": { "readonly": true } }
            }"#,
        )
    }

    fn locks() -> LockFile {
        let mut lf = LockFile::default();
        lf.insert(LockEntry::new("theirs.psd", "bob", 1));
        lf.insert(LockEntry::new("mine.psd", "amy", 2));
        lf
    }

    #[test]
    fn test_rule_order() {
        let reg = registry();
        let lf = locks();
        let ctx = PolicyContext::new("amy", &lf, &reg);

        let cases = [
            ("final.mov", Choice::Take(Side::Remote), Rule::NotWritable),
            ("theirs.psd", Choice::Take(Side::Remote), Rule::ForeignLock),
            ("mine.psd", Choice::Take(Side::Local), Rule::OwnLock),
            (LOCKFILE_PATH, Choice::MergeLocks, Rule::LockLedger),
            (PERMISSIONS_PATH, Choice::Take(Side::Remote), Rule::NotWritable),
            ("other.txt", Choice::Take(Side::Local), Rule::Fallback),
        ];
        for (path, choice, rule) in cases {
            assert_eq!(
                ctx.decide(path, true, true, &KeepLocal),
                Decision::new(choice, rule),
                "{path}"
            );
        }
    }

    #[test]
    fn test_admin_registry_conflict_takes_remote() {
        let reg = registry();
        let lf = locks();
        let ctx = PolicyContext::new("boss", &lf, &reg);
        assert_eq!(
            ctx.decide(PERMISSIONS_PATH, true, true, &KeepLocal),
            Decision::new(Choice::Take(Side::Remote), Rule::Registry)
        );
    }

    #[test]
    fn test_fallback_is_pluggable() {
        let reg = registry();
        let lf = locks();
        let ctx = PolicyContext::new("amy", &lf, &reg);
        let decision = ctx.decide("other.txt", false, true, &KeepRemote);
        assert_eq!(decision.choice, Choice::Take(Side::Remote));
        assert_eq!(decision.rule.number(), 6);
    }

    #[test]
    fn test_stage_check() {
        let reg = registry();
        let lf = locks();
        let ctx = PolicyContext::new("amy", &lf, &reg);

        assert_eq!(ctx.stage_check("mine.psd"), Ok(()));
        assert_eq!(ctx.stage_check("free.txt"), Ok(()));
        assert_eq!(ctx.stage_check(LOCKFILE_PATH), Ok(()));
        assert_eq!(
            ctx.stage_check("theirs.psd"),
            Err(ExclusionReason::LockedBy("bob".into()))
        );
        assert_eq!(ctx.stage_check("final.mov"), Err(ExclusionReason::NotWritable));
        assert_eq!(ctx.stage_check(PERMISSIONS_PATH), Err(ExclusionReason::NotWritable));

        let admin = PolicyContext::new("boss", &lf, &reg);
        assert_eq!(admin.stage_check(PERMISSIONS_PATH), Ok(()));
    }
}
