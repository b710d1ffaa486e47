//! Lock policy: who may take and release locks, and how two clients'
//! lock ledgers are reconciled.

pub mod lock_file;

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::errors::{LedgerError, LockError};
use crate::ledger;
use crate::permissions::PermissionRegistry;

pub use lock_file::{LockEntry, LockFile};

/// Policy layer over a [`LockFile`].
///
/// The permission registry is passed to each operation rather than stored,
/// since the controller rebuilds both from disk after every merge.
#[derive(Debug, Clone, Default)]
pub struct Locking {
    lock_file: LockFile,
}

impl Locking {
    pub fn new(lock_file: LockFile) -> Self {
        Self { lock_file }
    }

    /// Open the ledger stored at `location`.
    pub fn open<P: Into<PathBuf>>(location: P) -> Self {
        Self::new(LockFile::open(location))
    }

    pub fn lock_file(&self) -> &LockFile {
        &self.lock_file
    }

    /// Lock `path` for `user`.
    pub fn add_lock(
        &mut self,
        path: &str,
        user: &str,
        registry: &PermissionRegistry,
    ) -> Result<&LockEntry, LockError> {
        if ledger::is_metadata_path(path) {
            return Err(LockError::ReservedPath(path.to_string()));
        }
        if !registry.can_lock(user) {
            warn!(path, user, "lock denied: missing can_add_lock");
            return Err(LockError::Denied {
                user: user.to_string(),
                path: path.to_string(),
            });
        }
        if let Some(existing) = self.lock_file.get(path) {
            warn!(path, user, owner = %existing.user, "lock denied: already locked");
            return Err(LockError::AlreadyLocked {
                path: path.to_string(),
                owner: existing.user.clone(),
            });
        }
        info!(path, user, "lock added");
        Ok(self.lock_file.set(path, user))
    }

    /// Release the lock on `path`. Owners may always release their own
    /// locks; anyone else needs `can_remove_lock`. Returns the removed entry,
    /// or `None` if the path was not locked.
    pub fn remove_lock(
        &mut self,
        path: &str,
        user: &str,
        registry: &PermissionRegistry,
    ) -> Result<Option<LockEntry>, LockError> {
        let Some(entry) = self.lock_file.get(path) else {
            debug!(path, "no lock to remove");
            return Ok(None);
        };
        if entry.user != user && !registry.can_remove_lock(user) {
            warn!(path, user, owner = %entry.user, "lock removal denied");
            return Err(LockError::NotOwned {
                path: path.to_string(),
                owner: entry.user.clone(),
                user: user.to_string(),
            });
        }
        info!(path, user, "lock removed");
        Ok(self.lock_file.remove(path))
    }

    pub fn find_lock(&self, path: &str) -> Option<&LockEntry> {
        self.lock_file.get(path)
    }

    pub fn locks(&self) -> impl Iterator<Item = &LockEntry> {
        self.lock_file.iter().map(|(_, e)| e)
    }

    pub fn save(&self) -> Result<(), LedgerError> {
        self.lock_file.save()
    }

    /// Three-way merge of this ledger against the common `ancestor` and the
    /// `remote` ledger. Only the in-memory state changes; call
    /// [`save`](Self::save) to persist it.
    pub fn merge(&mut self, ancestor: Option<&LockFile>, remote: Option<&LockFile>) {
        let empty = LockFile::default();
        let ancestor = ancestor.unwrap_or(&empty);
        let remote = remote.unwrap_or(&empty);

        let paths: BTreeSet<String> = ancestor
            .paths()
            .chain(remote.paths())
            .chain(self.lock_file.paths())
            .map(str::to_string)
            .collect();

        for path in paths {
            let base = ancestor.get(&path);
            let theirs = remote.get(&path);
            let ours = self.lock_file.get(&path).cloned();

            let merged = match (base, ours.as_ref(), theirs) {
                (_, Some(o), Some(t)) => Some(if o.precedes(t) { o } else { t }),
                // Deleted remotely: honour it unless we changed the lock since.
                (Some(b), Some(o), None) => (o != b).then_some(o),
                // Deleted locally: a remote edit since the ancestor beats it.
                (Some(b), None, Some(t)) => (t != b).then_some(t),
                (None, None, Some(t)) => Some(t),
                (None, Some(o), None) => Some(o),
                (_, None, None) => None,
            }
            .cloned();

            match merged {
                Some(entry) if Some(&entry) != ours.as_ref() => {
                    debug!(path = %path, user = %entry.user, "merge adopted lock");
                    self.lock_file.insert(entry);
                }
                None if ours.is_some() => {
                    debug!(path = %path, "merge dropped lock");
                    self.lock_file.remove(&path);
                }
                _ => {}
            }
        }
        info!(count = self.lock_file.len(), "lock ledgers merged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(entries: &[(&str, &str, i64)]) -> LockFile {
        let mut lf = LockFile::default();
        for (path, user, time) in entries {
            lf.insert(LockEntry::new(*path, *user, *time));
        }
        lf
    }

    fn merged(
        current: &[(&str, &str, i64)],
        ancestor: Option<&[(&str, &str, i64)]>,
        remote: Option<&[(&str, &str, i64)]>,
    ) -> LockFile {
        let mut locking = Locking::new(ledger(current));
        let ancestor = ancestor.map(ledger);
        let remote = remote.map(ledger);
        locking.merge(ancestor.as_ref(), remote.as_ref());
        locking.lock_file().clone()
    }

    fn restricted_registry() -> PermissionRegistry {
        PermissionRegistry::from_slice(
            br#"{
                "roles": {
                    "default": { "can_add_lock": true },
                    "lead": { "can_remove_lock": true }
                },
                "users": { "lead": ["lead"] }
            }"#,
        )
    }

    #[test]
    fn test_second_user_cannot_lock_held_path() {
        let reg = PermissionRegistry::default();
        let mut locking = Locking::default();
        locking.add_lock("a.psd", "jeff", &reg).unwrap();

        let err = locking.add_lock("a.psd", "bob", &reg).unwrap_err();
        assert_eq!(
            err,
            LockError::AlreadyLocked {
                path: "a.psd".into(),
                owner: "jeff".into()
            }
        );
        assert_eq!(locking.find_lock("a.psd").unwrap().user, "jeff");
        // Relocking your own path is also refused.
        assert!(locking.add_lock("a.psd", "jeff", &reg).is_err());
    }

    #[test]
    fn test_lock_requires_capability() {
        let reg = PermissionRegistry::from_slice(br#"{"roles":{"default":{}}}"#);
        let mut locking = Locking::default();
        assert!(matches!(
            locking.add_lock("a.psd", "jeff", &reg),
            Err(LockError::Denied { .. })
        ));
        assert!(locking.find_lock("a.psd").is_none());
    }

    #[test]
    fn test_metadata_paths_cannot_be_locked() {
        let reg = PermissionRegistry::default();
        let mut locking = Locking::default();
        assert_eq!(
            locking.add_lock(ledger::LOCKFILE_PATH, "jeff", &reg).unwrap_err(),
            LockError::ReservedPath(ledger::LOCKFILE_PATH.into())
        );
    }

    #[test]
    fn test_owner_can_always_remove() {
        let reg = restricted_registry();
        let mut locking = Locking::default();
        locking.add_lock("a.psd", "jeff", &reg).unwrap();
        assert!(!reg.can_remove_lock("jeff"));

        let removed = locking.remove_lock("a.psd", "jeff", &reg).unwrap();
        assert_eq!(removed.unwrap().user, "jeff");
        assert!(locking.find_lock("a.psd").is_none());
    }

    #[test]
    fn test_non_owner_removal() {
        let reg = restricted_registry();
        let mut locking = Locking::default();
        locking.add_lock("a.psd", "jeff", &reg).unwrap();

        assert!(matches!(
            locking.remove_lock("a.psd", "bob", &reg),
            Err(LockError::NotOwned { .. })
        ));
        assert_eq!(locking.find_lock("a.psd").unwrap().user, "jeff");

        assert!(locking.remove_lock("a.psd", "lead", &reg).unwrap().is_some());
        assert!(locking.find_lock("a.psd").is_none());
    }

    #[test]
    fn test_remove_absent_lock_succeeds() {
        let reg = restricted_registry();
        let mut locking = Locking::default();
        assert_eq!(locking.remove_lock("nothing", "bob", &reg), Ok(None));
    }

    #[test]
    fn test_merge_identical_is_identity() {
        let entries = [("a", "jeff", 1), ("b", "bob", 2)];
        let result = merged(&entries, Some(&entries), Some(&entries));
        assert_eq!(result, ledger(&entries));

        let result = merged(&entries, None, Some(&entries));
        assert_eq!(result, ledger(&entries));
    }

    #[test]
    fn test_merge_double_lock_keeps_earliest() {
        let result = merged(&[("a", "jeff", 20)], None, Some(&[("a", "bob", 10)]));
        assert_eq!(result.get("a").unwrap().user, "bob");

        let result = merged(&[("a", "jeff", 10)], Some(&[]), Some(&[("a", "bob", 20)]));
        assert_eq!(result.get("a").unwrap().user, "jeff");

        // Equal timestamps fall back to user ordering.
        let result = merged(&[("a", "zed", 5)], None, Some(&[("a", "amy", 5)]));
        assert_eq!(result.get("a").unwrap().user, "amy");
    }

    #[test]
    fn test_merge_remote_deletion() {
        let base = [("a", "jeff", 1)];
        // Unchanged locally: remote deletion wins.
        assert!(merged(&base, Some(&base), Some(&[])).is_empty());
        // Changed locally: keep ours.
        let result = merged(&[("a", "jeff", 2)], Some(&base), Some(&[]));
        assert_eq!(result.get("a").unwrap().timestamp, 2);
    }

    #[test]
    fn test_merge_local_deletion() {
        let base = [("a", "jeff", 1)];
        // Remote unchanged: stay deleted.
        assert!(merged(&[], Some(&base), Some(&base)).is_empty());
        // Remote changed: adopt it.
        let result = merged(&[], Some(&base), Some(&[("a", "bob", 3)]));
        assert_eq!(result.get("a").unwrap().user, "bob");
    }

    #[test]
    fn test_merge_one_sided_additions() {
        let result = merged(&[("mine", "jeff", 1)], None, Some(&[("theirs", "bob", 2)]));
        assert_eq!(result.len(), 2);
        assert!(result.contains("mine"));
        assert!(result.contains("theirs"));

        // Missing remote ledger behaves like an empty one.
        let result = merged(&[("mine", "jeff", 1)], None, None);
        assert_eq!(result, ledger(&[("mine", "jeff", 1)]));
    }

    #[test]
    fn test_merge_disjoint_edits_union() {
        let base = [("shared", "amy", 1)];
        let result = merged(
            &[("shared", "amy", 1), ("left", "jeff", 5)],
            Some(&base),
            Some(&[("shared", "amy", 1), ("right", "bob", 6)]),
        );
        assert_eq!(
            result,
            ledger(&[("shared", "amy", 1), ("left", "jeff", 5), ("right", "bob", 6)])
        );
    }

    #[test]
    fn test_merge_deleted_on_both_sides() {
        let base = [("a", "jeff", 1)];
        assert!(merged(&[], Some(&base), Some(&[])).is_empty());
    }
}
