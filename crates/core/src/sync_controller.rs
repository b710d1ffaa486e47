//! Lock- and permission-aware repository synchronization.
//!
//! The [`SyncController`] owns one repository engine, one [`Locking`] and one
//! [`PermissionRegistry`], and drives each pull through the cycle:
//!
//! 1. Fetch every remote.
//! 2. Stage local changes the acting user may publish; leave the rest
//!    modified in the working copy.
//! 3. Commit the staged changes on their own.
//! 4. Fast-forward to the remote tip, or merge it, resolving each conflicted
//!    path with the lock/permission policy in [`crate::conflict::policy`].
//! 5. Rebuild the lock ledger and registry from the merged working copy.
//!
//! Push is a separate step; [`SyncController::sync`] runs both.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::conflict::{
    Choice, Decision, FallbackKind, FallbackStrategy, PolicyContext, Side,
};
use crate::errors::{GitError, PermissionError, SyncError};
use crate::git::{
    Author, Credentials, GitEngine, MergeAnalysis, MergeSides, PathResolution, RepositoryEngine,
};
use crate::ledger::{LOCKFILE_PATH, PERMISSIONS_PATH};
use crate::locking::{LockEntry, LockFile, Locking};
use crate::models::{
    Exclusion, ExclusionReason, MergeKind, PullOutcome, Resolution, SyncReport, SyncState,
};
use crate::permissions::PermissionRegistry;

/// Marker at the start of every commit message the controller writes.
pub const COMMIT_PREFIX: &str = "[megsync]";

/// Per-user settings a controller acts with.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub user: String,
    pub email: String,
    pub password: Option<String>,
    pub remote: String,
    pub fail_on_conflict: bool,
    pub fallback: FallbackKind,
    /// No fetch or push starts after this instant, and transfers still
    /// running when it passes are cancelled.
    pub deadline: Option<Instant>,
}

impl SyncSettings {
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            email: format!("{user}@localhost"),
            user,
            password: None,
            remote: "origin".into(),
            fail_on_conflict: false,
            fallback: FallbackKind::default(),
            deadline: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            user: config.user.username.clone(),
            email: config.user.email(),
            password: config.user.password.clone(),
            remote: config.repository.remote.clone(),
            fail_on_conflict: config.sync.fail_on_conflict,
            fallback: config.sync.fallback,
            deadline: None,
        }
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.user.clone(),
            password: self.password.clone(),
            deadline: self.deadline,
        }
    }

    fn check_deadline(&self, operation: &str) -> Result<(), SyncError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(SyncError::Transport {
                operation: operation.to_string(),
                detail: "deadline exceeded".into(),
            }),
            _ => Ok(()),
        }
    }

    fn author(&self) -> Author {
        Author::new(&self.user, &self.email)
    }
}

/// A changed path in the working copy and whether the next pull would
/// stage it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub path: String,
    pub excluded: Option<ExclusionReason>,
}

/// Drives fetch, stage, merge, commit and push for one working copy.
pub struct SyncController<E: RepositoryEngine = GitEngine> {
    engine: E,
    settings: SyncSettings,
    locking: Locking,
    registry: PermissionRegistry,
    fallback: Box<dyn FallbackStrategy>,
    state: SyncState,
}

fn transport(operation: &str, err: GitError) -> SyncError {
    warn!(operation, error = %err, "transport failure");
    SyncError::Transport {
        operation: operation.to_string(),
        detail: err.to_string(),
    }
}

impl SyncController<GitEngine> {
    /// Open an existing working copy.
    pub fn open<P: AsRef<Path>>(path: P, settings: SyncSettings) -> Result<Self, SyncError> {
        Self::with_engine(GitEngine::open(path)?, settings)
    }

    /// Clone `url` into `path`.
    pub fn clone<P: AsRef<Path>>(url: &str, path: P, settings: SyncSettings) -> Result<Self, SyncError> {
        let engine = GitEngine::clone(url, path.as_ref(), &settings.credentials())
            .map_err(|e| transport("clone", e))?;
        Self::with_engine(engine, settings)
    }

    /// Create a working copy at `path` and commit a lock ledger and a
    /// registry in which the acting user is administrator. An existing
    /// registry is kept as it is.
    pub fn init<P: AsRef<Path>>(
        path: P,
        url: Option<&str>,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        let engine = GitEngine::init(path.as_ref(), &settings.remote, url)?;
        let workdir = engine.workdir().to_path_buf();

        let registry_path = workdir.join(PERMISSIONS_PATH);
        if !registry_path.exists() {
            PermissionRegistry::bootstrap(&registry_path, &settings.user).save()?;
        }
        let lock_path = workdir.join(LOCKFILE_PATH);
        if !lock_path.exists() {
            LockFile::new(&lock_path).save()?;
        }

        let mut controller = Self::with_engine(engine, settings)?;
        controller.commit_paths(
            &[LOCKFILE_PATH, PERMISSIONS_PATH],
            &format!("{COMMIT_PREFIX} initialize repository"),
        )?;
        controller.reload()?;
        info!(path = %workdir.display(), user = %controller.settings.user, "repository initialized");
        Ok(controller)
    }
}

impl<E: RepositoryEngine> SyncController<E> {
    /// Wrap an engine. The lock ledger is read from the working copy and
    /// the registry from HEAD, see [`reload`](Self::reload).
    pub fn with_engine(engine: E, settings: SyncSettings) -> Result<Self, SyncError> {
        let locking = Locking::open(engine.workdir().join(LOCKFILE_PATH));
        let registry = committed_registry(&engine)?;
        let fallback = settings.fallback.strategy();
        Ok(Self {
            engine,
            settings,
            locking,
            registry,
            fallback,
            state: SyncState::Idle,
        })
    }

    /// Replace the strategy used for conflicts no lock or permission rule
    /// decides.
    pub fn with_fallback(mut self, fallback: Box<dyn FallbackStrategy>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn user(&self) -> &str {
        &self.settings.user
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn registry(&self) -> &PermissionRegistry {
        &self.registry
    }

    pub fn locking(&self) -> &Locking {
        &self.locking
    }

    /// Rebuild the lock ledger from the working copy and the registry from
    /// the HEAD commit. Uncommitted edits to the registry file never grant
    /// anything.
    pub fn reload(&mut self) -> Result<(), SyncError> {
        self.locking = Locking::open(self.engine.workdir().join(LOCKFILE_PATH));
        self.registry = committed_registry(&self.engine)?;
        debug!("ledgers reloaded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Locks
    // -----------------------------------------------------------------------

    /// Lock `path` for the acting user and save the ledger. The lock is
    /// published by the next sync.
    pub fn add_lock(&mut self, path: &str) -> Result<LockEntry, SyncError> {
        let entry = self
            .locking
            .add_lock(path, &self.settings.user, &self.registry)?
            .clone();
        self.locking.save()?;
        Ok(entry)
    }

    /// Release the lock on `path` and save the ledger.
    pub fn remove_lock(&mut self, path: &str) -> Result<Option<LockEntry>, SyncError> {
        let removed = self
            .locking
            .remove_lock(path, &self.settings.user, &self.registry)?;
        if removed.is_some() {
            self.locking.save()?;
        }
        Ok(removed)
    }

    pub fn find_lock(&self, path: &str) -> Option<&LockEntry> {
        self.locking.find_lock(path)
    }

    pub fn locks(&self) -> Vec<&LockEntry> {
        self.locking.locks().collect()
    }

    /// Pull, lock `path`, commit the ledger and push it.
    pub fn acquire_lock(&mut self, path: &str) -> Result<LockEntry, SyncError> {
        self.pull()?;
        let entry = self.add_lock(path)?;
        self.commit_paths(&[LOCKFILE_PATH], &format!("{COMMIT_PREFIX} lock {path}"))?;
        self.push()?;
        Ok(entry)
    }

    /// Pull, release the lock on `path`, commit the ledger and push it.
    pub fn release_lock(&mut self, path: &str) -> Result<Option<LockEntry>, SyncError> {
        self.pull()?;
        let removed = self.remove_lock(path)?;
        if removed.is_some() {
            self.commit_paths(&[LOCKFILE_PATH], &format!("{COMMIT_PREFIX} unlock {path}"))?;
            self.push()?;
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    /// Apply `edit` to the registry as the acting user. If the registry
    /// changed it is saved and committed with `message`.
    pub fn edit_permissions<T, F>(&mut self, message: &str, edit: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut PermissionRegistry, &str) -> Result<T, PermissionError>,
    {
        let before = self.registry.to_json_bytes()?;
        let value = edit(&mut self.registry, &self.settings.user)?;
        if self.registry.to_json_bytes()? != before {
            self.registry.save()?;
            self.commit_paths(&[PERMISSIONS_PATH], &format!("{COMMIT_PREFIX} {message}"))?;
        } else {
            debug!(message, "permission edit changed nothing");
        }
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Sync cycle
    // -----------------------------------------------------------------------

    /// Local changes and whether the next pull would stage each of them.
    pub fn pending_changes(&self) -> Result<Vec<PendingChange>, SyncError> {
        let (locks, registry) = self.stage_view(None)?;
        let ctx = PolicyContext::new(&self.settings.user, &locks, &registry);
        let mut pending = Vec::new();
        for path in self.engine.changed_paths()? {
            let excluded = self.stage_check(&ctx, &path)?.err();
            pending.push(PendingChange { path, excluded });
        }
        Ok(pending)
    }

    /// Fetch, stage and commit permitted local changes, then integrate the
    /// remote branch.
    pub fn pull(&mut self) -> Result<PullOutcome, SyncError> {
        let result = self.pull_inner();
        self.state = SyncState::Idle;
        result
    }

    /// Push the current branch.
    pub fn push(&mut self) -> Result<String, SyncError> {
        let result = self.push_inner();
        self.state = SyncState::Idle;
        result
    }

    /// Pull then push.
    pub fn sync(&mut self) -> Result<SyncReport, SyncError> {
        let pull = self.pull()?;
        let branch = self.push()?;
        info!(branch = %branch, merge = %pull.merge, "sync complete");
        Ok(SyncReport { pull, branch })
    }

    fn pull_inner(&mut self) -> Result<PullOutcome, SyncError> {
        self.state = SyncState::Fetching;
        self.settings.check_deadline("fetch")?;
        self.engine
            .fetch_all(&self.settings.credentials())
            .map_err(|e| transport("fetch", e))?;

        let branch = self.engine.current_branch()?;
        let tip = self.engine.remote_tip(&self.settings.remote, &branch)?;

        self.state = SyncState::Staging;
        self.reload()?;
        let (locks, registry) = self.stage_view(tip.as_deref())?;
        let ctx = PolicyContext::new(&self.settings.user, &locks, &registry);
        let mut outcome = PullOutcome::default();
        for path in self.engine.changed_paths()? {
            match self.stage_check(&ctx, &path)? {
                Ok(()) => outcome.staged.push(path),
                Err(reason) => {
                    info!(path = %path, %reason, "local change excluded from sync");
                    outcome.excluded.push(Exclusion { path, reason });
                }
            }
        }
        if !outcome.staged.is_empty() {
            self.engine.stage(&outcome.staged)?;
            self.state = SyncState::Committing;
            let message = format!(
                "{COMMIT_PREFIX} local changes by {}",
                self.settings.user
            );
            let sha = self.engine.commit_index(&message, &self.settings.author())?;
            info!(sha = %sha, count = outcome.staged.len(), "local changes committed");
            outcome.own_commit = Some(sha);
        }

        let Some(tip) = tip else {
            debug!(branch = %branch, "remote has no such branch");
            return Ok(outcome);
        };

        self.state = SyncState::Merging;
        outcome.merge = match self.engine.analyze(&tip)? {
            MergeAnalysis::UpToDate => MergeKind::UpToDate,
            MergeAnalysis::FastForward => {
                self.engine.fast_forward(&tip)?;
                MergeKind::FastForward { tip }
            }
            MergeAnalysis::Normal if self.settings.fail_on_conflict => {
                warn!(tip = %tip, "three-way merge required, aborting");
                return Err(SyncError::MergeUnresolved { remote_tip: tip });
            }
            MergeAnalysis::Normal => self.merge(&tip)?,
        };
        self.reload()?;
        info!(merge = %outcome.merge, "pull complete");
        Ok(outcome)
    }

    /// Lock and permission state local edits are checked against before
    /// staging: the local ledger joined with the fetched remote one, and the
    /// fetched registry if the remote changed it, else the committed one.
    fn stage_view(&self, tip: Option<&str>) -> Result<(LockFile, PermissionRegistry), SyncError> {
        let mut locking = self.locking.clone();
        let mut registry = self.registry.clone();
        if let Some(tip) = tip {
            let remote_locks = self
                .engine
                .read_blob(tip, LOCKFILE_PATH)?
                .map(|b| LockFile::from_slice(&b));
            locking.merge(None, remote_locks.as_ref());

            let fetched = self.engine.read_blob(tip, PERMISSIONS_PATH)?;
            let committed = self.head_blob(PERMISSIONS_PATH)?;
            if fetched != committed {
                debug!("using fetched permission registry for staging");
                registry = PermissionRegistry::from_slice(&fetched.unwrap_or_default());
            }
        }
        Ok((locking.lock_file().clone(), registry))
    }

    /// [`PolicyContext::stage_check`], plus a check that the working-copy
    /// lock ledger only differs from HEAD in ways `add_lock` and
    /// `remove_lock` would have allowed the acting user.
    fn stage_check(
        &self,
        ctx: &PolicyContext<'_>,
        path: &str,
    ) -> Result<Result<(), ExclusionReason>, SyncError> {
        if let Err(reason) = ctx.stage_check(path) {
            return Ok(Err(reason));
        }
        if path == LOCKFILE_PATH && !self.lock_edits_permitted()? {
            warn!(user = %self.settings.user, "lock ledger has edits the user may not make");
            return Ok(Err(ExclusionReason::NotWritable));
        }
        Ok(Ok(()))
    }

    fn lock_edits_permitted(&self) -> Result<bool, SyncError> {
        let user = self.settings.user.as_str();
        let committed = self
            .head_blob(LOCKFILE_PATH)?
            .map(|b| LockFile::from_slice(&b))
            .unwrap_or_default();
        let current = self.locking.lock_file();

        let removals_ok = committed
            .iter()
            .filter(|(path, entry)| current.get(path) != Some(*entry))
            .all(|(_, entry)| entry.user == user || self.registry.can_remove_lock(user));
        let additions_ok = current
            .iter()
            .filter(|(path, entry)| committed.get(path) != Some(*entry))
            .all(|(_, entry)| entry.user == user && self.registry.can_lock(user));
        Ok(removals_ok && additions_ok)
    }

    /// Content of `path` at HEAD, `None` on an unborn branch.
    fn head_blob(&self, path: &str) -> Result<Option<Vec<u8>>, SyncError> {
        match self.engine.head()? {
            Some(head) => Ok(self.engine.read_blob(&head, path)?),
            None => Ok(None),
        }
    }

    fn push_inner(&mut self) -> Result<String, SyncError> {
        self.state = SyncState::Pushing;
        self.settings.check_deadline("push")?;
        let branch = self.engine.current_branch()?;
        self.engine
            .push(&self.settings.remote, &branch, &self.settings.credentials())
            .map_err(|e| transport("push", e))?;
        Ok(branch)
    }

    fn merge(&mut self, tip: &str) -> Result<MergeKind, SyncError> {
        let conflicts = self.engine.start_merge(tip)?;
        let resolutions = match self.resolve_conflicts(conflicts) {
            Ok(r) => r,
            Err(e) => {
                self.engine.abort_merge();
                return Err(e);
            }
        };
        let remaining = self.engine.conflict_count()?;
        if remaining > 0 {
            self.engine.abort_merge();
            return Err(SyncError::ConflictsRemain(remaining));
        }

        self.state = SyncState::Committing;
        let message = format!("{COMMIT_PREFIX} merge {tip} into {}", self.engine.current_branch()?);
        let commit = self.engine.commit_merge(&message, &self.settings.author())?;
        Ok(MergeKind::Merged {
            commit,
            resolutions,
        })
    }

    /// Settle the ledgers first, then every other conflicted path against
    /// the merged lock and permission state.
    fn resolve_conflicts(&mut self, conflicts: Vec<MergeSides>) -> Result<Vec<Resolution>, SyncError> {
        let mut conflicted: BTreeMap<String, MergeSides> =
            conflicts.into_iter().map(|c| (c.path.clone(), c)).collect();
        let mut resolutions = Vec::new();

        // Ledgers are reconciled whenever both sides changed them, even if
        // the text merged cleanly.
        for ledger in [LOCKFILE_PATH, PERMISSIONS_PATH] {
            let (sides, was_conflicted) = match conflicted.remove(ledger) {
                Some(sides) => (sides, true),
                None => (self.engine.merge_sides(ledger)?, false),
            };
            if !was_conflicted && !sides.diverged() {
                continue;
            }
            let ctx = PolicyContext::new(&self.settings.user, self.locking.lock_file(), &self.registry);
            let decision = ctx.decide(
                ledger,
                sides.local.is_some(),
                sides.remote.is_some(),
                self.fallback.as_ref(),
            );
            resolutions.push(apply(&mut self.engine, &sides, decision)?);
        }

        let locks = LockFile::from_slice(&self.engine.merged_blob(LOCKFILE_PATH)?.unwrap_or_default());
        let registry =
            PermissionRegistry::from_slice(&self.engine.merged_blob(PERMISSIONS_PATH)?.unwrap_or_default());
        let ctx = PolicyContext::new(&self.settings.user, &locks, &registry);

        for sides in conflicted.values() {
            let decision = ctx.decide(
                &sides.path,
                sides.local.is_some(),
                sides.remote.is_some(),
                self.fallback.as_ref(),
            );
            resolutions.push(apply(&mut self.engine, sides, decision)?);
        }
        Ok(resolutions)
    }

    /// Stage exactly `paths` on top of HEAD and commit them.
    fn commit_paths(&mut self, paths: &[&str], message: &str) -> Result<String, SyncError> {
        self.state = SyncState::Committing;
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        let result = self
            .engine
            .stage(&paths)
            .and_then(|()| self.engine.commit_index(message, &self.settings.author()));
        self.state = SyncState::Idle;
        Ok(result?)
    }
}

/// The registry committed at HEAD, saving to the working copy. Before the
/// first commit the working-copy file is all there is.
fn committed_registry<E: RepositoryEngine>(engine: &E) -> Result<PermissionRegistry, SyncError> {
    let location = engine.workdir().join(PERMISSIONS_PATH);
    let Some(head) = engine.head()? else {
        return Ok(PermissionRegistry::open(location));
    };
    Ok(match engine.read_blob(&head, PERMISSIONS_PATH)? {
        Some(bytes) => PermissionRegistry::from_slice_at(location, &bytes),
        None => PermissionRegistry::new(location),
    })
}

/// Carry out `decision` for one conflicted path.
fn apply<E: RepositoryEngine>(
    engine: &mut E,
    sides: &MergeSides,
    decision: Decision,
) -> Result<Resolution, SyncError> {
    let resolution = match decision.choice {
        Choice::Take(Side::Local) => PathResolution::Local,
        Choice::Take(Side::Remote) => PathResolution::Remote,
        Choice::MergeLocks => {
            let mut merged = Locking::new(
                sides
                    .local
                    .as_deref()
                    .map(LockFile::from_slice)
                    .unwrap_or_default(),
            );
            let ancestor = sides.ancestor.as_deref().map(LockFile::from_slice);
            let remote = sides.remote.as_deref().map(LockFile::from_slice);
            merged.merge(ancestor.as_ref(), remote.as_ref());
            PathResolution::Content(merged.lock_file().to_json_bytes()?)
        }
    };
    engine.resolve(&sides.path, resolution)?;
    info!(
        path = %sides.path,
        choice = %decision.choice,
        rule = %decision.rule,
        "conflict resolved"
    );
    Ok(Resolution {
        path: sides.path.clone(),
        choice: decision.choice,
        rule: decision.rule,
    })
}
