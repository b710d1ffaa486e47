//! Error types for the megsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Authorization outcomes (a lock that cannot be taken, a role the actor may
//! not edit) are ordinary `Err` values that callers recover from by skipping
//! the operation. Malformed input such as an unknown capability name is kept
//! distinguishable through [`PermissionError::is_denial`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Lock errors
// ---------------------------------------------------------------------------

/// Errors from the locking policy layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// The acting user does not hold `can_add_lock`.
    #[error("user '{user}' may not lock '{path}'")]
    Denied { user: String, path: String },

    /// The path already carries a lock.
    #[error("'{path}' is already locked by '{owner}'")]
    AlreadyLocked { path: String, owner: String },

    /// Removal attempted by someone who neither owns the lock nor holds
    /// `can_remove_lock`.
    #[error("lock on '{path}' is held by '{owner}', not '{user}'")]
    NotOwned {
        path: String,
        owner: String,
        user: String,
    },

    /// Repository metadata ledgers cannot be locked.
    #[error("'{0}' is a repository metadata path and cannot be locked")]
    ReservedPath(String),
}

// ---------------------------------------------------------------------------
// Permission errors
// ---------------------------------------------------------------------------

/// Errors from the permission registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    /// The acting user lacks the capability the operation requires.
    #[error("user '{user}' lacks '{capability}'")]
    Denied { user: String, capability: String },

    /// A capability name that does not exist.
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    /// A capability that has no per-file meaning was given a path.
    #[error("capability '{0}' cannot be scoped to a file")]
    NotPathScoped(String),

    /// The named role is not defined.
    #[error("role '{0}' does not exist")]
    RoleNotFound(String),

    /// A role with this name is already defined.
    #[error("role '{0}' already exists")]
    RoleExists(String),

    /// The `default` role cannot be created, deleted, granted or revoked.
    #[error("role '{0}' is reserved")]
    ReservedRole(String),
}

impl PermissionError {
    /// `true` for expected authorization outcomes, `false` for malformed
    /// input that must propagate to the caller.
    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::UnknownCapability(_) | Self::NotPathScoped(_))
    }
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the synchronization controller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fetch or push failed. Repository state is left as it was before the
    /// failing step began.
    #[error("{operation} failed: {detail}")]
    Transport { operation: String, detail: String },

    /// `fail_on_conflict` refused a true three-way merge.
    #[error("merge with {remote_tip} requires a three-way merge and fail_on_conflict is set")]
    MergeUnresolved { remote_tip: String },

    /// Conflicts were left in the merge index after resolution.
    #[error("merge left {0} unresolved path(s)")]
    ConflictsRemain(usize),

    /// Underlying repository engine error.
    #[error("sync git error: {0}")]
    GitError(#[from] GitError),

    /// Ledger or registry persistence error.
    #[error("sync ledger error: {0}")]
    LedgerError(#[from] LedgerError),

    /// Lock policy refused the operation.
    #[error(transparent)]
    LockError(#[from] LockError),

    /// Permission policy refused the operation.
    #[error(transparent)]
    PermissionError(#[from] PermissionError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A bare repository has no working copy to synchronize.
    #[error("git repository at '{0}' has no working directory")]
    NoWorkdir(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, remote-tracking ref) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// A merge operation was requested with no merge in progress.
    #[error("no merge in progress")]
    NoMergeInProgress,

    /// A path in the repository is not valid UTF-8.
    #[error("non UTF-8 path in repository: {0}")]
    InvalidPath(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Ledger errors
// ---------------------------------------------------------------------------

/// Errors from persisting the lock ledger or the permission registry.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reading or writing the ledger file failed.
    #[error("ledger I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The in-memory ledger could not be serialized.
    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The ledger was parsed from a blob and has no file to save to.
    #[error("ledger has no file location")]
    NoLocation,
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
