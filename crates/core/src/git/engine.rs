//! The version-control surface the synchronization controller consumes.
//!
//! [`SyncController`](crate::SyncController) only talks to a repository
//! through [`RepositoryEngine`]; [`GitEngine`](super::GitEngine) is the
//! `git2`-backed implementation.

use std::path::Path;
use std::time::Instant;

use crate::errors::GitError;

/// Result of comparing the local branch with a fetched tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAnalysis {
    /// The tip is already part of local history.
    UpToDate,
    /// Local history is an ancestor of the tip (or the branch is unborn).
    FastForward,
    /// Both sides have commits the other lacks.
    Normal,
}

/// Credentials for fetch and push. Remotes that need none ignore them.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    /// Transfers still running at this instant are aborted.
    pub deadline: Option<Instant>,
}

/// Commit author and committer.
#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// The three versions of a path in a pending merge. `None` means the path
/// does not exist on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSides {
    pub path: String,
    pub ancestor: Option<Vec<u8>>,
    pub local: Option<Vec<u8>>,
    pub remote: Option<Vec<u8>>,
}

impl MergeSides {
    /// `true` when both sides changed the path and disagree.
    pub fn diverged(&self) -> bool {
        self.local != self.remote && self.local != self.ancestor && self.remote != self.ancestor
    }
}

/// How to settle one path of a pending merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathResolution {
    /// Use the local version, deleting the path if it is absent locally.
    Local,
    /// Use the remote version, deleting the path if it is absent remotely.
    Remote,
    /// Use the given content.
    Content(Vec<u8>),
}

/// Repository operations used by a sync cycle.
///
/// A merge is held in memory between [`start_merge`](Self::start_merge)
/// and [`commit_merge`](Self::commit_merge) or
/// [`abort_merge`](Self::abort_merge); the working copy is not touched
/// until the merge is committed.
pub trait RepositoryEngine {
    /// Root of the working copy.
    fn workdir(&self) -> &Path;

    /// Short name of the checked-out branch.
    fn current_branch(&self) -> Result<String, GitError>;

    /// Id of the HEAD commit, `None` on an unborn branch.
    fn head(&self) -> Result<Option<String>, GitError>;

    /// Fetch every configured remote.
    fn fetch_all(&self, credentials: &Credentials) -> Result<(), GitError>;

    /// The fetched tip of `branch` on `remote`, if the remote has it.
    fn remote_tip(&self, remote: &str, branch: &str) -> Result<Option<String>, GitError>;

    /// Content of `path` in the tree of `commit`, `None` if it is absent.
    fn read_blob(&self, commit: &str, path: &str) -> Result<Option<Vec<u8>>, GitError>;

    fn analyze(&self, tip: &str) -> Result<MergeAnalysis, GitError>;

    /// Check out `tip` and move the current branch to it.
    fn fast_forward(&self, tip: &str) -> Result<(), GitError>;

    /// Paths that differ between HEAD and the working copy, untracked
    /// files included, sorted.
    fn changed_paths(&self) -> Result<Vec<String>, GitError>;

    /// Make the index equal to HEAD plus exactly `paths` from the working
    /// copy. Paths missing from the working copy are staged as deletions.
    fn stage(&self, paths: &[String]) -> Result<(), GitError>;

    /// Commit the index on the current branch and return the new id.
    fn commit_index(&self, message: &str, author: &Author) -> Result<String, GitError>;

    /// Merge `tip` into HEAD in memory and return the conflicted paths.
    fn start_merge(&mut self, tip: &str) -> Result<Vec<MergeSides>, GitError>;

    /// Ancestor, local and remote versions of `path` in the pending merge.
    fn merge_sides(&self, path: &str) -> Result<MergeSides, GitError>;

    /// Current merged content of `path`, `None` if it is deleted or still
    /// conflicted.
    fn merged_blob(&self, path: &str) -> Result<Option<Vec<u8>>, GitError>;

    /// Settle `path` in the pending merge.
    fn resolve(&mut self, path: &str, resolution: PathResolution) -> Result<(), GitError>;

    /// Number of paths still conflicted in the pending merge.
    fn conflict_count(&self) -> Result<usize, GitError>;

    /// Write the merged tree to the working copy without overwriting local
    /// edits, and commit it with HEAD and the merged tip as parents.
    fn commit_merge(&mut self, message: &str, author: &Author) -> Result<String, GitError>;

    /// Drop the pending merge.
    fn abort_merge(&mut self);

    fn push(&self, remote: &str, branch: &str, credentials: &Credentials) -> Result<(), GitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sides(a: Option<&[u8]>, l: Option<&[u8]>, r: Option<&[u8]>) -> MergeSides {
        MergeSides {
            path: "p".into(),
            ancestor: a.map(<[u8]>::to_vec),
            local: l.map(<[u8]>::to_vec),
            remote: r.map(<[u8]>::to_vec),
        }
    }

    #[test]
    fn test_diverged() {
        assert!(sides(Some(b"a"), Some(b"b"), Some(b"c")).diverged());
        assert!(sides(None, Some(b"b"), Some(b"c")).diverged());
        assert!(sides(Some(b"a"), None, Some(b"c")).diverged());
        assert!(!sides(Some(b"a"), Some(b"b"), Some(b"a")).diverged());
        assert!(!sides(Some(b"a"), Some(b"b"), Some(b"b")).diverged());
        assert!(!sides(None, None, Some(b"c")).diverged());
    }
}
