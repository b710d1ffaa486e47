//! Domain model types reported by the synchronization controller.

use std::fmt;

use serde::Serialize;

use crate::conflict::{Choice, Rule};

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Step of the sync cycle the controller is in.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Fetching,
    Staging,
    Merging,
    Committing,
    Pushing,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Staging => write!(f, "staging"),
            Self::Merging => write!(f, "merging"),
            Self::Committing => write!(f, "committing"),
            Self::Pushing => write!(f, "pushing"),
        }
    }
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// Why a locally modified path was left out of the sync.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Another user holds the lock.
    LockedBy(String),
    /// The acting user may not write the path.
    NotWritable,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockedBy(owner) => write!(f, "locked by {owner}"),
            Self::NotWritable => write!(f, "no write permission"),
        }
    }
}

/// A local edit that was not staged.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Exclusion {
    pub path: String,
    pub reason: ExclusionReason,
}

// ---------------------------------------------------------------------------
// Merge results
// ---------------------------------------------------------------------------

/// How one conflicted path was resolved.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Resolution {
    pub path: String,
    pub choice: Choice,
    pub rule: Rule,
}

/// What the merge step did.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeKind {
    /// The remote has no branch to merge yet.
    #[default]
    NoRemote,
    UpToDate,
    FastForward { tip: String },
    Merged {
        commit: String,
        resolutions: Vec<Resolution>,
    },
}

impl fmt::Display for MergeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRemote => write!(f, "no remote branch"),
            Self::UpToDate => write!(f, "up to date"),
            Self::FastForward { tip } => write!(f, "fast-forwarded to {}", short(tip)),
            Self::Merged {
                commit,
                resolutions,
            } => write!(
                f,
                "merged as {} ({} conflict(s) resolved)",
                short(commit),
                resolutions.len()
            ),
        }
    }
}

/// Result of [`SyncController::pull`](crate::SyncController::pull).
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PullOutcome {
    pub staged: Vec<String>,
    pub excluded: Vec<Exclusion>,
    /// Commit holding the staged local changes, if any were staged.
    pub own_commit: Option<String>,
    pub merge: MergeKind,
}

/// Result of [`SyncController::sync`](crate::SyncController::sync).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub pull: PullOutcome,
    pub branch: String,
}

fn short(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::Side;

    #[test]
    fn test_state_display() {
        assert_eq!(SyncState::default().to_string(), "idle");
        assert_eq!(SyncState::Merging.to_string(), "merging");
    }

    #[test]
    fn test_merge_kind_display() {
        let kind = MergeKind::FastForward {
            tip: "0123456789abcdef".into(),
        };
        assert_eq!(kind.to_string(), "fast-forwarded to 01234567");

        let kind = MergeKind::Merged {
            commit: "abc".into(),
            resolutions: vec![Resolution {
                path: "a.psd".into(),
                choice: Choice::Take(Side::Remote),
                rule: Rule::ForeignLock,
            }],
        };
        assert_eq!(kind.to_string(), "merged as abc (1 conflict(s) resolved)");
    }

    #[test]
    fn test_exclusion_reason_display() {
        assert_eq!(
            ExclusionReason::LockedBy("bob".into()).to_string(),
            "locked by bob"
        );
    }
}
