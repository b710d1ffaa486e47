//! Fallback resolution for conflicting paths that no lock or permission
//! rule claims.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::policy::Side;

/// Picks a side for a conflicted path the lock and permission rules do not
/// decide. Implementations must be deterministic.
pub trait FallbackStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Choose which version of `path` survives. A side that is absent means
    /// the path was deleted there; choosing it deletes the path.
    fn choose(&self, path: &str, local_present: bool, remote_present: bool) -> Side;
}

/// Keep the local version, or delete the path if it was deleted locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLocal;

impl FallbackStrategy for KeepLocal {
    fn name(&self) -> &str {
        "keep-local"
    }

    fn choose(&self, _path: &str, _local_present: bool, _remote_present: bool) -> Side {
        Side::Local
    }
}

/// Keep the remote version, or delete the path if it was deleted remotely.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepRemote;

impl FallbackStrategy for KeepRemote {
    fn name(&self) -> &str {
        "keep-remote"
    }

    fn choose(&self, _path: &str, _local_present: bool, _remote_present: bool) -> Side {
        Side::Remote
    }
}

/// Built-in strategies selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackKind {
    #[default]
    Local,
    Remote,
}

impl FallbackKind {
    pub fn strategy(self) -> Box<dyn FallbackStrategy> {
        match self {
            Self::Local => Box::new(KeepLocal),
            Self::Remote => Box::new(KeepRemote),
        }
    }
}

impl fmt::Display for FallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for FallbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown fallback strategy '{other}'")),
        }
    }
}
