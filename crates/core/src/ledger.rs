//! Whole-file persistence shared by the lock ledger and the permission
//! registry.
//!
//! Ledgers are tracked files inside the repository's `.meg/` metadata
//! directory. They are always written whole: the new content goes to a
//! temporary file next to the target, which is then renamed over it, so a
//! concurrent reader sees either the old or the new ledger and never a
//! partial one.

use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use crate::errors::LedgerError;

/// Directory (relative to the working copy root) holding repository metadata.
pub const METADATA_DIR: &str = ".meg";

/// Relative path of the lock ledger.
pub const LOCKFILE_PATH: &str = ".meg/locks.json";

/// Relative path of the permission registry.
pub const PERMISSIONS_PATH: &str = ".meg/permissions.json";

/// `true` if `path` lives inside the metadata directory.
pub fn is_metadata_path(path: &str) -> bool {
    path == METADATA_DIR
        || path
            .strip_prefix(METADATA_DIR)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Atomically replace `path` with `content`, creating parent directories.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.display().to_string(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(content).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    debug!(path = %path.display(), bytes = content.len(), "ledger written");
    Ok(())
}

/// Read a ledger file, returning `None` when it is missing or unreadable.
/// Read failures are logged and treated like an absent file.
pub fn read_if_present(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "ledger not present");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ledger unreadable, treating as empty");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_paths() {
        assert!(is_metadata_path(".meg"));
        assert!(is_metadata_path(LOCKFILE_PATH));
        assert!(is_metadata_path(PERMISSIONS_PATH));
        assert!(!is_metadata_path(".megaton/file.bin"));
        assert!(!is_metadata_path("assets/.meg/locks.json"));
    }

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".meg").join("locks.json");

        write_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}");

        write_atomic(&path, b"{}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");

        // No temp files left behind.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_read_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_if_present(&dir.path().join("nope.json")).is_none());
    }
}
