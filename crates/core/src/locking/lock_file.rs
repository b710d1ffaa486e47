//! The persisted lock ledger.
//!
//! On disk the ledger is a JSON object keyed by repository-relative path:
//!
//! ```json
//! {
//!   "art/hero.psd": { "user": "jeff", "time": 1712345678901 }
//! }
//! ```
//!
//! This module is pure storage. Who may add or remove an entry is decided by
//! [`Locking`](super::Locking).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::LedgerError;
use crate::ledger;

/// A single active lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub path: String,
    pub user: String,
    /// Unix milliseconds at which the lock was taken.
    pub timestamp: i64,
}

impl LockEntry {
    pub fn new(path: impl Into<String>, user: impl Into<String>, timestamp: i64) -> Self {
        Self {
            path: path.into(),
            user: user.into(),
            timestamp,
        }
    }

    /// `true` if `self` should win over `other` when both claim the same
    /// path: the earlier lock wins, ties go to the smaller user name.
    pub fn precedes(&self, other: &LockEntry) -> bool {
        (self.timestamp, self.user.as_str()) <= (other.timestamp, other.user.as_str())
    }
}

/// On-disk record; the path is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    user: String,
    time: i64,
}

/// Path-keyed ledger of active locks.
#[derive(Debug, Clone, Default)]
pub struct LockFile {
    location: Option<PathBuf>,
    entries: BTreeMap<String, LockEntry>,
}

impl LockFile {
    /// An empty ledger that saves to `location`.
    pub fn new<P: Into<PathBuf>>(location: P) -> Self {
        Self {
            location: Some(location.into()),
            entries: BTreeMap::new(),
        }
    }

    /// Open the ledger at `location`. A missing or corrupt file yields an
    /// empty ledger still bound to `location`.
    pub fn open<P: Into<PathBuf>>(location: P) -> Self {
        let mut lock_file = Self::new(location);
        if let Some(path) = lock_file.location.clone() {
            lock_file.load(&path);
        }
        lock_file
    }

    /// Parse a ledger from raw bytes, e.g. a blob from the object store.
    /// The result has no file location.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            location: None,
            entries: parse_entries(bytes),
        }
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn get(&self, path: &str) -> Option<&LockEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Create or overwrite the lock on `path`, stamped with the current time.
    pub fn set(&mut self, path: &str, user: &str) -> &LockEntry {
        let entry = LockEntry::new(path, user, Utc::now().timestamp_millis());
        self.insert(entry)
    }

    /// Insert a fully formed entry, replacing any existing one for its path.
    pub fn insert(&mut self, entry: LockEntry) -> &LockEntry {
        let key = entry.path.clone();
        self.entries.insert(key.clone(), entry);
        &self.entries[&key]
    }

    /// Remove the lock on `path`. Removing an absent lock is a no-op.
    pub fn remove(&mut self, path: &str) -> Option<LockEntry> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LockEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Replace the in-memory state with the ledger stored at `source`.
    pub fn load(&mut self, source: &Path) {
        self.entries = ledger::read_if_present(source)
            .map(|bytes| parse_entries(&bytes))
            .unwrap_or_default();
        debug!(path = %source.display(), count = self.entries.len(), "lock ledger loaded");
    }

    /// Serialize to the canonical on-disk form.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let records: BTreeMap<&str, LockRecord> = self
            .entries
            .iter()
            .map(|(path, e)| {
                (
                    path.as_str(),
                    LockRecord {
                        user: e.user.clone(),
                        time: e.timestamp,
                    },
                )
            })
            .collect();
        let mut bytes = serde_json::to_vec_pretty(&records)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Persist the ledger to its file location.
    pub fn save(&self) -> Result<(), LedgerError> {
        let location = self.location.as_deref().ok_or(LedgerError::NoLocation)?;
        ledger::write_atomic(location, &self.to_json_bytes()?)
    }
}

impl PartialEq for LockFile {
    /// Ledgers are equal when their entries are; location is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

fn parse_entries(bytes: &[u8]) -> BTreeMap<String, LockEntry> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return BTreeMap::new();
    }
    match serde_json::from_slice::<BTreeMap<String, LockRecord>>(bytes) {
        Ok(records) => records
            .into_iter()
            .map(|(path, r)| {
                let entry = LockEntry::new(path.clone(), r.user, r.time);
                (path, entry)
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "corrupt lock ledger, treating as empty");
            BTreeMap::new()
        }
    }
}
