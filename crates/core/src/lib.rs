//! megsync core library.
//!
//! Advisory file locking and role-based permissions layered over a git
//! pull/merge/push cycle, for repositories of large assets that cannot be
//! merged by text. The lock ledger and the permission registry are tracked
//! files inside the repository and are reconciled on every merge.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod ledger;
pub mod locking;
pub mod models;
pub mod permissions;
pub mod sync_controller;

// Re-exports for convenience.
pub use config::AppConfig;
pub use locking::{LockEntry, LockFile, Locking};
pub use permissions::{Capability, PermissionRegistry, Role};
pub use sync_controller::{SyncController, SyncSettings};
