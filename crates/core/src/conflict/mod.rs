//! Conflict handling for the synchronization cycle.
//!
//! [`policy`] decides which local edits may be staged and how each
//! conflicted path is resolved; [`strategy`] supplies the pluggable
//! fallback for paths no lock or permission rule claims.

pub mod policy;
pub mod strategy;

pub use policy::{Choice, Decision, PolicyContext, Rule, Side};
pub use strategy::{FallbackKind, FallbackStrategy, KeepLocal, KeepRemote};
