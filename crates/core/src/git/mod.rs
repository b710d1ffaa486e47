//! Repository engine: the version-control surface the sync cycle uses, and
//! its `git2` implementation.

pub mod client;
pub mod engine;

pub use client::{GitEngine, DEFAULT_BRANCH};
pub use engine::{
    Author, Credentials, MergeAnalysis, MergeSides, PathResolution, RepositoryEngine,
};
