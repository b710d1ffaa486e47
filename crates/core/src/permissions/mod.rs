//! Role-based permissions: capabilities, roles and the registry that
//! assigns them to users and paths.

pub mod registry;
pub mod role;

pub use registry::{FileOverride, PermissionRegistry, ADMIN_ROLE};
pub use role::{Capability, Role, DEFAULT_ROLE};
