pub mod config;
pub mod integrity;
pub mod manifest;
pub mod observability;
pub mod package;
pub mod permissions;

pub use integrity::IntegrityRecord;
pub use manifest::{Manifest, McpServerEntry};
pub use package::{Package, PackageError, UiVariant};
pub use permissions::{Action, PermissionError, PermissionGrant};
