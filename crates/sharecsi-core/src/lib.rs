//! Sharecsi Core - Shared types for the file-share volume plugin
//!
//! This crate provides:
//! - The error taxonomy and status kinds returned by every verb
//! - Volume and snapshot handle encoding
//! - Typed storage class parameters
//! - Request/response types and the identity, controller and node traits
//! - The per-resource lock table

// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod capacity;
pub mod error;
pub mod handle;
pub mod locks;
pub mod params;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use error::{CsiError, Result, Status, StatusKind};
pub use handle::{HandleVersion, SnapshotHandle, VolumeHandle};
pub use locks::{LockGuard, LockTable};
pub use params::VolumeParameters;
pub use service::{CsiController, CsiIdentity, CsiNode};
pub use types::*;

/// Driver name registered with the orchestrator unless overridden
pub const DEFAULT_DRIVER_NAME: &str = "file.csi.azure.com";

/// Volume context keys handed from the controller to the node
pub mod context {
    pub const PROTOCOL: &str = "protocol";
    pub const SERVER: &str = "server";
    pub const SHARE_NAME: &str = "shareName";
    pub const STORAGE_ACCOUNT: &str = "storageAccount";
    pub const RESOURCE_GROUP: &str = "resourceGroup";
    pub const SECRET_NAME: &str = "secretName";
    pub const SECRET_NAMESPACE: &str = "secretNamespace";
    pub const MOUNT_OPTIONS: &str = "mountOptions";
}
