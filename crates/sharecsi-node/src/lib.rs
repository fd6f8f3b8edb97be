//! Sharecsi Node - Staging and publishing shares on a host
//!
//! This crate provides:
//! - The node verbs (stage, publish, unpublish, unstage)
//! - Mount table inspection and stale mount detection
//! - Mounters backed by the host binaries or an in-memory table
//! - Credential resolution from orchestrator secrets

// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

pub mod command;
pub mod error;
pub mod linux;
pub mod mock;
pub mod mount_table;
pub mod options;
pub mod secrets;
pub mod service;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{NodeError, Result};
pub use linux::{CommandMounter, ProcMountInspector};
pub use mock::MockMounter;
pub use mount_table::MountEntry;
pub use secrets::{KubeSecretStore, SecretStore, StaticSecretStore, StorageCredentials};
pub use service::NodeService;
pub use traits::{MountInspector, Mounter};
pub use types::{NodeConfig, StagedVolume};
