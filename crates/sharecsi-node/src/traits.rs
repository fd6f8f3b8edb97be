use crate::error::Result;
use crate::mount_table::MountEntry;
use crate::secrets::StorageCredentials;
use async_trait::async_trait;
use std::path::Path;

/// Read access to the host's live mount namespace
///
/// Every node verb decides from this view rather than from remembered state,
/// so a restarted plugin sees the same mounts its predecessor left behind.
#[async_trait]
pub trait MountInspector: Send + Sync {
    /// Current mount table
    async fn mounts(&self) -> Result<Vec<MountEntry>>;

    /// Whether the filesystem at `target` responds; false for stale mounts
    async fn is_healthy(&self, target: &Path) -> bool;
}

/// Performs mounts and unmounts on the host
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount a remote share at `target`
    ///
    /// Credentials, when given, must not appear in logs or process arguments.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        credentials: Option<&StorageCredentials>,
    ) -> Result<()>;

    /// Bind-mount `source` at `target`
    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<()>;

    /// Unmount `target`; unmounting a path that is not mounted succeeds
    async fn unmount(&self, target: &Path) -> Result<()>;
}
