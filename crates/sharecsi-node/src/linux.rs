use crate::command::{run_mount_tool, run_umount, Unmounted};
use crate::error::{NodeError, Result};
use crate::mount_table::{parse_mountinfo, MountEntry};
use crate::secrets::StorageCredentials;
use crate::traits::{MountInspector, Mounter};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Reads the mount table from procfs mountinfo
pub struct ProcMountInspector {
    mounts_path: PathBuf,
    probe_timeout: Duration,
}

impl ProcMountInspector {
    pub fn new() -> Self {
        Self {
            mounts_path: PathBuf::from(PROC_MOUNTINFO),
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// Read from another mountinfo file, e.g. a host mount namespace
    pub fn with_mounts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_path = path.into();
        self
    }
}

impl Default for ProcMountInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MountInspector for ProcMountInspector {
    async fn mounts(&self) -> Result<Vec<MountEntry>> {
        let content = tokio::fs::read_to_string(&self.mounts_path)
            .await
            .map_err(|e| {
                NodeError::mount_table(format!("{}: {}", self.mounts_path.display(), e))
            })?;
        Ok(parse_mountinfo(&content))
    }

    async fn is_healthy(&self, target: &Path) -> bool {
        // a dead server leaves stat hanging or failing with ESTALE/EIO/ENOTCONN
        match tokio::time::timeout(self.probe_timeout, tokio::fs::read_dir(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Mount at {} failed health probe: {}", target.display(), e);
                false
            }
            Err(_) => {
                debug!("Mount at {} timed out during health probe", target.display());
                false
            }
        }
    }
}

/// Mounts through the host's `mount`/`umount` binaries
#[derive(Default)]
pub struct CommandMounter;

impl CommandMounter {
    pub fn new() -> Self {
        Self
    }
}

/// Write SMB credentials to a 0600 file that is removed when dropped
fn credentials_file(credentials: &StorageCredentials) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("sharecsi-cred-")
        .tempfile()
        .map_err(|e| NodeError::io("credentials file", e))?;
    let path = file.path().display().to_string();
    write!(
        file,
        "username={}\npassword={}\n",
        credentials.account_name, credentials.account_key
    )
    .map_err(|e| NodeError::io(&path, e))?;
    file.flush().map_err(|e| NodeError::io(&path, e))?;
    Ok(file)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| NodeError::io(path.display().to_string(), "path is not valid UTF-8"))
}

#[async_trait]
impl Mounter for CommandMounter {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        credentials: Option<&StorageCredentials>,
    ) -> Result<()> {
        let target_str = path_str(target)?;
        let mut options = options.to_vec();

        // held until mount returns; the file is deleted on drop
        let cred_file = credentials.map(credentials_file).transpose()?;
        if let Some(file) = &cred_file {
            options.push(format!("credentials={}", path_str(file.path())?));
        }
        let joined = options.join(",");

        run_mount_tool(
            "mount",
            &["-t", fs_type, "-o", joined.as_str(), source, target_str],
            target_str,
        )
        .await?;

        info!("Mounted {} at {} ({})", source, target.display(), fs_type);
        Ok(())
    }

    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<()> {
        let source_str = path_str(source)?;
        let target_str = path_str(target)?;

        run_mount_tool("mount", &["--bind", source_str, target_str], target_str).await?;
        if read_only {
            run_mount_tool("mount", &["-o", "remount,bind,ro", target_str], target_str).await?;
        }

        info!(
            "Bind-mounted {} at {}{}",
            source.display(),
            target.display(),
            if read_only { " (read-only)" } else { "" }
        );
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let target_str = path_str(target)?;
        match run_umount(target_str).await? {
            Unmounted::Done => info!("Unmounted {}", target.display()),
            Unmounted::NotMounted => debug!("{} was not mounted", target.display()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[tokio::test]
    async fn test_reads_mounts_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mountinfo");
        std::fs::write(
            &path,
            "301 28 0:53 / /staging/a rw,relatime shared:150 - cifs //acct.file.core.windows.net/pvc-a rw,vers=3.0\n",
        )
        .unwrap();

        let inspector = ProcMountInspector::new().with_mounts_path(&path);
        let mounts = inspector.mounts().await.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].fs_type, "cifs");
        assert_eq!(mounts[0].device, "0:53");

        let missing = ProcMountInspector::new().with_mounts_path(dir.path().join("nope"));
        assert!(matches!(
            missing.mounts().await,
            Err(NodeError::MountTable { .. })
        ));
    }

    #[tokio::test]
    async fn test_health_probe() {
        let dir = tempfile::tempdir().unwrap();
        let inspector = ProcMountInspector::new();
        assert!(inspector.is_healthy(dir.path()).await);
        assert!(!inspector.is_healthy(&dir.path().join("gone")).await);
    }

    #[test]
    fn test_credentials_file_is_private() {
        let creds = StorageCredentials {
            account_name: "acct".to_string(),
            account_key: "key==".to_string(),
        };
        let file = credentials_file(&creds).unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "username=acct\npassword=key==\n");

        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }
}
