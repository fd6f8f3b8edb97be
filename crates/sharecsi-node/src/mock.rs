use crate::error::{NodeError, Result};
use crate::mount_table::{find_mount, MountEntry};
use crate::secrets::StorageCredentials;
use crate::traits::{MountInspector, Mounter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct MockState {
    table: Vec<MountEntry>,
    /// Device number per source; mounts of one source share a superblock
    devices: HashMap<String, String>,
    stale: HashSet<String>,
    faults: VecDeque<NodeError>,
    mount_calls: usize,
}

/// In-memory mount table for tests and development
///
/// Mounts are emulated with symlinks: a remote source maps to a directory
/// under `backing_root`, and mount targets become links to it. Files written
/// through one target are therefore visible through every other target of
/// the same source. Bind mounts are recorded with the source, device and
/// root of the mount they bind, as the kernel reports them.
#[derive(Clone)]
pub struct MockMounter {
    backing_root: PathBuf,
    state: Arc<Mutex<MockState>>,
}

impl MockMounter {
    pub fn new(backing_root: impl Into<PathBuf>) -> Self {
        Self {
            backing_root: backing_root.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Fail the next `mount` call with `error`
    pub fn fail_next_mount(&self, error: NodeError) {
        self.state.lock().faults.push_back(error);
    }

    /// Make the mount at `target` fail its health probe
    pub fn mark_stale(&self, target: &Path) {
        self.state.lock().stale.insert(path_key(target));
    }

    /// Number of `mount` calls, including failed ones
    pub fn mount_calls(&self) -> usize {
        self.state.lock().mount_calls
    }

    pub fn entries(&self) -> Vec<MountEntry> {
        self.state.lock().table.clone()
    }

    fn backing_dir(&self, source: &str) -> PathBuf {
        let name: String = source
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.backing_root.join(name)
    }

    fn device_for(state: &mut MockState, source: &str) -> String {
        let next = state.devices.len() + 50;
        state
            .devices
            .entry(source.to_string())
            .or_insert_with(|| format!("0:{}", next))
            .clone()
    }

    fn is_mounted(&self, target: &Path) -> bool {
        find_mount(&self.state.lock().table, target).is_some()
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn access_option(read_only: bool) -> String {
    if read_only { "ro" } else { "rw" }.to_string()
}

/// Swap the (empty) mount point directory for a link to `backing`
async fn link_target(backing: &Path, target: &Path) -> Result<()> {
    if tokio::fs::symlink_metadata(target).await.is_ok() {
        tokio::fs::remove_dir(target)
            .await
            .map_err(|e| NodeError::mount_failed(path_key(target), e.to_string()))?;
    }
    tokio::fs::symlink(backing, target)
        .await
        .map_err(|e| NodeError::mount_failed(path_key(target), e.to_string()))
}

#[async_trait]
impl MountInspector for MockMounter {
    async fn mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(self.entries())
    }

    async fn is_healthy(&self, target: &Path) -> bool {
        if self.state.lock().stale.contains(&path_key(target)) {
            return false;
        }
        tokio::fs::metadata(target).await.is_ok()
    }
}

#[async_trait]
impl Mounter for MockMounter {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        _credentials: Option<&StorageCredentials>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.mount_calls += 1;
            if let Some(error) = state.faults.pop_front() {
                return Err(error);
            }
        }
        if self.is_mounted(target) {
            return Err(NodeError::mount_failed(path_key(target), "already a mount point"));
        }

        let backing = self.backing_dir(source);
        tokio::fs::create_dir_all(&backing)
            .await
            .map_err(|e| NodeError::io(path_key(&backing), e))?;
        link_target(&backing, target).await?;

        let mut entry_options = vec![access_option(options.iter().any(|o| o == "ro"))];
        entry_options.extend(options.iter().filter(|o| *o != "ro").cloned());
        {
            let mut state = self.state.lock();
            let device = Self::device_for(&mut state, source);
            state.table.push(MountEntry {
                source: source.to_string(),
                target: path_key(target),
                fs_type: fs_type.to_string(),
                options: entry_options,
                device,
                root: "/".to_string(),
            });
        }
        debug!("Mock: mounted {} at {}", source, target.display());
        Ok(())
    }

    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<()> {
        let origin = find_mount(&self.state.lock().table, source)
            .cloned()
            .ok_or_else(|| NodeError::mount_failed(path_key(target), "bind source is not mounted"))?;
        if self.is_mounted(target) {
            return Err(NodeError::mount_failed(path_key(target), "already a mount point"));
        }

        let backing = tokio::fs::read_link(source)
            .await
            .map_err(|e| NodeError::io(path_key(source), e))?;
        link_target(&backing, target).await?;

        self.state.lock().table.push(MountEntry {
            source: origin.source,
            target: path_key(target),
            fs_type: origin.fs_type,
            options: vec![access_option(read_only)],
            device: origin.device,
            root: origin.root,
        });
        debug!("Mock: bind-mounted {} at {}", source.display(), target.display());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        let key = path_key(target);
        let removed = {
            let mut state = self.state.lock();
            state.stale.remove(&key);
            match state.table.iter().rposition(|e| e.target == key) {
                Some(pos) => {
                    state.table.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return Ok(());
        }

        // leave an empty mount point behind, as a real unmount does
        tokio::fs::remove_file(target)
            .await
            .map_err(|e| NodeError::io(&key, e))?;
        tokio::fs::create_dir(target)
            .await
            .map_err(|e| NodeError::io(&key, e))?;
        debug!("Mock: unmounted {}", target.display());
        Ok(())
    }
}
