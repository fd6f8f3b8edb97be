use crate::error::NodeError;
use crate::mount_table::{bind_targets, find_mount, MountEntry};
use crate::options::{fs_type, merge_mount_options, mount_source, split_options};
use crate::secrets::{resolve_credentials, SecretStore};
use crate::traits::{MountInspector, Mounter};
use crate::types::{NodeConfig, StagedVolume};
use async_trait::async_trait;
use parking_lot::Mutex;
use sharecsi_cloud::{Retrier, RetryError};
use sharecsi_core::types::*;
use sharecsi_core::{
    context, CsiError, CsiNode, HandleVersion, LockGuard, LockTable, Result, VolumeHandle,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Node service: stages shares and bind-mounts them into workloads
///
/// The live mount table is the source of truth for every decision. The
/// registry kept here only mirrors it for reporting and is rebuilt by
/// [`NodeService::recover`] after a restart.
pub struct NodeService {
    config: NodeConfig,
    inspector: Arc<dyn MountInspector>,
    mounter: Arc<dyn Mounter>,
    secrets: Arc<dyn SecretStore>,
    locks: LockTable,
    retrier: Retrier,
    registry: Mutex<HashMap<String, StagedVolume>>,
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CsiError::invalid_argument(format!("{} is required", what)));
    }
    Ok(())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn mount_error(err: RetryError<NodeError>, target: &str) -> CsiError {
    match err {
        RetryError::Terminal { error, .. } => error.into_csi(target),
        RetryError::Exhausted { attempts, last, .. } => CsiError::mount_failure(
            target,
            format!("gave up after {} attempts: {}", attempts, last),
        ),
    }
}

/// Remove an (unmounted) mount point directory; a missing one is fine
async fn remove_mount_point(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CsiError::internal(format!(
            "failed to remove mount point {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn create_mount_point(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        CsiError::internal(format!(
            "failed to create mount point {}: {}",
            path.display(),
            e
        ))
    })
}

impl NodeService {
    pub fn new(
        config: NodeConfig,
        inspector: Arc<dyn MountInspector>,
        mounter: Arc<dyn Mounter>,
        secrets: Arc<dyn SecretStore>,
        retrier: Retrier,
    ) -> Self {
        Self {
            config,
            inspector,
            mounter,
            secrets,
            locks: LockTable::new(),
            retrier,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Staged volumes as last observed, sorted by staging path
    pub fn staged_volumes(&self) -> Vec<StagedVolume> {
        let mut staged: Vec<StagedVolume> = self.registry.lock().values().cloned().collect();
        staged.sort_by(|a, b| a.staging_path.cmp(&b.staging_path));
        staged
    }

    /// Rebuild the registry from mounts under the staging root.
    ///
    /// Returns the number of staged volumes found.
    pub async fn recover(&self) -> Result<usize> {
        let mounts = self.live_mounts().await?;
        let mut found: HashMap<String, StagedVolume> = mounts
            .iter()
            .filter(|e| e.is_under(&self.config.staging_root))
            .map(|entry| {
                let staged = StagedVolume {
                    volume_id: None,
                    staging_path: entry.target.clone(),
                    source: entry.source.clone(),
                    publishes: self
                        .publishes_of(&mounts, entry)
                        .into_iter()
                        .map(|e| e.target.clone())
                        .collect(),
                };
                (entry.target.clone(), staged)
            })
            .collect();

        let mut registry = self.registry.lock();
        for (path, staged) in found.iter_mut() {
            if let Some(known) = registry.get(path) {
                staged.volume_id = known.volume_id.clone();
            }
        }
        let count = found.len();
        *registry = found;
        info!(
            "Recovered {} staged volume(s) under {}",
            count,
            self.config.staging_root.display()
        );
        Ok(count)
    }

    async fn lock(&self, volume_id: &str, operation: &str) -> Result<LockGuard> {
        self.locks
            .acquire_timeout(
                &format!("volume/{}", volume_id),
                operation,
                self.config.lock_timeout(),
            )
            .await
    }

    async fn live_mounts(&self) -> Result<Vec<MountEntry>> {
        self.inspector
            .mounts()
            .await
            .map_err(|e| CsiError::internal(e.to_string()))
    }

    /// Publishes of the volume staged at `staging`.
    ///
    /// The kernel only tells which filesystem view a bind mount shows, and
    /// two staging mounts of one share show the same view. A target that
    /// this node published from another staging path, and not from this
    /// one, is therefore left out. Targets nobody recorded (e.g. after a
    /// restart) count for every staging mount of the view.
    fn publishes_of<'a>(&self, mounts: &'a [MountEntry], staging: &MountEntry) -> Vec<&'a MountEntry> {
        let registry = self.registry.lock();
        let recorded_for = |path: &str, target: &str| {
            registry
                .get(path)
                .is_some_and(|s| s.publishes.iter().any(|p| p == target))
        };
        let claimed_elsewhere = |target: &str| {
            !recorded_for(&staging.target, target)
                && registry
                    .keys()
                    .any(|path| *path != staging.target && recorded_for(path, target))
        };

        bind_targets(mounts, staging)
            .into_iter()
            .filter(|e| !e.is_under(&self.config.staging_root))
            .filter(|e| !claimed_elsewhere(&e.target))
            .collect()
    }

    fn protocol_for(handle: &VolumeHandle, volume_context: &HashMap<String, String>) -> Result<Protocol> {
        if handle.version == HandleVersion::V2 {
            return Ok(handle.protocol);
        }
        match volume_context.get(context::PROTOCOL) {
            Some(p) if !p.is_empty() => p.parse::<Protocol>().map_err(CsiError::invalid_argument),
            _ => Ok(handle.protocol),
        }
    }

    fn record_stage(&self, volume_id: &str, staging_path: &str, source: &str) {
        let mut registry = self.registry.lock();
        let entry = registry
            .entry(staging_path.to_string())
            .or_insert_with(|| StagedVolume {
                staging_path: staging_path.to_string(),
                ..Default::default()
            });
        entry.volume_id = Some(volume_id.to_string());
        entry.source = source.to_string();
    }

    fn record_publish(&self, volume_id: &str, staged: &MountEntry, target: &str) {
        let mut registry = self.registry.lock();
        let entry = registry
            .entry(staged.target.clone())
            .or_insert_with(|| StagedVolume {
                staging_path: staged.target.clone(),
                source: staged.source.clone(),
                ..Default::default()
            });
        entry.volume_id = Some(volume_id.to_string());
        if !entry.publishes.iter().any(|p| p == target) {
            entry.publishes.push(target.to_string());
        }
    }

    fn record_unpublish(&self, target: &str) {
        for entry in self.registry.lock().values_mut() {
            entry.publishes.retain(|p| p != target);
        }
    }

    fn record_unstage(&self, staging_path: &str) {
        self.registry.lock().remove(staging_path);
    }
}

#[async_trait]
impl CsiNode for NodeService {
    async fn node_stage_volume(&self, req: NodeStageVolumeRequest) -> Result<()> {
        require(&req.volume_id, "volume id")?;
        require(&req.staging_target_path, "staging target path")?;
        if req.volume_capability.is_block() {
            return Err(CsiError::invalid_argument(
                "block access is not supported for file shares",
            ));
        }

        let handle = VolumeHandle::decode(&req.volume_id)?;
        let protocol = Self::protocol_for(&handle, &req.volume_context)?;
        let staging = Path::new(&req.staging_target_path);
        let source = mount_source(
            &handle,
            protocol,
            req.volume_context.get(context::SERVER).map(String::as_str),
            &self.config.endpoint_suffix,
        );

        let _guard = self.lock(&req.volume_id, "NodeStageVolume").await?;

        let mounts = self.live_mounts().await?;
        if let Some(existing) = find_mount(&mounts, staging) {
            let healthy = self.inspector.is_healthy(staging).await;
            if healthy && existing.source == source {
                debug!(
                    "Volume {} already staged at {}",
                    req.volume_id, req.staging_target_path
                );
                self.record_stage(&req.volume_id, &req.staging_target_path, &source);
                return Ok(());
            }
            if healthy {
                return Err(CsiError::already_exists(
                    format!("staging path {}", req.staging_target_path),
                    format!("mounted from {}, expected {}", existing.source, source),
                ));
            }

            warn!(
                "Staging mount at {} is stale, remounting",
                req.staging_target_path
            );
            self.mounter
                .unmount(staging)
                .await
                .map_err(|e| e.into_csi(&req.staging_target_path))?;
        }

        create_mount_point(staging).await?;

        let credentials = match protocol {
            Protocol::Smb => Some(
                resolve_credentials(
                    self.secrets.as_ref(),
                    &req.secrets,
                    &req.volume_context,
                    &handle.account,
                    &self.config.default_secret_namespace,
                )
                .await
                .map_err(|e| e.into_csi(&req.staging_target_path))?,
            ),
            Protocol::Nfs => None,
        };

        let mut user_options = req.volume_capability.mount_flags().to_vec();
        if let Some(extra) = req.volume_context.get(context::MOUNT_OPTIONS) {
            user_options.extend(split_options(extra));
        }
        let options = merge_mount_options(&user_options, protocol);
        let fs = fs_type(protocol);

        self.retrier
            .call("mount", NodeError::disposition, || {
                self.mounter
                    .mount(&source, staging, fs, &options, credentials.as_ref())
            })
            .await
            .map_err(|e| mount_error(e, &req.staging_target_path))?;

        info!(
            "Staged volume {} ({}) at {}",
            req.volume_id, source, req.staging_target_path
        );
        self.record_stage(&req.volume_id, &req.staging_target_path, &source);
        Ok(())
    }

    async fn node_unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<()> {
        require(&req.volume_id, "volume id")?;
        require(&req.staging_target_path, "staging target path")?;
        let staging = Path::new(&req.staging_target_path);

        let _guard = self.lock(&req.volume_id, "NodeUnstageVolume").await?;

        let mounts = self.live_mounts().await?;
        if let Some(entry) = find_mount(&mounts, staging) {
            let publishes = self.publishes_of(&mounts, entry);
            if !publishes.is_empty() {
                return Err(CsiError::volume_in_use(&req.volume_id, publishes.len()));
            }
            self.mounter
                .unmount(staging)
                .await
                .map_err(|e| e.into_csi(&req.staging_target_path))?;
            info!(
                "Unstaged volume {} from {}",
                req.volume_id, req.staging_target_path
            );
        } else {
            debug!(
                "Volume {} not staged at {}",
                req.volume_id, req.staging_target_path
            );
        }

        remove_mount_point(staging).await?;
        self.record_unstage(&req.staging_target_path);
        Ok(())
    }

    async fn node_publish_volume(&self, req: NodePublishVolumeRequest) -> Result<()> {
        require(&req.volume_id, "volume id")?;
        require(&req.staging_target_path, "staging target path")?;
        require(&req.target_path, "target path")?;
        if req.volume_capability.is_block() {
            return Err(CsiError::invalid_argument(
                "block access is not supported for file shares",
            ));
        }
        let staging = Path::new(&req.staging_target_path);
        let target = Path::new(&req.target_path);

        let _guard = self.lock(&req.volume_id, "NodePublishVolume").await?;

        let mounts = self.live_mounts().await?;
        let staged = find_mount(&mounts, staging)
            .ok_or_else(|| CsiError::not_staged(&req.volume_id, &req.staging_target_path))?;

        if let Some(existing) = find_mount(&mounts, target) {
            if existing.same_view(staged) {
                debug!(
                    "Volume {} already published at {}",
                    req.volume_id, req.target_path
                );
                self.record_publish(&req.volume_id, staged, &req.target_path);
                return Ok(());
            }
            return Err(CsiError::already_exists(
                format!("target path {}", req.target_path),
                format!("mounted from {}", existing.source),
            ));
        }

        create_mount_point(target).await?;
        let read_only = req.read_only || req.volume_capability.access_mode.is_read_only();
        self.mounter
            .bind_mount(staging, target, read_only)
            .await
            .map_err(|e| e.into_csi(&req.target_path))?;

        info!(
            "Published volume {} at {}{}",
            req.volume_id,
            req.target_path,
            if read_only { " (read-only)" } else { "" }
        );
        self.record_publish(&req.volume_id, staged, &req.target_path);
        Ok(())
    }

    async fn node_unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<()> {
        require(&req.volume_id, "volume id")?;
        require(&req.target_path, "target path")?;
        let target = Path::new(&req.target_path);

        let _guard = self.lock(&req.volume_id, "NodeUnpublishVolume").await?;

        let mounts = self.live_mounts().await?;
        if find_mount(&mounts, target).is_some() {
            self.mounter
                .unmount(target)
                .await
                .map_err(|e| e.into_csi(&req.target_path))?;
            info!("Unpublished volume {} from {}", req.volume_id, req.target_path);
        }

        remove_mount_point(target).await?;
        self.record_unpublish(&path_key(target));
        Ok(())
    }

    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>> {
        Ok(vec![
            NodeCapability::StageUnstageVolume,
            NodeCapability::SingleNodeMultiWriter,
        ])
    }

    async fn node_get_info(&self) -> Result<NodeInfo> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes_per_node: self.config.max_volumes_per_node,
            accessible_topology: self.config.topology.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockMounter;
    use crate::secrets::{default_secret_name, StaticSecretStore, ACCOUNT_KEY_KEY};
    use sharecsi_cloud::RetryPolicy;
    use sharecsi_core::StatusKind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        mounter: MockMounter,
        svc: NodeService,
        staging_root: PathBuf,
        pods: PathBuf,
    }

    fn retrier() -> Retrier {
        Retrier::new(RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            max_elapsed_ms: 10_000,
            jitter: 0.0,
        })
    }

    fn service_for(mounter: &MockMounter, secrets: Arc<StaticSecretStore>, root: &Path) -> NodeService {
        let config = NodeConfig {
            node_id: "node-1".to_string(),
            staging_root: root.to_path_buf(),
            ..Default::default()
        };
        NodeService::new(
            config,
            Arc::new(mounter.clone()),
            Arc::new(mounter.clone()),
            secrets,
            retrier(),
        )
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let staging_root = dir.path().join("plugins");
        let pods = dir.path().join("pods");
        let mounter = MockMounter::new(dir.path().join("backing"));

        let secrets = Arc::new(StaticSecretStore::new());
        secrets.insert(
            "default",
            &default_secret_name("acct"),
            [(ACCOUNT_KEY_KEY.to_string(), "a2V5".to_string())].into(),
        );
        let svc = service_for(&mounter, secrets, &staging_root);

        Fixture {
            _dir: dir,
            mounter,
            svc,
            staging_root,
            pods,
        }
    }

    fn volume_id(share: &str, protocol: Protocol) -> String {
        VolumeHandle::new("rg", "acct", share, protocol)
            .with_uuid("0b5e7c9a")
            .encode()
    }

    fn cap() -> VolumeCapability {
        VolumeCapability::mount(AccessMode::MultiNodeMultiWriter, vec![])
    }

    fn stage_req(volume_id: &str, staging: &Path) -> NodeStageVolumeRequest {
        NodeStageVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: path_key(staging),
            volume_capability: cap(),
            volume_context: HashMap::new(),
            secrets: HashMap::new(),
        }
    }

    fn publish_req(volume_id: &str, staging: &Path, target: &Path) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: path_key(staging),
            target_path: path_key(target),
            volume_capability: cap(),
            read_only: false,
            volume_context: HashMap::new(),
        }
    }

    fn unpublish_req(volume_id: &str, target: &Path) -> NodeUnpublishVolumeRequest {
        NodeUnpublishVolumeRequest {
            volume_id: volume_id.to_string(),
            target_path: path_key(target),
        }
    }

    fn unstage_req(volume_id: &str, staging: &Path) -> NodeUnstageVolumeRequest {
        NodeUnstageVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: path_key(staging),
        }
    }

    #[tokio::test]
    async fn test_stage_publish_lifecycle() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let staging = f.staging_root.join("H");
        let target = f.pods.join("p1").join("vol");

        f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap();
        f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap();
        assert_eq!(f.mounter.mount_calls(), 1);

        let staged = f.mounter.entries();
        assert_eq!(staged[0].source, "//acct.file.core.windows.net/vol-a");
        assert_eq!(staged[0].fs_type, "cifs");
        assert!(staged[0].options.iter().any(|o| o == "vers=3.0"));

        f.svc
            .node_publish_volume(publish_req(&id, &staging, &target))
            .await
            .unwrap();
        f.svc
            .node_publish_volume(publish_req(&id, &staging, &target))
            .await
            .unwrap();
        assert_eq!(f.mounter.entries().len(), 2);

        std::fs::write(target.join("hello"), "hello").unwrap();
        assert_eq!(
            std::fs::read_to_string(staging.join("hello")).unwrap(),
            "hello"
        );

        let err = f
            .svc
            .node_unstage_volume(unstage_req(&id, &staging))
            .await
            .unwrap_err();
        assert_eq!(err.status_kind(), StatusKind::VolumeInUse);
        assert_eq!(f.svc.staged_volumes()[0].reference_count(), 1);

        f.svc.node_unpublish_volume(unpublish_req(&id, &target)).await.unwrap();
        f.svc.node_unpublish_volume(unpublish_req(&id, &target)).await.unwrap();
        assert!(!target.exists());
        assert_eq!(f.svc.staged_volumes()[0].reference_count(), 0);

        f.svc.node_unstage_volume(unstage_req(&id, &staging)).await.unwrap();
        f.svc.node_unstage_volume(unstage_req(&id, &staging)).await.unwrap();
        assert!(f.mounter.entries().is_empty());
        assert!(f.svc.staged_volumes().is_empty());
        assert!(f.svc.locks().is_empty());
    }

    #[tokio::test]
    async fn test_unstage_waits_for_every_publish() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let staging = f.staging_root.join("H");
        let targets: Vec<PathBuf> = (1..=3).map(|i| f.pods.join(format!("p{}", i))).collect();

        f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap();
        for target in &targets {
            f.svc
                .node_publish_volume(publish_req(&id, &staging, target))
                .await
                .unwrap();
        }
        assert_eq!(f.svc.staged_volumes()[0].reference_count(), 3);

        for (i, target) in targets.iter().enumerate() {
            let err = f
                .svc
                .node_unstage_volume(unstage_req(&id, &staging))
                .await
                .unwrap_err();
            assert_eq!(err.status_kind(), StatusKind::VolumeInUse);
            assert!(find_mount(&f.mounter.entries(), &staging).is_some());

            f.svc.node_unpublish_volume(unpublish_req(&id, target)).await.unwrap();
            assert_eq!(f.svc.staged_volumes()[0].reference_count(), 2 - i);
        }

        f.svc.node_unstage_volume(unstage_req(&id, &staging)).await.unwrap();
        assert!(f.mounter.entries().is_empty());
        assert!(f.svc.staged_volumes().is_empty());
    }

    #[tokio::test]
    async fn test_volumes_of_one_share_count_their_own_publishes() {
        let f = fixture();
        let handle = |uuid: &str| {
            VolumeHandle::new("rg", "acct", "vol-a", Protocol::Smb)
                .with_uuid(uuid)
                .encode()
        };
        let (a, b) = (handle("u1"), handle("u2"));
        let staging_a = f.staging_root.join("A");
        let staging_b = f.staging_root.join("B");
        let target = f.pods.join("p1");

        f.svc.node_stage_volume(stage_req(&a, &staging_a)).await.unwrap();
        f.svc.node_stage_volume(stage_req(&b, &staging_b)).await.unwrap();
        let entries = f.mounter.entries();
        assert!(entries[0].same_view(&entries[1]));

        f.svc
            .node_publish_volume(publish_req(&b, &staging_b, &target))
            .await
            .unwrap();

        f.svc.node_unstage_volume(unstage_req(&a, &staging_a)).await.unwrap();
        assert!(find_mount(&f.mounter.entries(), &staging_a).is_none());

        let err = f
            .svc
            .node_unstage_volume(unstage_req(&b, &staging_b))
            .await
            .unwrap_err();
        assert_eq!(err.status_kind(), StatusKind::VolumeInUse);

        f.svc.node_unpublish_volume(unpublish_req(&b, &target)).await.unwrap();
        f.svc.node_unstage_volume(unstage_req(&b, &staging_b)).await.unwrap();
        assert!(f.mounter.entries().is_empty());
    }

    #[tokio::test]
    async fn test_unattributed_publishes_count_for_every_staging_mount() {
        let f = fixture();
        let handle = |uuid: &str| {
            VolumeHandle::new("rg", "acct", "vol-a", Protocol::Smb)
                .with_uuid(uuid)
                .encode()
        };
        let (a, b) = (handle("u1"), handle("u2"));
        let staging_a = f.staging_root.join("A");
        let staging_b = f.staging_root.join("B");
        f.svc.node_stage_volume(stage_req(&a, &staging_a)).await.unwrap();
        f.svc.node_stage_volume(stage_req(&b, &staging_b)).await.unwrap();
        f.svc
            .node_publish_volume(publish_req(&b, &staging_b, &f.pods.join("p1")))
            .await
            .unwrap();

        // after a restart the mount table cannot say which staging path was bound
        let restarted = service_for(&f.mounter, Arc::new(StaticSecretStore::new()), &f.staging_root);
        assert_eq!(restarted.recover().await.unwrap(), 2);
        for (id, staging) in [(&a, &staging_a), (&b, &staging_b)] {
            let err = restarted
                .node_unstage_volume(unstage_req(id, staging))
                .await
                .unwrap_err();
            assert_eq!(err.status_kind(), StatusKind::VolumeInUse);
        }
    }

    #[tokio::test]
    async fn test_publish_requires_stage() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let err = f
            .svc
            .node_publish_volume(publish_req(
                &id,
                &f.staging_root.join("H"),
                &f.pods.join("p1"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::NotStaged { .. }));
        assert_eq!(err.status_kind(), StatusKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_read_only_publish() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let staging = f.staging_root.join("H");
        let target = f.pods.join("p1");

        f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap();
        let mut req = publish_req(&id, &staging, &target);
        req.volume_capability = VolumeCapability::mount(AccessMode::MultiNodeReaderOnly, vec![]);
        f.svc.node_publish_volume(req).await.unwrap();

        let entries = f.mounter.entries();
        let published = find_mount(&entries, &target).unwrap();
        assert!(published.is_read_only());
    }

    #[tokio::test]
    async fn test_stale_staging_mount_is_repaired() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let staging = f.staging_root.join("H");

        f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap();
        f.mounter.mark_stale(&staging);
        f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap();

        assert_eq!(f.mounter.mount_calls(), 2);
        assert_eq!(f.mounter.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_mount_failure_is_retried() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        f.mounter.fail_next_mount(NodeError::mount_failed(
            "H",
            "mount error: could not resolve address for acct.file.core.windows.net",
        ));

        f.svc
            .node_stage_volume(stage_req(&id, &f.staging_root.join("H")))
            .await
            .unwrap();
        assert_eq!(f.mounter.mount_calls(), 2);
    }

    #[tokio::test]
    async fn test_mount_failures_surface_as_mount_failure() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let staging = f.staging_root.join("H");

        f.mounter
            .fail_next_mount(NodeError::mount_failed("H", "mount error(13): Permission denied"));
        let err = f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap_err();
        assert!(matches!(err, CsiError::MountFailure { .. }));
        assert_eq!(f.mounter.mount_calls(), 1);

        for _ in 0..3 {
            f.mounter.fail_next_mount(NodeError::mount_failed("H", "Host is down"));
        }
        let err = f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap_err();
        assert!(matches!(err, CsiError::MountFailure { .. }));
        assert!(err.to_string().contains("gave up after 3 attempts"));
    }

    #[tokio::test]
    async fn test_nfs_stage_needs_no_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = MockMounter::new(dir.path().join("backing"));
        let root = dir.path().join("plugins");
        let svc = service_for(&mounter, Arc::new(StaticSecretStore::new()), &root);
        let id = volume_id("vol-n", Protocol::Nfs);

        svc.node_stage_volume(stage_req(&id, &root.join("N"))).await.unwrap();
        let entries = mounter.entries();
        assert_eq!(entries[0].source, "acct.file.core.windows.net:/acct/vol-n");
        assert_eq!(entries[0].fs_type, "nfs");
        assert!(entries[0].options.iter().any(|o| o == "minorversion=1"));

        let smb = volume_id("vol-s", Protocol::Smb);
        let err = svc
            .node_stage_volume(stage_req(&smb, &root.join("S")))
            .await
            .unwrap_err();
        assert_eq!(err.status_kind(), StatusKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_user_mount_options_win() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let staging = f.staging_root.join("H");
        let mut req = stage_req(&id, &staging);
        req.volume_capability =
            VolumeCapability::mount(AccessMode::MultiNodeMultiWriter, vec!["vers=3.1.1".to_string()]);
        req.volume_context
            .insert(context::MOUNT_OPTIONS.to_string(), "uid=1000".to_string());

        f.svc.node_stage_volume(req).await.unwrap();
        let options = &f.mounter.entries()[0].options;
        assert!(options.iter().any(|o| o == "vers=3.1.1"));
        assert!(options.iter().any(|o| o == "uid=1000"));
        assert!(!options.iter().any(|o| o == "vers=3.0"));
    }

    #[tokio::test]
    async fn test_recovery_rebuilds_reference_counts() {
        let f = fixture();
        let id = volume_id("vol-a", Protocol::Smb);
        let staging = f.staging_root.join("H");
        let target = f.pods.join("p1");
        f.svc.node_stage_volume(stage_req(&id, &staging)).await.unwrap();
        f.svc
            .node_publish_volume(publish_req(&id, &staging, &target))
            .await
            .unwrap();

        // a fresh process sharing the same host mounts
        let restarted = service_for(&f.mounter, Arc::new(StaticSecretStore::new()), &f.staging_root);
        assert!(restarted.staged_volumes().is_empty());
        assert_eq!(restarted.recover().await.unwrap(), 1);

        let staged = restarted.staged_volumes();
        assert_eq!(staged[0].staging_path, path_key(&staging));
        assert_eq!(staged[0].reference_count(), 1);
        assert!(staged[0].volume_id.is_none());

        let err = restarted
            .node_unstage_volume(unstage_req(&id, &staging))
            .await
            .unwrap_err();
        assert_eq!(err.status_kind(), StatusKind::VolumeInUse);
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let f = fixture();
        let staging = f.staging_root.join("H");

        let err = f
            .svc
            .node_stage_volume(stage_req("", &staging))
            .await
            .unwrap_err();
        assert_eq!(err.status_kind(), StatusKind::InvalidArgument);

        let err = f
            .svc
            .node_stage_volume(stage_req("not-a-handle", &staging))
            .await
            .unwrap_err();
        assert_eq!(err.status_kind(), StatusKind::InvalidArgument);

        let mut block = stage_req(&volume_id("vol-a", Protocol::Smb), &staging);
        block.volume_capability = VolumeCapability {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: AccessType::Block,
        };
        let err = f.svc.node_stage_volume(block).await.unwrap_err();
        assert_eq!(err.status_kind(), StatusKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_node_info() {
        let f = fixture();
        let info = f.svc.node_get_info().await.unwrap();
        assert_eq!(info.node_id, "node-1");
        assert_eq!(info.max_volumes_per_node, 0);
        assert_eq!(
            f.svc.node_get_capabilities().await.unwrap(),
            vec![
                NodeCapability::StageUnstageVolume,
                NodeCapability::SingleNodeMultiWriter
            ]
        );
    }
}
