use crate::error::Result;
use crate::types::*;
use async_trait::async_trait;

/// Identity service: plugin name, version and capabilities
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    async fn get_plugin_info(&self) -> Result<PluginInfo>;

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>>;

    /// Report whether the plugin is ready to serve requests
    async fn probe(&self) -> Result<ProbeResponse>;
}

/// Controller service: provisioning against the storage provider
#[async_trait]
pub trait CsiController: Send + Sync {
    // --- Volume lifecycle ---

    /// Provision a share, or return the existing one for the same name
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<CreateVolumeResponse>;

    /// Delete the share behind a handle; an absent share is success
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<()>;

    /// Grow a share's quota; shrinking is rejected
    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse>;

    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse>;

    // --- Snapshots ---

    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<CreateSnapshotResponse>;

    async fn delete_snapshot(&self, req: DeleteSnapshotRequest) -> Result<()>;

    // --- Read-only queries ---

    async fn list_volumes(&self, req: ListVolumesRequest) -> Result<ListVolumesResponse>;

    async fn get_capacity(&self, req: GetCapacityRequest) -> Result<GetCapacityResponse>;

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>>;
}

/// Node service: two-phase mount on the local host
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Mount the share at the staging path
    async fn node_stage_volume(&self, req: NodeStageVolumeRequest) -> Result<()>;

    /// Unmount the staging path once nothing is published from it
    async fn node_unstage_volume(&self, req: NodeUnstageVolumeRequest) -> Result<()>;

    /// Bind-mount the staging path into a workload's target path
    async fn node_publish_volume(&self, req: NodePublishVolumeRequest) -> Result<()>;

    async fn node_unpublish_volume(&self, req: NodeUnpublishVolumeRequest) -> Result<()>;

    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>>;

    async fn node_get_info(&self) -> Result<NodeInfo>;
}
