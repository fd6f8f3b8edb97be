//! HTTP handlers for the CSI verbs
//!
//! Every verb is a `POST` with a JSON request body and answers with the JSON
//! response, or with a [`sharecsi_core::Status`] body on failure. Verbs without
//! a response payload answer with the `Ok` status.

use crate::error::Result;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use sharecsi_core::types::*;
use sharecsi_core::Status;
use std::sync::Arc;
use tracing::info;

type Body<T> = std::result::Result<Json<T>, JsonRejection>;

fn ok<T: Serialize>(body: T) -> Response {
    Json(body).into_response()
}

fn done() -> Response {
    Json(Status::ok()).into_response()
}

// --- Identity ---

/// POST /csi/v1/identity/plugin-info
pub async fn get_plugin_info(State(state): State<Arc<AppState>>) -> Result<Response> {
    let info = state
        .run("GetPluginInfo", state.identity.get_plugin_info())
        .await?;
    Ok(ok(info))
}

/// POST /csi/v1/identity/capabilities
pub async fn get_plugin_capabilities(State(state): State<Arc<AppState>>) -> Result<Response> {
    let caps = state
        .run(
            "GetPluginCapabilities",
            state.identity.get_plugin_capabilities(),
        )
        .await?;
    Ok(ok(caps))
}

/// POST /csi/v1/identity/probe
pub async fn probe(State(state): State<Arc<AppState>>) -> Result<Response> {
    let probe = state.run("Probe", state.identity.probe()).await?;
    Ok(ok(probe))
}

// --- Controller ---

/// POST /csi/v1/controller/create-volume
pub async fn create_volume(
    State(state): State<Arc<AppState>>,
    body: Body<CreateVolumeRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(name = %req.name, "CreateVolume");
    let controller = state.controller()?;
    let resp = state
        .run("CreateVolume", controller.create_volume(req))
        .await?;
    Ok(ok(resp))
}

/// POST /csi/v1/controller/delete-volume
pub async fn delete_volume(
    State(state): State<Arc<AppState>>,
    body: Body<DeleteVolumeRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(volume_id = %req.volume_id, "DeleteVolume");
    let controller = state.controller()?;
    state
        .run("DeleteVolume", controller.delete_volume(req))
        .await?;
    Ok(done())
}

/// POST /csi/v1/controller/expand-volume
pub async fn expand_volume(
    State(state): State<Arc<AppState>>,
    body: Body<ControllerExpandVolumeRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(volume_id = %req.volume_id, "ControllerExpandVolume");
    let controller = state.controller()?;
    let resp = state
        .run(
            "ControllerExpandVolume",
            controller.controller_expand_volume(req),
        )
        .await?;
    Ok(ok(resp))
}

/// POST /csi/v1/controller/validate-volume-capabilities
pub async fn validate_volume_capabilities(
    State(state): State<Arc<AppState>>,
    body: Body<ValidateVolumeCapabilitiesRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    let controller = state.controller()?;
    let resp = state
        .run(
            "ValidateVolumeCapabilities",
            controller.validate_volume_capabilities(req),
        )
        .await?;
    Ok(ok(resp))
}

/// POST /csi/v1/controller/create-snapshot
pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    body: Body<CreateSnapshotRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(name = %req.name, source = %req.source_volume_id, "CreateSnapshot");
    let controller = state.controller()?;
    let resp = state
        .run("CreateSnapshot", controller.create_snapshot(req))
        .await?;
    Ok(ok(resp))
}

/// POST /csi/v1/controller/delete-snapshot
pub async fn delete_snapshot(
    State(state): State<Arc<AppState>>,
    body: Body<DeleteSnapshotRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(snapshot_id = %req.snapshot_id, "DeleteSnapshot");
    let controller = state.controller()?;
    state
        .run("DeleteSnapshot", controller.delete_snapshot(req))
        .await?;
    Ok(done())
}

/// POST /csi/v1/controller/list-volumes
pub async fn list_volumes(
    State(state): State<Arc<AppState>>,
    body: Body<ListVolumesRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    let controller = state.controller()?;
    let resp = state
        .run("ListVolumes", controller.list_volumes(req))
        .await?;
    Ok(ok(resp))
}

/// POST /csi/v1/controller/get-capacity
pub async fn get_capacity(
    State(state): State<Arc<AppState>>,
    body: Body<GetCapacityRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    let controller = state.controller()?;
    let resp = state
        .run("GetCapacity", controller.get_capacity(req))
        .await?;
    Ok(ok(resp))
}

/// POST /csi/v1/controller/capabilities
pub async fn controller_get_capabilities(State(state): State<Arc<AppState>>) -> Result<Response> {
    let controller = state.controller()?;
    let caps = state
        .run(
            "ControllerGetCapabilities",
            controller.controller_get_capabilities(),
        )
        .await?;
    Ok(ok(caps))
}

// --- Node ---

/// POST /csi/v1/node/stage-volume
pub async fn node_stage_volume(
    State(state): State<Arc<AppState>>,
    body: Body<NodeStageVolumeRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(
        volume_id = %req.volume_id,
        staging_path = %req.staging_target_path,
        "NodeStageVolume"
    );
    let node = state.node()?;
    state
        .run("NodeStageVolume", node.node_stage_volume(req))
        .await?;
    Ok(done())
}

/// POST /csi/v1/node/unstage-volume
pub async fn node_unstage_volume(
    State(state): State<Arc<AppState>>,
    body: Body<NodeUnstageVolumeRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(
        volume_id = %req.volume_id,
        staging_path = %req.staging_target_path,
        "NodeUnstageVolume"
    );
    let node = state.node()?;
    state
        .run("NodeUnstageVolume", node.node_unstage_volume(req))
        .await?;
    Ok(done())
}

/// POST /csi/v1/node/publish-volume
pub async fn node_publish_volume(
    State(state): State<Arc<AppState>>,
    body: Body<NodePublishVolumeRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(
        volume_id = %req.volume_id,
        target_path = %req.target_path,
        "NodePublishVolume"
    );
    let node = state.node()?;
    state
        .run("NodePublishVolume", node.node_publish_volume(req))
        .await?;
    Ok(done())
}

/// POST /csi/v1/node/unpublish-volume
pub async fn node_unpublish_volume(
    State(state): State<Arc<AppState>>,
    body: Body<NodeUnpublishVolumeRequest>,
) -> Result<Response> {
    let Json(req) = body?;
    info!(
        volume_id = %req.volume_id,
        target_path = %req.target_path,
        "NodeUnpublishVolume"
    );
    let node = state.node()?;
    state
        .run("NodeUnpublishVolume", node.node_unpublish_volume(req))
        .await?;
    Ok(done())
}

/// POST /csi/v1/node/capabilities
pub async fn node_get_capabilities(State(state): State<Arc<AppState>>) -> Result<Response> {
    let node = state.node()?;
    let caps = state
        .run("NodeGetCapabilities", node.node_get_capabilities())
        .await?;
    Ok(ok(caps))
}

/// POST /csi/v1/node/info
pub async fn node_get_info(State(state): State<Arc<AppState>>) -> Result<Response> {
    let node = state.node()?;
    let info = state.run("NodeGetInfo", node.node_get_info()).await?;
    Ok(ok(info))
}
