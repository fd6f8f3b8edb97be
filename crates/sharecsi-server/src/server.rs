use crate::handlers::*;
use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Server configuration
#[derive(Clone)]
pub struct Config {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 10000)),
        }
    }
}

/// HTTP surface of the plugin
pub struct CsiServer {
    config: Config,
    state: Arc<AppState>,
}

impl CsiServer {
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Build the router; controller and node verbs are mounted only when
    /// the corresponding service is present
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            // Health checks
            .route("/healthz", get(healthz))
            .route("/livez", get(livez))
            .route("/readyz", get(readyz))
            // Identity
            .route("/csi/v1/identity/plugin-info", post(get_plugin_info))
            .route(
                "/csi/v1/identity/capabilities",
                post(get_plugin_capabilities),
            )
            .route("/csi/v1/identity/probe", post(probe));

        if self.state.controller.is_some() {
            router = router
                .route("/csi/v1/controller/create-volume", post(create_volume))
                .route("/csi/v1/controller/delete-volume", post(delete_volume))
                .route("/csi/v1/controller/expand-volume", post(expand_volume))
                .route(
                    "/csi/v1/controller/validate-volume-capabilities",
                    post(validate_volume_capabilities),
                )
                .route("/csi/v1/controller/create-snapshot", post(create_snapshot))
                .route("/csi/v1/controller/delete-snapshot", post(delete_snapshot))
                .route("/csi/v1/controller/list-volumes", post(list_volumes))
                .route("/csi/v1/controller/get-capacity", post(get_capacity))
                .route(
                    "/csi/v1/controller/capabilities",
                    post(controller_get_capabilities),
                );
        }

        if self.state.node.is_some() {
            router = router
                .route("/csi/v1/node/stage-volume", post(node_stage_volume))
                .route("/csi/v1/node/unstage-volume", post(node_unstage_volume))
                .route("/csi/v1/node/publish-volume", post(node_publish_volume))
                .route(
                    "/csi/v1/node/unpublish-volume",
                    post(node_unpublish_volume),
                )
                .route("/csi/v1/node/capabilities", post(node_get_capabilities))
                .route("/csi/v1/node/info", post(node_get_info));
        }

        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();

        info!("Starting CSI server on {}", self.config.listen_addr);

        let listener = TcpListener::bind(self.config.listen_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

/// Health check endpoint
async fn healthz() -> &'static str {
    "ok"
}

/// Liveness probe
async fn livez() -> &'static str {
    "ok"
}

/// Readiness probe
async fn readyz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentityService;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use sharecsi_cloud::{InMemoryProvider, Retrier, RetryPolicy};
    use sharecsi_controller::{ControllerConfig, ControllerContext, ControllerService};
    use sharecsi_core::types::{PluginCapability, PluginInfo, ProbeResponse};
    use sharecsi_core::{CsiIdentity, VolumeHandle};
    use sharecsi_node::{MockMounter, NodeConfig, NodeService, StaticSecretStore};
    use std::time::Duration;
    use tower::ServiceExt;

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

    fn controller_state(provider: &InMemoryProvider) -> AppState {
        let controller = ControllerService::new(
            Arc::new(provider.clone()),
            ControllerContext::new(ControllerConfig::default(), retrier()),
        );
        AppState::new(
            Arc::new(IdentityService::new("file.csi.azure.com", true)),
            Duration::from_secs(30),
        )
        .with_controller(Arc::new(controller))
    }

    fn router(state: AppState) -> Router {
        CsiServer::new(Config::default(), Arc::new(state)).build_router()
    }

    async fn call(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:10000");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let router = router(controller_state(&InMemoryProvider::new()));
        for path in ["/healthz", "/livez", "/readyz"] {
            let response = router
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_create_and_delete_volume() {
        let provider = InMemoryProvider::new();
        let router = router(controller_state(&provider));

        let (status, body) = call(
            &router,
            "/csi/v1/controller/create-volume",
            json!({
                "name": "pvc-1",
                "capacity_range": { "required_bytes": 10737418240i64 },
                "volume_capabilities": [
                    { "access_mode": "MultiNodeMultiWriter" }
                ],
                "parameters": { "skuName": "Standard_LRS" }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let volume_id = body["volume"]["volume_id"].as_str().unwrap().to_string();
        assert_eq!(VolumeHandle::decode(&volume_id).unwrap().share, "pvc-1");
        assert_eq!(body["volume"]["capacity_bytes"], 10737418240i64);

        let (status, body) = call(
            &router,
            "/csi/v1/controller/delete-volume",
            json!({ "volume_id": volume_id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "Ok");
    }

    #[tokio::test]
    async fn test_errors_carry_status_kind() {
        let router = router(controller_state(&InMemoryProvider::new()));

        let (status, body) = call(
            &router,
            "/csi/v1/controller/expand-volume",
            json!({ "volume_id": "rg#acct#missing", "capacity_range": { "required_bytes": 1 } }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "NotFound");

        let (status, body) = call(
            &router,
            "/csi/v1/controller/delete-volume",
            json!({ "volume": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidArgument");
    }

    #[tokio::test]
    async fn test_node_routes_absent_in_controller_mode() {
        let router = router(controller_state(&InMemoryProvider::new()));
        let response = router
            .oneshot(
                Request::post("/csi/v1/node/info")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_node_verbs() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = MockMounter::new(dir.path().join("backing"));
        let staging_root = dir.path().join("plugins");
        let node = NodeService::new(
            NodeConfig {
                node_id: "node-1".to_string(),
                staging_root: staging_root.clone(),
                ..Default::default()
            },
            Arc::new(mounter.clone()),
            Arc::new(mounter.clone()),
            Arc::new(StaticSecretStore::new()),
            retrier(),
        );
        let identity = Arc::new(IdentityService::new("file.csi.azure.com", false));
        let state = AppState::new(identity, Duration::from_secs(30)).with_node(Arc::new(node));
        let router = router(state);

        let (status, body) = call(&router, "/csi/v1/node/info", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "node-1");

        let volume_id = VolumeHandle::new("rg", "acct", "vol-a", sharecsi_core::Protocol::Nfs)
            .encode();
        let staging = staging_root.join("H").display().to_string();
        let target = dir.path().join("pods/p1/vol").display().to_string();
        let cap = json!({ "access_mode": "MultiNodeMultiWriter" });

        let (status, body) = call(
            &router,
            "/csi/v1/node/publish-volume",
            json!({
                "volume_id": volume_id,
                "staging_target_path": staging,
                "target_path": target,
                "volume_capability": cap,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["kind"], "FailedPrecondition");

        let (status, _) = call(
            &router,
            "/csi/v1/node/stage-volume",
            json!({
                "volume_id": volume_id,
                "staging_target_path": staging,
                "volume_capability": cap,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &router,
            "/csi/v1/node/publish-volume",
            json!({
                "volume_id": volume_id,
                "staging_target_path": staging,
                "target_path": target,
                "volume_capability": cap,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &router,
            "/csi/v1/node/unstage-volume",
            json!({ "volume_id": volume_id, "staging_target_path": staging }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "VolumeInUse");
    }

    struct StuckIdentity;

    #[async_trait]
    impl CsiIdentity for StuckIdentity {
        async fn get_plugin_info(&self) -> sharecsi_core::Result<PluginInfo> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(PluginInfo {
                name: "stuck".to_string(),
                vendor_version: "0".to_string(),
            })
        }

        async fn get_plugin_capabilities(&self) -> sharecsi_core::Result<Vec<PluginCapability>> {
            Ok(Vec::new())
        }

        async fn probe(&self) -> sharecsi_core::Result<ProbeResponse> {
            Ok(ProbeResponse { ready: true })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline() {
        let state = AppState::new(Arc::new(StuckIdentity), Duration::from_secs(5));
        let router = router(state);

        let (status, body) = call(&router, "/csi/v1/identity/plugin-info", json!({})).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["kind"], "DeadlineExceeded");

        let (status, body) = call(&router, "/csi/v1/identity/probe", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }
}
