use crate::error::Result;
use sharecsi_core::{CsiController, CsiError, CsiIdentity, CsiNode, StatusKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn CsiIdentity>,
    /// Absent when the plugin runs in node-only mode
    pub controller: Option<Arc<dyn CsiController>>,
    /// Absent when the plugin runs in controller-only mode
    pub node: Option<Arc<dyn CsiNode>>,
    /// Deadline applied to every verb
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(identity: Arc<dyn CsiIdentity>, request_timeout: Duration) -> Self {
        Self {
            identity,
            controller: None,
            node: None,
            request_timeout,
        }
    }

    pub fn with_controller(mut self, controller: Arc<dyn CsiController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_node(mut self, node: Arc<dyn CsiNode>) -> Self {
        self.node = Some(node);
        self
    }

    pub fn controller(&self) -> Result<&Arc<dyn CsiController>> {
        self.controller
            .as_ref()
            .ok_or_else(|| CsiError::internal("controller service is not enabled").into())
    }

    pub fn node(&self) -> Result<&Arc<dyn CsiNode>> {
        self.node
            .as_ref()
            .ok_or_else(|| CsiError::internal("node service is not enabled").into())
    }

    /// Run a verb under the request deadline.
    ///
    /// On expiry the verb's future is dropped; work it already handed to the
    /// provider or the kernel may still complete.
    pub async fn run<T, F>(&self, verb: &str, fut: F) -> Result<T>
    where
        F: Future<Output = sharecsi_core::Result<T>>,
    {
        let result = match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CsiError::deadline_exceeded(
                verb,
                format!("no result within {:?}", self.request_timeout),
            )),
        };

        match result {
            Ok(value) => {
                debug!(verb, "Request completed");
                Ok(value)
            }
            Err(err) => {
                let kind = err.status_kind();
                if kind == StatusKind::Internal || kind == StatusKind::DeadlineExceeded {
                    warn!(verb, %kind, "Request failed: {}", err);
                } else {
                    debug!(verb, %kind, "Request failed: {}", err);
                }
                Err(err.into())
            }
        }
    }
}
