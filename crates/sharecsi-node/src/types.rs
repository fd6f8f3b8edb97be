use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the node service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    /// Directory under which the orchestrator places staging paths
    pub staging_root: PathBuf,
    /// DNS suffix of the storage endpoints, e.g. `core.windows.net`
    pub endpoint_suffix: String,
    /// Namespace searched for per-account secrets
    pub default_secret_namespace: String,
    pub lock_timeout_secs: u64,
    /// Orchestrator API base URL for secret lookups
    pub api_url: Option<String>,
    /// Zero means unlimited
    pub max_volumes_per_node: i64,
    pub topology: HashMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            staging_root: PathBuf::from("/var/lib/kubelet/plugins/kubernetes.io/csi"),
            endpoint_suffix: "core.windows.net".to_string(),
            default_secret_namespace: "default".to_string(),
            lock_timeout_secs: 60,
            api_url: None,
            max_volumes_per_node: 0,
            topology: HashMap::new(),
        }
    }
}

impl NodeConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// What the node knows about a staged volume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedVolume {
    /// Unknown for volumes found by restart recovery until a verb names them
    pub volume_id: Option<String>,
    pub staging_path: String,
    pub source: String,
    /// Targets currently bind-mounted from the staging path
    pub publishes: Vec<String>,
}

impl StagedVolume {
    pub fn reference_count(&self) -> usize {
        self.publishes.len()
    }
}
