use serde::{Deserialize, Serialize};
use sharecsi_cloud::RetryPolicy;
use sharecsi_controller::ControllerConfig;
use sharecsi_core::DEFAULT_DRIVER_NAME;
use sharecsi_node::NodeConfig;
use std::path::Path;
use std::time::Duration;

/// Driver configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub driver_name: String,
    /// Address the HTTP surface listens on
    pub listen: String,
    pub request_timeout_secs: u64,
    pub controller: ControllerConfig,
    pub node: NodeConfig,
    pub retry: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            listen: "0.0.0.0:10000".to_string(),
            request_timeout_secs: 120,
            controller: ControllerConfig::default(),
            node: NodeConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DriverConfig {
    /// Load from a YAML file; missing keys take their defaults
    pub fn load(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| miette::miette!("Failed to read config '{}': {}", path.display(), e))?;
        Self::from_yaml(&content)
            .map_err(|e| miette::miette!("Invalid config '{}': {}", path.display(), e))
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
