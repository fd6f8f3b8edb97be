use async_trait::async_trait;
use sharecsi_core::types::{PluginCapability, PluginInfo, ProbeResponse};
use sharecsi_core::{CsiIdentity, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Plugin identity and readiness
pub struct IdentityService {
    driver_name: String,
    vendor_version: String,
    controller: bool,
    ready: AtomicBool,
}

impl IdentityService {
    /// Identity for a plugin that starts out not ready
    pub fn new(driver_name: impl Into<String>, controller: bool) -> Self {
        Self {
            driver_name: driver_name.into(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            controller,
            ready: AtomicBool::new(false),
        }
    }

    /// Report readiness from `Probe`
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

#[async_trait]
impl CsiIdentity for IdentityService {
    async fn get_plugin_info(&self) -> Result<PluginInfo> {
        Ok(PluginInfo {
            name: self.driver_name.clone(),
            vendor_version: self.vendor_version.clone(),
        })
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>> {
        let mut caps = Vec::new();
        if self.controller {
            caps.push(PluginCapability::ControllerService);
        }
        caps.push(PluginCapability::VolumeExpansionOnline);
        Ok(caps)
    }

    async fn probe(&self) -> Result<ProbeResponse> {
        Ok(ProbeResponse {
            ready: self.ready.load(Ordering::SeqCst),
        })
    }
}
