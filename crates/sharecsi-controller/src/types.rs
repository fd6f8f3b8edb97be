use serde::{Deserialize, Serialize};
use sharecsi_cloud::{AccountKind, AccountSpec, SkuName};
use sharecsi_core::{CsiError, Protocol, Result, VolumeParameters, DEFAULT_DRIVER_NAME};
use std::collections::BTreeMap;
use std::time::Duration;

/// Tag put on every account the driver creates
pub const CREATED_BY_TAG: &str = "k8s-azure-created-by";

/// Share metadata keys written at creation
pub const VOLUME_UUID_KEY: &str = "volume-uuid";
pub const VOLUME_NAME_KEY: &str = "volume-name";
pub const SNAPSHOT_NAME_KEY: &str = "snapshot-name";
pub const SOURCE_VOLUME_KEY: &str = "source-volume-id";

/// Configuration for the controller service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub driver_name: String,
    /// Resource group used when neither parameters nor handle name one
    pub resource_group: String,
    /// Region for auto-created accounts
    pub location: String,
    pub account_name_prefix: String,
    pub default_sku: SkuName,
    pub max_shares_per_account: u32,
    pub max_account_capacity_gib: u64,
    pub allow_account_creation: bool,
    /// Name collisions tolerated before account creation gives up
    pub account_create_attempts: u32,
    pub lock_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            resource_group: "sharecsi".to_string(),
            location: "eastus".to_string(),
            account_name_prefix: "f".to_string(),
            default_sku: SkuName::StandardLrs,
            max_shares_per_account: 100,
            max_account_capacity_gib: 102_400,
            allow_account_creation: true,
            account_create_attempts: 5,
            lock_timeout_secs: 60,
        }
    }
}

impl ControllerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Resolve a possibly empty resource group against the default
    pub fn resource_group_or_default<'a>(&'a self, resource_group: &'a str) -> &'a str {
        if resource_group.is_empty() {
            &self.resource_group
        } else {
            resource_group
        }
    }
}

/// Constraints a backing account must satisfy for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRequirements {
    pub resource_group: String,
    pub location: Option<String>,
    pub sku: Option<SkuName>,
    pub kind: Option<AccountKind>,
    pub protocol: Protocol,
    pub tags: BTreeMap<String, String>,
    pub match_tags: bool,
    pub requested_gib: u64,
}

impl AccountRequirements {
    pub fn from_params(
        params: &VolumeParameters,
        config: &ControllerConfig,
        requested_gib: u64,
    ) -> Result<Self> {
        let sku = params
            .sku_name
            .as_deref()
            .map(str::parse::<SkuName>)
            .transpose()
            .map_err(CsiError::invalid_argument)?;
        let kind = params
            .account_kind
            .as_deref()
            .map(str::parse::<AccountKind>)
            .transpose()
            .map_err(CsiError::invalid_argument)?;

        if params.protocol == Protocol::Nfs {
            if let Some(sku) = sku {
                if !sku.is_premium() {
                    return Err(CsiError::invalid_argument(format!(
                        "protocol nfs requires a premium SKU, got {}",
                        sku
                    )));
                }
            }
        }

        Ok(Self {
            resource_group: params
                .resource_group
                .clone()
                .unwrap_or_else(|| config.resource_group.clone()),
            location: params.location.clone(),
            sku,
            kind,
            protocol: params.protocol,
            tags: params.tags.clone(),
            match_tags: params.match_tags,
            requested_gib,
        })
    }

    /// SKU a newly created account gets
    pub fn effective_sku(&self, config: &ControllerConfig) -> SkuName {
        match (self.sku, self.protocol) {
            (Some(sku), _) => sku,
            (None, Protocol::Nfs) => SkuName::PremiumLrs,
            (None, Protocol::Smb) => config.default_sku,
        }
    }

    /// Identifies requests that would be satisfied by the same new account
    pub fn fingerprint(&self) -> String {
        let tags: Vec<String> = self
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.resource_group,
            self.location.as_deref().unwrap_or("-"),
            self.sku.map(|s| s.as_str()).unwrap_or("-"),
            self.kind.map(|k| k.as_str()).unwrap_or("-"),
            self.protocol,
            tags.join(",")
        )
    }

    pub fn account_spec(&self, name: String, config: &ControllerConfig) -> AccountSpec {
        let sku = self.effective_sku(config);
        let mut tags = self.tags.clone();
        tags.insert(CREATED_BY_TAG.to_string(), config.driver_name.clone());
        AccountSpec {
            name,
            resource_group: self.resource_group.clone(),
            location: self
                .location
                .clone()
                .unwrap_or_else(|| config.location.clone()),
            sku,
            kind: self.kind.unwrap_or_else(|| sku.default_kind()),
            tags,
            nfs_enabled: self.protocol == Protocol::Nfs,
        }
    }
}

/// Result of filtering an account
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub account_name: String,
    pub passed: bool,
    pub reason: Option<String>,
}

impl FilterResult {
    pub fn pass(account_name: String) -> Self {
        Self {
            account_name,
            passed: true,
            reason: None,
        }
    }

    pub fn fail(account_name: String, reason: String) -> Self {
        Self {
            account_name,
            passed: false,
            reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn params(pairs: &[(&str, &str)]) -> VolumeParameters {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        VolumeParameters::parse(&map).unwrap()
    }

    #[test]
    fn test_requirements_from_params() {
        let config = ControllerConfig::default();
        let req = AccountRequirements::from_params(
            &params(&[("skuName", "premium_lrs"), ("protocol", "nfs")]),
            &config,
            100,
        )
        .unwrap();
        assert_eq!(req.sku, Some(SkuName::PremiumLrs));
        assert_eq!(req.resource_group, "sharecsi");

        let spec = req.account_spec("fabc".to_string(), &config);
        assert_eq!(spec.kind, AccountKind::FileStorage);
        assert!(spec.nfs_enabled);
        assert_eq!(
            spec.tags.get(CREATED_BY_TAG).map(String::as_str),
            Some(DEFAULT_DRIVER_NAME)
        );
    }

    #[test]
    fn test_nfs_rejects_standard_sku() {
        let err = AccountRequirements::from_params(
            &params(&[("skuName", "Standard_LRS"), ("protocol", "nfs")]),
            &ControllerConfig::default(),
            100,
        )
        .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument { .. }));
    }

    #[test]
    fn test_fingerprint_distinguishes_constraints() {
        let config = ControllerConfig::default();
        let a = AccountRequirements::from_params(&params(&[]), &config, 1).unwrap();
        let b = AccountRequirements::from_params(&params(&[("location", "westus")]), &config, 1)
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        // requested size is not part of the fingerprint
        let c = AccountRequirements::from_params(&params(&[]), &config, 50).unwrap();
        assert_eq!(a.fingerprint(), c.fingerprint());
    }
}
