use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sharecsi_core::Protocol;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Storage account replication/performance SKU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkuName {
    #[serde(rename = "Standard_LRS")]
    StandardLrs,
    #[serde(rename = "Standard_GRS")]
    StandardGrs,
    #[serde(rename = "Standard_RAGRS")]
    StandardRagrs,
    #[serde(rename = "Standard_ZRS")]
    StandardZrs,
    #[serde(rename = "Standard_GZRS")]
    StandardGzrs,
    #[serde(rename = "Standard_RAGZRS")]
    StandardRagzrs,
    #[serde(rename = "Premium_LRS")]
    PremiumLrs,
    #[serde(rename = "Premium_ZRS")]
    PremiumZrs,
}

impl SkuName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkuName::StandardLrs => "Standard_LRS",
            SkuName::StandardGrs => "Standard_GRS",
            SkuName::StandardRagrs => "Standard_RAGRS",
            SkuName::StandardZrs => "Standard_ZRS",
            SkuName::StandardGzrs => "Standard_GZRS",
            SkuName::StandardRagzrs => "Standard_RAGZRS",
            SkuName::PremiumLrs => "Premium_LRS",
            SkuName::PremiumZrs => "Premium_ZRS",
        }
    }

    pub fn is_premium(&self) -> bool {
        matches!(self, SkuName::PremiumLrs | SkuName::PremiumZrs)
    }

    /// Account kind a new account with this SKU is created as
    pub fn default_kind(&self) -> AccountKind {
        if self.is_premium() {
            AccountKind::FileStorage
        } else {
            AccountKind::StorageV2
        }
    }
}

impl fmt::Display for SkuName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkuName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            SkuName::StandardLrs,
            SkuName::StandardGrs,
            SkuName::StandardRagrs,
            SkuName::StandardZrs,
            SkuName::StandardGzrs,
            SkuName::StandardRagzrs,
            SkuName::PremiumLrs,
            SkuName::PremiumZrs,
        ];
        all.into_iter()
            .find(|sku| sku.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown storage SKU '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    StorageV2,
    FileStorage,
    Storage,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::StorageV2 => "StorageV2",
            AccountKind::FileStorage => "FileStorage",
            AccountKind::Storage => "Storage",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "storagev2" => Ok(AccountKind::StorageV2),
            "filestorage" => Ok(AccountKind::FileStorage),
            "storage" => Ok(AccountKind::Storage),
            _ => Err(format!("unknown storage account kind '{}'", s)),
        }
    }
}

/// Storage account as currently seen by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccount {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub sku: SkuName,
    pub kind: AccountKind,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// NFS 4.1 shares can be created in this account
    #[serde(default)]
    pub nfs_enabled: bool,
    /// Live number of shares in the account
    #[serde(default)]
    pub share_count: u32,
    /// Sum of share quotas in GiB
    #[serde(default)]
    pub provisioned_gib: u64,
}

/// Parameters for a new storage account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub sku: SkuName,
    pub kind: AccountKind,
    pub tags: BTreeMap<String, String>,
    pub nfs_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShare {
    pub account: String,
    pub name: String,
    pub quota_gib: u64,
    pub protocol: Protocol,
    #[serde(default)]
    pub root_squash: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Parameters for a new share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSpec {
    pub name: String,
    pub quota_gib: u64,
    pub protocol: Protocol,
    pub root_squash: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareSnapshot {
    pub account: String,
    pub share: String,
    /// Provider-assigned snapshot identifier (a timestamp)
    pub snapshot: String,
    pub created_at: DateTime<Utc>,
    pub size_gib: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One page of a share listing
#[derive(Debug, Clone, Default)]
pub struct SharePage {
    pub shares: Vec<FileShare>,
    /// Pass back to continue; `None` when the listing is complete
    pub next_marker: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sku_parse() {
        assert_eq!("standard_lrs".parse::<SkuName>().unwrap(), SkuName::StandardLrs);
        assert_eq!("Premium_ZRS".parse::<SkuName>().unwrap(), SkuName::PremiumZrs);
        assert!("Gold_LRS".parse::<SkuName>().is_err());
        assert_eq!(SkuName::PremiumLrs.default_kind(), AccountKind::FileStorage);
    }
}
