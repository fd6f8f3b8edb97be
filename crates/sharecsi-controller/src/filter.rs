use crate::types::{AccountRequirements, FilterResult};
use sharecsi_cloud::StorageAccount;
use sharecsi_core::Protocol;

/// Account filter trait
pub trait AccountFilter: Send + Sync {
    /// Check an account against the volume's requirements
    fn filter(&self, req: &AccountRequirements, account: &StorageAccount) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// SKU must match when one is requested
pub struct SkuMatches;

impl AccountFilter for SkuMatches {
    fn filter(&self, req: &AccountRequirements, account: &StorageAccount) -> FilterResult {
        match req.sku {
            Some(sku) if sku != account.sku => FilterResult::fail(
                account.name.clone(),
                format!("SKU {} does not match requested {}", account.sku, sku),
            ),
            _ => FilterResult::pass(account.name.clone()),
        }
    }

    fn name(&self) -> &str {
        "SkuMatches"
    }
}

/// Account kind must match when one is requested
pub struct KindMatches;

impl AccountFilter for KindMatches {
    fn filter(&self, req: &AccountRequirements, account: &StorageAccount) -> FilterResult {
        match req.kind {
            Some(kind) if kind != account.kind => FilterResult::fail(
                account.name.clone(),
                format!("kind {} does not match requested {}", account.kind, kind),
            ),
            _ => FilterResult::pass(account.name.clone()),
        }
    }

    fn name(&self) -> &str {
        "KindMatches"
    }
}

/// Region must match when one is requested
pub struct LocationMatches;

impl AccountFilter for LocationMatches {
    fn filter(&self, req: &AccountRequirements, account: &StorageAccount) -> FilterResult {
        match &req.location {
            Some(location) if !location.eq_ignore_ascii_case(&account.location) => {
                FilterResult::fail(
                    account.name.clone(),
                    format!(
                        "region {} does not match requested {}",
                        account.location, location
                    ),
                )
            }
            _ => FilterResult::pass(account.name.clone()),
        }
    }

    fn name(&self) -> &str {
        "LocationMatches"
    }
}

/// NFS shares need a premium account with NFS enabled
pub struct ProtocolSupported;

impl AccountFilter for ProtocolSupported {
    fn filter(&self, req: &AccountRequirements, account: &StorageAccount) -> FilterResult {
        if req.protocol == Protocol::Nfs && !(account.nfs_enabled && account.sku.is_premium()) {
            return FilterResult::fail(
                account.name.clone(),
                "account does not support NFS shares".to_string(),
            );
        }
        FilterResult::pass(account.name.clone())
    }

    fn name(&self) -> &str {
        "ProtocolSupported"
    }
}

/// With matchTags set, every requested tag must be present with the same value
pub struct TagsMatch;

impl AccountFilter for TagsMatch {
    fn filter(&self, req: &AccountRequirements, account: &StorageAccount) -> FilterResult {
        if !req.match_tags {
            return FilterResult::pass(account.name.clone());
        }

        for (key, value) in &req.tags {
            if account.tags.get(key) != Some(value) {
                return FilterResult::fail(
                    account.name.clone(),
                    format!("tag {}={} not present", key, value),
                );
            }
        }
        FilterResult::pass(account.name.clone())
    }

    fn name(&self) -> &str {
        "TagsMatch"
    }
}

/// Drop accounts at their share-count limit
pub struct ShareHeadroom {
    pub max_shares: u32,
}

impl AccountFilter for ShareHeadroom {
    fn filter(&self, _req: &AccountRequirements, account: &StorageAccount) -> FilterResult {
        if account.share_count >= self.max_shares {
            return FilterResult::fail(
                account.name.clone(),
                format!(
                    "account holds {} shares, limit is {}",
                    account.share_count, self.max_shares
                ),
            );
        }
        FilterResult::pass(account.name.clone())
    }

    fn name(&self) -> &str {
        "ShareHeadroom"
    }
}

/// Drop accounts that cannot fit the requested quota
pub struct CapacityHeadroom {
    pub max_capacity_gib: u64,
}

impl AccountFilter for CapacityHeadroom {
    fn filter(&self, req: &AccountRequirements, account: &StorageAccount) -> FilterResult {
        let after = account.provisioned_gib.saturating_add(req.requested_gib);
        if after > self.max_capacity_gib {
            return FilterResult::fail(
                account.name.clone(),
                format!(
                    "{} GiB provisioned + {} GiB requested exceeds {} GiB",
                    account.provisioned_gib, req.requested_gib, self.max_capacity_gib
                ),
            );
        }
        FilterResult::pass(account.name.clone())
    }

    fn name(&self) -> &str {
        "CapacityHeadroom"
    }
}

/// Filters describing what an account is; also applied to explicitly named accounts
pub fn constraint_filters() -> Vec<Box<dyn AccountFilter>> {
    vec![
        Box::new(SkuMatches),
        Box::new(KindMatches),
        Box::new(LocationMatches),
        Box::new(ProtocolSupported),
        Box::new(TagsMatch),
    ]
}

/// Filters describing how full an account is
pub fn headroom_filters(max_shares: u32, max_capacity_gib: u64) -> Vec<Box<dyn AccountFilter>> {
    vec![
        Box::new(ShareHeadroom { max_shares }),
        Box::new(CapacityHeadroom { max_capacity_gib }),
    ]
}
