use crate::filter::{constraint_filters, headroom_filters, AccountFilter};
use crate::types::{AccountRequirements, ControllerConfig};
use sharecsi_cloud::StorageAccount;
use sharecsi_core::{CsiError, Result};
use tracing::debug;
use uuid::Uuid;

/// Longest storage account name the provider accepts
pub const MAX_ACCOUNT_NAME_LEN: usize = 24;

/// Picks a backing account for a new share.
///
/// The choice depends only on the account snapshot passed in: candidates that
/// pass every filter are ranked by fewest shares, then by name.
pub struct AccountSelector {
    constraints: Vec<Box<dyn AccountFilter>>,
    headroom: Vec<Box<dyn AccountFilter>>,
}

impl AccountSelector {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            constraints: constraint_filters(),
            headroom: headroom_filters(
                config.max_shares_per_account,
                config.max_account_capacity_gib,
            ),
        }
    }

    fn first_failure<'f>(
        filters: &'f [Box<dyn AccountFilter>],
        req: &AccountRequirements,
        account: &StorageAccount,
    ) -> Option<(&'f str, String)> {
        filters.iter().find_map(|filter| {
            let result = filter.filter(req, account);
            if result.passed {
                None
            } else {
                Some((filter.name(), result.reason.unwrap_or_default()))
            }
        })
    }

    /// Check an explicitly named account against the volume's constraints
    pub fn validate_explicit(
        &self,
        req: &AccountRequirements,
        account: &StorageAccount,
    ) -> Result<()> {
        match Self::first_failure(&self.constraints, req, account) {
            Some((_, reason)) => Err(CsiError::constraint_violation(&account.name, reason)),
            None => Ok(()),
        }
    }

    /// Accounts whose properties satisfy the constraints, ignoring how full they are
    pub fn matching<'a>(
        &self,
        req: &AccountRequirements,
        accounts: &'a [StorageAccount],
    ) -> Vec<&'a StorageAccount> {
        accounts
            .iter()
            .filter(|account| Self::first_failure(&self.constraints, req, account).is_none())
            .collect()
    }

    /// Choose the best account with room for the share, if any
    pub fn select<'a>(
        &self,
        req: &AccountRequirements,
        accounts: &'a [StorageAccount],
    ) -> Option<&'a StorageAccount> {
        let mut feasible = Vec::new();

        for account in accounts {
            let failure = Self::first_failure(&self.constraints, req, account)
                .or_else(|| Self::first_failure(&self.headroom, req, account));
            match failure {
                Some((filter, reason)) => {
                    debug!(
                        "Account {} filtered out by {}: {}",
                        account.name, filter, reason
                    );
                }
                None => feasible.push(account),
            }
        }

        let selected = feasible
            .into_iter()
            .min_by(|a, b| a.share_count.cmp(&b.share_count).then_with(|| a.name.cmp(&b.name)));

        if let Some(account) = selected {
            debug!(
                "Selected account {} with {} shares",
                account.name, account.share_count
            );
        }
        selected
    }
}

/// Generate a candidate account name: lowercase alphanumerics, at most 24 chars
pub fn generate_account_name(prefix: &str) -> String {
    let mut name: String = prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_ACCOUNT_NAME_LEN / 2)
        .collect();
    name.push_str(&Uuid::new_v4().simple().to_string());
    name.truncate(MAX_ACCOUNT_NAME_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharecsi_cloud::{AccountKind, SkuName};
    use sharecsi_core::Protocol;
    use std::collections::BTreeMap;

    fn account(name: &str, share_count: u32) -> StorageAccount {
        StorageAccount {
            name: name.to_string(),
            resource_group: "rg".to_string(),
            location: "eastus".to_string(),
            sku: SkuName::StandardLrs,
            kind: AccountKind::StorageV2,
            tags: BTreeMap::new(),
            nfs_enabled: false,
            share_count,
            provisioned_gib: share_count as u64 * 100,
        }
    }

    fn requirements() -> AccountRequirements {
        AccountRequirements {
            resource_group: "rg".to_string(),
            location: None,
            sku: Some(SkuName::StandardLrs),
            kind: None,
            protocol: Protocol::Smb,
            tags: BTreeMap::new(),
            match_tags: false,
            requested_gib: 100,
        }
    }

    #[test]
    fn test_prefers_fewest_shares() {
        let selector = AccountSelector::new(&ControllerConfig::default());
        let accounts = vec![account("busy", 50), account("quiet", 2)];

        let selected = selector.select(&requirements(), &accounts).unwrap();
        assert_eq!(selected.name, "quiet");
    }

    #[test]
    fn test_tie_breaks_on_name() {
        let selector = AccountSelector::new(&ControllerConfig::default());
        let accounts = vec![account("zeta", 3), account("alpha", 3), account("mid", 3)];

        for _ in 0..5 {
            assert_eq!(
                selector.select(&requirements(), &accounts).unwrap().name,
                "alpha"
            );
        }
    }

    #[test]
    fn test_full_accounts_are_skipped() {
        let config = ControllerConfig {
            max_shares_per_account: 10,
            ..Default::default()
        };
        let selector = AccountSelector::new(&config);
        let accounts = vec![account("full", 10)];

        assert!(selector.select(&requirements(), &accounts).is_none());
        // still a constraint match, e.g. for idempotency lookups
        assert_eq!(selector.matching(&requirements(), &accounts).len(), 1);
    }

    #[test]
    fn test_validate_explicit_account() {
        let selector = AccountSelector::new(&ControllerConfig::default());
        let mut req = requirements();
        assert!(selector.validate_explicit(&req, &account("a", 0)).is_ok());

        req.protocol = Protocol::Nfs;
        req.sku = None;
        let err = selector.validate_explicit(&req, &account("a", 0)).unwrap_err();
        assert!(matches!(err, CsiError::ConstraintViolation { .. }));
    }

    #[test]
    fn test_generated_names_are_valid() {
        let name = generate_account_name("Share-CSI");
        assert!(name.starts_with("sharecsi"));
        assert_eq!(name.len(), MAX_ACCOUNT_NAME_LEN);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(generate_account_name("f"), generate_account_name("f"));
    }
}
