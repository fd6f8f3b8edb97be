use crate::error::Result;
use crate::types::{AccountSpec, FileShare, SharePage, ShareSnapshot, ShareSpec, StorageAccount};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Trait for the remote file-share service
///
/// Implementations perform a single remote call per method and report
/// failures as [`ProviderError`](crate::ProviderError) so callers can decide
/// what to retry. Creates are idempotent on name: a second create with the
/// same name reports `AlreadyExists` rather than producing a duplicate.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    // --- Accounts ---

    /// List accounts in a resource group with live share counts
    async fn list_accounts(&self, resource_group: &str) -> Result<Vec<StorageAccount>>;

    /// Create an account; fails with `AccountNameTaken` if the global name is in use
    async fn create_account(&self, spec: &AccountSpec) -> Result<StorageAccount>;

    // --- Shares ---

    async fn get_share(&self, resource_group: &str, account: &str, share: &str)
        -> Result<FileShare>;

    async fn create_share(
        &self,
        resource_group: &str,
        account: &str,
        spec: &ShareSpec,
    ) -> Result<FileShare>;

    /// Delete a share and its snapshots
    async fn delete_share(&self, resource_group: &str, account: &str, share: &str) -> Result<()>;

    async fn resize_share(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        quota_gib: u64,
    ) -> Result<FileShare>;

    /// List shares ordered by name, starting at `marker`
    async fn list_shares(
        &self,
        resource_group: &str,
        account: &str,
        marker: Option<&str>,
        max_results: u32,
    ) -> Result<SharePage>;

    // --- Directories ---

    /// Create a directory inside a share, creating missing parents.
    /// Fails with `AlreadyExists` if the directory is already present.
    async fn create_directory(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        path: &str,
    ) -> Result<()>;

    /// Delete a directory and everything below it
    async fn delete_directory(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        path: &str,
    ) -> Result<()>;

    // --- Snapshots ---

    async fn create_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<ShareSnapshot>;

    async fn delete_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        snapshot: &str,
    ) -> Result<()>;

    async fn list_snapshots(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
    ) -> Result<Vec<ShareSnapshot>>;
}
