use crate::error::{ProviderError, Result};
use crate::provider::StorageProvider;
use crate::types::{AccountSpec, FileShare, SharePage, ShareSnapshot, ShareSpec, StorageAccount};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Provider operations, used to target injected faults and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    ListAccounts,
    CreateAccount,
    GetShare,
    CreateShare,
    DeleteShare,
    ResizeShare,
    ListShares,
    CreateDirectory,
    DeleteDirectory,
    CreateSnapshot,
    DeleteSnapshot,
    ListSnapshots,
}

struct Fault {
    error: ProviderError,
    /// Apply the operation, then report the error anyway
    after_apply: bool,
}

struct AccountRecord {
    account: StorageAccount,
    shares: BTreeMap<String, FileShare>,
    /// Directory paths per share, without leading or trailing slashes
    directories: BTreeMap<String, BTreeSet<String>>,
    snapshots: BTreeMap<String, Vec<ShareSnapshot>>,
}

impl AccountRecord {
    fn descriptor(&self) -> StorageAccount {
        let mut account = self.account.clone();
        account.share_count = self.shares.len() as u32;
        account.provisioned_gib = self.shares.values().map(|s| s.quota_gib).sum();
        account
    }
}

/// In-memory storage provider for development and tests
///
/// Account names are global as with the real service. Faults can be queued per
/// operation to exercise retry and idempotency paths.
#[derive(Clone, Default)]
pub struct InMemoryProvider {
    accounts: Arc<RwLock<BTreeMap<String, AccountRecord>>>,
    faults: Arc<Mutex<HashMap<ProviderOp, VecDeque<Fault>>>>,
    calls: Arc<Mutex<HashMap<ProviderOp, usize>>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account; counts in the descriptor are ignored
    pub async fn add_account(&self, account: StorageAccount) {
        self.accounts.write().await.insert(
            account.name.clone(),
            AccountRecord {
                account,
                shares: BTreeMap::new(),
                directories: BTreeMap::new(),
                snapshots: BTreeMap::new(),
            },
        );
    }

    /// Seed `count` filler shares into an account
    pub async fn add_filler_shares(&self, account: &str, count: u32, quota_gib: u64) {
        let mut accounts = self.accounts.write().await;
        if let Some(record) = accounts.get_mut(account) {
            for i in 0..count {
                let name = format!("filler-{:04}", i);
                record.shares.insert(
                    name.clone(),
                    FileShare {
                        account: account.to_string(),
                        name,
                        quota_gib,
                        protocol: Default::default(),
                        root_squash: None,
                        metadata: BTreeMap::new(),
                    },
                );
            }
        }
    }

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: ProviderOp, error: ProviderError) {
        self.push_fault(op, error, false);
    }

    /// Apply the next call of `op`, then report `error` as if the reply were lost
    pub fn fail_after_apply(&self, op: ProviderOp, error: ProviderError) {
        self.push_fault(op, error, true);
    }

    fn push_fault(&self, op: ProviderOp, error: ProviderError, after_apply: bool) {
        self.faults
            .lock()
            .entry(op)
            .or_default()
            .push_back(Fault { error, after_apply });
    }

    /// Number of calls made for `op`, including failed ones
    pub fn calls(&self, op: ProviderOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub async fn share_count(&self, account: &str) -> usize {
        self.accounts
            .read()
            .await
            .get(account)
            .map(|r| r.shares.len())
            .unwrap_or(0)
    }

    /// Directories present in a share, sorted
    pub async fn directories(&self, account: &str, share: &str) -> Vec<String> {
        self.accounts
            .read()
            .await
            .get(account)
            .and_then(|r| r.directories.get(share))
            .map(|dirs| dirs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn account_names(&self) -> Vec<String> {
        self.accounts.read().await.keys().cloned().collect()
    }

    /// Record the call and return an error to report up front, or one to
    /// report after the operation has been applied
    fn begin(&self, op: ProviderOp) -> Result<Option<ProviderError>> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        let fault = self.faults.lock().get_mut(&op).and_then(|q| q.pop_front());
        match fault {
            Some(Fault {
                error,
                after_apply: false,
            }) => Err(error),
            Some(Fault {
                error,
                after_apply: true,
            }) => Ok(Some(error)),
            None => Ok(None),
        }
    }

    fn finish<T>(pending: Option<ProviderError>, result: Result<T>) -> Result<T> {
        match pending {
            Some(error) if result.is_ok() => Err(error),
            _ => result,
        }
    }
}

fn account_mut<'a>(
    accounts: &'a mut BTreeMap<String, AccountRecord>,
    resource_group: &str,
    account: &str,
) -> Result<&'a mut AccountRecord> {
    accounts
        .get_mut(account)
        .filter(|r| r.account.resource_group == resource_group)
        .ok_or_else(|| {
            ProviderError::not_found(format!("storage account {}/{}", resource_group, account))
        })
}

fn share_resource(account: &str, share: &str) -> String {
    format!("file share {}/{}", account, share)
}

fn directory_resource(account: &str, share: &str, path: &str) -> String {
    format!("directory {} in {}", path, share_resource(account, share))
}

#[async_trait]
impl StorageProvider for InMemoryProvider {
    async fn list_accounts(&self, resource_group: &str) -> Result<Vec<StorageAccount>> {
        let pending = self.begin(ProviderOp::ListAccounts)?;
        let accounts = self.accounts.read().await;
        let listed = accounts
            .values()
            .filter(|r| r.account.resource_group == resource_group)
            .map(AccountRecord::descriptor)
            .collect();
        Self::finish(pending, Ok(listed))
    }

    async fn create_account(&self, spec: &AccountSpec) -> Result<StorageAccount> {
        let pending = self.begin(ProviderOp::CreateAccount)?;
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&spec.name) {
            return Err(ProviderError::account_name_taken(&spec.name));
        }

        let record = AccountRecord {
            account: StorageAccount {
                name: spec.name.clone(),
                resource_group: spec.resource_group.clone(),
                location: spec.location.clone(),
                sku: spec.sku,
                kind: spec.kind,
                tags: spec.tags.clone(),
                nfs_enabled: spec.nfs_enabled,
                share_count: 0,
                provisioned_gib: 0,
            },
            shares: BTreeMap::new(),
            directories: BTreeMap::new(),
            snapshots: BTreeMap::new(),
        };
        let descriptor = record.descriptor();
        accounts.insert(spec.name.clone(), record);
        debug!("Memory: created storage account {}", spec.name);
        Self::finish(pending, Ok(descriptor))
    }

    async fn get_share(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
    ) -> Result<FileShare> {
        let pending = self.begin(ProviderOp::GetShare)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        let found = record
            .shares
            .get(share)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(share_resource(account, share)));
        Self::finish(pending, found)
    }

    async fn create_share(
        &self,
        resource_group: &str,
        account: &str,
        spec: &ShareSpec,
    ) -> Result<FileShare> {
        let pending = self.begin(ProviderOp::CreateShare)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;

        if spec.protocol == sharecsi_core::Protocol::Nfs && !record.account.nfs_enabled {
            return Err(ProviderError::invalid_request(format!(
                "account {} does not support NFS shares",
                account
            )));
        }
        if record.shares.contains_key(&spec.name) {
            return Err(ProviderError::already_exists(share_resource(
                account, &spec.name,
            )));
        }

        let share = FileShare {
            account: account.to_string(),
            name: spec.name.clone(),
            quota_gib: spec.quota_gib,
            protocol: spec.protocol,
            root_squash: spec.root_squash.clone(),
            metadata: spec.metadata.clone(),
        };
        record.shares.insert(spec.name.clone(), share.clone());
        debug!("Memory: created share {}/{}", account, spec.name);
        Self::finish(pending, Ok(share))
    }

    async fn delete_share(&self, resource_group: &str, account: &str, share: &str) -> Result<()> {
        let pending = self.begin(ProviderOp::DeleteShare)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        if record.shares.remove(share).is_none() {
            return Err(ProviderError::not_found(share_resource(account, share)));
        }
        record.snapshots.remove(share);
        record.directories.remove(share);
        debug!("Memory: deleted share {}/{}", account, share);
        Self::finish(pending, Ok(()))
    }

    async fn resize_share(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        quota_gib: u64,
    ) -> Result<FileShare> {
        let pending = self.begin(ProviderOp::ResizeShare)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        let existing = record
            .shares
            .get_mut(share)
            .ok_or_else(|| ProviderError::not_found(share_resource(account, share)))?;
        existing.quota_gib = quota_gib;
        debug!(
            "Memory: resized share {}/{} to {} GiB",
            account, share, quota_gib
        );
        let resized = existing.clone();
        Self::finish(pending, Ok(resized))
    }

    async fn list_shares(
        &self,
        resource_group: &str,
        account: &str,
        marker: Option<&str>,
        max_results: u32,
    ) -> Result<SharePage> {
        let pending = self.begin(ProviderOp::ListShares)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;

        let mut remaining = record
            .shares
            .values()
            .filter(|s| marker.map_or(true, |m| s.name.as_str() >= m));
        let limit = if max_results == 0 {
            usize::MAX
        } else {
            max_results as usize
        };

        let shares: Vec<FileShare> = remaining.by_ref().take(limit).cloned().collect();
        let next_marker = remaining.next().map(|s| s.name.clone());
        Self::finish(
            pending,
            Ok(SharePage {
                shares,
                next_marker,
            }),
        )
    }

    async fn create_directory(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        path: &str,
    ) -> Result<()> {
        let pending = self.begin(ProviderOp::CreateDirectory)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        if !record.shares.contains_key(share) {
            return Err(ProviderError::not_found(share_resource(account, share)));
        }

        let path = path.trim_matches('/');
        if path.is_empty() || path.split('/').any(|c| c.is_empty() || c == "..") {
            return Err(ProviderError::invalid_request(format!(
                "invalid directory path '{}'",
                path
            )));
        }
        let dirs = record.directories.entry(share.to_string()).or_default();
        if dirs.contains(path) {
            return Err(ProviderError::already_exists(directory_resource(
                account, share, path,
            )));
        }

        let mut parent = String::new();
        for component in path.split('/') {
            if !parent.is_empty() {
                parent.push('/');
            }
            parent.push_str(component);
            dirs.insert(parent.clone());
        }
        debug!("Memory: created directory {} in {}/{}", path, account, share);
        Self::finish(pending, Ok(()))
    }

    async fn delete_directory(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        path: &str,
    ) -> Result<()> {
        let pending = self.begin(ProviderOp::DeleteDirectory)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        let path = path.trim_matches('/');
        let dirs = record.directories.entry(share.to_string()).or_default();
        if !dirs.contains(path) {
            return Err(ProviderError::not_found(directory_resource(
                account, share, path,
            )));
        }

        let nested = format!("{}/", path);
        dirs.retain(|d| d != path && !d.starts_with(&nested));
        debug!("Memory: deleted directory {} in {}/{}", path, account, share);
        Self::finish(pending, Ok(()))
    }

    async fn create_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<ShareSnapshot> {
        let pending = self.begin(ProviderOp::CreateSnapshot)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        let size_gib = record
            .shares
            .get(share)
            .map(|s| s.quota_gib)
            .ok_or_else(|| ProviderError::not_found(share_resource(account, share)))?;

        let existing = record.snapshots.entry(share.to_string()).or_default();
        let mut created_at = Utc::now();
        let mut id = created_at.format("%Y-%m-%dT%H:%M:%S%.7fZ").to_string();
        while existing.iter().any(|s| s.snapshot == id) {
            created_at += chrono::Duration::microseconds(1);
            id = created_at.format("%Y-%m-%dT%H:%M:%S%.7fZ").to_string();
        }

        let snapshot = ShareSnapshot {
            account: account.to_string(),
            share: share.to_string(),
            snapshot: id,
            created_at,
            size_gib,
            metadata,
        };
        existing.push(snapshot.clone());
        debug!(
            "Memory: created snapshot {} of {}/{}",
            snapshot.snapshot, account, share
        );
        Self::finish(pending, Ok(snapshot))
    }

    async fn delete_snapshot(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        snapshot: &str,
    ) -> Result<()> {
        let pending = self.begin(ProviderOp::DeleteSnapshot)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        let snapshots = record.snapshots.entry(share.to_string()).or_default();
        let before = snapshots.len();
        snapshots.retain(|s| s.snapshot != snapshot);
        if snapshots.len() == before {
            return Err(ProviderError::not_found(format!(
                "snapshot {} of {}",
                snapshot,
                share_resource(account, share)
            )));
        }
        Self::finish(pending, Ok(()))
    }

    async fn list_snapshots(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
    ) -> Result<Vec<ShareSnapshot>> {
        let pending = self.begin(ProviderOp::ListSnapshots)?;
        let mut accounts = self.accounts.write().await;
        let record = account_mut(&mut accounts, resource_group, account)?;
        if !record.shares.contains_key(share) {
            return Err(ProviderError::not_found(share_resource(account, share)));
        }
        let listed = record.snapshots.get(share).cloned().unwrap_or_default();
        Self::finish(pending, Ok(listed))
    }
}
