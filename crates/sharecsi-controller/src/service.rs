use crate::selection::{generate_account_name, AccountSelector};
use crate::types::{
    AccountRequirements, ControllerConfig, SNAPSHOT_NAME_KEY, SOURCE_VOLUME_KEY, VOLUME_NAME_KEY,
    VOLUME_UUID_KEY,
};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use sharecsi_cloud::{
    FileShare, ProviderError, Retrier, ShareSnapshot, ShareSpec, StorageAccount, StorageProvider,
};
use sharecsi_core::capacity::{
    gib_to_bytes, resolve_expand_gib, resolve_share_gib, DEFAULT_SHARE_GIB,
};
use sharecsi_core::handle::share_key;
use sharecsi_core::types::*;
use sharecsi_core::{
    context, CsiController, CsiError, LockTable, Result, SnapshotHandle, VolumeHandle,
    VolumeParameters,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Minimum quota for premium shares
const PREMIUM_MIN_GIB: u64 = 100;
const MIN_SHARE_NAME_LEN: usize = 3;
const MAX_SHARE_NAME_LEN: usize = 63;

/// Snapshot names this process has handed out, with the source volume
/// and snapshot id of each
#[derive(Clone, Default)]
pub struct SnapshotNames {
    inner: Arc<Mutex<HashMap<String, (String, String)>>>,
}

impl SnapshotNames {
    /// Source volume recorded for `name`
    pub fn source_of(&self, name: &str) -> Option<String> {
        self.inner.lock().get(name).map(|(source, _)| source.clone())
    }

    pub fn record(&self, name: &str, source_volume_id: &str, snapshot_id: &str) {
        self.inner.lock().insert(
            name.to_string(),
            (source_volume_id.to_string(), snapshot_id.to_string()),
        );
    }

    pub fn forget_snapshot(&self, snapshot_id: &str) {
        self.inner.lock().retain(|_, (_, id)| id.as_str() != snapshot_id);
    }
}

/// Process-local state shared by controller requests
#[derive(Clone, Default)]
pub struct ControllerContext {
    pub locks: LockTable,
    pub retrier: Retrier,
    pub config: ControllerConfig,
    pub snapshot_names: SnapshotNames,
}

impl ControllerContext {
    pub fn new(config: ControllerConfig, retrier: Retrier) -> Self {
        Self {
            locks: LockTable::new(),
            retrier,
            config,
            snapshot_names: SnapshotNames::default(),
        }
    }
}

/// Controller service backed by a storage provider
pub struct ControllerService {
    provider: Arc<dyn StorageProvider>,
    ctx: ControllerContext,
    selector: AccountSelector,
}

impl ControllerService {
    pub fn new(provider: Arc<dyn StorageProvider>, ctx: ControllerContext) -> Self {
        let selector = AccountSelector::new(&ctx.config);
        Self {
            provider,
            ctx,
            selector,
        }
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    // --- Provider calls through the retry wrapper ---

    async fn list_accounts(&self, resource_group: &str) -> Result<Vec<StorageAccount>> {
        let mut accounts = self
            .ctx
            .retrier
            .call("list_accounts", ProviderError::disposition, || {
                self.provider.list_accounts(resource_group)
            })
            .await?;
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    /// Look up a share, mapping absence to `None`
    async fn lookup_share(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
    ) -> Result<Option<FileShare>> {
        let result = self
            .ctx
            .retrier
            .call("get_share", ProviderError::disposition, || {
                self.provider.get_share(resource_group, account, share)
            })
            .await;
        match result {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.inner().is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a sub-directory volume's directory; an existing one is reused
    async fn ensure_directory(
        &self,
        resource_group: &str,
        account: &str,
        share: &str,
        path: &str,
    ) -> Result<()> {
        let result = self
            .ctx
            .retrier
            .call("create_directory", ProviderError::disposition, || {
                self.provider
                    .create_directory(resource_group, account, share, path)
            })
            .await;
        match result {
            Ok(()) => {
                info!("Created directory {} in share {}/{}", path, account, share);
                Ok(())
            }
            Err(e) if e.inner().is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Find a share with this name in any account matching the constraints
    async fn find_existing_share(
        &self,
        req: &AccountRequirements,
        explicit_account: Option<&str>,
        accounts: &[StorageAccount],
        share: &str,
    ) -> Result<Option<FileShare>> {
        let candidates: Vec<&StorageAccount> = match explicit_account {
            Some(name) => accounts.iter().filter(|a| a.name == name).collect(),
            None => self.selector.matching(req, accounts),
        };

        let lookups = candidates
            .into_iter()
            .map(|account| self.lookup_share(&req.resource_group, &account.name, share));
        let found = try_join_all(lookups).await?;

        // candidates are sorted by name, so the first hit is deterministic
        Ok(found.into_iter().flatten().next())
    }

    async fn select_account(
        &self,
        req: &AccountRequirements,
        explicit_account: Option<&str>,
        accounts: Vec<StorageAccount>,
    ) -> Result<StorageAccount> {
        if let Some(name) = explicit_account {
            let account = accounts.into_iter().find(|a| a.name == name).ok_or_else(|| {
                CsiError::not_found(format!(
                    "storage account {}/{}",
                    req.resource_group, name
                ))
            })?;
            self.selector.validate_explicit(req, &account)?;
            return Ok(account);
        }

        if let Some(account) = self.selector.select(req, &accounts) {
            return Ok(account.clone());
        }

        if !self.ctx.config.allow_account_creation {
            return Err(CsiError::provider_failure(
                "select_account",
                format!(
                    "no storage account in {} satisfies the request and account creation is disabled",
                    req.resource_group
                ),
            ));
        }

        // Serialize creation per constraint set, then look again: another
        // request may have created a suitable account while we waited.
        let key = format!("account-create/{}", req.fingerprint());
        let _guard = self
            .ctx
            .locks
            .acquire_timeout(&key, "CreateAccount", self.ctx.config.lock_timeout())
            .await?;

        let accounts = self.list_accounts(&req.resource_group).await?;
        if let Some(account) = self.selector.select(req, &accounts) {
            return Ok(account.clone());
        }

        self.create_account(req).await
    }

    async fn create_account(&self, req: &AccountRequirements) -> Result<StorageAccount> {
        let config = &self.ctx.config;

        for attempt in 1..=config.account_create_attempts.max(1) {
            let spec = req.account_spec(generate_account_name(&config.account_name_prefix), config);
            let result = self
                .ctx
                .retrier
                .call("create_account", ProviderError::disposition, || {
                    self.provider.create_account(&spec)
                })
                .await;

            match result {
                Ok(account) => {
                    info!(
                        "Created storage account {} ({}, {}) in {}",
                        account.name, account.sku, account.location, account.resource_group
                    );
                    return Ok(account);
                }
                Err(e) if matches!(e.inner(), ProviderError::AccountNameTaken { .. }) => {
                    // a lost reply on an earlier attempt leaves our own account behind
                    let accounts = self.list_accounts(&req.resource_group).await?;
                    if let Some(ours) = accounts.into_iter().find(|a| a.name == spec.name) {
                        if self.selector.validate_explicit(req, &ours).is_ok() {
                            return Ok(ours);
                        }
                    }
                    warn!(
                        "Account name {} is taken (attempt {}), generating another",
                        spec.name, attempt
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CsiError::provider_failure(
            "create_account",
            format!(
                "every generated account name was taken after {} attempts",
                config.account_create_attempts
            ),
        ))
    }

    fn volume_from_share(
        &self,
        resource_group: &str,
        share: &FileShare,
        volume_context: HashMap<String, String>,
    ) -> Volume {
        let mut handle = VolumeHandle::new(resource_group, &share.account, &share.name, share.protocol);
        if let Some(uuid) = share.metadata.get(VOLUME_UUID_KEY) {
            handle = handle.with_uuid(uuid.as_str());
        }
        if let Some(name) = share.metadata.get(VOLUME_NAME_KEY) {
            handle = handle.with_suffix(name.as_str());
        }

        Volume {
            volume_id: handle.encode(),
            capacity_bytes: gib_to_bytes(share.quota_gib),
            volume_context,
        }
    }

    /// Volume for a sub-directory of a shared share. The volume name is the
    /// suffix so volumes on one share get distinct ids.
    fn sub_dir_volume(
        &self,
        resource_group: &str,
        share: &FileShare,
        sub_dir: &str,
        volume_name: &str,
        quota_gib: u64,
        volume_context: HashMap<String, String>,
    ) -> Volume {
        let handle = VolumeHandle::new(resource_group, &share.account, &share.name, share.protocol)
            .with_sub_dir(sub_dir)
            .with_suffix(volume_name);
        Volume {
            volume_id: handle.encode(),
            capacity_bytes: gib_to_bytes(quota_gib),
            volume_context,
        }
    }

    fn resource_group(&self, from_handle: &str) -> String {
        self.ctx
            .config
            .resource_group_or_default(from_handle)
            .to_string()
    }
}

/// Ensure an existing share can stand in for the one requested.
///
/// A share holding sub-directory volumes is used by many volumes of any
/// size, so only its protocol has to match.
fn check_compatible(
    share: &FileShare,
    volume_name: &str,
    quota_gib: u64,
    protocol: Protocol,
    shared: bool,
) -> Result<()> {
    let resource = format!("file share {}/{}", share.account, share.name);
    if share.protocol != protocol {
        return Err(CsiError::already_exists(
            resource,
            format!("protocol is {}, requested {}", share.protocol, protocol),
        ));
    }
    if shared {
        return Ok(());
    }
    if share.quota_gib != quota_gib {
        return Err(CsiError::already_exists(
            resource,
            format!("size is {} GiB, requested {} GiB", share.quota_gib, quota_gib),
        ));
    }
    if let Some(owner) = share.metadata.get(VOLUME_NAME_KEY) {
        if owner != volume_name {
            return Err(CsiError::already_exists(
                resource,
                format!("share belongs to volume {}", owner),
            ));
        }
    }
    Ok(())
}

fn validate_capabilities(caps: &[VolumeCapability]) -> Result<()> {
    if caps.is_empty() {
        return Err(CsiError::invalid_argument("volume capabilities are required"));
    }
    if caps.iter().any(VolumeCapability::is_block) {
        return Err(CsiError::invalid_argument(
            "block access is not supported for file shares",
        ));
    }
    Ok(())
}

/// Derive a valid share name from an orchestrator volume name
pub fn share_name_from_volume(name: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let mut out = out.trim_matches('-').to_string();
    out.truncate(MAX_SHARE_NAME_LEN);
    let out = out.trim_end_matches('-').to_string();

    if out.len() < MIN_SHARE_NAME_LEN {
        return Err(CsiError::invalid_argument(format!(
            "cannot derive a share name from volume name '{}'",
            name
        )));
    }
    Ok(out)
}

/// Check an explicitly requested share name against the provider's rules
pub fn validate_share_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid = (MIN_SHARE_NAME_LEN..=MAX_SHARE_NAME_LEN).contains(&name.len())
        && valid_chars
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");
    if !valid {
        return Err(CsiError::invalid_argument(format!(
            "share name '{}' must be 3-63 lowercase letters, digits or single hyphens",
            name
        )));
    }
    Ok(())
}

fn parse_list_token(token: &str) -> Result<(String, Option<String>)> {
    let (account, marker) = token
        .split_once('/')
        .ok_or_else(|| CsiError::aborted(token, "ListVolumes"))?;
    if account.is_empty() {
        return Err(CsiError::aborted(token, "ListVolumes"));
    }
    let marker = if marker.is_empty() {
        None
    } else {
        Some(marker.to_string())
    };
    Ok((account.to_string(), marker))
}

#[async_trait]
impl CsiController for ControllerService {
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<CreateVolumeResponse> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(CsiError::invalid_argument("volume name is required"));
        }
        validate_capabilities(&req.volume_capabilities)?;

        let params = VolumeParameters::parse(&req.parameters)?;
        let sku_min = AccountRequirements::from_params(&params, &self.ctx.config, 0)?;
        let min_gib = if sku_min.effective_sku(&self.ctx.config).is_premium() {
            PREMIUM_MIN_GIB
        } else {
            1
        };
        let quota_gib =
            resolve_share_gib(req.capacity_range.as_ref(), DEFAULT_SHARE_GIB, min_gib)?;
        let requirements = AccountRequirements {
            requested_gib: quota_gib,
            ..sku_min
        };

        let share_name = match &params.share_name {
            Some(explicit) => {
                validate_share_name(explicit)?;
                explicit.clone()
            }
            None => share_name_from_volume(name)?,
        };

        let _guard = self
            .ctx
            .locks
            .acquire_timeout(
                &share_key(&share_name),
                "CreateVolume",
                self.ctx.config.lock_timeout(),
            )
            .await?;

        let rg = requirements.resource_group.clone();
        let accounts = self.list_accounts(&rg).await?;
        let explicit_account = params.storage_account.as_deref();

        let mut volume_context = HashMap::new();
        volume_context.insert(context::PROTOCOL.to_string(), params.protocol.to_string());
        volume_context.insert(context::SHARE_NAME.to_string(), share_name.clone());
        volume_context.insert(context::RESOURCE_GROUP.to_string(), rg.clone());
        if let Some(server) = &params.server {
            volume_context.insert(context::SERVER.to_string(), server.clone());
        }
        if let Some(secret) = &params.secret_name {
            volume_context.insert(context::SECRET_NAME.to_string(), secret.clone());
        }
        if let Some(ns) = &params.secret_namespace {
            volume_context.insert(context::SECRET_NAMESPACE.to_string(), ns.clone());
        }
        if !params.mount_options.is_empty() {
            volume_context.insert(
                context::MOUNT_OPTIONS.to_string(),
                params.mount_options.join(","),
            );
        }

        if let Some(existing) = self
            .find_existing_share(&requirements, explicit_account, &accounts, &share_name)
            .await?
        {
            check_compatible(
                &existing,
                name,
                quota_gib,
                params.protocol,
                params.sub_dir.is_some(),
            )?;
            volume_context.insert(
                context::STORAGE_ACCOUNT.to_string(),
                existing.account.clone(),
            );
            let volume = match params.sub_dir.as_deref() {
                Some(sub_dir) => {
                    self.ensure_directory(&rg, &existing.account, &existing.name, sub_dir)
                        .await?;
                    self.sub_dir_volume(&rg, &existing, sub_dir, name, quota_gib, volume_context)
                }
                None => {
                    info!(
                        "Volume {} already provisioned as share {}/{}",
                        name, existing.account, existing.name
                    );
                    self.volume_from_share(&rg, &existing, volume_context)
                }
            };
            return Ok(CreateVolumeResponse { volume });
        }

        let account = self
            .select_account(&requirements, explicit_account, accounts)
            .await?;

        // a share created for a sub-directory volume has no single owner
        let mut metadata = BTreeMap::new();
        if params.sub_dir.is_none() {
            metadata.insert(VOLUME_UUID_KEY.to_string(), Uuid::new_v4().to_string());
            metadata.insert(VOLUME_NAME_KEY.to_string(), name.to_string());
        }
        let spec = ShareSpec {
            name: share_name.clone(),
            quota_gib,
            protocol: params.protocol,
            root_squash: params.root_squash.clone(),
            metadata,
        };

        let created = self
            .ctx
            .retrier
            .call("create_share", ProviderError::disposition, || {
                self.provider.create_share(&rg, &account.name, &spec)
            })
            .await;

        let share = match created {
            Ok(share) => share,
            Err(e) if e.inner().is_already_exists() => {
                // an earlier attempt succeeded but its reply was lost
                let existing = self
                    .lookup_share(&rg, &account.name, &share_name)
                    .await?
                    .ok_or_else(|| {
                        CsiError::internal(format!(
                            "share {}/{} reported as existing but not found",
                            account.name, share_name
                        ))
                    })?;
                check_compatible(
                    &existing,
                    name,
                    quota_gib,
                    params.protocol,
                    params.sub_dir.is_some(),
                )?;
                existing
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Created share {}/{} ({} GiB, {}) for volume {}",
            account.name, share.name, share.quota_gib, share.protocol, name
        );

        volume_context.insert(context::STORAGE_ACCOUNT.to_string(), account.name.clone());
        let volume = match params.sub_dir.as_deref() {
            Some(sub_dir) => {
                self.ensure_directory(&rg, &account.name, &share.name, sub_dir)
                    .await?;
                self.sub_dir_volume(&rg, &share, sub_dir, name, quota_gib, volume_context)
            }
            None => self.volume_from_share(&rg, &share, volume_context),
        };
        Ok(CreateVolumeResponse { volume })
    }

    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<()> {
        if req.volume_id.is_empty() {
            return Err(CsiError::invalid_argument("volume id is required"));
        }
        let handle = VolumeHandle::decode(&req.volume_id)?;
        let rg = self.resource_group(&handle.resource_group);

        let _guard = self
            .ctx
            .locks
            .acquire_timeout(
                &handle.share_key(),
                "DeleteVolume",
                self.ctx.config.lock_timeout(),
            )
            .await?;

        if req.retain_share {
            info!(
                "Retaining share {}/{} for volume {}",
                handle.account, handle.share, req.volume_id
            );
            return Ok(());
        }
        if let Some(sub_dir) = &handle.sub_dir {
            let result = self
                .ctx
                .retrier
                .call("delete_directory", ProviderError::disposition, || {
                    self.provider
                        .delete_directory(&rg, &handle.account, &handle.share, sub_dir)
                })
                .await;
            return match result {
                Ok(()) => {
                    info!(
                        "Deleted directory {} of share {}/{}, leaving the share in place",
                        sub_dir, handle.account, handle.share
                    );
                    Ok(())
                }
                Err(e) if e.inner().is_not_found() => {
                    debug!(
                        "Directory {} of share {}/{} already absent",
                        sub_dir, handle.account, handle.share
                    );
                    Ok(())
                }
                Err(e) => Err(e.into()),
            };
        }

        let result = self
            .ctx
            .retrier
            .call("delete_share", ProviderError::disposition, || {
                self.provider.delete_share(&rg, &handle.account, &handle.share)
            })
            .await;

        match result {
            Ok(()) => {
                info!("Deleted share {}/{}", handle.account, handle.share);
                Ok(())
            }
            Err(e) if e.inner().is_not_found() => {
                debug!(
                    "Share {}/{} already absent",
                    handle.account, handle.share
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(CsiError::invalid_argument("volume id is required"));
        }
        let handle = VolumeHandle::decode(&req.volume_id)?;
        let rg = self.resource_group(&handle.resource_group);
        let range = req
            .capacity_range
            .ok_or_else(|| CsiError::invalid_argument("capacity range is required"))?;
        let requested_gib = resolve_expand_gib(&range)?;

        let _guard = self
            .ctx
            .locks
            .acquire_timeout(
                &handle.share_key(),
                "ControllerExpandVolume",
                self.ctx.config.lock_timeout(),
            )
            .await?;

        let share = self
            .lookup_share(&rg, &handle.account, &handle.share)
            .await?
            .ok_or_else(|| {
                CsiError::not_found(format!("file share {}/{}", handle.account, handle.share))
            })?;

        if requested_gib < share.quota_gib {
            return Err(CsiError::invalid_argument(format!(
                "cannot shrink share {}/{} from {} GiB to {} GiB",
                handle.account, handle.share, share.quota_gib, requested_gib
            )));
        }

        let quota_gib = if requested_gib == share.quota_gib {
            share.quota_gib
        } else {
            let resized = self
                .ctx
                .retrier
                .call("resize_share", ProviderError::disposition, || {
                    self.provider
                        .resize_share(&rg, &handle.account, &handle.share, requested_gib)
                })
                .await?;
            info!(
                "Expanded share {}/{} from {} GiB to {} GiB",
                handle.account, handle.share, share.quota_gib, resized.quota_gib
            );
            resized.quota_gib
        };

        Ok(ControllerExpandVolumeResponse {
            capacity_bytes: gib_to_bytes(quota_gib),
            node_expansion_required: false,
        })
    }

    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse> {
        let handle = VolumeHandle::decode(&req.volume_id)?;
        let rg = self.resource_group(&handle.resource_group);
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::invalid_argument("volume capabilities are required"));
        }

        if self
            .lookup_share(&rg, &handle.account, &handle.share)
            .await?
            .is_none()
        {
            return Err(CsiError::not_found(format!(
                "file share {}/{}",
                handle.account, handle.share
            )));
        }

        if req.volume_capabilities.iter().any(VolumeCapability::is_block) {
            return Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: "block access is not supported for file shares".to_string(),
            });
        }
        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(req.volume_capabilities),
            message: String::new(),
        })
    }

    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<CreateSnapshotResponse> {
        if req.name.is_empty() {
            return Err(CsiError::invalid_argument("snapshot name is required"));
        }
        if req.source_volume_id.is_empty() {
            return Err(CsiError::invalid_argument("source volume id is required"));
        }
        let handle = VolumeHandle::decode(&req.source_volume_id)?;
        let rg = self.resource_group(&handle.resource_group);

        let _guard = self
            .ctx
            .locks
            .acquire_timeout(
                &format!("snapshot/{}", req.name),
                "CreateSnapshot",
                self.ctx.config.lock_timeout(),
            )
            .await?;

        let names = &self.ctx.snapshot_names;
        if let Some(source) = names.source_of(&req.name) {
            if source != req.source_volume_id {
                return Err(CsiError::already_exists(
                    format!("snapshot {}", req.name),
                    format!("taken from volume {}", source),
                ));
            }
        }

        // list and create run as one retried unit so a lost create reply is
        // found by name on the next attempt instead of producing a duplicate
        let snapshot: ShareSnapshot = self
            .ctx
            .retrier
            .call("create_snapshot", ProviderError::disposition, || async {
                let existing = self
                    .provider
                    .list_snapshots(&rg, &handle.account, &handle.share)
                    .await?;
                if let Some(found) = existing
                    .into_iter()
                    .find(|s| s.metadata.get(SNAPSHOT_NAME_KEY) == Some(&req.name))
                {
                    return Ok(found);
                }
                let mut metadata = BTreeMap::new();
                metadata.insert(SNAPSHOT_NAME_KEY.to_string(), req.name.clone());
                metadata.insert(SOURCE_VOLUME_KEY.to_string(), req.source_volume_id.clone());
                self.provider
                    .create_snapshot(&rg, &handle.account, &handle.share, metadata)
                    .await
            })
            .await?;

        // volumes on one share see each other's snapshots
        if let Some(source) = snapshot.metadata.get(SOURCE_VOLUME_KEY) {
            if *source != req.source_volume_id {
                return Err(CsiError::already_exists(
                    format!("snapshot {}", req.name),
                    format!("taken from volume {}", source),
                ));
            }
        }

        info!(
            "Snapshot {} of share {}/{} is {}",
            req.name, handle.account, handle.share, snapshot.snapshot
        );

        let snapshot_id = SnapshotHandle {
            resource_group: handle.resource_group.clone(),
            account: handle.account.clone(),
            share: handle.share.clone(),
            snapshot: snapshot.snapshot.clone(),
        }
        .encode();
        names.record(&req.name, &req.source_volume_id, &snapshot_id);

        Ok(CreateSnapshotResponse {
            snapshot: Snapshot {
                snapshot_id,
                source_volume_id: req.source_volume_id,
                size_bytes: gib_to_bytes(snapshot.size_gib),
                creation_time: snapshot.created_at,
                ready_to_use: true,
            },
        })
    }

    async fn delete_snapshot(&self, req: DeleteSnapshotRequest) -> Result<()> {
        if req.snapshot_id.is_empty() {
            return Err(CsiError::invalid_argument("snapshot id is required"));
        }
        let handle = SnapshotHandle::decode(&req.snapshot_id)?;
        let rg = self.resource_group(&handle.resource_group);

        let _guard = self
            .ctx
            .locks
            .acquire_timeout(
                &format!("snapshot-id/{}", req.snapshot_id),
                "DeleteSnapshot",
                self.ctx.config.lock_timeout(),
            )
            .await?;

        let result = self
            .ctx
            .retrier
            .call("delete_snapshot", ProviderError::disposition, || {
                self.provider
                    .delete_snapshot(&rg, &handle.account, &handle.share, &handle.snapshot)
            })
            .await;

        match result {
            Ok(()) => {
                info!(
                    "Deleted snapshot {} of share {}/{}",
                    handle.snapshot, handle.account, handle.share
                );
            }
            Err(e) if e.inner().is_not_found() => {
                debug!("Snapshot {} already absent", req.snapshot_id);
            }
            Err(e) => return Err(e.into()),
        }
        self.ctx.snapshot_names.forget_snapshot(&req.snapshot_id);
        Ok(())
    }

    async fn list_volumes(&self, req: ListVolumesRequest) -> Result<ListVolumesResponse> {
        let rg = self.ctx.config.resource_group.clone();
        let accounts = self.list_accounts(&rg).await?;

        let (start, mut marker) = match req.starting_token.as_deref() {
            None | Some("") => (0, None),
            Some(token) => {
                let (account, marker) = parse_list_token(token)?;
                let idx = accounts
                    .iter()
                    .position(|a| a.name == account)
                    .ok_or_else(|| CsiError::aborted(token, "ListVolumes"))?;
                (idx, marker)
            }
        };

        let limit = if req.max_entries == 0 {
            usize::MAX
        } else {
            req.max_entries as usize
        };
        let mut entries = Vec::new();
        let mut next_token = None;

        for (idx, account) in accounts.iter().enumerate().skip(start) {
            let remaining = limit - entries.len();
            let page = self
                .ctx
                .retrier
                .call("list_shares", ProviderError::disposition, || {
                    self.provider.list_shares(
                        &rg,
                        &account.name,
                        marker.as_deref(),
                        remaining.min(u32::MAX as usize) as u32,
                    )
                })
                .await?;
            marker = None;

            for share in &page.shares {
                let mut volume_context = HashMap::new();
                volume_context.insert(context::PROTOCOL.to_string(), share.protocol.to_string());
                volume_context.insert(context::SHARE_NAME.to_string(), share.name.clone());
                volume_context.insert(context::STORAGE_ACCOUNT.to_string(), account.name.clone());
                volume_context.insert(context::RESOURCE_GROUP.to_string(), rg.clone());
                entries.push(self.volume_from_share(&rg, share, volume_context));
            }

            if let Some(next) = page.next_marker {
                next_token = Some(format!("{}/{}", account.name, next));
                break;
            }
            if entries.len() >= limit {
                next_token = accounts
                    .get(idx + 1)
                    .map(|a| format!("{}/", a.name));
                break;
            }
        }

        Ok(ListVolumesResponse {
            entries,
            next_token,
        })
    }

    async fn get_capacity(&self, req: GetCapacityRequest) -> Result<GetCapacityResponse> {
        let params = VolumeParameters::parse(&req.parameters)?;
        let requirements = AccountRequirements::from_params(&params, &self.ctx.config, 0)?;
        let accounts = self.list_accounts(&requirements.resource_group).await?;

        let max_gib = self.ctx.config.max_account_capacity_gib;
        let available_gib: u64 = self
            .selector
            .matching(&requirements, &accounts)
            .iter()
            .filter(|a| a.share_count < self.ctx.config.max_shares_per_account)
            .map(|a| max_gib.saturating_sub(a.provisioned_gib))
            .sum();

        Ok(GetCapacityResponse {
            available_capacity: gib_to_bytes(available_gib),
        })
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::CreateDeleteSnapshot,
            ControllerCapability::ExpandVolume,
            ControllerCapability::ListVolumes,
            ControllerCapability::GetCapacity,
            ControllerCapability::SingleNodeMultiWriter,
        ])
    }
}
