use crate::error::{NodeError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use sharecsi_core::context;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Secret data key holding the storage account name
pub const ACCOUNT_NAME_KEY: &str = "azurestorageaccountname";
/// Secret data key holding the storage account key
pub const ACCOUNT_KEY_KEY: &str = "azurestorageaccountkey";

/// Name of the per-account secret looked up when nothing else is configured
pub fn default_secret_name(account: &str) -> String {
    format!("azure-storage-account-{}-secret", account)
}

/// Credentials for an SMB mount
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub account_name: String,
    pub account_key: String,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .finish()
    }
}

impl StorageCredentials {
    /// Build credentials from secret data, falling back to `account` for the name
    pub fn from_data(
        namespace: &str,
        name: &str,
        data: &HashMap<String, String>,
        account: &str,
    ) -> Result<Self> {
        let key = data
            .get(ACCOUNT_KEY_KEY)
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                NodeError::invalid_secret(namespace, name, format!("missing {}", ACCOUNT_KEY_KEY))
            })?;
        let account_name = data
            .get(ACCOUNT_NAME_KEY)
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .unwrap_or(account);

        Ok(Self {
            account_name: account_name.to_string(),
            account_key: key.to_string(),
        })
    }
}

/// Source of secret data by namespace and name
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<HashMap<String, String>>;
}

/// Reads secrets from the orchestrator API
pub struct KubeSecretStore {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl KubeSecretStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: Client::new(),
        }
    }

    /// Authenticate with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }
}

/// Flatten a secret's binary and string data into text values
pub fn secret_data(secret: Secret) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    out.extend(secret.string_data.unwrap_or_default());
    out
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    /// GET /api/v1/namespaces/{namespace}/secrets/{name}
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<HashMap<String, String>> {
        let url = format!(
            "{}/api/v1/namespaces/{}/secrets/{}",
            self.base_url, namespace, name
        );
        debug!("GET {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| NodeError::secret_lookup(format!("HTTP request failed: {}", e)))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(NodeError::secret_not_found(namespace, name));
        }
        if !resp.status().is_success() {
            // the body of a failed secret read never carries secret data
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(NodeError::secret_lookup(format!(
                "GET secret {}/{} failed with status {}: {}",
                namespace, name, status, body
            )));
        }

        let secret = resp
            .json::<Secret>()
            .await
            .map_err(|e| NodeError::secret_lookup(format!("Failed to parse secret: {}", e)))?;
        Ok(secret_data(secret))
    }
}

/// Fixed in-memory secrets, for development and tests
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: RwLock<BTreeMap<(String, String), HashMap<String, String>>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, name: &str, data: HashMap<String, String>) {
        self.secrets
            .write()
            .insert((namespace.to_string(), name.to_string()), data);
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<HashMap<String, String>> {
        self.secrets
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| NodeError::secret_not_found(namespace, name))
    }
}

/// Resolve SMB credentials for a stage request.
///
/// Order: secrets passed with the request, then the secret named in the
/// volume context, then the per-account default secret in `default_namespace`.
pub async fn resolve_credentials(
    store: &dyn SecretStore,
    request_secrets: &HashMap<String, String>,
    volume_context: &HashMap<String, String>,
    account: &str,
    default_namespace: &str,
) -> Result<StorageCredentials> {
    if !request_secrets.is_empty() {
        debug!("Using credentials passed with the request for account {}", account);
        return StorageCredentials::from_data("", "request", request_secrets, account);
    }

    let (namespace, name) = match volume_context.get(context::SECRET_NAME) {
        Some(name) if !name.is_empty() => (
            volume_context
                .get(context::SECRET_NAMESPACE)
                .filter(|ns| !ns.is_empty())
                .map(String::as_str)
                .unwrap_or(default_namespace)
                .to_string(),
            name.clone(),
        ),
        _ => (default_namespace.to_string(), default_secret_name(account)),
    };

    debug!("Reading credentials for account {} from secret {}/{}", account, namespace, name);
    let data = store.get_secret(&namespace, &name).await?;
    StorageCredentials::from_data(&namespace, &name, &data, account)
}
