use crate::error::{CsiError, Result};
use crate::types::Protocol;
use std::collections::{BTreeMap, HashMap};

/// Storage class parameters, validated once when a request arrives.
///
/// Keys are matched case-insensitively. Keys this driver does not interpret
/// (including orchestrator-injected `csi.storage.k8s.io/*` keys) are kept in
/// `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeParameters {
    pub sku_name: Option<String>,
    pub storage_account: Option<String>,
    pub resource_group: Option<String>,
    pub share_name: Option<String>,
    pub protocol: Protocol,
    pub server: Option<String>,
    pub secret_name: Option<String>,
    pub secret_namespace: Option<String>,
    pub mount_options: Vec<String>,
    pub location: Option<String>,
    pub account_kind: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub match_tags: bool,
    pub sub_dir: Option<String>,
    pub root_squash: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl VolumeParameters {
    pub fn parse(params: &HashMap<String, String>) -> Result<Self> {
        let mut parsed = Self::default();

        // sorted so duplicate keys differing only in case resolve the same way every time
        let mut entries: Vec<(&String, &String)> = params.iter().collect();
        entries.sort();

        for (key, value) in entries {
            let value = value.trim();
            let set = |v: &str| -> Option<String> {
                if v.is_empty() {
                    None
                } else {
                    Some(v.to_string())
                }
            };

            match key.to_ascii_lowercase().as_str() {
                "skuname" | "storageaccounttype" => parsed.sku_name = set(value),
                "storageaccount" => parsed.storage_account = set(value),
                "resourcegroup" => parsed.resource_group = set(value),
                "sharename" => parsed.share_name = set(value),
                "protocol" => {
                    if !value.is_empty() {
                        parsed.protocol = value
                            .parse::<Protocol>()
                            .map_err(CsiError::invalid_argument)?;
                    }
                }
                "server" => parsed.server = set(value),
                "secretname" => parsed.secret_name = set(value),
                "secretnamespace" => parsed.secret_namespace = set(value),
                "mountoptions" => parsed.mount_options = split_list(value),
                "location" => parsed.location = set(value),
                "storageaccountkind" | "accountkind" => parsed.account_kind = set(value),
                "tags" => parsed.tags = parse_tags(value)?,
                "matchtags" => {
                    parsed.match_tags = match value.to_ascii_lowercase().as_str() {
                        "" | "false" => false,
                        "true" => true,
                        other => {
                            return Err(CsiError::invalid_argument(format!(
                                "matchTags must be true or false, got '{}'",
                                other
                            )))
                        }
                    }
                }
                "subdir" => parsed.sub_dir = set(value.trim_matches('/')),
                "rootsquashtype" => parsed.root_squash = set(value),
                _ => {
                    parsed.extra.insert(key.clone(), value.to_string());
                }
            }
        }

        if parsed.root_squash.is_some() && parsed.protocol != Protocol::Nfs {
            return Err(CsiError::invalid_argument(
                "rootSquashType is only supported with protocol nfs",
            ));
        }
        if parsed.protocol == Protocol::Nfs && parsed.secret_name.is_some() {
            return Err(CsiError::invalid_argument(
                "secretName is not used with protocol nfs",
            ));
        }

        Ok(parsed)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `key1=value1,key2=value2`
pub fn parse_tags(value: &str) -> Result<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();
    for pair in split_list(value) {
        let (k, v) = pair.split_once('=').ok_or_else(|| {
            CsiError::invalid_argument(format!(
                "tag '{}' is not in key=value form",
                pair
            ))
        })?;
        let k = k.trim();
        if k.is_empty() {
            return Err(CsiError::invalid_argument(format!(
                "tag '{}' has an empty key",
                pair
            )));
        }
        tags.insert(k.to_string(), v.trim().to_string());
    }
    Ok(tags)
}
