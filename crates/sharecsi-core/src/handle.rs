//! Volume and snapshot handle encoding
//!
//! A handle is the only state the orchestrator keeps for a volume, so every
//! coordinate needed by later calls is packed into it. Three grammars are
//! understood:
//!
//! - legacy: `rg#account#share`
//! - v1: `rg#account#share#suffix#uuid`
//! - v2: `v2#rg#account#share#subdir#protocol#uuid#suffix`
//!
//! New handles are always written as v2. In v2 every field is escaped so that
//! `%` becomes `%25` and `#` becomes `%23`; empty optional fields mean "unset".
//! The resource group may be empty in every grammar, meaning the driver's
//! default group.

use crate::error::{CsiError, Result};
use crate::types::Protocol;
use std::fmt;
use std::str::FromStr;

pub const SEPARATOR: char = '#';
const V2_TAG: &str = "v2";

/// Grammar a handle was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleVersion {
    Legacy,
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeHandle {
    pub version: HandleVersion,
    pub resource_group: String,
    pub account: String,
    pub share: String,
    pub sub_dir: Option<String>,
    pub protocol: Protocol,
    pub uuid: Option<String>,
    /// Free-form diagnostic text, usually the orchestrator's volume name
    pub suffix: Option<String>,
}

impl VolumeHandle {
    /// Create a handle in the current grammar
    pub fn new(
        resource_group: impl Into<String>,
        account: impl Into<String>,
        share: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            version: HandleVersion::V2,
            resource_group: resource_group.into(),
            account: account.into(),
            share: share.into(),
            sub_dir: None,
            protocol,
            uuid: None,
            suffix: None,
        }
    }

    pub fn with_sub_dir(mut self, sub_dir: impl Into<String>) -> Self {
        self.sub_dir = Some(sub_dir.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Lock key shared by every operation that touches the backing share
    pub fn share_key(&self) -> String {
        share_key(&self.share)
    }

    pub fn encode(&self) -> String {
        match self.version {
            HandleVersion::Legacy => {
                join(&[
                    self.resource_group.as_str(),
                    self.account.as_str(),
                    self.share.as_str(),
                ])
            }
            HandleVersion::V1 => join(&[
                self.resource_group.as_str(),
                self.account.as_str(),
                self.share.as_str(),
                self.suffix.as_deref().unwrap_or_default(),
                self.uuid.as_deref().unwrap_or_default(),
            ]),
            HandleVersion::V2 => {
                let fields = [
                    V2_TAG.to_string(),
                    escape(&self.resource_group),
                    escape(&self.account),
                    escape(&self.share),
                    escape(self.sub_dir.as_deref().unwrap_or_default()),
                    self.protocol.as_str().to_string(),
                    escape(self.uuid.as_deref().unwrap_or_default()),
                    escape(self.suffix.as_deref().unwrap_or_default()),
                ];
                fields.join("#")
            }
        }
    }

    pub fn decode(handle: &str) -> Result<Self> {
        let fields: Vec<&str> = handle.split(SEPARATOR).collect();

        let decoded = match fields.as_slice() {
            [tag, rg, account, share, sub_dir, protocol, uuid, suffix] if *tag == V2_TAG => {
                let protocol = protocol
                    .parse::<Protocol>()
                    .map_err(|e| CsiError::malformed_handle(handle, e))?;
                Self {
                    version: HandleVersion::V2,
                    resource_group: unescape(handle, rg)?,
                    account: unescape(handle, account)?,
                    share: unescape(handle, share)?,
                    sub_dir: optional(unescape(handle, sub_dir)?),
                    protocol,
                    uuid: optional(unescape(handle, uuid)?),
                    suffix: optional(unescape(handle, suffix)?),
                }
            }
            [rg, account, share, suffix, uuid] => Self {
                version: HandleVersion::V1,
                resource_group: rg.to_string(),
                account: account.to_string(),
                share: share.to_string(),
                sub_dir: None,
                protocol: Protocol::Smb,
                uuid: optional(uuid.to_string()),
                suffix: optional(suffix.to_string()),
            },
            [rg, account, share] => Self {
                version: HandleVersion::Legacy,
                resource_group: rg.to_string(),
                account: account.to_string(),
                share: share.to_string(),
                sub_dir: None,
                protocol: Protocol::Smb,
                uuid: None,
                suffix: None,
            },
            _ => {
                return Err(CsiError::malformed_handle(
                    handle,
                    format!(
                        "{} fields do not match any known handle layout",
                        fields.len()
                    ),
                ))
            }
        };

        if decoded.account.is_empty() || decoded.share.is_empty() {
            return Err(CsiError::malformed_handle(
                handle,
                "account and share fields must not be empty",
            ));
        }

        Ok(decoded)
    }
}

impl fmt::Display for VolumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for VolumeHandle {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// Snapshot handle: `rg#account#share#snapshot`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotHandle {
    pub resource_group: String,
    pub account: String,
    pub share: String,
    pub snapshot: String,
}

impl SnapshotHandle {
    pub fn encode(&self) -> String {
        [
            escape(&self.resource_group),
            escape(&self.account),
            escape(&self.share),
            escape(&self.snapshot),
        ]
        .join("#")
    }

    pub fn decode(handle: &str) -> Result<Self> {
        let fields: Vec<&str> = handle.split(SEPARATOR).collect();
        let [rg, account, share, snapshot] = fields.as_slice() else {
            return Err(CsiError::malformed_handle(
                handle,
                format!("expected 4 snapshot fields, found {}", fields.len()),
            ));
        };

        let decoded = Self {
            resource_group: unescape(handle, rg)?,
            account: unescape(handle, account)?,
            share: unescape(handle, share)?,
            snapshot: unescape(handle, snapshot)?,
        };
        if decoded.account.is_empty() || decoded.share.is_empty() || decoded.snapshot.is_empty()
        {
            return Err(CsiError::malformed_handle(
                handle,
                "account, share and snapshot fields must not be empty",
            ));
        }
        Ok(decoded)
    }

    pub fn share_key(&self) -> String {
        share_key(&self.share)
    }
}

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Lock key for a share name; create runs before the account is known, so
/// the account is not part of the key
pub fn share_key(share: &str) -> String {
    format!("share/{}", share)
}

fn join(fields: &[&str]) -> String {
    fields.join("#")
}

fn optional(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(handle: &str, s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3);
        match escape {
            Some("%25") => out.push('%'),
            Some("%23") => out.push('#'),
            _ => {
                return Err(CsiError::malformed_handle(
                    handle,
                    format!("invalid escape sequence in field '{}'", s),
                ))
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_round_trip_with_escaped_fields() {
        let handle = VolumeHandle::new("rg-1", "acct01", "pvc-a", Protocol::Nfs)
            .with_sub_dir("data#1/100%")
            .with_uuid("1b4e28ba-2fa1-11d2-883f-0016d3cca427")
            .with_suffix("default/claim#a");

        let encoded = handle.encode();
        assert_eq!(encoded.matches('#').count(), 7);
        assert!(encoded.starts_with("v2#rg-1#acct01#pvc-a#data%231/100%25#nfs#"));

        let decoded = VolumeHandle::decode(&encoded).unwrap();
        assert_eq!(decoded, handle);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_decode_legacy_and_v1() {
        let legacy = VolumeHandle::decode("rg#acct#share").unwrap();
        assert_eq!(legacy.version, HandleVersion::Legacy);
        assert_eq!(legacy.protocol, Protocol::Smb);
        assert_eq!(legacy.encode(), "rg#acct#share");

        let v1 = VolumeHandle::decode("rg#acct#share#pvc-x#1234").unwrap();
        assert_eq!(v1.version, HandleVersion::V1);
        assert_eq!(v1.suffix.as_deref(), Some("pvc-x"));
        assert_eq!(v1.uuid.as_deref(), Some("1234"));
        assert_eq!(v1.encode(), "rg#acct#share#pvc-x#1234");

        // empty resource group means the driver default
        let default_rg = VolumeHandle::decode("#acct#share").unwrap();
        assert!(default_rg.resource_group.is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in [
            "",
            "just-a-name",
            "rg#acct",
            "rg#acct#share#x",
            "v2#rg#acct#share##smb#uuid",
            "v2#rg#acct#share##iscsi#uuid#sfx",
            "v2#rg#acct#share#bad%2#smb##",
            "rg##share",
        ] {
            let err = VolumeHandle::decode(bad).unwrap_err();
            assert!(
                matches!(err, CsiError::MalformedHandle { .. }),
                "expected malformed for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_snapshot_handle() {
        let snap = SnapshotHandle {
            resource_group: "rg".to_string(),
            account: "acct".to_string(),
            share: "pvc-a".to_string(),
            snapshot: "2024-05-01T10:00:00.0000000Z".to_string(),
        };
        let decoded = SnapshotHandle::decode(&snap.encode()).unwrap();
        assert_eq!(decoded, snap);
        assert_eq!(decoded.share_key(), "share/pvc-a");

        assert!(SnapshotHandle::decode("rg#acct#share").is_err());
    }
}
