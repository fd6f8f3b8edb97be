use sharecsi_core::{Protocol, VolumeHandle};

const SMB_DEFAULTS: &[&str] = &[
    "dir_mode=0777",
    "file_mode=0777",
    "vers=3.0",
    "actimeo=30",
    "mfsymlinks",
];

const NFS_DEFAULTS: &[&str] = &["vers=4", "minorversion=1", "sec=sys"];

/// Filesystem type passed to `mount -t`
pub fn fs_type(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Smb => "cifs",
        Protocol::Nfs => "nfs",
    }
}

/// Host serving the share: an explicit server, else the account's endpoint
pub fn share_host(account: &str, server: Option<&str>, endpoint_suffix: &str) -> String {
    match server.map(str::trim).filter(|s| !s.is_empty()) {
        Some(server) => server.to_string(),
        None => format!("{}.file.{}", account, endpoint_suffix),
    }
}

/// Remote source for the staging mount of a handle
pub fn mount_source(
    handle: &VolumeHandle,
    protocol: Protocol,
    server: Option<&str>,
    endpoint_suffix: &str,
) -> String {
    let host = share_host(&handle.account, server, endpoint_suffix);
    let mut source = match protocol {
        Protocol::Smb => format!("//{}/{}", host, handle.share),
        Protocol::Nfs => format!("{}:/{}/{}", host, handle.account, handle.share),
    };
    if let Some(sub_dir) = &handle.sub_dir {
        source.push('/');
        source.push_str(sub_dir.trim_matches('/'));
    }
    source
}

fn option_key(option: &str) -> &str {
    option.split_once('=').map_or(option, |(k, _)| k).trim()
}

/// Combine user mount flags with protocol defaults.
///
/// User options come first and win; a default is appended only when the user
/// did not set the same key. Duplicate user options are dropped.
pub fn merge_mount_options(user: &[String], protocol: Protocol) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for option in user.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
        if !merged.iter().any(|m| m == option) {
            merged.push(option.to_string());
        }
    }

    let defaults = match protocol {
        Protocol::Smb => SMB_DEFAULTS,
        Protocol::Nfs => NFS_DEFAULTS,
    };
    for default in defaults {
        let key = option_key(default);
        if !merged.iter().any(|m| option_key(m) == key) {
            merged.push(default.to_string());
        }
    }
    merged
}

/// Split a comma-separated option list from the volume context
pub fn split_options(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
