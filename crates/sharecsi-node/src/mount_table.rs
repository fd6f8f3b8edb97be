//! Live mount table parsing
//!
//! `/proc/self/mountinfo` lists one mount per line as
//!
//! ```text
//! 36 35 0:53 / /staging/a rw,relatime shared:1 - cifs //acct/share rw,vers=3.0
//! ```
//!
//! i.e. mount id, parent id, `major:minor`, root within the filesystem, mount
//! point, per-mount options, optional fields up to a `-` separator, then the
//! filesystem type, source and superblock options. Whitespace and backslashes
//! inside fields are written as three-digit octal escapes (`\040` for a
//! space).
//!
//! A bind mount carries the device and root of the mount it was taken from,
//! which is how publishes are tied back to their staging mount.

use std::path::Path;

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fs_type: String,
    pub options: Vec<String>,
    /// `major:minor` of the mounted filesystem
    pub device: String,
    /// Directory of the filesystem that appears at `target`
    pub root: String,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }

    pub fn is_under(&self, root: &Path) -> bool {
        Path::new(&self.target).starts_with(root)
    }

    /// Whether both mounts show the same directory of the same filesystem
    pub fn same_view(&self, other: &MountEntry) -> bool {
        self.device == other.device && self.root == other.root
    }
}

/// Parse mountinfo content, skipping malformed lines
pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let _id = fields.next()?;
    let _parent = fields.next()?;
    let device = fields.next()?;
    let root = fields.next()?;
    let target = fields.next()?;
    let options = fields.next()?;
    // optional fields end at the separator
    fields.by_ref().find(|f| *f == "-")?;
    let fs_type = fields.next()?;
    let source = fields.next()?;

    if !device.contains(':') {
        return None;
    }
    Some(MountEntry {
        source: unescape(source),
        target: unescape(target),
        fs_type: fs_type.to_string(),
        options: options.split(',').map(str::to_string).collect(),
        device: device.to_string(),
        root: unescape(root),
    })
}

/// The most recent mount at `target`; later lines shadow earlier ones
pub fn find_mount<'a>(entries: &'a [MountEntry], target: &Path) -> Option<&'a MountEntry> {
    entries
        .iter()
        .rev()
        .find(|e| Path::new(&e.target) == target)
}

/// Other mounts showing the same view as `staging`, i.e. its bind mounts.
///
/// Separate mounts of one share can share a superblock, so this may include
/// binds of another staging mount of the same share.
pub fn bind_targets<'a>(entries: &'a [MountEntry], staging: &MountEntry) -> Vec<&'a MountEntry> {
    entries
        .iter()
        .filter(|e| e.same_view(staging) && e.target != staging.target)
        .collect()
}

fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 28 0:21 / /sys rw,nosuid,nodev,noexec,relatime shared:7 - sysfs sysfs rw
301 28 0:53 / /var/lib/kubelet/plugins/csi/pv/pvc-a/globalmount rw,relatime shared:150 - cifs //acct.file.core.windows.net/pvc-a rw,vers=3.0
302 28 0:53 / /var/lib/kubelet/pods/p1/volumes/pvc-a/mount ro,relatime shared:150 - cifs //acct.file.core.windows.net/pvc-a rw,vers=3.0
303 28 0:53 /tenant-b /var/lib/kubelet/plugins/csi/pv/pvc-b/globalmount rw,relatime - cifs //acct.file.core.windows.net/pvc-a/tenant-b rw,vers=3.0
304 28 0:53 /tenant-b /var/lib/kubelet/pods/p2/volumes/pvc-b/mount rw,relatime - cifs //acct.file.core.windows.net/pvc-a/tenant-b rw,vers=3.0
310 28 0:60 / /mnt/with\\040space rw shared:9 master:2 - nfs4 acct.file.core.windows.net:/acct/data rw,vers=4.1
truncated-line
12 1 8:1 / /no-separator rw
";

    #[test]
    fn test_parse_and_unescape() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].fs_type, "sysfs");
        assert_eq!(entries[5].target, "/mnt/with space");
        assert_eq!(entries[5].fs_type, "nfs4");
        assert_eq!(entries[5].source, "acct.file.core.windows.net:/acct/data");
        assert_eq!(entries[5].device, "0:60");
        assert_eq!(entries[3].root, "/tenant-b");
        assert!(entries[2].is_read_only());
        assert!(!entries[1].is_read_only());
    }

    #[test]
    fn test_bind_targets_of_staging_mount() {
        let entries = parse_mountinfo(SAMPLE);
        let staging = find_mount(
            &entries,
            Path::new("/var/lib/kubelet/plugins/csi/pv/pvc-a/globalmount"),
        )
        .unwrap();
        assert!(staging.is_under(Path::new("/var/lib/kubelet/plugins")));

        // the sub-directory mount on the same superblock is a different view
        let binds = bind_targets(&entries, staging);
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].target, "/var/lib/kubelet/pods/p1/volumes/pvc-a/mount");

        let sub_dir = find_mount(
            &entries,
            Path::new("/var/lib/kubelet/plugins/csi/pv/pvc-b/globalmount"),
        )
        .unwrap();
        let binds = bind_targets(&entries, sub_dir);
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].target, "/var/lib/kubelet/pods/p2/volumes/pvc-b/mount");

        assert!(find_mount(&entries, Path::new("/not/mounted")).is_none());
    }

    #[test]
    fn test_unescape_leaves_non_octal_alone() {
        assert_eq!(unescape(r"a\134b"), r"a\b");
        assert_eq!(unescape(r"a\9b"), r"a\9b");
        assert_eq!(unescape(r"tail\04"), r"tail\04");
    }
}
