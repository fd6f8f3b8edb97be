use miette::Diagnostic;
use sharecsi_cloud::Disposition;
use sharecsi_core::CsiError;
use thiserror::Error;

/// Error type for host mount and secret operations
#[derive(Error, Debug, Diagnostic)]
pub enum NodeError {
    /// Mount or unmount failed
    #[error("Mount operation on '{target}' failed: {message}")]
    #[diagnostic(
        code(sharecsi::node::mount_failed),
        help("Check that the share endpoint resolves from this node and that the mount helper for the protocol (mount.cifs or mount.nfs) is installed")
    )]
    MountFailed {
        #[allow(unused)]
        target: String,
        #[allow(unused)]
        message: String,
    },

    /// Mount table could not be read
    #[error("Failed to read mount table: {message}")]
    #[diagnostic(
        code(sharecsi::node::mount_table),
        help("Verify /proc/self/mountinfo is readable by the plugin process")
    )]
    MountTable {
        #[allow(unused)]
        message: String,
    },

    /// Local filesystem operation failed
    #[error("Filesystem operation on '{path}' failed: {message}")]
    #[diagnostic(
        code(sharecsi::node::io_error),
        help("Check that the path is on a writable filesystem and the plugin runs with sufficient privileges")
    )]
    Io {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Secret not present in the store
    #[error("Secret {namespace}/{name} not found")]
    #[diagnostic(
        code(sharecsi::node::secret_not_found),
        help("Create the secret with keys azurestorageaccountname and azurestorageaccountkey, or set secretName/secretNamespace in the storage class")
    )]
    SecretNotFound {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
    },

    /// Secret present but unusable
    #[error("Secret {namespace}/{name} is invalid: {message}")]
    #[diagnostic(
        code(sharecsi::node::invalid_secret),
        help("The secret must carry a non-empty azurestorageaccountkey")
    )]
    InvalidSecret {
        #[allow(unused)]
        namespace: String,
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// Secret store unreachable
    #[error("Secret lookup failed: {message}")]
    #[diagnostic(
        code(sharecsi::node::secret_lookup),
        help("Verify the orchestrator API URL and that the node service account may read secrets")
    )]
    SecretLookup {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Fragments of mount helper output that indicate a condition worth retrying
const TRANSIENT_MOUNT_MARKERS: &[&str] = &[
    "could not resolve address",
    "name or service not known",
    "temporary failure in name resolution",
    "host is down",
    "no route to host",
    "connection timed out",
    "connection refused",
    "resource temporarily unavailable",
    "eagain",
];

impl NodeError {
    pub fn mount_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MountFailed {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn mount_table(message: impl Into<String>) -> Self {
        Self::MountTable {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn secret_not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::SecretNotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn invalid_secret(
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidSecret {
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn secret_lookup(message: impl Into<String>) -> Self {
        Self::SecretLookup {
            message: message.into(),
        }
    }

    /// Classify a mount failure for the retry wrapper
    pub fn disposition(&self) -> Disposition {
        let NodeError::MountFailed { message, .. } = self else {
            return Disposition::Terminal;
        };
        let text = message.to_ascii_lowercase();
        if TRANSIENT_MOUNT_MARKERS.iter().any(|m| text.contains(m)) {
            Disposition::Transient
        } else {
            Disposition::Terminal
        }
    }

    /// Convert into the status-bearing error for a verb acting on `target`
    pub fn into_csi(self, target: &str) -> CsiError {
        match self {
            NodeError::SecretNotFound { namespace, name } => {
                CsiError::invalid_argument(format!("secret {}/{} not found", namespace, name))
            }
            NodeError::InvalidSecret { .. } => CsiError::invalid_argument(self.to_string()),
            NodeError::MountFailed { message, .. } => CsiError::mount_failure(target, message),
            other => CsiError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharecsi_core::StatusKind;

    #[test]
    fn test_transient_mount_errors() {
        let dns = NodeError::mount_failed(
            "/staging/a",
            "mount error: could not resolve address for acct.file.core.windows.net",
        );
        assert_eq!(dns.disposition(), Disposition::Transient);

        let denied = NodeError::mount_failed("/staging/a", "mount error(13): Permission denied");
        assert_eq!(denied.disposition(), Disposition::Terminal);

        let again = NodeError::mount_failed("/staging", "Resource temporarily unavailable");
        assert_eq!(again.disposition(), Disposition::Transient);

        assert_eq!(
            NodeError::secret_not_found("default", "s").disposition(),
            Disposition::Terminal
        );
    }

    #[test]
    fn test_into_csi() {
        let err = NodeError::mount_failed("/staging/a", "mount error(13): Permission denied")
            .into_csi("/staging/a");
        assert_eq!(err.status_kind(), StatusKind::Internal);
        assert!(err.to_string().contains("Permission denied"));

        let err = NodeError::secret_not_found("default", "azure-secret").into_csi("/staging/a");
        assert_eq!(err.status_kind(), StatusKind::InvalidArgument);
    }
}
