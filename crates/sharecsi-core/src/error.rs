// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status kind reported back to the orchestrator for every verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    Ok,
    InvalidArgument,
    AlreadyExists,
    NotFound,
    Aborted,
    DeadlineExceeded,
    VolumeInUse,
    FailedPrecondition,
    Internal,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Ok => "Ok",
            StatusKind::InvalidArgument => "InvalidArgument",
            StatusKind::AlreadyExists => "AlreadyExists",
            StatusKind::NotFound => "NotFound",
            StatusKind::Aborted => "Aborted",
            StatusKind::DeadlineExceeded => "DeadlineExceeded",
            StatusKind::VolumeInUse => "VolumeInUse",
            StatusKind::FailedPrecondition => "FailedPrecondition",
            StatusKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// The (kind, message) pair returned by every verb
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            kind: StatusKind::Ok,
            message: String::new(),
        }
    }
}

impl From<&CsiError> for Status {
    fn from(err: &CsiError) -> Self {
        Self {
            kind: err.status_kind(),
            message: err.to_string(),
        }
    }
}

/// Error type shared by the controller and node services
#[derive(Error, Debug, Diagnostic)]
pub enum CsiError {
    /// A request field is missing or has an unusable value
    #[error("Invalid argument: {message}")]
    #[diagnostic(
        code(sharecsi::invalid_argument),
        help("Check the request fields and storage class parameters")
    )]
    InvalidArgument {
        #[allow(unused)]
        message: String,
    },

    /// Volume or snapshot handle could not be decoded
    #[error("Malformed handle '{handle}': {reason}")]
    #[diagnostic(
        code(sharecsi::malformed_handle),
        help("Handles are produced by CreateVolume/CreateSnapshot and must be passed back unmodified")
    )]
    MalformedHandle {
        #[allow(unused)]
        handle: String,
        #[allow(unused)]
        reason: String,
    },

    /// An explicitly requested account does not satisfy the volume's constraints
    #[error("Storage account {account} does not satisfy constraints: {reason}")]
    #[diagnostic(
        code(sharecsi::constraint_violation),
        help("Pick an account whose SKU, kind, region and protocol support match the parameters, or omit storageAccount")
    )]
    ConstraintViolation {
        #[allow(unused)]
        account: String,
        #[allow(unused)]
        reason: String,
    },

    /// A resource with the same name exists with incompatible properties
    #[error("{resource} already exists with incompatible properties: {reason}")]
    #[diagnostic(
        code(sharecsi::already_exists),
        help("Use a different volume name or delete the existing resource first")
    )]
    AlreadyExistsConflict {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        reason: String,
    },

    /// Resource does not exist
    #[error("Not found: {resource}")]
    #[diagnostic(
        code(sharecsi::not_found),
        help("Verify the volume handle refers to an existing share")
    )]
    NotFound {
        #[allow(unused)]
        resource: String,
    },

    /// Another operation currently holds the resource
    #[error("Operation {operation} on {key} aborted: another operation is in progress")]
    #[diagnostic(
        code(sharecsi::aborted),
        help("The orchestrator retries this call once the concurrent operation finishes")
    )]
    Aborted {
        #[allow(unused)]
        key: String,
        #[allow(unused)]
        operation: String,
    },

    /// The retry budget or request deadline was used up
    #[error("Deadline exceeded for {operation}: {message}")]
    #[diagnostic(
        code(sharecsi::deadline_exceeded),
        help("The storage provider is throttling or unreachable; the call will be retried")
    )]
    DeadlineExceeded {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    /// Staging mount still referenced by publish bind-mounts
    #[error("Volume {volume_id} is still published at {publishes} target(s)")]
    #[diagnostic(
        code(sharecsi::volume_in_use),
        help("Unpublish the volume from every pod before unstaging it")
    )]
    VolumeInUse {
        #[allow(unused)]
        volume_id: String,
        #[allow(unused)]
        publishes: usize,
    },

    /// Publish was attempted before the volume was staged
    #[error("Volume {volume_id} is not staged at {staging_path}")]
    #[diagnostic(
        code(sharecsi::not_staged),
        help("NodeStageVolume must succeed before NodePublishVolume")
    )]
    NotStaged {
        #[allow(unused)]
        volume_id: String,
        #[allow(unused)]
        staging_path: String,
    },

    /// Mount or unmount failed on the node
    #[error("Mount operation failed for {target}: {message}")]
    #[diagnostic(
        code(sharecsi::mount_failure),
        help("Check that the share endpoint is reachable and mount helpers (mount.cifs, mount.nfs) are installed")
    )]
    MountFailure {
        #[allow(unused)]
        target: String,
        #[allow(unused)]
        message: String,
    },

    /// Storage provider failure that is not retryable
    #[error("Storage provider call {operation} failed: {message}")]
    #[diagnostic(
        code(sharecsi::provider_error),
        help("Check the provider credentials, quotas and the resource names in the error")
    )]
    ProviderFailure {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(sharecsi::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    Internal {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for volume operations
pub type Result<T> = std::result::Result<T, CsiError>;

impl CsiError {
    /// Map this error onto the status kind returned to the orchestrator
    pub fn status_kind(&self) -> StatusKind {
        match self {
            CsiError::InvalidArgument { .. }
            | CsiError::MalformedHandle { .. }
            | CsiError::ConstraintViolation { .. } => StatusKind::InvalidArgument,
            CsiError::AlreadyExistsConflict { .. } => StatusKind::AlreadyExists,
            CsiError::NotFound { .. } => StatusKind::NotFound,
            CsiError::Aborted { .. } => StatusKind::Aborted,
            CsiError::DeadlineExceeded { .. } => StatusKind::DeadlineExceeded,
            CsiError::VolumeInUse { .. } => StatusKind::VolumeInUse,
            CsiError::NotStaged { .. } => StatusKind::FailedPrecondition,
            CsiError::MountFailure { .. }
            | CsiError::ProviderFailure { .. }
            | CsiError::Internal { .. } => StatusKind::Internal,
        }
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a MalformedHandle error
    pub fn malformed_handle(handle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedHandle {
            handle: handle.into(),
            reason: reason.into(),
        }
    }

    /// Create a ConstraintViolation error
    pub fn constraint_violation(account: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            account: account.into(),
            reason: reason.into(),
        }
    }

    /// Create an AlreadyExistsConflict error
    pub fn already_exists(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AlreadyExistsConflict {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an Aborted error
    pub fn aborted(key: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Aborted {
            key: key.into(),
            operation: operation.into(),
        }
    }

    /// Create a DeadlineExceeded error
    pub fn deadline_exceeded(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a VolumeInUse error
    pub fn volume_in_use(volume_id: impl Into<String>, publishes: usize) -> Self {
        Self::VolumeInUse {
            volume_id: volume_id.into(),
            publishes,
        }
    }

    /// Create a NotStaged error
    pub fn not_staged(volume_id: impl Into<String>, staging_path: impl Into<String>) -> Self {
        Self::NotStaged {
            volume_id: volume_id.into(),
            staging_path: staging_path.into(),
        }
    }

    /// Create a MountFailure error
    pub fn mount_failure(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MountFailure {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a ProviderFailure error
    pub fn provider_failure(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
