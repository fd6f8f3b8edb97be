// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use crate::retry::{Disposition, RetryError};
use miette::Diagnostic;
use sharecsi_core::CsiError;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a storage provider
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum ProviderError {
    /// Request was rate limited
    #[error("{operation} was throttled by the storage provider")]
    #[diagnostic(
        code(sharecsi::cloud::throttled),
        help("Too many requests against the subscription; the call is retried with backoff")
    )]
    Throttled {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        retry_after: Option<Duration>,
    },

    /// Request timed out before the provider answered
    #[error("{operation} timed out")]
    #[diagnostic(code(sharecsi::cloud::timeout))]
    Timeout {
        #[allow(unused)]
        operation: String,
    },

    /// Connection reset, DNS hiccup and similar network failures
    #[error("{operation} failed with a transient network error: {message}")]
    #[diagnostic(code(sharecsi::cloud::transient))]
    Transient {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    /// Provider returned a 5xx status
    #[error("{operation} failed with server error {status}: {message}")]
    #[diagnostic(code(sharecsi::cloud::server_error))]
    ServerError {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// Credentials rejected or missing permissions
    #[error("{operation} is not authorized: {message}")]
    #[diagnostic(
        code(sharecsi::cloud::unauthorized),
        help("Check that the driver identity has contributor rights on the storage accounts")
    )]
    Unauthorized {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    /// Resource does not exist
    #[error("{resource} not found")]
    #[diagnostic(code(sharecsi::cloud::not_found))]
    NotFound {
        #[allow(unused)]
        resource: String,
    },

    /// Resource with the same name exists
    #[error("{resource} already exists")]
    #[diagnostic(code(sharecsi::cloud::already_exists))]
    AlreadyExists {
        #[allow(unused)]
        resource: String,
    },

    /// Permanent quota limit reached
    #[error("Quota exceeded for {resource}: {message}")]
    #[diagnostic(
        code(sharecsi::cloud::quota_exceeded),
        help("Raise the subscription quota or allow the driver to create a new account")
    )]
    QuotaExceeded {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        message: String,
    },

    /// Storage account names are global; someone else holds this one
    #[error("Storage account name {name} is already taken")]
    #[diagnostic(code(sharecsi::cloud::account_name_taken))]
    AccountNameTaken {
        #[allow(unused)]
        name: String,
    },

    /// Request rejected as invalid
    #[error("Invalid request: {message}")]
    #[diagnostic(code(sharecsi::cloud::invalid_request))]
    InvalidRequest {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for provider calls
pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn throttled(operation: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Throttled {
            operation: operation.into(),
            retry_after,
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn server_error(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn quota_exceeded(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn account_name_taken(name: impl Into<String>) -> Self {
        Self::AccountNameTaken { name: name.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Classify for the retry wrapper
    pub fn disposition(&self) -> Disposition {
        match self {
            ProviderError::Throttled {
                retry_after: Some(after),
                ..
            } => Disposition::RetryAfter(*after),
            ProviderError::Throttled { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::Transient { .. }
            | ProviderError::ServerError { .. } => Disposition::Transient,
            _ => Disposition::Terminal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ProviderError::AlreadyExists { .. })
    }

    /// Convert into the status-bearing error, tagging it with the operation
    pub fn into_csi(self, operation: &str) -> CsiError {
        match self {
            ProviderError::NotFound { resource } => CsiError::not_found(resource),
            ProviderError::AlreadyExists { resource } => {
                CsiError::already_exists(resource, "name is already in use")
            }
            ProviderError::InvalidRequest { message } => CsiError::invalid_argument(message),
            other => CsiError::provider_failure(operation, other.to_string()),
        }
    }
}

impl From<RetryError<ProviderError>> for CsiError {
    fn from(err: RetryError<ProviderError>) -> Self {
        match err {
            RetryError::Terminal { operation, error } => error.into_csi(&operation),
            RetryError::Exhausted {
                operation,
                attempts,
                last,
            } => CsiError::deadline_exceeded(
                operation,
                format!("gave up after {} attempts: {}", attempts, last),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharecsi_core::StatusKind;

    #[test]
    fn test_classification() {
        assert_eq!(
            ProviderError::timeout("create_share").disposition(),
            Disposition::Transient
        );
        assert_eq!(
            ProviderError::server_error("create_share", 503, "busy").disposition(),
            Disposition::Transient
        );
        assert_eq!(
            ProviderError::throttled("list_accounts", Some(Duration::from_secs(3))).disposition(),
            Disposition::RetryAfter(Duration::from_secs(3))
        );
        assert_eq!(
            ProviderError::unauthorized("create_share", "403").disposition(),
            Disposition::Terminal
        );
        assert_eq!(
            ProviderError::quota_exceeded("acct", "share limit").disposition(),
            Disposition::Terminal
        );
        assert_eq!(
            ProviderError::not_found("share x").disposition(),
            Disposition::Terminal
        );
    }

    #[test]
    fn test_conversion_to_status() {
        let err: CsiError = RetryError::Exhausted {
            operation: "create_share".to_string(),
            attempts: 5,
            last: ProviderError::timeout("create_share"),
        }
        .into();
        assert_eq!(err.status_kind(), StatusKind::DeadlineExceeded);

        let err: CsiError = RetryError::Terminal {
            operation: "delete_share".to_string(),
            error: ProviderError::unauthorized("delete_share", "denied"),
        }
        .into();
        assert_eq!(err.status_kind(), StatusKind::Internal);
        assert!(err.to_string().contains("delete_share"));
    }
}
