//! Sharecsi Cloud - Storage provider boundary
//!
//! This crate provides:
//! - The storage account, share and snapshot data model
//! - The `StorageProvider` trait the controller calls into
//! - Error classification and the retry/backoff wrapper
//! - An in-memory provider for development and tests

// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod error;
pub mod memory;
pub mod provider;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use error::{ProviderError, Result};
pub use memory::{InMemoryProvider, ProviderOp};
pub use provider::StorageProvider;
pub use retry::{Disposition, Retrier, RetryError, RetryPolicy};
pub use types::{
    AccountKind, AccountSpec, FileShare, SharePage, ShareSnapshot, ShareSpec, SkuName,
    StorageAccount,
};
