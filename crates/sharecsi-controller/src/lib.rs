//! Sharecsi Controller - Share provisioning against the storage provider
//!
//! This crate provides:
//! - Volume create/delete/expand and snapshot verbs
//! - Account filters and least-loaded account selection
//! - On-demand account creation
//! - Paged volume listing and capacity reporting

pub mod filter;
pub mod selection;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use selection::AccountSelector;
pub use service::{ControllerContext, ControllerService};
pub use types::{AccountRequirements, ControllerConfig, FilterResult};
