//! Sharecsi Server - HTTP/JSON surface for the CSI verbs
//!
//! This crate provides:
//! - Axum routes for the identity, controller and node verbs
//! - Per-request deadlines
//! - Error to status mapping
//! - The identity service

pub mod error;
pub mod handlers;
pub mod identity;
pub mod server;
pub mod state;

// Re-export commonly used types
pub use error::{ApiError, Result};
pub use identity::IdentityService;
pub use server::{Config, CsiServer};
pub use state::AppState;
