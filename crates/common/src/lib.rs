//! Compliance Loader Common Library
//!
//! Shared code for the compliance loader including:
//! - Repository entity models
//! - Repository gateway abstraction (HTTP and in-memory)
//! - Lookup caches
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use cache::LookupCaches;
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use gateway::{GatewayExt, RepositoryGateway};
pub use models::{Entity, EntityId, EntityKind, Resource};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
