//! Configuration management for the compliance loader
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::models::{ComplianceStatus, CopyStatus};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Remote metadata repository
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Reconciliation behavior
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    /// Base URL of the repository REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Identifier of the repository this pipeline deposits into
    #[serde(default = "default_target_repository")]
    pub target_repository_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// How resolution copes with the search index lagging behind writes
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Union search results with identifiers already known to the local caches
    #[default]
    CacheUnion,
    /// Block after every create until the index exposes the new identifier
    ReadAfterWrite,
}

/// One row of the compliance status to copy status table.
///
/// Omitting `copy_status` means the combination never produces a repository copy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StatusMappingEntry {
    pub status: ComplianceStatus,

    /// Whether the record carries a repository-assigned identifier
    pub repository_id: bool,

    #[serde(default)]
    pub copy_status: Option<CopyStatus>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub consistency: ConsistencyMode,

    /// Search attempts before giving up on a read-after-write barrier
    #[serde(default = "default_index_poll_attempts")]
    pub index_poll_attempts: u32,

    /// Delay between barrier attempts in milliseconds
    #[serde(default = "default_index_poll_interval")]
    pub index_poll_interval_ms: u64,

    /// Records reconciled concurrently by the batch runner
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upper bound on time spent retrying one record after transport failures
    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_secs: u64,

    /// Entries added on top of the built-in non-compliant rows
    #[serde(default)]
    pub status_mapping: Vec<StatusMappingEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (e.g. "info", "compliance_loader=debug")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name reported in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_base_url() -> String { "http://localhost:8080/fcrepo/rest".to_string() }
fn default_target_repository() -> String { "http://localhost:8080/fcrepo/rest/repositories/nihms".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_index_poll_attempts() -> u32 { 20 }
fn default_index_poll_interval() -> u64 { 250 }
fn default_concurrency() -> usize { 4 }
fn default_retry_max_elapsed() -> u64 { 120 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }
fn default_service_name() -> String { "compliance-loader".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__REPOSITORY__BASE_URL=http://pass:8080/fcrepo/rest
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.repository.request_timeout_secs)
    }
}

impl ReconcileConfig {
    /// Get barrier poll interval as Duration
    pub fn index_poll_interval(&self) -> Duration {
        Duration::from_millis(self.index_poll_interval_ms)
    }

    /// Get the retry budget as Duration
    pub fn retry_max_elapsed(&self) -> Duration {
        Duration::from_secs(self.retry_max_elapsed_secs)
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            target_repository_id: default_target_repository(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyMode::default(),
            index_poll_attempts: default_index_poll_attempts(),
            index_poll_interval_ms: default_index_poll_interval(),
            concurrency: default_concurrency(),
            retry_max_elapsed_secs: default_retry_max_elapsed(),
            status_mapping: Vec::new(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            reconcile: ReconcileConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
