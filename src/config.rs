//! Barrel Configuration
//!
//! This module provides configuration structures for the Barrel
//! key-value store and its HTTP surfaces.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main Barrel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrelConfig {
    /// Storage engine configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Load balancer configuration
    #[serde(default)]
    pub balancer: BalancerConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory for the active log and sealed segments
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Active log size in bytes past which it is sealed into a segment
    #[serde(default = "default_segment_limit")]
    pub segment_limit: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Load balancer bind address
    #[serde(default = "default_balancer_address")]
    pub bind_address: String,

    /// Backend API addresses (host:port)
    #[serde(default)]
    pub backends: Vec<String>,

    /// Seconds between health probes of each backend
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Timeout in seconds for forwarded requests and health probes
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Include an `lb-from` header identifying the chosen backend
    #[serde(default)]
    pub trace_enabled: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/barrel")
}

fn default_segment_limit() -> u64 {
    10 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_balancer_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_health_interval_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    3
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            segment_limit: default_segment_limit(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_balancer_address(),
            backends: Vec::new(),
            health_interval_secs: default_health_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            trace_enabled: false,
        }
    }
}

impl BarrelConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BarrelConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: BarrelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.store.segment_limit == 0 {
            return Err(crate::Error::Config(
                "store.segment_limit must be greater than zero".into(),
            ));
        }

        if self.api.bind_address.is_empty() {
            return Err(crate::Error::Config(
                "api.bind_address cannot be empty".into(),
            ));
        }

        if self.balancer.bind_address.is_empty() {
            return Err(crate::Error::Config(
                "balancer.bind_address cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Validate the parts required to run the balancer
    pub fn validate_balancer(&self) -> crate::Result<()> {
        if self.balancer.backends.is_empty() {
            return Err(crate::Error::Config(
                "balancer.backends cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Get health probe interval as Duration
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.balancer.health_interval_secs)
    }

    /// Get forwarding timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.balancer.request_timeout_secs)
    }
}
