//! Configuration management for Vigil.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `VIGIL__`-prefixed environment variables
//! (e.g. `VIGIL__SERVER__GRPC_ADDR=0.0.0.0:8081`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, VigilError};
use crate::ratelimit::{
    default_probe_patterns, presets, PolicyConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_POLICY,
};

/// Main configuration for the Vigil service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Settings shared by every limiter
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Named policies; replaces the built-in presets when given
    #[serde(default = "presets")]
    pub policies: BTreeMap<String, PolicyConfig>,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limiter: LimiterSettings::default(),
            policies: presets(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Settings shared by every limiter in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Maximum identifiers tracked per policy
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Policy used for unknown or empty domains
    #[serde(default = "default_policy")]
    pub default_policy: String,

    /// Path fragments treated as probing
    #[serde(default = "default_probe_patterns")]
    pub probe_patterns: Vec<String>,

    /// How long request cadence is remembered per identifier, in seconds
    #[serde(default = "default_cadence_retention")]
    pub cadence_retention_secs: u64,

    /// Interval between expired-record sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            default_policy: default_policy(),
            probe_patterns: default_probe_patterns(),
            cadence_retention_secs: default_cadence_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl LimiterSettings {
    pub fn cadence_retention(&self) -> Duration {
        Duration::from_secs(self.cadence_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_policy() -> String {
    DEFAULT_POLICY.to_string()
}

fn default_cadence_retention() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

impl VigilConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: VigilConfig = serde_yaml::from_str(yaml)
            .map_err(|e| VigilError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `VIGIL__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            let name = path
                .to_str()
                .ok_or_else(|| VigilError::Config("configuration path is not UTF-8".to_string()))?;
            builder = builder.add_source(::config::File::new(name, ::config::FileFormat::Yaml));
        }

        let config: VigilConfig = builder
            .add_source(
                ::config::Environment::with_prefix("VIGIL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.cache_capacity == 0 {
            return Err(VigilError::Config("cache_capacity must be positive".to_string()));
        }
        if self.limiter.sweep_interval_secs == 0 {
            return Err(VigilError::Config("sweep_interval_secs must be positive".to_string()));
        }
        if !self.policies.contains_key(&self.limiter.default_policy) {
            return Err(VigilError::Config(format!(
                "default policy '{}' is not defined",
                self.limiter.default_policy
            )));
        }
        for (name, policy) in &self.policies {
            policy
                .to_limiter_config()
                .validate()
                .map_err(|e| VigilError::Config(format!("policy '{}': {}", name, e)))?;
        }
        Ok(())
    }
}
