//! Named limiter policies and the built-in presets.
//!
//! Policies are plain parameterizations of [`AdaptiveRateLimiter`]; each
//! route class a proxy wants to protect differently gets its own name.
//!
//! [`AdaptiveRateLimiter`]: super::AdaptiveRateLimiter

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::limiter::{duration_ms, LimiterConfig};

/// Policy settings as they appear in configuration files.
///
/// ```yaml
/// window_ms: 60000
/// max_requests: 100
/// block_duration_ms: 900000   # optional, defaults to 10 windows
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Nominal requests per window
    pub max_requests: u64,
    /// Block penalty in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_duration_ms: Option<u64>,
}

impl PolicyConfig {
    pub fn to_limiter_config(&self) -> LimiterConfig {
        let config = LimiterConfig::new(Duration::from_millis(self.window_ms), self.max_requests);
        match self.block_duration_ms {
            Some(ms) => config.with_block_duration(Duration::from_millis(ms)),
            None => config,
        }
    }
}

impl From<&LimiterConfig> for PolicyConfig {
    fn from(config: &LimiterConfig) -> Self {
        Self {
            window_ms: config.window_ms(),
            max_requests: config.max_requests,
            block_duration_ms: Some(duration_ms(config.block_duration)),
        }
    }
}

/// Built-in policies for common route classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    /// General API traffic
    Api,
    /// Login and credential endpoints, intentionally strict
    Auth,
    /// Token swap endpoints
    Swap,
    /// Catch-all for everything else
    General,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Preset::Api, Preset::Auth, Preset::Swap, Preset::General];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Api => "api",
            Preset::Auth => "auth",
            Preset::Swap => "swap",
            Preset::General => "general",
        }
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        const MINUTE: Duration = Duration::from_secs(60);

        match self {
            Preset::Api => LimiterConfig::new(MINUTE, 100).with_block_duration(MINUTE * 15),
            Preset::Auth => LimiterConfig::new(MINUTE * 15, 5)
                .with_block_duration(Duration::from_secs(3600)),
            Preset::Swap => LimiterConfig::new(MINUTE, 10).with_block_duration(MINUTE * 5),
            Preset::General => LimiterConfig::new(MINUTE, 200).with_block_duration(MINUTE * 10),
        }
    }
}

/// Name of the policy applied when a request names none.
pub const DEFAULT_POLICY: &str = "general";

/// The built-in presets keyed by name.
pub fn presets() -> BTreeMap<String, PolicyConfig> {
    Preset::ALL
        .into_iter()
        .map(|p| (p.name().to_string(), PolicyConfig::from(&p.limiter_config())))
        .collect()
}
