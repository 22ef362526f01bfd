//! Registry of per-policy limiters owned by the composition root.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::limiter::AdaptiveRateLimiter;
use super::policy::{presets, PolicyConfig};
use super::suspicion::SuspicionHeuristics;
use crate::clock::Clock;
use crate::config::LimiterSettings;
use crate::error::{Result, VigilError};

/// One [`AdaptiveRateLimiter`] per named policy.
///
/// Built once at startup and shared by `Arc` with every request handler.
pub struct RateLimiterRegistry {
    limiters: HashMap<String, Arc<AdaptiveRateLimiter>>,
    default_policy: String,
}

impl RateLimiterRegistry {
    /// Build a limiter for every policy, sharing `clock` between them.
    pub fn from_settings(
        policies: &BTreeMap<String, PolicyConfig>,
        settings: &LimiterSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !policies.contains_key(&settings.default_policy) {
            return Err(VigilError::Config(format!(
                "default policy '{}' is not defined",
                settings.default_policy
            )));
        }
        if settings.cache_capacity == 0 {
            return Err(VigilError::Config("cache_capacity must be positive".to_string()));
        }

        let heuristics = SuspicionHeuristics::new(&settings.probe_patterns);
        let mut limiters = HashMap::with_capacity(policies.len());

        for (name, policy) in policies {
            let config = policy.to_limiter_config();
            let limiter = AdaptiveRateLimiter::new(name.clone(), config)
                .map_err(|e| VigilError::Config(format!("policy '{}': {}", name, e)))?
                .with_capacity(settings.cache_capacity)
                .with_heuristics(heuristics.clone())
                .with_clock(Arc::clone(&clock));

            debug!(
                policy = %name,
                window_ms = policy.window_ms,
                max_requests = policy.max_requests,
                "Registered rate limit policy"
            );
            limiters.insert(name.clone(), Arc::new(limiter));
        }

        info!(
            policies = limiters.len(),
            default_policy = %settings.default_policy,
            "Rate limiter registry initialized"
        );

        Ok(Self {
            limiters,
            default_policy: settings.default_policy.clone(),
        })
    }

    /// Registry holding the built-in presets with default settings.
    pub fn with_presets(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::from_settings(&presets(), &LimiterSettings::default(), clock)
    }

    pub fn get(&self, policy: &str) -> Option<Arc<AdaptiveRateLimiter>> {
        self.limiters.get(policy).cloned()
    }

    /// The limiter for `policy`, or the default policy's when unknown.
    pub fn resolve(&self, policy: &str) -> Arc<AdaptiveRateLimiter> {
        match self.limiters.get(policy) {
            Some(limiter) => Arc::clone(limiter),
            None => {
                debug!(
                    policy = %policy,
                    default_policy = %self.default_policy,
                    "Unknown policy, using default"
                );
                Arc::clone(&self.limiters[&self.default_policy])
            }
        }
    }

    pub fn default_policy(&self) -> &str {
        &self.default_policy
    }

    /// Policy names in sorted order.
    pub fn policy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop expired records from every limiter. Returns the total removed.
    pub fn purge_expired(&self) -> usize {
        self.limiters.values().map(|l| l.purge_expired()).sum()
    }
}
