//! Tracking of request cadence per identifier.

use dashmap::DashMap;
use std::time::Duration;

use super::limiter::duration_ms;

/// Records when each identifier was last seen under each policy so the
/// time since its previous request can be fed into suspicion scoring.
///
/// Envoy issues one call per domain for the same HTTP request, so timing
/// is kept per policy; otherwise the second domain always looks rapid.
#[derive(Debug, Default)]
pub struct CadenceTracker {
    last_seen: DashMap<(String, String), u64>,
}

impl CadenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request at `now` and return the milliseconds since the
    /// identifier's previous request under `policy`, if it had one.
    pub fn observe(&self, policy: &str, identifier: &str, now: u64) -> Option<u64> {
        let key = (policy.to_string(), identifier.to_string());
        let previous = self.last_seen.insert(key, now)?;
        Some(now.saturating_sub(previous))
    }

    /// Forget identifiers not seen within `retention` of `now`.
    pub fn prune(&self, now: u64, retention: Duration) -> usize {
        let cutoff = now.saturating_sub(duration_ms(retention));
        let before = self.last_seen.len();
        self.last_seen.retain(|_, seen| *seen >= cutoff);
        before.saturating_sub(self.last_seen.len())
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
