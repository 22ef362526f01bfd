//! Per-identifier request records and request metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count stored by a manual block so no window arithmetic can admit it.
pub const BLOCKED_COUNT_SENTINEL: u64 = u64::MAX;

/// Tracked state for a single identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Requests observed in the current window
    pub count: u64,
    /// Epoch milliseconds at which the current window ends
    pub reset_time: u64,
    /// Whether the identifier is under a block penalty
    pub blocked: bool,
    /// Epoch milliseconds at which the block lifts
    pub block_until: Option<u64>,
    /// Decaying anomaly estimate in `[0, 100]`
    pub suspicion_score: f64,
}

impl RequestRecord {
    /// A record opening a new window at `now`.
    pub fn fresh(now: u64, window_ms: u64, suspicion_score: f64) -> Self {
        Self {
            count: 1,
            reset_time: now.saturating_add(window_ms),
            blocked: false,
            block_until: None,
            suspicion_score,
        }
    }

    /// Whether a block is in force at `now`.
    pub fn is_blocked_at(&self, now: u64) -> bool {
        self.blocked && self.block_until.is_some_and(|until| now < until)
    }

    /// Whether the record carries a block that has already lifted.
    pub fn block_expired_at(&self, now: u64) -> bool {
        self.blocked && !self.is_blocked_at(now)
    }

    /// Start of the window this record is counting in.
    pub fn window_start(&self, window_ms: u64) -> u64 {
        self.reset_time.saturating_sub(window_ms)
    }
}

/// Optional signals about a request, used only for suspicion scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_last_request_ms: Option<u64>,
    /// Any other caller-supplied context
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra: BTreeMap<String, String>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_time_since_last_request_ms(mut self, ms: u64) -> Self {
        self.time_since_last_request_ms = Some(ms);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Fill the fields this metadata lacks from `other`.
    pub fn fill_from(&mut self, other: RequestMetadata) {
        self.user_agent = self.user_agent.take().or(other.user_agent);
        self.path = self.path.take().or(other.path);
        self.time_since_last_request_ms = self
            .time_since_last_request_ms
            .or(other.time_since_last_request_ms);
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
    }

    /// JSON rendering for structured log fields.
    pub fn to_log_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
