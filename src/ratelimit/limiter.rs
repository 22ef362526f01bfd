//! Core adaptive rate limiter implementation.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::cache::{RecordCache, DEFAULT_CACHE_CAPACITY};
use super::record::{RequestMetadata, RequestRecord, BLOCKED_COUNT_SENTINEL};
use super::suspicion::{adaptive_limit, SuspicionHeuristics, MAX_SCORE};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, VigilError};

/// Block penalty as a multiple of the window when none is configured.
const DEFAULT_BLOCK_WINDOWS: u32 = 10;

/// Parameters of a single limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Length of the counting window
    pub window: Duration,
    /// Nominal quota per window before suspicion adjustments
    pub max_requests: u64,
    /// Penalty applied once the quota is exceeded
    pub block_duration: Duration,
}

impl LimiterConfig {
    /// Create a config whose block duration is ten windows.
    pub fn new(window: Duration, max_requests: u64) -> Self {
        Self {
            window,
            max_requests,
            block_duration: window.saturating_mul(DEFAULT_BLOCK_WINDOWS),
        }
    }

    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    pub fn window_ms(&self) -> u64 {
        duration_ms(self.window)
    }

    pub fn block_duration_ms(&self) -> u64 {
        duration_ms(self.block_duration)
    }

    /// Lifetime of an idle record in the cache: two windows.
    pub fn cache_ttl_ms(&self) -> u64 {
        self.window_ms().saturating_mul(2)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_ms() == 0 {
            return Err(VigilError::Config("window must be at least 1ms".to_string()));
        }
        if self.max_requests == 0 {
            return Err(VigilError::Config("max_requests must be positive".to_string()));
        }
        if self.block_duration_ms() == 0 {
            return Err(VigilError::Config("block_duration must be at least 1ms".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn retry_after_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    /// Whether the request is admitted
    pub success: bool,
    /// Effective limit applied, nominal or adaptive
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the window (or block) ends
    pub reset: u64,
    /// Seconds to wait before retrying; only set on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    fn admitted(limit: u64, remaining: u64, reset: u64) -> Self {
        Self {
            success: true,
            limit,
            remaining,
            reset,
            retry_after: None,
        }
    }

    fn denied(limit: u64, reset: u64, retry_after: u64) -> Self {
        Self {
            success: false,
            limit,
            remaining: 0,
            reset,
            retry_after: Some(retry_after),
        }
    }
}

/// Per-identifier admission gate with suspicion-driven quotas.
///
/// All record state sits behind one mutex, so each `check` is an atomic
/// read-modify-write and the limiter can be shared across threads.
pub struct AdaptiveRateLimiter {
    /// Policy name used in log events
    name: String,
    config: LimiterConfig,
    heuristics: SuspicionHeuristics,
    clock: Arc<dyn Clock>,
    records: Mutex<RecordCache>,
}

impl AdaptiveRateLimiter {
    /// Create a limiter with the default cache capacity, heuristics and the
    /// system clock.
    pub fn new(name: impl Into<String>, config: LimiterConfig) -> Result<Self> {
        config.validate()?;
        let records = RecordCache::new(DEFAULT_CACHE_CAPACITY, config.cache_ttl_ms());
        Ok(Self {
            name: name.into(),
            config,
            heuristics: SuspicionHeuristics::default(),
            clock: Arc::new(SystemClock),
            records: Mutex::new(records),
        })
    }

    /// Replace the record cache with an empty one bounded to `capacity`.
    pub fn with_capacity(self, capacity: usize) -> Self {
        let records = RecordCache::new(capacity, self.config.cache_ttl_ms());
        Self {
            records: Mutex::new(records),
            ..self
        }
    }

    pub fn with_heuristics(self, heuristics: SuspicionHeuristics) -> Self {
        Self { heuristics, ..self }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Decide whether the request from `identifier` is admitted.
    ///
    /// Never fails; a denial is reported through `success = false`.
    pub fn check(&self, identifier: &str, metadata: Option<&RequestMetadata>) -> RateLimitResult {
        let now = self.clock.now_ms();
        let window_ms = self.config.window_ms();
        let max_requests = self.config.max_requests;

        let mut records = self.records.lock();
        let existing = records.get(identifier, now).cloned();

        trace!(
            policy = %self.name,
            identifier = identifier,
            known = existing.is_some(),
            "Checking rate limit"
        );

        if let Some(record) = existing.as_ref().filter(|r| r.is_blocked_at(now)) {
            let until = record.block_until.unwrap_or(now);
            debug!(
                policy = %self.name,
                identifier = identifier,
                block_until = until,
                "Rejecting blocked identifier"
            );
            return RateLimitResult::denied(max_requests, until, retry_after_secs(until - now));
        }

        let mut record = match existing {
            Some(record) if now < record.reset_time && !record.block_expired_at(now) => record,
            prior => {
                // A lapsed window or block still feeds its decayed score into
                // the new one.
                let score = self
                    .heuristics
                    .score(prior.as_ref(), metadata, &self.config, now);
                let record = RequestRecord::fresh(now, window_ms, score);
                let reset = record.reset_time;
                records.insert(identifier, record, now);

                debug!(
                    policy = %self.name,
                    identifier = identifier,
                    suspicion_score = score,
                    "Starting new rate limit window"
                );
                return RateLimitResult::admitted(
                    max_requests,
                    max_requests.saturating_sub(1),
                    reset,
                );
            }
        };

        record.suspicion_score = self
            .heuristics
            .score(Some(&record), metadata, &self.config, now);
        let limit = adaptive_limit(record.suspicion_score, max_requests);
        record.count = record.count.saturating_add(1);

        let count = record.count;
        let reset = record.reset_time;

        if count > limit {
            let until = now.saturating_add(self.config.block_duration_ms());
            record.blocked = true;
            record.block_until = Some(until);
            let metadata_json = metadata
                .map(RequestMetadata::to_log_value)
                .unwrap_or_default();

            warn!(
                policy = %self.name,
                identifier = identifier,
                suspicion_score = record.suspicion_score,
                count = count,
                adaptive_limit = limit,
                max_requests = max_requests,
                block_until = until,
                metadata = %metadata_json,
                "Suspicious activity detected, blocking identifier"
            );

            records.insert(identifier, record, now);
            return RateLimitResult::denied(
                limit,
                reset,
                retry_after_secs(self.config.block_duration_ms()),
            );
        }

        records.insert(identifier, record, now);
        RateLimitResult::admitted(limit, limit - count, reset)
    }

    /// Block `identifier` for `duration`, or the configured block duration.
    pub fn block(&self, identifier: &str, duration: Option<Duration>) {
        let now = self.clock.now_ms();
        let penalty_ms = duration.map_or(self.config.block_duration_ms(), duration_ms);
        let until = now.saturating_add(penalty_ms);

        let record = RequestRecord {
            count: BLOCKED_COUNT_SENTINEL,
            reset_time: until,
            blocked: true,
            block_until: Some(until),
            suspicion_score: MAX_SCORE,
        };
        self.records.lock().insert(identifier, record, now);

        info!(
            policy = %self.name,
            identifier = identifier,
            block_until = until,
            "Identifier blocked manually"
        );
    }

    /// Forget everything about `identifier`. Returns whether it was tracked.
    pub fn unblock(&self, identifier: &str) -> bool {
        let removed = self.records.lock().remove(identifier).is_some();
        info!(
            policy = %self.name,
            identifier = identifier,
            removed = removed,
            "Identifier unblocked"
        );
        removed
    }

    /// Clear the identifier's window and history. Returns whether it was tracked.
    pub fn reset(&self, identifier: &str) -> bool {
        let removed = self.records.lock().remove(identifier).is_some();
        info!(
            policy = %self.name,
            identifier = identifier,
            removed = removed,
            "Identifier rate limit reset"
        );
        removed
    }

    /// Snapshot of the identifier's record, if one is live.
    pub fn get_status(&self, identifier: &str) -> Option<RequestRecord> {
        let now = self.clock.now_ms();
        self.records.lock().peek(identifier, now).cloned()
    }

    /// Number of records held, including expired ones not yet purged.
    pub fn tracked_identifiers(&self) -> usize {
        self.records.lock().len()
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.records.lock().purge_expired(now)
    }
}

impl std::fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("heuristics", &self.heuristics)
            .finish_non_exhaustive()
    }
}
