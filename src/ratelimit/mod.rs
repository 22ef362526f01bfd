//! Adaptive rate limiting logic and state management.

mod cache;
mod cadence;
mod descriptor;
mod limiter;
mod policy;
mod record;
mod registry;
mod suspicion;

pub use cache::{RecordCache, DEFAULT_CACHE_CAPACITY};
pub use cadence::CadenceTracker;
pub use descriptor::{AdmissionRequest, UNKNOWN_IDENTIFIER};
pub use limiter::{AdaptiveRateLimiter, LimiterConfig, RateLimitResult};
pub use policy::{presets, PolicyConfig, Preset, DEFAULT_POLICY};
pub use record::{RequestMetadata, RequestRecord, BLOCKED_COUNT_SENTINEL};
pub use registry::RateLimiterRegistry;
pub use suspicion::{adaptive_limit, default_probe_patterns, SuspicionHeuristics, MAX_SCORE};
