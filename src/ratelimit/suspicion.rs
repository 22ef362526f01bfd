//! Suspicion scoring and the adaptive quota derived from it.
//!
//! A score in `[0, 100]` accumulates penalties for bot-like request
//! signals, decays linearly across the window, and maps onto a shrinking
//! fraction of the nominal quota.

use super::limiter::LimiterConfig;
use super::record::{RequestMetadata, RequestRecord};

pub const MAX_SCORE: f64 = 100.0;

/// Share of `max_requests` above which the count itself is suspicious.
const FREQUENCY_PRESSURE_RATIO: f64 = 0.8;
const FREQUENCY_PRESSURE_PENALTY: f64 = 20.0;

const MIN_USER_AGENT_LEN: usize = 10;
const USER_AGENT_PENALTY: f64 = 15.0;

const PROBE_PATH_PENALTY: f64 = 30.0;

const RAPID_CADENCE_MS: u64 = 100;
const RAPID_CADENCE_PENALTY: f64 = 25.0;

/// Path fragments that mark admin or exploit probing.
pub fn default_probe_patterns() -> Vec<String> {
    vec!["admin".to_string(), "wp-".to_string()]
}

/// Behavioral heuristics feeding the suspicion score.
#[derive(Debug, Clone)]
pub struct SuspicionHeuristics {
    /// Lowercased substrings matched against request paths
    probe_patterns: Vec<String>,
}

impl Default for SuspicionHeuristics {
    fn default() -> Self {
        Self::new(default_probe_patterns())
    }
}

impl SuspicionHeuristics {
    pub fn new<I, S>(probe_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            probe_patterns: probe_patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn probe_patterns(&self) -> &[String] {
        &self.probe_patterns
    }

    /// Whether `path` contains any probe pattern, ignoring case.
    pub fn is_probe_path(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.probe_patterns.iter().any(|p| path.contains(p.as_str()))
    }

    /// Compute the updated suspicion score for a request.
    ///
    /// Starts from the existing record's score, adds penalties, applies the
    /// linear window decay when a record exists, then clamps to `[0, 100]`.
    /// When `metadata` is `None` only the frequency signal is considered.
    pub fn score(
        &self,
        existing: Option<&RequestRecord>,
        metadata: Option<&RequestMetadata>,
        config: &LimiterConfig,
        now: u64,
    ) -> f64 {
        let mut score = existing.map_or(0.0, |r| r.suspicion_score);

        if let Some(record) = existing {
            if record.count as f64 > config.max_requests as f64 * FREQUENCY_PRESSURE_RATIO {
                score += FREQUENCY_PRESSURE_PENALTY;
            }
        }

        if let Some(metadata) = metadata {
            let short_agent = metadata
                .user_agent
                .as_deref()
                .map_or(true, |ua| ua.chars().count() < MIN_USER_AGENT_LEN);
            if short_agent {
                score += USER_AGENT_PENALTY;
            }

            if metadata.path.as_deref().is_some_and(|p| self.is_probe_path(p)) {
                score += PROBE_PATH_PENALTY;
            }

            if metadata
                .time_since_last_request_ms
                .is_some_and(|ms| ms < RAPID_CADENCE_MS)
            {
                score += RAPID_CADENCE_PENALTY;
            }
        }

        if let Some(record) = existing {
            score *= decay_factor(record, config.window_ms(), now);
        }

        score.clamp(0.0, MAX_SCORE)
    }
}

/// Linear decay across the record's window: 1 at its start, 0 at its end.
fn decay_factor(record: &RequestRecord, window_ms: u64, now: u64) -> f64 {
    if window_ms == 0 {
        return 0.0;
    }
    let elapsed = now.saturating_sub(record.window_start(window_ms));
    (1.0 - elapsed as f64 / window_ms as f64).max(0.0)
}

/// Effective quota for a given suspicion score.
///
/// Boundary scores fall into the lower-suspicion bracket.
pub fn adaptive_limit(score: f64, max_requests: u64) -> u64 {
    let fraction = if score > 80.0 {
        0.2
    } else if score > 60.0 {
        0.5
    } else if score > 40.0 {
        0.75
    } else {
        return max_requests;
    };

    (max_requests as f64 * fraction).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(max_requests: u64) -> LimiterConfig {
        LimiterConfig::new(Duration::from_secs(60), max_requests)
    }

    fn clean() -> RequestMetadata {
        RequestMetadata::new()
            .with_user_agent("Mozilla/5.0 (X11; Linux x86_64)")
            .with_path("/api/markets")
            .with_time_since_last_request_ms(2_000)
    }

    fn record(count: u64, reset_time: u64, score: f64) -> RequestRecord {
        RequestRecord {
            count,
            reset_time,
            blocked: false,
            block_until: None,
            suspicion_score: score,
        }
    }

    #[test]
    fn test_clean_fresh_request_scores_zero() {
        let heuristics = SuspicionHeuristics::default();
        let score = heuristics.score(None, Some(&clean()), &config(100), 0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_missing_metadata_adds_no_penalty() {
        let heuristics = SuspicionHeuristics::default();
        assert_eq!(heuristics.score(None, None, &config(100), 0), 0.0);
    }

    #[test]
    fn test_individual_penalties() {
        let heuristics = SuspicionHeuristics::default();
        let cfg = config(100);

        let no_agent = RequestMetadata::new();
        assert_eq!(heuristics.score(None, Some(&no_agent), &cfg, 0), 15.0);

        let short_agent = clean().with_user_agent("curl/8");
        assert_eq!(heuristics.score(None, Some(&short_agent), &cfg, 0), 15.0);

        let probe = clean().with_path("/WP-admin/setup.php");
        assert_eq!(heuristics.score(None, Some(&probe), &cfg, 0), 30.0);

        let rapid = clean().with_time_since_last_request_ms(99);
        assert_eq!(heuristics.score(None, Some(&rapid), &cfg, 0), 25.0);

        let borderline = clean().with_time_since_last_request_ms(100);
        assert_eq!(heuristics.score(None, Some(&borderline), &cfg, 0), 0.0);
    }

    #[test]
    fn test_all_penalties_clamp_to_max() {
        let heuristics = SuspicionHeuristics::default();
        let cfg = config(10);
        let hostile = RequestMetadata::new()
            .with_user_agent("bot")
            .with_path("/admin")
            .with_time_since_last_request_ms(5);

        // Window just opened, so decay keeps nearly everything
        let existing = record(9, 60_000, 90.0);
        let score = heuristics.score(Some(&existing), Some(&hostile), &cfg, 1);
        assert_eq!(score, MAX_SCORE);
    }

    #[test]
    fn test_frequency_pressure_needs_strictly_more_than_80_percent() {
        let heuristics = SuspicionHeuristics::default();
        let cfg = config(10);

        let at_threshold = record(8, 60_000, 0.0);
        assert_eq!(heuristics.score(Some(&at_threshold), None, &cfg, 0), 0.0);

        let over_threshold = record(9, 60_000, 0.0);
        assert_eq!(heuristics.score(Some(&over_threshold), None, &cfg, 0), 20.0);
    }

    #[test]
    fn test_decay_is_linear_over_the_window() {
        let heuristics = SuspicionHeuristics::default();
        let cfg = config(100);
        // Window [0, 60_000)
        let existing = record(1, 60_000, 80.0);

        let half = heuristics.score(Some(&existing), Some(&clean()), &cfg, 30_000);
        assert!((half - 40.0).abs() < 1e-9);

        let end = heuristics.score(Some(&existing), Some(&clean()), &cfg, 60_000);
        assert_eq!(end, 0.0);

        let past = heuristics.score(Some(&existing), Some(&clean()), &cfg, 90_000);
        assert_eq!(past, 0.0);
    }

    #[test]
    fn test_custom_probe_patterns() {
        let heuristics = SuspicionHeuristics::new(["/.env", "", "PHPMYADMIN"]);
        assert_eq!(heuristics.probe_patterns().len(), 2);
        assert!(heuristics.is_probe_path("/.env"));
        assert!(heuristics.is_probe_path("/phpMyAdmin/index.php"));
        assert!(!heuristics.is_probe_path("/admin"));
    }

    #[test]
    fn test_adaptive_limit_brackets() {
        assert_eq!(adaptive_limit(0.0, 100), 100);
        assert_eq!(adaptive_limit(40.0, 100), 100);
        assert_eq!(adaptive_limit(40.5, 100), 75);
        assert_eq!(adaptive_limit(60.0, 100), 75);
        assert_eq!(adaptive_limit(61.0, 100), 50);
        assert_eq!(adaptive_limit(80.0, 100), 50);
        assert_eq!(adaptive_limit(80.1, 100), 20);
        assert_eq!(adaptive_limit(100.0, 100), 20);
    }

    #[test]
    fn test_adaptive_limit_floors() {
        assert_eq!(adaptive_limit(90.0, 5), 1);
        assert_eq!(adaptive_limit(70.0, 5), 2);
        assert_eq!(adaptive_limit(50.0, 5), 3);
        assert_eq!(adaptive_limit(90.0, 4), 0);
    }
}
