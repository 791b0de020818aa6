//! Engine configuration
//!
//! All tunables are injected at construction and can be replaced at runtime
//! through [`crate::engine::CompletionEngine::apply_settings`]. Nothing in
//! this crate reads configuration from ambient global state.

use std::time::Duration;

/// Priority band of a completion request, which selects the debounce delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPriority {
    /// Explicitly triggered by the user (e.g. manual invoke). Shortest delay.
    UserInitiated,
    /// Triggered automatically on typing.
    Automatic,
    /// Background/speculative work, or automatic work under failure backoff.
    Low,
}

/// Tunables for the completion engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Suggestions scoring below this are rejected outright.
    pub confidence_threshold: f64,

    /// Maximum number of cached suggestions (LRU beyond this).
    pub cache_capacity: usize,
    /// TTL for high-confidence entries (confidence >= 0.9).
    pub cache_ttl_high: Duration,
    /// TTL for mid-confidence entries (0.5 <= confidence < 0.9).
    pub cache_ttl_default: Duration,
    /// TTL for low-confidence entries (confidence < 0.5).
    pub cache_ttl_low: Duration,

    /// Debounce delay for user-initiated requests.
    pub debounce_user: Duration,
    /// Debounce delay for automatic (on-type) requests.
    pub debounce_automatic: Duration,
    /// Debounce delay for low-priority requests and failure backoff.
    pub debounce_low: Duration,
    /// Consecutive failures after which automatic requests back off to the
    /// low-priority delay.
    pub failure_backoff_threshold: u32,

    /// Character budget for the optimized context.
    pub context_budget: usize,
    /// Maximum retained edit-history entries after relevance filtering.
    pub edit_history_limit: usize,
    /// How recently another file must have been edited to stay relevant.
    pub edit_recency_window: Duration,

    /// Responses longer than this are rejected as TooLong.
    pub max_response_len: usize,
    /// Minimum context token overlap ratio before a response with no
    /// language keyword is considered irrelevant.
    pub relevance_floor: f64,

    /// Window during which an already-displayed suggestion is suppressed.
    pub recent_display_window: Duration,

    /// Interval between background cache purges and metrics sweeps.
    pub cleanup_interval: Duration,
    /// Per-key metrics are dropped after this much inactivity.
    pub metrics_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            cache_capacity: 200,
            cache_ttl_high: Duration::from_secs(10 * 60),
            cache_ttl_default: Duration::from_secs(5 * 60),
            cache_ttl_low: Duration::from_secs(90),
            debounce_user: Duration::from_millis(100),
            debounce_automatic: Duration::from_millis(300),
            debounce_low: Duration::from_millis(600),
            failure_backoff_threshold: 3,
            context_budget: 4000,
            edit_history_limit: 5,
            edit_recency_window: Duration::from_secs(5 * 60),
            max_response_len: 5000,
            relevance_floor: 0.1,
            recent_display_window: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60),
            metrics_retention: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Debounce delay for a priority band, applying failure backoff to the
    /// automatic tier once the streak crosses the threshold.
    pub fn debounce_delay(&self, priority: RequestPriority, failure_streak: u32) -> Duration {
        match priority {
            RequestPriority::UserInitiated => self.debounce_user,
            RequestPriority::Automatic if failure_streak >= self.failure_backoff_threshold => {
                self.debounce_low
            }
            RequestPriority::Automatic => self.debounce_automatic,
            RequestPriority::Low => self.debounce_low,
        }
    }

    /// Confidence-banded TTL for a cache write.
    pub fn ttl_for_confidence(&self, confidence: f64) -> Duration {
        if confidence >= 0.9 {
            self.cache_ttl_high
        } else if confidence >= 0.5 {
            self.cache_ttl_default
        } else {
            self.cache_ttl_low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_escalates_automatic_tier_only() {
        let config = EngineConfig::default();
        assert_eq!(
            config.debounce_delay(RequestPriority::Automatic, 0),
            config.debounce_automatic
        );
        assert_eq!(
            config.debounce_delay(RequestPriority::Automatic, 3),
            config.debounce_low
        );
        // User-initiated requests never back off.
        assert_eq!(
            config.debounce_delay(RequestPriority::UserInitiated, 10),
            config.debounce_user
        );
    }

    #[test]
    fn ttl_bands() {
        let config = EngineConfig::default();
        assert_eq!(config.ttl_for_confidence(0.95), config.cache_ttl_high);
        assert_eq!(config.ttl_for_confidence(0.9), config.cache_ttl_high);
        assert_eq!(config.ttl_for_confidence(0.6), config.cache_ttl_default);
        assert_eq!(config.ttl_for_confidence(0.2), config.cache_ttl_low);
    }
}
