//! Completion engine orchestration
//!
//! [`CompletionEngine`] wires the pipeline together: context optimization,
//! cache lookup, per-key debouncing of the remote call, validation,
//! correction, scoring, and ranking. All state is owned by the engine
//! instance; two engines in one process share nothing.
//!
//! A background task purges expired cache entries and sweeps stale
//! per-key metrics on a fixed interval until [`CompletionEngine::shutdown`]
//! (or drop) signals it to stop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::config::{EngineConfig, RequestPriority};
use crate::context::{CodeContext, ContextOptimizer, OptimizedContext};
use crate::correct::{
    corrected_priority, fallback_suggestion, penalized_confidence, CorrectionOutcome, Corrector,
};
use crate::debounce::Debouncer;
use crate::language::{LanguageProfile, LanguageRegistry};
use crate::metrics::{EngineStatistics, RequestMetrics};
use crate::models::{CodeSuggestion, RemoteReply, Span, SuggestionKind, SuggestionSource};
use crate::rank::SuggestionRanker;
use crate::score::ConfidenceScorer;
use crate::validate::{ResponseValidator, ValidationError};

/// Content-addressed cache key over the optimized request.
pub type CacheKey = [u8; 32];

/// Instance-owned completion pipeline.
pub struct CompletionEngine {
    config: RwLock<EngineConfig>,
    registry: LanguageRegistry,
    cache: Arc<TtlCache<CacheKey, CodeSuggestion>>,
    debouncer: Debouncer<String, CodeSuggestion>,
    metrics: Arc<RequestMetrics>,
    ranker: SuggestionRanker,
    shutdown: broadcast::Sender<()>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionEngine {
    /// Build an engine and start its cleanup task. Must be called inside a
    /// tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        let cache = Arc::new(TtlCache::new(config.cache_capacity, config.cache_ttl_default));
        let metrics = Arc::new(RequestMetrics::new());
        let ranker =
            SuggestionRanker::new(config.confidence_threshold, config.recent_display_window);
        let (shutdown, _) = broadcast::channel(1);

        let cleanup = spawn_cleanup(
            cache.clone(),
            metrics.clone(),
            config.cleanup_interval,
            config.metrics_retention,
            shutdown.subscribe(),
        );
        info!(
            cache_capacity = config.cache_capacity,
            cleanup_interval_secs = config.cleanup_interval.as_secs(),
            "completion engine started"
        );

        Self {
            config: RwLock::new(config),
            registry: LanguageRegistry::with_builtins(),
            cache,
            debouncer: Debouncer::new(),
            metrics,
            ranker,
            shutdown,
            cleanup: Mutex::new(Some(cleanup)),
        }
    }

    /// Full request pipeline for one completion trigger.
    ///
    /// `logical_id` groups related triggers (typically the file path):
    /// debouncing, failure backoff, and metrics are all keyed by it.
    /// `remote_call` runs at most once per debounce cycle, after the delay
    /// elapses, with the optimized context.
    ///
    /// Metrics and the cache are updated from inside the debounced action,
    /// so one fired cycle records exactly one outcome and caches under the
    /// firing registration's key; coalesced callers only receive the
    /// shared result. A cancelled cycle yields the empty suggestion and
    /// leaves cache and metrics untouched.
    pub async fn optimize_request<F, Fut>(
        &self,
        logical_id: &str,
        context: &CodeContext,
        priority: RequestPriority,
        remote_call: F,
    ) -> CodeSuggestion
    where
        F: FnOnce(OptimizedContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let config = self.config.read().clone();
        let profile = self.registry.resolve(&context.language);
        let span = Span::insertion_at(context.cursor_line, context.cursor_column);

        let optimizer =
            ContextOptimizer::new(config.edit_history_limit, config.edit_recency_window);
        let optimized = optimizer.optimize(context, profile.as_ref(), config.context_budget);
        let key = cache_key(context, &optimized);

        if let Some(hit) = self.cache.get(&key) {
            self.metrics.record_cache_hit(logical_id);
            debug!(logical_id, "cache hit");
            return hit.with_source(SuggestionSource::Cached);
        }

        let delay = config.debounce_delay(priority, self.metrics.failure_streak(logical_id));
        let action = {
            let metrics = self.metrics.clone();
            let cache = self.cache.clone();
            let id = logical_id.to_string();
            let context = context.clone();
            let profile = profile.clone();
            async move {
                let started = tokio::time::Instant::now();
                match remote_call(optimized).await {
                    Err(error) => {
                        // Transport failures propagate an empty result;
                        // retry policy belongs to the transport collaborator.
                        warn!(logical_id = %id, %error, "remote completion call failed");
                        metrics.record_failure(&id);
                        CodeSuggestion::empty(span)
                    }
                    Ok(raw) => {
                        metrics.record_success(&id, started.elapsed());
                        let reply = RemoteReply::from_wire(&raw);
                        let suggestion =
                            process_reply(&reply, &context, profile.as_ref(), span, &config);
                        if !suggestion.is_empty()
                            && suggestion.source != SuggestionSource::Fallback
                        {
                            let ttl = config.ttl_for_confidence(suggestion.confidence);
                            cache.insert(key, suggestion.clone(), Some(ttl));
                        }
                        suggestion
                    }
                }
            }
        };

        match self
            .debouncer
            .debounce(logical_id.to_string(), delay, action)
            .await
        {
            None => {
                debug!(logical_id, "request cancelled before firing");
                CodeSuggestion::empty(span)
            }
            Some(suggestion) => suggestion,
        }
    }

    /// Run the validate → (correct →) score pipeline over a raw provider
    /// body, without debouncing, caching, or metrics. The span is a pure
    /// insertion at the context's cursor.
    pub fn process_suggestion(&self, raw: &str, context: &CodeContext) -> CodeSuggestion {
        let config = self.config.read().clone();
        let profile = self.registry.resolve(&context.language);
        let span = Span::insertion_at(context.cursor_line, context.cursor_column);
        let reply = RemoteReply::from_wire(raw);
        process_reply(&reply, context, profile.as_ref(), span, &config)
    }

    /// Dedup, filter, and order candidates for display.
    pub fn rank_suggestions(
        &self,
        suggestions: Vec<CodeSuggestion>,
        context: &CodeContext,
    ) -> Vec<CodeSuggestion> {
        let profile = self.registry.resolve(&context.language);
        self.ranker.rank(suggestions, context, profile.as_ref())
    }

    /// Collapse near-duplicate suggestions without filtering or ordering.
    pub fn filter_duplicates(&self, suggestions: Vec<CodeSuggestion>) -> Vec<CodeSuggestion> {
        self.ranker.filter_duplicates(suggestions)
    }

    /// Record that a suggestion was displayed, suppressing immediate
    /// re-display of identical text.
    pub fn mark_displayed(&self, suggestion: &CodeSuggestion) {
        self.ranker.mark_displayed(suggestion);
    }

    /// Cancel the pending (not yet fired) request for a logical id, if any.
    pub fn cancel_pending(&self, logical_id: &str) {
        self.debouncer.cancel(&logical_id.to_string());
    }

    /// Aggregate request statistics across all logical ids.
    pub fn statistics(&self) -> EngineStatistics {
        self.metrics.statistics()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Replace the runtime tunables. Cache capacity and the cleanup
    /// interval are fixed at construction; everything else takes effect on
    /// the next request.
    pub fn apply_settings(&self, config: EngineConfig) {
        self.ranker.set_min_confidence(config.confidence_threshold);
        self.ranker.set_recent_window(config.recent_display_window);
        info!(
            confidence_threshold = config.confidence_threshold,
            context_budget = config.context_budget,
            "engine settings updated"
        );
        *self.config.write() = config;
    }

    /// Stop the cleanup task and wait for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(());
        let handle = self.cleanup.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for CompletionEngine {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Validate → (correct →) score one remote reply into a suggestion.
/// Stateless, so the debounced action can run it without holding the
/// engine.
fn process_reply(
    reply: &RemoteReply,
    context: &CodeContext,
    profile: &dyn LanguageProfile,
    span: Span,
    config: &EngineConfig,
) -> CodeSuggestion {
    let validator = ResponseValidator::new(config.max_response_len, config.relevance_floor);
    let scorer = ConfidenceScorer::new();
    let text = reply.completion.as_str();

    match validator.validate(text, context, profile) {
        Ok(()) => {
            let confidence = scorer.score(text, context, profile);
            let mut suggestion = CodeSuggestion::new(text, span, confidence)
                .with_kind(classify_kind(text, profile))
                .with_source(SuggestionSource::Remote);
            suggestion.is_partial = reply.truncated;
            suggestion
        }
        // An empty reply means "nothing to suggest", not "suggest the
        // fallback": it yields the zero-confidence empty suggestion.
        Err(ValidationError::NullOrEmpty) => CodeSuggestion::empty(span),
        Err(error) => {
            debug!(%error, "remote response rejected");
            match Corrector::new().apply(text, &error, context, profile) {
                CorrectionOutcome::Corrected(fixed)
                    if validator.validate(&fixed, context, profile).is_ok() =>
                {
                    let confidence = penalized_confidence(scorer.score(&fixed, context, profile));
                    let mut suggestion = CodeSuggestion::new(fixed.as_str(), span, confidence)
                        .with_kind(classify_kind(&fixed, profile))
                        .with_description(error.to_string())
                        .with_source(SuggestionSource::Corrected);
                    suggestion.priority = corrected_priority(suggestion.priority);
                    suggestion.is_partial = reply.truncated;
                    suggestion
                }
                _ => fallback_suggestion(context, profile, span),
            }
        }
    }
}

/// Periodic cache purge and metrics sweep until shutdown.
fn spawn_cleanup(
    cache: Arc<TtlCache<CacheKey, CodeSuggestion>>,
    metrics: Arc<RequestMetrics>,
    interval: Duration,
    retention: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("cleanup task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    let swept = metrics.sweep_stale(retention);
                    if purged > 0 || swept > 0 {
                        debug!(purged, swept, "periodic cleanup");
                    }
                }
            }
        }
    })
}

/// Hash the optimized request into a cache key. Two triggers with the
/// same language, cursor, and surviving context lines share a key.
fn cache_key(context: &CodeContext, optimized: &OptimizedContext) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(context.language.as_bytes());
    hasher.update(&[0]);
    hasher.update(&context.cursor_line.to_le_bytes());
    hasher.update(&context.cursor_column.to_le_bytes());
    hasher.update(optimized.current_line.as_bytes());
    hasher.update(&[0]);
    for line in &optimized.preceding_lines {
        hasher.update(line.as_bytes());
        hasher.update(&[b'\n']);
    }
    hasher.update(&[0]);
    for line in &optimized.following_lines {
        hasher.update(line.as_bytes());
        hasher.update(&[b'\n']);
    }
    *hasher.finalize().as_bytes()
}

/// Coarse kind classification of accepted completion text.
fn classify_kind(text: &str, profile: &dyn LanguageProfile) -> SuggestionKind {
    let trimmed = text.trim();
    if trimmed.starts_with(profile.line_comment()) {
        return SuggestionKind::Comment;
    }
    let first = trimmed.split_whitespace().next().unwrap_or("");
    if matches!(first, "using" | "import" | "from" | "use") {
        return SuggestionKind::Import;
    }
    if trimmed.lines().count() > 1 {
        return SuggestionKind::Snippet;
    }
    if trimmed.contains('(') {
        return SuggestionKind::Method;
    }
    if trimmed.contains('=') {
        return SuggestionKind::Variable;
    }
    SuggestionKind::General
}
