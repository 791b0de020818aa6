//! Deduplication, ranking, and display filtering
//!
//! The last pipeline stage before suggestions reach the editor. Near-
//! duplicates (same text modulo whitespace and case) collapse to the
//! highest-confidence instance, survivors are ordered by a rank value
//! derived from confidence plus positional bonuses, and hard filters
//! remove candidates that should never be shown: below the confidence
//! threshold, mid-comment or mid-string unless the candidate is itself a
//! comment, shown too recently, or too trivial to help.

use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::context::CodeContext;
use crate::language::LanguageProfile;
use crate::models::{CodeSuggestion, SuggestionKind};

const KIND_BONUS: f64 = 0.1;
const SHORT_BONUS: f64 = 0.05;
const PRIORITY_WEIGHT: f64 = 0.1;
const SHORT_TEXT_LEN: usize = 30;

/// Whitespace-collapsed, case-folded form used for duplicate detection
/// and recent-display memory.
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Syntactic position of the cursor, derived from the current line only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorPosition {
    Code,
    Comment,
    StringLiteral,
    MemberAccess,
    ImportStatement,
}

fn cursor_position(context: &CodeContext, profile: &dyn LanguageProfile) -> CursorPosition {
    let mut column = (context.cursor_column as usize).min(context.current_line.len());
    while !context.current_line.is_char_boundary(column) {
        column -= 1;
    }
    let before = &context.current_line[..column];

    let comment = profile.line_comment();
    if !comment.is_empty() {
        if let Some(at) = before.find(comment) {
            // A marker inside a string literal does not open a comment.
            if !in_string(&before[..at]) {
                return CursorPosition::Comment;
            }
        }
    }
    if in_string(before) {
        return CursorPosition::StringLiteral;
    }
    if before.trim_end().ends_with('.') {
        return CursorPosition::MemberAccess;
    }
    let first_token = before.trim_start().split_whitespace().next().unwrap_or("");
    if matches!(first_token, "using" | "import" | "from" | "use") {
        return CursorPosition::ImportStatement;
    }
    CursorPosition::Code
}

/// Whether `text` ends inside an unterminated quoted literal.
fn in_string(text: &str) -> bool {
    let mut open: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        match open {
            Some(quote) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    open = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    open = Some(c);
                }
            }
        }
    }
    open.is_some()
}

/// Ranker with interior-mutable settings so the engine can retune it at
/// runtime without tearing down shared state.
pub struct SuggestionRanker {
    min_confidence: RwLock<f64>,
    recent_window: RwLock<Duration>,
    /// Normalized text of recently displayed suggestions.
    recently_shown: Mutex<FxHashMap<String, Instant>>,
}

impl SuggestionRanker {
    pub fn new(min_confidence: f64, recent_window: Duration) -> Self {
        Self {
            min_confidence: RwLock::new(min_confidence),
            recent_window: RwLock::new(recent_window),
            recently_shown: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn set_min_confidence(&self, min_confidence: f64) {
        *self.min_confidence.write() = min_confidence.clamp(0.0, 1.0);
    }

    pub fn set_recent_window(&self, window: Duration) {
        *self.recent_window.write() = window;
    }

    /// Collapse near-duplicates to the highest-confidence instance,
    /// preserving first-seen order. Running it twice changes nothing.
    pub fn filter_duplicates(&self, suggestions: Vec<CodeSuggestion>) -> Vec<CodeSuggestion> {
        let mut best: FxHashMap<String, usize> = FxHashMap::default();
        let mut kept: Vec<CodeSuggestion> = Vec::with_capacity(suggestions.len());

        for suggestion in suggestions {
            let key = normalize(&suggestion.text);
            match best.get(&key) {
                Some(&at) if kept[at].confidence >= suggestion.confidence => {}
                Some(&at) => kept[at] = suggestion,
                None => {
                    best.insert(key, kept.len());
                    kept.push(suggestion);
                }
            }
        }
        kept
    }

    /// Dedup, hard-filter, and order candidates best first.
    pub fn rank(
        &self,
        suggestions: Vec<CodeSuggestion>,
        context: &CodeContext,
        profile: &dyn LanguageProfile,
    ) -> Vec<CodeSuggestion> {
        let position = cursor_position(context, profile);
        let min_confidence = *self.min_confidence.read();
        self.prune_recent();

        let mut ranked: Vec<(f64, CodeSuggestion)> = self
            .filter_duplicates(suggestions)
            .into_iter()
            .filter(|s| self.passes_filters(s, position, min_confidence))
            .map(|s| (rank_value(&s, position), s))
            .collect();

        // Descending by rank; ties break on text for determinism.
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.text.cmp(&b.1.text))
        });
        trace!(candidates = ranked.len(), position = ?position, "ranked suggestions");
        ranked.into_iter().map(|(_, s)| s).collect()
    }

    /// Record that a suggestion was shown, suppressing re-display of the
    /// same normalized text within the recent window.
    pub fn mark_displayed(&self, suggestion: &CodeSuggestion) {
        self.recently_shown
            .lock()
            .insert(normalize(&suggestion.text), Instant::now());
    }

    fn passes_filters(
        &self,
        suggestion: &CodeSuggestion,
        position: CursorPosition,
        min_confidence: f64,
    ) -> bool {
        if suggestion.confidence < min_confidence {
            return false;
        }
        let trimmed = suggestion.text.trim();
        if trimmed.len() < 2 {
            return false;
        }
        // Pure punctuation helps no one.
        if !trimmed.chars().any(|c| c.is_alphanumeric()) {
            return false;
        }
        if matches!(
            position,
            CursorPosition::Comment | CursorPosition::StringLiteral
        ) && suggestion.kind != SuggestionKind::Comment
        {
            return false;
        }
        let window = *self.recent_window.read();
        if let Some(shown_at) = self.recently_shown.lock().get(&normalize(&suggestion.text)) {
            if shown_at.elapsed() <= window {
                return false;
            }
        }
        true
    }

    fn prune_recent(&self) {
        let window = *self.recent_window.read();
        self.recently_shown
            .lock()
            .retain(|_, shown_at| shown_at.elapsed() <= window);
    }
}

/// Confidence plus positional bonuses. Never used for filtering, only
/// for ordering.
fn rank_value(suggestion: &CodeSuggestion, position: CursorPosition) -> f64 {
    let mut value = suggestion.confidence;
    let kind_fits = matches!(
        (position, suggestion.kind),
        (CursorPosition::MemberAccess, SuggestionKind::Method)
            | (CursorPosition::ImportStatement, SuggestionKind::Import)
            | (CursorPosition::Comment, SuggestionKind::Comment)
            | (CursorPosition::Code, SuggestionKind::Variable)
            | (CursorPosition::Code, SuggestionKind::Snippet)
    );
    if kind_fits {
        value += KIND_BONUS;
    }
    if suggestion.text.trim().len() <= SHORT_TEXT_LEN {
        value += SHORT_BONUS;
    }
    value + PRIORITY_WEIGHT * suggestion.priority as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageRegistry;
    use crate::models::Span;
    use std::sync::Arc;

    fn suggestion(text: &str, confidence: f64) -> CodeSuggestion {
        CodeSuggestion::new(text, Span::insertion_at(0, 0), confidence)
    }

    fn ranker() -> SuggestionRanker {
        SuggestionRanker::new(0.3, Duration::from_secs(5))
    }

    fn profile() -> Arc<dyn LanguageProfile> {
        LanguageRegistry::with_builtins().resolve("csharp")
    }

    fn code_context(current_line: &str, column: u32) -> CodeContext {
        CodeContext::builder("app.cs", "csharp")
            .current_line(current_line)
            .cursor(0, column)
            .build()
    }

    #[test]
    fn duplicates_keep_highest_confidence() {
        let out = ranker().filter_duplicates(vec![
            suggestion("var x = 5;", 0.5),
            suggestion("VAR  X = 5;", 0.8),
            suggestion("var x = 5;", 0.6),
        ]);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn filter_duplicates_is_idempotent() {
        let r = ranker();
        let input = vec![
            suggestion("alpha();", 0.9),
            suggestion("beta();", 0.7),
            suggestion("ALPHA();", 0.4),
        ];
        let once = r.filter_duplicates(input);
        let texts: Vec<String> = once.iter().map(|s| s.text.clone()).collect();
        let twice = r.filter_duplicates(once);
        assert_eq!(
            twice.iter().map(|s| s.text.clone()).collect::<Vec<_>>(),
            texts
        );
    }

    #[test]
    fn higher_confidence_ranks_first() {
        let out = ranker().rank(
            vec![suggestion("lowConfidence();", 0.5), suggestion("highConfidence();", 0.9)],
            &code_context("var x = ", 8),
            profile().as_ref(),
        );
        assert_eq!(out[0].text, "highConfidence();");
    }

    #[test]
    fn below_threshold_is_dropped() {
        let out = ranker().rank(
            vec![suggestion("weak();", 0.1), suggestion("strong();", 0.8)],
            &code_context("var x = ", 8),
            profile().as_ref(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "strong();");
    }

    #[test]
    fn trivia_is_dropped() {
        let out = ranker().rank(
            vec![suggestion(";", 0.9), suggestion("}{", 0.9), suggestion("run();", 0.9)],
            &code_context("var x = ", 8),
            profile().as_ref(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "run();");
    }

    #[test]
    fn only_comment_suggestions_survive_in_comments() {
        let out = ranker().rank(
            vec![
                suggestion("var y = 1;", 0.9),
                suggestion("explains the invariant", 0.6).with_kind(SuggestionKind::Comment),
            ],
            &code_context("// fix the ", 11),
            profile().as_ref(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, SuggestionKind::Comment);
    }

    #[test]
    fn string_literal_position_blocks_code_suggestions() {
        let out = ranker().rank(
            vec![suggestion("var y = 1;", 0.9)],
            &code_context(r#"var s = "hello "#, 15),
            profile().as_ref(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn method_kind_wins_after_member_access() {
        let out = ranker().rank(
            vec![
                suggestion("ToStringField", 0.6).with_kind(SuggestionKind::Variable),
                suggestion("ToString()", 0.6).with_kind(SuggestionKind::Method),
            ],
            &code_context("value.", 6),
            profile().as_ref(),
        );
        assert_eq!(out[0].text, "ToString()");
    }

    #[test]
    fn recently_displayed_is_suppressed_then_allowed() {
        let r = SuggestionRanker::new(0.3, Duration::from_millis(40));
        let ctx = code_context("var x = ", 8);
        let p = profile();
        let candidate = suggestion("repeat();", 0.9);

        r.mark_displayed(&candidate);
        assert!(r.rank(vec![candidate.clone()], &ctx, p.as_ref()).is_empty());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(r.rank(vec![candidate], &ctx, p.as_ref()).len(), 1);
    }

    #[test]
    fn threshold_can_be_retuned() {
        let r = ranker();
        let ctx = code_context("var x = ", 8);
        let p = profile();
        assert!(r.rank(vec![suggestion("weak();", 0.2)], &ctx, p.as_ref()).is_empty());
        r.set_min_confidence(0.1);
        assert_eq!(r.rank(vec![suggestion("weak();", 0.2)], &ctx, p.as_ref()).len(), 1);
    }
}
