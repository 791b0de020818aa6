//! Correction of rejected responses
//!
//! Each [`ValidationError`] maps to one repair strategy: syntax errors get
//! delimiter/terminator repair, unsafe content gets the offending lines
//! stripped, irrelevant content keeps only its best-overlapping lines.
//! The remaining classifications have no textual repair and fall through
//! to the language's deterministic fallback template. A repair that
//! changes nothing, or strips everything, also falls through.
//!
//! Corrected text is re-validated by the engine; a surviving correction
//! carries a flat confidence penalty so repaired output never outranks
//! clean output.

use tracing::debug;

use crate::context::{split_identifiers, CodeContext};
use crate::language::LanguageProfile;
use crate::models::{CodeSuggestion, Span, SuggestionKind, SuggestionSource};
use crate::validate::{closer_for, delimiter_balance, line_is_unsafe, opener_for, ValidationError};

/// Confidence deduction applied to every corrected suggestion.
pub const CORRECTION_PENALTY: f64 = 0.2;
/// Corrected confidence never drops below this floor.
pub const CORRECTION_FLOOR: f64 = 0.1;
/// Fixed confidence of fallback-template suggestions.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// How many best-overlapping lines an irrelevance repair keeps.
const RELEVANT_LINES_KEPT: usize = 3;

/// Result of attempting a repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionOutcome {
    /// Repaired text, different from the input and non-empty.
    Corrected(String),
    /// No usable repair; use the language fallback template.
    Fallback,
}

/// Stateless repair strategies keyed by validation classification.
#[derive(Debug, Default)]
pub struct Corrector;

impl Corrector {
    pub fn new() -> Self {
        Self
    }

    /// Attempt to repair `text` given why it was rejected.
    pub fn apply(
        &self,
        text: &str,
        error: &ValidationError,
        context: &CodeContext,
        profile: &dyn LanguageProfile,
    ) -> CorrectionOutcome {
        let repaired = match error {
            ValidationError::SyntaxError => self.repair_syntax(text, profile),
            ValidationError::UnsafeContent(_) => self.strip_unsafe_lines(text),
            ValidationError::IrrelevantContent => self.keep_relevant_lines(text, context),
            // Nothing textual to repair for these.
            ValidationError::NullOrEmpty
            | ValidationError::TooLong { .. }
            | ValidationError::ContainsErrorArtifact(_)
            | ValidationError::IncompleteStructuredData => None,
        };

        match repaired {
            Some(fixed) if !fixed.trim().is_empty() && fixed != text => {
                debug!(classification = %error, "repaired rejected response");
                CorrectionOutcome::Corrected(fixed)
            }
            _ => CorrectionOutcome::Fallback,
        }
    }

    /// Prepend openers for orphan closing delimiters (in reverse order of
    /// appearance, so the outermost opener comes first), append closers
    /// for unclosed opens, and append a statement terminator when nothing
    /// but the terminator was missing. Interleaved imbalances that survive
    /// both repairs are not fixable.
    fn repair_syntax(&self, text: &str, profile: &dyn LanguageProfile) -> Option<String> {
        let balance = delimiter_balance(text, profile.line_comment());
        let mut fixed = text.trim_end().to_string();

        if !balance.unopened_closes.is_empty() {
            let openers: String = balance
                .unopened_closes
                .iter()
                .rev()
                .map(|close| opener_for(*close))
                .collect();
            fixed.insert_str(0, &openers);
        }
        for open in balance.unclosed_opens.iter().rev() {
            fixed.push(closer_for(*open));
        }
        if balance.is_balanced() {
            if let Some(term) = profile.statement_terminator() {
                if !profile.ends_complete(&fixed) {
                    fixed.push(term);
                }
            }
        }

        if !delimiter_balance(&fixed, profile.line_comment()).is_balanced() {
            return None;
        }
        Some(fixed)
    }

    /// Drop every line matching an unsafe pattern, keeping the rest.
    fn strip_unsafe_lines(&self, text: &str) -> Option<String> {
        let kept: Vec<&str> = text.lines().filter(|line| !line_is_unsafe(line)).collect();
        Some(kept.join("\n"))
    }

    /// Keep the lines with the highest identifier overlap against the
    /// context, in original order.
    fn keep_relevant_lines(&self, text: &str, context: &CodeContext) -> Option<String> {
        let known = context.identifiers();
        let mut scored: Vec<(usize, usize, &str)> = text
            .lines()
            .enumerate()
            .map(|(i, line)| {
                let overlap = split_identifiers(line)
                    .filter(|t| known.contains(&t.to_ascii_lowercase()))
                    .count();
                (overlap, i, line)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut kept: Vec<(usize, &str)> = scored
            .into_iter()
            .take(RELEVANT_LINES_KEPT)
            .filter(|(overlap, _, _)| *overlap > 0)
            .map(|(_, i, line)| (i, line))
            .collect();
        kept.sort_by_key(|(i, _)| *i);

        if kept.is_empty() {
            return None;
        }
        Some(
            kept.into_iter()
                .map(|(_, line)| line)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Penalized confidence for a corrected suggestion.
pub fn penalized_confidence(confidence: f64) -> f64 {
    (confidence - CORRECTION_PENALTY).max(CORRECTION_FLOOR)
}

/// Proportionally reduced priority for a corrected suggestion.
pub fn corrected_priority(priority: u8) -> u8 {
    (priority as u16 * 4 / 5) as u8
}

/// Deterministic last-resort suggestion from the language template.
pub fn fallback_suggestion(
    context: &CodeContext,
    profile: &dyn LanguageProfile,
    span: Span,
) -> CodeSuggestion {
    CodeSuggestion::new(profile.fallback_template(context), span, FALLBACK_CONFIDENCE)
        .with_kind(SuggestionKind::Snippet)
        .with_description(format!("{} fallback", profile.tag()))
        .with_priority(10)
        .with_source(SuggestionSource::Fallback)
}
