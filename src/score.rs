//! Heuristic confidence scoring
//!
//! Produces a confidence in `[0, 1]` for validated completion text,
//! without any compiler or model assistance. The score is additive over
//! independent signals on top of a neutral base, then clamped; it drives
//! cache TTL banding, ranking, and the minimum-confidence filter.
//!
//! Signals, in the order they are applied:
//!
//! - language-keyword presence
//! - indentation consistency with the surrounding file
//! - length band (short single statements score best)
//! - delimiter balance and statement termination
//! - identifier-case agreement with the language convention
//! - token overlap with the code context
//! - narrative-artifact penalty (prose wrappers, markdown fences)

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::{split_identifiers, CodeContext, IndentStyle};
use crate::language::{CaseStyle, LanguageProfile};
use crate::validate::delimiter_balance;

const BASE_SCORE: f64 = 0.45;
const KEYWORD_BONUS: f64 = 0.2;
const MULTI_KEYWORD_BONUS: f64 = 0.05;
const INDENT_BONUS: f64 = 0.15;
const INDENT_PENALTY: f64 = 0.1;
const BALANCE_BONUS: f64 = 0.05;
const BALANCE_PENALTY: f64 = 0.15;
const TERMINATOR_BONUS: f64 = 0.05;
const CASE_BONUS: f64 = 0.05;
const RELEVANCE_WEIGHT: f64 = 0.15;
const NARRATIVE_PENALTY: f64 = 0.2;

/// Prose wrappers models emit around code instead of code.
static NARRATIVE_ARTIFACTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^\s*(sure|certainly|of course)\b",
        r"(?i)\bhere('s| is) (the|a|an|your)\b",
        r"(?i)\bthe following (code|snippet|function)\b",
        r"(?i)\bhope this helps\b",
        r"(?m)^\s*```",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("narrative artifact pattern"))
    .collect()
});

/// Stateless additive scorer.
#[derive(Debug, Default)]
pub struct ConfidenceScorer;

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Confidence for `text` completing `context`, clamped to `[0, 1]`.
    pub fn score(
        &self,
        text: &str,
        context: &CodeContext,
        profile: &dyn LanguageProfile,
    ) -> f64 {
        if text.trim().is_empty() {
            return 0.0;
        }

        let mut score = BASE_SCORE;
        score += self.keyword_signal(text, profile);
        score += self.indentation_signal(text, context);
        score += self.length_signal(text);
        score += self.structure_signal(text, profile);
        score += self.case_signal(text, profile);
        score += self.relevance_signal(text, context);
        score -= self.narrative_signal(text);
        score.clamp(0.0, 1.0)
    }

    fn keyword_signal(&self, text: &str, profile: &dyn LanguageProfile) -> f64 {
        let mut seen: Vec<&str> = Vec::new();
        for token in split_identifiers(text) {
            if profile.keywords().contains(&token) && !seen.contains(&token) {
                seen.push(token);
            }
        }
        match seen.len() {
            0 => 0.0,
            1 => KEYWORD_BONUS,
            _ => KEYWORD_BONUS + MULTI_KEYWORD_BONUS,
        }
    }

    /// Indentation agreement with the file's declared style. Lines that
    /// carry no indentation are neutral evidence; tabs where spaces are
    /// expected (or the reverse) contradict it.
    fn indentation_signal(&self, text: &str, context: &CodeContext) -> f64 {
        let mut consistent = true;
        let mut saw_indented_line = false;

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            if indent.is_empty() {
                continue;
            }
            saw_indented_line = true;
            match context.indent {
                IndentStyle::Tabs => {
                    if indent.contains(' ') {
                        consistent = false;
                    }
                }
                IndentStyle::Spaces { width } => {
                    if indent.contains('\t')
                        || (width > 0 && indent.len() % width as usize != 0)
                    {
                        consistent = false;
                    }
                }
            }
        }

        if !saw_indented_line {
            // A flush-left completion cannot contradict the file.
            INDENT_BONUS
        } else if consistent {
            INDENT_BONUS
        } else {
            -INDENT_PENALTY
        }
    }

    /// Short, single-statement completions are the sweet spot; fragments
    /// and walls of text both score down.
    fn length_signal(&self, text: &str) -> f64 {
        match text.trim().len() {
            0..=2 => -0.1,
            3..=10 => 0.05,
            11..=50 => 0.1,
            51..=200 => 0.05,
            201..=1000 => 0.0,
            _ => -0.05,
        }
    }

    fn structure_signal(&self, text: &str, profile: &dyn LanguageProfile) -> f64 {
        let mut signal = if delimiter_balance(text, profile.line_comment()).is_balanced() {
            BALANCE_BONUS
        } else {
            -BALANCE_PENALTY
        };
        if profile.ends_complete(text) {
            signal += TERMINATOR_BONUS;
        }
        signal
    }

    /// Small bonus when most identifiers follow the language's case
    /// convention. Single-character names carry no case evidence.
    fn case_signal(&self, text: &str, profile: &dyn LanguageProfile) -> f64 {
        let mut judged = 0usize;
        let mut matching = 0usize;
        for token in split_identifiers(text) {
            if token.len() < 2 || profile.keywords().contains(&token) {
                continue;
            }
            judged += 1;
            if case_matches(token, profile.identifier_case()) {
                matching += 1;
            }
        }
        if judged > 0 && matching * 2 >= judged {
            CASE_BONUS
        } else {
            0.0
        }
    }

    /// Token overlap with the context, scaled into `[0, RELEVANCE_WEIGHT]`.
    fn relevance_signal(&self, text: &str, context: &CodeContext) -> f64 {
        let tokens: Vec<String> = split_identifiers(text)
            .map(|t| t.to_ascii_lowercase())
            .collect();
        if tokens.is_empty() {
            return 0.0;
        }
        let known = context.identifiers();
        let overlapping = tokens.iter().filter(|t| known.contains(*t)).count();
        RELEVANCE_WEIGHT * overlapping as f64 / tokens.len() as f64
    }

    fn narrative_signal(&self, text: &str) -> f64 {
        if NARRATIVE_ARTIFACTS.iter().any(|p| p.is_match(text)) {
            NARRATIVE_PENALTY
        } else {
            0.0
        }
    }
}

fn case_matches(token: &str, style: CaseStyle) -> bool {
    let starts_upper = token.chars().next().is_some_and(|c| c.is_uppercase());
    let has_underscore = token.contains('_');
    let has_upper_tail = token.chars().skip(1).any(|c| c.is_uppercase());
    match style {
        CaseStyle::Pascal => starts_upper && !has_underscore,
        CaseStyle::Camel => !starts_upper && !has_underscore,
        CaseStyle::Snake => !has_upper_tail && !starts_upper,
        CaseStyle::Mixed => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageRegistry;
    use quickcheck::quickcheck;

    fn csharp_context() -> CodeContext {
        CodeContext::builder("app.cs", "csharp")
            .preceding_lines(vec!["public void Compute()", "{"])
            .current_line("var x = ")
            .build()
    }

    #[test]
    fn plausible_assignment_scores_well() {
        let registry = LanguageRegistry::with_builtins();
        let profile = registry.resolve("csharp");
        let score = ConfidenceScorer::new().score("var x = 5;", &csharp_context(), profile.as_ref());
        assert!(score >= 0.6, "expected >= 0.6, got {}", score);
    }

    #[test]
    fn empty_text_scores_zero() {
        let registry = LanguageRegistry::with_builtins();
        let profile = registry.resolve("csharp");
        let score = ConfidenceScorer::new().score("   ", &csharp_context(), profile.as_ref());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn narrative_wrapper_scores_below_plain_code() {
        let registry = LanguageRegistry::with_builtins();
        let profile = registry.resolve("csharp");
        let scorer = ConfidenceScorer::new();
        let ctx = csharp_context();

        let plain = scorer.score("var x = 5;", &ctx, profile.as_ref());
        let wrapped = scorer.score(
            "Sure! Here's the code:\nvar x = 5;",
            &ctx,
            profile.as_ref(),
        );
        assert!(wrapped < plain);
    }

    #[test]
    fn unbalanced_text_scores_below_balanced() {
        let registry = LanguageRegistry::with_builtins();
        let profile = registry.resolve("csharp");
        let scorer = ConfidenceScorer::new();
        let ctx = csharp_context();

        let balanced = scorer.score("if (x > 0) { return; }", &ctx, profile.as_ref());
        let unbalanced = scorer.score("if (x > 0) { return;", &ctx, profile.as_ref());
        assert!(unbalanced < balanced);
    }

    #[test]
    fn tab_indent_in_space_file_is_penalized() {
        let registry = LanguageRegistry::with_builtins();
        let profile = registry.resolve("csharp");
        let scorer = ConfidenceScorer::new();
        let ctx = csharp_context();

        let spaces = scorer.score("if (x > 0) {\n    return;\n}", &ctx, profile.as_ref());
        let tabs = scorer.score("if (x > 0) {\n\treturn;\n}", &ctx, profile.as_ref());
        assert!(tabs < spaces);
    }

    #[test]
    fn overlap_with_context_raises_score() {
        let registry = LanguageRegistry::with_builtins();
        let profile = registry.resolve("csharp");
        let scorer = ConfidenceScorer::new();
        let ctx = CodeContext::builder("app.cs", "csharp")
            .preceding_lines(vec!["var totalAmount = order.Sum();"])
            .current_line("Console.WriteLine(")
            .build();

        let related = scorer.score("totalAmount);", &ctx, profile.as_ref());
        let unrelated = scorer.score("somethingElse);", &ctx, profile.as_ref());
        assert!(related > unrelated);
    }

    quickcheck! {
        fn score_is_always_in_unit_interval(text: String) -> bool {
            let registry = LanguageRegistry::with_builtins();
            let profile = registry.resolve("csharp");
            let score =
                ConfidenceScorer::new().score(&text, &csharp_context(), profile.as_ref());
            (0.0..=1.0).contains(&score)
        }
    }
}
