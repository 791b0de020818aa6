//! Raw response validation
//!
//! Classifies raw AI completion text into a validity/error taxonomy with a
//! fixed, ordered battery of heuristic checks. The first failing check
//! wins; a response is valid only when all pass. There is no compiler or
//! parser behind these checks — everything is pattern- and
//! structure-based, with per-language rules coming from the
//! [`LanguageProfile`](crate::language::LanguageProfile) registry.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::context::{split_identifiers, CodeContext};
use crate::language::LanguageProfile;

/// Error taxonomy for rejected responses. Each variant maps to a
/// corrective strategy (or terminal rejection) in the corrector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("response is null, empty, or whitespace")]
    NullOrEmpty,
    #[error("response exceeds {limit} characters ({actual})")]
    TooLong { limit: usize, actual: usize },
    #[error("response contains an AI failure artifact: {0:?}")]
    ContainsErrorArtifact(String),
    #[error("response is an incomplete structured-data fragment")]
    IncompleteStructuredData,
    #[error("response has unbalanced delimiters or a missing statement terminator")]
    SyntaxError,
    #[error("response contains unsafe content: {0:?}")]
    UnsafeContent(String),
    #[error("response is unrelated to the surrounding context")]
    IrrelevantContent,
}

/// Outcome of running the validation battery.
pub type ValidationResult = Result<(), ValidationError>;

/// Phrases that only appear when the model is apologizing, refusing, or
/// echoing a provider failure instead of completing code.
static ERROR_ARTIFACTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bas an ai\b",
        r"(?i)\bi('m| am) sorry\b",
        r"(?i)\bi can(not|'t) (help|assist|provide)\b",
        r"(?i)\bunable to process\b",
        r"(?i)\binternal server error\b",
        r"(?i)\brate limit(ed)? exceeded\b",
        r"(?i)\brequest (timed out|failed)\b",
        r"(?i)^\s*\[?error\]?:",
        r"<\|endoftext\|>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("error artifact pattern"))
    .collect()
});

/// Fixed unsafe-content pattern set: hardcoded secrets, destructive
/// commands, injection, executable references.
static UNSAFE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Hardcoded credentials
        r#"(?i)\b(password|passwd|pwd|secret|api[_-]?key|access[_-]?token)\b\s*[:=]\s*["'][^"']+["']"#,
        // Destructive filesystem/database commands
        r"(?i)\brm\s+-[a-z]*rf?[a-z]*\b",
        r"(?i)\bdrop\s+(table|database|schema)\b",
        r"(?i)\bdelete\s+from\s+\w+\s*;?\s*$",
        r"(?i)\bformat\s+[a-z]:",
        // Injection vectors
        r"(?i)\beval\s*\(",
        r"(?i)<script[\s>]",
        r";\s*--\s*$",
        // Executable-file references
        r"(?i)\b[\w-]+\.(exe|bat|cmd|scr|msi)\b",
        r"(?i)curl\s+[^|]*\|\s*(ba|z)?sh\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("unsafe content pattern"))
    .collect()
});

/// Delimiter imbalance of a text, ignoring string literals and line
/// comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DelimiterBalance {
    /// Opening delimiters left unclosed, in nesting order.
    pub(crate) unclosed_opens: Vec<char>,
    /// Closing delimiters with no matching opener, in order of appearance.
    pub(crate) unopened_closes: Vec<char>,
}

impl DelimiterBalance {
    pub(crate) fn is_balanced(&self) -> bool {
        self.unclosed_opens.is_empty() && self.unopened_closes.is_empty()
    }
}

pub(crate) fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        _ => unreachable!("not an opening delimiter"),
    }
}

pub(crate) fn opener_for(close: char) -> char {
    match close {
        ')' => '(',
        ']' => '[',
        '}' => '{',
        _ => unreachable!("not a closing delimiter"),
    }
}

/// Whether a single line trips any unsafe-content pattern.
pub(crate) fn line_is_unsafe(line: &str) -> bool {
    UNSAFE_PATTERNS.iter().any(|p| p.is_match(line))
}

/// Scan `text` for unbalanced `()`/`[]`/`{}`, skipping the inside of
/// single/double-quoted literals (with backslash escapes) and the rest of
/// a line after `line_comment`.
pub(crate) fn delimiter_balance(text: &str, line_comment: &str) -> DelimiterBalance {
    let mut balance = DelimiterBalance::default();
    let mut stack: Vec<char> = Vec::new();

    for line in text.lines() {
        let mut in_string: Option<char> = None;
        let mut escaped = false;
        let mut chars = line.char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_string = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => in_string = Some(c),
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => match stack.last() {
                    Some(&open) if closer_for(open) == c => {
                        stack.pop();
                    }
                    _ => balance.unopened_closes.push(c),
                },
                _ => {
                    // Bail out of the line at a comment marker.
                    if !line_comment.is_empty()
                        && line[idx..].starts_with(line_comment)
                    {
                        break;
                    }
                }
            }
        }
        // Unterminated string literals swallow the rest of the line only.
    }

    balance.unclosed_opens = stack;
    balance
}

/// Ordered validity checks over raw completion text.
pub struct ResponseValidator {
    pub max_response_len: usize,
    pub relevance_floor: f64,
}

impl ResponseValidator {
    pub fn new(max_response_len: usize, relevance_floor: f64) -> Self {
        Self {
            max_response_len,
            relevance_floor,
        }
    }

    /// Run the full battery. First failing check wins.
    pub fn validate(
        &self,
        text: &str,
        context: &CodeContext,
        profile: &dyn LanguageProfile,
    ) -> ValidationResult {
        self.check_null_or_empty(text)?;
        self.check_too_long(text)?;
        self.check_error_artifacts(text)?;
        self.check_incomplete_structured(text, profile)?;
        self.check_syntax(text, profile)?;
        self.check_unsafe(text)?;
        self.check_relevance(text, context, profile)?;
        Ok(())
    }

    fn check_null_or_empty(&self, text: &str) -> ValidationResult {
        if text.trim().is_empty() {
            return Err(ValidationError::NullOrEmpty);
        }
        Ok(())
    }

    fn check_too_long(&self, text: &str) -> ValidationResult {
        if text.len() > self.max_response_len {
            return Err(ValidationError::TooLong {
                limit: self.max_response_len,
                actual: text.len(),
            });
        }
        Ok(())
    }

    fn check_error_artifacts(&self, text: &str) -> ValidationResult {
        for pattern in ERROR_ARTIFACTS.iter() {
            if let Some(found) = pattern.find(text) {
                return Err(ValidationError::ContainsErrorArtifact(
                    found.as_str().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// A fragment of structured data sliced mid-stream: it leads with
    /// closing delimiters that were never opened, or it opens a JSON-like
    /// aggregate it never closes.
    fn check_incomplete_structured(
        &self,
        text: &str,
        profile: &dyn LanguageProfile,
    ) -> ValidationResult {
        let trimmed = text.trim();
        let balance = delimiter_balance(text, profile.line_comment());

        let leads_with_orphan_close = trimmed
            .chars()
            .next()
            .is_some_and(|c| matches!(c, ')' | ']' | '}'))
            && !balance.unopened_closes.is_empty();

        let looks_like_data = trimmed.starts_with('{') || trimmed.starts_with('[');
        let trails_open_aggregate = looks_like_data && !balance.unclosed_opens.is_empty();

        if leads_with_orphan_close || trails_open_aggregate {
            return Err(ValidationError::IncompleteStructuredData);
        }
        Ok(())
    }

    fn check_syntax(&self, text: &str, profile: &dyn LanguageProfile) -> ValidationResult {
        if !delimiter_balance(text, profile.line_comment()).is_balanced() {
            return Err(ValidationError::SyntaxError);
        }

        // Terminator languages: the last meaningful line must end in a way
        // the language accepts as complete.
        if profile.statement_terminator().is_some() {
            let last_meaningful = text
                .lines()
                .rev()
                .find(|line| !profile.is_comment_or_blank(line));
            if let Some(line) = last_meaningful {
                if !profile.ends_complete(line) {
                    return Err(ValidationError::SyntaxError);
                }
            }
        }
        Ok(())
    }

    fn check_unsafe(&self, text: &str) -> ValidationResult {
        for pattern in UNSAFE_PATTERNS.iter() {
            if let Some(found) = pattern.find(text) {
                return Err(ValidationError::UnsafeContent(found.as_str().to_string()));
            }
        }
        Ok(())
    }

    /// Irrelevant only when token overlap with the context is below the
    /// floor AND no language keyword appears (either signal alone keeps
    /// the response).
    fn check_relevance(
        &self,
        text: &str,
        context: &CodeContext,
        profile: &dyn LanguageProfile,
    ) -> ValidationResult {
        let tokens: Vec<String> = split_identifiers(text)
            .map(|t| t.to_ascii_lowercase())
            .collect();
        if tokens.is_empty() {
            // Nothing to judge; trivia is the ranker's problem.
            return Ok(());
        }

        let has_keyword = profile
            .keywords()
            .iter()
            .any(|kw| tokens.iter().any(|t| t == kw));
        if has_keyword {
            return Ok(());
        }

        let known = context.identifiers();
        let overlapping = tokens.iter().filter(|t| known.contains(*t)).count();
        let overlap = overlapping as f64 / tokens.len() as f64;
        if overlap < self.relevance_floor {
            return Err(ValidationError::IrrelevantContent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageRegistry;
    use indoc::indoc;
    use std::sync::Arc;

    fn csharp_context() -> CodeContext {
        CodeContext::builder("app.cs", "csharp")
            .preceding_lines(vec!["public void Compute()", "{"])
            .current_line("var x = ")
            .build()
    }

    fn validator() -> ResponseValidator {
        ResponseValidator::new(5000, 0.1)
    }

    fn profile() -> Arc<dyn LanguageProfile> {
        LanguageRegistry::with_builtins().resolve("csharp")
    }

    #[test]
    fn valid_assignment_passes() {
        let result = validator().validate("var x = 5;", &csharp_context(), profile().as_ref());
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn empty_and_whitespace_rejected() {
        let v = validator();
        let ctx = csharp_context();
        let p = profile();
        assert_eq!(v.validate("", &ctx, p.as_ref()), Err(ValidationError::NullOrEmpty));
        assert_eq!(
            v.validate("   \n\t", &ctx, p.as_ref()),
            Err(ValidationError::NullOrEmpty)
        );
    }

    #[test]
    fn oversized_response_rejected() {
        let huge = "x".repeat(5001);
        assert!(matches!(
            validator().validate(&huge, &csharp_context(), profile().as_ref()),
            Err(ValidationError::TooLong { limit: 5000, .. })
        ));
    }

    #[test]
    fn apology_is_an_error_artifact() {
        let result = validator().validate(
            "I'm sorry, I cannot help with that request.",
            &csharp_context(),
            profile().as_ref(),
        );
        assert!(matches!(result, Err(ValidationError::ContainsErrorArtifact(_))));
    }

    #[test]
    fn unbalanced_braces_are_a_syntax_error() {
        let text = indoc! {r#"
            if (x > 0) {
                Process(x);
        "#};
        assert_eq!(
            validator().validate(text, &csharp_context(), profile().as_ref()),
            Err(ValidationError::SyntaxError)
        );
    }

    #[test]
    fn missing_terminator_is_a_syntax_error() {
        assert_eq!(
            validator().validate("var x = 5", &csharp_context(), profile().as_ref()),
            Err(ValidationError::SyntaxError)
        );
    }

    #[test]
    fn delimiters_inside_strings_are_ignored() {
        let result = validator().validate(
            r#"var x = "unbalanced ( [ {";"#,
            &csharp_context(),
            profile().as_ref(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn truncated_json_is_incomplete_structured_data() {
        let text = r#"{"name": "value", "items": ["#;
        assert_eq!(
            validator().validate(text, &csharp_context(), profile().as_ref()),
            Err(ValidationError::IncompleteStructuredData)
        );
    }

    #[test]
    fn leading_orphan_closer_is_incomplete_structured_data() {
        assert_eq!(
            validator().validate("} var x = 5;", &csharp_context(), profile().as_ref()),
            Err(ValidationError::IncompleteStructuredData)
        );
    }

    #[test]
    fn hardcoded_password_is_unsafe() {
        let result = validator().validate(
            r#"var password = "abc123";"#,
            &csharp_context(),
            profile().as_ref(),
        );
        assert!(matches!(result, Err(ValidationError::UnsafeContent(_))));
    }

    #[test]
    fn destructive_shell_command_is_unsafe() {
        let result = validator().validate(
            r#"Shell.Run("rm -rf /tmp/cache");"#,
            &csharp_context(),
            profile().as_ref(),
        );
        assert!(matches!(result, Err(ValidationError::UnsafeContent(_))));
    }

    #[test]
    fn unrelated_prose_without_keywords_is_irrelevant() {
        let result = validator().validate(
            "banana smoothie recipe;",
            &csharp_context(),
            profile().as_ref(),
        );
        assert_eq!(result, Err(ValidationError::IrrelevantContent));
    }

    #[test]
    fn keyword_alone_satisfies_relevance() {
        // No token overlap with the context, but a language keyword is
        // present, so the OR rule keeps it.
        let result = validator().validate(
            "return totalAmount;",
            &csharp_context(),
            profile().as_ref(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn check_order_error_artifact_before_syntax() {
        // Both an artifact and unbalanced braces: the artifact check runs
        // first and wins.
        let result = validator().validate(
            "I'm sorry, I cannot help { ",
            &csharp_context(),
            profile().as_ref(),
        );
        assert!(matches!(result, Err(ValidationError::ContainsErrorArtifact(_))));
    }

    #[test]
    fn balance_scanner_reports_missing_closers() {
        let balance = delimiter_balance("foo(bar[1", "//");
        assert_eq!(balance.unclosed_opens, vec!['(', '[']);
        assert!(balance.unopened_closes.is_empty());
    }

    #[test]
    fn balance_scanner_reports_orphan_closers() {
        let balance = delimiter_balance(")x]", "//");
        assert!(balance.unclosed_opens.is_empty());
        assert_eq!(balance.unopened_closes, vec![')', ']']);
    }
}
