//! Core data model for the completion pipeline
//!
//! Suggestions flow through the pipeline as [`CodeSuggestion`] values whose
//! confidence is clamped to `[0, 1]` at construction and at every mutation
//! point. The remote provider's wire format is parsed at the boundary into
//! [`RemoteReply`] with explicit optional, defaulted fields rather than
//! carried through as untyped JSON.

use serde::{Deserialize, Serialize};

/// Target insertion/replacement span for a suggestion, in editor
/// coordinates (zero-based line, zero-based column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    /// A zero-width span at the given cursor position (pure insertion).
    pub fn insertion_at(line: u32, column: u32) -> Self {
        Self {
            start_line: line,
            start_column: column,
            end_line: line,
            end_column: column,
        }
    }
}

/// Coarse category of a suggestion, used by ranking to match the
/// immediate syntactic position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuggestionKind {
    Method,
    Variable,
    Type,
    Comment,
    Import,
    Snippet,
    General,
}

impl SuggestionKind {
    pub fn label(&self) -> &'static str {
        match self {
            SuggestionKind::Method => "method",
            SuggestionKind::Variable => "variable",
            SuggestionKind::Type => "type",
            SuggestionKind::Comment => "comment",
            SuggestionKind::Import => "import",
            SuggestionKind::Snippet => "snippet",
            SuggestionKind::General => "general",
        }
    }
}

/// Where a suggestion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionSource {
    /// Raw remote completion that passed validation unchanged
    Remote,
    /// Remote completion repaired by the corrector
    Corrected,
    /// Deterministic fallback template (remote output was unusable)
    Fallback,
    /// Served from the suggestion cache
    Cached,
}

/// A vetted completion candidate ready for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSuggestion {
    pub text: String,
    pub span: Span,
    /// Confidence in `[0, 1]`. Always clamped; use [`CodeSuggestion::with_confidence`]
    /// to mutate.
    pub confidence: f64,
    pub kind: SuggestionKind,
    pub description: String,
    /// Derived priority, 0-100. Higher sorts earlier.
    pub priority: u8,
    /// True when the text is a prefix of a larger completion (provider
    /// reported truncation).
    pub is_partial: bool,
    pub source: SuggestionSource,
}

impl CodeSuggestion {
    pub fn new(text: impl Into<String>, span: Span, confidence: f64) -> Self {
        Self {
            text: text.into(),
            span,
            confidence: confidence.clamp(0.0, 1.0),
            kind: SuggestionKind::General,
            description: String::new(),
            priority: 50,
            is_partial: false,
            source: SuggestionSource::Remote,
        }
    }

    /// An empty suggestion with zero confidence, used when the pipeline
    /// cannot produce anything displayable.
    pub fn empty(span: Span) -> Self {
        let mut s = Self::new("", span, 0.0);
        s.priority = 0;
        s
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_kind(mut self, kind: SuggestionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    pub fn with_source(mut self, source: SuggestionSource) -> Self {
        self.source = source;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Wire schema for the remote provider's response body.
///
/// Providers are inconsistent: some return a JSON envelope, some return the
/// completion as a bare string. All envelope fields beyond `completion` are
/// optional and defaulted so that schema drift never aborts the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteReply {
    #[serde(default, alias = "text", alias = "suggestion")]
    pub completion: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl RemoteReply {
    /// Parse a raw provider body. A JSON envelope is decoded field by
    /// field; anything else is taken verbatim as the completion text.
    pub fn from_wire(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') {
            if let Ok(reply) = serde_json::from_str::<RemoteReply>(trimmed) {
                return reply;
            }
        }
        Self {
            completion: raw.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped_at_construction() {
        let span = Span::insertion_at(0, 0);
        assert_eq!(CodeSuggestion::new("x", span, 1.7).confidence, 1.0);
        assert_eq!(CodeSuggestion::new("x", span, -0.3).confidence, 0.0);
        assert_eq!(
            CodeSuggestion::new("x", span, 0.4).with_confidence(2.0).confidence,
            1.0
        );
    }

    #[test]
    fn wire_envelope_with_defaults() {
        let reply = RemoteReply::from_wire(r#"{"completion": "var x = 5;"}"#);
        assert_eq!(reply.completion, "var x = 5;");
        assert!(!reply.truncated);
        assert!(reply.model.is_none());
    }

    #[test]
    fn wire_envelope_accepts_text_alias() {
        let reply = RemoteReply::from_wire(r#"{"text": "foo()", "truncated": true}"#);
        assert_eq!(reply.completion, "foo()");
        assert!(reply.truncated);
    }

    #[test]
    fn non_json_body_is_plain_text() {
        let reply = RemoteReply::from_wire("let y = 10;");
        assert_eq!(reply.completion, "let y = 10;");
        assert!(reply.finish_reason.is_none());
    }

    #[test]
    fn malformed_json_falls_back_to_plain_text() {
        let reply = RemoteReply::from_wire("{not valid json");
        assert_eq!(reply.completion, "{not valid json");
    }
}
