//! Pluggable per-language heuristics
//!
//! The validator, scorer, and corrector never hard-code language rules.
//! Each supported language contributes a [`LanguageProfile`] registered in a
//! [`LanguageRegistry`] and resolved by tag, so new-language support is a
//! single additive registration. Unknown tags resolve to a permissive
//! generic profile.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::context::CodeContext;

/// Identifier case convention a language's scope labels typically follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStyle {
    Camel,
    Pascal,
    Snake,
    Mixed,
}

/// Heuristic capabilities one language contributes to the pipeline.
pub trait LanguageProfile: Send + Sync {
    /// Canonical language tag (lowercase).
    fn tag(&self) -> &'static str;

    /// Keywords whose presence counts as a language-syntax match.
    fn keywords(&self) -> &'static [&'static str];

    /// Keywords opening declarations or control flow; lines containing one
    /// are prioritized by the context optimizer.
    fn structural_keywords(&self) -> &'static [&'static str];

    /// Statement terminator, if the language requires one.
    fn statement_terminator(&self) -> Option<char>;

    /// Line-comment marker.
    fn line_comment(&self) -> &'static str;

    /// Case convention of typical member identifiers.
    fn identifier_case(&self) -> CaseStyle;

    /// Minimal deterministic completion used when remote output is unusable.
    fn fallback_template(&self, context: &CodeContext) -> String;

    /// Whether text ends in a way this language accepts as complete.
    fn ends_complete(&self, text: &str) -> bool {
        let trimmed = text.trim_end();
        match self.statement_terminator() {
            Some(term) => {
                trimmed.ends_with(term)
                    || trimmed.ends_with('}')
                    || trimmed.ends_with('{')
                    || trimmed.ends_with(',')
            }
            // Terminator-free languages: any non-operator ending is fine.
            None => !trimmed.ends_with(['+', '-', '*', '/', '=', '.', ',', '(']),
        }
    }

    /// Whether a line is blank or pure comment.
    fn is_comment_or_blank(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with(self.line_comment())
    }
}

/// Default indentation-aware fallback: a comment placeholder when the
/// current line is blank, otherwise the line's own indentation plus a
/// terminator to close the statement the user started.
fn fallback_for(context: &CodeContext, terminator: Option<char>, comment: &str) -> String {
    let current = context.current_line.trim_end();
    if current.trim().is_empty() {
        return format!("{} TODO: implement", comment);
    }
    match terminator {
        Some(term) if !current.ends_with(term) => term.to_string(),
        _ => format!("{} ...", comment),
    }
}

macro_rules! profile {
    ($name:ident, $tag:literal, $kw:expr, $structural:expr,
     $term:expr, $comment:literal, $case:expr) => {
        struct $name;

        impl LanguageProfile for $name {
            fn tag(&self) -> &'static str {
                $tag
            }
            fn keywords(&self) -> &'static [&'static str] {
                $kw
            }
            fn structural_keywords(&self) -> &'static [&'static str] {
                $structural
            }
            fn statement_terminator(&self) -> Option<char> {
                $term
            }
            fn line_comment(&self) -> &'static str {
                $comment
            }
            fn identifier_case(&self) -> CaseStyle {
                $case
            }
            fn fallback_template(&self, context: &CodeContext) -> String {
                fallback_for(context, $term, $comment)
            }
        }
    };
}

profile!(
    CSharpProfile,
    "csharp",
    &[
        "var", "public", "private", "protected", "static", "void", "class", "interface",
        "namespace", "using", "return", "if", "else", "for", "foreach", "while", "switch",
        "new", "async", "await", "try", "catch", "string", "int", "bool",
    ],
    &[
        "public", "private", "protected", "class", "interface", "namespace", "void",
        "if", "else", "for", "foreach", "while", "switch", "try", "catch",
    ],
    Some(';'),
    "//",
    CaseStyle::Pascal
);

profile!(
    TypeScriptProfile,
    "typescript",
    &[
        "const", "let", "var", "function", "class", "interface", "type", "import", "export",
        "return", "if", "else", "for", "while", "switch", "new", "async", "await", "try",
        "catch", "string", "number", "boolean",
    ],
    &[
        "function", "class", "interface", "type", "import", "export", "if", "else", "for",
        "while", "switch", "try", "catch",
    ],
    Some(';'),
    "//",
    CaseStyle::Camel
);

profile!(
    JavaScriptProfile,
    "javascript",
    &[
        "const", "let", "var", "function", "class", "import", "export", "return", "if",
        "else", "for", "while", "switch", "new", "async", "await", "try", "catch",
    ],
    &[
        "function", "class", "import", "export", "if", "else", "for", "while", "switch",
        "try", "catch",
    ],
    Some(';'),
    "//",
    CaseStyle::Camel
);

profile!(
    PythonProfile,
    "python",
    &[
        "def", "class", "import", "from", "return", "if", "elif", "else", "for", "while",
        "try", "except", "with", "lambda", "async", "await", "self", "None", "True", "False",
    ],
    &[
        "def", "class", "import", "from", "if", "elif", "else", "for", "while", "try",
        "except", "with",
    ],
    None,
    "#",
    CaseStyle::Snake
);

profile!(
    RustProfile,
    "rust",
    &[
        "fn", "let", "mut", "pub", "struct", "enum", "impl", "trait", "use", "mod", "match",
        "if", "else", "for", "while", "loop", "return", "async", "await", "self", "Self",
    ],
    &[
        "fn", "pub", "struct", "enum", "impl", "trait", "use", "mod", "match", "if", "else",
        "for", "while", "loop",
    ],
    Some(';'),
    "//",
    CaseStyle::Snake
);

profile!(
    GoProfile,
    "go",
    &[
        "func", "var", "const", "type", "struct", "interface", "package", "import", "return",
        "if", "else", "for", "range", "switch", "case", "go", "defer", "chan", "map",
    ],
    &[
        "func", "type", "struct", "interface", "package", "import", "if", "else", "for",
        "switch", "case",
    ],
    None,
    "//",
    CaseStyle::Camel
);

/// Permissive profile for unrecognized language tags: no terminator
/// requirement and a keyword set empty enough that keyword checks are
/// effectively skipped.
struct GenericProfile;

impl LanguageProfile for GenericProfile {
    fn tag(&self) -> &'static str {
        "generic"
    }
    fn keywords(&self) -> &'static [&'static str] {
        &[]
    }
    fn structural_keywords(&self) -> &'static [&'static str] {
        &[]
    }
    fn statement_terminator(&self) -> Option<char> {
        None
    }
    fn line_comment(&self) -> &'static str {
        "//"
    }
    fn identifier_case(&self) -> CaseStyle {
        CaseStyle::Mixed
    }
    fn fallback_template(&self, context: &CodeContext) -> String {
        fallback_for(context, None, "//")
    }
}

/// Registry resolving language tags to profiles.
pub struct LanguageRegistry {
    profiles: FxHashMap<&'static str, Arc<dyn LanguageProfile>>,
    generic: Arc<dyn LanguageProfile>,
}

impl LanguageRegistry {
    /// Registry pre-loaded with the built-in profiles.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            profiles: FxHashMap::default(),
            generic: Arc::new(GenericProfile),
        };
        registry.register(Arc::new(CSharpProfile));
        registry.register(Arc::new(TypeScriptProfile));
        registry.register(Arc::new(JavaScriptProfile));
        registry.register(Arc::new(PythonProfile));
        registry.register(Arc::new(RustProfile));
        registry.register(Arc::new(GoProfile));
        registry
    }

    /// Register (or replace) a profile under its own tag.
    pub fn register(&mut self, profile: Arc<dyn LanguageProfile>) {
        self.profiles.insert(profile.tag(), profile);
    }

    /// Resolve a tag, falling back to the generic profile. Common tag
    /// aliases ("cs", "ts", "js", "py") are folded to their canonical tags.
    pub fn resolve(&self, tag: &str) -> Arc<dyn LanguageProfile> {
        let canonical = match tag.to_ascii_lowercase().as_str() {
            "cs" | "c#" => "csharp",
            "ts" => "typescript",
            "js" => "javascript",
            "py" => "python",
            "rs" => "rust",
            "golang" => "go",
            other => {
                return self
                    .profiles
                    .get(other)
                    .cloned()
                    .unwrap_or_else(|| self.generic.clone());
            }
        };
        self.profiles
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| self.generic.clone())
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
