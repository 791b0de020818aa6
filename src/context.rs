//! Code context snapshot and budget-bounded context optimization
//!
//! A [`CodeContext`] is an immutable per-request snapshot supplied by the
//! editor integration. The [`ContextOptimizer`] trims it to a character
//! budget before it is hashed into a cache key or sent to the remote
//! provider: structural lines survive over comments and blanks, surviving
//! lines keep their original relative order, and the result is fully
//! deterministic for a given (context, budget) pair.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;

use crate::language::LanguageProfile;

/// Whether a file indents with tabs or spaces, and by how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndentStyle {
    Tabs,
    Spaces { width: u8 },
}

impl Default for IndentStyle {
    fn default() -> Self {
        IndentStyle::Spaces { width: 4 }
    }
}

/// One entry of recent edit history, most recent first in the context.
#[derive(Debug, Clone)]
pub struct EditRecord {
    pub file: PathBuf,
    pub line: u32,
    /// Short description of the edit (e.g. the inserted text).
    pub summary: String,
    pub at: Instant,
}

/// Immutable snapshot of the editing position a completion is requested for.
#[derive(Debug, Clone)]
pub struct CodeContext {
    pub file: PathBuf,
    pub language: String,
    pub cursor_line: u32,
    pub cursor_column: u32,
    /// Lines above the cursor, in document order.
    pub preceding_lines: Vec<String>,
    /// Lines below the cursor, in document order.
    pub following_lines: Vec<String>,
    pub current_line: String,
    pub indent: IndentStyle,
    /// Label of the enclosing lexical scope (method/class name), if known.
    pub scope: Option<String>,
    /// Recent edits, most recent first, capped by the editor integration.
    pub recent_edits: Vec<EditRecord>,
}

impl CodeContext {
    pub fn builder(file: impl Into<PathBuf>, language: impl Into<String>) -> CodeContextBuilder {
        CodeContextBuilder {
            context: CodeContext {
                file: file.into(),
                language: language.into(),
                cursor_line: 0,
                cursor_column: 0,
                preceding_lines: Vec::new(),
                following_lines: Vec::new(),
                current_line: String::new(),
                indent: IndentStyle::default(),
                scope: None,
                recent_edits: Vec::new(),
            },
        }
    }

    /// Identifier-ish tokens appearing anywhere in the snapshot. Used by
    /// the scorer and the relevance check.
    pub fn identifiers(&self) -> FxHashSet<String> {
        let mut set = FxHashSet::default();
        let mut collect = |line: &str| {
            for token in split_identifiers(line) {
                set.insert(token.to_ascii_lowercase());
            }
        };
        collect(&self.current_line);
        for line in &self.preceding_lines {
            collect(line);
        }
        for line in &self.following_lines {
            collect(line);
        }
        if let Some(scope) = &self.scope {
            collect(scope);
        }
        set
    }
}

/// Builder so editor integrations only set what they have.
pub struct CodeContextBuilder {
    context: CodeContext,
}

impl CodeContextBuilder {
    pub fn cursor(mut self, line: u32, column: u32) -> Self {
        self.context.cursor_line = line;
        self.context.cursor_column = column;
        self
    }

    pub fn preceding_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.preceding_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn following_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.following_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn current_line(mut self, line: impl Into<String>) -> Self {
        self.context.current_line = line.into();
        self
    }

    pub fn indent(mut self, indent: IndentStyle) -> Self {
        self.context.indent = indent;
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.context.scope = Some(scope.into());
        self
    }

    pub fn recent_edits(mut self, edits: Vec<EditRecord>) -> Self {
        self.context.recent_edits = edits;
        self
    }

    pub fn build(self) -> CodeContext {
        self.context
    }
}

/// Split a line into identifier tokens (letters, digits, underscores,
/// starting with a letter or underscore).
pub(crate) fn split_identifiers(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| {
            !token.is_empty()
                && token
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphabetic() || c == '_')
        })
}

/// Context trimmed to budget, ready for hashing and prompt assembly.
#[derive(Debug, Clone)]
pub struct OptimizedContext {
    pub preceding_lines: Vec<String>,
    pub following_lines: Vec<String>,
    pub current_line: String,
    pub relevant_edits: Vec<EditRecord>,
}

impl OptimizedContext {
    /// Total characters across kept lines (each counted with a newline).
    pub fn content_len(&self) -> usize {
        self.preceding_lines
            .iter()
            .chain(self.following_lines.iter())
            .map(|line| line.len() + 1)
            .sum()
    }
}

/// Line classification used when trimming to budget.
fn line_priority(line: &str, profile: &dyn LanguageProfile) -> u8 {
    if profile.is_comment_or_blank(line) {
        return 0;
    }
    let has_structure = profile
        .structural_keywords()
        .iter()
        .any(|kw| split_identifiers(line).any(|token| token == *kw));
    if has_structure {
        2
    } else {
        1
    }
}

/// Deterministic, budget-bounded context trimming.
pub struct ContextOptimizer {
    pub edit_history_limit: usize,
    pub edit_recency_window: Duration,
}

impl ContextOptimizer {
    pub fn new(edit_history_limit: usize, edit_recency_window: Duration) -> Self {
        Self {
            edit_history_limit,
            edit_recency_window,
        }
    }

    /// Trim `context` so the kept preceding/following blocks fit in
    /// `budget` characters, half each. Structural lines win over plain
    /// code, which wins over comments and blanks; ties prefer lines nearer
    /// the cursor. Kept lines stay in original order.
    pub fn optimize(
        &self,
        context: &CodeContext,
        profile: &dyn LanguageProfile,
        budget: usize,
    ) -> OptimizedContext {
        let half = budget / 2;
        // Preceding lines: the end of the slice is adjacent to the cursor.
        let preceding = select_lines(&context.preceding_lines, profile, half, true);
        let following = select_lines(&context.following_lines, profile, half, false);

        OptimizedContext {
            preceding_lines: preceding,
            following_lines: following,
            current_line: context.current_line.clone(),
            relevant_edits: self.filter_edits(context),
        }
    }

    /// Edit-history relevance: same file always; other files only when
    /// edited inside the recency window and living in the same directory.
    fn filter_edits(&self, context: &CodeContext) -> Vec<EditRecord> {
        let now = Instant::now();
        let dir = context.file.parent();
        context
            .recent_edits
            .iter()
            .filter(|edit| {
                if edit.file == context.file {
                    return true;
                }
                let recent = now.duration_since(edit.at) <= self.edit_recency_window;
                let same_dir = match (dir, edit.file.parent()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                recent && same_dir
            })
            .take(self.edit_history_limit)
            .cloned()
            .collect()
    }
}

/// Pick lines from `lines` within `budget` chars (newline-inclusive),
/// highest priority first; within one priority, lines nearest the cursor
/// win. `cursor_at_end` is true for preceding blocks, whose last element
/// is adjacent to the cursor.
fn select_lines(
    lines: &[String],
    profile: &dyn LanguageProfile,
    budget: usize,
    cursor_at_end: bool,
) -> Vec<String> {
    let mut order: Vec<usize> = (0..lines.len()).collect();
    order.sort_by_key(|&i| {
        let priority = line_priority(&lines[i], profile);
        let distance = if cursor_at_end { lines.len() - 1 - i } else { i };
        // Lower key sorts first: best priority, then nearest to cursor.
        (u8::MAX - priority, distance)
    });

    let mut kept: FxHashSet<usize> = FxHashSet::default();
    let mut used = 0usize;
    for &i in &order {
        let cost = lines[i].len() + 1;
        if used + cost > budget {
            continue;
        }
        used += cost;
        kept.insert(i);
    }

    let mut result: Vec<String> = Vec::with_capacity(kept.len());
    for (i, line) in lines.iter().enumerate() {
        if kept.contains(&i) {
            result.push(line.clone());
        }
    }
    result
}
