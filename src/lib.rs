//! AI completion middleware: debouncing, caching, validation, scoring,
//! correction, and ranking between an editor and a remote completion
//! provider.
//!
//! The entry point is [`engine::CompletionEngine`]; everything it
//! orchestrates is also usable piecemeal.

pub mod cache;
pub mod config;
pub mod context;
pub mod correct;
pub mod debounce;
pub mod engine;
pub mod language;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod rank;
pub mod score;
pub mod validate;

pub use config::{EngineConfig, RequestPriority};
pub use context::{CodeContext, CodeContextBuilder, EditRecord, IndentStyle, OptimizedContext};
pub use engine::CompletionEngine;
pub use models::{CodeSuggestion, RemoteReply, Span, SuggestionKind, SuggestionSource};
pub use validate::ValidationError;
