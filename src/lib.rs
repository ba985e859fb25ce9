//! changesense - semantic change detection.
//!
//! Given two versions of a source file, changesense reports what the change
//! means: typed, confidence-scored events from structural edits up to
//! inferred intent such as "security improvement" or "extract method".
//!
//! # Architecture
//!
//! - `analysis`: language adapters, node model and parse fallback chains
//! - `matcher`: before/after node identity matching
//! - `classify`: deterministic layers 1-4
//! - `patterns`: heuristic layer 5a
//! - `interpret`: gated provider-backed layer 5b
//! - `context`: per-run configuration, counters and cancellation
//! - `engine`: per-file and batch pipelines
//! - `report`: output formatting (pretty, JSON)
//!
//! # Adding a New Language
//!
//! See `src/analysis/languages/` for examples. Implement `LanguageAdapter`
//! with a `FallbackChain` and add a variant to `Language`.

pub mod analysis;
pub mod classify;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod interpret;
pub mod matcher;
pub mod patterns;
pub mod report;

pub use analysis::{get_adapter, Language, LanguageAdapter, NodeTree, SemanticNode, Strategy};
pub use config::EngineConfig;
pub use context::{AnalysisContext, CancelToken, CounterSnapshot};
pub use engine::{analyze_batch, analyze_deterministic, analyze_file, FileAnalysis, FileChange};
pub use error::{ClassificationError, ConfigError, ParseError, ProviderError};
pub use event::{EventType, Layer, SemanticEvent};
pub use interpret::{AiProvider, GateScorer, OpenAiCompatibleProvider, Prompt, RawResponse};
pub use matcher::{diff, ChangeSet};
