//! Source analysis: language adapters that turn a file snapshot into a
//! [`NodeTree`] of semantic nodes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────────────┐     ┌──────────┐
//! │ Source text │────▶│ LanguageAdapter / FallbackChain  │────▶│ NodeTree │
//! └─────────────┘     │ grammar → legacy → regex → opaque│     └──────────┘
//!                     └──────────────────────────────────┘
//! ```
//!
//! Every chain ends in the opaque stage, so parsing never fails outright; the
//! [`Strategy`] recorded on the tree says which stage produced it.
//!
//! # Adding a New Language
//!
//! 1. Add a variant to [`Language`] and its tags in `Language::from_tag`
//! 2. Create a module in `src/analysis/languages/` with a [`Vocabulary`]-driven
//!    grammar build function and a regex fallback
//! 3. Implement [`LanguageAdapter`] and register it in `Language::adapter`

mod chain;
mod languages;
mod node;
pub(crate) mod regex_extract;
mod traits;
#[cfg(feature = "tree-sitter")]
pub(crate) mod walker;

pub use chain::{FallbackChain, OpaqueStrategy};
pub use languages::{
    get_adapter, registered_extensions, JavaScriptAdapter, Language, PhpAdapter, PythonAdapter,
};
pub use node::{
    histogram_distance, module_id_name, BodyFacts, ConstructKind, Histogram, NodeId, NodeKind,
    NodeTree, ParamKind, Parameter, SemanticNode, Signature, Span, Strategy,
};
pub use regex_extract::{BraceExtractor, IndentExtractor};
pub use traits::{LanguageAdapter, ParseStrategy};
#[cfg(feature = "tree-sitter")]
pub use walker::{GrammarStrategy, Vocabulary};
