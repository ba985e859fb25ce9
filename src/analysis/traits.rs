//! Core traits for language adapters.

use crate::error::ParseError;

use super::{FallbackChain, Language, NodeTree, Strategy};

/// One stage of an adapter's fallback chain.
///
/// A strategy either produces a complete [`NodeTree`] or a typed
/// [`ParseError`] telling the chain to move on.
pub trait ParseStrategy: Send + Sync {
    /// Short identifier used in logs and errors (e.g. "python-strict").
    fn name(&self) -> &'static str;

    /// Which fallback stage this strategy represents.
    fn strategy(&self) -> Strategy;

    fn parse(&self, path: &str, source: &str) -> Result<NodeTree, ParseError>;
}

/// Language-specific adapter trait.
///
/// Each supported language implements this trait and is looked up through
/// the closed [`Language`] enum.
///
/// # Thread Safety
///
/// tree_sitter::Parser is not Sync, so strategies create parsers per call.
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> Language;

    /// Returns file extensions this adapter handles (without dot).
    fn file_extensions(&self) -> &'static [&'static str];

    /// The ordered strategies tried for every parse.
    fn chain(&self) -> &FallbackChain;

    /// Parse a source snapshot into a node tree.
    ///
    /// Walks the fallback chain; a chain always ends in the opaque stage, so
    /// an error here means the chain itself was empty.
    fn parse(&self, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        self.chain().parse(path, source)
    }

    /// Parse using only the stages at or below `floor`, so two snapshots can
    /// be brought onto the same strategy.
    fn parse_from(&self, floor: Strategy, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        self.chain().parse_from(floor, path, source)
    }

    /// Check if this adapter handles the given file extension.
    fn handles_extension(&self, ext: &str) -> bool {
        self.file_extensions().contains(&ext)
    }
}
