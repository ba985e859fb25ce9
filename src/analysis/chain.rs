//! Ordered parse-strategy fallback chain.

use tracing::debug;

use crate::error::ParseError;

use super::{Language, NodeTree, ParseStrategy, Strategy};

/// Final stage: a node-less tree that only supports whole-file comparison.
pub struct OpaqueStrategy {
    language: Language,
}

impl OpaqueStrategy {
    pub fn new(language: Language) -> Self {
        Self { language }
    }
}

impl ParseStrategy for OpaqueStrategy {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn strategy(&self) -> Strategy {
        Strategy::Opaque
    }

    fn parse(&self, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        Ok(NodeTree::opaque(path, self.language, source.len()))
    }
}

/// Strategies tried in order until one succeeds.
pub struct FallbackChain {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl FallbackChain {
    /// Build a chain from the given stages, always terminated by the opaque
    /// stage.
    pub fn new(language: Language, strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        let mut strategies = strategies;
        if strategies
            .last()
            .map(|s| s.strategy() != Strategy::Opaque)
            .unwrap_or(true)
        {
            strategies.push(Box::new(OpaqueStrategy::new(language)));
        }
        Self { strategies }
    }

    /// Build a chain with no implicit opaque stage.
    pub fn without_fallback(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run each stage in order. The first success wins; every failure is
    /// logged and the next stage is tried.
    pub fn parse(&self, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        self.parse_from(Strategy::Grammar, path, source)
    }

    /// As [`FallbackChain::parse`], skipping stages stronger than `floor`.
    pub fn parse_from(&self, floor: Strategy, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        let mut last_err = ParseError::Exhausted;
        for stage in self.strategies.iter().filter(|s| s.strategy() >= floor) {
            match stage.parse(path, source) {
                Ok(tree) => {
                    debug!(
                        path,
                        strategy = stage.name(),
                        nodes = tree.nodes.len(),
                        "parsed snapshot"
                    );
                    return Ok(tree);
                }
                Err(e) => {
                    debug!(path, strategy = stage.name(), error = %e, "parse stage failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl ParseStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn strategy(&self) -> Strategy {
            Strategy::Grammar
        }
        fn parse(&self, _path: &str, _source: &str) -> Result<NodeTree, ParseError> {
            Err(ParseError::Syntax {
                strategy: "failing",
                line: 1,
            })
        }
    }

    #[test]
    fn test_failure_advances_to_opaque() {
        let chain = FallbackChain::new(Language::Python, vec![Box::new(Failing)]);
        let tree = chain.parse("a.py", "???").unwrap();
        assert!(tree.is_opaque());
        assert_eq!(chain.strategy_names(), vec!["failing", "opaque"]);
    }

    struct Succeeding(Strategy);

    impl ParseStrategy for Succeeding {
        fn name(&self) -> &'static str {
            self.0.as_str()
        }
        fn strategy(&self) -> Strategy {
            self.0
        }
        fn parse(&self, path: &str, _source: &str) -> Result<NodeTree, ParseError> {
            Ok(NodeTree::new(path, Language::Python, self.0, 0))
        }
    }

    #[test]
    fn test_parse_from_skips_stronger_stages() {
        let chain = FallbackChain::new(
            Language::Python,
            vec![
                Box::new(Succeeding(Strategy::Grammar)),
                Box::new(Succeeding(Strategy::Regex)),
            ],
        );
        assert_eq!(chain.parse("a.py", "").unwrap().strategy, Strategy::Grammar);
        let tree = chain.parse_from(Strategy::Legacy, "a.py", "").unwrap();
        assert_eq!(tree.strategy, Strategy::Regex);
        let tree = chain.parse_from(Strategy::Opaque, "a.py", "").unwrap();
        assert!(tree.is_opaque());
    }

    #[test]
    fn test_empty_chain_reports_last_error() {
        let chain = FallbackChain::without_fallback(vec![Box::new(Failing)]);
        let err = chain.parse("a.py", "").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }
}
