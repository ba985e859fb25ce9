//! Cost gate in front of the interpreter.

use crate::analysis::NodeTree;
use crate::config::{GateConfig, GateWeights};
use crate::event::SemanticEvent;
use crate::matcher::ChangeSet;

/// What the gate and the prompt builder see for one file.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub before: &'a NodeTree,
    pub after: &'a NodeTree,
    pub changes: &'a ChangeSet,
    /// Layer 1-5a events already produced for the file.
    pub events: &'a [SemanticEvent],
}

/// Pluggable complexity score for a file change.
pub trait GateScorer: Send + Sync {
    fn score(&self, input: &GateInput<'_>) -> f64;
}

/// Weighted sum of file size, lower-layer events, imports and decorators.
#[derive(Debug, Clone)]
pub struct WeightedGateScorer {
    weights: GateWeights,
}

impl WeightedGateScorer {
    pub fn new(weights: GateWeights) -> Self {
        Self { weights }
    }
}

impl Default for WeightedGateScorer {
    fn default() -> Self {
        Self::new(GateWeights::default())
    }
}

impl GateScorer for WeightedGateScorer {
    fn score(&self, input: &GateInput<'_>) -> f64 {
        let w = &self.weights;
        let kib = input.before.source_len.max(input.after.source_len) as f64 / 1024.0;
        w.file_kib * kib
            + w.lower_event * input.events.len() as f64
            + w.import * input.after.imports.len() as f64
            + w.decorator * input.after.decorator_count() as f64
    }
}

/// Why the interpreter was not called.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Disabled,
    NoProviders,
    Cancelled,
    /// A snapshot could only be compared as a whole.
    Opaque,
    /// Whitespace, comment or literal-only change.
    Trivial,
    BelowThreshold { score: f64, threshold: f64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "interpreter disabled"),
            SkipReason::NoProviders => write!(f, "no providers configured"),
            SkipReason::Cancelled => write!(f, "run cancelled"),
            SkipReason::Opaque => write!(f, "opaque snapshot"),
            SkipReason::Trivial => write!(f, "trivial change"),
            SkipReason::BelowThreshold { score, threshold } => {
                write!(f, "score {:.2} below threshold {:.2}", score, threshold)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Skip(SkipReason),
    Invoke { score: f64 },
}

/// No node was added or removed, imports are unchanged, and every modified
/// node differs only in literal values.
///
/// Whitespace and comment-only edits leave canonical text unchanged, so they
/// produce no candidates at all and land here too.
pub fn is_trivial(input: &GateInput<'_>) -> bool {
    let changes = input.changes;
    if !changes.added.is_empty() || !changes.removed.is_empty() {
        return false;
    }
    if input.before.imports != input.after.imports {
        return false;
    }
    changes.candidates().all(|id| {
        match (input.before.get(id), input.after.get(id)) {
            (Some(b), Some(a)) => b.shape_text == a.shape_text,
            _ => false,
        }
    })
}

/// Decide whether a file is worth an external call.
pub fn evaluate(scorer: &dyn GateScorer, config: &GateConfig, input: &GateInput<'_>) -> GateDecision {
    if input.before.is_opaque() || input.after.is_opaque() {
        return GateDecision::Skip(SkipReason::Opaque);
    }
    if is_trivial(input) {
        return GateDecision::Skip(SkipReason::Trivial);
    }
    let score = scorer.score(input);
    if score < config.threshold {
        return GateDecision::Skip(SkipReason::BelowThreshold {
            score,
            threshold: config.threshold,
        });
    }
    GateDecision::Invoke { score }
}
