//! Deterministic classifiers, layers 1 through 4.
//!
//! Layer 1 is plain set arithmetic over a [`ChangeSet`]. Layers 2-4 are lists
//! of independent [`Rule`]s applied to every candidate node pair; a rule that
//! fails is logged and skipped without affecting its neighbours.

mod behavioral;
mod semantic;
mod structural;
mod syntactic;

pub use behavioral::RULES as BEHAVIORAL_RULES;
pub use semantic::RULES as SEMANTIC_RULES;
pub use structural::{file_added, file_removed, opaque_change, structural};
pub use syntactic::RULES as SYNTACTIC_RULES;

use std::collections::BTreeSet;
use std::fmt::Display;

use tracing::warn;

use crate::analysis::{NodeTree, SemanticNode};
use crate::config::Thresholds;
use crate::error::ClassificationError;
use crate::event::{EventType, SemanticEvent};
use crate::matcher::ChangeSet;

/// A node present in both snapshots with differing canonical text.
#[derive(Debug, Clone, Copy)]
pub struct NodePair<'a> {
    pub id: &'a str,
    pub before: &'a SemanticNode,
    pub after: &'a SemanticNode,
    pub location: &'a str,
    /// Both snapshots carry walker-derived body facts.
    pub has_facts: bool,
}

impl<'a> NodePair<'a> {
    pub fn event(&self, event_type: EventType, details: impl Into<String>) -> SemanticEvent {
        SemanticEvent::deterministic(event_type, self.id, self.location, details)
    }

    /// Ok(true) when both sides are callables, Ok(false) when neither is.
    pub fn callable(&self, rule: &'static str) -> Result<bool, ClassificationError> {
        match (self.before.kind.is_callable(), self.after.kind.is_callable()) {
            (true, true) => Ok(true),
            (false, false) => Ok(false),
            _ => Err(self.kind_mismatch(rule)),
        }
    }

    /// Ok(true) when both sides are classes, Ok(false) when neither is.
    pub fn class_scoped(&self, rule: &'static str) -> Result<bool, ClassificationError> {
        use crate::analysis::NodeKind::Class;
        match (self.before.kind == Class, self.after.kind == Class) {
            (true, true) => Ok(true),
            (false, false) => Ok(false),
            _ => Err(self.kind_mismatch(rule)),
        }
    }

    fn kind_mismatch(&self, rule: &'static str) -> ClassificationError {
        ClassificationError::new(
            rule,
            self.id,
            format!(
                "node kind changed from {} to {}",
                self.before.kind, self.after.kind
            ),
        )
    }
}

/// Candidate pairs in id order.
pub fn node_pairs<'a>(
    before: &'a NodeTree,
    after: &'a NodeTree,
    changes: &'a ChangeSet,
) -> Vec<NodePair<'a>> {
    let has_facts = before.strategy.has_body_facts() && after.strategy.has_body_facts();
    changes
        .candidates()
        .filter_map(|id| {
            Some(NodePair {
                id: id.as_str(),
                before: before.get(id)?,
                after: after.get(id)?,
                location: after.path.as_str(),
                has_facts,
            })
        })
        .collect()
}

pub type RuleFn =
    fn(&NodePair<'_>, &Thresholds) -> Result<Vec<SemanticEvent>, ClassificationError>;

/// One named classification rule.
pub struct Rule {
    pub name: &'static str,
    /// Skip unless both snapshots carry body facts.
    pub needs_facts: bool,
    pub apply: RuleFn,
}

/// Events and isolated failures from one layer.
#[derive(Debug, Default)]
pub struct LayerOutcome {
    pub events: Vec<SemanticEvent>,
    pub failures: Vec<ClassificationError>,
}

impl LayerOutcome {
    pub fn merge(&mut self, other: LayerOutcome) {
        self.events.extend(other.events);
        self.failures.extend(other.failures);
    }
}

/// Apply every rule to every pair, isolating failures per rule.
pub fn run_rules(rules: &[Rule], pairs: &[NodePair<'_>], thresholds: &Thresholds) -> LayerOutcome {
    let mut outcome = LayerOutcome::default();
    for pair in pairs {
        for rule in rules {
            if rule.needs_facts && !pair.has_facts {
                continue;
            }
            match (rule.apply)(pair, thresholds) {
                Ok(events) => outcome.events.extend(events),
                Err(e) => {
                    warn!(rule = rule.name, node_id = pair.id, error = %e, "classification rule failed");
                    outcome.failures.push(e);
                }
            }
        }
    }
    outcome
}

/// (added, removed) between two ordered sets.
pub(crate) fn set_diff<'s, T: Ord>(
    before: &'s BTreeSet<T>,
    after: &'s BTreeSet<T>,
) -> (Vec<&'s T>, Vec<&'s T>) {
    (
        after.difference(before).collect(),
        before.difference(after).collect(),
    )
}

pub(crate) fn join<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `added: a, b; removed: c`
pub(crate) fn describe_diff<T: Display>(added: &[T], removed: &[T]) -> String {
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("added: {}", join(added)));
    }
    if !removed.is_empty() {
        parts.push(format!("removed: {}", join(removed)));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Language, NodeKind, Strategy};

    fn failing(pair: &NodePair<'_>, _: &Thresholds) -> Result<Vec<SemanticEvent>, ClassificationError> {
        Err(ClassificationError::new("failing", pair.id, "boom"))
    }

    fn passing(pair: &NodePair<'_>, _: &Thresholds) -> Result<Vec<SemanticEvent>, ClassificationError> {
        Ok(vec![pair.event(EventType::SignatureChanged, "ok")])
    }

    #[test]
    fn test_failing_rule_is_isolated() {
        let before = SemanticNode::new(NodeKind::Function, "f", "f");
        let after = before.clone();
        let pair = NodePair {
            id: "func:f",
            before: &before,
            after: &after,
            location: "a.py",
            has_facts: true,
        };
        let rules = [
            Rule { name: "failing", needs_facts: false, apply: failing },
            Rule { name: "passing", needs_facts: false, apply: passing },
        ];
        let outcome = run_rules(&rules, &[pair], &Thresholds::default());
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].rule, "failing");
    }

    #[test]
    fn test_fact_rules_skipped_without_facts() {
        let node = SemanticNode::new(NodeKind::Function, "f", "f");
        let pair = NodePair {
            id: "func:f",
            before: &node,
            after: &node,
            location: "a.py",
            has_facts: false,
        };
        let rules = [Rule { name: "passing", needs_facts: true, apply: passing }];
        let outcome = run_rules(&rules, &[pair], &Thresholds::default());
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_node_pairs_only_candidates() {
        let mut before = NodeTree::new("a.py", Language::Python, Strategy::Grammar, 0);
        let mut after = NodeTree::new("a.py", Language::Python, Strategy::Regex, 0);
        for (name, b, a) in [("f", "x", "x"), ("g", "x", "y")] {
            let mut node = SemanticNode::new(NodeKind::Function, name, name);
            node.canonical_text = b.into();
            before.insert(node.clone());
            node.canonical_text = a.into();
            after.insert(node);
        }
        let changes = crate::matcher::diff(&before, &after);
        let pairs = node_pairs(&before, &after, &changes);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].id, "func:g");
        assert!(!pairs[0].has_facts);
    }

    #[test]
    fn test_kind_mismatch_is_error() {
        let before = SemanticNode::new(NodeKind::Class, "B", "A.B");
        let after = SemanticNode::new(NodeKind::Method, "B", "A.B");
        let pair = NodePair {
            id: "class:A.B",
            before: &before,
            after: &after,
            location: "a.py",
            has_facts: true,
        };
        assert!(pair.class_scoped("class_methods").is_err());
        assert!(pair.callable("signature").is_err());
    }
}
