//! Layer 5a: heuristic recognition of higher-level change patterns.
//!
//! Each rule combines weighted signals drawn from the layer 1-4 events and
//! the raw node facts into one confidence value. Rules are independent: a
//! failing rule is logged and skipped, and disabled rules never run.

mod catalog;
mod rules;

pub use catalog::{last_segment, sensitive};
pub use rules::RULES;

use tracing::{debug, warn};

use crate::analysis::{NodeTree, SemanticNode};
use crate::classify::{node_pairs, LayerOutcome, NodePair};
use crate::config::PatternConfig;
use crate::error::ClassificationError;
use crate::event::{clamp_confidence, EventType, Layer, SemanticEvent};
use crate::matcher::ChangeSet;

/// Everything a pattern rule may look at.
pub struct PatternInput<'a> {
    pub before: &'a NodeTree,
    pub after: &'a NodeTree,
    pub changes: &'a ChangeSet,
    /// Layer 1-4 events for this file.
    pub events: &'a [SemanticEvent],
    pub pairs: Vec<NodePair<'a>>,
}

impl<'a> PatternInput<'a> {
    pub fn new(
        before: &'a NodeTree,
        after: &'a NodeTree,
        changes: &'a ChangeSet,
        events: &'a [SemanticEvent],
    ) -> Self {
        Self {
            before,
            after,
            changes,
            events,
            pairs: node_pairs(before, after, changes),
        }
    }

    pub fn location(&self) -> &'a str {
        self.after.path.as_str()
    }

    pub fn has_event(&self, node_id: &str, event_type: EventType) -> bool {
        self.events
            .iter()
            .any(|e| e.event_type == event_type && e.node_id == node_id)
    }

    pub fn events_of(&self, event_type: EventType) -> impl Iterator<Item = &'a SemanticEvent> {
        self.events.iter().filter(move |e| e.event_type == event_type)
    }

    pub fn added_nodes(&self) -> impl Iterator<Item = &'a SemanticNode> {
        let after = self.after;
        self.changes.added.iter().filter_map(move |id| after.get(id))
    }

    pub fn removed_nodes(&self) -> impl Iterator<Item = &'a SemanticNode> {
        let before = self.before;
        self.changes.removed.iter().filter_map(move |id| before.get(id))
    }

    /// The pair an event refers to. A missing pair means the event and the
    /// change set disagree.
    pub fn pair_for(
        &self,
        rule: &'static str,
        node_id: &str,
    ) -> Result<&NodePair<'a>, ClassificationError> {
        self.pairs
            .iter()
            .find(|p| p.id == node_id)
            .ok_or_else(|| ClassificationError::new(rule, node_id, "event refers to no candidate node"))
    }

    /// Module-level node id of the file.
    pub fn module_id(&self) -> String {
        format!("module:{}", crate::analysis::module_id_name(self.location()))
    }

    /// Build an interpretive event from a signal set.
    pub fn emit(
        &self,
        event_type: EventType,
        node_id: &str,
        signals: &SignalSet,
        details: impl Into<String>,
    ) -> SemanticEvent {
        SemanticEvent::interpretive(
            event_type,
            Layer::Pattern,
            node_id,
            self.location(),
            signals.confidence(),
            details,
        )
        .with_reasoning(signals.reasoning())
        .with_impact(impact(event_type))
    }
}

#[derive(Debug, Clone)]
struct Signal {
    label: String,
    weight: f64,
    strength: f64,
}

/// Weighted evidence for one pattern.
///
/// Confidence is the weight-normalised sum of signal strengths, so a rule
/// declares every signal it considers, present or not.
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    signals: Vec<Signal>,
}

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: impl Into<String>, weight: f64, strength: f64) -> &mut Self {
        self.signals.push(Signal {
            label: label.into(),
            weight: weight.max(0.0),
            strength: clamp_confidence(strength),
        });
        self
    }

    pub fn flag(&mut self, label: impl Into<String>, weight: f64, present: bool) -> &mut Self {
        self.add(label, weight, if present { 1.0 } else { 0.0 })
    }

    pub fn confidence(&self) -> f64 {
        let total: f64 = self.signals.iter().map(|s| s.weight).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let score: f64 = self.signals.iter().map(|s| s.weight * s.strength).sum();
        clamp_confidence(score / total)
    }

    /// Signals that fired, e.g. `new node (1.00), call added (1.00)`.
    pub fn reasoning(&self) -> String {
        let fired: Vec<String> = self
            .signals
            .iter()
            .filter(|s| s.strength > 0.0)
            .map(|s| format!("{} ({:.2})", s.label, s.strength))
            .collect();
        if fired.is_empty() {
            "no corroborating signals".to_string()
        } else {
            format!("signals: {}", fired.join(", "))
        }
    }
}

pub type PatternFn = fn(&PatternInput<'_>) -> Result<Vec<SemanticEvent>, ClassificationError>;

/// One named heuristic rule.
pub struct PatternRule {
    pub name: &'static str,
    pub detect: PatternFn,
}

/// Names accepted by `patterns.disabled_rules`.
pub fn rule_names() -> Vec<&'static str> {
    RULES.iter().map(|r| r.name).collect()
}

/// Run every enabled rule; drop events under the confidence floor.
pub fn recognize(input: &PatternInput<'_>, config: &PatternConfig) -> LayerOutcome {
    run_patterns(RULES, input, config)
}

fn run_patterns(
    rules: &[PatternRule],
    input: &PatternInput<'_>,
    config: &PatternConfig,
) -> LayerOutcome {
    let mut outcome = LayerOutcome::default();
    for rule in rules.iter().filter(|r| config.is_enabled(r.name)) {
        match (rule.detect)(input) {
            Ok(events) => {
                for event in events {
                    if event.confidence >= config.min_confidence {
                        outcome.events.push(event);
                    } else {
                        debug!(
                            rule = rule.name,
                            event_type = %event.event_type,
                            confidence = event.confidence,
                            "pattern below confidence floor"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(rule = rule.name, error = %e, "pattern rule failed");
                outcome.failures.push(e);
            }
        }
    }
    outcome
}

/// One-line impact note attached to pattern events.
pub fn impact(event_type: EventType) -> &'static str {
    use EventType::*;
    match event_type {
        RefactoringExtractMethod => "behaviour preserved; logic moved into a new callable",
        RefactoringInlineMethod => "behaviour preserved; a helper was folded into its caller",
        AlgorithmOptimized => "same result with less work; verify edge cases",
        AlgorithmChanged => "computation changed; results may differ",
        PerformanceOptimization => "runtime cost reduced",
        SecurityVulnerability => "introduces a sensitive API; review for injection or weak crypto",
        SecurityImprovement => "removes a sensitive API or adopts a safer one",
        ErrorHandlingImproved => "failures are now caught or reported more precisely",
        ErrorHandlingRemoved => "failures now propagate to callers",
        ApiBreakingChange => "existing callers may break",
        ApiExtension => "new capability; existing callers unaffected",
        FeatureAddition => "new functionality added",
        FeatureRemoval => "functionality removed; check for remaining callers",
        BugFix => "corrects a condition or boundary",
        LoggingAdded => "more diagnostic output",
        LoggingRemoved => "less diagnostic output",
        ValidationAdded => "invalid input is now rejected earlier",
        ValidationRemoved => "invalid input is no longer rejected",
        CachingAdded => "results are reused; watch for stale data",
        CachingRemoved => "results are recomputed on every call",
        AsyncConversion => "callers must now await this callable",
        ConcurrencyIntroduced => "work now runs concurrently; check shared state",
        DeadCodeRemoved => "unused code deleted",
        CodeCleanup => "no behavioural change expected",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Language, Strategy};

    #[test]
    fn test_signal_confidence_is_normalised() {
        let mut signals = SignalSet::new();
        signals.flag("a", 0.6, true).flag("b", 0.4, false);
        assert!((signals.confidence() - 0.6).abs() < 1e-9);
        assert_eq!(signals.reasoning(), "signals: a (1.00)");

        let mut over = SignalSet::new();
        over.add("x", 1.0, 7.0);
        assert_eq!(over.confidence(), 1.0);
        assert_eq!(SignalSet::new().confidence(), 0.0);
    }

    fn failing(_: &PatternInput<'_>) -> Result<Vec<SemanticEvent>, ClassificationError> {
        Err(ClassificationError::new("failing", "x", "boom"))
    }

    #[test]
    fn test_rule_names_are_unique() {
        let mut names = rule_names();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(names.contains(&"security"));
    }

    #[test]
    fn test_failing_rule_isolated() {
        let tree = NodeTree::new("a.py", Language::Python, Strategy::Grammar, 0);
        let changes = ChangeSet::default();
        let input = PatternInput::new(&tree, &tree, &changes, &[]);
        let rules = [
            PatternRule {
                name: "failing",
                detect: failing,
            },
            PatternRule {
                name: "passing",
                detect: |input| {
                    let mut signals = SignalSet::new();
                    signals.flag("always", 1.0, true);
                    Ok(vec![input.emit(EventType::CodeCleanup, "module:a", &signals, "")])
                },
            },
        ];
        let outcome = run_patterns(&rules, &input, &PatternConfig::default());
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.failures.len(), 1);

        let disabled = PatternConfig {
            disabled_rules: vec!["failing".into()],
            ..Default::default()
        };
        assert!(run_patterns(&rules, &input, &disabled).failures.is_empty());
    }
}
