//! Layer 4: usage-pattern histograms, complexity and class membership.

use crate::analysis::{histogram_distance, BodyFacts, Histogram};
use crate::config::Thresholds;
use crate::error::ClassificationError;
use crate::event::{EventType, SemanticEvent};

use super::{describe_diff, set_diff, NodePair, Rule};

type Outcome = Result<Vec<SemanticEvent>, ClassificationError>;

/// Histogram entries listed in event details.
const MAX_LISTED: usize = 6;

pub static RULES: &[Rule] = &[
    Rule { name: "binary_operators", needs_facts: true, apply: binary_operators },
    Rule { name: "unary_operators", needs_facts: true, apply: unary_operators },
    Rule { name: "comparison_operators", needs_facts: true, apply: comparison_operators },
    Rule { name: "logical_operators", needs_facts: true, apply: logical_operators },
    Rule { name: "string_literals", needs_facts: true, apply: string_literals },
    Rule { name: "numeric_literals", needs_facts: true, apply: numeric_literals },
    Rule { name: "boolean_literals", needs_facts: true, apply: boolean_literals },
    Rule { name: "none_literals", needs_facts: true, apply: none_literals },
    Rule { name: "attribute_access", needs_facts: true, apply: attribute_access },
    Rule { name: "subscript_access", needs_facts: true, apply: subscript_access },
    Rule { name: "assignments", needs_facts: true, apply: assignments },
    Rule { name: "augmented_assignments", needs_facts: true, apply: augmented_assignments },
    Rule { name: "complexity", needs_facts: true, apply: complexity },
    Rule { name: "class_methods", needs_facts: false, apply: class_methods },
    Rule { name: "class_attributes", needs_facts: false, apply: class_attributes },
];

/// `'+' 0 -> 1, '*' 2 -> 1`
fn histogram_delta(before: &Histogram, after: &Histogram) -> String {
    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();
    let changed: Vec<String> = keys
        .into_iter()
        .filter_map(|k| {
            let (b, a) = (
                before.get(k).copied().unwrap_or(0),
                after.get(k).copied().unwrap_or(0),
            );
            (b != a).then(|| format!("'{}' {} -> {}", k, b, a))
        })
        .collect();
    let mut listed = changed.iter().take(MAX_LISTED).cloned().collect::<Vec<_>>().join(", ");
    if changed.len() > MAX_LISTED {
        listed.push_str(&format!(" (+{} more)", changed.len() - MAX_LISTED));
    }
    listed
}

fn histogram(
    pair: &NodePair<'_>,
    thresholds: &Thresholds,
    ty: EventType,
    select: fn(&BodyFacts) -> &Histogram,
) -> Outcome {
    let (b, a) = (select(&pair.before.facts), select(&pair.after.facts));
    if histogram_distance(b, a) <= thresholds.histogram_tolerance {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(ty, histogram_delta(b, a))])
}

fn binary_operators(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::BinaryOperatorUsageChanged, |f| &f.binary_ops)
}

fn unary_operators(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::UnaryOperatorUsageChanged, |f| &f.unary_ops)
}

fn comparison_operators(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::ComparisonOperatorUsageChanged, |f| &f.comparison_ops)
}

fn logical_operators(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::LogicalOperatorUsageChanged, |f| &f.logical_ops)
}

fn string_literals(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::StringLiteralUsageChanged, |f| &f.string_literals)
}

fn numeric_literals(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::NumericLiteralUsageChanged, |f| &f.numeric_literals)
}

fn boolean_literals(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::BooleanLiteralUsageChanged, |f| &f.boolean_literals)
}

fn none_literals(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::NoneLiteralUsageChanged, |f| &f.none_literals)
}

fn attribute_access(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::AttributeAccessChanged, |f| &f.attribute_access)
}

fn assignments(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::AssignmentPatternChanged, |f| &f.assignments)
}

fn augmented_assignments(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    histogram(pair, t, EventType::AugmentedAssignmentChanged, |f| {
        &f.augmented_assignments
    })
}

fn subscript_access(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    let (b, a) = (pair.before.facts.subscript_count, pair.after.facts.subscript_count);
    if b.abs_diff(a) <= t.histogram_tolerance {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::SubscriptAccessChanged,
        format!("{} -> {}", b, a),
    )])
}

fn complexity(pair: &NodePair<'_>, t: &Thresholds) -> Outcome {
    if !pair.callable("complexity")? {
        return Ok(Vec::new());
    }
    let b = pair.before.facts.cyclomatic_complexity();
    let a = pair.after.facts.cyclomatic_complexity();
    if b.abs_diff(a) < t.complexity_delta.max(1) {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::FunctionComplexityChanged,
        format!("complexity {} -> {}", b, a),
    )])
}

fn class_methods(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    if !pair.class_scoped("class_methods")? {
        return Ok(Vec::new());
    }
    let (added, removed) = set_diff(&pair.before.members, &pair.after.members);
    if added.is_empty() && removed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::ClassMethodsChanged,
        describe_diff(&added, &removed),
    )])
}

fn class_attributes(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    if !pair.class_scoped("class_attributes")? {
        return Ok(Vec::new());
    }
    let (added, removed) = set_diff(&pair.before.attributes, &pair.after.attributes);
    if added.is_empty() && removed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::ClassAttributesChanged,
        describe_diff(&added, &removed),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{NodeKind, SemanticNode};
    use crate::classify::run_rules;

    fn run(before: &SemanticNode, after: &SemanticNode, thresholds: &Thresholds) -> Vec<SemanticEvent> {
        let pair = NodePair {
            id: before.id.as_str(),
            before,
            after,
            location: "a.py",
            has_facts: true,
        };
        run_rules(RULES, &[pair], thresholds).events
    }

    #[test]
    fn test_binary_operator_histogram() {
        let before = SemanticNode::new(NodeKind::Function, "f", "f");
        let mut after = before.clone();
        after.facts.binary_ops.insert("+".into(), 1);
        let events = run(&before, &after, &Thresholds::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::BinaryOperatorUsageChanged);
        assert_eq!(events[0].details, "'+' 0 -> 1");
    }

    #[test]
    fn test_tolerance_suppresses_small_changes() {
        let before = SemanticNode::new(NodeKind::Function, "f", "f");
        let mut after = before.clone();
        after.facts.string_literals.insert("'a'".into(), 1);
        let thresholds = Thresholds {
            histogram_tolerance: 1,
            ..Thresholds::default()
        };
        assert!(run(&before, &after, &thresholds).is_empty());
    }

    #[test]
    fn test_complexity_threshold() {
        let before = SemanticNode::new(NodeKind::Function, "f", "f");
        let mut small = before.clone();
        small.facts.decision_points = 1;
        assert!(run(&before, &small, &Thresholds::default()).is_empty());

        let mut large = before.clone();
        large.facts.decision_points = 3;
        let events = run(&before, &large, &Thresholds::default());
        assert_eq!(events[0].event_type, EventType::FunctionComplexityChanged);
        assert_eq!(events[0].details, "complexity 1 -> 4");
    }

    #[test]
    fn test_class_members() {
        let mut before = SemanticNode::new(NodeKind::Class, "C", "C");
        before.members.insert("a".into());
        let mut after = before.clone();
        after.members.insert("b".into());
        after.attributes.insert("x".into());
        let types: Vec<EventType> = run(&before, &after, &Thresholds::default())
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![EventType::ClassMethodsChanged, EventType::ClassAttributesChanged]
        );
    }

    #[test]
    fn test_histogram_delta_truncates() {
        let before = Histogram::new();
        let after: Histogram = (0..8).map(|i| (format!("k{}", i), 1)).collect();
        let text = histogram_delta(&before, &after);
        assert!(text.ends_with("(+2 more)"));
    }
}
