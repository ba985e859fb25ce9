//! Layer 3: body-shape differences.

use crate::analysis::ConstructKind;
use crate::config::Thresholds;
use crate::error::ClassificationError;
use crate::event::{EventType, SemanticEvent};

use super::{describe_diff, set_diff, NodePair, Rule};

type Outcome = Result<Vec<SemanticEvent>, ClassificationError>;

pub static RULES: &[Rule] = &[
    Rule { name: "control_flow", needs_facts: true, apply: control_flow },
    Rule { name: "generator", needs_facts: true, apply: generator },
    Rule { name: "exception_handling", needs_facts: true, apply: exception_handling },
    Rule { name: "exception_raising", needs_facts: true, apply: exception_raising },
    Rule { name: "internal_calls", needs_facts: true, apply: internal_calls },
    Rule { name: "comprehensions", needs_facts: true, apply: comprehensions },
    Rule { name: "lambdas", needs_facts: true, apply: lambdas },
    Rule { name: "await", needs_facts: true, apply: awaits },
    Rule { name: "scope_declarations", needs_facts: true, apply: scope_declarations },
];

fn fingerprint(kinds: &[ConstructKind]) -> String {
    let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
    format!("[{}]", names.join(", "))
}

fn control_flow(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (b, a) = (&pair.before.facts.control_flow, &pair.after.facts.control_flow);
    if b == a {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::ControlFlowChanged,
        format!("{} -> {}", fingerprint(b), fingerprint(a)),
    )])
}

fn generator(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    if !pair.callable("generator")? {
        return Ok(Vec::new());
    }
    let event = match (pair.before.facts.has_yield, pair.after.facts.has_yield) {
        (false, true) => pair.event(EventType::FunctionMadeGenerator, "yield introduced"),
        (true, false) => pair.event(EventType::GeneratorMadeFunction, "yield removed"),
        _ => return Ok(Vec::new()),
    };
    Ok(vec![event])
}

fn exception_handling(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (b, a) = (&pair.before.facts, &pair.after.facts);
    let had = !b.caught.is_empty() || b.try_count() > 0;
    let has = !a.caught.is_empty() || a.try_count() > 0;
    let event = match (had, has) {
        (false, true) => pair.event(
            EventType::ExceptionHandlingAdded,
            describe_diff(&a.caught.iter().collect::<Vec<_>>(), &[]),
        ),
        (true, false) => pair.event(
            EventType::ExceptionHandlingRemoved,
            describe_diff(&[], &b.caught.iter().collect::<Vec<_>>()),
        ),
        (true, true) if b.caught != a.caught => {
            let (added, removed) = set_diff(&b.caught, &a.caught);
            pair.event(
                EventType::ExceptionHandlingChanged,
                describe_diff(&added, &removed),
            )
        }
        _ => return Ok(Vec::new()),
    };
    Ok(vec![event])
}

fn exception_raising(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (added, removed) = set_diff(&pair.before.facts.raised, &pair.after.facts.raised);
    if added.is_empty() && removed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::ExceptionRaisingChanged,
        describe_diff(&added, &removed),
    )])
}

/// One event per call target, so later layers can match individual callees.
fn internal_calls(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (added, removed) = set_diff(&pair.before.facts.calls, &pair.after.facts.calls);
    let mut events: Vec<SemanticEvent> = added
        .into_iter()
        .map(|c| pair.event(EventType::InternalCallAdded, c.as_str()))
        .collect();
    events.extend(
        removed
            .into_iter()
            .map(|c| pair.event(EventType::InternalCallRemoved, c.as_str())),
    );
    Ok(events)
}

fn count_change(pair: &NodePair<'_>, ty: EventType, before: usize, after: usize) -> Outcome {
    if before == after {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(ty, format!("{} -> {}", before, after))])
}

fn comprehensions(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    count_change(
        pair,
        EventType::ComprehensionUsageChanged,
        pair.before.facts.comprehensions,
        pair.after.facts.comprehensions,
    )
}

fn lambdas(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    count_change(
        pair,
        EventType::LambdaUsageChanged,
        pair.before.facts.lambdas,
        pair.after.facts.lambdas,
    )
}

fn awaits(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    count_change(
        pair,
        EventType::AwaitUsageChanged,
        pair.before.facts.await_count,
        pair.after.facts.await_count,
    )
}

fn scope_declarations(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (b, a) = (&pair.before.facts, &pair.after.facts);
    let mut events = Vec::new();
    for (ty, before, after) in [
        (EventType::GlobalScopeChanged, &b.globals, &a.globals),
        (EventType::NonlocalScopeChanged, &b.nonlocals, &a.nonlocals),
    ] {
        let (added, removed) = set_diff(before, after);
        if !added.is_empty() || !removed.is_empty() {
            events.push(pair.event(ty, describe_diff(&added, &removed)));
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{BodyFacts, NodeKind, SemanticNode};
    use crate::classify::run_rules;

    fn with_facts(facts: BodyFacts) -> SemanticNode {
        let mut node = SemanticNode::new(NodeKind::Function, "f", "f");
        node.facts = facts;
        node
    }

    fn types(before: BodyFacts, after: BodyFacts) -> Vec<(EventType, String)> {
        let (before, after) = (with_facts(before), with_facts(after));
        let pair = NodePair {
            id: "func:f",
            before: &before,
            after: &after,
            location: "a.py",
            has_facts: true,
        };
        run_rules(RULES, &[pair], &Thresholds::default())
            .events
            .into_iter()
            .map(|e| (e.event_type, e.details))
            .collect()
    }

    #[test]
    fn test_try_block_removed() {
        let mut before = BodyFacts::default();
        before.control_flow = vec![ConstructKind::Try];
        before.caught.insert("ValueError".into());
        let events = types(before, BodyFacts::default());
        assert_eq!(
            events,
            vec![
                (EventType::ControlFlowChanged, "[try] -> []".to_string()),
                (
                    EventType::ExceptionHandlingRemoved,
                    "removed: ValueError".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_caught_types_changed() {
        let mut before = BodyFacts::default();
        before.caught.insert("KeyError".into());
        let mut after = BodyFacts::default();
        after.caught.insert("LookupError".into());
        let events = types(before, after);
        assert_eq!(
            events,
            vec![(
                EventType::ExceptionHandlingChanged,
                "added: LookupError; removed: KeyError".to_string()
            )]
        );
    }

    #[test]
    fn test_generator_calls_and_scope() {
        let mut before = BodyFacts::default();
        before.calls.insert("load".into());
        let mut after = BodyFacts::default();
        after.has_yield = true;
        after.calls.insert("parse".into());
        after.globals.insert("CACHE".into());
        after.comprehensions = 1;
        let got: Vec<EventType> = types(before, after).into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            got,
            vec![
                EventType::FunctionMadeGenerator,
                EventType::InternalCallAdded,
                EventType::InternalCallRemoved,
                EventType::ComprehensionUsageChanged,
                EventType::GlobalScopeChanged,
            ]
        );
    }
}
