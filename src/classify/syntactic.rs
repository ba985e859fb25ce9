//! Layer 2: declaration-level differences.

use std::collections::BTreeSet;

use crate::config::Thresholds;
use crate::error::ClassificationError;
use crate::event::{EventType, SemanticEvent};

use super::{describe_diff, join, set_diff, NodePair, Rule};

type Outcome = Result<Vec<SemanticEvent>, ClassificationError>;

pub static RULES: &[Rule] = &[
    Rule { name: "signature", needs_facts: false, apply: signature },
    Rule { name: "return_type", needs_facts: false, apply: return_type },
    Rule { name: "default_parameters", needs_facts: false, apply: default_parameters },
    Rule { name: "decorators", needs_facts: false, apply: decorators },
    Rule { name: "async", needs_facts: false, apply: asyncness },
    Rule { name: "inheritance", needs_facts: false, apply: inheritance },
    Rule { name: "visibility", needs_facts: false, apply: visibility },
];

fn signature(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    if !pair.callable("signature")? {
        return Ok(Vec::new());
    }
    let (Some(before), Some(after)) = (&pair.before.signature, &pair.after.signature) else {
        return Ok(Vec::new());
    };
    if before.param_tuple() == after.param_tuple() {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::SignatureChanged,
        format!(
            "{} -> {} (arity {} -> {})",
            before.render_params(),
            after.render_params(),
            before.arity(),
            after.arity()
        ),
    )])
}

fn return_type(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (Some(before), Some(after)) = (&pair.before.signature, &pair.after.signature) else {
        return Ok(Vec::new());
    };
    if before.return_type == after.return_type {
        return Ok(Vec::new());
    }
    let show = |t: &Option<String>| t.clone().unwrap_or_else(|| "<none>".to_string());
    Ok(vec![pair.event(
        EventType::ReturnTypeChanged,
        format!("{} -> {}", show(&before.return_type), show(&after.return_type)),
    )])
}

fn default_parameters(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (Some(before), Some(after)) = (&pair.before.signature, &pair.after.signature) else {
        return Ok(Vec::new());
    };
    let (b, a) = (before.defaulted(), after.defaulted());
    let (added, removed) = set_diff(&b, &a);
    let mut events = Vec::new();
    if !added.is_empty() {
        events.push(pair.event(EventType::DefaultParametersAdded, join(added)));
    }
    if !removed.is_empty() {
        events.push(pair.event(EventType::DefaultParametersRemoved, join(removed)));
    }
    Ok(events)
}

fn decorators(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let b: BTreeSet<&String> = pair.before.decorators.iter().collect();
    let a: BTreeSet<&String> = pair.after.decorators.iter().collect();
    let (added, removed) = set_diff(&b, &a);
    let mut events: Vec<SemanticEvent> = added
        .into_iter()
        .map(|d| pair.event(EventType::DecoratorAdded, format!("@{}", d)))
        .collect();
    events.extend(
        removed
            .into_iter()
            .map(|d| pair.event(EventType::DecoratorRemoved, format!("@{}", d))),
    );
    Ok(events)
}

fn asyncness(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    if !pair.callable("async")? {
        return Ok(Vec::new());
    }
    let event = match (pair.before.is_async(), pair.after.is_async()) {
        (false, true) => pair.event(EventType::FunctionMadeAsync, "async added"),
        (true, false) => pair.event(EventType::FunctionMadeSync, "async removed"),
        _ => return Ok(Vec::new()),
    };
    Ok(vec![event])
}

fn inheritance(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    if pair.before.bases == pair.after.bases {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::InheritanceChanged,
        format!("[{}] -> [{}]", join(&pair.before.bases), join(&pair.after.bases)),
    )])
}

fn visibility(pair: &NodePair<'_>, _: &Thresholds) -> Outcome {
    let (added, removed) = set_diff(&pair.before.modifiers, &pair.after.modifiers);
    if added.is_empty() && removed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![pair.event(
        EventType::VisibilityChanged,
        describe_diff(&added, &removed),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{NodeKind, Parameter, SemanticNode, Signature};
    use crate::classify::run_rules;

    fn func(params: &[(&str, Option<&str>)], is_async: bool) -> SemanticNode {
        let mut node = SemanticNode::new(NodeKind::Function, "f", "f");
        node.signature = Some(Signature {
            params: params
                .iter()
                .map(|(n, d)| Parameter {
                    default: d.map(String::from),
                    ..Parameter::named(*n)
                })
                .collect(),
            return_type: None,
            is_async,
        });
        node
    }

    fn events_for(before: &SemanticNode, after: &SemanticNode) -> Vec<SemanticEvent> {
        let pair = NodePair {
            id: "func:f",
            before,
            after,
            location: "a.py",
            has_facts: true,
        };
        run_rules(RULES, &[pair], &Thresholds::default()).events
    }

    #[test]
    fn test_added_defaulted_parameter() {
        let before = func(&[("a", None)], false);
        let after = func(&[("a", None), ("b", Some("1"))], false);
        let events = events_for(&before, &after);
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::SignatureChanged, EventType::DefaultParametersAdded]
        );
        assert_eq!(events[0].details, "(a) -> (a, b=1) (arity 1 -> 2)");
        assert_eq!(events[1].details, "b");
    }

    #[test]
    fn test_async_and_decorators() {
        let mut before = func(&[], false);
        before.decorators = vec!["cache".into()];
        let mut after = func(&[], true);
        after.decorators = vec!["retry(3)".into()];
        let types: Vec<EventType> = events_for(&before, &after)
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                EventType::DecoratorAdded,
                EventType::DecoratorRemoved,
                EventType::FunctionMadeAsync
            ]
        );
    }

    #[test]
    fn test_visibility_and_return_type() {
        let mut before = func(&[], false);
        before.modifiers.insert("public".into());
        let mut after = before.clone();
        after.modifiers = ["private".to_string()].into_iter().collect();
        if let Some(sig) = after.signature.as_mut() {
            sig.return_type = Some("int".into());
        }
        let events = events_for(&before, &after);
        assert_eq!(events[0].event_type, EventType::ReturnTypeChanged);
        assert_eq!(events[0].details, "<none> -> int");
        assert_eq!(events[1].event_type, EventType::VisibilityChanged);
        assert_eq!(events[1].details, "added: private; removed: public");
    }
}
