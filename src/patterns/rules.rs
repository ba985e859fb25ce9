//! The shipped heuristic rules.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::{ConstructKind, ParamKind, SemanticNode};
use crate::classify::NodePair;
use crate::error::ClassificationError;
use crate::event::{EventType, Layer, SemanticEvent};

use super::catalog::{
    is_cache_call, is_caching_decorator, is_concurrency_call, is_logging_call, is_safer,
    is_validation_call, last_segment, sensitive,
};
use super::{PatternInput, PatternRule, SignalSet};

type Outcome = Result<Vec<SemanticEvent>, ClassificationError>;

/// Token churn at or under this counts as a focused edit.
const SMALL_EDIT_TOKENS: usize = 6;

pub static RULES: &[PatternRule] = &[
    PatternRule { name: "extract-method", detect: extract_method },
    PatternRule { name: "inline-method", detect: inline_method },
    PatternRule { name: "security", detect: security },
    PatternRule { name: "algorithm", detect: algorithm },
    PatternRule { name: "error-handling", detect: error_handling },
    PatternRule { name: "api-surface", detect: api_surface },
    PatternRule { name: "feature", detect: feature },
    PatternRule { name: "logging", detect: logging },
    PatternRule { name: "validation", detect: validation },
    PatternRule { name: "caching", detect: caching },
    PatternRule { name: "concurrency", detect: concurrency },
    PatternRule { name: "cleanup", detect: cleanup },
    PatternRule { name: "bug-fix", detect: bug_fix },
];

fn calls_name(calls: &BTreeSet<String>, name: &str) -> bool {
    calls.iter().any(|c| last_segment(c) == name)
}

fn is_public(node: &SemanticNode) -> bool {
    !node.name.starts_with('_')
        && !node.name.starts_with('#')
        && !node.modifiers.contains("private")
        && !node.modifiers.contains("protected")
}

/// Calls present after but not before, filtered by `pred`.
fn new_calls<'n>(pair: &NodePair<'n>, pred: fn(&str) -> bool) -> Vec<&'n String> {
    pair.after
        .facts
        .calls
        .difference(&pair.before.facts.calls)
        .filter(|c| pred(c))
        .collect()
}

fn dropped_calls<'n>(pair: &NodePair<'n>, pred: fn(&str) -> bool) -> Vec<&'n String> {
    pair.before
        .facts
        .calls
        .difference(&pair.after.facts.calls)
        .filter(|c| pred(c))
        .collect()
}

/// Size of the token multiset difference between two canonical texts.
fn token_churn(before: &str, after: &str) -> usize {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for token in before.split_whitespace() {
        *counts.entry(token).or_default() += 1;
    }
    for token in after.split_whitespace() {
        *counts.entry(token).or_default() -= 1;
    }
    counts.values().map(|v| v.unsigned_abs() as usize).sum()
}

fn conditionals(kinds: &[ConstructKind]) -> usize {
    kinds
        .iter()
        .filter(|k| **k == ConstructKind::Conditional)
        .count()
}

fn join(items: &[&String]) -> String {
    items
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn extract_method(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for added in input.added_nodes().filter(|n| n.kind.is_callable()) {
        for pair in &input.pairs {
            if !calls_name(&pair.after.facts.calls, &added.name)
                || calls_name(&pair.before.facts.calls, &added.name)
            {
                continue;
            }
            let mut signals = SignalSet::new();
            signals
                .flag(format!("new callable {}", added.qualified_name), 0.35, true)
                .flag(format!("{} now calls it", pair.id), 0.35, true)
                .flag(
                    "caller complexity dropped",
                    0.2,
                    pair.after.facts.cyclomatic_complexity()
                        < pair.before.facts.cyclomatic_complexity(),
                )
                .flag(
                    "caller body shrank",
                    0.1,
                    pair.after.canonical_text.len() < pair.before.canonical_text.len(),
                );
            events.push(input.emit(
                EventType::RefactoringExtractMethod,
                pair.id,
                &signals,
                format!(
                    "{} extracted from {}",
                    added.qualified_name, pair.before.qualified_name
                ),
            ));
        }
    }
    Ok(events)
}

fn inline_method(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for removed in input.removed_nodes().filter(|n| n.kind.is_callable()) {
        for pair in &input.pairs {
            if !calls_name(&pair.before.facts.calls, &removed.name)
                || calls_name(&pair.after.facts.calls, &removed.name)
            {
                continue;
            }
            let mut signals = SignalSet::new();
            signals
                .flag(format!("callable {} removed", removed.qualified_name), 0.35, true)
                .flag(format!("{} no longer calls it", pair.id), 0.35, true)
                .flag(
                    "caller complexity grew",
                    0.2,
                    pair.after.facts.cyclomatic_complexity()
                        > pair.before.facts.cyclomatic_complexity(),
                )
                .flag(
                    "caller body grew",
                    0.1,
                    pair.after.canonical_text.len() > pair.before.canonical_text.len(),
                );
            events.push(input.emit(
                EventType::RefactoringInlineMethod,
                pair.id,
                &signals,
                format!(
                    "{} inlined into {}",
                    removed.qualified_name, pair.before.qualified_name
                ),
            ));
        }
    }
    Ok(events)
}

fn sensitive_calls(calls: &BTreeSet<String>) -> BTreeMap<&'static str, f64> {
    calls.iter().filter_map(|c| sensitive(c)).collect()
}

fn takes_parameters(node: &SemanticNode) -> bool {
    node.signature
        .as_ref()
        .map(|s| s.arity() > 0)
        .unwrap_or(false)
}

fn security(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();

    let vulnerability = |node: &SemanticNode, api: &str, severity: f64| {
        let mut signals = SignalSet::new();
        signals
            .add(format!("sensitive API {}", api), 0.8, severity)
            .flag("receives parameters", 0.2, takes_parameters(node));
        input.emit(
            EventType::SecurityVulnerability,
            &node.id,
            &signals,
            format!("{} now calls {}", node.qualified_name, api),
        )
    };

    for pair in &input.pairs {
        let before = sensitive_calls(&pair.before.facts.calls);
        let after = sensitive_calls(&pair.after.facts.calls);
        for (api, severity) in &after {
            if !before.contains_key(api) {
                events.push(vulnerability(pair.after, api, *severity));
            }
        }
        let safer_added = !new_calls(pair, is_safer).is_empty();
        for (api, severity) in &before {
            if after.contains_key(api) {
                continue;
            }
            let mut signals = SignalSet::new();
            signals
                .add(format!("sensitive API {} removed", api), 0.8, *severity)
                .flag("safer API adopted", 0.2, safer_added);
            events.push(input.emit(
                EventType::SecurityImprovement,
                pair.id,
                &signals,
                format!("{} no longer calls {}", pair.after.qualified_name, api),
            ));
        }
    }

    for node in input.added_nodes() {
        for (api, severity) in sensitive_calls(&node.facts.calls) {
            events.push(vulnerability(node, api, severity));
        }
    }
    Ok(events)
}

fn algorithm(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for pair in input.pairs.iter().filter(|p| p.has_facts) {
        if !pair.callable("algorithm")? {
            continue;
        }
        let (b, a) = (&pair.before.facts, &pair.after.facts);
        let depth_drop = a.max_loop_depth < b.max_loop_depth;
        let cc_drop = a.cyclomatic_complexity() < b.cyclomatic_complexity();
        let fewer_loops = a.loop_count() < b.loop_count();
        let more_comprehensions = a.comprehensions > b.comprehensions;
        let loop_to_comprehension = fewer_loops && more_comprehensions;

        if depth_drop || loop_to_comprehension {
            let mut signals = SignalSet::new();
            signals
                .flag(
                    format!("loop nesting {} -> {}", b.max_loop_depth, a.max_loop_depth),
                    0.4,
                    depth_drop,
                )
                .flag("complexity reduced", 0.3, cc_drop)
                .flag("loop replaced by comprehension", 0.3, loop_to_comprehension);
            events.push(input.emit(
                EventType::AlgorithmOptimized,
                pair.id,
                &signals,
                format!("{} does less iteration", pair.after.qualified_name),
            ));
        }

        if fewer_loops {
            let mut signals = SignalSet::new();
            signals
                .flag(
                    format!("loops {} -> {}", b.loop_count(), a.loop_count()),
                    0.5,
                    true,
                )
                .flag("comprehension adopted", 0.3, more_comprehensions)
                .flag("no new calls", 0.2, a.calls.is_subset(&b.calls));
            events.push(input.emit(
                EventType::PerformanceOptimization,
                pair.id,
                &signals,
                format!("{} iterates less", pair.after.qualified_name),
            ));
        }

        if input.has_event(pair.id, EventType::ControlFlowChanged)
            && !depth_drop
            && !loop_to_comprehension
        {
            let operators_changed = input.has_event(pair.id, EventType::BinaryOperatorUsageChanged)
                || input.has_event(pair.id, EventType::ComparisonOperatorUsageChanged);
            let mut signals = SignalSet::new();
            signals
                .flag("control flow changed", 0.4, true)
                .flag("loop structure changed", 0.3, a.loop_count() != b.loop_count())
                .flag(
                    "complexity changed",
                    0.2,
                    input.has_event(pair.id, EventType::FunctionComplexityChanged),
                )
                .flag("operators changed", 0.1, operators_changed);
            events.push(input.emit(
                EventType::AlgorithmChanged,
                pair.id,
                &signals,
                format!("{} computes differently", pair.after.qualified_name),
            ));
        }
    }
    Ok(events)
}

fn error_handling(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for event in input
        .events_of(EventType::ExceptionHandlingAdded)
        .chain(input.events_of(EventType::ExceptionHandlingChanged))
    {
        let pair = input.pair_for("error-handling", &event.node_id)?;
        let (b, a) = (&pair.before.facts, &pair.after.facts);
        let narrowed = b.caught.contains("*") && !a.caught.contains("*") && !a.caught.is_empty();
        let mut signals = SignalSet::new();
        signals
            .flag(
                "exception handling added",
                0.5,
                event.event_type == EventType::ExceptionHandlingAdded,
            )
            .flag("handlers narrowed to specific types", 0.3, narrowed)
            .flag("failure logged", 0.2, !new_calls(pair, is_logging_call).is_empty());
        events.push(input.emit(
            EventType::ErrorHandlingImproved,
            pair.id,
            &signals,
            event.details.clone(),
        ));
    }

    for event in input.events_of(EventType::ExceptionHandlingRemoved) {
        let pair = input.pair_for("error-handling", &event.node_id)?;
        let mut signals = SignalSet::new();
        signals
            .flag("exception handling removed", 0.7, true)
            .flag(
                "try blocks removed",
                0.3,
                pair.after.facts.try_count() < pair.before.facts.try_count(),
            );
        events.push(input.emit(
            EventType::ErrorHandlingRemoved,
            pair.id,
            &signals,
            event.details.clone(),
        ));
    }
    Ok(events)
}

fn api_surface(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();

    for event in input.events_of(EventType::SignatureChanged) {
        let pair = input.pair_for("api-surface", &event.node_id)?;
        let (Some(before), Some(after)) = (&pair.before.signature, &pair.after.signature) else {
            continue;
        };
        let before_names: BTreeSet<&str> = before.params.iter().map(|p| p.name.as_str()).collect();
        let after_names: BTreeSet<&str> = after.params.iter().map(|p| p.name.as_str()).collect();
        let removed: Vec<&&str> = before_names.difference(&after_names).collect();
        let added: Vec<&&str> = after_names.difference(&before_names).collect();
        let required_added = after.params.iter().any(|p| {
            p.default.is_none() && p.kind == ParamKind::Regular && !before_names.contains(p.name.as_str())
        });
        let public = is_public(pair.after);

        if !removed.is_empty() || required_added {
            let mut signals = SignalSet::new();
            signals
                .flag("signature changed", 0.4, true)
                .flag("public callable", 0.3, public)
                .flag("parameter removed or required parameter added", 0.3, true);
            events.push(input.emit(
                EventType::ApiBreakingChange,
                pair.id,
                &signals,
                event.details.clone(),
            ));
        } else if !added.is_empty() {
            let mut signals = SignalSet::new();
            signals
                .flag("optional parameters added", 0.5, true)
                .flag("public callable", 0.3, public)
                .flag("existing parameters kept", 0.2, removed.is_empty());
            events.push(input.emit(
                EventType::ApiExtension,
                pair.id,
                &signals,
                event.details.clone(),
            ));
        }
    }

    for node in input.removed_nodes().filter(|n| is_public(n) && n.kind.is_callable()) {
        let mut signals = SignalSet::new();
        signals
            .flag(format!("public {} removed", node.kind), 0.5, true)
            .flag("public name", 0.3, true)
            .flag("top-level declaration", 0.2, node.parent_id.is_none());
        events.push(input.emit(
            EventType::ApiBreakingChange,
            &node.id,
            &signals,
            format!("removed {} {}", node.kind, node.qualified_name),
        ));
    }

    for node in input.added_nodes().filter(|n| is_public(n) && n.kind.is_callable()) {
        let called_by_modified = input
            .pairs
            .iter()
            .any(|p| calls_name(&p.after.facts.calls, &node.name));
        let mut signals = SignalSet::new();
        signals
            .flag(format!("public {} added", node.kind), 0.5, true)
            .flag("public name", 0.3, true)
            .flag("not an extracted helper", 0.2, !called_by_modified);
        events.push(input.emit(
            EventType::ApiExtension,
            &node.id,
            &signals,
            format!("added {} {}", node.kind, node.qualified_name),
        ));
    }
    Ok(events)
}

/// Nodes whose parent is not itself in `ids`.
fn outermost<'n>(nodes: Vec<&'n SemanticNode>, ids: &BTreeSet<String>) -> Vec<&'n SemanticNode> {
    nodes
        .into_iter()
        .filter(|n| n.parent_id.as_ref().map_or(true, |p| !ids.contains(p)))
        .collect()
}

fn feature(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    let module = input.module_id();

    let added = outermost(
        input.added_nodes().filter(|n| is_public(n)).collect(),
        &input.changes.added,
    );
    if !added.is_empty() {
        let names: Vec<&str> = added.iter().map(|n| n.qualified_name.as_str()).collect();
        let mut signals = SignalSet::new();
        signals
            .add(
                format!("{} new declarations", added.len()),
                0.5,
                added.len() as f64 / 2.0,
            )
            .flag(
                "new dependencies",
                0.25,
                input.events_of(EventType::DependencyAdded).next().is_some(),
            )
            .flag(
                "new class",
                0.25,
                added.iter().any(|n| n.kind == crate::analysis::NodeKind::Class),
            );
        events.push(input.emit(
            EventType::FeatureAddition,
            &module,
            &signals,
            format!("added {}", names.join(", ")),
        ));
    }

    let removed = outermost(
        input.removed_nodes().filter(|n| is_public(n)).collect(),
        &input.changes.removed,
    );
    if !removed.is_empty() {
        let names: Vec<&str> = removed.iter().map(|n| n.qualified_name.as_str()).collect();
        let mut signals = SignalSet::new();
        signals
            .add(
                format!("{} declarations removed", removed.len()),
                0.5,
                removed.len() as f64 / 2.0,
            )
            .flag(
                "dependencies removed",
                0.25,
                input.events_of(EventType::DependencyRemoved).next().is_some(),
            )
            .flag(
                "class removed",
                0.25,
                removed.iter().any(|n| n.kind == crate::analysis::NodeKind::Class),
            );
        events.push(input.emit(
            EventType::FeatureRemoval,
            &module,
            &signals,
            format!("removed {}", names.join(", ")),
        ));
    }
    Ok(events)
}

fn logging(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for pair in input.pairs.iter().filter(|p| p.has_facts) {
        for (ty, calls) in [
            (EventType::LoggingAdded, new_calls(pair, is_logging_call)),
            (EventType::LoggingRemoved, dropped_calls(pair, is_logging_call)),
        ] {
            if calls.is_empty() {
                continue;
            }
            let mut signals = SignalSet::new();
            signals
                .flag("logging call changed", 0.7, true)
                .add(format!("{} call targets", calls.len()), 0.3, calls.len() as f64 / 2.0);
            events.push(input.emit(ty, pair.id, &signals, join(&calls)));
        }
    }
    Ok(events)
}

fn validation(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for pair in input.pairs.iter().filter(|p| p.has_facts) {
        let (b, a) = (&pair.before.facts, &pair.after.facts);
        let (cond_b, cond_a) = (conditionals(&b.control_flow), conditionals(&a.control_flow));

        let checks_added = new_calls(pair, is_validation_call);
        let raises_added = a.raised.difference(&b.raised).next().is_some();
        if cond_a > cond_b || !checks_added.is_empty() {
            let mut signals = SignalSet::new();
            signals
                .flag("new conditional", 0.4, cond_a > cond_b)
                .flag("new raise", 0.3, raises_added)
                .flag("validation call added", 0.3, !checks_added.is_empty());
            events.push(input.emit(
                EventType::ValidationAdded,
                pair.id,
                &signals,
                format!("conditionals {} -> {}", cond_b, cond_a),
            ));
        }

        let checks_dropped = dropped_calls(pair, is_validation_call);
        let raises_dropped = b.raised.difference(&a.raised).next().is_some();
        if cond_a < cond_b || !checks_dropped.is_empty() {
            let mut signals = SignalSet::new();
            signals
                .flag("conditional removed", 0.4, cond_a < cond_b)
                .flag("raise removed", 0.3, raises_dropped)
                .flag("validation call removed", 0.3, !checks_dropped.is_empty());
            events.push(input.emit(
                EventType::ValidationRemoved,
                pair.id,
                &signals,
                format!("conditionals {} -> {}", cond_b, cond_a),
            ));
        }
    }
    Ok(events)
}

fn mentions_cache(node: &SemanticNode) -> bool {
    node.facts
        .attribute_access
        .keys()
        .chain(node.attributes.iter())
        .any(|k| k.to_lowercase().contains("cache"))
}

fn caching(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for pair in &input.pairs {
        let dec_before = pair.before.decorators.iter().any(|d| is_caching_decorator(d));
        let dec_after = pair.after.decorators.iter().any(|d| is_caching_decorator(d));
        let calls_added = new_calls(pair, is_cache_call);
        let calls_dropped = dropped_calls(pair, is_cache_call);
        let (state_before, state_after) = (mentions_cache(pair.before), mentions_cache(pair.after));

        if (dec_after && !dec_before) || !calls_added.is_empty() {
            let mut signals = SignalSet::new();
            signals
                .flag("caching decorator added", 0.5, dec_after && !dec_before)
                .flag("cache call added", 0.3, !calls_added.is_empty())
                .flag("cache state referenced", 0.2, state_after && !state_before);
            events.push(input.emit(
                EventType::CachingAdded,
                pair.id,
                &signals,
                format!("{} caches results", pair.after.qualified_name),
            ));
        }
        if (dec_before && !dec_after) || !calls_dropped.is_empty() {
            let mut signals = SignalSet::new();
            signals
                .flag("caching decorator removed", 0.5, dec_before && !dec_after)
                .flag("cache call removed", 0.3, !calls_dropped.is_empty())
                .flag("cache state dropped", 0.2, state_before && !state_after);
            events.push(input.emit(
                EventType::CachingRemoved,
                pair.id,
                &signals,
                format!("{} no longer caches", pair.after.qualified_name),
            ));
        }
    }
    Ok(events)
}

fn concurrency(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for event in input.events_of(EventType::FunctionMadeAsync) {
        let pair = input.pair_for("concurrency", &event.node_id)?;
        let mut signals = SignalSet::new();
        signals
            .flag("made async", 0.6, true)
            .flag(
                "awaits added",
                0.4,
                pair.after.facts.await_count > pair.before.facts.await_count,
            );
        events.push(input.emit(
            EventType::AsyncConversion,
            pair.id,
            &signals,
            format!("{} converted to async", pair.after.qualified_name),
        ));
    }

    for pair in input.pairs.iter().filter(|p| p.has_facts) {
        let calls = new_calls(pair, is_concurrency_call);
        if calls.is_empty() {
            continue;
        }
        let mut signals = SignalSet::new();
        signals
            .flag(format!("concurrency API {}", join(&calls)), 0.7, true)
            .flag("async callable", 0.3, pair.after.is_async());
        events.push(input.emit(
            EventType::ConcurrencyIntroduced,
            pair.id,
            &signals,
            join(&calls),
        ));
    }
    Ok(events)
}

/// Identifier-like tokens across every node of a tree.
fn identifiers(nodes: impl Iterator<Item = String>) -> BTreeSet<String> {
    nodes
        .flat_map(|text| {
            text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
                .filter(|t| !t.is_empty())
                .map(|t| t.trim_start_matches('$').to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// `os.path` -> `path`, `./utils/format` -> `format`, `App\Models\User` -> `User`
fn import_binding(import: &str) -> &str {
    let trimmed = import.trim_end_matches(".js").trim_end_matches(".php");
    trimmed
        .rsplit(|c| c == '.' || c == '/' || c == '\\')
        .find(|s| !s.is_empty())
        .unwrap_or(trimmed)
}

fn cleanup(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();

    for node in input.removed_nodes().filter(|n| n.kind.is_callable()) {
        let has_callers = input
            .before
            .nodes
            .values()
            .filter(|n| n.id != node.id)
            .any(|n| calls_name(&n.facts.calls, &node.name));
        if has_callers {
            continue;
        }
        let mut signals = SignalSet::new();
        signals
            .flag("declaration removed", 0.5, true)
            .flag("had no callers in file", 0.4, true)
            .flag("non-public", 0.1, !is_public(node));
        events.push(input.emit(
            EventType::DeadCodeRemoved,
            &node.id,
            &signals,
            format!("removed unused {} {}", node.kind, node.qualified_name),
        ));
    }

    let removed_imports: Vec<&SemanticEvent> =
        input.events_of(EventType::DependencyRemoved).collect();
    if !removed_imports.is_empty() {
        let used = identifiers(input.before.nodes.values().map(|n| n.canonical_text.clone()));
        for event in removed_imports {
            if used.contains(import_binding(&event.details)) {
                continue;
            }
            let mut signals = SignalSet::new();
            signals
                .flag("import removed", 0.5, true)
                .flag("import was unused", 0.5, true);
            events.push(input.emit(
                EventType::CodeCleanup,
                &event.node_id,
                &signals,
                format!("removed unused import {}", event.details),
            ));
        }
    }
    Ok(events)
}

fn bug_fix(input: &PatternInput<'_>) -> Outcome {
    let mut events = Vec::new();
    for pair in input.pairs.iter().filter(|p| p.has_facts) {
        if !pair.callable("bug-fix")? {
            continue;
        }
        let condition_changed = [
            EventType::ComparisonOperatorUsageChanged,
            EventType::LogicalOperatorUsageChanged,
            EventType::NoneLiteralUsageChanged,
        ]
        .iter()
        .any(|t| input.has_event(pair.id, *t));
        let boundary_changed = input.has_event(pair.id, EventType::NumericLiteralUsageChanged);
        if !condition_changed && !boundary_changed {
            continue;
        }
        let declaration_changed = input
            .events
            .iter()
            .any(|e| e.node_id == pair.id && e.layer == Layer::Syntactic);
        let churn = token_churn(&pair.before.canonical_text, &pair.after.canonical_text);

        let mut signals = SignalSet::new();
        signals
            .flag("condition changed", 0.4, condition_changed)
            .flag("boundary literal changed", 0.2, boundary_changed)
            .flag(format!("small edit ({} tokens)", churn), 0.3, churn <= SMALL_EDIT_TOKENS)
            .flag("declaration unchanged", 0.1, !declaration_changed);
        events.push(input.emit(
            EventType::BugFix,
            pair.id,
            &signals,
            format!("focused change in {}", pair.after.qualified_name),
        ));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Language, NodeKind, NodeTree, Strategy};
    use crate::matcher::{diff, ChangeSet};

    fn tree(nodes: Vec<SemanticNode>) -> NodeTree {
        let mut tree = NodeTree::new("svc/app.py", Language::Python, Strategy::Grammar, 100);
        for node in nodes {
            tree.insert(node);
        }
        tree
    }

    fn func(name: &str, text: &str) -> SemanticNode {
        let mut node = SemanticNode::new(NodeKind::Function, name, name);
        node.canonical_text = text.to_string();
        node.signature = Some(Default::default());
        node
    }

    fn run(
        rule: fn(&PatternInput<'_>) -> Outcome,
        before: &NodeTree,
        after: &NodeTree,
        events: &[SemanticEvent],
    ) -> Vec<SemanticEvent> {
        let changes: ChangeSet = diff(before, after);
        let input = PatternInput::new(before, after, &changes, events);
        rule(&input).unwrap()
    }

    #[test]
    fn test_token_churn() {
        assert_eq!(token_churn("if a < b :", "if a <= b :"), 2);
        assert_eq!(token_churn("x", "x"), 0);
    }

    #[test]
    fn test_extract_method() {
        let mut before_f = func("process", "def process ( ) : a long body with many tokens");
        before_f.facts.decision_points = 4;
        let mut after_f = func("process", "def process ( ) : helper ( )");
        after_f.facts.calls.insert("helper".into());
        let helper = func("helper", "def helper ( ) : long body");

        let before = tree(vec![before_f]);
        let after = tree(vec![after_f, helper]);
        let events = run(extract_method, &before, &after, &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RefactoringExtractMethod);
        assert_eq!(events[0].node_id, "func:process");
        assert_eq!(events[0].confidence, 1.0);
        assert_eq!(events[0].layer, Layer::Pattern);
        assert!(events[0].reasoning.as_deref().unwrap().contains("new callable helper"));
    }

    #[test]
    fn test_security_vulnerability_and_improvement() {
        let before_f = func("load", "a");
        let mut after_f = func("load", "b");
        after_f.facts.calls.insert("pickle.loads".into());
        let events = run(security, &tree(vec![before_f.clone()]), &tree(vec![after_f.clone()]), &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::SecurityVulnerability);
        assert!((events[0].confidence - 0.72).abs() < 1e-9);

        let mut fixed = func("load", "c");
        fixed.facts.calls.insert("json.loads".into());
        let events = run(security, &tree(vec![after_f]), &tree(vec![fixed]), &[]);
        assert_eq!(events[0].event_type, EventType::SecurityImprovement);
    }

    #[test]
    fn test_dead_code_and_unused_import() {
        let used = func("main", "def main ( ) : run ( )");
        let dead = func("_old", "def _old ( ) : pass");
        let mut before = tree(vec![used.clone(), dead]);
        before.imports.insert("itertools".into());
        let after = tree(vec![used]);
        let removed = SemanticEvent::deterministic(
            EventType::DependencyRemoved,
            "module:app",
            "svc/app.py",
            "itertools",
        );
        let events = run(cleanup, &before, &after, &[removed]);
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::DeadCodeRemoved, EventType::CodeCleanup]);
    }

    #[test]
    fn test_error_handling_removed_reports_missing_pair() {
        let before = tree(vec![func("f", "a")]);
        let after = tree(vec![func("f", "a")]);
        let stray = SemanticEvent::deterministic(
            EventType::ExceptionHandlingRemoved,
            "func:f",
            "svc/app.py",
            "",
        );
        let changes = diff(&before, &after);
        let events = [stray];
        let input = PatternInput::new(&before, &after, &changes, &events);
        let err = error_handling(&input).unwrap_err();
        assert_eq!(err.rule, "error-handling");
    }

    #[test]
    fn test_bug_fix_needs_condition_change() {
        let before = tree(vec![func("f", "if a < b : return a")]);
        let after = tree(vec![func("f", "if a <= b : return a")]);
        assert!(run(bug_fix, &before, &after, &[]).is_empty());

        let cmp = SemanticEvent::deterministic(
            EventType::ComparisonOperatorUsageChanged,
            "func:f",
            "svc/app.py",
            "'<' 1 -> 0, '<=' 0 -> 1",
        );
        let events = run(bug_fix, &before, &after, &[cmp]);
        assert_eq!(events.len(), 1);
        assert!((events[0].confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_import_binding() {
        assert_eq!(import_binding("os.path"), "path");
        assert_eq!(import_binding("./utils/format.js"), "format");
        assert_eq!(import_binding("App\\Models\\User"), "User");
    }
}
