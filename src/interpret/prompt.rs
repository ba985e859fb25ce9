//! Prompt construction for the interpreter.

use std::fmt::Write;

use super::gate::GateInput;
use crate::analysis::SemanticNode;
use crate::event::EventType;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You review source code changes and classify their intent. \
Answer with a single JSON object and nothing else.";

/// A two-part chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Truncate at a char boundary, marking the cut.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(" ...[truncated]");
    out
}

fn node_text(node: Option<&SemanticNode>) -> &str {
    node.map(|n| n.canonical_text.as_str()).unwrap_or("<absent>")
}

/// Before/after node text plus the events already detected.
///
/// Node sections are added until `max_chars` is reached; the instructions and
/// event list always fit.
pub fn build_prompt(input: &GateInput<'_>, max_chars: usize) -> Prompt {
    let mut user = String::new();
    let _ = writeln!(
        user,
        "File: {} ({})",
        input.after.path,
        input.after.language.as_str()
    );

    user.push_str("\nAlready detected:\n");
    if input.events.is_empty() {
        user.push_str("- none\n");
    }
    for event in input.events {
        let _ = writeln!(
            user,
            "- [{}] {} {}: {}",
            event.layer, event.event_type, event.node_id, event.details
        );
    }

    let allowed: Vec<&str> = EventType::ALL
        .iter()
        .filter(|t| t.is_interpretive())
        .map(|t| t.as_str())
        .collect();
    let mut footer = String::new();
    footer.push_str("\nClassify the intent of this change using only these event types:\n");
    footer.push_str(&allowed.join(", "));
    footer.push_str(
        "\n\nRespond with JSON of the form \
{\"events\": [{\"event_type\": \"...\", \"node_id\": \"...\", \"confidence\": 0.0, \
\"reasoning\": \"...\", \"impact\": \"...\"}]}. \
Use node ids from the sections above. Return {\"events\": []} if nothing applies.\n",
    );

    let budget = max_chars.saturating_sub(user.chars().count() + footer.chars().count());
    let mut sections = String::new();
    let changes = input.changes;
    let ids = changes
        .candidates()
        .chain(changes.added.iter())
        .chain(changes.removed.iter());
    for id in ids {
        let section = format!(
            "\n### {}\nBEFORE:\n{}\nAFTER:\n{}\n",
            id,
            node_text(input.before.get(id)),
            node_text(input.after.get(id)),
        );
        let used = sections.chars().count();
        if used >= budget {
            break;
        }
        sections.push_str(&truncate(&section, budget - used));
    }

    user.push_str(&sections);
    user.push_str(&footer);
    Prompt {
        system: DEFAULT_SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Language, NodeKind, NodeTree, Strategy};
    use crate::event::SemanticEvent;
    use crate::matcher::diff;

    fn tree(body: &str) -> NodeTree {
        let mut tree = NodeTree::new("svc.py", Language::Python, Strategy::Grammar, 100);
        let mut node = SemanticNode::new(NodeKind::Function, "load", "load");
        node.canonical_text = body.into();
        tree.insert(node);
        tree
    }

    #[test]
    fn test_prompt_carries_nodes_and_events() {
        let before = tree("def load ( ) : return eval ( s )");
        let after = tree("def load ( ) : return literal_eval ( s )");
        let changes = diff(&before, &after);
        let events = vec![SemanticEvent::deterministic(
            EventType::InternalCallAdded,
            "func:load",
            "svc.py",
            "literal_eval",
        )];
        let input = GateInput {
            before: &before,
            after: &after,
            changes: &changes,
            events: &events,
        };
        let prompt = build_prompt(&input, 12_000);
        assert!(prompt.user.contains("### func:load"));
        assert!(prompt.user.contains("return eval ( s )"));
        assert!(prompt.user.contains("[3] internal_call_added func:load"));
        assert!(prompt.user.contains("security_improvement"));
        assert!(!prompt.user.contains("node_added,"));
    }

    #[test]
    fn test_prompt_respects_budget() {
        let before = tree(&"x ".repeat(5000));
        let after = tree(&"y ".repeat(5000));
        let changes = diff(&before, &after);
        let input = GateInput {
            before: &before,
            after: &after,
            changes: &changes,
            events: &[],
        };
        let prompt = build_prompt(&input, 2_000);
        assert!(prompt.user.chars().count() < 2_100);
        assert!(prompt.user.contains("[truncated]"));
        assert!(prompt.user.contains("\"events\""));
    }
}
