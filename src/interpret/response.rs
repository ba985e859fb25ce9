//! Parsing provider output into interpretive events.

use serde::Deserialize;
use tracing::debug;

use super::gate::GateInput;
use crate::analysis::module_id_name;
use crate::event::{clamp_confidence, EventType, Layer, SemanticEvent};

/// One event as proposed by a provider, already restricted to the
/// interpretive subset.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractEvent {
    pub event_type: EventType,
    pub node_id: Option<String>,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub impact: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event_type: String,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    impact: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { events: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

/// Strip a surrounding markdown fence and any prose outside the JSON body.
fn json_body(text: &str) -> Option<&str> {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .map(|t| t.trim_end().trim_end_matches("```"))
        .unwrap_or(text)
        .trim();
    let open = text.find(['{', '['])?;
    let close = text.rfind(['}', ']'])?;
    (close >= open).then(|| &text[open..=close])
}

/// Parse a provider response. `None` means the response is unusable and
/// should be discarded as a whole.
///
/// Individual entries with unknown or non-interpretive event types are
/// dropped; a missing confidence counts as 0.5.
pub fn parse_response(text: &str) -> Option<Vec<AbstractEvent>> {
    let body = json_body(text)?;
    let envelope: Envelope = serde_json::from_str(body).ok()?;
    let values = match envelope {
        Envelope::Wrapped { events } | Envelope::Bare(events) => events,
    };

    let mut out = Vec::new();
    for value in values {
        let raw: RawEvent = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "dropping malformed interpreter entry");
                continue;
            }
        };
        let Some(event_type) = EventType::parse(raw.event_type.trim()) else {
            debug!(event_type = %raw.event_type, "dropping unknown event type");
            continue;
        };
        if !event_type.is_interpretive() {
            debug!(event_type = %event_type, "dropping non-interpretive event type");
            continue;
        }
        out.push(AbstractEvent {
            event_type,
            node_id: raw.node_id.filter(|id| !id.trim().is_empty()),
            confidence: clamp_confidence(raw.confidence.unwrap_or(0.5)),
            reasoning: raw.reasoning,
            impact: raw.impact,
        });
    }
    Some(out)
}

/// Anchor abstract events to the file. Ids that name no node on either side
/// fall back to the module id.
pub fn to_events(
    abstract_events: Vec<AbstractEvent>,
    input: &GateInput<'_>,
    provider: &str,
) -> Vec<SemanticEvent> {
    let location = input.after.path.as_str();
    let module_id = format!("module:{}", module_id_name(location));
    abstract_events
        .into_iter()
        .map(|a| {
            let node_id = a
                .node_id
                .filter(|id| input.before.get(id).is_some() || input.after.get(id).is_some())
                .unwrap_or_else(|| module_id.clone());
            let mut event = SemanticEvent::interpretive(
                a.event_type,
                Layer::Interpreter,
                node_id,
                location,
                a.confidence,
                format!("interpreted by {}", provider),
            );
            event.reasoning = a.reasoning;
            event.impact = a.impact;
            event
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Language, NodeKind, NodeTree, SemanticNode, Strategy};
    use crate::matcher::ChangeSet;

    #[test]
    fn test_parse_fenced_wrapped() {
        let text = "Here you go:\n```json\n{\"events\": [\
            {\"event_type\": \"security_improvement\", \"node_id\": \"func:load\", \"confidence\": 1.7, \"reasoning\": \"eval removed\"},\
            {\"event_type\": \"node_added\", \"confidence\": 0.9},\
            {\"event_type\": \"made_up\", \"confidence\": 0.9},\
            {\"confidence\": 0.9}\
        ]}\n```";
        let events = parse_response(text).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::SecurityImprovement);
        assert_eq!(events[0].confidence, 1.0);
        assert_eq!(events[0].reasoning.as_deref(), Some("eval removed"));
    }

    #[test]
    fn test_parse_bare_array_and_garbage() {
        let events = parse_response("[{\"event_type\": \"bug_fix\"}]").unwrap();
        assert_eq!(events[0].confidence, 0.5);
        assert!(parse_response("I think this is a refactoring.").is_none());
        assert!(parse_response("{\"events\": 3}").is_none());
        assert_eq!(parse_response("{\"events\": []}"), Some(Vec::new()));
    }

    #[test]
    fn test_to_events_anchors_ids() {
        let mut after = NodeTree::new("pkg/svc.py", Language::Python, Strategy::Grammar, 0);
        after.insert(SemanticNode::new(NodeKind::Function, "load", "load"));
        let before = NodeTree::new("pkg/svc.py", Language::Python, Strategy::Grammar, 0);
        let changes = ChangeSet::default();
        let input = GateInput {
            before: &before,
            after: &after,
            changes: &changes,
            events: &[],
        };
        let abstract_events = vec![
            AbstractEvent {
                event_type: EventType::FeatureAddition,
                node_id: Some("func:load".into()),
                confidence: 0.8,
                reasoning: None,
                impact: Some("new loader".into()),
            },
            AbstractEvent {
                event_type: EventType::CodeCleanup,
                node_id: Some("func:ghost".into()),
                confidence: 0.6,
                reasoning: None,
                impact: None,
            },
        ];
        let events = to_events(abstract_events, &input, "local");
        assert_eq!(events[0].node_id, "func:load");
        assert_eq!(events[0].layer, Layer::Interpreter);
        assert_eq!(events[0].impact.as_deref(), Some("new loader"));
        assert_eq!(events[1].node_id, "module:svc");
        assert_eq!(events[1].details, "interpreted by local");
    }
}
