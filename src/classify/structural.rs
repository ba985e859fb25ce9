//! Layer 1: file, node and dependency set arithmetic.

use crate::analysis::{module_id_name, NodeTree, SemanticNode};
use crate::event::{EventType, SemanticEvent};
use crate::matcher::ChangeSet;

fn module_id(path: &str) -> String {
    format!("module:{}", module_id_name(path))
}

fn describe(node: &SemanticNode) -> String {
    format!("{} {}", node.kind, node.qualified_name)
}

/// Events for a file that exists only after the change.
pub fn file_added(after: &NodeTree) -> Vec<SemanticEvent> {
    let path = after.path.as_str();
    let mut events = vec![SemanticEvent::deterministic(
        EventType::FileAdded,
        module_id(path),
        path,
        format!("added {} file ({} bytes)", after.language, after.source_len),
    )];
    for node in after.nodes.values() {
        events.push(SemanticEvent::deterministic(
            EventType::NodeAdded,
            node.id.as_str(),
            path,
            format!("added {}", describe(node)),
        ));
    }
    for import in &after.imports {
        events.push(SemanticEvent::deterministic(
            EventType::DependencyAdded,
            module_id(path),
            path,
            import.as_str(),
        ));
    }
    events
}

/// Events for a file that exists only before the change.
pub fn file_removed(before: &NodeTree) -> Vec<SemanticEvent> {
    let path = before.path.as_str();
    let mut events = vec![SemanticEvent::deterministic(
        EventType::FileRemoved,
        module_id(path),
        path,
        format!("removed {} file ({} bytes)", before.language, before.source_len),
    )];
    for node in before.nodes.values() {
        events.push(SemanticEvent::deterministic(
            EventType::NodeRemoved,
            node.id.as_str(),
            path,
            format!("removed {}", describe(node)),
        ));
    }
    for import in &before.imports {
        events.push(SemanticEvent::deterministic(
            EventType::DependencyRemoved,
            module_id(path),
            path,
            import.as_str(),
        ));
    }
    events
}

/// The only event available when either snapshot is opaque.
pub fn opaque_change(path: &str, before_len: usize, after_len: usize) -> SemanticEvent {
    SemanticEvent::deterministic(
        EventType::FileContentChanged,
        module_id(path),
        path,
        format!("content changed ({} -> {} bytes)", before_len, after_len),
    )
}

/// Node and dependency additions and removals between two parsed snapshots.
pub fn structural(before: &NodeTree, after: &NodeTree, changes: &ChangeSet) -> Vec<SemanticEvent> {
    let path = after.path.as_str();
    let mut events = Vec::new();

    for id in &changes.added {
        if let Some(node) = after.get(id) {
            events.push(SemanticEvent::deterministic(
                EventType::NodeAdded,
                id.as_str(),
                path,
                format!("added {}", describe(node)),
            ));
        }
    }
    for id in &changes.removed {
        if let Some(node) = before.get(id) {
            events.push(SemanticEvent::deterministic(
                EventType::NodeRemoved,
                id.as_str(),
                path,
                format!("removed {}", describe(node)),
            ));
        }
    }

    for import in after.imports.difference(&before.imports) {
        events.push(SemanticEvent::deterministic(
            EventType::DependencyAdded,
            module_id(path),
            path,
            import.as_str(),
        ));
    }
    for import in before.imports.difference(&after.imports) {
        events.push(SemanticEvent::deterministic(
            EventType::DependencyRemoved,
            module_id(path),
            path,
            import.as_str(),
        ));
    }

    events
}
