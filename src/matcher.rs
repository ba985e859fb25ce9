//! Node matching between two snapshots of one file.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::{NodeId, NodeTree};

/// Canonical text of a node on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPair {
    pub before: String,
    pub after: String,
}

impl TextPair {
    pub fn is_unchanged(&self) -> bool {
        self.before == self.after
    }
}

/// Partition of node ids across two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<NodeId>,
    pub removed: BTreeSet<NodeId>,
    pub common: BTreeMap<NodeId, TextPair>,
}

impl ChangeSet {
    /// Common ids whose canonical text differs; the only nodes later layers see.
    pub fn candidates(&self) -> impl Iterator<Item = &NodeId> {
        self.common
            .iter()
            .filter(|(_, pair)| !pair.is_unchanged())
            .map(|(id, _)| id)
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates().count()
    }

    /// Nothing added, removed or modified.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.candidate_count() == 0
    }

    /// Every id on either side.
    pub fn all_ids(&self) -> BTreeSet<&NodeId> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.common.keys())
            .collect()
    }
}

/// Match two node trees by id.
pub fn diff(before: &NodeTree, after: &NodeTree) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (id, node) in &before.nodes {
        match after.nodes.get(id) {
            Some(other) => {
                changes.common.insert(
                    id.clone(),
                    TextPair {
                        before: node.canonical_text.clone(),
                        after: other.canonical_text.clone(),
                    },
                );
            }
            None => {
                changes.removed.insert(id.clone());
            }
        }
    }
    for id in after.nodes.keys() {
        if !before.nodes.contains_key(id) {
            changes.added.insert(id.clone());
        }
    }

    changes
}
