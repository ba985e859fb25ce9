//! Normalized semantic node model produced by the language adapters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::Language;

/// Stable node identity: kind prefix plus qualified name, e.g. `func:foo`.
pub type NodeId = String;

/// Token or name counts keyed by their text.
pub type Histogram = BTreeMap<String, usize>;

/// L1 distance between two histograms.
pub fn histogram_distance(a: &Histogram, b: &Histogram) -> usize {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    keys.into_iter()
        .map(|k| {
            let x = a.get(k).copied().unwrap_or(0);
            let y = b.get(k).copied().unwrap_or(0);
            x.abs_diff(y)
        })
        .sum()
}

/// Source location span with byte offsets and line/column positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    /// Start byte offset (0-indexed).
    pub start_byte: usize,
    /// End byte offset (0-indexed, exclusive).
    pub end_byte: usize,
    /// Start line (1-indexed).
    pub start_line: usize,
    /// Start column (1-indexed).
    pub start_col: usize,
    /// End line (1-indexed).
    pub end_line: usize,
    /// End column (1-indexed).
    pub end_col: usize,
}

impl Span {
    /// Create a span from a tree-sitter node.
    #[cfg(feature = "tree-sitter")]
    pub fn from_node(node: tree_sitter::Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: start.row + 1, // tree-sitter is 0-indexed
            start_col: start.column + 1,
            end_line: end.row + 1,
            end_col: end.column + 1,
        }
    }

    /// Span covering whole lines, used by the line-oriented extractors.
    pub fn from_lines(start_byte: usize, end_byte: usize, start_line: usize, end_line: usize) -> Self {
        Self {
            start_byte,
            end_byte,
            start_line,
            start_col: 1,
            end_line,
            end_col: 1,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_col)
    }
}

/// Kind of semantic node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Module,
    Function,
    Class,
    Method,
    Property,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::Method => "method",
            NodeKind::Property => "property",
        }
    }

    /// Check if this node has a callable body (function, method, property).
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            NodeKind::Function | NodeKind::Method | NodeKind::Property
        )
    }

    /// Id prefix for this kind. Members live under their class prefix.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Function => "func",
            NodeKind::Class | NodeKind::Method | NodeKind::Property => "class",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKind {
    Regular,
    /// `*args`, `...rest`, `...$rest`
    Variadic,
    /// `**kwargs`
    VariadicKeyword,
    /// Bare `*` or `/` markers in a Python parameter list.
    Separator,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub name: String,
    pub default: Option<String>,
    pub annotation: Option<String>,
    pub kind: ParamKind,
}

impl Parameter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            annotation: None,
            kind: ParamKind::Regular,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref ann) = self.annotation {
            write!(f, ": {}", ann)?;
        }
        if let Some(ref default) = self.default {
            write!(f, "={}", default)?;
        }
        Ok(())
    }
}

/// Declaration-level shape of a callable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Parameter>,
    pub return_type: Option<String>,
    pub is_async: bool,
}

impl Signature {
    /// Names of parameters that carry a default value.
    pub fn defaulted(&self) -> BTreeSet<&str> {
        self.params
            .iter()
            .filter(|p| p.default.is_some())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Number of parameters, separators excluded.
    pub fn arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind != ParamKind::Separator)
            .count()
    }

    /// The (name, order, default, annotation) tuple compared by Layer 2.
    pub fn param_tuple(&self) -> &[Parameter] {
        &self.params
    }

    pub fn render_params(&self) -> String {
        let parts: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        format!("({})", parts.join(", "))
    }
}

/// Control-flow construct recorded in a body fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstructKind {
    Loop,
    Conditional,
    Try,
    ContextManager,
    Switch,
}

impl ConstructKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstructKind::Loop => "loop",
            ConstructKind::Conditional => "conditional",
            ConstructKind::Try => "try",
            ConstructKind::ContextManager => "with",
            ConstructKind::Switch => "switch",
        }
    }
}

/// Body-level facts consumed by Layers 3 and 4.
///
/// Filled by the grammar walker. Regex-extracted nodes carry the default
/// (empty) facts, so body layers stay silent for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyFacts {
    /// Ordered control-flow fingerprint (pre-order).
    pub control_flow: Vec<ConstructKind>,
    /// Branch points for cyclomatic complexity.
    pub decision_points: usize,
    pub max_loop_depth: usize,
    /// `yield` in the node's own scope (nested functions excluded).
    pub has_yield: bool,
    pub await_count: usize,
    /// Caught exception types; `*` for an untyped catch.
    pub caught: BTreeSet<String>,
    pub raised: BTreeSet<String>,
    /// Call targets, e.g. `self.helper`, `os.path.join`.
    pub calls: BTreeSet<String>,
    pub comprehensions: usize,
    pub lambdas: usize,
    pub globals: BTreeSet<String>,
    pub nonlocals: BTreeSet<String>,
    pub binary_ops: Histogram,
    pub unary_ops: Histogram,
    pub comparison_ops: Histogram,
    pub logical_ops: Histogram,
    pub string_literals: Histogram,
    pub numeric_literals: Histogram,
    pub boolean_literals: Histogram,
    pub none_literals: Histogram,
    /// Attribute accesses keyed by attribute name.
    pub attribute_access: Histogram,
    pub subscript_count: usize,
    /// Assignment targets keyed by shape (`name`, `attribute`, `unpacking`, ...).
    pub assignments: Histogram,
    /// Augmented assignments keyed by operator (`+=`, `++`, ...).
    pub augmented_assignments: Histogram,
    pub return_count: usize,
    pub statement_count: usize,
}

impl BodyFacts {
    /// Cyclomatic complexity: decision points + 1.
    pub fn cyclomatic_complexity(&self) -> usize {
        self.decision_points + 1
    }

    pub fn loop_count(&self) -> usize {
        self.control_flow
            .iter()
            .filter(|c| **c == ConstructKind::Loop)
            .count()
    }

    pub fn try_count(&self) -> usize {
        self.control_flow
            .iter()
            .filter(|c| **c == ConstructKind::Try)
            .count()
    }
}

/// One declaration in a source snapshot.
#[derive(Debug, Clone)]
pub struct SemanticNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    /// `Class.method` for members, the bare name otherwise.
    pub qualified_name: String,
    pub parent_id: Option<NodeId>,
    pub span: Span,
    /// Token stream with comments dropped and whitespace collapsed.
    pub canonical_text: String,
    /// Canonical text with literal tokens masked.
    pub shape_text: String,
    pub signature: Option<Signature>,
    pub decorators: Vec<String>,
    /// Base classes, interfaces, used traits.
    pub bases: Vec<String>,
    /// Visibility and other declaration modifiers.
    pub modifiers: BTreeSet<String>,
    /// Member (method/property) names, for class nodes.
    pub members: BTreeSet<String>,
    /// Class-level attribute names, for class nodes.
    pub attributes: BTreeSet<String>,
    pub facts: BodyFacts,
}

impl SemanticNode {
    pub fn new(kind: NodeKind, name: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        let name = name.into();
        let qualified_name = qualified_name.into();
        Self {
            id: format!("{}:{}", kind.id_prefix(), qualified_name),
            kind,
            name,
            qualified_name,
            parent_id: None,
            span: Span::default(),
            canonical_text: String::new(),
            shape_text: String::new(),
            signature: None,
            decorators: Vec::new(),
            bases: Vec::new(),
            modifiers: BTreeSet::new(),
            members: BTreeSet::new(),
            attributes: BTreeSet::new(),
            facts: BodyFacts::default(),
        }
    }

    pub fn is_async(&self) -> bool {
        self.signature.as_ref().map(|s| s.is_async).unwrap_or(false)
    }
}

/// Which stage of an adapter's fallback chain produced a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strategy {
    Grammar,
    Legacy,
    Regex,
    Opaque,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Grammar => "grammar",
            Strategy::Legacy => "legacy",
            Strategy::Regex => "regex",
            Strategy::Opaque => "opaque",
        }
    }

    /// Whether nodes carry walker-derived body facts.
    pub fn has_body_facts(&self) -> bool {
        matches!(self, Strategy::Grammar | Strategy::Legacy)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// All nodes extracted from one source snapshot.
#[derive(Debug, Clone)]
pub struct NodeTree {
    pub path: String,
    pub language: Language,
    pub strategy: Strategy,
    pub nodes: BTreeMap<NodeId, SemanticNode>,
    /// File-scope imports / use statements.
    pub imports: BTreeSet<String>,
    pub source_len: usize,
}

impl NodeTree {
    pub fn new(path: &str, language: Language, strategy: Strategy, source_len: usize) -> Self {
        Self {
            path: path.to_string(),
            language,
            strategy,
            nodes: BTreeMap::new(),
            imports: BTreeSet::new(),
            source_len,
        }
    }

    /// A tree that only supports whole-file comparison.
    pub fn opaque(path: &str, language: Language, source_len: usize) -> Self {
        Self::new(path, language, Strategy::Opaque, source_len)
    }

    pub fn is_opaque(&self) -> bool {
        self.strategy == Strategy::Opaque
    }

    pub fn get(&self, id: &str) -> Option<&SemanticNode> {
        self.nodes.get(id)
    }

    /// Insert a node, suffixing `#n` on id collisions. Returns the final id.
    pub fn insert(&mut self, mut node: SemanticNode) -> NodeId {
        if self.nodes.contains_key(&node.id) {
            let base = node.id.clone();
            let mut n = 2;
            while self.nodes.contains_key(&format!("{}#{}", base, n)) {
                n += 1;
            }
            node.id = format!("{}#{}", base, n);
        }
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        id
    }

    pub fn decorator_count(&self) -> usize {
        self.nodes.values().map(|n| n.decorators.len()).sum()
    }
}

/// Module node id for a file path: `module:<file stem>`.
pub fn module_id_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("module")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_distance() {
        let mut a = Histogram::new();
        a.insert("+".into(), 2);
        a.insert("-".into(), 1);
        let mut b = Histogram::new();
        b.insert("+".into(), 1);
        b.insert("*".into(), 3);
        assert_eq!(histogram_distance(&a, &b), 1 + 1 + 3);
        assert_eq!(histogram_distance(&a, &a), 0);
    }

    #[test]
    fn test_insert_suffixes_collisions() {
        let mut tree = NodeTree::new("a.py", Language::Python, Strategy::Grammar, 0);
        let first = tree.insert(SemanticNode::new(NodeKind::Function, "f", "f"));
        let second = tree.insert(SemanticNode::new(NodeKind::Function, "f", "f"));
        let third = tree.insert(SemanticNode::new(NodeKind::Function, "f", "f"));
        assert_eq!(first, "func:f");
        assert_eq!(second, "func:f#2");
        assert_eq!(third, "func:f#3");
    }

    #[test]
    fn test_member_ids_use_class_prefix() {
        let node = SemanticNode::new(NodeKind::Method, "run", "Worker.run");
        assert_eq!(node.id, "class:Worker.run");
    }

    #[test]
    fn test_signature_defaults_and_arity() {
        let sig = Signature {
            params: vec![
                Parameter::named("a"),
                Parameter {
                    name: "*".into(),
                    default: None,
                    annotation: None,
                    kind: ParamKind::Separator,
                },
                Parameter {
                    name: "b".into(),
                    default: Some("1".into()),
                    annotation: None,
                    kind: ParamKind::Regular,
                },
            ],
            return_type: None,
            is_async: false,
        };
        assert_eq!(sig.arity(), 2);
        assert!(sig.defaulted().contains("b"));
        assert_eq!(sig.render_params(), "(a, *, b=1)");
    }

    #[test]
    fn test_module_id_name() {
        assert_eq!(module_id_name("src/app/views.py"), "views");
        assert_eq!(module_id_name(""), "module");
    }
}
