//! Grammar-driven extraction shared by every tree-sitter adapter.
//!
//! Each language supplies a [`Vocabulary`] naming its node kinds; the walking
//! itself (body facts, canonical token text, parameter lists) is identical
//! across Python, PHP and JS/TS.

use std::borrow::Cow;

use tree_sitter::{Node, Parser, Tree};

use crate::error::ParseError;

use super::{BodyFacts, ConstructKind, Language, NodeTree, ParamKind, Parameter, ParseStrategy, Strategy};

/// Maximum length kept for call targets and literal histogram keys.
const MAX_KEY_LEN: usize = 80;

/// Node kinds a language uses for each construct the walker understands.
pub struct Vocabulary {
    pub comments: &'static [&'static str],
    pub loops: &'static [&'static str],
    pub conditionals: &'static [&'static str],
    pub tries: &'static [&'static str],
    pub contexts: &'static [&'static str],
    pub switches: &'static [&'static str],
    /// Kinds that add one to cyclomatic complexity.
    pub decisions: &'static [&'static str],
    pub catches: &'static [&'static str],
    /// Extracts caught exception types from a catch clause.
    pub caught_types: fn(Node, &[u8]) -> Vec<String>,
    pub raises: &'static [&'static str],
    pub yields: &'static [&'static str],
    pub awaits: &'static [&'static str],
    pub calls: &'static [&'static str],
    pub comprehensions: &'static [&'static str],
    pub lambdas: &'static [&'static str],
    pub globals: &'static [&'static str],
    pub nonlocals: &'static [&'static str],
    /// Kinds whose anonymous tokens are binary, comparison or logical operators.
    pub binary: &'static [&'static str],
    pub unary: &'static [&'static str],
    pub assignments: &'static [&'static str],
    pub augmented: &'static [&'static str],
    pub strings: &'static [&'static str],
    pub numbers: &'static [&'static str],
    pub booleans: &'static [&'static str],
    pub nones: &'static [&'static str],
    /// (kind, field holding the attribute name)
    pub attributes: &'static [(&'static str, &'static str)],
    pub subscripts: &'static [&'static str],
    pub returns: &'static [&'static str],
    /// Nested scopes: yields, awaits and returns inside them are not counted.
    pub scopes: &'static [&'static str],
}

impl Vocabulary {
    fn literal_placeholder(&self, kind: &str) -> Option<&'static str> {
        if self.strings.contains(&kind) {
            Some("<str>")
        } else if self.numbers.contains(&kind) {
            Some("<num>")
        } else if self.booleans.contains(&kind) {
            Some("<bool>")
        } else if self.nones.contains(&kind) {
            Some("<none>")
        } else {
            None
        }
    }
}

const COMPARISON_OPS: &[&str] = &[
    "<", ">", "<=", ">=", "==", "!=", "===", "!==", "<>", "<=>", "in", "not in", "is", "is not",
    "instanceof",
];

const LOGICAL_OPS: &[&str] = &["and", "or", "not", "&&", "||", "!", "??", "xor"];

/// Punctuation that can appear as an anonymous child of an operator node.
const NON_OPERATOR_TOKENS: &[&str] = &["(", ")", "[", "]", ",", ";"];

/// Get text for a node.
pub fn node_text<'a>(node: Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

/// Collapse all whitespace runs to a single space.
pub fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clip(mut text: String) -> String {
    if text.len() > MAX_KEY_LEN {
        let mut end = MAX_KEY_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Text of a field, whitespace-collapsed.
pub fn field_text(node: Node, field: &str, src: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| collapse(node_text(n, src)))
        .filter(|s| !s.is_empty())
}

/// Whether the node has an anonymous child token of the given kind.
pub fn has_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|c| !c.is_named() && c.kind() == token);
    found
}

/// Callee of a call-like node: everything before its argument list.
pub fn callee_text(node: Node, src: &[u8]) -> String {
    let args_start = node
        .child_by_field_name("arguments")
        .or_else(|| {
            let mut cursor = node.walk();
            let found = node
                .named_children(&mut cursor)
                .find(|c| matches!(c.kind(), "arguments" | "argument_list"));
            found
        })
        .map(|a| a.start_byte());
    let text = match args_start {
        Some(end) if end > node.start_byte() => {
            std::str::from_utf8(&src[node.start_byte()..end]).unwrap_or("")
        }
        _ => {
            let full = node_text(node, src);
            full.split('(').next().unwrap_or(full)
        }
    };
    let text = text.trim();
    let text = text.strip_prefix("new ").unwrap_or(text);
    clip(text.split_whitespace().collect::<String>())
}

/// Find the first node (named or anonymous) whose kind is in `kinds`.
/// Returns the kind and its 1-indexed line.
pub fn find_kind(root: Node, kinds: &[&str]) -> Option<(String, usize)> {
    if kinds.is_empty() {
        return None;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            return Some((node.kind().to_string(), node.start_position().row + 1));
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

/// Total bytes covered by ERROR or MISSING nodes, plus the first error line.
pub fn error_extent(root: Node) -> (usize, Option<usize>) {
    let mut bytes = 0;
    let mut first_line = None;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            bytes += node.end_byte().saturating_sub(node.start_byte()).max(1);
            let line = node.start_position().row + 1;
            first_line = Some(first_line.map_or(line, |l: usize| l.min(line)));
            continue;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
    }
    (bytes, first_line)
}

/// Accumulates canonical and shape token streams.
#[derive(Debug, Default)]
pub struct TokenText {
    canonical: Vec<String>,
    shape: Vec<String>,
}

impl TokenText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every non-comment token under `node`, in source order.
    pub fn push_node(&mut self, node: Node, src: &[u8], vocab: &Vocabulary) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            let kind = node.kind();
            if vocab.comments.contains(&kind) {
                continue;
            }
            if node.is_named() {
                if let Some(placeholder) = vocab.literal_placeholder(kind) {
                    self.push_pair(node_text(node, src).trim().to_string(), placeholder.to_string());
                    continue;
                }
            }
            if node.child_count() == 0 {
                let text = node_text(node, src).trim();
                if !text.is_empty() {
                    self.push_word(text);
                }
                continue;
            }
            let mut cursor = node.walk();
            let children: Vec<Node> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    /// Append a literal word to both streams.
    pub fn push_word(&mut self, word: &str) {
        self.push_pair(word.to_string(), word.to_string());
    }

    fn push_pair(&mut self, canonical: String, shape: String) {
        if canonical.is_empty() {
            return;
        }
        self.canonical.push(canonical);
        self.shape.push(shape);
    }

    /// Append a `members:` trailer listing the given names.
    pub fn push_members<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) {
        let names: Vec<&String> = names.into_iter().collect();
        if names.is_empty() {
            return;
        }
        self.push_word("members:");
        for name in names {
            self.push_word(name);
        }
    }

    pub fn finish(self) -> (String, String) {
        (self.canonical.join(" "), self.shape.join(" "))
    }
}

/// Walks a body and records [`BodyFacts`].
pub struct FactWalker<'a> {
    src: &'a [u8],
    vocab: &'a Vocabulary,
    facts: BodyFacts,
}

impl<'a> FactWalker<'a> {
    pub fn new(src: &'a [u8], vocab: &'a Vocabulary) -> Self {
        Self {
            src,
            vocab,
            facts: BodyFacts::default(),
        }
    }

    /// Depth-first walk over an explicit stack; nesting depth never grows
    /// the call stack.
    pub fn visit(&mut self, node: Node) {
        let mut stack = vec![(node, 0, 0)];
        while let Some((node, loop_depth, scope_depth)) = stack.pop() {
            if let Some((loop_depth, scope_depth)) = self.visit_one(node, loop_depth, scope_depth) {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.children(&mut cursor).collect();
                stack.extend(
                    children
                        .into_iter()
                        .rev()
                        .map(|c| (c, loop_depth, scope_depth)),
                );
            }
        }
    }

    pub fn finish(self) -> BodyFacts {
        self.facts
    }

    /// Record facts for one node. Returns the depths its children inherit,
    /// or `None` when the subtree is skipped.
    fn visit_one(
        &mut self,
        node: Node,
        loop_depth: usize,
        scope_depth: usize,
    ) -> Option<(usize, usize)> {
        if !node.is_named() {
            return None;
        }
        let v = self.vocab;
        let kind = node.kind();
        if v.comments.contains(&kind) {
            return None;
        }

        let mut loop_depth = loop_depth;
        let mut scope_depth = scope_depth;

        if v.loops.contains(&kind) {
            self.facts.control_flow.push(ConstructKind::Loop);
            loop_depth += 1;
            self.facts.max_loop_depth = self.facts.max_loop_depth.max(loop_depth);
        } else if v.conditionals.contains(&kind) {
            self.facts.control_flow.push(ConstructKind::Conditional);
        } else if v.tries.contains(&kind) {
            self.facts.control_flow.push(ConstructKind::Try);
        } else if v.contexts.contains(&kind) {
            self.facts.control_flow.push(ConstructKind::ContextManager);
        } else if v.switches.contains(&kind) {
            self.facts.control_flow.push(ConstructKind::Switch);
        }

        if v.decisions.contains(&kind) {
            self.facts.decision_points += 1;
        }
        if kind.ends_with("_statement") {
            self.facts.statement_count += 1;
        }

        if v.catches.contains(&kind) {
            let types = (v.caught_types)(node, self.src);
            if types.is_empty() {
                self.facts.caught.insert("*".to_string());
            } else {
                self.facts.caught.extend(types);
            }
        } else if v.raises.contains(&kind) {
            self.facts.raised.insert(self.raised_type(node));
        } else if v.yields.contains(&kind) {
            if scope_depth == 0 {
                self.facts.has_yield = true;
            }
        } else if v.awaits.contains(&kind) {
            if scope_depth == 0 {
                self.facts.await_count += 1;
            }
        } else if v.returns.contains(&kind) {
            if scope_depth == 0 {
                self.facts.return_count += 1;
            }
        } else if v.calls.contains(&kind) {
            let callee = callee_text(node, self.src);
            if !callee.is_empty() {
                self.facts.calls.insert(callee);
            }
        } else if v.comprehensions.contains(&kind) {
            self.facts.comprehensions += 1;
        } else if v.globals.contains(&kind) {
            let names = self.declared_names(node);
            self.facts.globals.extend(names);
        } else if v.nonlocals.contains(&kind) {
            let names = self.declared_names(node);
            self.facts.nonlocals.extend(names);
        } else if v.binary.contains(&kind) {
            self.record_operators(node, false);
        } else if v.unary.contains(&kind) {
            self.record_operators(node, true);
        } else if v.assignments.contains(&kind) {
            if node.child_by_field_name("value").is_some()
                || node.child_by_field_name("right").is_some()
                || node.child_by_field_name("left").is_some()
            {
                let target = node
                    .child_by_field_name("left")
                    .or_else(|| node.child_by_field_name("name"));
                let shape = target.map(|t| target_shape(t.kind())).unwrap_or("other");
                *self.facts.assignments.entry(shape.to_string()).or_default() += 1;
            }
        } else if v.augmented.contains(&kind) {
            let op = operator_token(node).unwrap_or_else(|| "?".to_string());
            *self.facts.augmented_assignments.entry(op).or_default() += 1;
        } else if v.strings.contains(&kind) {
            let key = clip(node_text(node, self.src).trim().to_string());
            *self.facts.string_literals.entry(key).or_default() += 1;
        } else if v.numbers.contains(&kind) {
            let key = clip(node_text(node, self.src).trim().to_string());
            *self.facts.numeric_literals.entry(key).or_default() += 1;
        } else if v.booleans.contains(&kind) {
            let key = node_text(node, self.src).trim().to_lowercase();
            *self.facts.boolean_literals.entry(key).or_default() += 1;
        } else if v.nones.contains(&kind) {
            let key = node_text(node, self.src).trim().to_lowercase();
            *self.facts.none_literals.entry(key).or_default() += 1;
        } else if v.subscripts.contains(&kind) {
            self.facts.subscript_count += 1;
        } else if let Some((_, field)) = v.attributes.iter().find(|(k, _)| *k == kind) {
            if let Some(name) = field_text(node, field, self.src) {
                *self.facts.attribute_access.entry(clip(name)).or_default() += 1;
            }
        }

        if v.lambdas.contains(&kind) {
            self.facts.lambdas += 1;
        }
        if v.scopes.contains(&kind) {
            scope_depth += 1;
        }
        Some((loop_depth, scope_depth))
    }

    fn raised_type(&self, node: Node) -> String {
        let mut cursor = node.walk();
        let target = node
            .named_children(&mut cursor)
            .find(|c| !self.vocab.comments.contains(&c.kind()));
        match target {
            None => "re-raise".to_string(),
            Some(t) if self.vocab.calls.contains(&t.kind()) => callee_text(t, self.src),
            Some(t) => clip(collapse(node_text(t, self.src))),
        }
    }

    fn declared_names(&self, node: Node) -> Vec<String> {
        let mut cursor = node.walk();
        let names = node
            .named_children(&mut cursor)
            .filter(|c| !self.vocab.comments.contains(&c.kind()))
            .map(|c| node_text(c, self.src).trim_start_matches('$').to_string())
            .collect();
        names
    }

    fn record_operators(&mut self, node: Node, unary: bool) {
        let mut cursor = node.walk();
        let ops: Vec<String> = node
            .children(&mut cursor)
            .filter(|c| !c.is_named() && !NON_OPERATOR_TOKENS.contains(&c.kind()))
            .map(|c| c.kind().to_string())
            .collect();
        for op in ops {
            let bucket = if LOGICAL_OPS.contains(&op.as_str()) {
                self.facts.decision_points += usize::from(!unary);
                &mut self.facts.logical_ops
            } else if unary {
                &mut self.facts.unary_ops
            } else if COMPARISON_OPS.contains(&op.as_str()) {
                &mut self.facts.comparison_ops
            } else {
                &mut self.facts.binary_ops
            };
            *bucket.entry(op).or_default() += 1;
        }
    }
}

/// Operator token of an augmented assignment or update expression.
fn operator_token(node: Node) -> Option<String> {
    if let Some(op) = node.child_by_field_name("operator") {
        return Some(op.kind().to_string());
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find(|c| !c.is_named() && !NON_OPERATOR_TOKENS.contains(&c.kind()))
        .map(|c| c.kind().to_string());
    found
}

/// Classify an assignment target by its node kind.
fn target_shape(kind: &str) -> &'static str {
    if kind.contains("subscript") {
        "subscript"
    } else if kind.contains("attribute") || kind.contains("member") || kind.contains("property") {
        "attribute"
    } else if kind.contains("pattern") || kind.contains("list") || kind.contains("tuple") {
        "unpacking"
    } else if kind.contains("identifier") || kind == "variable_name" || kind == "name" {
        "name"
    } else {
        "other"
    }
}

/// Extract parameters from a parameter-list node.
pub fn parameters(list: Node, src: &[u8], vocab: &Vocabulary) -> Vec<Parameter> {
    let mut params = Vec::new();
    let mut cursor = list.walk();
    for child in list.named_children(&mut cursor) {
        let kind = child.kind();
        if vocab.comments.contains(&kind) {
            continue;
        }
        if kind == "keyword_separator" || kind == "positional_separator" {
            params.push(Parameter {
                name: node_text(child, src).trim().to_string(),
                default: None,
                annotation: None,
                kind: ParamKind::Separator,
            });
            continue;
        }
        params.push(parameter(child, src));
    }
    params
}

fn parameter(node: Node, src: &[u8]) -> Parameter {
    let name_node = ["name", "pattern", "left"]
        .iter()
        .find_map(|f| node.child_by_field_name(f))
        .or_else(|| {
            if node.named_child_count() > 0 && node.kind() != "identifier" {
                node.named_child(0)
            } else {
                None
            }
        })
        .unwrap_or(node);

    let default = ["value", "default_value", "right"]
        .iter()
        .find_map(|f| field_text(node, f, src));
    let annotation = field_text(node, "type", src)
        .map(|t| t.trim_start_matches(':').trim().to_string())
        .filter(|t| !t.is_empty());

    let probe = [node.kind(), name_node.kind()];
    let kind = if probe.iter().any(|k| k.contains("dictionary_splat")) {
        ParamKind::VariadicKeyword
    } else if probe
        .iter()
        .any(|k| k.contains("list_splat") || k.contains("rest") || k.contains("variadic"))
    {
        ParamKind::Variadic
    } else {
        ParamKind::Regular
    };

    Parameter {
        name: collapse(node_text(name_node, src)),
        default,
        annotation,
        kind,
    }
}

/// Return annotation, without a leading `:` or `->`.
pub fn return_type(node: Node, src: &[u8]) -> Option<String> {
    field_text(node, "return_type", src)
        .map(|t| {
            t.trim_start_matches(':')
                .trim_start_matches("->")
                .trim()
                .to_string()
        })
        .filter(|t| !t.is_empty())
}

/// Source rewrite applied before parsing (e.g. PHP short tags).
pub type PreprocessFn = fn(&str) -> Cow<'_, str>;

/// Builds nodes and imports from a parsed tree.
pub type BuildFn = fn(&Tree, &[u8], &mut NodeTree) -> Result<(), ParseError>;

/// How much damage a grammar stage accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// Reject any error node or any listed legacy construct.
    Strict,
    /// Accept partial trees while errors cover at most half of the source.
    Tolerant,
}

/// A tree-sitter stage of a fallback chain.
pub struct GrammarStrategy {
    name: &'static str,
    language: Language,
    grammar: tree_sitter::Language,
    tolerance: Tolerance,
    rejected: &'static [&'static str],
    preprocess: Option<PreprocessFn>,
    build: BuildFn,
}

impl GrammarStrategy {
    pub fn strict(
        name: &'static str,
        language: Language,
        grammar: tree_sitter::Language,
        build: BuildFn,
    ) -> Self {
        Self {
            name,
            language,
            grammar,
            tolerance: Tolerance::Strict,
            rejected: &[],
            preprocess: None,
            build,
        }
    }

    pub fn tolerant(
        name: &'static str,
        language: Language,
        grammar: tree_sitter::Language,
        build: BuildFn,
    ) -> Self {
        Self {
            tolerance: Tolerance::Tolerant,
            ..Self::strict(name, language, grammar, build)
        }
    }

    /// Node kinds (named or anonymous) that make a strict stage fail.
    pub fn rejecting(mut self, kinds: &'static [&'static str]) -> Self {
        self.rejected = kinds;
        self
    }

    pub fn with_preprocess(mut self, preprocess: PreprocessFn) -> Self {
        self.preprocess = Some(preprocess);
        self
    }

    fn create_parser(&self) -> Result<Parser, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar)
            .map_err(|e| ParseError::Grammar {
                strategy: self.name,
                reason: e.to_string(),
            })?;
        Ok(parser)
    }

    fn check(&self, tree: &Tree, total_bytes: usize) -> Result<(), ParseError> {
        let root = tree.root_node();
        match self.tolerance {
            Tolerance::Strict => {
                if root.has_error() {
                    let (_, line) = error_extent(root);
                    return Err(ParseError::Syntax {
                        strategy: self.name,
                        line: line.unwrap_or(1),
                    });
                }
                if let Some((construct, line)) = find_kind(root, self.rejected) {
                    return Err(ParseError::LegacyConstruct {
                        strategy: self.name,
                        construct,
                        line,
                    });
                }
            }
            Tolerance::Tolerant => {
                let (error_bytes, _) = error_extent(root);
                if root.is_error() || error_bytes * 2 > total_bytes.max(1) {
                    return Err(ParseError::TooManyErrors {
                        strategy: self.name,
                        error_bytes,
                        total_bytes,
                    });
                }
            }
        }
        Ok(())
    }
}

impl ParseStrategy for GrammarStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn strategy(&self) -> Strategy {
        match self.tolerance {
            Tolerance::Strict => Strategy::Grammar,
            Tolerance::Tolerant => Strategy::Legacy,
        }
    }

    fn parse(&self, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        let text = match self.preprocess {
            Some(f) => f(source),
            None => Cow::Borrowed(source),
        };
        let mut parser = self.create_parser()?;
        let tree = parser
            .parse(text.as_bytes(), None)
            .ok_or(ParseError::NoTree {
                strategy: self.name,
            })?;
        self.check(&tree, text.len())?;

        let mut out = NodeTree::new(path, self.language, self.strategy(), source.len());
        (self.build)(&tree, text.as_bytes(), &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_shape() {
        assert_eq!(target_shape("identifier"), "name");
        assert_eq!(target_shape("variable_name"), "name");
        assert_eq!(target_shape("attribute"), "attribute");
        assert_eq!(target_shape("member_expression"), "attribute");
        assert_eq!(target_shape("subscript_expression"), "subscript");
        assert_eq!(target_shape("pattern_list"), "unpacking");
        assert_eq!(target_shape("array_pattern"), "unpacking");
    }

    #[test]
    fn test_collapse_and_clip() {
        assert_eq!(collapse("  a \n\t b  "), "a b");
        let long = "x".repeat(200);
        assert_eq!(clip(long).len(), MAX_KEY_LEN);
    }
}
