//! Python language adapter.
//!
//! Chain: strict tree-sitter grammar (rejects Python 2 constructs), the same
//! grammar in tolerant mode, an indentation-based regex extractor, opaque.

use crate::analysis::regex_extract::IndentExtractor;
use crate::analysis::{FallbackChain, Language, LanguageAdapter, ParseStrategy};

pub struct PythonAdapter {
    chain: FallbackChain,
}

impl PythonAdapter {
    pub fn new() -> Self {
        let mut stages: Vec<Box<dyn ParseStrategy>> = Vec::new();
        #[cfg(feature = "tree-sitter")]
        stages.extend(grammar::strategies());
        stages.push(Box::new(IndentExtractor::python()));
        Self {
            chain: FallbackChain::new(Language::Python, stages),
        }
    }
}

impl Default for PythonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["py", "pyw"]
    }

    fn chain(&self) -> &FallbackChain {
        &self.chain
    }
}

#[cfg(feature = "tree-sitter")]
mod grammar {
    use std::collections::BTreeSet;

    use streaming_iterator::StreamingIterator;
    use tree_sitter::{Node, Query, QueryCursor, Tree};

    use crate::analysis::walker::{
        collapse, field_text, has_token, node_text, parameters, return_type, FactWalker,
        GrammarStrategy, TokenText, Vocabulary,
    };
    use crate::analysis::{
        module_id_name, Language, NodeKind, NodeTree, ParseStrategy, SemanticNode, Signature,
        Span,
    };
    use crate::error::ParseError;

    /// Constructs only valid in Python 2.
    const LEGACY_KINDS: &[&str] = &["print_statement", "exec_statement", "<>"];

    /// Tree-sitter query for extracting imports.
    const IMPORT_QUERY: &str = r#"
; import module
(import_statement
  name: (dotted_name) @module)

; import module as alias
(import_statement
  name: (aliased_import
    name: (dotted_name) @module))

; from module import name
(import_from_statement
  module_name: (dotted_name) @module)

; from . import name
(import_from_statement
  module_name: (relative_import) @module)
"#;

    pub(super) static VOCAB: Vocabulary = Vocabulary {
        comments: &["comment"],
        loops: &["for_statement", "while_statement"],
        conditionals: &["if_statement", "elif_clause"],
        tries: &["try_statement"],
        contexts: &["with_statement"],
        switches: &["match_statement"],
        decisions: &[
            "if_statement",
            "elif_clause",
            "for_statement",
            "while_statement",
            "except_clause",
            "except_group_clause",
            "conditional_expression",
            "case_clause",
            "if_clause",
        ],
        catches: &["except_clause", "except_group_clause"],
        caught_types,
        raises: &["raise_statement"],
        yields: &["yield"],
        awaits: &["await"],
        calls: &["call"],
        comprehensions: &[
            "list_comprehension",
            "set_comprehension",
            "dictionary_comprehension",
            "generator_expression",
        ],
        lambdas: &["lambda"],
        globals: &["global_statement"],
        nonlocals: &["nonlocal_statement"],
        binary: &["binary_operator", "comparison_operator", "boolean_operator"],
        unary: &["unary_operator", "not_operator"],
        assignments: &["assignment"],
        augmented: &["augmented_assignment"],
        strings: &["string"],
        numbers: &["integer", "float"],
        booleans: &["true", "false"],
        nones: &["none"],
        attributes: &[("attribute", "attribute")],
        subscripts: &["subscript"],
        returns: &["return_statement"],
        scopes: &["function_definition", "class_definition", "lambda"],
    };

    pub(super) fn strategies() -> Vec<Box<dyn ParseStrategy>> {
        let grammar: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        vec![
            Box::new(
                GrammarStrategy::strict("python-strict", Language::Python, grammar.clone(), build)
                    .rejecting(LEGACY_KINDS),
            ),
            Box::new(GrammarStrategy::tolerant(
                "python-legacy",
                Language::Python,
                grammar,
                build,
            )),
        ]
    }

    /// `except (A, B) as e:` yields `A`, `B`; a bare `except:` yields nothing.
    fn caught_types(clause: Node, src: &[u8]) -> Vec<String> {
        let mut cursor = clause.walk();
        let target = clause
            .named_children(&mut cursor)
            .find(|c| !matches!(c.kind(), "block" | "comment"));
        let Some(mut target) = target else {
            return Vec::new();
        };
        if target.kind() == "as_pattern" {
            match target.named_child(0) {
                Some(inner) => target = inner,
                None => return Vec::new(),
            }
        }
        match target.kind() {
            "tuple" | "parenthesized_expression" | "expression_list" => {
                let mut cursor = target.walk();
                let types = target
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() != "comment")
                    .map(|c| collapse(node_text(c, src)))
                    .collect();
                types
            }
            _ => vec![collapse(node_text(target, src))],
        }
    }

    fn build(tree: &Tree, src: &[u8], out: &mut NodeTree) -> Result<(), ParseError> {
        let root = tree.root_node();
        collect_imports(root, src, out)?;

        let mut builder = Builder {
            src,
            out,
            text: TokenText::new(),
            facts: FactWalker::new(src, &VOCAB),
        };
        builder.visit_top_level(root);
        builder.finish(root);
        Ok(())
    }

    fn collect_imports(root: Node, src: &[u8], out: &mut NodeTree) -> Result<(), ParseError> {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let query = Query::new(&language, IMPORT_QUERY).map_err(|e| ParseError::Grammar {
            strategy: "python-imports",
            reason: e.to_string(),
        })?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, root, src);

        while let Some(m) = matches.next() {
            for capture in m.captures {
                if inside_definition(capture.node) {
                    continue;
                }
                let module = collapse(node_text(capture.node, src));
                if !module.is_empty() {
                    out.imports.insert(module);
                }
            }
        }
        Ok(())
    }

    fn inside_definition(node: Node) -> bool {
        let mut current = node.parent();
        while let Some(n) = current {
            if matches!(n.kind(), "function_definition" | "class_definition") {
                return true;
            }
            current = n.parent();
        }
        false
    }

    fn decorators(outer: Node, src: &[u8]) -> Vec<String> {
        let mut cursor = outer.walk();
        let found = outer
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .map(|c| collapse(node_text(c, src).trim_start_matches('@')))
            .collect();
        found
    }

    fn is_property(decorators: &[String]) -> bool {
        decorators.iter().any(|d| {
            d == "property"
                || d.ends_with("cached_property")
                || d.ends_with(".setter")
                || d.ends_with(".getter")
                || d.ends_with(".deleter")
        })
    }

    /// Names bound by `self.<name> = ...` anywhere under `node`.
    fn self_attributes(node: Node, src: &[u8], out: &mut BTreeSet<String>) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if matches!(node.kind(), "assignment" | "augmented_assignment") {
                if let Some(left) = node.child_by_field_name("left") {
                    if left.kind() == "attribute" {
                        let object = field_text(left, "object", src);
                        if object.as_deref() == Some("self") {
                            if let Some(attr) = field_text(left, "attribute", src) {
                                out.insert(attr);
                            }
                        }
                    }
                }
            }
            let mut cursor = node.walk();
            stack.extend(
                node.named_children(&mut cursor)
                    .filter(|c| !matches!(c.kind(), "function_definition" | "class_definition")),
            );
        }
    }

    /// Names bound by a class-level assignment statement.
    fn assigned_names(stmt: Node, src: &[u8], out: &mut BTreeSet<String>) {
        let Some(assignment) = stmt.named_child(0).filter(|n| n.kind() == "assignment") else {
            return;
        };
        let Some(left) = assignment.child_by_field_name("left") else {
            return;
        };
        if left.kind() == "identifier" {
            out.insert(node_text(left, src).to_string());
            return;
        }
        let mut cursor = left.walk();
        for target in left.named_children(&mut cursor) {
            if target.kind() == "identifier" {
                out.insert(node_text(target, src).to_string());
            }
        }
    }

    /// Build a function, method or property node.
    fn function_node(
        def: Node,
        outer: Node,
        decorators: Vec<String>,
        owner: Option<(&str, &str)>,
        src: &[u8],
    ) -> SemanticNode {
        let name = field_text(def, "name", src).unwrap_or_else(|| "<anonymous>".to_string());
        let mut node = match owner {
            Some((class_name, _)) => {
                let kind = if is_property(&decorators) {
                    NodeKind::Property
                } else {
                    NodeKind::Method
                };
                SemanticNode::new(kind, name.clone(), format!("{}.{}", class_name, name))
            }
            None => SemanticNode::new(NodeKind::Function, name.clone(), name),
        };
        node.parent_id = owner.map(|(_, id)| id.to_string());
        node.span = Span::from_node(outer);

        let mut text = TokenText::new();
        text.push_node(outer, src, &VOCAB);
        let (canonical, shape) = text.finish();
        node.canonical_text = canonical;
        node.shape_text = shape;

        node.signature = Some(Signature {
            params: def
                .child_by_field_name("parameters")
                .map(|p| parameters(p, src, &VOCAB))
                .unwrap_or_default(),
            return_type: return_type(def, src),
            is_async: has_token(def, "async"),
        });
        node.decorators = decorators;

        if let Some(body) = def.child_by_field_name("body") {
            let mut walker = FactWalker::new(src, &VOCAB);
            walker.visit(body);
            node.facts = walker.finish();
        }
        node
    }

    struct Builder<'a> {
        src: &'a [u8],
        out: &'a mut NodeTree,
        text: TokenText,
        facts: FactWalker<'a>,
    }

    impl<'a> Builder<'a> {
        fn visit_top_level(&mut self, parent: Node) {
            let mut cursor = parent.walk();
            let children: Vec<Node> = parent.named_children(&mut cursor).collect();
            for child in children {
                match child.kind() {
                    "function_definition" => {
                        let node = function_node(child, child, Vec::new(), None, self.src);
                        self.out.insert(node);
                    }
                    "class_definition" => self.add_class(child, child, Vec::new()),
                    "decorated_definition" => self.add_decorated(child),
                    "import_statement" | "import_from_statement" | "future_import_statement" => {}
                    "comment" => {}
                    // tolerant parses can bury whole definitions in an ERROR node
                    "ERROR" => self.visit_top_level(child),
                    _ => self.module_statement(child),
                }
            }
        }

        fn module_statement(&mut self, stmt: Node) {
            self.text.push_node(stmt, self.src, &VOCAB);
            self.facts.visit(stmt);
        }

        fn add_decorated(&mut self, outer: Node) {
            let decorators = decorators(outer, self.src);
            match outer.child_by_field_name("definition") {
                Some(def) if def.kind() == "function_definition" => {
                    let node = function_node(def, outer, decorators, None, self.src);
                    self.out.insert(node);
                }
                Some(def) if def.kind() == "class_definition" => {
                    self.add_class(def, outer, decorators)
                }
                _ => self.module_statement(outer),
            }
        }

        fn add_class(&mut self, def: Node, outer: Node, decorators: Vec<String>) {
            let src = self.src;
            let name = field_text(def, "name", src).unwrap_or_else(|| "<anonymous>".to_string());
            let mut node = SemanticNode::new(NodeKind::Class, name.clone(), name.clone());
            node.span = Span::from_node(outer);
            node.decorators = decorators;
            node.bases = def
                .child_by_field_name("superclasses")
                .map(|s| {
                    let mut cursor = s.walk();
                    let bases = s
                        .named_children(&mut cursor)
                        .filter(|c| c.kind() != "comment")
                        .map(|c| collapse(node_text(c, src)))
                        .collect();
                    bases
                })
                .unwrap_or_default();

            let mut text = TokenText::new();
            let mut cursor = outer.walk();
            for decorator in outer
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "decorator")
            {
                text.push_node(decorator, src, &VOCAB);
            }

            let body = def.child_by_field_name("body");
            let mut cursor = def.walk();
            for child in def.children(&mut cursor) {
                if Some(child.id()) != body.map(|b| b.id()) {
                    text.push_node(child, src, &VOCAB);
                }
            }

            let mut facts = FactWalker::new(src, &VOCAB);
            let mut members: Vec<(Node, Node, Vec<String>)> = Vec::new();
            if let Some(body) = body {
                let mut cursor = body.walk();
                for stmt in body.named_children(&mut cursor) {
                    match stmt.kind() {
                        "function_definition" => members.push((stmt, stmt, Vec::new())),
                        "decorated_definition" => match stmt.child_by_field_name("definition") {
                            Some(d) if d.kind() == "function_definition" => {
                                members.push((d, stmt, self::decorators(stmt, src)))
                            }
                            _ => {
                                text.push_node(stmt, src, &VOCAB);
                                facts.visit(stmt);
                            }
                        },
                        "comment" => {}
                        _ => {
                            if stmt.kind() == "expression_statement" {
                                assigned_names(stmt, src, &mut node.attributes);
                            }
                            text.push_node(stmt, src, &VOCAB);
                            facts.visit(stmt);
                        }
                    }
                }
            }

            for (member, _, _) in &members {
                if let Some(member_name) = field_text(*member, "name", src) {
                    node.members.insert(member_name);
                }
                if let Some(member_body) = member.child_by_field_name("body") {
                    self_attributes(member_body, src, &mut node.attributes);
                }
            }
            text.push_members(&node.members);

            let (canonical, shape) = text.finish();
            node.canonical_text = canonical;
            node.shape_text = shape;
            node.facts = facts.finish();
            let class_id = self.out.insert(node);

            for (member, member_outer, member_decorators) in members {
                let method = function_node(
                    member,
                    member_outer,
                    member_decorators,
                    Some((&name, &class_id)),
                    src,
                );
                self.out.insert(method);
            }
        }

        fn finish(self, root: Node) {
            let stem = module_id_name(&self.out.path);
            let mut node = SemanticNode::new(NodeKind::Module, stem.clone(), stem);
            node.span = Span::from_node(root);
            let (canonical, shape) = self.text.finish();
            node.canonical_text = canonical;
            node.shape_text = shape;
            node.facts = self.facts.finish();
            self.out.insert(node);
        }
    }
}

#[cfg(all(test, feature = "tree-sitter"))]
mod tests {
    use super::*;
    use crate::analysis::{NodeKind, NodeTree, ParamKind, Strategy};

    fn parse_python(source: &str) -> NodeTree {
        PythonAdapter::new().parse("pkg/app.py", source).unwrap()
    }

    #[test]
    fn test_extract_imports() {
        let source = r#"
import os
import numpy as np
from collections import OrderedDict
from . import local_module

def f():
    import json
"#;
        let tree = parse_python(source);
        assert_eq!(tree.strategy, Strategy::Grammar);
        assert!(tree.imports.contains("os"));
        assert!(tree.imports.contains("numpy"));
        assert!(tree.imports.contains("collections"));
        assert!(tree.imports.contains("."));
        assert!(!tree.imports.contains("json"));
    }

    #[test]
    fn test_node_ids() {
        let source = r#"
def top(a, b=1, *args, **kwargs) -> int:
    return a

class Service(Base, metaclass=Meta):
    retries = 3

    def __init__(self):
        self.client = None

    @property
    def name(self):
        return "svc"

    async def fetch(self, url: str):
        return await self.client.get(url)
"#;
        let tree = parse_python(source);
        let ids: Vec<&str> = tree.nodes.keys().map(|k| k.as_str()).collect();
        assert!(ids.contains(&"func:top"));
        assert!(ids.contains(&"class:Service"));
        assert!(ids.contains(&"class:Service.__init__"));
        assert!(ids.contains(&"class:Service.fetch"));
        assert!(ids.contains(&"module:app"));

        let name = tree.get("class:Service.name").unwrap();
        assert_eq!(name.kind, NodeKind::Property);
        assert_eq!(name.parent_id.as_deref(), Some("class:Service"));

        let class = tree.get("class:Service").unwrap();
        assert_eq!(class.bases, vec!["Base", "metaclass=Meta"]);
        assert!(class.attributes.contains("retries"));
        assert!(class.attributes.contains("client"));
        assert!(class.members.contains("fetch"));

        let fetch = tree.get("class:Service.fetch").unwrap();
        assert!(fetch.is_async());
        assert_eq!(fetch.facts.await_count, 1);
    }

    #[test]
    fn test_signature_extraction() {
        let tree = parse_python("def top(a, b=1, *args, c: int = 2, **kwargs) -> int:\n    return a\n");
        let sig = tree.get("func:top").unwrap().signature.clone().unwrap();
        let names: Vec<&str> = sig.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "args", "c", "kwargs"]);
        assert_eq!(sig.params[1].default.as_deref(), Some("1"));
        assert_eq!(sig.params[2].kind, ParamKind::Variadic);
        assert_eq!(sig.params[3].annotation.as_deref(), Some("int"));
        assert_eq!(sig.params[4].kind, ParamKind::VariadicKeyword);
        assert_eq!(sig.return_type.as_deref(), Some("int"));
    }

    #[test]
    fn test_body_facts() {
        let source = r#"
def work(items):
    global counter
    total = 0
    for item in items:
        if item > 0 and item < 10:
            total += item * 2
    try:
        risky()
    except (ValueError, KeyError):
        raise RuntimeError("bad")
    squares = [x * x for x in items]
    key = lambda v: -v
    return total
"#;
        let tree = parse_python(source);
        let facts = &tree.get("func:work").unwrap().facts;
        assert!(facts.globals.contains("counter"));
        assert_eq!(facts.max_loop_depth, 1);
        assert!(facts.caught.contains("ValueError"));
        assert!(facts.caught.contains("KeyError"));
        assert!(facts.raised.contains("RuntimeError"));
        assert!(facts.calls.contains("risky"));
        assert_eq!(facts.comprehensions, 1);
        assert_eq!(facts.lambdas, 1);
        assert_eq!(facts.logical_ops.get("and"), Some(&1));
        assert_eq!(facts.comparison_ops.get(">"), Some(&1));
        assert_eq!(facts.augmented_assignments.get("+="), Some(&1));
        assert_eq!(facts.unary_ops.get("-"), Some(&1));
        assert!(!facts.has_yield);
    }

    #[test]
    fn test_nested_yield_does_not_make_generator() {
        let source = "def outer():\n    def inner():\n        yield 1\n    return inner\n";
        let tree = parse_python(source);
        assert!(!tree.get("func:outer").unwrap().facts.has_yield);
    }

    #[test]
    fn test_comments_and_whitespace_ignored() {
        let a = parse_python("def f(a):\n    return a  # done\n");
        let b = parse_python("def f( a ):\n\n    # note\n    return   a\n");
        assert_eq!(
            a.get("func:f").unwrap().canonical_text,
            b.get("func:f").unwrap().canonical_text
        );
    }

    #[test]
    fn test_method_edit_leaves_class_text() {
        let a = parse_python("class A:\n    def m(self):\n        return 1\n");
        let b = parse_python("class A:\n    def m(self):\n        return 2\n");
        assert_eq!(
            a.get("class:A").unwrap().canonical_text,
            b.get("class:A").unwrap().canonical_text
        );
        let (ma, mb) = (a.get("class:A.m").unwrap(), b.get("class:A.m").unwrap());
        assert_ne!(ma.canonical_text, mb.canonical_text);
        assert_eq!(ma.shape_text, mb.shape_text);
    }

    #[test]
    fn test_python2_falls_back_to_legacy() {
        let source = "import os\n\ndef greet(name):\n    print \"hello\", name\n";
        let tree = parse_python(source);
        assert_eq!(tree.strategy, Strategy::Legacy);
        assert!(tree.get("func:greet").is_some());
        assert!(tree.imports.contains("os"));
    }

    #[test]
    fn test_deep_nesting_walks_on_small_stack() {
        let depth = 4_000;
        let source = format!(
            "def deep():\n    return {}1 + 2{}\n",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let handle = std::thread::Builder::new()
            .stack_size(512 * 1024)
            .spawn(move || parse_python(&source))
            .unwrap();
        let tree = handle.join().unwrap();
        let deep = tree.get("func:deep").unwrap();
        assert_eq!(deep.facts.return_count, 1);
        assert_eq!(deep.facts.binary_ops.get("+"), Some(&1));
        assert!(deep.canonical_text.contains("1 + 2"));
    }

    #[test]
    fn test_garbage_falls_back() {
        let tree = parse_python("%%%% ((((\n@@@@ }}}}\n");
        assert!(matches!(tree.strategy, Strategy::Regex | Strategy::Opaque));
    }
}
