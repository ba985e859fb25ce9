//! PHP language adapter.
//!
//! Chain: strict tree-sitter-php, a tolerant pass that first normalizes
//! legacy short open tags, a brace-matching regex extractor, opaque.

use crate::analysis::regex_extract::BraceExtractor;
use crate::analysis::{FallbackChain, Language, LanguageAdapter, ParseStrategy};

pub struct PhpAdapter {
    chain: FallbackChain,
}

impl PhpAdapter {
    pub fn new() -> Self {
        let mut stages: Vec<Box<dyn ParseStrategy>> = Vec::new();
        #[cfg(feature = "tree-sitter")]
        stages.extend(grammar::strategies());
        stages.push(Box::new(BraceExtractor::php()));
        Self {
            chain: FallbackChain::new(Language::Php, stages),
        }
    }
}

impl Default for PhpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAdapter for PhpAdapter {
    fn language(&self) -> Language {
        Language::Php
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["php", "phtml"]
    }

    fn chain(&self) -> &FallbackChain {
        &self.chain
    }
}

/// Rewrite `<?` short open tags to `<?php`, and open a tag for bare snippets.
pub(crate) fn normalize_open_tags(source: &str) -> std::borrow::Cow<'_, str> {
    if !source.contains("<?") {
        // same line count, so spans keep their line numbers
        return std::borrow::Cow::Owned(format!("<?php {}", source));
    }
    let mut out = String::with_capacity(source.len() + 16);
    let mut rest = source;
    let mut changed = false;
    while let Some(pos) = rest.find("<?") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let long = after
            .get(..3)
            .map(|t| t.eq_ignore_ascii_case("php"))
            .unwrap_or(false);
        if long || after.starts_with('=') || after.starts_with("xml") {
            out.push_str("<?");
        } else {
            out.push_str("<?php ");
            changed = true;
        }
        rest = after;
    }
    out.push_str(rest);
    if changed {
        std::borrow::Cow::Owned(out)
    } else {
        std::borrow::Cow::Borrowed(source)
    }
}

#[cfg(feature = "tree-sitter")]
mod grammar {
    use std::collections::BTreeSet;

    use tree_sitter::{Node, Tree};

    use crate::analysis::walker::{
        collapse, field_text, node_text, parameters, return_type, FactWalker, GrammarStrategy,
        TokenText, Vocabulary,
    };
    use crate::analysis::{
        module_id_name, Language, NodeKind, NodeTree, ParseStrategy, SemanticNode, Signature,
        Span,
    };
    use crate::error::ParseError;

    const CLASS_KINDS: &[&str] = &[
        "class_declaration",
        "interface_declaration",
        "trait_declaration",
        "enum_declaration",
    ];

    const MODIFIER_KINDS: &[&str] = &[
        "visibility_modifier",
        "static_modifier",
        "abstract_modifier",
        "final_modifier",
        "readonly_modifier",
    ];

    const INCLUDE_KINDS: &[&str] = &[
        "include_expression",
        "include_once_expression",
        "require_expression",
        "require_once_expression",
    ];

    pub(super) static VOCAB: Vocabulary = Vocabulary {
        comments: &["comment"],
        loops: &[
            "for_statement",
            "foreach_statement",
            "while_statement",
            "do_statement",
        ],
        conditionals: &["if_statement", "else_if_clause"],
        tries: &["try_statement"],
        contexts: &[],
        switches: &["switch_statement", "match_expression"],
        decisions: &[
            "if_statement",
            "else_if_clause",
            "for_statement",
            "foreach_statement",
            "while_statement",
            "do_statement",
            "catch_clause",
            "conditional_expression",
            "case_statement",
            "match_conditional_expression",
        ],
        catches: &["catch_clause"],
        caught_types,
        raises: &["throw_expression", "throw_statement"],
        yields: &["yield_expression"],
        awaits: &[],
        calls: &[
            "function_call_expression",
            "member_call_expression",
            "nullsafe_member_call_expression",
            "scoped_call_expression",
            "object_creation_expression",
        ],
        comprehensions: &[],
        lambdas: &[
            "anonymous_function",
            "anonymous_function_creation_expression",
            "arrow_function",
        ],
        globals: &["global_declaration"],
        nonlocals: &[],
        binary: &["binary_expression"],
        unary: &["unary_op_expression"],
        assignments: &["assignment_expression"],
        augmented: &["augmented_assignment_expression", "update_expression"],
        strings: &["string", "encapsed_string", "heredoc", "nowdoc"],
        numbers: &["integer", "float"],
        booleans: &["boolean"],
        nones: &["null"],
        attributes: &[
            ("member_access_expression", "name"),
            ("nullsafe_member_access_expression", "name"),
            ("scoped_property_access_expression", "name"),
        ],
        subscripts: &["subscript_expression"],
        returns: &["return_statement"],
        scopes: &[
            "function_definition",
            "method_declaration",
            "anonymous_function",
            "anonymous_function_creation_expression",
            "arrow_function",
            "class_declaration",
        ],
    };

    pub(super) fn strategies() -> Vec<Box<dyn ParseStrategy>> {
        let grammar: tree_sitter::Language = tree_sitter_php::LANGUAGE_PHP.into();
        vec![
            Box::new(GrammarStrategy::strict(
                "php-strict",
                Language::Php,
                grammar.clone(),
                build,
            )),
            Box::new(
                GrammarStrategy::tolerant("php-legacy", Language::Php, grammar, build)
                    .with_preprocess(super::normalize_open_tags),
            ),
        ]
    }

    /// `catch (A | B $e)` yields `A`, `B`.
    fn caught_types(clause: Node, src: &[u8]) -> Vec<String> {
        let Some(types) = clause.child_by_field_name("type") else {
            return Vec::new();
        };
        if types.named_child_count() == 0 {
            return vec![collapse(node_text(types, src))];
        }
        let mut cursor = types.walk();
        let names = types
            .named_children(&mut cursor)
            .map(|t| collapse(node_text(t, src)))
            .collect();
        names
    }

    fn modifiers(node: Node, src: &[u8]) -> BTreeSet<String> {
        let mut cursor = node.walk();
        let found = node
            .children(&mut cursor)
            .filter(|c| MODIFIER_KINDS.contains(&c.kind()))
            .map(|c| node_text(c, src).trim().to_lowercase())
            .collect();
        found
    }

    /// `#[Route('/x')]` attributes, one entry per attribute.
    fn attributes(node: Node, src: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = node.walk();
        for group in node
            .children(&mut cursor)
            .filter(|c| c.kind() == "attribute_list")
        {
            collect_attributes(group, src, &mut out);
        }
        out
    }

    fn collect_attributes(node: Node, src: &[u8], out: &mut Vec<String>) {
        let mut cursor = node.walk();
        let mut stack: Vec<Node> = node.named_children(&mut cursor).collect();
        stack.reverse();
        while let Some(child) = stack.pop() {
            if child.kind() == "attribute" {
                out.push(collapse(node_text(child, src)));
            } else {
                let mut cursor = child.walk();
                let nested: Vec<Node> = child.named_children(&mut cursor).collect();
                stack.extend(nested.into_iter().rev());
            }
        }
    }

    /// Names listed in a `base_clause` or `class_interface_clause`.
    fn clause_names(node: Node, src: &[u8]) -> Vec<String> {
        let mut cursor = node.walk();
        let names = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() != "comment")
            .map(|c| collapse(node_text(c, src)))
            .collect();
        names
    }

    fn string_value(node: Node, src: &[u8]) -> Option<String> {
        let text = node_text(node, src)
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn build(tree: &Tree, src: &[u8], out: &mut NodeTree) -> Result<(), ParseError> {
        let root = tree.root_node();
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

    fn function_node(def: Node, owner: Option<(&str, &str)>, src: &[u8]) -> SemanticNode {
        let name = field_text(def, "name", src).unwrap_or_else(|| "<anonymous>".to_string());
        let mut node = match owner {
            Some((class_name, _)) => SemanticNode::new(
                NodeKind::Method,
                name.clone(),
                format!("{}.{}", class_name, name),
            ),
            None => SemanticNode::new(NodeKind::Function, name.clone(), name),
        };
        node.parent_id = owner.map(|(_, id)| id.to_string());
        node.span = Span::from_node(def);

        let mut text = TokenText::new();
        text.push_node(def, src, &VOCAB);
        let (canonical, shape) = text.finish();
        node.canonical_text = canonical;
        node.shape_text = shape;

        node.signature = Some(Signature {
            params: def
                .child_by_field_name("parameters")
                .map(|p| parameters(p, src, &VOCAB))
                .unwrap_or_default(),
            return_type: return_type(def, src),
            is_async: false,
        });
        node.decorators = attributes(def, src);
        node.modifiers = modifiers(def, src);

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
                let kind = child.kind();
                match kind {
                    "php_tag" | "text" | "text_interpolation" | "comment" => {}
                    "function_definition" => {
                        let node = function_node(child, None, self.src);
                        self.out.insert(node);
                    }
                    k if CLASS_KINDS.contains(&k) => self.add_class(child),
                    "namespace_definition" => match child.child_by_field_name("body") {
                        Some(body) => self.visit_top_level(body),
                        None => self.module_statement(child),
                    },
                    "namespace_use_declaration" => self.add_use(child),
                    "expression_statement" if self.add_include(child) => {}
                    "ERROR" => self.visit_top_level(child),
                    _ => self.module_statement(child),
                }
            }
        }

        fn module_statement(&mut self, stmt: Node) {
            self.text.push_node(stmt, self.src, &VOCAB);
            self.facts.visit(stmt);
        }

        fn add_use(&mut self, decl: Node) {
            let mut cursor = decl.walk();
            let mut found = false;
            for clause in decl.named_children(&mut cursor) {
                if clause.kind() == "namespace_use_clause" || clause.kind() == "namespace_use_group" {
                    let name = clause
                        .named_child(0)
                        .map(|n| collapse(node_text(n, self.src)))
                        .unwrap_or_default();
                    if !name.is_empty() {
                        self.out.imports.insert(name.trim_start_matches('\\').to_string());
                        found = true;
                    }
                }
            }
            if !found {
                let text = collapse(node_text(decl, self.src));
                let text = text
                    .trim_start_matches("use")
                    .trim_end_matches(';')
                    .trim()
                    .to_string();
                if !text.is_empty() {
                    self.out.imports.insert(text);
                }
            }
        }

        /// `require_once 'x.php';` and friends. Returns false for other statements.
        fn add_include(&mut self, stmt: Node) -> bool {
            let Some(expr) = stmt.named_child(0) else {
                return false;
            };
            if !INCLUDE_KINDS.contains(&expr.kind()) {
                return false;
            }
            let target = expr
                .named_child(0)
                .and_then(|n| {
                    if n.kind() == "parenthesized_expression" {
                        n.named_child(0)
                    } else {
                        Some(n)
                    }
                })
                .and_then(|n| string_value(n, self.src));
            match target {
                Some(t) => {
                    self.out.imports.insert(t);
                    true
                }
                None => false,
            }
        }

        fn add_class(&mut self, def: Node) {
            let src = self.src;
            let name = field_text(def, "name", src).unwrap_or_else(|| "<anonymous>".to_string());
            let mut node = SemanticNode::new(NodeKind::Class, name.clone(), name.clone());
            node.span = Span::from_node(def);
            node.decorators = attributes(def, src);
            node.modifiers = modifiers(def, src);

            let mut cursor = def.walk();
            for child in def.children(&mut cursor) {
                if matches!(child.kind(), "base_clause" | "class_interface_clause") {
                    node.bases.extend(clause_names(child, src));
                }
            }

            let mut text = TokenText::new();
            let body = def.child_by_field_name("body");
            let mut cursor = def.walk();
            for child in def.children(&mut cursor) {
                if Some(child.id()) != body.map(|b| b.id()) {
                    text.push_node(child, src, &VOCAB);
                }
            }

            let mut facts = FactWalker::new(src, &VOCAB);
            let mut methods: Vec<Node> = Vec::new();
            if let Some(body) = body {
                let mut cursor = body.walk();
                for member in body.named_children(&mut cursor) {
                    match member.kind() {
                        "method_declaration" => methods.push(member),
                        "comment" => {}
                        "property_declaration" => {
                            let mut c = member.walk();
                            for element in member
                                .named_children(&mut c)
                                .filter(|e| e.kind() == "property_element")
                            {
                                if let Some(var) = element
                                    .child_by_field_name("name")
                                    .or_else(|| element.named_child(0))
                                {
                                    node.attributes.insert(
                                        node_text(var, src).trim_start_matches('$').to_string(),
                                    );
                                }
                            }
                            text.push_node(member, src, &VOCAB);
                            facts.visit(member);
                        }
                        "const_declaration" => {
                            let mut c = member.walk();
                            for element in member
                                .named_children(&mut c)
                                .filter(|e| e.kind() == "const_element")
                            {
                                if let Some(n) = element.named_child(0) {
                                    node.attributes.insert(node_text(n, src).to_string());
                                }
                            }
                            text.push_node(member, src, &VOCAB);
                        }
                        "enum_case" => {
                            if let Some(n) = field_text(member, "name", src) {
                                node.attributes.insert(n);
                            }
                            text.push_node(member, src, &VOCAB);
                        }
                        "use_declaration" => {
                            node.bases.push(collapse(node_text(member, src)).trim_end_matches(';').to_string());
                            text.push_node(member, src, &VOCAB);
                        }
                        _ => {
                            text.push_node(member, src, &VOCAB);
                            facts.visit(member);
                        }
                    }
                }
            }

            for method in &methods {
                if let Some(method_name) = field_text(*method, "name", src) {
                    node.members.insert(method_name);
                }
                if let Some(method_body) = method.child_by_field_name("body") {
                    promoted_or_this_attributes(*method, method_body, src, &mut node.attributes);
                }
            }
            text.push_members(&node.members);

            let (canonical, shape) = text.finish();
            node.canonical_text = canonical;
            node.shape_text = shape;
            node.facts = facts.finish();
            let class_id = self.out.insert(node);

            for method in methods {
                let member = function_node(method, Some((&name, &class_id)), src);
                self.out.insert(member);
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

    /// Constructor-promoted properties and `$this->x = ...` targets.
    fn promoted_or_this_attributes(method: Node, body: Node, src: &[u8], out: &mut BTreeSet<String>) {
        if let Some(params) = method.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for param in params
                .named_children(&mut cursor)
                .filter(|p| p.kind() == "property_promotion_parameter")
            {
                if let Some(name) = field_text(param, "name", src) {
                    out.insert(name.trim_start_matches('$').to_string());
                }
            }
        }
        this_assignments(body, src, out);
    }

    fn this_assignments(node: Node, src: &[u8], out: &mut BTreeSet<String>) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if node.kind() == "assignment_expression" {
                if let Some(left) = node.child_by_field_name("left") {
                    if left.kind() == "member_access_expression"
                        && field_text(left, "object", src).as_deref() == Some("$this")
                    {
                        if let Some(name) = field_text(left, "name", src) {
                            out.insert(name);
                        }
                    }
                }
            }
            let mut cursor = node.walk();
            stack.extend(node.named_children(&mut cursor).filter(|c| {
                !matches!(
                    c.kind(),
                    "anonymous_function" | "anonymous_function_creation_expression" | "arrow_function"
                )
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_open_tags() {
        assert_eq!(normalize_open_tags("<?php echo 1;"), "<?php echo 1;");
        assert_eq!(normalize_open_tags("<? echo 1;"), "<?php  echo 1;");
        assert_eq!(normalize_open_tags("<?= $x ?>"), "<?= $x ?>");
        assert_eq!(normalize_open_tags("echo 1;"), "<?php echo 1;");
    }

    #[cfg(feature = "tree-sitter")]
    mod grammar_tests {
        use super::*;
        use crate::analysis::{NodeKind, NodeTree, Strategy};

        fn parse_php(source: &str) -> NodeTree {
            PhpAdapter::new().parse("src/UserService.php", source).unwrap()
        }

        #[test]
        fn test_extract_php_structure() {
            let source = r#"<?php
namespace App\Services;

use App\Models\User;
use Psr\Log\LoggerInterface;

function helper(int $a, $b = 2): int {
    return $a + $b;
}

#[Service]
final class UserService extends BaseService implements Loggable, Countable {
    use Cacheable;

    private $repo;
    const LIMIT = 10;

    public function __construct(private LoggerInterface $logger) {
        $this->repo = new Repo();
    }

    public static function find(int $id): ?User {
        try {
            return self::$cache[$id] ?? $this->repo->find($id);
        } catch (NotFound | Timeout $e) {
            throw new ServiceError("missing");
        }
    }
}
"#;
            let tree = parse_php(source);
            assert_eq!(tree.strategy, Strategy::Grammar);
            assert!(tree.imports.contains("App\\Models\\User"));
            assert!(tree.imports.contains("Psr\\Log\\LoggerInterface"));

            let helper = tree.get("func:helper").unwrap();
            let sig = helper.signature.as_ref().unwrap();
            assert_eq!(sig.arity(), 2);
            assert_eq!(sig.params[1].default.as_deref(), Some("2"));
            assert_eq!(sig.return_type.as_deref(), Some("int"));

            let class = tree.get("class:UserService").unwrap();
            assert_eq!(class.kind, NodeKind::Class);
            assert!(class.bases.contains(&"BaseService".to_string()));
            assert!(class.bases.contains(&"Loggable".to_string()));
            assert!(class.modifiers.contains("final"));
            assert!(class.attributes.contains("repo"));
            assert!(class.attributes.contains("LIMIT"));
            assert!(class.attributes.contains("logger"));
            assert_eq!(class.decorators.len(), 1);

            let find = tree.get("class:UserService.find").unwrap();
            assert!(find.modifiers.contains("public"));
            assert!(find.modifiers.contains("static"));
            assert!(find.facts.caught.contains("NotFound"));
            assert!(find.facts.caught.contains("Timeout"));
            assert!(find.facts.raised.contains("ServiceError"));
        }

        #[test]
        fn test_short_tags_use_legacy_pass() {
            let source = "<?\nfunction legacy($x) {\n    return $x * 2;\n}\n";
            let tree = parse_php(source);
            assert_ne!(tree.strategy, Strategy::Opaque);
            assert!(tree.get("func:legacy").is_some());
        }
    }
}
