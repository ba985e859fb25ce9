//! JavaScript and TypeScript language adapter.
//!
//! Both dialects share one walker. The strict stage uses the dialect's own
//! grammar; the tolerant stage uses the TSX grammar, which accepts the union
//! of JSX and type syntax.

use crate::analysis::regex_extract::BraceExtractor;
use crate::analysis::{FallbackChain, Language, LanguageAdapter, ParseStrategy};

pub struct JavaScriptAdapter {
    language: Language,
    chain: FallbackChain,
}

impl JavaScriptAdapter {
    pub fn javascript() -> Self {
        Self::with_language(Language::JavaScript)
    }

    pub fn typescript() -> Self {
        Self::with_language(Language::TypeScript)
    }

    fn with_language(language: Language) -> Self {
        let mut stages: Vec<Box<dyn ParseStrategy>> = Vec::new();
        #[cfg(feature = "tree-sitter")]
        stages.extend(grammar::strategies(language));
        stages.push(Box::new(BraceExtractor::javascript(language)));
        Self {
            language,
            chain: FallbackChain::new(language, stages),
        }
    }
}

impl LanguageAdapter for JavaScriptAdapter {
    fn language(&self) -> Language {
        self.language
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        match self.language {
            Language::TypeScript => &["ts", "tsx", "mts", "cts"],
            _ => &["js", "jsx", "mjs", "cjs"],
        }
    }

    fn chain(&self) -> &FallbackChain {
        &self.chain
    }
}

#[cfg(feature = "tree-sitter")]
mod grammar {
    use std::collections::BTreeSet;

    use tree_sitter::{Node, Tree};

    use crate::analysis::walker::{
        collapse, field_text, has_token, node_text, parameters, return_type, FactWalker,
        GrammarStrategy, TokenText, Vocabulary,
    };
    use crate::analysis::{
        module_id_name, Language, NodeKind, NodeTree, Parameter, ParseStrategy, SemanticNode,
        Signature, Span,
    };
    use crate::error::ParseError;

    const FUNCTION_KINDS: &[&str] = &[
        "function_declaration",
        "generator_function_declaration",
        "function_signature",
    ];

    const CLASS_KINDS: &[&str] = &[
        "class_declaration",
        "abstract_class_declaration",
        "interface_declaration",
        "enum_declaration",
        "type_alias_declaration",
    ];

    const FUNCTION_VALUE_KINDS: &[&str] = &[
        "arrow_function",
        "function_expression",
        "function",
        "generator_function",
    ];

    const METHOD_KINDS: &[&str] = &[
        "method_definition",
        "method_signature",
        "abstract_method_signature",
    ];

    const MEMBER_MODIFIERS: &[&str] = &["static", "readonly", "abstract", "override"];

    pub(super) static VOCAB: Vocabulary = Vocabulary {
        comments: &["comment", "hash_bang_line"],
        loops: &[
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
        ],
        conditionals: &["if_statement"],
        tries: &["try_statement"],
        contexts: &[],
        switches: &["switch_statement"],
        decisions: &[
            "if_statement",
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
            "catch_clause",
            "ternary_expression",
            "switch_case",
        ],
        catches: &["catch_clause"],
        caught_types,
        raises: &["throw_statement"],
        yields: &["yield_expression"],
        awaits: &["await_expression"],
        calls: &["call_expression", "new_expression"],
        comprehensions: &[],
        lambdas: &["arrow_function", "function_expression", "function"],
        globals: &[],
        nonlocals: &[],
        binary: &["binary_expression"],
        unary: &["unary_expression"],
        assignments: &["assignment_expression", "variable_declarator"],
        augmented: &["augmented_assignment_expression", "update_expression"],
        strings: &["string", "template_string"],
        numbers: &["number"],
        booleans: &["true", "false"],
        nones: &["null", "undefined"],
        attributes: &[("member_expression", "property")],
        subscripts: &["subscript_expression"],
        returns: &["return_statement"],
        scopes: &[
            "function_declaration",
            "generator_function_declaration",
            "function_expression",
            "function",
            "generator_function",
            "arrow_function",
            "method_definition",
            "class_declaration",
            "class",
        ],
    };

    pub(super) fn strategies(language: Language) -> Vec<Box<dyn ParseStrategy>> {
        let (strict_name, strict): (&'static str, tree_sitter::Language) = match language {
            Language::TypeScript => (
                "typescript-strict",
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            ),
            _ => ("javascript-strict", tree_sitter_javascript::LANGUAGE.into()),
        };
        let tolerant: tree_sitter::Language = tree_sitter_typescript::LANGUAGE_TSX.into();
        vec![
            Box::new(GrammarStrategy::strict(strict_name, language, strict, build)),
            Box::new(GrammarStrategy::tolerant(
                "tsx-tolerant",
                language,
                tolerant,
                build,
            )),
        ]
    }

    /// JavaScript catches are untyped; a TS annotation on the binding is used
    /// when present.
    fn caught_types(clause: Node, src: &[u8]) -> Vec<String> {
        field_text(clause, "type", src)
            .map(|t| vec![t.trim_start_matches(':').trim().to_string()])
            .unwrap_or_default()
    }

    fn string_value(node: Node, src: &[u8]) -> String {
        node_text(node, src)
            .trim()
            .trim_matches(|c| c == '\'' || c == '"' || c == '`')
            .to_string()
    }

    /// `require('x')` -> `x`
    fn required_module(value: Node, src: &[u8]) -> Option<String> {
        if value.kind() != "call_expression" {
            return None;
        }
        let callee = value.child_by_field_name("function")?;
        if node_text(callee, src) != "require" {
            return None;
        }
        let args = value.child_by_field_name("arguments")?;
        let first = args.named_child(0)?;
        if first.kind() != "string" {
            return None;
        }
        Some(string_value(first, src))
    }

    fn member_modifiers(node: Node, src: &[u8]) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = MEMBER_MODIFIERS
            .iter()
            .filter(|m| has_token(node, m))
            .map(|m| m.to_string())
            .collect();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "accessibility_modifier" {
                out.insert(node_text(child, src).trim().to_string());
            }
        }
        out
    }

    fn decorator_nodes<'t>(node: Node<'t>) -> Vec<Node<'t>> {
        let mut cursor = node.walk();
        let found = node
            .children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .collect();
        found
    }

    fn decorator_text(node: Node, src: &[u8]) -> String {
        collapse(node_text(node, src).trim_start_matches('@'))
    }

    fn signature(def: Node, src: &[u8]) -> Signature {
        let params = match def.child_by_field_name("parameters") {
            Some(list) => parameters(list, src, &VOCAB),
            // `x => x + 1`
            None => def
                .child_by_field_name("parameter")
                .map(|p| vec![Parameter::named(node_text(p, src).trim())])
                .unwrap_or_default(),
        };
        Signature {
            params,
            return_type: return_type(def, src),
            is_async: has_token(def, "async"),
        }
    }

    fn body_facts(def: Node, src: &[u8]) -> crate::analysis::BodyFacts {
        let mut walker = FactWalker::new(src, &VOCAB);
        if let Some(body) = def.child_by_field_name("body") {
            walker.visit(body);
        }
        walker.finish()
    }

    /// Names bound by `this.<name> = ...` under `node`.
    fn this_attributes(node: Node, src: &[u8], out: &mut BTreeSet<String>) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if node.kind() == "assignment_expression" {
                if let Some(left) = node.child_by_field_name("left") {
                    if left.kind() == "member_expression"
                        && field_text(left, "object", src).as_deref() == Some("this")
                    {
                        if let Some(prop) = field_text(left, "property", src) {
                            out.insert(prop);
                        }
                    }
                }
            }
            let mut cursor = node.walk();
            stack.extend(node.named_children(&mut cursor).filter(|c| {
                !matches!(
                    c.kind(),
                    "function_expression" | "function" | "class" | "function_declaration"
                )
            }));
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
                self.declaration(child, child, BTreeSet::new());
            }
        }

        fn declaration(&mut self, child: Node, outer: Node, modifiers: BTreeSet<String>) {
            let kind = child.kind();
            match kind {
                "comment" | "hash_bang_line" => {}
                k if FUNCTION_KINDS.contains(&k) => {
                    let name = field_text(child, "name", self.src)
                        .unwrap_or_else(|| "default".to_string());
                    self.add_function(child, outer, name, modifiers);
                }
                k if CLASS_KINDS.contains(&k) => self.add_class(child, outer, None, modifiers),
                "lexical_declaration" | "variable_declaration" => {
                    self.add_declarators(child, outer, modifiers)
                }
                "import_statement" => {
                    if let Some(source) = child.child_by_field_name("source") {
                        self.out.imports.insert(string_value(source, self.src));
                    }
                }
                "export_statement" => self.add_export(child),
                "expression_statement" => {
                    let required = child
                        .named_child(0)
                        .and_then(|e| required_module(e, self.src));
                    match required {
                        Some(module) => {
                            self.out.imports.insert(module);
                        }
                        None => self.module_statement(outer),
                    }
                }
                "ERROR" => self.visit_top_level(child),
                _ => self.module_statement(outer),
            }
        }

        fn add_export(&mut self, export: Node) {
            if let Some(source) = export.child_by_field_name("source") {
                self.out.imports.insert(string_value(source, self.src));
            }
            let mut modifiers = BTreeSet::new();
            modifiers.insert("export".to_string());
            if has_token(export, "default") {
                modifiers.insert("default".to_string());
            }
            match export.child_by_field_name("declaration") {
                Some(decl) => self.declaration(decl, export, modifiers),
                None => {
                    if export.child_by_field_name("source").is_none() {
                        self.module_statement(export);
                    }
                }
            }
        }

        fn module_statement(&mut self, stmt: Node) {
            self.text.push_node(stmt, self.src, &VOCAB);
            self.facts.visit(stmt);
        }

        fn add_function(&mut self, def: Node, outer: Node, name: String, modifiers: BTreeSet<String>) {
            let src = self.src;
            let mut node = SemanticNode::new(NodeKind::Function, name.clone(), name);
            node.span = Span::from_node(outer);
            let mut text = TokenText::new();
            text.push_node(outer, src, &VOCAB);
            let (canonical, shape) = text.finish();
            node.canonical_text = canonical;
            node.shape_text = shape;
            node.signature = Some(signature(def, src));
            node.modifiers = modifiers;
            node.decorators = decorator_nodes(outer)
                .into_iter()
                .map(|d| decorator_text(d, src))
                .collect();
            node.facts = body_facts(def, src);
            self.out.insert(node);
        }

        fn add_declarators(&mut self, decl: Node, outer: Node, modifiers: BTreeSet<String>) {
            let src = self.src;
            let mut cursor = decl.walk();
            let declarators: Vec<Node> = decl
                .named_children(&mut cursor)
                .filter(|d| d.kind() == "variable_declarator")
                .collect();
            let single = declarators.len() == 1;
            let mut consumed = true;

            for declarator in declarators {
                let name = field_text(declarator, "name", src).unwrap_or_default();
                let Some(value) = declarator.child_by_field_name("value") else {
                    consumed = false;
                    continue;
                };
                let span_node = if single { outer } else { declarator };
                if FUNCTION_VALUE_KINDS.contains(&value.kind()) && !name.is_empty() {
                    self.add_function(value, span_node, name, modifiers.clone());
                } else if value.kind() == "class" && !name.is_empty() {
                    self.add_class(value, span_node, Some(name), modifiers.clone());
                } else if let Some(module) = required_module(value, src) {
                    self.out.imports.insert(module);
                } else {
                    consumed = false;
                }
            }
            if !consumed {
                self.module_statement(outer);
            }
        }

        fn add_class(
            &mut self,
            def: Node,
            outer: Node,
            name: Option<String>,
            modifiers: BTreeSet<String>,
        ) {
            let src = self.src;
            let name = name
                .or_else(|| field_text(def, "name", src))
                .unwrap_or_else(|| "default".to_string());
            let mut node = SemanticNode::new(NodeKind::Class, name.clone(), name.clone());
            node.span = Span::from_node(outer);
            node.modifiers = modifiers;
            if def.kind() == "abstract_class_declaration" {
                node.modifiers.insert("abstract".to_string());
            }

            let mut decorators = decorator_nodes(outer);
            if outer.id() != def.id() {
                decorators.extend(decorator_nodes(def));
            }
            node.decorators = decorators.iter().map(|d| decorator_text(*d, src)).collect();

            let mut cursor = def.walk();
            for child in def.children(&mut cursor) {
                match child.kind() {
                    "class_heritage" | "extends_type_clause" => {
                        node.bases.extend(heritage_names(child, src));
                    }
                    _ => {}
                }
            }

            let mut text = TokenText::new();
            for decorator in &decorators {
                text.push_node(*decorator, src, &VOCAB);
            }
            let body = def.child_by_field_name("body");
            let mut cursor = def.walk();
            for child in def.children(&mut cursor) {
                if Some(child.id()) != body.map(|b| b.id()) && child.kind() != "decorator" {
                    text.push_node(child, src, &VOCAB);
                }
            }

            let mut facts = FactWalker::new(src, &VOCAB);
            let mut methods: Vec<(Node, Vec<Node>)> = Vec::new();
            if let Some(body) = body {
                let mut pending: Vec<Node> = Vec::new();
                let mut cursor = body.walk();
                for member in body.named_children(&mut cursor) {
                    match member.kind() {
                        "decorator" => pending.push(member),
                        "comment" => {}
                        k if METHOD_KINDS.contains(&k) => {
                            methods.push((member, std::mem::take(&mut pending)));
                        }
                        "field_definition" | "public_field_definition" | "property_signature" => {
                            let attr = field_text(member, "property", src)
                                .or_else(|| field_text(member, "name", src));
                            if let Some(attr) = attr {
                                node.attributes.insert(attr);
                            }
                            pending.clear();
                            text.push_node(member, src, &VOCAB);
                            facts.visit(member);
                        }
                        "property_identifier" => {
                            node.attributes.insert(node_text(member, src).to_string());
                            text.push_node(member, src, &VOCAB);
                        }
                        "enum_assignment" => {
                            if let Some(attr) = field_text(member, "name", src) {
                                node.attributes.insert(attr);
                            }
                            text.push_node(member, src, &VOCAB);
                        }
                        _ => {
                            pending.clear();
                            text.push_node(member, src, &VOCAB);
                            facts.visit(member);
                        }
                    }
                }
            }

            for (method, _) in &methods {
                if let Some(method_name) = field_text(*method, "name", src) {
                    node.members.insert(method_name);
                }
                if let Some(method_body) = method.child_by_field_name("body") {
                    this_attributes(method_body, src, &mut node.attributes);
                }
            }
            text.push_members(&node.members);

            let (canonical, shape) = text.finish();
            node.canonical_text = canonical;
            node.shape_text = shape;
            node.facts = facts.finish();
            let class_id = self.out.insert(node);

            for (method, pending) in methods {
                let member = method_node(method, &pending, &name, &class_id, src);
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

    fn method_node(
        method: Node,
        pending: &[Node],
        class_name: &str,
        class_id: &str,
        src: &[u8],
    ) -> SemanticNode {
        let name = field_text(method, "name", src).unwrap_or_else(|| "<computed>".to_string());
        let kind = if has_token(method, "get") || has_token(method, "set") {
            NodeKind::Property
        } else {
            NodeKind::Method
        };
        let mut node = SemanticNode::new(kind, name.clone(), format!("{}.{}", class_name, name));
        node.parent_id = Some(class_id.to_string());
        node.span = Span::from_node(method);

        let mut decorators: Vec<Node> = pending.to_vec();
        decorators.extend(decorator_nodes(method));
        let mut text = TokenText::new();
        for decorator in pending {
            text.push_node(*decorator, src, &VOCAB);
        }
        text.push_node(method, src, &VOCAB);
        let (canonical, shape) = text.finish();
        node.canonical_text = canonical;
        node.shape_text = shape;

        node.decorators = decorators.iter().map(|d| decorator_text(*d, src)).collect();
        node.modifiers = member_modifiers(method, src);
        node.signature = Some(signature(method, src));
        node.facts = body_facts(method, src);
        node
    }

    /// `extends A implements B, C` -> `[A, B, C]`
    fn heritage_names(heritage: Node, src: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = heritage.walk();
        for clause in heritage.named_children(&mut cursor) {
            match clause.kind() {
                "extends_clause" | "implements_clause" | "extends_type_clause" => {
                    let mut c = clause.walk();
                    for ty in clause.named_children(&mut c) {
                        if ty.kind() != "type_arguments" {
                            names.push(collapse(node_text(ty, src)));
                        }
                    }
                }
                "comment" | "type_arguments" => {}
                _ => names.push(collapse(node_text(clause, src))),
            }
        }
        names
    }
}
