//! Regex-based structural extractors.
//!
//! Third stage of every fallback chain. They recover declaration boundaries,
//! names, parameter lists and imports from text the grammars could not parse.
//! Body facts are left empty.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ParseError;

use super::{
    module_id_name, Language, NodeKind, NodeTree, ParamKind, Parameter, ParseStrategy,
    SemanticNode, Signature, Span, Strategy,
};

lazy_static! {
    static ref PY_DEF: Regex =
        Regex::new(r"^(async\s+)?def\s+(\w+)\s*\(([^)]*)\)?\s*(?:->\s*([^:]+))?").unwrap();
    static ref PY_CLASS: Regex = Regex::new(r"^class\s+(\w+)\s*(?:\(([^)]*)\))?").unwrap();
    static ref PY_DECORATOR: Regex = Regex::new(r"^@\s*([\w.]+)").unwrap();
    static ref PY_IMPORT: Regex = Regex::new(r"^import\s+([\w.]+(?:\s*,\s*[\w.]+)*)").unwrap();
    static ref PY_FROM: Regex = Regex::new(r"^from\s+([\w.]+)\s+import\b").unwrap();
    static ref PY_CLASS_ATTR: Regex = Regex::new(r"^(\w+)\s*(?::[^=]+)?=[^=]").unwrap();
    static ref PY_SELF_ATTR: Regex = Regex::new(r"self\.(\w+)\s*(?:[-+*/|&]?=)[^=]").unwrap();

    static ref BRACE_CLASS: Regex = Regex::new(
        r"^(?:export\s+)?(?:default\s+)?((?:(?:abstract|final|readonly)\s+)*)(?:class|interface|trait|enum)\s+(\w+)([^{]*)"
    )
    .unwrap();
    static ref BRACE_FUNCTION: Regex = Regex::new(
        r"^(export\s+)?(?:default\s+)?(async\s+)?function\b\s*\*?\s*&?\s*(\w+)\s*\(([^)]*)\)?\s*(?::\s*([^{;]+))?"
    )
    .unwrap();
    static ref BRACE_ARROW: Regex = Regex::new(
        r"^(export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(async\s+)?(?:function\b\s*\*?\s*\w*\s*\(([^)]*)\)|\(([^)]*)\)\s*=>|(\w+)\s*=>)"
    )
    .unwrap();
    static ref JS_METHOD: Regex = Regex::new(
        r"^((?:(?:static|async|public|private|protected|readonly|abstract|override|get|set)\s+)*)\*?\s*(#?\w+)\s*\(([^)]*)\)?\s*(?::\s*([^{;]+))?"
    )
    .unwrap();
    static ref PHP_METHOD: Regex = Regex::new(
        r"^((?:(?:public|private|protected|static|abstract|final)\s+)*)function\s+&?\s*(\w+)\s*\(([^)]*)\)?\s*(?::\s*([^{;]+))?"
    )
    .unwrap();
    static ref JS_FIELD: Regex =
        Regex::new(r"^(?:(?:static|public|private|protected|readonly)\s+)*(#?\w+)\s*[?!]?\s*(?::[^=;]+)?(?:=|;)").unwrap();
    static ref PHP_PROPERTY: Regex =
        Regex::new(r"^(?:(?:public|private|protected|static|readonly|var)\s+)+(?:\??[\w\\]+\s+)?\$(\w+)").unwrap();
    static ref PHP_CONST: Regex = Regex::new(r"^(?:(?:public|private|protected|final)\s+)*const\s+(\w+)").unwrap();
    static ref JS_IMPORT: Regex =
        Regex::new(r#"^import\s+(?:[^'"]*?\s+from\s+)?['"]([^'"]+)['"]"#).unwrap();
    static ref JS_REQUIRE: Regex = Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap();
    static ref PHP_USE: Regex = Regex::new(r"^use\s+(?:function\s+|const\s+)?([\w\\]+)").unwrap();
    static ref PHP_INCLUDE: Regex =
        Regex::new(r#"^(?:require|include)(?:_once)?\s*\(?\s*['"]([^'"]+)['"]"#).unwrap();

    static ref STRING_LITERAL: Regex =
        Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`(?:[^`\\]|\\.)*`"#).unwrap();
    static ref NUMBER_LITERAL: Regex = Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap();
}

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "do", "else", "try", "new",
    "typeof", "await", "super",
];

/// Normalize one source line: comment lines dropped, whitespace collapsed.
fn canonical_line(line: &str, hash_comments: bool) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with("*")
        || (hash_comments && trimmed.starts_with('#') && !trimmed.starts_with("#["))
    {
        return None;
    }
    Some(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn shape_of(canonical: &str) -> String {
    let masked = STRING_LITERAL.replace_all(canonical, "<str>");
    NUMBER_LITERAL.replace_all(&masked, "<num>").into_owned()
}

fn set_text(node: &mut SemanticNode, lines: &[String]) {
    node.canonical_text = lines.join(" ");
    node.shape_text = shape_of(&node.canonical_text);
}

/// Split a parameter list on top-level commas.
fn split_params(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth <= 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Parse a single parameter, e.g. `b: int = 1`, `int $x = 2`, `...rest`.
fn parse_param(part: &str) -> Parameter {
    if part == "*" || part == "/" {
        return Parameter {
            name: part.to_string(),
            default: None,
            annotation: None,
            kind: ParamKind::Separator,
        };
    }
    let (head, default) = match part.split_once('=') {
        Some((h, d)) => (h.trim(), Some(d.trim().to_string())),
        None => (part.trim(), None),
    };
    let (raw_name, annotation) = if let Some((n, t)) = head.split_once(':') {
        (n.trim(), Some(t.trim().to_string()))
    } else if let Some((t, n)) = head.rsplit_once(char::is_whitespace) {
        (n.trim(), Some(t.trim().to_string()))
    } else {
        (head, None)
    };
    let kind = if raw_name.starts_with("**") {
        ParamKind::VariadicKeyword
    } else if raw_name.starts_with('*') || raw_name.starts_with("...") {
        ParamKind::Variadic
    } else {
        ParamKind::Regular
    };
    let name = raw_name
        .trim_start_matches('*')
        .trim_start_matches("...")
        .trim_end_matches('?')
        .to_string();
    Parameter {
        name,
        default,
        annotation: annotation.filter(|a| !a.is_empty()),
        kind,
    }
}

fn signature(params: Option<&str>, return_type: Option<&str>, is_async: bool) -> Signature {
    Signature {
        params: params
            .map(|p| split_params(p).iter().map(|s| parse_param(s)).collect())
            .unwrap_or_default(),
        return_type: return_type
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
        is_async,
    }
}

fn line_offsets(source: &str) -> Vec<(usize, &str)> {
    let mut offset = 0;
    source
        .split_inclusive('\n')
        .map(|line| {
            let start = offset;
            offset += line.len();
            (start, line.trim_end_matches(['\n', '\r']))
        })
        .collect()
}

/// Indentation-based extractor for Python.
pub struct IndentExtractor;

impl IndentExtractor {
    pub fn python() -> Self {
        IndentExtractor
    }
}

struct PyDecl {
    node: SemanticNode,
    lines: Vec<String>,
    is_class: bool,
}

struct OpenBlock {
    indent: usize,
    /// Declaration that owns lines inside this block.
    owner: usize,
}

impl ParseStrategy for IndentExtractor {
    fn name(&self) -> &'static str {
        "python-regex"
    }

    fn strategy(&self) -> Strategy {
        Strategy::Regex
    }

    fn parse(&self, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        let mut decls: Vec<PyDecl> = Vec::new();
        let mut stack: Vec<OpenBlock> = Vec::new();
        let mut module_lines = Vec::new();
        let mut imports = BTreeSet::new();
        let mut pending_decorators: Vec<String> = Vec::new();
        let mut pending_lines: Vec<String> = Vec::new();

        for (lineno, (offset, line)) in line_offsets(source).into_iter().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let indent = line.len() - trimmed.len();
            while stack.last().map(|b| indent <= b.indent).unwrap_or(false) {
                stack.pop();
            }
            let canonical = canonical_line(trimmed, true).unwrap_or_default();

            if let Some(caps) = PY_DECORATOR.captures(trimmed) {
                pending_decorators.push(caps[1].to_string());
                pending_lines.push(canonical);
                continue;
            }

            let def = PY_DEF.captures(trimmed);
            let class = if def.is_none() {
                PY_CLASS.captures(trimmed)
            } else {
                None
            };

            let is_class = class.is_some();
            if def.is_some() || is_class {
                let owner = stack.last().map(|b| b.owner);
                let owner_is_class = owner.map(|i| decls[i].is_class).unwrap_or(false);
                let nested = owner.is_some() && (!owner_is_class || is_class);
                if nested {
                    // nested definitions stay part of their owner's text
                    let owner = owner.unwrap_or_default();
                    decls[owner].lines.append(&mut pending_lines);
                    decls[owner].lines.push(canonical);
                    pending_decorators.clear();
                    stack.push(OpenBlock { indent, owner });
                    continue;
                }

                let mut node = if let Some(caps) = def {
                    let name = caps[2].to_string();
                    let sig = signature(
                        caps.get(3).map(|m| m.as_str()),
                        caps.get(4).map(|m| m.as_str()),
                        caps.get(1).is_some(),
                    );
                    let mut node = match owner {
                        Some(class_idx) => {
                            let class_name = decls[class_idx].node.name.clone();
                            let is_prop = pending_decorators.iter().any(|d| {
                                d == "property" || d.ends_with(".setter") || d.ends_with("cached_property")
                            });
                            let kind = if is_prop {
                                NodeKind::Property
                            } else {
                                NodeKind::Method
                            };
                            decls[class_idx].node.members.insert(name.clone());
                            let mut n =
                                SemanticNode::new(kind, name.clone(), format!("{}.{}", class_name, name));
                            n.parent_id = Some(decls[class_idx].node.id.clone());
                            n
                        }
                        None => SemanticNode::new(NodeKind::Function, name.clone(), name),
                    };
                    node.signature = Some(sig);
                    node
                } else if let Some(caps) = class {
                    let name = caps[1].to_string();
                    let mut node = SemanticNode::new(NodeKind::Class, name.clone(), name);
                    node.bases = caps
                        .get(2)
                        .map(|b| split_params(b.as_str()))
                        .unwrap_or_default();
                    node
                } else {
                    continue;
                };

                node.decorators = std::mem::take(&mut pending_decorators);
                node.span = Span::from_lines(offset, offset + line.len(), lineno + 1, lineno + 1);
                let mut lines = std::mem::take(&mut pending_lines);
                lines.push(canonical);
                decls.push(PyDecl {
                    node,
                    lines,
                    is_class,
                });
                stack.push(OpenBlock {
                    indent,
                    owner: decls.len() - 1,
                });
                continue;
            }

            pending_decorators.clear();
            let mut stray = std::mem::take(&mut pending_lines);
            match stack.last().map(|b| b.owner) {
                Some(owner) => {
                    let decl = &mut decls[owner];
                    if decl.is_class {
                        if let Some(caps) = PY_CLASS_ATTR.captures(trimmed) {
                            decl.node.attributes.insert(caps[1].to_string());
                        }
                    } else if let Some(parent) = decl.node.parent_id.clone() {
                        if let Some(caps) = PY_SELF_ATTR.captures(trimmed) {
                            let attr = caps[1].to_string();
                            if let Some(class) = decls.iter_mut().find(|d| d.node.id == parent) {
                                class.node.attributes.insert(attr);
                            }
                        }
                    }
                    let decl = &mut decls[owner];
                    decl.lines.append(&mut stray);
                    decl.lines.push(canonical);
                    decl.node.span.end_line = lineno + 1;
                    decl.node.span.end_byte = offset + line.len();
                }
                None => {
                    if indent == 0 {
                        if let Some(caps) = PY_IMPORT.captures(trimmed) {
                            for module in caps[1].split(',') {
                                imports.insert(module.trim().to_string());
                            }
                            continue;
                        }
                        if let Some(caps) = PY_FROM.captures(trimmed) {
                            imports.insert(caps[1].to_string());
                            continue;
                        }
                    }
                    module_lines.append(&mut stray);
                    module_lines.push(canonical);
                }
            }
        }

        if decls.is_empty() && imports.is_empty() && !source.trim().is_empty() {
            return Err(ParseError::NothingExtracted {
                strategy: "python-regex",
            });
        }

        let mut tree = NodeTree::new(path, Language::Python, Strategy::Regex, source.len());
        tree.imports = imports;
        for mut decl in decls {
            if decl.is_class {
                decl.lines.push("members:".to_string());
                decl.lines.extend(decl.node.members.iter().cloned());
            }
            set_text(&mut decl.node, &decl.lines);
            tree.insert(decl.node);
        }
        let stem = module_id_name(path);
        let mut module = SemanticNode::new(NodeKind::Module, stem.clone(), stem);
        set_text(&mut module, &module_lines);
        tree.insert(module);
        Ok(tree)
    }
}

/// Brace-matching extractor for PHP and JS/TS.
pub struct BraceExtractor {
    name: &'static str,
    language: Language,
}

impl BraceExtractor {
    pub fn php() -> Self {
        Self {
            name: "php-regex",
            language: Language::Php,
        }
    }

    pub fn javascript(language: Language) -> Self {
        Self {
            name: "js-regex",
            language,
        }
    }

    fn is_php(&self) -> bool {
        self.language == Language::Php
    }

    fn member_regex(&self) -> &'static Regex {
        if self.is_php() {
            &*PHP_METHOD
        } else {
            &*JS_METHOD
        }
    }
}

/// Scans source text tracking brace depth outside strings and comments.
struct BraceScanner<'a> {
    bytes: &'a [u8],
    hash_comments: bool,
}

impl<'a> BraceScanner<'a> {
    /// Brace depth at the start of every byte offset, one entry per line start.
    fn line_depths(&self, starts: &[usize]) -> Vec<i32> {
        let mut depths = Vec::with_capacity(starts.len());
        let mut depth = 0i32;
        let mut next = 0;
        self.scan(0, |pos, c| {
            while next < starts.len() && starts[next] <= pos {
                depths.push(depth);
                next += 1;
            }
            match c {
                b'{' => depth += 1,
                b'}' => depth -= 1,
                _ => {}
            }
            true
        });
        while depths.len() < starts.len() {
            depths.push(depth);
        }
        depths
    }

    /// Offset one past the `}` matching the first body `{` after `from`.
    /// `None` when a `;` ends the declaration first (no body).
    fn body_end(&self, from: usize) -> Option<usize> {
        let mut parens = 0i32;
        let mut depth = 0i32;
        let mut end = None;
        self.scan(from, |pos, c| {
            match c {
                b'(' => parens += 1,
                b')' => parens -= 1,
                b';' if depth == 0 && parens <= 0 => return false,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(pos + 1);
                        return false;
                    }
                }
                _ => {}
            }
            true
        });
        end
    }

    /// Visit code bytes (strings and comments skipped) until `f` returns false.
    fn scan(&self, from: usize, mut f: impl FnMut(usize, u8) -> bool) {
        let b = self.bytes;
        let mut i = from;
        while i < b.len() {
            let c = b[i];
            match c {
                b'"' | b'\'' | b'`' => {
                    i += 1;
                    while i < b.len() && b[i] != c {
                        if b[i] == b'\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                }
                b'/' if b.get(i + 1) == Some(&b'/') => {
                    while i < b.len() && b[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                }
                b'#' if self.hash_comments && b.get(i + 1) != Some(&b'[') => {
                    while i < b.len() && b[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                }
                b'/' if b.get(i + 1) == Some(&b'*') => {
                    i += 2;
                    while i + 1 < b.len() && !(b[i] == b'*' && b[i + 1] == b'/') {
                        i += 1;
                    }
                    i += 1;
                }
                _ => {
                    if !f(i, c) {
                        return;
                    }
                }
            }
            i += 1;
        }
    }
}

impl ParseStrategy for BraceExtractor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn strategy(&self) -> Strategy {
        Strategy::Regex
    }

    fn parse(&self, path: &str, source: &str) -> Result<NodeTree, ParseError> {
        let php = self.is_php();
        let lines = line_offsets(source);
        let starts: Vec<usize> = lines.iter().map(|(o, _)| *o).collect();
        let scanner = BraceScanner {
            bytes: source.as_bytes(),
            hash_comments: php,
        };
        let depths = scanner.line_depths(&starts);

        let mut tree = NodeTree::new(path, self.language, Strategy::Regex, source.len());
        let mut module_lines = Vec::new();
        // (end offset) of the declaration currently swallowing lines
        let mut covered_until = 0usize;
        let mut class_ctx: Option<(String, String, usize)> = None;
        let mut class_node: Option<(SemanticNode, Vec<String>)> = None;
        let mut pending: Vec<(SemanticNode, usize, usize)> = Vec::new();

        let flush_class = |class_node: &mut Option<(SemanticNode, Vec<String>)>,
                           tree: &mut NodeTree,
                           pending: &mut Vec<(SemanticNode, usize, usize)>| {
            if let Some((mut node, mut text)) = class_node.take() {
                text.push("members:".to_string());
                text.extend(node.members.iter().cloned());
                set_text(&mut node, &text);
                tree.insert(node);
            }
            for (mut member, start, end) in pending.drain(..) {
                let body = collect_lines(source, start, end, php);
                set_text(&mut member, &body);
                tree.insert(member);
            }
        };

        for (idx, (offset, line)) in lines.iter().enumerate() {
            let offset = *offset;
            let depth = depths[idx];
            let trimmed = line.trim();

            if let Some((_, _, class_end)) = class_ctx.as_ref() {
                if offset >= *class_end {
                    class_ctx = None;
                    flush_class(&mut class_node, &mut tree, &mut pending);
                }
            }

            if let Some((class_name, class_id, _)) = class_ctx.clone() {
                if offset < covered_until || depth != 1 {
                    continue;
                }
                let Some(canonical) = canonical_line(trimmed, php) else {
                    continue;
                };
                if trimmed.starts_with('}') {
                    if let Some((_, text)) = class_node.as_mut() {
                        text.push(canonical);
                    }
                    continue;
                }
                if let Some(caps) = self.member_regex().captures(trimmed) {
                    let name = caps[2].to_string();
                    if !CONTROL_KEYWORDS.contains(&name.as_str()) && (php || trimmed.contains('(')) {
                        let modifiers: BTreeSet<String> = caps[1]
                            .split_whitespace()
                            .map(|m| m.to_string())
                            .collect();
                        let is_accessor = modifiers.contains("get") || modifiers.contains("set");
                        let kind = if is_accessor {
                            NodeKind::Property
                        } else {
                            NodeKind::Method
                        };
                        let mut member =
                            SemanticNode::new(kind, name.clone(), format!("{}.{}", class_name, name));
                        member.parent_id = Some(class_id.clone());
                        member.signature = Some(signature(
                            caps.get(3).map(|m| m.as_str()),
                            caps.get(4).map(|m| m.as_str()),
                            modifiers.contains("async"),
                        ));
                        member.modifiers = modifiers
                            .into_iter()
                            .filter(|m| !matches!(m.as_str(), "async" | "get" | "set"))
                            .collect();
                        let end = scanner
                            .body_end(offset)
                            .unwrap_or(offset + line.len());
                        member.span = span_for(source, offset, end);
                        covered_until = end;
                        if let Some((class, _)) = class_node.as_mut() {
                            class.members.insert(name);
                        }
                        pending.push((member, offset, end));
                        continue;
                    }
                }
                if let Some((class, text)) = class_node.as_mut() {
                    let field = if php {
                        PHP_PROPERTY
                            .captures(trimmed)
                            .or_else(|| PHP_CONST.captures(trimmed))
                    } else {
                        JS_FIELD.captures(trimmed)
                    };
                    if let Some(caps) = field {
                        class.attributes.insert(caps[1].to_string());
                    } else if php && trimmed.starts_with("use ") {
                        class.bases.push(trimmed.trim_end_matches(';').to_string());
                    }
                    text.push(canonical);
                }
                continue;
            }

            if offset < covered_until || depth != 0 {
                continue;
            }

            if let Some(caps) = BRACE_CLASS.captures(trimmed) {
                let name = caps[2].to_string();
                let mut node = SemanticNode::new(NodeKind::Class, name.clone(), name.clone());
                node.modifiers = caps[1].split_whitespace().map(|m| m.to_string()).collect();
                node.bases = heritage(caps.get(3).map(|m| m.as_str()).unwrap_or(""));
                let end = scanner.body_end(offset).unwrap_or(offset + line.len());
                node.span = span_for(source, offset, end);
                let id = node.id.clone();
                let header = canonical_line(trimmed, php).unwrap_or_default();
                class_ctx = Some((name, id, end));
                class_node = Some((node, vec![header]));
                continue;
            }

            let function = BRACE_FUNCTION.captures(trimmed).map(|caps| {
                (
                    caps[3].to_string(),
                    caps.get(1).is_some(),
                    signature(
                        caps.get(4).map(|m| m.as_str()),
                        caps.get(5).map(|m| m.as_str()),
                        caps.get(2).is_some(),
                    ),
                )
            });
            let arrow = if php || function.is_some() {
                None
            } else {
                BRACE_ARROW.captures(trimmed).map(|caps| {
                    let params = caps
                        .get(4)
                        .or_else(|| caps.get(5))
                        .or_else(|| caps.get(6))
                        .map(|m| m.as_str());
                    (
                        caps[2].to_string(),
                        caps.get(1).is_some(),
                        signature(params, None, caps.get(3).is_some()),
                    )
                })
            };
            if let Some((name, exported, sig)) = function.or(arrow) {
                let mut node = SemanticNode::new(NodeKind::Function, name.clone(), name);
                node.signature = Some(sig);
                if exported {
                    node.modifiers.insert("export".to_string());
                }
                let end = scanner.body_end(offset).unwrap_or(offset + line.len());
                node.span = span_for(source, offset, end);
                let body = collect_lines(source, offset, end, php);
                set_text(&mut node, &body);
                covered_until = end;
                tree.insert(node);
                continue;
            }

            if let Some(import) = self.import_of(trimmed) {
                tree.imports.insert(import);
                continue;
            }
            if let Some(canonical) = canonical_line(trimmed, php) {
                if !matches!(canonical.as_str(), "<?php" | "?>" | "<?") {
                    module_lines.push(canonical);
                }
            }
        }
        flush_class(&mut class_node, &mut tree, &mut pending);

        if tree.nodes.is_empty() && tree.imports.is_empty() && !source.trim().is_empty() {
            return Err(ParseError::NothingExtracted {
                strategy: self.name,
            });
        }

        let stem = module_id_name(path);
        let mut module = SemanticNode::new(NodeKind::Module, stem.clone(), stem);
        set_text(&mut module, &module_lines);
        tree.insert(module);
        Ok(tree)
    }
}

impl BraceExtractor {
    fn import_of(&self, trimmed: &str) -> Option<String> {
        if self.is_php() {
            PHP_USE
                .captures(trimmed)
                .or_else(|| PHP_INCLUDE.captures(trimmed))
                .map(|c| c[1].to_string())
        } else {
            JS_IMPORT
                .captures(trimmed)
                .or_else(|| JS_REQUIRE.captures(trimmed))
                .map(|c| c[1].to_string())
        }
    }
}

/// `extends A implements B, C` -> `[A, B, C]`
fn heritage(clause: &str) -> Vec<String> {
    clause
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && !matches!(*s, "extends" | "implements"))
        .map(|s| s.to_string())
        .collect()
}

fn collect_lines(source: &str, start: usize, end: usize, hash_comments: bool) -> Vec<String> {
    let end = end.min(source.len());
    source
        .get(start..end)
        .unwrap_or("")
        .lines()
        .filter_map(|l| canonical_line(l, hash_comments))
        .collect()
}

fn span_for(source: &str, start: usize, end: usize) -> Span {
    let end = end.min(source.len());
    let line_at = |pos: usize| source[..pos].matches('\n').count() + 1;
    Span::from_lines(start, end, line_at(start), line_at(end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param_styles() {
        let p = parse_param("b: int = 1");
        assert_eq!(p.name, "b");
        assert_eq!(p.annotation.as_deref(), Some("int"));
        assert_eq!(p.default.as_deref(), Some("1"));

        let p = parse_param("int $x = 2");
        assert_eq!(p.name, "$x");
        assert_eq!(p.annotation.as_deref(), Some("int"));

        assert_eq!(parse_param("...rest").kind, ParamKind::Variadic);
        assert_eq!(parse_param("**kw").kind, ParamKind::VariadicKeyword);
        assert_eq!(parse_param("*").kind, ParamKind::Separator);
    }

    #[test]
    fn test_split_params_respects_nesting() {
        let parts = split_params("a, b: Dict[str, int] = {}, c=(1, 2)");
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_python_regex_extraction() {
        let source = r#"
import os, sys
from collections import deque

@decorate
def top(a, b=1):
    print "legacy", a
    return a

class Greeter(Base):
    greeting = "hi"

    def greet(self, name):
        self.last = name
        print self.greeting, name
"#;
        let tree = IndentExtractor::python().parse("greet.py", source).unwrap();
        assert_eq!(tree.strategy, Strategy::Regex);
        assert!(tree.imports.contains("os"));
        assert!(tree.imports.contains("sys"));
        assert!(tree.imports.contains("collections"));

        let top = tree.get("func:top").unwrap();
        assert_eq!(top.decorators, vec!["decorate"]);
        assert_eq!(top.signature.as_ref().unwrap().arity(), 2);

        let class = tree.get("class:Greeter").unwrap();
        assert_eq!(class.bases, vec!["Base"]);
        assert!(class.attributes.contains("greeting"));
        assert!(class.attributes.contains("last"));
        assert!(tree.get("class:Greeter.greet").is_some());
        assert!(tree.get("module:greet").is_some());
    }

    #[test]
    fn test_python_regex_rejects_prose() {
        let err = IndentExtractor::python()
            .parse("notes.py", "just some words\nwith no code\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::NothingExtracted { .. }));
    }

    #[test]
    fn test_brace_extraction_js() {
        let source = r#"
import React from 'react';
const fs = require('fs');

export async function load(path, opts = {}) {
    if (path) { return fs.readFileSync(path); }
}

const add = (a, b) => a + b;

class Store extends Base {
    count = 0;
    static create(name) {
        return new Store(name);
    }
    get size() { return this.count; }
}
"#;
        let tree = BraceExtractor::javascript(Language::JavaScript)
            .parse("store.js", source)
            .unwrap();
        assert!(tree.imports.contains("react"));
        assert!(tree.imports.contains("fs"));
        let load = tree.get("func:load").unwrap();
        assert!(load.is_async());
        assert!(load.modifiers.contains("export"));
        assert!(tree.get("func:add").is_some());
        let store = tree.get("class:Store").unwrap();
        assert_eq!(store.bases, vec!["Base"]);
        assert!(store.attributes.contains("count"));
        let create = tree.get("class:Store.create").unwrap();
        assert!(create.modifiers.contains("static"));
        assert_eq!(tree.get("class:Store.size").unwrap().kind, NodeKind::Property);
    }

    #[test]
    fn test_brace_extraction_php() {
        let source = r#"<?php
use App\Models\User;
require_once 'config.php';

function helper($a, int $b = 2) {
    return $a + $b;
}

class UserService extends BaseService implements Loggable {
    private $repo;
    const LIMIT = 10;

    public static function find(int $id): ?User {
        return $this->repo->find($id);
    }
}
"#;
        let tree = BraceExtractor::php().parse("service.php", source).unwrap();
        assert!(tree.imports.contains("App\\Models\\User"));
        assert!(tree.imports.contains("config.php"));
        assert_eq!(tree.get("func:helper").unwrap().signature.as_ref().unwrap().arity(), 2);
        let class = tree.get("class:UserService").unwrap();
        assert_eq!(class.bases, vec!["BaseService", "Loggable"]);
        assert!(class.attributes.contains("repo"));
        assert!(class.attributes.contains("LIMIT"));
        let find = tree.get("class:UserService.find").unwrap();
        assert!(find.modifiers.contains("public"));
        assert!(find.modifiers.contains("static"));
        assert_eq!(
            find.signature.as_ref().unwrap().return_type.as_deref(),
            Some("?User")
        );
    }
}
