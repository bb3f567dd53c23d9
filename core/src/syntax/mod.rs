//! Parser adapter.
//!
//! Every supported language is parsed once and lowered into the closed node
//! model below. Downstream checks match on these variants instead of probing
//! parser-specific node kinds, so an unknown construct shows up as
//! [`Node::Unsupported`] rather than as a failed lookup in the middle of a
//! check.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::finding::Language;

mod ecmascript;
mod python;
mod rust;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("grammar for {0} could not be loaded: {1}")]
    Grammar(Language, String),
    #[error("parser produced no tree")]
    NoTree,
    #[error("syntax error: {0}")]
    Syntax(String),
}

/// Parse `text` and lower it. `extension` picks grammar variants (TSX).
pub fn parse(language: Language, extension: &str, text: &str) -> Result<SyntaxTree, ParseError> {
    match language {
        Language::TypeScript | Language::JavaScript => ecmascript::lower(language, extension, text),
        Language::Python => python::lower(text),
        Language::Rust => rust::lower(text),
    }
}

/// Lowered view of one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyntaxTree {
    pub nodes: Vec<Node>,
    pub closed_types: Vec<ClosedType>,
    pub contracts: Vec<Interface>,
    pub exports: Vec<ExportedSymbol>,
    /// File carries its own unit tests (Rust `#[cfg(test)]` items).
    pub has_inline_tests: bool,
    /// Identifiers mentioned inside those inline test items.
    pub inline_test_refs: BTreeSet<String>,
}

/// Enumeration or literal union declared in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedType {
    pub name: String,
    /// Normalised values: `"a"` for string literals, `Color.Red` / `Color::Red` for members.
    pub values: Vec<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedSymbol {
    pub name: String,
    pub line: u32,
}

/// A declared contract (interface, abstract base, trait).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub line: u32,
    pub methods: Vec<MethodSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    pub arity: usize,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Function(Function),
    Class(Class),
    Block(Block),
    If(IfNode),
    Loop(LoopNode),
    Try(TryNode),
    Switch(SwitchNode),
    Return(ReturnNode),
    Throw(ThrowNode),
    Expr(ExprNode),
    Unsupported { kind: String, line: u32 },
}

impl Node {
    pub fn line(&self) -> u32 {
        match self {
            Node::Function(f) => f.line,
            Node::Class(c) => c.line,
            Node::Block(b) => b.line,
            Node::If(i) => i.line,
            Node::Loop(l) => l.line,
            Node::Try(t) => t.line,
            Node::Switch(s) => s.line,
            Node::Return(r) => r.line,
            Node::Throw(t) => t.line,
            Node::Expr(e) => e.line,
            Node::Unsupported { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub line: u32,
    pub statements: Vec<Node>,
}

impl Block {
    pub fn new(line: u32, statements: Vec<Node>) -> Self {
        Self { line, statements }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionForm {
    Declaration,
    Method,
    Arrow,
    Expression,
    Closure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    /// `None` for destructured parameters.
    pub name: Option<String>,
    pub type_text: Option<String>,
    /// Optional, defaulted or rest parameter.
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub line: u32,
    pub form: FunctionForm,
    pub params: Vec<Param>,
    pub return_type: Option<String>,
    pub body: Option<Block>,
    /// Arrow/closure whose body is a single expression.
    pub expression_body: bool,
    /// Declared abstract, overload or protocol member; the body is not an implementation.
    pub is_abstract: bool,
    pub decorators: Vec<String>,
    /// Every identifier mentioned anywhere in the body.
    pub references: BTreeSet<String>,
    pub exported: bool,
}

impl Function {
    pub fn is_constructor(&self) -> bool {
        matches!(self.name.as_str(), "constructor" | "__init__")
    }

    /// Return statements that belong to this function (not to nested ones).
    pub fn own_returns(&self) -> Vec<&ReturnNode> {
        let mut out = Vec::new();
        if let Some(body) = &self.body {
            collect_returns(&body.statements, &mut out);
        }
        out
    }

    pub fn has_empty_body(&self) -> bool {
        !self.expression_body && self.body.as_ref().map(Block::is_empty).unwrap_or(false)
    }
}

fn collect_returns<'a>(nodes: &'a [Node], out: &mut Vec<&'a ReturnNode>) {
    for node in nodes {
        match node {
            Node::Return(ret) => out.push(ret),
            Node::Block(block) => collect_returns(&block.statements, out),
            Node::If(if_node) => collect_if_returns(if_node, out),
            Node::Loop(lp) => collect_returns(&lp.body.statements, out),
            Node::Try(tr) => {
                collect_returns(&tr.body.statements, out);
                for handler in &tr.handlers {
                    collect_returns(&handler.body.statements, out);
                }
                if let Some(fin) = &tr.finalizer {
                    collect_returns(&fin.statements, out);
                }
            }
            Node::Switch(sw) => {
                for case in &sw.cases {
                    collect_returns(&case.body, out);
                }
            }
            Node::Function(_)
            | Node::Class(_)
            | Node::Throw(_)
            | Node::Expr(_)
            | Node::Unsupported { .. } => {}
        }
    }
}

fn collect_if_returns<'a>(if_node: &'a IfNode, out: &mut Vec<&'a ReturnNode>) {
    collect_returns(&if_node.consequence.statements, out);
    match if_node.alternative.as_deref() {
        Some(ElseBranch::ElseIf(inner)) => collect_if_returns(inner, out),
        Some(ElseBranch::Else(block)) => collect_returns(&block.statements, out),
        None => {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassKind {
    Class,
    /// Rust `impl` block.
    Impl,
    /// Rust trait carrying default method bodies.
    Trait,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    pub line: u32,
    pub kind: ClassKind,
    pub extends: Vec<String>,
    pub implements: Vec<String>,
    /// Member methods, always `Node::Function`.
    pub members: Vec<Node>,
    pub exported: bool,
}

impl Class {
    pub fn methods(&self) -> impl Iterator<Item = &Function> {
        self.members.iter().filter_map(|m| match m {
            Node::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn has_supertype(&self) -> bool {
        !self.extends.is_empty() || !self.implements.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfNode {
    pub line: u32,
    pub condition: String,
    pub consequence: Block,
    pub alternative: Option<Box<ElseBranch>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElseBranch {
    ElseIf(IfNode),
    Else(Block),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopNode {
    pub line: u32,
    pub header: String,
    pub body: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryNode {
    pub line: u32,
    pub body: Block,
    pub handlers: Vec<Handler>,
    pub finalizer: Option<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    pub line: u32,
    pub param: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchNode {
    pub line: u32,
    pub subject: String,
    pub cases: Vec<SwitchCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub line: u32,
    pub patterns: Vec<CasePattern>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CasePattern {
    /// Literal or enum member, normalised like [`ClosedType::values`].
    Value(String),
    /// Not resolvable to a literal; excluded from exhaustiveness reasoning.
    Dynamic(String),
    CatchAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnNode {
    pub line: u32,
    pub value: ReturnValue,
    pub nested: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnValue {
    Nothing,
    /// `null`, `undefined`, `None`.
    Absent(String),
    Bool(bool),
    Literal(String),
    Computed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrowNode {
    pub line: u32,
    pub text: String,
}

impl ThrowNode {
    pub fn signals_not_implemented(&self) -> bool {
        let text = self.text.to_lowercase();
        [
            "notimplemented",
            "not implemented",
            "not yet implemented",
            "not_implemented",
            "unimplemented",
            "todo",
        ]
        .iter()
        .any(|needle| text.contains(needle))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExprNode {
    pub line: u32,
    pub text: String,
    /// Callee text when the statement is a call (`console.error`, `print`).
    pub callee: Option<String>,
    /// Function-like nodes defined inside the expression (callbacks, closures).
    pub nested: Vec<Node>,
}

/// Enclosing constructs handed to [`walk`] callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub function: Option<&'a Function>,
    pub class: Option<&'a Class>,
}

impl Scope<'_> {
    pub fn describe(&self) -> String {
        match (self.class, self.function) {
            (Some(class), Some(function)) if function.form == FunctionForm::Method => {
                format!("`{}.{}`", class.name, function.name)
            }
            (_, Some(function)) => format!("`{}`", function.name),
            (Some(class), None) => format!("class `{}`", class.name),
            (None, None) => "module scope".into(),
        }
    }
}

/// Pre-order walk over every node, including nested functions and class members.
pub fn walk<'a, F>(nodes: &'a [Node], visit: &mut F)
where
    F: FnMut(&'a Node, Scope<'a>),
{
    for node in nodes {
        walk_node(node, Scope::default(), visit);
    }
}

fn walk_node<'a, F>(node: &'a Node, scope: Scope<'a>, visit: &mut F)
where
    F: FnMut(&'a Node, Scope<'a>),
{
    visit(node, scope);
    match node {
        Node::Function(function) => {
            let inner = Scope {
                function: Some(function),
                class: scope.class,
            };
            if let Some(body) = &function.body {
                walk_all(&body.statements, inner, visit);
            }
        }
        Node::Class(class) => {
            let inner = Scope {
                function: scope.function,
                class: Some(class),
            };
            walk_all(&class.members, inner, visit);
        }
        Node::Block(block) => walk_all(&block.statements, scope, visit),
        Node::If(if_node) => walk_if(if_node, scope, visit),
        Node::Loop(lp) => walk_all(&lp.body.statements, scope, visit),
        Node::Try(tr) => {
            walk_all(&tr.body.statements, scope, visit);
            for handler in &tr.handlers {
                walk_all(&handler.body.statements, scope, visit);
            }
            if let Some(fin) = &tr.finalizer {
                walk_all(&fin.statements, scope, visit);
            }
        }
        Node::Switch(sw) => {
            for case in &sw.cases {
                walk_all(&case.body, scope, visit);
            }
        }
        Node::Return(ret) => walk_all(&ret.nested, scope, visit),
        Node::Expr(expr) => walk_all(&expr.nested, scope, visit),
        Node::Throw(_) | Node::Unsupported { .. } => {}
    }
}

fn walk_all<'a, F>(nodes: &'a [Node], scope: Scope<'a>, visit: &mut F)
where
    F: FnMut(&'a Node, Scope<'a>),
{
    for node in nodes {
        walk_node(node, scope, visit);
    }
}

fn walk_if<'a, F>(if_node: &'a IfNode, scope: Scope<'a>, visit: &mut F)
where
    F: FnMut(&'a Node, Scope<'a>),
{
    walk_all(&if_node.consequence.statements, scope, visit);
    match if_node.alternative.as_deref() {
        Some(ElseBranch::ElseIf(inner)) => walk_if(inner, scope, visit),
        Some(ElseBranch::Else(block)) => walk_all(&block.statements, scope, visit),
        None => {}
    }
}

/// Normalise a literal token so that `'a'`, `"a"` compare equal.
pub fn normalize_literal(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        let first = bytes[0];
        let last = bytes[s.len() - 1];
        if (first == b'\'' || first == b'"' || first == b'`') && first == last {
            let inner = &s[1..s.len() - 1];
            if first == b'`' && inner.contains("${") {
                return None;
            }
            return Some(format!("\"{inner}\""));
        }
    }
    if matches!(s, "true" | "false" | "True" | "False" | "null" | "None") {
        return Some(s.to_string());
    }
    if !s.is_empty() && s.replace('_', "").parse::<f64>().is_ok() {
        return Some(s.to_string());
    }
    None
}

/// Parse a literal-union type: `'a' | 'b'` or `Literal["a", "b"]`.
pub fn parse_literal_union(text: &str) -> Option<Vec<String>> {
    let text = text.trim();
    let parts: Vec<&str> = if let Some(start) = text.find("Literal[") {
        let prefix = &text[..start];
        if !(prefix.is_empty() || prefix == "typing." || prefix == "typing_extensions.") {
            return None;
        }
        let inner = text[start + "Literal[".len()..].strip_suffix(']')?;
        inner.split(',').collect()
    } else if text.contains('|') {
        text.split('|').collect()
    } else {
        return None;
    };
    let mut values = Vec::new();
    for part in parts.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        values.push(normalize_literal(part)?);
    }
    if values.len() < 2 {
        return None;
    }
    Some(values)
}

/// `Color.Red` -> `Color`, `crate::Color::Red` -> `Color`.
pub fn member_owner(value: &str) -> Option<&str> {
    if value.starts_with('"') {
        return None;
    }
    let owner = if let Some(idx) = value.rfind("::") {
        &value[..idx]
    } else if let Some(idx) = value.rfind('.') {
        &value[..idx]
    } else {
        return None;
    };
    let last = owner
        .rsplit("::")
        .next()
        .and_then(|s| s.rsplit('.').next())
        .unwrap_or(owner);
    if last.is_empty() || !last.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(last)
}

/// Canonical `Owner.Member` / `Owner::Member` form with only the last owner segment.
pub fn canonical_member(value: &str) -> String {
    let Some(owner) = member_owner(value) else {
        return value.to_string();
    };
    if let Some(idx) = value.rfind("::") {
        format!("{owner}::{}", &value[idx + 2..])
    } else if let Some(idx) = value.rfind('.') {
        format!("{owner}.{}", &value[idx + 1..])
    } else {
        value.to_string()
    }
}

pub(crate) fn line_of(node: tree_sitter::Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

pub(crate) fn node_text<'s>(node: tree_sitter::Node<'_>, src: &'s str) -> &'s str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

/// Named children without comments.
pub(crate) fn named_children(node: tree_sitter::Node<'_>) -> Vec<tree_sitter::Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| !child.is_extra() && child.kind() != "comment")
        .collect()
}

pub(crate) fn has_child_kind(node: tree_sitter::Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| child.kind() == kind);
    found
}

/// Texts of every descendant whose kind is in `kinds`.
pub(crate) fn collect_identifiers(
    node: tree_sitter::Node<'_>,
    src: &str,
    kinds: &[&str],
) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if kinds.contains(&current.kind()) {
            out.insert(node_text(current, src).to_string());
        }
        stack.extend(named_children(current));
    }
    out
}

pub(crate) fn strip_parens(text: &str) -> String {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// First line of `text`, whitespace collapsed and capped for display.
pub(crate) fn snippet(text: &str) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    let first = first.trim_end_matches('{').trim_end_matches(':').trim();
    let collapsed: Vec<&str> = first.split_whitespace().collect();
    let joined = collapsed.join(" ");
    if joined.chars().count() > 80 {
        let cut: String = joined.chars().take(77).collect();
        format!("{cut}...")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_normalise_quotes() {
        assert_eq!(normalize_literal("'a'"), Some("\"a\"".into()));
        assert_eq!(normalize_literal("\"a\""), Some("\"a\"".into()));
        assert_eq!(normalize_literal("42"), Some("42".into()));
        assert_eq!(normalize_literal("`x${y}`"), None);
        assert_eq!(normalize_literal("someVar"), None);
    }

    #[test]
    fn literal_unions_from_both_syntaxes() {
        assert_eq!(
            parse_literal_union("'a' | \"b\" | 'c'"),
            Some(vec!["\"a\"".into(), "\"b\"".into(), "\"c\"".into()])
        );
        assert_eq!(
            parse_literal_union("| 1 | 2"),
            Some(vec!["1".into(), "2".into()])
        );
        assert_eq!(
            parse_literal_union("Literal[\"on\", 'off']"),
            Some(vec!["\"on\"".into(), "\"off\"".into()])
        );
        assert_eq!(parse_literal_union("string | null"), None);
        assert_eq!(parse_literal_union("'only'"), None);
    }

    #[test]
    fn member_owners() {
        assert_eq!(member_owner("Color.Red"), Some("Color"));
        assert_eq!(member_owner("crate::Color::Red"), Some("Color"));
        assert_eq!(member_owner("\"a.b\""), None);
        assert_eq!(member_owner("plain"), None);
        assert_eq!(canonical_member("models.Color.RED"), "Color.RED");
        assert_eq!(canonical_member("crate::Color::Red"), "Color::Red");
    }

    #[test]
    fn snippet_trims_block_openers() {
        assert_eq!(snippet("for (const x of xs) {\n  use(x);\n}"), "for (const x of xs)");
        assert_eq!(snippet("while  running:\n    pass"), "while running");
    }
}
