//! Python lowering (tree-sitter).

use tree_sitter::{Node as TsNode, Parser};

use super::{
    collect_identifiers, line_of, named_children, node_text, normalize_literal,
    parse_literal_union, snippet, Block, CasePattern, Class, ClassKind, ClosedType, ElseBranch,
    ExportedSymbol, ExprNode, Function, FunctionForm, Handler, IfNode, Interface, LoopNode,
    MethodSignature, Node, Param, ParseError, ReturnNode, ReturnValue, SwitchCase, SwitchNode,
    SyntaxTree, ThrowNode, TryNode,
};
use crate::finding::Language;

const ENUM_BASES: &[&str] = &["Enum", "IntEnum", "StrEnum", "Flag", "IntFlag"];

pub(super) fn lower(text: &str) -> Result<SyntaxTree, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|err| ParseError::Grammar(Language::Python, err.to_string()))?;
    let tree = parser.parse(text, None).ok_or(ParseError::NoTree)?;

    let mut lowering = Lowering {
        src: text,
        tree: SyntaxTree::default(),
    };
    let nodes = lowering.module(tree.root_node());
    let mut out = lowering.tree;
    out.nodes = nodes;
    Ok(out)
}

/// `abc.ABC` -> `ABC`, `Generic[T]` -> `Generic`.
fn last_segment(text: &str) -> &str {
    let head = text.split('[').next().unwrap_or(text).trim();
    head.rsplit('.').next().unwrap_or(head)
}

/// Class-level facts that change how members are lowered.
#[derive(Default)]
struct ClassTraits {
    abstract_base: bool,
    protocol: bool,
    enumeration: bool,
}

struct Lowering<'s> {
    src: &'s str,
    tree: SyntaxTree,
}

impl<'s> Lowering<'s> {
    fn text(&self, node: TsNode<'_>) -> &'s str {
        node_text(node, self.src)
    }

    fn module(&mut self, root: TsNode<'_>) -> Vec<Node> {
        let mut out = Vec::new();
        for child in named_children(root) {
            let before = out.len();
            self.statement(child, &mut out);
            for node in &out[before..] {
                let public = match node {
                    Node::Function(f) => Some((f.name.clone(), f.line)),
                    Node::Class(c) => Some((c.name.clone(), c.line)),
                    _ => None,
                };
                if let Some((name, line)) = public.filter(|(name, _)| !name.starts_with('_')) {
                    self.tree.exports.push(ExportedSymbol { name, line });
                }
            }
        }
        for node in &mut out {
            match node {
                Node::Function(f) => f.exported = !f.name.starts_with('_'),
                Node::Class(c) => c.exported = !c.name.starts_with('_'),
                _ => {}
            }
        }
        out
    }

    fn statements(&mut self, parent: TsNode<'_>) -> Vec<Node> {
        let mut out = Vec::new();
        for child in named_children(parent) {
            self.statement(child, &mut out);
        }
        out
    }

    fn block(&mut self, node: Option<TsNode<'_>>, fallback_line: u32) -> Block {
        match node {
            Some(node) => {
                let statements = self.statements(node);
                Block::new(line_of(node), statements)
            }
            None => Block::new(fallback_line, Vec::new()),
        }
    }

    fn statement(&mut self, node: TsNode<'_>, out: &mut Vec<Node>) {
        let line = line_of(node);
        match node.kind() {
            "pass_statement" | "import_statement" | "import_from_statement"
            | "future_import_statement" => {}
            "expression_statement" => {
                if let Some(lowered) = self.expression_statement(node) {
                    out.push(lowered);
                }
            }
            "function_definition" => {
                out.push(Node::Function(self.function(
                    node,
                    Vec::new(),
                    FunctionForm::Declaration,
                    false,
                )));
            }
            "decorated_definition" => {
                let decorators: Vec<String> = named_children(node)
                    .into_iter()
                    .filter(|c| c.kind() == "decorator")
                    .map(|c| self.text(c).trim_start_matches('@').trim().to_string())
                    .collect();
                match node.child_by_field_name("definition") {
                    Some(def) if def.kind() == "function_definition" => out.push(Node::Function(
                        self.function(def, decorators, FunctionForm::Declaration, false),
                    )),
                    Some(def) if def.kind() == "class_definition" => {
                        out.push(Node::Class(self.class(def)))
                    }
                    _ => {}
                }
            }
            "class_definition" => out.push(Node::Class(self.class(node))),
            "if_statement" => out.push(Node::If(self.if_statement(node))),
            "for_statement" | "while_statement" => {
                let body = self.block(node.child_by_field_name("body"), line);
                out.push(Node::Loop(LoopNode {
                    line,
                    header: snippet(self.text(node)),
                    body,
                }));
            }
            "try_statement" => out.push(Node::Try(self.try_statement(node))),
            "with_statement" => {
                let body = self.block(node.child_by_field_name("body"), line);
                out.push(Node::Block(body));
            }
            "match_statement" => out.push(Node::Switch(self.match_statement(node))),
            "return_statement" => out.push(Node::Return(self.return_statement(node))),
            "raise_statement" => out.push(Node::Throw(ThrowNode {
                line,
                text: snippet(self.text(node)),
            })),
            "ERROR" => {
                out.push(Node::Unsupported {
                    kind: "ERROR".into(),
                    line,
                });
                for child in named_children(node) {
                    if matches!(
                        child.kind(),
                        "function_definition" | "class_definition" | "decorated_definition"
                    ) {
                        self.statement(child, out);
                    }
                }
            }
            _ => out.push(Node::Expr(ExprNode {
                line,
                text: snippet(self.text(node)),
                callee: None,
                nested: Vec::new(),
            })),
        }
    }

    /// Docstrings and `...` are not statements.
    fn expression_statement(&mut self, node: TsNode<'_>) -> Option<Node> {
        let line = line_of(node);
        let children = named_children(node);
        if let [only] = children.as_slice() {
            match only.kind() {
                "string" | "concatenated_string" | "ellipsis" => return None,
                "assignment" => self.literal_alias(*only),
                _ => {}
            }
        }
        let callee = children.first().and_then(|expr| {
            let expr = if expr.kind() == "await" {
                named_children(*expr).into_iter().next()?
            } else {
                *expr
            };
            (expr.kind() == "call")
                .then(|| expr.child_by_field_name("function"))
                .flatten()
                .map(|f| self.text(f).split_whitespace().collect::<String>())
        });
        Some(Node::Expr(ExprNode {
            line,
            text: snippet(self.text(node)),
            callee,
            nested: Vec::new(),
        }))
    }

    /// `Mode = Literal["a", "b"]`
    fn literal_alias(&mut self, assignment: TsNode<'_>) {
        let (Some(left), Some(right)) = (
            assignment.child_by_field_name("left"),
            assignment.child_by_field_name("right"),
        ) else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        if let Some(values) = parse_literal_union(self.text(right)) {
            self.tree.closed_types.push(ClosedType {
                name: self.text(left).to_string(),
                values,
                line: line_of(assignment),
            });
        }
    }

    fn function(
        &mut self,
        node: TsNode<'_>,
        decorators: Vec<String>,
        form: FunctionForm,
        protocol_member: bool,
    ) -> Function {
        let line = line_of(node);
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_else(|| "<anonymous>".into());
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.params(p))
            .unwrap_or_default();
        let return_type = node
            .child_by_field_name("return_type")
            .map(|t| self.text(t).trim().to_string());
        let body_node = node.child_by_field_name("body");
        let body = self.block(body_node, line);
        let references = body_node
            .map(|b| collect_identifiers(b, self.src, &["identifier"]))
            .unwrap_or_default();
        let is_abstract = protocol_member
            || decorators
                .iter()
                .any(|d| d.ends_with("abstractmethod") || d.ends_with("overload"));
        Function {
            name,
            line,
            form,
            params,
            return_type,
            body: Some(body),
            expression_body: false,
            is_abstract,
            decorators,
            references,
            exported: false,
        }
    }

    fn params(&self, node: TsNode<'_>) -> Vec<Param> {
        let mut out = Vec::new();
        for child in named_children(node) {
            let param = match child.kind() {
                "identifier" => Param {
                    name: Some(self.text(child).to_string()),
                    type_text: None,
                    optional: false,
                },
                "typed_parameter" => {
                    let inner = named_children(child).into_iter().next();
                    let splat = inner
                        .map(|i| i.kind().ends_with("splat_pattern"))
                        .unwrap_or(false);
                    Param {
                        name: inner.and_then(|i| self.param_name(i)),
                        type_text: child
                            .child_by_field_name("type")
                            .map(|t| self.text(t).to_string()),
                        optional: splat,
                    }
                }
                "default_parameter" | "typed_default_parameter" => Param {
                    name: child
                        .child_by_field_name("name")
                        .and_then(|n| self.param_name(n)),
                    type_text: child
                        .child_by_field_name("type")
                        .map(|t| self.text(t).to_string()),
                    optional: true,
                },
                "list_splat_pattern" | "dictionary_splat_pattern" => Param {
                    name: self.param_name(child),
                    type_text: None,
                    optional: true,
                },
                "tuple_pattern" | "list_pattern" => Param {
                    name: None,
                    type_text: None,
                    optional: false,
                },
                _ => continue,
            };
            out.push(param);
        }
        out
    }

    fn param_name(&self, node: TsNode<'_>) -> Option<String> {
        match node.kind() {
            "identifier" => Some(self.text(node).to_string()),
            "list_splat_pattern" | "dictionary_splat_pattern" => named_children(node)
                .into_iter()
                .next()
                .and_then(|inner| self.param_name(inner)),
            _ => None,
        }
    }

    fn class(&mut self, node: TsNode<'_>) -> Class {
        let line = line_of(node);
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_else(|| "<anonymous>".into());

        let mut extends = Vec::new();
        let mut traits = ClassTraits::default();
        if let Some(bases) = node.child_by_field_name("superclasses") {
            for base in named_children(bases) {
                if base.kind() == "keyword_argument" {
                    let is_metaclass = base
                        .child_by_field_name("name")
                        .map(|n| self.text(n) == "metaclass")
                        .unwrap_or(false);
                    let value = base
                        .child_by_field_name("value")
                        .map(|v| last_segment(self.text(v)))
                        .unwrap_or("");
                    if is_metaclass && value == "ABCMeta" {
                        traits.abstract_base = true;
                    }
                    continue;
                }
                let base_name = last_segment(self.text(base)).to_string();
                match base_name.as_str() {
                    "ABC" => traits.abstract_base = true,
                    "Protocol" => traits.protocol = true,
                    other if ENUM_BASES.contains(&other) => traits.enumeration = true,
                    _ => {}
                }
                extends.push(base_name);
            }
        }

        let mut members = Vec::new();
        let mut enum_values = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                match member.kind() {
                    "function_definition" => members.push(Node::Function(self.function(
                        member,
                        Vec::new(),
                        FunctionForm::Method,
                        traits.protocol,
                    ))),
                    "decorated_definition" => {
                        let decorators: Vec<String> = named_children(member)
                            .into_iter()
                            .filter(|c| c.kind() == "decorator")
                            .map(|c| self.text(c).trim_start_matches('@').trim().to_string())
                            .collect();
                        if let Some(def) = member
                            .child_by_field_name("definition")
                            .filter(|d| d.kind() == "function_definition")
                        {
                            members.push(Node::Function(self.function(
                                def,
                                decorators,
                                FunctionForm::Method,
                                traits.protocol,
                            )));
                        }
                    }
                    "expression_statement" if traits.enumeration => {
                        let target = named_children(member)
                            .into_iter()
                            .next()
                            .filter(|a| a.kind() == "assignment")
                            .and_then(|a| a.child_by_field_name("left"))
                            .filter(|l| l.kind() == "identifier")
                            .map(|l| self.text(l));
                        if let Some(target) = target.filter(|t| !t.starts_with('_')) {
                            enum_values.push(format!("{name}.{target}"));
                        }
                    }
                    _ => {}
                }
            }
        }

        if traits.enumeration && !enum_values.is_empty() {
            self.tree.closed_types.push(ClosedType {
                name: name.clone(),
                values: enum_values,
                line,
            });
        }
        if traits.abstract_base || traits.protocol {
            let methods = members
                .iter()
                .filter_map(|m| match m {
                    Node::Function(f) if f.is_abstract => Some(f),
                    _ => None,
                })
                .filter(|f| !f.name.starts_with("__") || f.name == "__call__")
                .map(|f| MethodSignature {
                    name: f.name.clone(),
                    arity: f
                        .params
                        .iter()
                        .filter(|p| !matches!(p.name.as_deref(), Some("self") | Some("cls")))
                        .count(),
                    return_type: f.return_type.clone(),
                })
                .collect();
            self.tree.contracts.push(Interface {
                name: name.clone(),
                line,
                methods,
            });
        }

        Class {
            name,
            line,
            kind: ClassKind::Class,
            extends,
            implements: Vec::new(),
            members,
            exported: false,
        }
    }

    fn if_statement(&mut self, node: TsNode<'_>) -> IfNode {
        let line = line_of(node);
        let condition = node
            .child_by_field_name("condition")
            .map(|c| self.text(c).trim().to_string())
            .unwrap_or_default();
        let consequence = self.block(node.child_by_field_name("consequence"), line);

        let mut cursor = node.walk();
        let alternatives: Vec<TsNode<'_>> = node
            .children_by_field_name("alternative", &mut cursor)
            .collect();
        let mut tail: Option<Box<ElseBranch>> = None;
        for alt in alternatives.into_iter().rev() {
            let alt_line = line_of(alt);
            match alt.kind() {
                "else_clause" => {
                    let body = self.block(alt.child_by_field_name("body"), alt_line);
                    tail = Some(Box::new(ElseBranch::Else(body)));
                }
                "elif_clause" => {
                    let consequence = self.block(alt.child_by_field_name("consequence"), alt_line);
                    tail = Some(Box::new(ElseBranch::ElseIf(IfNode {
                        line: alt_line,
                        condition: alt
                            .child_by_field_name("condition")
                            .map(|c| self.text(c).trim().to_string())
                            .unwrap_or_default(),
                        consequence,
                        alternative: tail.take(),
                    })));
                }
                _ => {}
            }
        }

        IfNode {
            line,
            condition,
            consequence,
            alternative: tail,
        }
    }

    fn try_statement(&mut self, node: TsNode<'_>) -> TryNode {
        let line = line_of(node);
        let body = self.block(node.child_by_field_name("body"), line);
        let mut handlers = Vec::new();
        let mut finalizer = None;
        for child in named_children(node) {
            let child_line = line_of(child);
            match child.kind() {
                "except_clause" | "except_group_clause" => {
                    let parts = named_children(child);
                    let suite = parts.iter().copied().find(|c| c.kind() == "block");
                    let param: Vec<&str> = parts
                        .iter()
                        .filter(|c| c.kind() != "block")
                        .map(|c| self.text(*c))
                        .collect();
                    handlers.push(Handler {
                        line: child_line,
                        param: (!param.is_empty()).then(|| param.join(" as ")),
                        body: self.block(suite, child_line),
                    });
                }
                "finally_clause" => {
                    let suite = named_children(child)
                        .into_iter()
                        .find(|c| c.kind() == "block");
                    finalizer = Some(self.block(suite, child_line));
                }
                _ => {}
            }
        }
        TryNode {
            line,
            body,
            handlers,
            finalizer,
        }
    }

    fn match_statement(&mut self, node: TsNode<'_>) -> SwitchNode {
        let line = line_of(node);
        let subject = node
            .child_by_field_name("subject")
            .map(|s| self.text(s).trim().to_string())
            .unwrap_or_default();
        let mut cases = Vec::new();
        let body = node.child_by_field_name("body");
        for case in body.map(named_children).unwrap_or_default() {
            if case.kind() != "case_clause" {
                continue;
            }
            let case_line = line_of(case);
            let parts = named_children(case);
            let guarded = parts.iter().any(|p| p.kind() == "if_clause");
            let mut patterns = Vec::new();
            for pattern in parts.iter().filter(|p| p.kind() == "case_pattern") {
                let text = self.text(*pattern).trim();
                if guarded {
                    patterns.push(CasePattern::Dynamic(text.to_string()));
                } else {
                    let mut alternatives = Vec::new();
                    union_alternatives(*pattern, self.src, &mut alternatives);
                    patterns.extend(alternatives.into_iter().map(|alt| classify_case(alt.trim())));
                }
            }
            let suite = parts.iter().copied().find(|p| p.kind() == "block");
            let statements = self.block(suite, case_line).statements;
            cases.push(SwitchCase {
                line: case_line,
                patterns,
                body: statements,
            });
        }
        SwitchNode {
            line,
            subject,
            cases,
        }
    }

    fn return_statement(&mut self, node: TsNode<'_>) -> ReturnNode {
        let line = line_of(node);
        let value = match named_children(node).into_iter().next() {
            None => ReturnValue::Nothing,
            Some(value) => classify_return(value, self.text(value).trim()),
        };
        ReturnNode {
            line,
            value,
            nested: Vec::new(),
        }
    }
}

/// Alternatives of an or-pattern, flattened. Each alternative spans the
/// tokens between two `|` separators so signed numbers stay whole.
fn union_alternatives<'s>(node: TsNode<'_>, src: &'s str, out: &mut Vec<&'s str>) {
    match node.kind() {
        "union_pattern" => {
            let mut cursor = node.walk();
            let children: Vec<TsNode<'_>> = node
                .children(&mut cursor)
                .filter(|child| !child.is_extra())
                .collect();
            for group in children.split(|child| child.kind() == "|") {
                match group {
                    [] => {}
                    [single] => union_alternatives(*single, src, out),
                    [first, .., last] => {
                        out.push(src.get(first.start_byte()..last.end_byte()).unwrap_or(""))
                    }
                }
            }
        }
        "case_pattern" if node.child_count() == 1 => match node.child(0) {
            Some(inner) => union_alternatives(inner, src, out),
            None => out.push(node_text(node, src)),
        },
        _ => out.push(node_text(node, src)),
    }
}

fn classify_case(text: &str) -> CasePattern {
    if text == "_" {
        return CasePattern::CatchAll;
    }
    if let Some(literal) = normalize_literal(text) {
        return CasePattern::Value(literal);
    }
    let is_path = text
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if is_path && text.contains('.') {
        return CasePattern::Value(text.to_string());
    }
    if is_path && !text.is_empty() {
        // A bare name is a capture pattern and matches anything.
        return CasePattern::CatchAll;
    }
    CasePattern::Dynamic(text.to_string())
}

fn classify_return(value: TsNode<'_>, text: &str) -> ReturnValue {
    match value.kind() {
        "none" => ReturnValue::Absent("None".into()),
        "true" => ReturnValue::Bool(true),
        "false" => ReturnValue::Bool(false),
        "integer" | "float" | "string" => ReturnValue::Literal(snippet(text)),
        "parenthesized_expression" => match named_children(value).into_iter().next() {
            Some(inner) => {
                classify_return(inner, text.trim_matches(|c| c == '(' || c == ')').trim())
            }
            None => ReturnValue::Computed(snippet(text)),
        },
        _ => ReturnValue::Computed(snippet(text)),
    }
}
