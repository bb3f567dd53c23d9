//! TypeScript and JavaScript lowering (tree-sitter).

use tree_sitter::{Node as TsNode, Parser};

use super::{
    collect_identifiers, has_child_kind, line_of, named_children, node_text, normalize_literal,
    parse_literal_union, snippet, strip_parens, Block, CasePattern, Class, ClassKind, ClosedType,
    ElseBranch, ExportedSymbol, ExprNode, Function, FunctionForm, Handler, IfNode, Interface,
    LoopNode, MethodSignature, Node, Param, ParseError, ReturnNode, ReturnValue, SwitchCase,
    SwitchNode, SyntaxTree, ThrowNode, TryNode,
};
use crate::finding::Language;

const REFERENCE_KINDS: &[&str] = &[
    "identifier",
    "shorthand_property_identifier",
    "shorthand_property_identifier_pattern",
];

pub(super) fn lower(
    language: Language,
    extension: &str,
    text: &str,
) -> Result<SyntaxTree, ParseError> {
    let grammar = match (language, extension) {
        (Language::TypeScript, "tsx") => tree_sitter_typescript::LANGUAGE_TSX,
        (Language::TypeScript, _) => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        _ => tree_sitter_javascript::LANGUAGE,
    };
    let mut parser = Parser::new();
    parser
        .set_language(&grammar.into())
        .map_err(|err| ParseError::Grammar(language, err.to_string()))?;
    let tree = parser.parse(text, None).ok_or(ParseError::NoTree)?;

    let mut lowering = Lowering {
        src: text,
        tree: SyntaxTree::default(),
    };
    let nodes = lowering.statements(tree.root_node());
    let mut out = lowering.tree;
    out.nodes = nodes;
    Ok(out)
}

fn is_function_kind(kind: &str) -> bool {
    matches!(
        kind,
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

fn form_of(kind: &str) -> FunctionForm {
    if kind == "arrow_function" {
        FunctionForm::Arrow
    } else {
        FunctionForm::Expression
    }
}

/// `Base<T>` -> `Base`.
fn base_name(text: &str) -> String {
    text.split('<').next().unwrap_or(text).trim().to_string()
}

fn type_text(raw: &str) -> String {
    raw.trim().trim_start_matches(':').trim().to_string()
}

struct Lowering<'s> {
    src: &'s str,
    tree: SyntaxTree,
}

impl<'s> Lowering<'s> {
    fn text(&self, node: TsNode<'_>) -> &'s str {
        node_text(node, self.src)
    }

    fn export(&mut self, name: &str, line: u32) {
        if name.is_empty() || self.tree.exports.iter().any(|e| e.name == name) {
            return;
        }
        self.tree.exports.push(ExportedSymbol {
            name: name.to_string(),
            line,
        });
    }

    fn statements(&mut self, parent: TsNode<'_>) -> Vec<Node> {
        let mut out = Vec::new();
        for child in named_children(parent) {
            self.statement(child, false, &mut out);
        }
        out
    }

    fn statement(&mut self, node: TsNode<'_>, exported: bool, out: &mut Vec<Node>) {
        let line = line_of(node);
        match node.kind() {
            "empty_statement" | "hash_bang_line" | "import_statement" | "function_signature"
            | "ambient_declaration" => {}
            "export_statement" => self.export_statement(node, out),
            "function_declaration" | "generator_function_declaration" => {
                let function = self.function(node, None, FunctionForm::Declaration, exported);
                if exported {
                    self.export(&function.name, line);
                }
                out.push(Node::Function(function));
            }
            "class_declaration" | "abstract_class_declaration" => {
                let class = self.class(node, None, exported);
                if exported {
                    self.export(&class.name, line);
                }
                out.push(Node::Class(class));
            }
            "interface_declaration" => self.interface(node),
            "enum_declaration" => self.enumeration(node),
            "type_alias_declaration" => self.type_alias(node),
            "lexical_declaration" | "variable_declaration" => self.declaration(node, exported, out),
            "expression_statement" => out.push(self.expression_statement(node)),
            "statement_block" => out.push(Node::Block(self.block(node))),
            "if_statement" => out.push(Node::If(self.if_statement(node))),
            "for_statement" | "for_in_statement" | "for_of_statement" | "while_statement"
            | "do_statement" => {
                let body = node
                    .child_by_field_name("body")
                    .map(|body| self.body(body))
                    .unwrap_or_else(|| Block::new(line, Vec::new()));
                out.push(Node::Loop(LoopNode {
                    line,
                    header: snippet(self.text(node)),
                    body,
                }));
            }
            "try_statement" => out.push(Node::Try(self.try_statement(node))),
            "switch_statement" => out.push(Node::Switch(self.switch_statement(node))),
            "return_statement" => out.push(Node::Return(self.return_statement(node))),
            "throw_statement" => out.push(Node::Throw(ThrowNode {
                line,
                text: snippet(self.text(node)),
            })),
            "labeled_statement" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.statement(body, exported, out);
                }
            }
            "internal_module" | "module" => {
                if let Some(body) = node.child_by_field_name("body") {
                    let statements = self.statements(body);
                    out.push(Node::Block(Block::new(line, statements)));
                }
            }
            "ERROR" => {
                out.push(Node::Unsupported {
                    kind: "ERROR".into(),
                    line,
                });
                // Declarations swallowed by a recovery node are still worth checking.
                for child in named_children(node) {
                    if child.kind().ends_with("declaration") || child.kind() == "export_statement" {
                        self.statement(child, false, out);
                    }
                }
            }
            other if other.ends_with("_declaration") => out.push(Node::Unsupported {
                kind: other.to_string(),
                line,
            }),
            _ => out.push(self.expression(node)),
        }
    }

    fn export_statement(&mut self, node: TsNode<'_>, out: &mut Vec<Node>) {
        let line = line_of(node);
        if let Some(decl) = node.child_by_field_name("declaration") {
            self.statement(decl, true, out);
            return;
        }
        if let Some(value) = node.child_by_field_name("value") {
            match value.kind() {
                "identifier" => self.export(self.text(value), line),
                kind if is_function_kind(kind) => {
                    let function =
                        self.function(value, Some("default".into()), form_of(kind), true);
                    self.export(&function.name, line);
                    out.push(Node::Function(function));
                }
                "class" => {
                    let class = self.class(value, Some("default".into()), true);
                    self.export(&class.name, line);
                    out.push(Node::Class(class));
                }
                _ => out.push(self.expression(value)),
            }
            return;
        }
        for clause in named_children(node) {
            if clause.kind() != "export_clause" {
                continue;
            }
            for spec in named_children(clause) {
                if spec.kind() != "export_specifier" {
                    continue;
                }
                let name = spec
                    .child_by_field_name("alias")
                    .or_else(|| spec.child_by_field_name("name"));
                if let Some(name) = name {
                    self.export(self.text(name), line);
                }
            }
        }
    }

    fn function(
        &mut self,
        node: TsNode<'_>,
        name_hint: Option<String>,
        form: FunctionForm,
        exported: bool,
    ) -> Function {
        let line = line_of(node);
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .or(name_hint)
            .unwrap_or_else(|| "<anonymous>".into());
        let params = match node.child_by_field_name("parameters") {
            Some(params) => self.params(params),
            None => node
                .child_by_field_name("parameter")
                .map(|p| {
                    vec![Param {
                        name: Some(self.text(p).to_string()),
                        type_text: None,
                        optional: false,
                    }]
                })
                .unwrap_or_default(),
        };
        let return_type = node
            .child_by_field_name("return_type")
            .map(|t| type_text(self.text(t)));
        let decorators = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "decorator")
            .map(|c| self.text(c).to_string())
            .collect();

        let (body, expression_body, references) = match node.child_by_field_name("body") {
            Some(body) if body.kind() == "statement_block" => (
                Some(self.block(body)),
                false,
                collect_identifiers(body, self.src, REFERENCE_KINDS),
            ),
            Some(body) => {
                let body_line = line_of(body);
                let ret = self.return_value(body, body_line);
                (
                    Some(Block::new(body_line, vec![Node::Return(ret)])),
                    true,
                    collect_identifiers(body, self.src, REFERENCE_KINDS),
                )
            }
            None => (None, false, Default::default()),
        };

        Function {
            name,
            line,
            form,
            params,
            return_type,
            body,
            expression_body,
            is_abstract: false,
            decorators,
            references,
            exported,
        }
    }

    fn params(&self, node: TsNode<'_>) -> Vec<Param> {
        let mut out = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "required_parameter" | "optional_parameter" => {
                    let pattern = child.child_by_field_name("pattern");
                    if pattern.map(|p| p.kind() == "this").unwrap_or(false) {
                        continue;
                    }
                    let optional = child.kind() == "optional_parameter"
                        || child.child_by_field_name("value").is_some()
                        || pattern.map(|p| p.kind() == "rest_pattern").unwrap_or(false);
                    out.push(Param {
                        name: pattern.and_then(|p| self.param_name(p)),
                        type_text: child
                            .child_by_field_name("type")
                            .map(|t| type_text(self.text(t))),
                        optional,
                    });
                }
                kind => out.push(Param {
                    name: self.param_name(child),
                    type_text: None,
                    optional: matches!(kind, "assignment_pattern" | "rest_pattern"),
                }),
            }
        }
        out
    }

    fn param_name(&self, node: TsNode<'_>) -> Option<String> {
        match node.kind() {
            "identifier" => Some(self.text(node).to_string()),
            "assignment_pattern" => node
                .child_by_field_name("left")
                .and_then(|left| self.param_name(left)),
            "rest_pattern" => named_children(node)
                .into_iter()
                .next()
                .and_then(|inner| self.param_name(inner)),
            _ => None,
        }
    }

    fn block(&mut self, node: TsNode<'_>) -> Block {
        let statements = self.statements(node);
        Block::new(line_of(node), statements)
    }

    /// Statement position that may or may not be a braced block.
    fn body(&mut self, node: TsNode<'_>) -> Block {
        if node.kind() == "statement_block" {
            return self.block(node);
        }
        let mut statements = Vec::new();
        self.statement(node, false, &mut statements);
        Block::new(line_of(node), statements)
    }

    fn if_statement(&mut self, node: TsNode<'_>) -> IfNode {
        let line = line_of(node);
        let condition = node
            .child_by_field_name("condition")
            .map(|c| strip_parens(self.text(c)))
            .unwrap_or_default();
        let consequence = node
            .child_by_field_name("consequence")
            .map(|c| self.body(c))
            .unwrap_or_else(|| Block::new(line, Vec::new()));
        let alternative = match node.child_by_field_name("alternative") {
            Some(alt) => match named_children(alt).into_iter().next() {
                Some(inner) if inner.kind() == "if_statement" => {
                    Some(Box::new(ElseBranch::ElseIf(self.if_statement(inner))))
                }
                Some(inner) => Some(Box::new(ElseBranch::Else(self.body(inner)))),
                None => Some(Box::new(ElseBranch::Else(Block::new(line_of(alt), Vec::new())))),
            },
            None => None,
        };
        IfNode {
            line,
            condition,
            consequence,
            alternative,
        }
    }

    fn try_statement(&mut self, node: TsNode<'_>) -> TryNode {
        let line = line_of(node);
        let body = node
            .child_by_field_name("body")
            .map(|b| self.block(b))
            .unwrap_or_else(|| Block::new(line, Vec::new()));
        let mut handlers = Vec::new();
        if let Some(handler) = node.child_by_field_name("handler") {
            let handler_line = line_of(handler);
            handlers.push(Handler {
                line: handler_line,
                param: handler
                    .child_by_field_name("parameter")
                    .map(|p| self.text(p).to_string()),
                body: handler
                    .child_by_field_name("body")
                    .map(|b| self.block(b))
                    .unwrap_or_else(|| Block::new(handler_line, Vec::new())),
            });
        }
        let finalizer = node
            .child_by_field_name("finalizer")
            .and_then(|f| f.child_by_field_name("body"))
            .map(|b| self.block(b));
        TryNode {
            line,
            body,
            handlers,
            finalizer,
        }
    }

    fn switch_statement(&mut self, node: TsNode<'_>) -> SwitchNode {
        let line = line_of(node);
        let subject = node
            .child_by_field_name("value")
            .map(|v| strip_parens(self.text(v)))
            .unwrap_or_default();
        let mut cases = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for case in named_children(body) {
                let case_line = line_of(case);
                match case.kind() {
                    "switch_case" => {
                        let value = case.child_by_field_name("value");
                        let pattern = value
                            .map(|v| self.case_pattern(v))
                            .unwrap_or_else(|| CasePattern::Dynamic(String::new()));
                        let mut statements = Vec::new();
                        for child in named_children(case) {
                            if value.map(|v| v.id() == child.id()).unwrap_or(false) {
                                continue;
                            }
                            self.statement(child, false, &mut statements);
                        }
                        cases.push(SwitchCase {
                            line: case_line,
                            patterns: vec![pattern],
                            body: statements,
                        });
                    }
                    "switch_default" => {
                        let mut statements = Vec::new();
                        for child in named_children(case) {
                            self.statement(child, false, &mut statements);
                        }
                        cases.push(SwitchCase {
                            line: case_line,
                            patterns: vec![CasePattern::CatchAll],
                            body: statements,
                        });
                    }
                    _ => {}
                }
            }
        }
        SwitchNode {
            line,
            subject,
            cases,
        }
    }

    fn case_pattern(&self, value: TsNode<'_>) -> CasePattern {
        let text = self.text(value).trim();
        match value.kind() {
            "string" | "number" | "true" | "false" | "null" | "template_string" => {
                normalize_literal(text)
                    .map(CasePattern::Value)
                    .unwrap_or_else(|| CasePattern::Dynamic(text.to_string()))
            }
            "undefined" => CasePattern::Value("undefined".into()),
            "unary_expression" => {
                let compact: String = text.split_whitespace().collect();
                normalize_literal(&compact)
                    .map(CasePattern::Value)
                    .unwrap_or(CasePattern::Dynamic(compact))
            }
            "member_expression"
                if text
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '$') =>
            {
                CasePattern::Value(text.to_string())
            }
            "parenthesized_expression" => match named_children(value).into_iter().next() {
                Some(inner) => self.case_pattern(inner),
                None => CasePattern::Dynamic(text.to_string()),
            },
            _ => CasePattern::Dynamic(text.to_string()),
        }
    }

    fn return_statement(&mut self, node: TsNode<'_>) -> ReturnNode {
        let line = line_of(node);
        match named_children(node).into_iter().next() {
            Some(value) => self.return_value(value, line),
            None => ReturnNode {
                line,
                value: ReturnValue::Nothing,
                nested: Vec::new(),
            },
        }
    }

    fn return_value(&mut self, value: TsNode<'_>, line: u32) -> ReturnNode {
        ReturnNode {
            line,
            value: self.classify(value),
            nested: self.nested_functions(value),
        }
    }

    fn classify(&self, value: TsNode<'_>) -> ReturnValue {
        let text = self.text(value).trim();
        match value.kind() {
            "null" => ReturnValue::Absent("null".into()),
            "undefined" => ReturnValue::Absent("undefined".into()),
            "identifier" if text == "undefined" => ReturnValue::Absent("undefined".into()),
            "true" => ReturnValue::Bool(true),
            "false" => ReturnValue::Bool(false),
            "number" | "string" | "template_string" => ReturnValue::Literal(snippet(text)),
            "unary_expression" if text.starts_with("void") => {
                ReturnValue::Absent("undefined".into())
            }
            "parenthesized_expression" => match named_children(value).into_iter().next() {
                Some(inner) => self.classify(inner),
                None => ReturnValue::Computed(snippet(text)),
            },
            _ => ReturnValue::Computed(snippet(text)),
        }
    }

    fn nested_functions(&mut self, node: TsNode<'_>) -> Vec<Node> {
        let mut out = Vec::new();
        self.collect_nested(node, &mut out);
        out
    }

    fn collect_nested(&mut self, node: TsNode<'_>, out: &mut Vec<Node>) {
        let kind = node.kind();
        if is_function_kind(kind) {
            let hint = self.name_hint(node);
            out.push(Node::Function(self.function(node, hint, form_of(kind), false)));
        } else if kind == "class" {
            let hint = self.name_hint(node);
            out.push(Node::Class(self.class(node, hint, false)));
        } else {
            for child in named_children(node) {
                self.collect_nested(child, out);
            }
        }
    }

    /// Name for an anonymous function from where it sits.
    fn name_hint(&self, node: TsNode<'_>) -> Option<String> {
        let parent = node.parent()?;
        match parent.kind() {
            "variable_declarator" | "public_field_definition" | "field_definition" => parent
                .child_by_field_name("name")
                .or_else(|| parent.child_by_field_name("property"))
                .map(|n| self.text(n).to_string()),
            "pair" => parent
                .child_by_field_name("key")
                .map(|k| self.text(k).trim_matches(|c| c == '"' || c == '\'').to_string()),
            "assignment_expression" => parent.child_by_field_name("left").map(|left| {
                let text = self.text(left);
                text.rsplit('.').next().unwrap_or(text).to_string()
            }),
            "arguments" => {
                let call = parent.parent()?;
                let callee = call.child_by_field_name("function")?;
                Some(format!("{} callback", self.text(callee)))
            }
            _ => None,
        }
    }

    fn callee(&self, expr: TsNode<'_>) -> Option<String> {
        let expr = if expr.kind() == "await_expression" {
            named_children(expr).into_iter().next()?
        } else {
            expr
        };
        if expr.kind() != "call_expression" {
            return None;
        }
        let function = expr.child_by_field_name("function")?;
        Some(self.text(function).split_whitespace().collect())
    }

    fn expression(&mut self, node: TsNode<'_>) -> Node {
        Node::Expr(ExprNode {
            line: line_of(node),
            text: snippet(self.text(node)),
            callee: self.callee(node),
            nested: self.nested_functions(node),
        })
    }

    fn expression_statement(&mut self, node: TsNode<'_>) -> Node {
        let line = line_of(node);
        let Some(expr) = named_children(node).into_iter().next() else {
            return Node::Expr(ExprNode {
                line,
                text: String::new(),
                callee: None,
                nested: Vec::new(),
            });
        };
        if expr.kind() == "internal_module" {
            let statements = expr
                .child_by_field_name("body")
                .map(|body| self.statements(body))
                .unwrap_or_default();
            return Node::Block(Block::new(line, statements));
        }
        if expr.kind() == "assignment_expression" {
            self.commonjs_export(expr, line);
        }
        Node::Expr(ExprNode {
            line,
            text: snippet(self.text(node)),
            callee: self.callee(expr),
            nested: self.nested_functions(expr),
        })
    }

    fn commonjs_export(&mut self, assign: TsNode<'_>, line: u32) {
        let Some(left) = assign.child_by_field_name("left") else {
            return;
        };
        let target: String = self.text(left).split_whitespace().collect();
        if target == "module.exports" {
            let Some(right) = assign.child_by_field_name("right") else {
                return;
            };
            match right.kind() {
                "object" => {
                    for entry in named_children(right) {
                        let name = match entry.kind() {
                            "shorthand_property_identifier" => Some(self.text(entry)),
                            "pair" => entry.child_by_field_name("key").map(|k| self.text(k)),
                            "method_definition" => {
                                entry.child_by_field_name("name").map(|n| self.text(n))
                            }
                            _ => None,
                        };
                        if let Some(name) = name {
                            self.export(name.trim_matches(|c| c == '"' || c == '\''), line);
                        }
                    }
                }
                "identifier" => self.export(self.text(right), line),
                _ => {}
            }
        } else if let Some(name) = target
            .strip_prefix("module.exports.")
            .or_else(|| target.strip_prefix("exports."))
        {
            self.export(name, line);
        }
    }

    fn declaration(&mut self, node: TsNode<'_>, exported: bool, out: &mut Vec<Node>) {
        for declarator in named_children(node) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let line = line_of(declarator);
            let name_node = declarator.child_by_field_name("name");
            let name = name_node.map(|n| self.text(n).to_string());
            if exported {
                if let Some(n) = name_node.filter(|n| n.kind() == "identifier") {
                    self.export(self.text(n), line);
                }
            }
            let node = match declarator.child_by_field_name("value") {
                Some(value) if is_function_kind(value.kind()) => {
                    Node::Function(self.function(value, name, form_of(value.kind()), exported))
                }
                Some(value) if value.kind() == "class" => {
                    Node::Class(self.class(value, name, exported))
                }
                Some(value) => Node::Expr(ExprNode {
                    line,
                    text: snippet(self.text(declarator)),
                    callee: self.callee(value),
                    nested: self.nested_functions(value),
                }),
                None => Node::Expr(ExprNode {
                    line,
                    text: snippet(self.text(declarator)),
                    callee: None,
                    nested: Vec::new(),
                }),
            };
            out.push(node);
        }
    }

    fn class(&mut self, node: TsNode<'_>, name_hint: Option<String>, exported: bool) -> Class {
        let line = line_of(node);
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .or(name_hint)
            .unwrap_or_else(|| "<anonymous>".into());

        let mut extends = Vec::new();
        let mut implements = Vec::new();
        for heritage in named_children(node) {
            if heritage.kind() != "class_heritage" {
                continue;
            }
            for clause in named_children(heritage) {
                match clause.kind() {
                    "extends_clause" => extends.extend(
                        named_children(clause)
                            .into_iter()
                            .filter(|c| c.kind() != "type_arguments")
                            .map(|c| base_name(self.text(c))),
                    ),
                    "implements_clause" => implements.extend(
                        named_children(clause)
                            .into_iter()
                            .map(|c| base_name(self.text(c))),
                    ),
                    _ => extends.push(base_name(self.text(clause))),
                }
            }
        }

        let mut members = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut pending_decorators: Vec<String> = Vec::new();
            for member in named_children(body) {
                match member.kind() {
                    "decorator" => pending_decorators.push(self.text(member).to_string()),
                    "method_definition" => {
                        let mut method = self.function(member, None, FunctionForm::Method, false);
                        let mut decorators = std::mem::take(&mut pending_decorators);
                        decorators.append(&mut method.decorators);
                        method.decorators = decorators;
                        members.push(Node::Function(method));
                    }
                    "public_field_definition" | "field_definition" => {
                        let value = member
                            .child_by_field_name("value")
                            .filter(|v| is_function_kind(v.kind()));
                        if let Some(value) = value {
                            let field_name = member
                                .child_by_field_name("name")
                                .or_else(|| member.child_by_field_name("property"))
                                .map(|n| self.text(n).to_string());
                            members.push(Node::Function(self.function(
                                value,
                                field_name,
                                FunctionForm::Method,
                                false,
                            )));
                        }
                        pending_decorators.clear();
                    }
                    _ => pending_decorators.clear(),
                }
            }
        }

        Class {
            name,
            line,
            kind: ClassKind::Class,
            extends,
            implements,
            members,
            exported,
        }
    }

    fn interface(&mut self, node: TsNode<'_>) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n).to_string()) else {
            return;
        };
        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                if has_child_kind(member, "?") {
                    continue;
                }
                match member.kind() {
                    "method_signature" => {
                        let Some(method_name) = member.child_by_field_name("name") else {
                            continue;
                        };
                        methods.push(MethodSignature {
                            name: self.text(method_name).to_string(),
                            arity: member
                                .child_by_field_name("parameters")
                                .map(|p| named_children(p).len())
                                .unwrap_or(0),
                            return_type: member
                                .child_by_field_name("return_type")
                                .map(|t| type_text(self.text(t))),
                        });
                    }
                    "property_signature" => {
                        let function_type = member
                            .child_by_field_name("type")
                            .and_then(|t| named_children(t).into_iter().next())
                            .filter(|t| t.kind() == "function_type");
                        let (Some(function_type), Some(prop)) =
                            (function_type, member.child_by_field_name("name"))
                        else {
                            continue;
                        };
                        methods.push(MethodSignature {
                            name: self.text(prop).to_string(),
                            arity: function_type
                                .child_by_field_name("parameters")
                                .map(|p| named_children(p).len())
                                .unwrap_or(0),
                            return_type: function_type
                                .child_by_field_name("return_type")
                                .map(|t| type_text(self.text(t))),
                        });
                    }
                    _ => {}
                }
            }
        }
        self.tree.contracts.push(Interface {
            name,
            line: line_of(node),
            methods,
        });
    }

    fn enumeration(&mut self, node: TsNode<'_>) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n).to_string()) else {
            return;
        };
        let mut values = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                let member_name = match member.kind() {
                    "property_identifier" => Some(self.text(member)),
                    "enum_assignment" => member.child_by_field_name("name").map(|n| self.text(n)),
                    "string" => Some(self.text(member).trim_matches(|c| c == '"' || c == '\'')),
                    _ => None,
                };
                if let Some(member_name) = member_name {
                    values.push(format!("{name}.{member_name}"));
                }
            }
        }
        if !values.is_empty() {
            self.tree.closed_types.push(ClosedType {
                name,
                values,
                line: line_of(node),
            });
        }
    }

    fn type_alias(&mut self, node: TsNode<'_>) {
        let (Some(name), Some(value)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("value"),
        ) else {
            return;
        };
        if let Some(values) = parse_literal_union(self.text(value)) {
            self.tree.closed_types.push(ClosedType {
                name: self.text(name).to_string(),
                values,
                line: line_of(node),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::walk;

    fn ts(src: &str) -> SyntaxTree {
        lower(Language::TypeScript, "ts", src).unwrap()
    }

    fn functions(tree: &SyntaxTree) -> Vec<&Function> {
        let mut out = Vec::new();
        walk(&tree.nodes, &mut |node, _| {
            if let Node::Function(f) = node {
                out.push(f);
            }
        });
        out
    }

    #[test]
    fn lowers_functions_with_params_and_returns() {
        let src = "export function find(id: string, opts?: Opts): User | null {\n  if (!id) {\n    return null;\n  }\n  return lookup(id);\n}\n";
        let tree = ts(src);
        let funcs = functions(&tree);
        assert_eq!(funcs.len(), 1);
        let find = funcs[0];
        assert_eq!(find.name, "find");
        assert!(find.exported);
        assert_eq!(find.params.len(), 2);
        assert!(find.params[1].optional);
        assert_eq!(find.return_type.as_deref(), Some("User | null"));
        let returns = find.own_returns();
        assert_eq!(returns.len(), 2);
        assert_eq!(returns[0].value, ReturnValue::Absent("null".into()));
        assert_eq!(returns[0].line, 3);
        assert!(tree.exports.iter().any(|e| e.name == "find"));
    }

    #[test]
    fn arrow_assigned_to_const_takes_its_name() {
        let src = "const handler = async (req) => {\n  await run(req);\n};\nconst id = (x) => x;\n";
        let tree = ts(src);
        let funcs = functions(&tree);
        let names: Vec<&str> = funcs.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["handler", "id"]);
        assert!(funcs[1].expression_body);
        assert!(!funcs[1].has_empty_body());
    }

    #[test]
    fn catch_clause_and_switch_are_lowered() {
        let src = "function f(kind: Kind) {\n  try {\n    go();\n  } catch (e) {\n  }\n  switch (kind) {\n    case 'a':\n      break;\n    case Kind.B:\n      break;\n    default:\n      throw new Error('x');\n  }\n}\n";
        let tree = ts(src);
        let mut tries = 0;
        let mut switches = Vec::new();
        walk(&tree.nodes, &mut |node, scope| match node {
            Node::Try(t) => {
                tries += 1;
                assert_eq!(t.handlers.len(), 1);
                assert_eq!(t.handlers[0].line, 4);
                assert!(t.handlers[0].body.is_empty());
                assert_eq!(scope.function.map(|f| f.name.as_str()), Some("f"));
            }
            Node::Switch(s) => switches.push(s.clone()),
            _ => {}
        });
        assert_eq!(tries, 1);
        assert_eq!(switches.len(), 1);
        let patterns: Vec<CasePattern> = switches[0]
            .cases
            .iter()
            .flat_map(|c| c.patterns.clone())
            .collect();
        assert_eq!(
            patterns,
            vec![
                CasePattern::Value("\"a\"".into()),
                CasePattern::Value("Kind.B".into()),
                CasePattern::CatchAll
            ]
        );
    }

    #[test]
    fn interfaces_enums_and_unions_are_recorded() {
        let src = "interface Store {\n  get(key: string): string;\n  put(key: string, v: string): void;\n  label?(): string;\n}\nenum Color { Red, Green = 2 }\ntype Mode = 'on' | 'off';\nclass Mem implements Store {\n  get(key: string) { return key; }\n}\n";
        let tree = ts(src);
        assert_eq!(tree.contracts.len(), 1);
        let names: Vec<&str> = tree.contracts[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["get", "put"]);
        assert_eq!(tree.contracts[0].methods[1].arity, 2);
        assert_eq!(tree.closed_types.len(), 2);
        assert_eq!(tree.closed_types[0].values, vec!["Color.Red", "Color.Green"]);
        assert_eq!(tree.closed_types[1].values, vec!["\"on\"", "\"off\""]);
        let class = tree.nodes.iter().find_map(|n| match n {
            Node::Class(c) => Some(c),
            _ => None,
        });
        assert_eq!(class.map(|c| c.implements.clone()), Some(vec!["Store".to_string()]));
    }

    #[test]
    fn commonjs_exports_are_collected() {
        let tree = lower(
            Language::JavaScript,
            "js",
            "function a() { return 1; }\nfunction b() { return 2; }\nmodule.exports = { a, b };\nexports.c = () => 3;\n",
        )
        .unwrap();
        let names: Vec<&str> = tree.exports.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn broken_input_still_yields_functions() {
        let tree = ts("function ok() { return 1; }\nfunction broken( {\n");
        assert!(functions(&tree).iter().any(|f| f.name == "ok"));
    }
}
