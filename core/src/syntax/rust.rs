//! Rust lowering (syn).

use std::collections::BTreeSet;

use quote::ToTokens;
use syn::spanned::Spanned;
use syn::visit::Visit;

use super::{
    snippet, Block, CasePattern, Class, ClassKind, ClosedType, ElseBranch, ExportedSymbol,
    ExprNode, Function, FunctionForm, IfNode, Interface, LoopNode, MethodSignature, Node, Param,
    ParseError, ReturnNode, ReturnValue, SwitchCase, SwitchNode, SyntaxTree, ThrowNode,
};

pub(super) fn lower(text: &str) -> Result<SyntaxTree, ParseError> {
    let file = syn::parse_file(text).map_err(|err| {
        let line = err.span().start().line;
        ParseError::Syntax(format!("line {line}: {err}"))
    })?;
    let mut lowering = Lowering::default();
    let nodes = lowering.items(&file.items, true);
    let mut tree = lowering.tree;
    tree.nodes = nodes;
    Ok(tree)
}

fn line<T: Spanned>(node: &T) -> u32 {
    node.span().start().line as u32
}

fn tokens<T: ToTokens>(node: &T) -> String {
    node.to_token_stream().to_string()
}

fn is_pub(vis: &syn::Visibility) -> bool {
    matches!(vis, syn::Visibility::Public(_))
}

fn is_cfg_test(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path().is_ident("cfg") && tokens(&attr.meta).replace(' ', "").contains("cfg(test)")
    })
}

fn path_text(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

fn macro_name(mac: &syn::Macro) -> String {
    mac.path
        .segments
        .last()
        .map(|s| s.ident.to_string())
        .unwrap_or_default()
}

/// Identifiers mentioned in a body, including those inside macro invocations
/// and inline `format!` captures.
#[derive(Default)]
struct References {
    names: BTreeSet<String>,
}

impl<'ast> Visit<'ast> for References {
    fn visit_ident(&mut self, ident: &'ast proc_macro2::Ident) {
        self.names.insert(ident.to_string());
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        syn::visit::visit_macro(self, mac);
        collect_token_idents(mac.tokens.clone(), &mut self.names);
    }
}

fn collect_token_idents(stream: proc_macro2::TokenStream, out: &mut BTreeSet<String>) {
    for tree in stream {
        match tree {
            proc_macro2::TokenTree::Ident(ident) => {
                out.insert(ident.to_string());
            }
            proc_macro2::TokenTree::Group(group) => collect_token_idents(group.stream(), out),
            proc_macro2::TokenTree::Literal(lit) => {
                let text = lit.to_string();
                if text.starts_with('"') {
                    for capture in format_captures(&text) {
                        out.insert(capture);
                    }
                }
            }
            proc_macro2::TokenTree::Punct(_) => {}
        }
    }
}

/// `"{name} and {other:?}"` -> `name`, `other`.
fn format_captures(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        rest = &rest[open + 1..];
        if rest.starts_with('{') {
            rest = &rest[1..];
            continue;
        }
        let Some(close) = rest.find('}') else {
            break;
        };
        let inner = &rest[..close];
        let name = inner.split(':').next().unwrap_or("").trim();
        if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            out.push(name.to_string());
        }
        rest = &rest[close + 1..];
    }
    out
}

/// Closures directly inside an expression; nested ones are found when the
/// outer closure is lowered.
#[derive(Default)]
struct Closures<'ast> {
    found: Vec<&'ast syn::ExprClosure>,
}

impl<'ast> Visit<'ast> for Closures<'ast> {
    fn visit_expr_closure(&mut self, closure: &'ast syn::ExprClosure) {
        self.found.push(closure);
    }

    fn visit_item(&mut self, _item: &'ast syn::Item) {}
}

#[derive(Default)]
struct Lowering {
    tree: SyntaxTree,
}

impl Lowering {
    fn items(&mut self, items: &[syn::Item], module_level: bool) -> Vec<Node> {
        let mut out = Vec::new();
        for item in items {
            self.item(item, module_level, &mut out);
        }
        out
    }

    fn export(&mut self, name: String, line: u32) {
        if !self.tree.exports.iter().any(|e| e.name == name) {
            self.tree.exports.push(ExportedSymbol { name, line });
        }
    }

    /// `#[cfg(test)]` items are not lowered; only what they mention is kept.
    fn inline_tests(&mut self, item: &syn::Item) {
        let mut refs = References::default();
        refs.visit_item(item);
        self.tree.has_inline_tests = true;
        self.tree.inline_test_refs.extend(refs.names);
    }

    fn item(&mut self, item: &syn::Item, module_level: bool, out: &mut Vec<Node>) {
        match item {
            syn::Item::Fn(item_fn) => {
                if is_cfg_test(&item_fn.attrs) {
                    self.inline_tests(item);
                    return;
                }
                let exported = is_pub(&item_fn.vis);
                let function = self.function(
                    &item_fn.sig,
                    &item_fn.block,
                    FunctionForm::Declaration,
                    exported,
                );
                if exported && module_level {
                    self.export(function.name.clone(), function.line);
                }
                out.push(Node::Function(function));
            }
            syn::Item::Impl(item_impl) => {
                if is_cfg_test(&item_impl.attrs) {
                    self.inline_tests(item);
                    return;
                }
                let name = tokens(&*item_impl.self_ty);
                let implements = item_impl
                    .trait_
                    .as_ref()
                    .and_then(|(_, path, _)| path.segments.last())
                    .map(|s| vec![s.ident.to_string()])
                    .unwrap_or_default();
                let mut members = Vec::new();
                for impl_item in &item_impl.items {
                    if let syn::ImplItem::Fn(method) = impl_item {
                        members.push(Node::Function(self.function(
                            &method.sig,
                            &method.block,
                            FunctionForm::Method,
                            is_pub(&method.vis),
                        )));
                    }
                }
                out.push(Node::Class(Class {
                    name,
                    line: line(&item_impl.impl_token),
                    kind: ClassKind::Impl,
                    extends: Vec::new(),
                    implements,
                    members,
                    exported: false,
                }));
            }
            syn::Item::Trait(item_trait) => {
                let name = item_trait.ident.to_string();
                let methods = item_trait
                    .items
                    .iter()
                    .filter_map(|trait_item| match trait_item {
                        syn::TraitItem::Fn(method) if method.default.is_none() => {
                            Some(MethodSignature {
                                name: method.sig.ident.to_string(),
                                arity: method
                                    .sig
                                    .inputs
                                    .iter()
                                    .filter(|arg| matches!(arg, syn::FnArg::Typed(_)))
                                    .count(),
                                return_type: match &method.sig.output {
                                    syn::ReturnType::Default => None,
                                    syn::ReturnType::Type(_, ty) => Some(tokens(&**ty)),
                                },
                            })
                        }
                        _ => None,
                    })
                    .collect();
                // Default methods are real code and get checked like any other.
                let mut members = Vec::new();
                for trait_item in &item_trait.items {
                    if let syn::TraitItem::Fn(method) = trait_item {
                        if let Some(block) = &method.default {
                            members.push(Node::Function(self.function(
                                &method.sig,
                                block,
                                FunctionForm::Method,
                                false,
                            )));
                        }
                    }
                }
                let trait_line = line(&item_trait.ident);
                if is_pub(&item_trait.vis) && module_level {
                    self.export(name.clone(), trait_line);
                }
                self.tree.contracts.push(Interface {
                    name: name.clone(),
                    line: trait_line,
                    methods,
                });
                if !members.is_empty() {
                    out.push(Node::Class(Class {
                        name,
                        line: trait_line,
                        kind: ClassKind::Trait,
                        extends: Vec::new(),
                        implements: Vec::new(),
                        members,
                        exported: false,
                    }));
                }
            }
            syn::Item::Enum(item_enum) => {
                let name = item_enum.ident.to_string();
                let enum_line = line(&item_enum.ident);
                if is_pub(&item_enum.vis) && module_level {
                    self.export(name.clone(), enum_line);
                }
                let values = item_enum
                    .variants
                    .iter()
                    .map(|v| format!("{name}::{}", v.ident))
                    .collect();
                self.tree.closed_types.push(ClosedType {
                    name,
                    values,
                    line: enum_line,
                });
            }
            syn::Item::Struct(item_struct) => {
                if is_pub(&item_struct.vis) && module_level {
                    self.export(item_struct.ident.to_string(), line(&item_struct.ident));
                }
            }
            syn::Item::Mod(item_mod) => {
                if is_cfg_test(&item_mod.attrs) {
                    self.inline_tests(item);
                    return;
                }
                if let Some((_, items)) = &item_mod.content {
                    let nested = self.items(items, false);
                    out.push(Node::Block(Block::new(line(&item_mod.ident), nested)));
                }
            }
            _ => {}
        }
    }

    fn function(
        &mut self,
        sig: &syn::Signature,
        block: &syn::Block,
        form: FunctionForm,
        exported: bool,
    ) -> Function {
        let params = sig
            .inputs
            .iter()
            .filter_map(|arg| match arg {
                syn::FnArg::Receiver(_) => None,
                syn::FnArg::Typed(pat_type) => Some(Param {
                    name: match &*pat_type.pat {
                        syn::Pat::Ident(pat_ident) => Some(pat_ident.ident.to_string()),
                        _ => None,
                    },
                    type_text: Some(tokens(&*pat_type.ty)),
                    optional: false,
                }),
            })
            .collect();
        let return_type = match &sig.output {
            syn::ReturnType::Default => None,
            syn::ReturnType::Type(_, ty) => Some(tokens(&**ty)),
        };
        let mut references = References::default();
        references.visit_block(block);
        let returns_value = return_type.is_some();
        Function {
            name: sig.ident.to_string(),
            line: line(&sig.ident),
            form,
            params,
            return_type,
            body: Some(self.block(block, returns_value)),
            expression_body: false,
            is_abstract: false,
            decorators: Vec::new(),
            references: references.names,
            exported,
        }
    }

    fn closure(&mut self, closure: &syn::ExprClosure, name: Option<String>) -> Function {
        let params = closure
            .inputs
            .iter()
            .map(|pat| {
                let (pat, ty) = match pat {
                    syn::Pat::Type(pat_type) => (&*pat_type.pat, Some(tokens(&*pat_type.ty))),
                    other => (other, None),
                };
                Param {
                    name: match pat {
                        syn::Pat::Ident(pat_ident) => Some(pat_ident.ident.to_string()),
                        _ => None,
                    },
                    type_text: ty,
                    optional: false,
                }
            })
            .collect();
        let return_type = match &closure.output {
            syn::ReturnType::Default => None,
            syn::ReturnType::Type(_, ty) => Some(tokens(&**ty)),
        };
        let mut references = References::default();
        references.visit_expr(&closure.body);
        let closure_line = line(&closure.or1_token);
        let (body, expression_body) = match &*closure.body {
            syn::Expr::Block(expr_block) => (self.block(&expr_block.block, true), false),
            other => (
                Block::new(
                    line(other),
                    vec![Node::Return(ReturnNode {
                        line: line(other),
                        value: classify(other),
                        nested: self.nested(other),
                    })],
                ),
                true,
            ),
        };
        Function {
            name: name.unwrap_or_else(|| "<closure>".into()),
            line: closure_line,
            form: FunctionForm::Closure,
            params,
            return_type,
            body: Some(body),
            expression_body,
            is_abstract: false,
            decorators: Vec::new(),
            references: references.names,
            exported: false,
        }
    }

    fn nested(&mut self, expr: &syn::Expr) -> Vec<Node> {
        let mut closures = Closures::default();
        closures.visit_expr(expr);
        closures
            .found
            .into_iter()
            .map(|c| Node::Function(self.closure(c, None)))
            .collect()
    }

    fn block(&mut self, block: &syn::Block, tail_returns: bool) -> Block {
        let count = block.stmts.len();
        let mut statements = Vec::new();
        for (idx, stmt) in block.stmts.iter().enumerate() {
            let is_tail = tail_returns && idx + 1 == count;
            match stmt {
                syn::Stmt::Local(local) => {
                    let name = match &local.pat {
                        syn::Pat::Ident(pat_ident) => Some(pat_ident.ident.to_string()),
                        syn::Pat::Type(pat_type) => match &*pat_type.pat {
                            syn::Pat::Ident(pat_ident) => Some(pat_ident.ident.to_string()),
                            _ => None,
                        },
                        _ => None,
                    };
                    let nested = match local.init.as_ref().map(|init| &*init.expr) {
                        Some(syn::Expr::Closure(closure)) => {
                            vec![Node::Function(self.closure(closure, name))]
                        }
                        Some(init) => self.nested(init),
                        None => Vec::new(),
                    };
                    statements.push(Node::Expr(ExprNode {
                        line: line(&local.let_token),
                        text: snippet(&tokens(local)),
                        callee: local
                            .init
                            .as_ref()
                            .and_then(|init| callee_of(&init.expr)),
                        nested,
                    }));
                }
                syn::Stmt::Item(item) => self.item(item, false, &mut statements),
                syn::Stmt::Expr(expr, semi) => {
                    let node = if is_tail && semi.is_none() {
                        self.tail(expr)
                    } else {
                        self.statement(expr)
                    };
                    statements.push(node);
                }
                syn::Stmt::Macro(stmt_macro) => statements.push(macro_node(&stmt_macro.mac)),
            }
        }
        Block::new(block.brace_token.span.open().start().line as u32, statements)
    }

    fn statement(&mut self, expr: &syn::Expr) -> Node {
        match expr {
            syn::Expr::If(expr_if) => Node::If(self.if_expr(expr_if, false)),
            syn::Expr::ForLoop(expr_for) => Node::Loop(LoopNode {
                line: line(&expr_for.for_token),
                header: snippet(&format!(
                    "for {} in {}",
                    tokens(&*expr_for.pat),
                    tokens(&*expr_for.expr)
                )),
                body: self.block(&expr_for.body, false),
            }),
            syn::Expr::While(expr_while) => Node::Loop(LoopNode {
                line: line(&expr_while.while_token),
                header: snippet(&format!("while {}", tokens(&*expr_while.cond))),
                body: self.block(&expr_while.body, false),
            }),
            syn::Expr::Loop(expr_loop) => Node::Loop(LoopNode {
                line: line(&expr_loop.loop_token),
                header: "loop".into(),
                body: self.block(&expr_loop.body, false),
            }),
            syn::Expr::Match(expr_match) => Node::Switch(self.match_expr(expr_match, false)),
            syn::Expr::Return(expr_return) => Node::Return(ReturnNode {
                line: line(&expr_return.return_token),
                value: expr_return
                    .expr
                    .as_deref()
                    .map(classify)
                    .unwrap_or(ReturnValue::Nothing),
                nested: expr_return
                    .expr
                    .as_deref()
                    .map(|e| self.nested(e))
                    .unwrap_or_default(),
            }),
            syn::Expr::Block(expr_block) => Node::Block(self.block(&expr_block.block, false)),
            syn::Expr::Unsafe(expr_unsafe) => Node::Block(self.block(&expr_unsafe.block, false)),
            syn::Expr::Macro(expr_macro) => macro_node(&expr_macro.mac),
            other => Node::Expr(ExprNode {
                line: line(other),
                text: snippet(&tokens(other)),
                callee: callee_of(other),
                nested: self.nested(other),
            }),
        }
    }

    /// Tail expression of a value-returning body.
    fn tail(&mut self, expr: &syn::Expr) -> Node {
        match expr {
            syn::Expr::If(expr_if) => Node::If(self.if_expr(expr_if, true)),
            syn::Expr::Match(expr_match) => Node::Switch(self.match_expr(expr_match, true)),
            syn::Expr::Block(expr_block) => Node::Block(self.block(&expr_block.block, true)),
            syn::Expr::Unsafe(expr_unsafe) => Node::Block(self.block(&expr_unsafe.block, true)),
            syn::Expr::Macro(expr_macro) if is_diverging_macro(&expr_macro.mac) => {
                macro_node(&expr_macro.mac)
            }
            syn::Expr::ForLoop(_)
            | syn::Expr::While(_)
            | syn::Expr::Loop(_)
            | syn::Expr::Return(_) => self.statement(expr),
            other => Node::Return(ReturnNode {
                line: line(other),
                value: classify(other),
                nested: self.nested(other),
            }),
        }
    }

    fn if_expr(&mut self, expr_if: &syn::ExprIf, tail: bool) -> IfNode {
        let alternative = expr_if.else_branch.as_ref().map(|(_, else_expr)| {
            Box::new(match &**else_expr {
                syn::Expr::If(inner) => ElseBranch::ElseIf(self.if_expr(inner, tail)),
                syn::Expr::Block(expr_block) => {
                    ElseBranch::Else(self.block(&expr_block.block, tail))
                }
                other => {
                    let node = if tail { self.tail(other) } else { self.statement(other) };
                    ElseBranch::Else(Block::new(line(other), vec![node]))
                }
            })
        });
        IfNode {
            line: line(&expr_if.if_token),
            condition: snippet(&tokens(&*expr_if.cond)),
            consequence: self.block(&expr_if.then_branch, tail),
            alternative,
        }
    }

    fn match_expr(&mut self, expr_match: &syn::ExprMatch, tail: bool) -> SwitchNode {
        let mut cases = Vec::new();
        for arm in &expr_match.arms {
            let mut patterns = Vec::new();
            if arm.guard.is_some() {
                patterns.push(CasePattern::Dynamic(tokens(&arm.pat)));
            } else {
                arm_patterns(&arm.pat, &mut patterns);
            }
            let body = match &*arm.body {
                syn::Expr::Block(expr_block) => self.block(&expr_block.block, tail).statements,
                other if tail => vec![self.tail(other)],
                other => vec![self.statement(other)],
            };
            cases.push(SwitchCase {
                line: line(&arm.pat),
                patterns,
                body,
            });
        }
        SwitchNode {
            line: line(&expr_match.match_token),
            subject: snippet(&tokens(&*expr_match.expr)),
            cases,
        }
    }
}

fn arm_patterns(pat: &syn::Pat, out: &mut Vec<CasePattern>) {
    match pat {
        syn::Pat::Wild(_) => out.push(CasePattern::CatchAll),
        syn::Pat::Ident(pat_ident) if pat_ident.subpat.is_none() => {
            let name = pat_ident.ident.to_string();
            // Lower-case bindings match anything; capitalised names are
            // imported variants the matcher cannot resolve.
            if name.starts_with(|c: char| c.is_uppercase()) {
                out.push(CasePattern::Dynamic(name));
            } else {
                out.push(CasePattern::CatchAll);
            }
        }
        syn::Pat::Path(pat_path) => out.push(CasePattern::Value(path_text(&pat_path.path))),
        syn::Pat::TupleStruct(pat) => out.push(CasePattern::Value(path_text(&pat.path))),
        syn::Pat::Struct(pat) => out.push(CasePattern::Value(path_text(&pat.path))),
        syn::Pat::Lit(pat_lit) => {
            let text = tokens(pat_lit);
            match super::normalize_literal(&text) {
                Some(value) => out.push(CasePattern::Value(value)),
                None => out.push(CasePattern::Dynamic(text)),
            }
        }
        syn::Pat::Or(pat_or) => {
            for case in &pat_or.cases {
                arm_patterns(case, out);
            }
        }
        syn::Pat::Reference(pat_ref) => arm_patterns(&pat_ref.pat, out),
        syn::Pat::Paren(pat_paren) => arm_patterns(&pat_paren.pat, out),
        other => out.push(CasePattern::Dynamic(tokens(other))),
    }
}

fn classify(expr: &syn::Expr) -> ReturnValue {
    match expr {
        syn::Expr::Path(expr_path) if expr_path.path.is_ident("None") => {
            ReturnValue::Absent("None".into())
        }
        syn::Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Bool(lit_bool) => ReturnValue::Bool(lit_bool.value),
            other => ReturnValue::Literal(snippet(&tokens(other))),
        },
        syn::Expr::Paren(expr_paren) => classify(&expr_paren.expr),
        other => ReturnValue::Computed(snippet(&tokens(other))),
    }
}

fn callee_of(expr: &syn::Expr) -> Option<String> {
    match expr {
        syn::Expr::Call(call) => Some(tokens(&*call.func).replace(' ', "")),
        syn::Expr::MethodCall(call) => Some(format!(
            "{}.{}",
            tokens(&*call.receiver).replace(' ', ""),
            call.method
        )),
        syn::Expr::Try(expr_try) => callee_of(&expr_try.expr),
        syn::Expr::Await(expr_await) => callee_of(&expr_await.base),
        syn::Expr::Macro(expr_macro) => Some(macro_name(&expr_macro.mac)),
        _ => None,
    }
}

fn is_diverging_macro(mac: &syn::Macro) -> bool {
    matches!(
        macro_name(mac).as_str(),
        "todo" | "unimplemented" | "panic" | "unreachable"
    )
}

/// `todo!()` and friends become throws; everything else is a call.
fn macro_node(mac: &syn::Macro) -> Node {
    let name = macro_name(mac);
    let text = snippet(&format!("{name}!({})", mac.tokens));
    let mac_line = line(&mac.path);
    if is_diverging_macro(mac) {
        Node::Throw(ThrowNode {
            line: mac_line,
            text,
        })
    } else {
        Node::Expr(ExprNode {
            line: mac_line,
            text,
            callee: Some(name),
            nested: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::walk;

    #[test]
    fn tail_expressions_are_returns() {
        let src = "pub fn pick(flag: bool) -> Option<u32> {\n    if flag {\n        Some(1)\n    } else {\n        None\n    }\n}\n";
        let tree = lower(src).unwrap();
        let Node::Function(f) = &tree.nodes[0] else {
            panic!("expected a function");
        };
        let values: Vec<&ReturnValue> = f.own_returns().iter().map(|r| &r.value).collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1], &ReturnValue::Absent("None".into()));
        assert_eq!(tree.exports[0].name, "pick");
    }

    #[test]
    fn todo_macro_is_a_throw() {
        let src = "fn later() -> u32 {\n    todo!()\n}\nfn never() {\n    unimplemented!(\"soon\");\n}\n";
        let tree = lower(src).unwrap();
        let mut throws = Vec::new();
        walk(&tree.nodes, &mut |node, _| {
            if let Node::Throw(t) = node {
                throws.push(t.signals_not_implemented());
            }
        });
        assert_eq!(throws, vec![true, true]);
    }

    #[test]
    fn match_arms_classify_patterns() {
        let src = "enum Color { Red, Green, Blue }\nfn name(c: Color) -> &'static str {\n    match c {\n        Color::Red => \"r\",\n        Color::Green | Color::Blue => \"gb\",\n    }\n}\nfn other(c: Color) -> u8 {\n    match c {\n        Color::Red => 1,\n        rest => 2,\n    }\n}\n";
        let tree = lower(src).unwrap();
        assert_eq!(
            tree.closed_types[0].values,
            vec!["Color::Red", "Color::Green", "Color::Blue"]
        );
        let mut arms = Vec::new();
        walk(&tree.nodes, &mut |node, _| {
            if let Node::Switch(s) = node {
                arms.push(s.cases.iter().flat_map(|c| c.patterns.clone()).collect::<Vec<_>>());
            }
        });
        assert_eq!(
            arms[0],
            vec![
                CasePattern::Value("Color::Red".into()),
                CasePattern::Value("Color::Green".into()),
                CasePattern::Value("Color::Blue".into()),
            ]
        );
        assert_eq!(arms[1][1], CasePattern::CatchAll);
    }

    #[test]
    fn cfg_test_in_comments_or_strings_is_not_an_inline_test() {
        let src = "// see #[cfg(test)] below\npub const NOTE: &str = \"#[cfg(test)]\";\n#[cfg(not(test))]\nmod live {}\n";
        let tree = lower(src).unwrap();
        assert!(!tree.has_inline_tests);
        assert!(tree.inline_test_refs.is_empty());
    }

    #[test]
    fn traits_and_impls() {
        let src = "pub trait Store {\n    fn get(&self, key: &str) -> String;\n    fn put(&mut self, key: &str, value: String);\n    fn name(&self) -> &str { \"store\" }\n}\nstruct Mem;\nimpl Store for Mem {\n    fn get(&self, key: &str) -> String { key.to_string() }\n}\n#[cfg(test)]\nmod tests {\n    fn helper() {}\n}\n";
        let tree = lower(src).unwrap();
        let names: Vec<&str> = tree.contracts[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["get", "put"]);
        assert_eq!(tree.contracts[0].methods[1].arity, 2);
        let impls: Vec<&Class> = tree
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Class(c) if c.name == "Mem" => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(impls[0].implements, vec!["Store".to_string()]);
        assert!(tree.has_inline_tests);
        assert!(tree.inline_test_refs.contains("helper"));
        assert!(!tree.inline_test_refs.contains("Mem"));
        let mut saw_helper = false;
        walk(&tree.nodes, &mut |node, _| {
            if let Node::Function(f) = node {
                saw_helper |= f.name == "helper";
            }
        });
        assert!(!saw_helper);
    }

    #[test]
    fn format_captures_count_as_references() {
        let src = "fn greet(name: &str, unused: u8) {\n    println!(\"hi {name}\");\n}\n";
        let tree = lower(src).unwrap();
        let Node::Function(f) = &tree.nodes[0] else {
            panic!("expected a function");
        };
        assert!(f.references.contains("name"));
        assert!(!f.references.contains("unused"));
    }
}
