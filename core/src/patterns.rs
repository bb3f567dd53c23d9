//! Structural pattern scanner.
//!
//! Five independent checks over the lowered syntax tree. Each check runs in
//! isolation: a panic inside one is logged and contributes nothing, the
//! others still run.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::files::SourceUnit;
use crate::finding::{Finding, FindingKind, Language, Severity};
use crate::syntax::{
    canonical_member, member_owner, parse_literal_union, walk, CasePattern, Class, ClassKind,
    ClosedType, ElseBranch, Function, FunctionForm, IfNode, Node, ReturnValue, Scope, SwitchNode,
    SyntaxTree,
};
use crate::ContractRules;

static TS_ABSENT_CAPABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(null|undefined|void|any|unknown)\b|\?|^[A-Z]$")
        .expect("valid TypeScript absent-capable regex")
});
static PY_ABSENT_CAPABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(None|Optional|Any|object)\b").expect("valid Python absent-capable regex")
});
static RUST_ABSENT_CAPABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bOption\b|^\(\s*\)$|^[A-Z]$").expect("valid Rust absent-capable regex")
});

/// Declared return type admits an absent value.
pub fn absent_capable(language: Language, return_type: &str) -> bool {
    let ty = return_type.trim();
    match language {
        Language::TypeScript | Language::JavaScript => TS_ABSENT_CAPABLE.is_match(ty),
        Language::Python => PY_ABSENT_CAPABLE.is_match(ty),
        Language::Rust => RUST_ABSENT_CAPABLE.is_match(ty),
    }
}

/// Every closed type declared anywhere in the scan, first declaration wins.
#[derive(Debug, Default)]
pub struct ClosedTypeTable {
    by_name: BTreeMap<String, ClosedType>,
}

impl ClosedTypeTable {
    pub fn build<'a>(trees: impl IntoIterator<Item = &'a SyntaxTree>) -> Self {
        let mut by_name = BTreeMap::new();
        for tree in trees {
            for closed in &tree.closed_types {
                by_name
                    .entry(closed.name.clone())
                    .or_insert_with(|| closed.clone());
            }
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&ClosedType> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Values a closed-type switch could match versus those it handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteBranchSet {
    pub type_name: String,
    pub closed: Vec<String>,
    pub handled: BTreeSet<String>,
    pub has_catch_all: bool,
}

impl IncompleteBranchSet {
    pub fn compute(closed: &ClosedType, switch: &SwitchNode) -> Self {
        let mut handled = BTreeSet::new();
        let mut has_catch_all = false;
        let closed_values: Vec<String> =
            closed.values.iter().map(|v| canonical_member(v)).collect();
        for case in &switch.cases {
            for pattern in &case.patterns {
                match pattern {
                    CasePattern::CatchAll => has_catch_all = true,
                    CasePattern::Value(value) => {
                        let value = canonical_member(value);
                        if closed_values.contains(&value) {
                            handled.insert(value);
                        }
                    }
                    CasePattern::Dynamic(_) => {}
                }
            }
        }
        Self {
            type_name: closed.name.clone(),
            closed: closed_values,
            handled,
            has_catch_all,
        }
    }

    /// Unhandled values in declaration order.
    pub fn unhandled(&self) -> Vec<&str> {
        self.closed
            .iter()
            .filter(|v| !self.handled.contains(*v))
            .map(String::as_str)
            .collect()
    }

    pub fn is_incomplete(&self) -> bool {
        !self.has_catch_all && !self.unhandled().is_empty()
    }
}

/// Everything a check needs for one file.
pub struct CheckContext<'a> {
    pub file: &'a str,
    pub language: Language,
    pub tree: &'a SyntaxTree,
    pub closed_types: &'a ClosedTypeTable,
    pub rules: &'a ContractRules,
}

impl<'a> CheckContext<'a> {
    pub fn for_unit(
        unit: &'a SourceUnit,
        closed_types: &'a ClosedTypeTable,
        rules: &'a ContractRules,
    ) -> Option<Self> {
        Some(Self {
            file: &unit.path,
            language: unit.language?,
            tree: unit.tree.as_ref()?,
            closed_types,
            rules,
        })
    }

    fn finding(
        &self,
        line: u32,
        kind: FindingKind,
        severity: Severity,
        description: String,
    ) -> Finding {
        Finding::new(self.file, Some(line), kind, severity, description)
    }
}

type Check = fn(&CheckContext<'_>, &mut Vec<Finding>);

const CHECKS: &[(&str, Check)] = &[
    ("return-contract", check_return_contract),
    ("empty-body", check_empty_bodies),
    ("weak-error-handling", check_error_handling),
    ("incomplete-branch", check_branch_coverage),
    ("suspicious-contract", check_suspicious_contracts),
];

/// Run every structural check over one file, in a fixed order.
pub fn scan(ctx: &CheckContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (name, check) in CHECKS {
        let produced = run_isolated(name, ctx.file, || {
            let mut out = Vec::new();
            check(ctx, &mut out);
            out
        });
        if let Some(produced) = produced {
            findings.extend(produced);
        }
    }
    findings
}

/// Run `f`, turning a panic into a logged `None`.
pub(crate) fn run_isolated<T>(check: &str, file: &str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::warn!(
                file,
                check,
                error = %message,
                "check failed; skipping it for this file"
            );
            None
        }
    }
}

fn qualified_name(function: &Function, scope: Scope<'_>) -> String {
    match scope.class {
        Some(class) if function.form == FunctionForm::Method => {
            format!("{}.{}", class.name, function.name)
        }
        _ => function.name.clone(),
    }
}

fn check_return_contract(ctx: &CheckContext<'_>, out: &mut Vec<Finding>) {
    // No declared types to hold a contract against.
    if ctx.language == Language::JavaScript {
        return;
    }
    walk(&ctx.tree.nodes, &mut |node, scope| {
        let Node::Function(function) = node else {
            return;
        };
        let Some(return_type) = function.return_type.as_deref() else {
            return;
        };
        if absent_capable(ctx.language, return_type) {
            return;
        }
        let name = qualified_name(function, scope);
        for ret in function.own_returns() {
            let literal = match &ret.value {
                ReturnValue::Absent(literal) => literal.clone(),
                ReturnValue::Nothing if ctx.language == Language::Python => "None".into(),
                _ => continue,
            };
            out.push(
                ctx.finding(
                    ret.line,
                    FindingKind::MissingReturnContract,
                    Severity::High,
                    format!("`{name}` declares return type `{return_type}` but returns `{literal}`"),
                )
                .with_suggestion(
                    Some(ctx.language),
                    &format!("return a real `{return_type}` from `{name}` or widen its declared return type"),
                ),
            );
        }
    });
}

fn check_empty_bodies(ctx: &CheckContext<'_>, out: &mut Vec<Finding>) {
    let lang = Some(ctx.language);
    walk(&ctx.tree.nodes, &mut |node, scope| match node {
        Node::Function(function) => {
            if !function.has_empty_body() || function.is_abstract {
                return;
            }
            // Parameter-property constructors are intentionally empty.
            if function.is_constructor() && !function.params.is_empty() {
                return;
            }
            let name = qualified_name(function, scope);
            out.push(
                ctx.finding(
                    function.line,
                    FindingKind::EmptyBody,
                    Severity::Medium,
                    format!("function `{name}` has an empty body"),
                )
                .with_suggestion(
                    lang,
                    &format!("implement `{name}` or document why it is intentionally empty"),
                ),
            );
        }
        Node::If(if_node) => empty_branches(ctx, if_node, scope, out),
        Node::Loop(lp) if lp.body.is_empty() => {
            out.push(
                ctx.finding(
                    lp.line,
                    FindingKind::EmptyBody,
                    Severity::Medium,
                    format!("empty loop body for `{}` in {}", lp.header, scope.describe()),
                )
                .with_suggestion(
                    lang,
                    &format!("fill in or remove the empty loop `{}`", lp.header),
                ),
            );
        }
        Node::Block(block) if block.is_empty() => {
            out.push(
                ctx.finding(
                    block.line,
                    FindingKind::EmptyBody,
                    Severity::Medium,
                    format!("empty block in {}", scope.describe()),
                )
                .with_suggestion(lang, "fill in or remove this empty block"),
            );
        }
        Node::Try(tr) => {
            if let Some(fin) = tr.finalizer.as_ref().filter(|f| f.is_empty()) {
                out.push(
                    ctx.finding(
                        fin.line,
                        FindingKind::EmptyBody,
                        Severity::Medium,
                        format!("empty `finally` block in {}", scope.describe()),
                    )
                    .with_suggestion(lang, "add cleanup to the `finally` block or remove it"),
                );
            }
        }
        _ => {}
    });
}

fn empty_branches(
    ctx: &CheckContext<'_>,
    if_node: &IfNode,
    scope: Scope<'_>,
    out: &mut Vec<Finding>,
) {
    let lang = Some(ctx.language);
    let mut current = Some(if_node);
    while let Some(branch) = current {
        if branch.consequence.is_empty() {
            out.push(
                ctx.finding(
                    branch.line,
                    FindingKind::EmptyBody,
                    Severity::Medium,
                    format!("empty branch for `if {}` in {}", branch.condition, scope.describe()),
                )
                .with_suggestion(
                    lang,
                    &format!("handle the case `{}` or remove the branch", branch.condition),
                ),
            );
        }
        current = match branch.alternative.as_deref() {
            Some(ElseBranch::ElseIf(next)) => Some(next),
            Some(ElseBranch::Else(block)) => {
                if block.is_empty() {
                    out.push(
                        ctx.finding(
                            block.line,
                            FindingKind::EmptyBody,
                            Severity::Medium,
                            format!(
                                "empty `else` branch after `if {}` in {}",
                                branch.condition,
                                scope.describe()
                            ),
                        )
                        .with_suggestion(lang, "handle the fallback case or drop the empty `else`"),
                    );
                }
                None
            }
            None => None,
        };
    }
}

fn is_log_call(callee: &str, rules: &ContractRules) -> bool {
    let callee = callee.trim_end_matches('!');
    let (receiver, last) = match callee.rsplit_once('.') {
        Some((receiver, last)) => (receiver, last),
        None => ("", callee),
    };
    let first = callee.split('.').next().unwrap_or(callee);
    rules.log_methods.iter().any(|m| m == last)
        || rules
            .log_receivers
            .iter()
            .any(|r| r == receiver || r == first || r == callee)
}

fn is_log_only(statements: &[Node], rules: &ContractRules) -> bool {
    !statements.is_empty()
        && statements.iter().all(|stmt| match stmt {
            Node::Expr(expr) => expr
                .callee
                .as_deref()
                .map(|callee| is_log_call(callee, rules))
                .unwrap_or(false),
            _ => false,
        })
}

fn check_error_handling(ctx: &CheckContext<'_>, out: &mut Vec<Finding>) {
    let lang = Some(ctx.language);
    walk(&ctx.tree.nodes, &mut |node, scope| {
        let Node::Try(tr) = node else {
            return;
        };
        let place = scope.describe();
        if tr.handlers.is_empty() {
            out.push(
                ctx.finding(
                    tr.line,
                    FindingKind::WeakErrorHandling,
                    Severity::High,
                    format!("`try` in {place} has no error handler, errors propagate past the cleanup unhandled"),
                )
                .with_suggestion(
                    lang,
                    &format!("decide how errors raised in {place} should be handled"),
                ),
            );
        }
        for handler in &tr.handlers {
            let description = if handler.body.is_empty() {
                format!("empty error handler in {place} silently swallows the error")
            } else if is_log_only(&handler.body.statements, ctx.rules) {
                format!("error handler in {place} only logs the error and carries on")
            } else {
                continue;
            };
            out.push(
                ctx.finding(
                    handler.line,
                    FindingKind::WeakErrorHandling,
                    Severity::High,
                    description,
                )
                .with_suggestion(
                    lang,
                    &format!("recover from, propagate or report the error caught in {place}"),
                ),
            );
        }
    });
}

fn resolve_closed_type(
    ctx: &CheckContext<'_>,
    switch: &SwitchNode,
    scope: Scope<'_>,
) -> Option<ClosedType> {
    for case in &switch.cases {
        for pattern in &case.patterns {
            let CasePattern::Value(value) = pattern else {
                continue;
            };
            if let Some(found) = member_owner(value).and_then(|owner| ctx.closed_types.get(owner)) {
                return Some(found.clone());
            }
        }
    }
    let subject = switch.subject.trim();
    let param = scope
        .function?
        .params
        .iter()
        .find(|p| p.name.as_deref() == Some(subject))?;
    let type_text = param.type_text.as_deref()?.trim();
    if let Some(values) = parse_literal_union(type_text) {
        return Some(ClosedType {
            name: type_text.to_string(),
            values,
            line: switch.line,
        });
    }
    let bare = type_text.trim_start_matches('&').trim();
    let bare = bare.split('<').next().unwrap_or(bare).trim();
    let name = bare.rsplit(['.', ':']).next().unwrap_or(bare);
    ctx.closed_types.get(name).cloned()
}

fn check_branch_coverage(ctx: &CheckContext<'_>, out: &mut Vec<Finding>) {
    let keyword = match ctx.language {
        Language::Rust | Language::Python => "match",
        Language::TypeScript | Language::JavaScript => "switch",
    };
    walk(&ctx.tree.nodes, &mut |node, scope| {
        let Node::Switch(switch) = node else {
            return;
        };
        let Some(closed) = resolve_closed_type(ctx, switch, scope) else {
            return;
        };
        let set = IncompleteBranchSet::compute(&closed, switch);
        if !set.is_incomplete() {
            return;
        }
        let missing = set.unhandled().join(", ");
        out.push(
            ctx.finding(
                switch.line,
                FindingKind::IncompleteBranchCoverage,
                Severity::Medium,
                format!(
                    "`{keyword} {}` over `{}` in {} does not handle {missing}",
                    switch.subject,
                    set.type_name,
                    scope.describe()
                ),
            )
            .with_suggestion(
                Some(ctx.language),
                &format!("handle {missing} or add an explicit default branch"),
            ),
        );
    });
}

fn is_predicate_name(name: &str, prefixes: &[String]) -> bool {
    let name = name.trim_start_matches('_');
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

fn is_falsy_literal(literal: &str) -> bool {
    matches!(literal.trim(), "0" | "0.0" | "\"\"" | "''" | "``" | "False")
}

/// `false`, absent, falsy or computed return, or a bare `return`.
fn has_negative_path(function: &Function) -> bool {
    function.own_returns().iter().any(|ret| match &ret.value {
        ReturnValue::Bool(value) => !value,
        ReturnValue::Absent(_) | ReturnValue::Computed(_) | ReturnValue::Nothing => true,
        ReturnValue::Literal(literal) => is_falsy_literal(literal),
    })
}

fn signature_is_dictated(function: &Function, class: Option<&Class>, language: Language) -> bool {
    if function.name.ends_with("callback") || !function.decorators.is_empty() {
        return true;
    }
    if function.is_constructor()
        && matches!(language, Language::TypeScript | Language::JavaScript)
    {
        return true;
    }
    match class {
        Some(class) if function.form == FunctionForm::Method => {
            class.kind == ClassKind::Trait || class.has_supertype()
        }
        _ => false,
    }
}

fn check_suspicious_contracts(ctx: &CheckContext<'_>, out: &mut Vec<Finding>) {
    let lang = Some(ctx.language);
    walk(&ctx.tree.nodes, &mut |node, scope| {
        let Node::Function(function) = node else {
            return;
        };
        if function.body.is_none() || function.has_empty_body() || function.is_abstract {
            return;
        }
        let name = qualified_name(function, scope);

        if is_predicate_name(&function.name, &ctx.rules.predicate_prefixes)
            && !has_negative_path(function)
        {
            out.push(
                ctx.finding(
                    function.line,
                    FindingKind::SuspiciousContractMismatch,
                    Severity::Medium,
                    format!("`{name}` reads like a validator but never returns a negative outcome"),
                )
                .with_suggestion(lang, &format!("make `{name}` report failure or rename it")),
            );
        }

        if signature_is_dictated(function, scope.class, ctx.language)
            || function.references.contains("arguments")
        {
            return;
        }
        for param in &function.params {
            let Some(param_name) = param.name.as_deref() else {
                continue;
            };
            if param.optional
                || matches!(param_name, "self" | "cls" | "this")
                || param_name.starts_with('_')
                || function.references.contains(param_name)
            {
                continue;
            }
            out.push(
                ctx.finding(
                    function.line,
                    FindingKind::SuspiciousContractMismatch,
                    Severity::Medium,
                    format!("parameter `{param_name}` of `{name}` is never used"),
                )
                .with_suggestion(
                    lang,
                    &format!("use `{param_name}` in `{name}` or drop it from the signature"),
                ),
            );
        }
    });
}
