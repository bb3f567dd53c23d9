//! Expected-gap synthesizer.
//!
//! Reasons about absence: stubs standing in for an implementation, contract
//! methods an implementer never defines, and source files or exports no test
//! ever mentions.

use std::collections::BTreeMap;

use crate::files::SourceUnit;
use crate::finding::{Finding, FindingKind, Language, Severity};
use crate::patterns::run_isolated;
use crate::syntax::{
    walk, Class, ClassKind, Function, FunctionForm, Interface, Node, Scope, SyntaxTree,
};
use crate::{AnalysisDepth, CoverageRules};

/// Every declared contract in the scan, first declaration wins.
#[derive(Debug, Default)]
pub struct ContractTable {
    by_name: BTreeMap<String, (String, Interface)>,
}

impl ContractTable {
    /// Build from `(file, tree)` pairs in file-enumeration order.
    pub fn build<'a>(trees: impl IntoIterator<Item = (&'a str, &'a SyntaxTree)>) -> Self {
        let mut by_name = BTreeMap::new();
        for (file, tree) in trees {
            for contract in &tree.contracts {
                if by_name.contains_key(&contract.name) {
                    tracing::debug!(
                        contract = %contract.name,
                        file,
                        "duplicate contract name; keeping the first declaration"
                    );
                    continue;
                }
                by_name.insert(contract.name.clone(), (file.to_string(), contract.clone()));
            }
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.by_name.get(name).map(|(_, contract)| contract)
    }

    /// File that declared `name`.
    pub fn origin(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(|(file, _)| file.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Test file by directory (`tests/`) or name (`test_x`, `x_test`, `x.test.ts`, `x.spec.ts`).
pub fn is_test_file(path: &str, rules: &CoverageRules) -> bool {
    let mut segments: Vec<&str> = path.split('/').collect();
    let name = segments.pop().unwrap_or(path);
    if segments
        .iter()
        .any(|dir| rules.test_dirs.iter().any(|t| t.eq_ignore_ascii_case(dir)))
    {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    let stem = lower.split('.').next().unwrap_or(&lower);
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("_spec")
        || lower.contains(".test.")
        || lower.contains(".spec.")
}

/// Lower-cased stem with test affixes removed, used to pair tests with sources.
pub fn normalized_stem(unit: &SourceUnit) -> String {
    let stem = unit.file_stem().to_ascii_lowercase();
    let stem = stem.strip_prefix("test_").unwrap_or(&stem);
    let stem = stem
        .strip_suffix("_test")
        .or_else(|| stem.strip_suffix("_spec"))
        .unwrap_or(stem);
    stem.to_string()
}

/// Test files indexed by normalised stem.
#[derive(Debug, Default)]
pub struct TestIndex<'a> {
    by_stem: BTreeMap<String, Vec<&'a SourceUnit>>,
}

impl<'a> TestIndex<'a> {
    pub fn build(units: &'a [SourceUnit], rules: &CoverageRules) -> Self {
        let mut by_stem: BTreeMap<String, Vec<&'a SourceUnit>> = BTreeMap::new();
        for unit in units.iter().filter(|u| is_test_file(&u.path, rules)) {
            by_stem.entry(normalized_stem(unit)).or_default().push(unit);
        }
        Self { by_stem }
    }

    /// Tests correlated with `unit`; a Rust file with inline tests is its own candidate.
    pub fn candidates(&self, unit: &'a SourceUnit) -> Vec<&'a SourceUnit> {
        let mut out = Vec::new();
        if unit.tree.as_ref().map(|t| t.has_inline_tests).unwrap_or(false) {
            out.push(unit);
        }
        if let Some(tests) = self.by_stem.get(&normalized_stem(unit)) {
            out.extend(tests.iter().copied().filter(|t| t.path != unit.path));
        }
        out
    }

    pub fn test_file_count(&self) -> usize {
        self.by_stem.values().map(Vec::len).sum()
    }
}

/// Whether `test` mentions `name`. A file that is its own test only counts
/// what its inline test items reference, never its own declarations.
fn exercises(test: &SourceUnit, unit: &SourceUnit, name: &str) -> bool {
    if test.path == unit.path {
        return test
            .tree
            .as_ref()
            .is_some_and(|tree| tree.inline_test_refs.contains(name));
    }
    mentions(&test.text, name)
}

/// Whole-word occurrence of `word` in `text`.
pub fn mentions(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    text.match_indices(word).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + word.len()..].chars().next();
        !before.map(is_word).unwrap_or(false) && !after.map(is_word).unwrap_or(false)
    })
}

/// Read-only inputs shared by every file's synthesis.
pub struct GapContext<'a> {
    pub unit: &'a SourceUnit,
    pub contracts: &'a ContractTable,
    pub tests: &'a TestIndex<'a>,
    pub rules: &'a CoverageRules,
    pub depth: AnalysisDepth,
}

impl GapContext<'_> {
    fn language(&self) -> Option<Language> {
        self.unit.language
    }

    fn is_test(&self) -> bool {
        is_test_file(&self.unit.path, self.rules)
    }
}

/// Run the synthesizer passes the depth enables, in a fixed order.
pub fn synthesize(ctx: &GapContext<'_>) -> Vec<Finding> {
    let mut findings = Vec::new();
    let file = ctx.unit.path.as_str();
    if ctx.depth.detects_stubs() {
        findings.extend(
            run_isolated("stub-detection", file, || detect_stubs(ctx)).unwrap_or_default(),
        );
        findings.extend(
            run_isolated("interface-coverage", file, || interface_coverage(ctx))
                .unwrap_or_default(),
        );
    }
    if ctx.depth.checks_test_coverage() {
        findings.extend(
            run_isolated("test-coverage", file, || test_coverage(ctx)).unwrap_or_default(),
        );
    }
    findings
}

fn describe_function(function: &Function, scope: Scope<'_>) -> String {
    match (function.form, scope.class) {
        (FunctionForm::Method, Some(class)) => format!("method `{}.{}`", class.name, function.name),
        (FunctionForm::Arrow, _) | (FunctionForm::Closure, _) => format!("`{}`", function.name),
        _ => format!("function `{}`", function.name),
    }
}

/// Top-level statement that unconditionally signals "not implemented".
fn not_implemented_throw(function: &Function) -> Option<u32> {
    function.body.as_ref()?.statements.iter().find_map(|stmt| match stmt {
        Node::Throw(throw) if throw.signals_not_implemented() => Some(throw.line),
        _ => None,
    })
}

fn is_minimal_class(class: &Class, language: Language) -> bool {
    if language == Language::Rust || class.kind != ClassKind::Class || class.has_supertype() {
        return false;
    }
    let mut methods = class.methods();
    matches!((methods.next(), methods.next()), (Some(only), None) if only.is_constructor())
        && class.members.len() == 1
}

pub fn detect_stubs(ctx: &GapContext<'_>) -> Vec<Finding> {
    let (Some(language), Some(tree)) = (ctx.language(), ctx.unit.tree.as_ref()) else {
        return Vec::new();
    };
    if ctx.is_test() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let file = ctx.unit.path.as_str();
    walk(&tree.nodes, &mut |node, scope| match node {
        Node::Function(function) => {
            if function.is_abstract || function.body.is_none() {
                return;
            }
            let what = describe_function(function, scope);
            if function.has_empty_body() {
                if function.is_constructor() && !function.params.is_empty() {
                    return;
                }
                out.push(
                    Finding::new(
                        file,
                        Some(function.line),
                        FindingKind::StubImplementation,
                        Severity::Medium,
                        format!("{what} is a stub with an empty body"),
                    )
                    .with_suggestion(Some(language), &format!("implement {what}")),
                );
            } else if not_implemented_throw(function).is_some() {
                out.push(
                    Finding::new(
                        file,
                        Some(function.line),
                        FindingKind::StubImplementation,
                        Severity::Medium,
                        format!("{what} is a stub that only signals it is not implemented"),
                    )
                    .with_suggestion(Some(language), &format!("implement {what}")),
                );
            }
        }
        Node::Class(class) if is_minimal_class(class, language) => {
            out.push(
                Finding::new(
                    file,
                    Some(class.line),
                    FindingKind::StubImplementation,
                    Severity::Medium,
                    format!("class `{}` is a stub that only defines a constructor", class.name),
                )
                .with_suggestion(
                    Some(language),
                    &format!(
                        "add the behaviour class `{}` is meant to provide",
                        class.name
                    ),
                ),
            );
        }
        _ => {}
    });
    out
}

fn contract_key(name: &str) -> &str {
    let name = name.split('<').next().unwrap_or(name).trim();
    name.rsplit(['.', ':']).next().unwrap_or(name)
}

pub fn interface_coverage(ctx: &GapContext<'_>) -> Vec<Finding> {
    let (Some(language), Some(tree)) = (ctx.language(), ctx.unit.tree.as_ref()) else {
        return Vec::new();
    };
    if ctx.contracts.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let file = ctx.unit.path.as_str();
    walk(&tree.nodes, &mut |node, _| {
        let Node::Class(class) = node else {
            return;
        };
        // Abstract bases refining another contract are contracts themselves.
        if tree.contracts.iter().any(|c| c.name == class.name) {
            return;
        }
        let defined: Vec<&str> = class.methods().map(|m| m.name.as_str()).collect();
        for claimed in class.implements.iter().chain(&class.extends) {
            let key = contract_key(claimed);
            let Some(contract) = ctx.contracts.get(key) else {
                continue;
            };
            for method in &contract.methods {
                if defined.contains(&method.name.as_str()) {
                    continue;
                }
                out.push(
                    Finding::new(
                        file,
                        Some(class.line),
                        FindingKind::MissingInterfaceMethod,
                        Severity::High,
                        format!(
                            "`{}` implements `{}` but does not define required method `{}`",
                            class.name, contract.name, method.name
                        ),
                    )
                    .with_suggestion(
                        Some(language),
                        &format!(
                            "implement `{}` on `{}` to satisfy `{}`",
                            method.name, class.name, contract.name
                        ),
                    ),
                );
            }
        }
    });
    out
}

fn coverage_exempt(unit: &SourceUnit, rules: &CoverageRules) -> bool {
    unit.path.ends_with(".d.ts")
        || rules
            .exempt_stems
            .iter()
            .any(|stem| stem.eq_ignore_ascii_case(unit.file_stem()))
}

pub fn test_coverage(ctx: &GapContext<'_>) -> Vec<Finding> {
    let unit = ctx.unit;
    let (Some(language), Some(tree)) = (unit.language, unit.tree.as_ref()) else {
        return Vec::new();
    };
    if ctx.is_test() || coverage_exempt(unit, ctx.rules) {
        return Vec::new();
    }
    let candidates = ctx.tests.candidates(unit);
    if candidates.is_empty() {
        return vec![Finding::new(
            unit.path.as_str(),
            None,
            FindingKind::MissingTestCoverage,
            Severity::Medium,
            format!("no test file covers `{}`", unit.path),
        )
        .with_suggestion(Some(language), &format!("add tests for `{}`", unit.file_stem()))];
    }
    tree.exports
        .iter()
        .filter(|export| !candidates.iter().any(|test| exercises(test, unit, &export.name)))
        .map(|export| {
            Finding::new(
                unit.path.as_str(),
                Some(export.line),
                FindingKind::MissingTestCoverage,
                Severity::Medium,
                format!("exported `{}` is never referenced by a test", export.name),
            )
            .with_suggestion(Some(language), &format!("add a test exercising `{}`", export.name))
        })
        .collect()
}
