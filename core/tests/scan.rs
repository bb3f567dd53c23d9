use std::fs;
use std::path::Path;

use gapscan_core::{
    report, AnalysisDepth, Analyzer, Config, Finding, FindingKind, ScanOutcome, Severity,
};

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn scan_with(cfg: Config, files: &[(&str, &str)]) -> ScanOutcome {
    let dir = tempfile::tempdir().unwrap();
    for (rel, contents) in files {
        write(dir.path(), rel, contents);
    }
    Analyzer::new(cfg).unwrap().scan(dir.path()).unwrap()
}

fn scan(files: &[(&str, &str)]) -> ScanOutcome {
    scan_with(Config::default(), files)
}

fn of_kind(outcome: &ScanOutcome, kind: FindingKind) -> Vec<&Finding> {
    outcome.missing.iter().filter(|f| f.kind == kind).collect()
}

#[test]
fn empty_catch_yields_one_high_finding_at_the_catch() {
    let outcome = scan(&[(
        "src/run.ts",
        "export function run(): void {\n  try {\n    go();\n  } catch (e) {\n  }\n}\n",
    )]);
    let weak = of_kind(&outcome, FindingKind::WeakErrorHandling);
    assert_eq!(weak.len(), 1, "{:#?}", outcome.missing);
    assert_eq!(weak[0].severity, Severity::High);
    assert_eq!(weak[0].line, Some(4));
    assert!(weak[0].suggested_annotation.as_deref().unwrap_or("").starts_with("// TODO:"));
}

#[test]
fn empty_function_is_reported_once_as_a_stub() {
    let outcome = scan(&[("src/load.js", "function load() { }\n")]);
    let stubs = of_kind(&outcome, FindingKind::StubImplementation);
    assert_eq!(stubs.len(), 1);
    assert!(stubs[0].description.contains("load"));
    assert!(of_kind(&outcome, FindingKind::EmptyBody).is_empty());
}

#[test]
fn implementer_missing_a_contract_method() {
    let outcome = scan(&[
        ("src/store.ts", "export interface Store {\n  a(): void;\n  b(): void;\n}\n"),
        (
            "src/mem.ts",
            "import { Store } from './store';\n\nexport class Mem implements Store {\n  a(): void {\n    flush();\n  }\n}\n",
        ),
    ]);
    let missing = of_kind(&outcome, FindingKind::MissingInterfaceMethod);
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::High);
    assert_eq!(missing[0].file, "src/mem.ts");
    assert!(missing[0].description.contains("`b`"));
}

#[test]
fn untested_file_gets_only_a_file_level_finding() {
    let cfg = Config {
        depth: AnalysisDepth::Deep,
        ..Config::default()
    };
    let outcome = scan_with(
        cfg,
        &[(
            "pkg/foo.py",
            "def first():\n    return 1\n\n\ndef second():\n    return 2\n",
        )],
    );
    let coverage = of_kind(&outcome, FindingKind::MissingTestCoverage);
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[0].line, None);
    assert_eq!(coverage[0].severity, Severity::Medium);
}

#[test]
fn correlated_test_file_leaves_only_unreferenced_exports() {
    let cfg = Config {
        depth: AnalysisDepth::Deep,
        ..Config::default()
    };
    let outcome = scan_with(
        cfg,
        &[
            (
                "pkg/foo.py",
                "def first():\n    return 1\n\n\ndef second():\n    return 2\n",
            ),
            (
                "pkg/test_foo.py",
                "from pkg.foo import first\n\n\ndef test_first():\n    assert first() == 1\n",
            ),
        ],
    );
    let coverage = of_kind(&outcome, FindingKind::MissingTestCoverage);
    assert_eq!(coverage.len(), 1, "{:#?}", coverage);
    assert_eq!(coverage[0].file, "pkg/foo.py");
    assert_eq!(coverage[0].line, Some(5));
    assert!(coverage[0].description.contains("`second`"));
}

#[test]
fn rust_inline_tests_cover_only_what_they_call() {
    let cfg = Config {
        depth: AnalysisDepth::Deep,
        ..Config::default()
    };
    let src = concat!(
        "pub fn alpha() -> u8 {\n",
        "    1\n",
        "}\n",
        "\n",
        "pub fn beta() -> u8 {\n",
        "    2\n",
        "}\n",
        "\n",
        "#[cfg(test)]\n",
        "mod tests {\n",
        "    #[test]\n",
        "    fn alpha_is_one() {\n",
        "        assert_eq!(super::alpha(), 1);\n",
        "    }\n",
        "}\n",
    );
    let outcome = scan_with(cfg, &[("src/pair.rs", src)]);
    let coverage = of_kind(&outcome, FindingKind::MissingTestCoverage);
    assert_eq!(coverage.len(), 1, "{:#?}", coverage);
    assert_eq!(coverage[0].line, Some(5));
    assert!(coverage[0].description.contains("`beta`"));
}

#[test]
fn marker_lines_survive_multiline_strings() {
    let outcome = scan(&[
        (
            "src/banner.rs",
            "pub fn banner() -> &'static str {\n    \"a\\\n     b\"\n}\n// TODO: fix this later\n",
        ),
        (
            "src/banner.ts",
            "export const msg = `first\nsecond`;\n// TODO: trim the banner text\n",
        ),
    ]);
    let lines: Vec<(&str, u32)> = outcome
        .markers
        .iter()
        .map(|m| (m.file.as_str(), m.line))
        .collect();
    assert_eq!(lines, vec![("src/banner.rs", 5), ("src/banner.ts", 3)]);
}

#[test]
fn standard_depth_does_not_check_tests() {
    let outcome = scan(&[("pkg/foo.py", "def first():\n    return 1\n")]);
    assert!(of_kind(&outcome, FindingKind::MissingTestCoverage).is_empty());
}

#[test]
fn existing_marker_suppresses_the_matching_finding() {
    let outcome = scan(&[(
        "src/loader.js",
        "// TODO: implement the loader stub\nfunction loader() {}\n",
    )]);
    assert!(of_kind(&outcome, FindingKind::StubImplementation).is_empty());
    assert_eq!(outcome.markers.len(), 1);
    assert_eq!(outcome.summary.markers, 1);
    assert_eq!(outcome.summary.suppressed, 1);
    assert!(outcome
        .findings
        .iter()
        .any(|f| f.kind == FindingKind::PreexistingMarker));
}

#[test]
fn unrelated_marker_in_the_same_file_does_not_suppress() {
    let outcome = scan(&[(
        "src/loader.js",
        "// TODO: support pagination options\nfunction loader() {}\n",
    )]);
    assert_eq!(outcome.markers.len(), 1);
    assert_eq!(outcome.summary.suppressed, 0);
    let stubs = of_kind(&outcome, FindingKind::StubImplementation);
    assert_eq!(stubs.len(), 1);
    assert_eq!(stubs[0].line, Some(2));
}

#[test]
fn markers_in_other_files_do_not_suppress() {
    let outcome = scan(&[
        ("src/a.js", "// TODO: implement the loader stub\nexport const a = 1;\n"),
        ("src/b.js", "function loader() {}\n"),
    ]);
    assert_eq!(of_kind(&outcome, FindingKind::StubImplementation).len(), 1);
}

#[test]
fn closed_branch_completeness() {
    let partial = concat!(
        "enum Level { Low, Mid, High }\n",
        "\n",
        "export function weight(level: Level): number {\n",
        "  switch (level) {\n",
        "    case Level.Low:\n",
        "      return 1;\n",
        "  }\n",
        "  return 0;\n",
        "}\n",
    );
    let outcome = scan(&[("src/level.ts", partial)]);
    let branches = of_kind(&outcome, FindingKind::IncompleteBranchCoverage);
    assert_eq!(branches.len(), 1);
    assert!(branches[0].description.contains("Level.Mid"));
    assert!(branches[0].description.contains("Level.High"));

    let complete = partial.replace(
        "      return 1;\n",
        "      return 1;\n    default:\n      return 2;\n",
    );
    let outcome = scan(&[("src/level.ts", &complete)]);
    assert!(of_kind(&outcome, FindingKind::IncompleteBranchCoverage).is_empty());
}

#[test]
fn one_return_contract_finding_per_absent_return() {
    let outcome = scan(&[(
        "svc/names.py",
        "def lookup(key: str) -> str:\n    if not key:\n        return None\n    if key == 'x':\n        return None\n    return key.upper()\n",
    )]);
    let contracts = of_kind(&outcome, FindingKind::MissingReturnContract);
    assert_eq!(contracts.len(), 2);
    assert_eq!(contracts[0].line, Some(3));
    assert_eq!(contracts[1].line, Some(5));
}

#[test]
fn malformed_files_do_not_abort_the_scan() {
    let outcome = scan(&[
        (
            "src/broken.ts",
            "// TODO: finish the parser rewrite\nfunction broken( {\n  let = ;\n",
        ),
        (
            "src/fine.ts",
            "export function fine(): void {\n  try {\n    go();\n  } catch (e) {}\n}\n",
        ),
    ]);
    assert_eq!(outcome.summary.files_analyzed, 2);
    assert!(outcome.markers.iter().any(|m| m.file == "src/broken.ts"));
    assert_eq!(of_kind(&outcome, FindingKind::WeakErrorHandling).len(), 1);
}

#[test]
fn markers_in_languages_without_structural_support() {
    let outcome = scan(&[(
        "cmd/pool.go",
        "package pool\n\n// FIXME: leak in connection pool\nfunc Get() {}\n",
    )]);
    assert_eq!(outcome.markers.len(), 1);
    assert_eq!(outcome.markers[0].severity, Severity::High);
    assert_eq!(outcome.markers[0].line, 3);
    assert!(outcome.missing.is_empty());
}

#[test]
fn high_findings_lead_the_report() {
    let outcome = scan(&[
        ("a/first.ts", "function noop() {}\n"),
        ("b/second.ts", "function run() {\n  try {\n    go();\n  } catch (e) {\n  }\n}\n"),
    ]);
    let severities: Vec<Severity> = outcome.findings.iter().map(|f| f.severity).collect();
    let mut sorted = severities.clone();
    sorted.sort();
    assert_eq!(severities, sorted);
    assert_eq!(outcome.findings[0].file, "b/second.ts");
}

#[test]
fn repeated_scans_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/a.ts",
        "// TODO: cache lookups\nexport function find(id: string): string {\n  return null;\n}\n",
    );
    write(
        dir.path(),
        "src/b.py",
        "def validate_user(u):\n    check(u)\n    return True\n",
    );
    write(
        dir.path(),
        "src/c.rs",
        concat!(
            "pub enum Dir { N, S }\n",
            "pub fn turn(d: Dir) -> u8 {\n",
            "    match d {\n",
            "        Dir::N => 1,\n",
            "    }\n",
            "}\n",
        ),
    );
    let analyzer = Analyzer::new(Config::default()).unwrap();
    let first = analyzer.scan(dir.path()).unwrap();
    let second = analyzer.scan(dir.path()).unwrap();
    assert_eq!(first.findings, second.findings);
    assert_eq!(report::render_markdown(&first), report::render_markdown(&second));
    assert!(!first.missing.is_empty());
}

#[test]
fn missing_root_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = Analyzer::new(Config::default())
        .unwrap()
        .scan(&dir.path().join("absent"))
        .unwrap_err();
    assert!(matches!(err, gapscan_core::ScanError::RootNotFound(_)));
}

#[test]
fn tree_without_source_files_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "README.md", "# nothing to scan\n");
    let err = Analyzer::new(Config::default())
        .unwrap()
        .scan(dir.path())
        .unwrap_err();
    assert!(matches!(err, gapscan_core::ScanError::NoReadableFiles(_)));
}
