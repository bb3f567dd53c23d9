//! Scan orchestration: load, scan, synthesize and reconcile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::files::{self, CandidateFile, SourceUnit};
use crate::finding::{Finding, FindingKind, Severity};
use crate::gaps::{self, ContractTable, GapContext, TestIndex};
use crate::markers::{Marker, MarkerScanner};
use crate::patterns::{self, run_isolated, CheckContext, ClosedTypeTable};
use crate::reconcile::Reconciler;
use crate::{AnalysisDepth, Config};

pub use crate::files::SkippedFile;

/// Counts shown at the top of every report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub files_enumerated: usize,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub markers: usize,
    pub missing: usize,
    /// Generated findings an existing marker already covers.
    pub suppressed: usize,
    pub by_kind: BTreeMap<FindingKind, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Everything one scan produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub root: String,
    pub depth: AnalysisDepth,
    /// Existing markers and missing findings, severity-grouped.
    pub findings: Vec<Finding>,
    /// Generated findings no existing marker covers.
    pub missing: Vec<Finding>,
    pub markers: Vec<Marker>,
    pub skipped: Vec<SkippedFile>,
    pub summary: ScanSummary,
}

impl ScanOutcome {
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }
}

struct Inner {
    config: Config,
    markers: MarkerScanner,
}

/// Compiled engine. Cheap to clone; each scan is independent.
#[derive(Clone)]
pub struct Analyzer {
    inner: Arc<Inner>,
}

impl Analyzer {
    /// Compile every configurable matcher; bad patterns are fatal here, never mid-scan.
    pub fn new(config: Config) -> Result<Self, ScanError> {
        files::build_ignore_set(&config.filter.ignore_globs)?;
        if !(0.0..=1.0).contains(&config.dedup.min_overlap_ratio) {
            return Err(ScanError::InvalidConfig(format!(
                "dedup.min_overlap_ratio must be within 0..=1, got {}",
                config.dedup.min_overlap_ratio
            )));
        }
        if config.parallelism == Some(0) {
            return Err(ScanError::InvalidConfig("parallelism must be at least 1".into()));
        }
        let markers = MarkerScanner::new(&config.markers)?;
        Ok(Self {
            inner: Arc::new(Inner { config, markers }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Enumerate `root` with the configured filter policy and analyze the result.
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome, ScanError> {
        let started = Instant::now();
        let enumeration = files::enumerate(root, &self.inner.config.filter)?;
        tracing::debug!(
            files = enumeration.files.len(),
            skipped = enumeration.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "enumerated candidate files"
        );
        self.bounded(root, enumeration.files, enumeration.skipped)
    }

    /// Analyze caller-enumerated files. `root` is only used for display and errors.
    pub fn analyze(
        &self,
        root: &Path,
        files: Vec<CandidateFile>,
    ) -> Result<ScanOutcome, ScanError> {
        self.bounded(root, files, Vec::new())
    }

    fn bounded(
        &self,
        root: &Path,
        files: Vec<CandidateFile>,
        skipped: Vec<SkippedFile>,
    ) -> Result<ScanOutcome, ScanError> {
        let Some(limit) = self.inner.config.timeout_secs.map(Duration::from_secs) else {
            return self.inner.run(root, files, skipped, &AtomicBool::new(false));
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let flag = Arc::clone(&cancel);
        let root_buf = root.to_path_buf();
        std::thread::Builder::new()
            .name("gapscan-scan".into())
            .spawn(move || {
                // The receiver is gone after a timeout; the late result is dropped.
                let _ = tx.send(inner.run(&root_buf, files, skipped, &flag));
            })
            .map_err(|err| ScanError::WorkerPool(err.to_string()))?;

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Relaxed);
                tracing::warn!(
                    timeout_secs = limit.as_secs(),
                    "scan timed out; discarding partial results"
                );
                Err(ScanError::TimedOut(limit))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ScanError::WorkerPool(
                "scan thread exited without a result".into(),
            )),
        }
    }
}

enum Loaded {
    Unit(SourceUnit, Vec<Marker>),
    Skipped(SkippedFile),
    Cancelled,
}

impl Inner {
    fn run(
        &self,
        root: &Path,
        files: Vec<CandidateFile>,
        mut skipped: Vec<SkippedFile>,
        cancel: &AtomicBool,
    ) -> Result<ScanOutcome, ScanError> {
        let config = &self.config;
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|idx| format!("gapscan-worker-{idx}"));
        if let Some(threads) = config.parallelism {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|err| ScanError::WorkerPool(err.to_string()))?;
        let timed_out =
            || ScanError::TimedOut(Duration::from_secs(config.timeout_secs.unwrap_or(0)));

        let enumerated = files.len();
        let started = Instant::now();
        let loaded: Vec<Loaded> = pool.install(|| {
            files
                .par_iter()
                .map(|candidate| self.load(candidate, cancel))
                .collect()
        });
        let mut units = Vec::with_capacity(loaded.len());
        let mut markers = Vec::new();
        for item in loaded {
            match item {
                Loaded::Unit(unit, found) => {
                    units.push(unit);
                    markers.extend(found);
                }
                Loaded::Skipped(skip) => skipped.push(skip),
                Loaded::Cancelled => return Err(timed_out()),
            }
        }
        tracing::debug!(
            units = units.len(),
            markers = markers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded and parsed files"
        );
        if units.is_empty() {
            return Err(ScanError::NoReadableFiles(root.to_path_buf()));
        }

        let started = Instant::now();
        let closed_types = ClosedTypeTable::build(units.iter().filter_map(|u| u.tree.as_ref()));
        let contracts = ContractTable::build(
            units
                .iter()
                .filter_map(|u| u.tree.as_ref().map(|tree| (u.path.as_str(), tree))),
        );
        let tests = TestIndex::build(&units, &config.coverage);
        tracing::debug!(
            closed_types = closed_types.len(),
            contracts = contracts.len(),
            test_files = tests.test_file_count(),
            "built scan tables"
        );

        let produced: Vec<Option<Vec<Finding>>> = pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    if cancel.load(Ordering::Relaxed) {
                        return None;
                    }
                    let mut found = Vec::new();
                    if let Some(ctx) =
                        CheckContext::for_unit(unit, &closed_types, &config.contracts)
                    {
                        found.extend(patterns::scan(&ctx));
                    }
                    found.extend(gaps::synthesize(&GapContext {
                        unit,
                        contracts: &contracts,
                        tests: &tests,
                        rules: &config.coverage,
                        depth: config.depth,
                    }));
                    Some(found)
                })
                .collect()
        });
        let mut generated = Vec::new();
        for found in produced {
            generated.extend(found.ok_or_else(timed_out)?);
        }
        tracing::debug!(
            generated = generated.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ran structural checks and gap synthesis"
        );
        if cancel.load(Ordering::Relaxed) {
            return Err(timed_out());
        }

        let file_order: Vec<String> = units.iter().map(|u| u.path.clone()).collect();
        let files_analyzed = units.len();
        let reconciled = Reconciler::new(config.dedup, &config.severity_overrides, &file_order)
            .reconcile(&markers, &generated);

        let mut by_kind = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for finding in &reconciled.findings {
            *by_kind.entry(finding.kind).or_insert(0) += 1;
            *by_severity.entry(finding.severity).or_insert(0) += 1;
        }
        let summary = ScanSummary {
            files_enumerated: enumerated,
            files_analyzed,
            files_skipped: skipped.len(),
            markers: reconciled.markers.len(),
            missing: reconciled.missing.len(),
            suppressed: reconciled.suppressed,
            by_kind,
            by_severity,
        };
        tracing::debug!(
            findings = reconciled.findings.len(),
            missing = summary.missing,
            suppressed = summary.suppressed,
            "reconciled findings"
        );

        Ok(ScanOutcome {
            root: display_root(root),
            depth: config.depth,
            findings: reconciled.findings,
            missing: reconciled.missing,
            markers: reconciled.markers,
            skipped,
            summary,
        })
    }

    fn load(&self, candidate: &CandidateFile, cancel: &AtomicBool) -> Loaded {
        if cancel.load(Ordering::Relaxed) {
            return Loaded::Cancelled;
        }
        let loaded = run_isolated("parse", &candidate.rel, || SourceUnit::load(candidate));
        let mut unit = match loaded {
            Some(Ok(unit)) => unit,
            Some(Err(skip)) => return Loaded::Skipped(skip),
            None => {
                return Loaded::Skipped(SkippedFile {
                    file: candidate.rel.clone(),
                    reason: "internal error while parsing".into(),
                })
            }
        };
        if let Some(language) = unit.language {
            if !self.config.languages.contains(&language) {
                unit.tree = None;
            }
        }
        let markers = run_isolated("annotation-scan", &unit.path, || {
            self.markers.scan(&unit.path, &unit.extension, &unit.text)
        })
        .unwrap_or_default();
        Loaded::Unit(unit, markers)
    }
}

fn display_root(root: &Path) -> String {
    let shown: PathBuf = root.components().collect();
    shown.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(files: Vec<CandidateFile>, config: Config) -> ScanOutcome {
        Analyzer::new(config)
            .unwrap()
            .analyze(Path::new("project"), files)
            .unwrap()
    }

    #[test]
    fn invalid_patterns_fail_at_construction() {
        let mut config = Config::default();
        config.markers.reference_pattern = "(unclosed".into();
        assert!(matches!(Analyzer::new(config), Err(ScanError::InvalidConfig(_))));

        let mut config = Config::default();
        config.filter.ignore_globs = vec!["[".into()];
        assert!(matches!(Analyzer::new(config), Err(ScanError::InvalidConfig(_))));

        let mut config = Config::default();
        config.dedup.min_overlap_ratio = 1.5;
        assert!(matches!(Analyzer::new(config), Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn no_candidates_is_fatal() {
        let analyzer = Analyzer::new(Config::default()).unwrap();
        let err = analyzer.analyze(Path::new("empty"), Vec::new()).unwrap_err();
        assert!(matches!(err, ScanError::NoReadableFiles(_)));
    }

    #[test]
    fn unreadable_files_are_skipped_not_fatal() {
        let files = vec![
            CandidateFile::on_disk(PathBuf::from("/no/such/file.ts"), "gone.ts".into()),
            CandidateFile::in_memory("ok.ts", "// TODO: wire up retries\nexport const x = 1;\n"),
        ];
        let outcome = analyze(files, Config::default());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].file, "gone.ts");
        assert_eq!(outcome.summary.files_analyzed, 1);
        assert_eq!(outcome.markers.len(), 1);
    }

    #[test]
    fn summary_counts_match_findings() {
        let files = vec![
            CandidateFile::in_memory(
                "a.ts",
                "function run() {\n  try {\n    go();\n  } catch (e) {\n  }\n}\n",
            ),
            CandidateFile::in_memory(
                "b.py",
                "# FIXME: crash on empty input\ndef noop():\n    pass\n",
            ),
        ];
        let outcome = analyze(files, Config::default());
        let total: usize = outcome.summary.by_severity.values().sum();
        assert_eq!(total, outcome.findings.len());
        assert_eq!(outcome.summary.by_kind.get(&FindingKind::PreexistingMarker), Some(&1));
        assert_eq!(outcome.summary.by_kind.get(&FindingKind::WeakErrorHandling), Some(&1));
        assert_eq!(outcome.findings[0].severity, Severity::High);
    }

    #[test]
    fn languages_outside_the_allow_list_get_markers_only() {
        let config = Config {
            languages: vec![crate::Language::Python],
            ..Config::default()
        };
        let files = vec![CandidateFile::in_memory(
            "a.ts",
            "// TODO: add caching\nfunction f() {\n}\n",
        )];
        let outcome = analyze(files, config);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].kind, FindingKind::PreexistingMarker);
    }

    #[test]
    fn parallelism_does_not_change_results() {
        let files: Vec<CandidateFile> = (0..12)
            .map(|i| {
                CandidateFile::in_memory(
                    format!("m{i:02}.js"),
                    format!("function f{i}() {{}}\n// TODO: item {i}\n"),
                )
            })
            .collect();
        let one = analyze(files.clone(), Config { parallelism: Some(1), ..Config::default() });
        let many = analyze(files, Config { parallelism: Some(4), ..Config::default() });
        assert_eq!(one.findings, many.findings);
        assert_eq!(one.summary, many.summary);
    }

    #[test]
    fn zero_timeout_fails_closed() {
        let files: Vec<CandidateFile> = (0..200)
            .map(|i| {
                CandidateFile::in_memory(
                    format!("f{i:03}.ts"),
                    "function f(a: number): string {\n  return null;\n}\n",
                )
            })
            .collect();
        let analyzer = Analyzer::new(Config {
            timeout_secs: Some(0),
            ..Config::default()
        })
        .unwrap();
        let err = analyzer.analyze(Path::new("project"), files).unwrap_err();
        assert!(matches!(err, ScanError::TimedOut(_)));
    }
}
