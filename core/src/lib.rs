//! gapscan core: implementation-gap detection engine.
//! Scans a source tree, lowers each file into a small structural model,
//! flags unfinished or suspicious code, reconciles the result with the TODO
//! markers developers already left behind and renders a severity-grouped
//! report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod engine;
pub mod error;
pub mod files;
pub mod finding;
pub mod gaps;
pub mod markers;
pub mod patterns;
pub mod reconcile;
pub mod report;
pub mod syntax;

pub use engine::{Analyzer, ScanOutcome, ScanSummary, SkippedFile};
pub use error::ScanError;
pub use files::{CandidateFile, SourceUnit};
pub use finding::{Finding, FindingKind, Language, Severity};
pub use reconcile::{DedupPolicy, Reconciled};

/// How much of the engine runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisDepth {
    /// Existing markers and structural patterns only.
    Basic,
    /// Adds stub detection and interface coverage.
    #[default]
    Standard,
    /// Adds test-coverage gaps.
    Deep,
}

impl AnalysisDepth {
    pub fn detects_stubs(self) -> bool {
        !matches!(self, AnalysisDepth::Basic)
    }

    pub fn checks_test_coverage(self) -> bool {
        matches!(self, AnalysisDepth::Deep)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisDepth::Basic => "basic",
            AnalysisDepth::Standard => "standard",
            AnalysisDepth::Deep => "deep",
        }
    }
}

/// Which files the enumerator hands to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPolicy {
    pub extensions: Vec<String>,
    pub max_file_kb: Option<u64>,
    pub exclude_dirs: Vec<String>,
    pub include_hidden: bool,
    pub ignore_globs: Vec<String>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            extensions: vec![
                "rs".into(),
                "ts".into(),
                "tsx".into(),
                "mts".into(),
                "cts".into(),
                "js".into(),
                "jsx".into(),
                "mjs".into(),
                "cjs".into(),
                "py".into(),
                "pyi".into(),
                "go".into(),
                "java".into(),
                "kt".into(),
                "rb".into(),
                "sh".into(),
                "c".into(),
                "h".into(),
                "cpp".into(),
                "hpp".into(),
                "cs".into(),
                "swift".into(),
                "php".into(),
            ],
            max_file_kb: Some(512),
            exclude_dirs: vec![
                "node_modules".into(),
                "target".into(),
                "dist".into(),
                "build".into(),
                "vendor".into(),
                "third_party".into(),
                "__pycache__".into(),
                ".git".into(),
                ".venv".into(),
                "venv".into(),
                "coverage".into(),
                "out".into(),
            ],
            include_hidden: false,
            ignore_globs: vec!["**/*.min.*".into(), "**/*.generated.*".into()],
        }
    }
}

/// Work-item marker recognition and severity keywords.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerRules {
    pub labels: Vec<String>,
    pub high_keywords: Vec<String>,
    pub low_keywords: Vec<String>,
    pub reference_pattern: String,
}

impl Default for MarkerRules {
    fn default() -> Self {
        Self {
            labels: vec![
                "TODO".into(),
                "FIXME".into(),
                "HACK".into(),
                "XXX".into(),
                "BUG".into(),
                "OPTIMIZE".into(),
                "WORKAROUND".into(),
                "KLUDGE".into(),
                "WIP".into(),
            ],
            high_keywords: vec![
                "crash".into(),
                "security".into(),
                "vulnerab".into(),
                "fix".into(),
                "bug".into(),
                "broken".into(),
                "leak".into(),
                "critical".into(),
                "urgent".into(),
                "data loss".into(),
                "race".into(),
                "deadlock".into(),
                "panic".into(),
                "exploit".into(),
            ],
            low_keywords: vec![
                "polish".into(),
                "cleanup".into(),
                "clean up".into(),
                "refactor".into(),
                "enhance".into(),
                "improve".into(),
                "nice to have".into(),
                "nice-to-have".into(),
                "optimiz".into(),
                "cosmetic".into(),
                "someday".into(),
                "rename".into(),
                "tidy".into(),
            ],
            reference_pattern:
                r"(?:github\.com/[\w.-]+/[\w.-]+/issues/\d+|\b[A-Z][A-Z0-9]{1,9}-\d+\b|#\d+\b)"
                    .into(),
        }
    }
}

/// Name- and call-based heuristics used by the structural checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractRules {
    /// Function-name prefixes that imply a pass/fail predicate.
    pub predicate_prefixes: Vec<String>,
    /// Call receivers treated as diagnostic output (`console.error(..)`).
    pub log_receivers: Vec<String>,
    /// Final call segments treated as diagnostic output (`self.log(..)`).
    pub log_methods: Vec<String>,
}

impl Default for ContractRules {
    fn default() -> Self {
        Self {
            predicate_prefixes: vec![
                "validate".into(),
                "verify".into(),
                "is_valid".into(),
                "isValid".into(),
                "check_valid".into(),
            ],
            log_receivers: vec![
                "console".into(),
                "logger".into(),
                "logging".into(),
                "log".into(),
                "traceback".into(),
                "print".into(),
                "System.out".into(),
                "System.err".into(),
            ],
            log_methods: vec![
                "log".into(),
                "debug".into(),
                "info".into(),
                "warn".into(),
                "warning".into(),
                "error".into(),
                "exception".into(),
                "trace".into(),
                "print_exc".into(),
                "print".into(),
                "println".into(),
                "eprintln".into(),
            ],
        }
    }
}

/// Test-file recognition for the coverage gap check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageRules {
    pub test_dirs: Vec<String>,
    pub exempt_stems: Vec<String>,
}

impl Default for CoverageRules {
    fn default() -> Self {
        Self {
            test_dirs: vec![
                "tests".into(),
                "test".into(),
                "__tests__".into(),
                "spec".into(),
            ],
            exempt_stems: vec![
                "__init__".into(),
                "index".into(),
                "main".into(),
                "mod".into(),
                "lib".into(),
                "setup".into(),
                "conftest".into(),
            ],
        }
    }
}

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterPolicy,
    pub depth: AnalysisDepth,
    /// Languages that receive structural checks; others get marker scanning only.
    pub languages: Vec<Language>,
    pub markers: MarkerRules,
    pub contracts: ContractRules,
    pub coverage: CoverageRules,
    pub dedup: DedupPolicy,
    pub severity_overrides: BTreeMap<FindingKind, Severity>,
    pub parallelism: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter: FilterPolicy::default(),
            depth: AnalysisDepth::default(),
            languages: Language::ALL.to_vec(),
            markers: MarkerRules::default(),
            contracts: ContractRules::default(),
            coverage: CoverageRules::default(),
            dedup: DedupPolicy::default(),
            severity_overrides: BTreeMap::new(),
            parallelism: None,
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Parse a (possibly partial) YAML configuration; missing keys keep defaults.
    pub fn from_yaml_str(text: &str) -> Result<Config, ScanError> {
        if text.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}
