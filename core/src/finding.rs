//! Finding model shared by every producer and by the report.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Languages the structural checks understand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    Rust,
    TypeScript,
    JavaScript,
    Python,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Rust,
        Language::TypeScript,
        Language::JavaScript,
        Language::Python,
    ];

    pub fn from_path(path: &Path) -> Option<Language> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Some(Language::Rust),
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "py" | "pyi" => Some(Language::Python),
            _ => None,
        }
    }

    pub fn line_comment(self) -> &'static str {
        match self {
            Language::Python => "#",
            Language::Rust | Language::TypeScript | Language::JavaScript => "//",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    MissingReturnContract,
    EmptyBody,
    WeakErrorHandling,
    IncompleteBranchCoverage,
    SuspiciousContractMismatch,
    StubImplementation,
    MissingInterfaceMethod,
    MissingTestCoverage,
    PreexistingMarker,
}

impl FindingKind {
    pub const ALL: [FindingKind; 9] = [
        FindingKind::MissingReturnContract,
        FindingKind::EmptyBody,
        FindingKind::WeakErrorHandling,
        FindingKind::IncompleteBranchCoverage,
        FindingKind::SuspiciousContractMismatch,
        FindingKind::StubImplementation,
        FindingKind::MissingInterfaceMethod,
        FindingKind::MissingTestCoverage,
        FindingKind::PreexistingMarker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::MissingReturnContract => "missing-return-contract",
            FindingKind::EmptyBody => "empty-body",
            FindingKind::WeakErrorHandling => "weak-error-handling",
            FindingKind::IncompleteBranchCoverage => "incomplete-branch-coverage",
            FindingKind::SuspiciousContractMismatch => "suspicious-contract-mismatch",
            FindingKind::StubImplementation => "stub-implementation",
            FindingKind::MissingInterfaceMethod => "missing-interface-method",
            FindingKind::MissingTestCoverage => "missing-test-coverage",
            FindingKind::PreexistingMarker => "preexisting-marker",
        }
    }

    pub fn parse(name: &str) -> Option<FindingKind> {
        let name = name.trim().to_ascii_lowercase().replace('_', "-");
        FindingKind::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity buckets. Declaration order is report order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected gap or pre-existing marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Project-relative path using `/` separators.
    pub file: String,
    /// 1-based line; absent for file-level findings.
    pub line: Option<u32>,
    pub description: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub suggested_annotation: Option<String>,
}

impl Finding {
    pub fn new(
        file: impl Into<String>,
        line: Option<u32>,
        kind: FindingKind,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        let description = description.into();
        let description = if description.trim().is_empty() {
            format!("{kind} finding")
        } else {
            description
        };
        Self {
            file: file.into(),
            line,
            description,
            kind,
            severity,
            suggested_annotation: None,
        }
    }

    /// Attach a ready-to-insert `TODO` comment in the file's comment syntax.
    pub fn with_suggestion(mut self, language: Option<Language>, text: &str) -> Self {
        let prefix = language.map(Language::line_comment).unwrap_or("//");
        self.suggested_annotation = Some(format!("{prefix} TODO: {text}"));
        self
    }

    /// Severity relabel used by reconciliation; the description never changes.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// `file:line`, or just `file` for file-level findings.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_their_names() {
        for kind in FindingKind::ALL {
            assert_eq!(FindingKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(
            FindingKind::parse("weak_error_handling"),
            Some(FindingKind::WeakErrorHandling)
        );
        assert_eq!(FindingKind::parse("nonsense"), None);
    }

    #[test]
    fn severity_orders_high_first() {
        let mut all = vec![Severity::Low, Severity::High, Severity::Medium];
        all.sort();
        assert_eq!(all, Severity::ALL.to_vec());
    }

    #[test]
    fn suggestion_uses_language_comment_syntax() {
        let py = Finding::new("a.py", Some(3), FindingKind::EmptyBody, Severity::Medium, "x")
            .with_suggestion(Some(Language::Python), "fill in");
        assert_eq!(py.suggested_annotation.as_deref(), Some("# TODO: fill in"));
        let ts = Finding::new("a.ts", None, FindingKind::EmptyBody, Severity::Medium, "x")
            .with_suggestion(Some(Language::TypeScript), "fill in");
        assert_eq!(ts.suggested_annotation.as_deref(), Some("// TODO: fill in"));
        assert_eq!(ts.location(), "a.ts");
    }

    #[test]
    fn language_detection_by_extension() {
        assert_eq!(Language::from_path(Path::new("x/y.tsx")), Some(Language::TypeScript));
        assert_eq!(Language::from_path(Path::new("y.PY")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("y.go")), None);
    }
}
