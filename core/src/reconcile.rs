//! Reconciliation: merge markers with generated findings, drop what a human
//! already annotated, relabel severities and fix the final order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::finding::{Finding, FindingKind, Severity};
use crate::markers::Marker;

/// Named thresholds for "same issue" text matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupPolicy {
    /// Shared key phrases that make two descriptions the same issue.
    pub min_shared_phrases: usize,
    /// Shared phrases over the smaller phrase set.
    pub min_overlap_ratio: f64,
    /// Minimum characters for a word to count as a key phrase.
    pub min_phrase_chars: usize,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            min_shared_phrases: 2,
            min_overlap_ratio: 0.3,
            min_phrase_chars: 5,
        }
    }
}

impl DedupPolicy {
    /// Lower-cased words of at least `min_phrase_chars` characters.
    pub fn key_phrases(&self, text: &str) -> BTreeSet<String> {
        text.unicode_words()
            .filter(|word| word.chars().count() >= self.min_phrase_chars)
            .map(str::to_lowercase)
            .collect()
    }

    /// Whether two descriptions name the same issue. Symmetric and pure.
    pub fn matches(&self, a: &str, b: &str) -> bool {
        let a_lower = a.trim().to_lowercase();
        let b_lower = b.trim().to_lowercase();
        if !a_lower.is_empty()
            && !b_lower.is_empty()
            && (a_lower.contains(&b_lower) || b_lower.contains(&a_lower))
        {
            return true;
        }
        let a_phrases = self.key_phrases(a);
        let b_phrases = self.key_phrases(b);
        let shared = a_phrases.intersection(&b_phrases).count();
        if shared == 0 {
            return false;
        }
        if shared >= self.min_shared_phrases {
            return true;
        }
        let smaller = a_phrases.len().min(b_phrases.len());
        smaller > 0 && shared as f64 / smaller as f64 >= self.min_overlap_ratio
    }
}

/// Final result of reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reconciled {
    /// Existing markers plus missing findings, in report order.
    pub findings: Vec<Finding>,
    /// Generated findings no existing marker covers, in report order.
    pub missing: Vec<Finding>,
    /// Every existing marker, in discovery order.
    pub markers: Vec<Marker>,
    /// Generated findings dropped because a marker already covers them.
    pub suppressed: usize,
}

/// Merges marker and generated streams deterministically.
pub struct Reconciler<'a> {
    policy: DedupPolicy,
    overrides: &'a BTreeMap<FindingKind, Severity>,
    file_rank: HashMap<&'a str, usize>,
}

impl<'a> Reconciler<'a> {
    /// `file_order` is the enumeration order used to rank findings within a severity.
    pub fn new(
        policy: DedupPolicy,
        overrides: &'a BTreeMap<FindingKind, Severity>,
        file_order: &'a [String],
    ) -> Self {
        let file_rank = file_order
            .iter()
            .enumerate()
            .map(|(rank, file)| (file.as_str(), rank))
            .collect();
        Self {
            policy,
            overrides,
            file_rank,
        }
    }

    /// `generated` is the structural and synthesizer output in discovery order.
    pub fn reconcile(&self, markers: &[Marker], generated: &[Finding]) -> Reconciled {
        let mut by_file: HashMap<&str, Vec<&Marker>> = HashMap::new();
        for marker in markers {
            by_file.entry(marker.file.as_str()).or_default().push(marker);
        }

        let collapsed = collapse_same_construct(generated);
        let mut suppressed = 0;
        let mut missing = Vec::new();
        for finding in collapsed {
            let covered = by_file
                .get(finding.file.as_str())
                .map(|file_markers| {
                    file_markers
                        .iter()
                        .any(|marker| self.policy.matches(&marker.text, &finding.description))
                })
                .unwrap_or(false);
            if covered {
                suppressed += 1;
                continue;
            }
            missing.push(self.relabel(finding.clone()));
        }

        let marker_findings: Vec<Finding> = markers
            .iter()
            .map(|marker| self.relabel(marker.to_finding()))
            .collect();

        let mut findings: Vec<Finding> = marker_findings
            .into_iter()
            .chain(missing.iter().cloned())
            .collect();
        self.order(&mut findings);
        self.order(&mut missing);

        Reconciled {
            findings,
            missing,
            markers: markers.to_vec(),
            suppressed,
        }
    }

    fn relabel(&self, finding: Finding) -> Finding {
        match self.overrides.get(&finding.kind) {
            Some(&severity) => finding.with_severity(severity),
            None => finding,
        }
    }

    /// Severity, then file rank, then the incoming sequence (stable sort).
    fn order(&self, findings: &mut [Finding]) {
        findings.sort_by_key(|finding| {
            (
                finding.severity,
                self.file_rank
                    .get(finding.file.as_str())
                    .copied()
                    .unwrap_or(usize::MAX),
            )
        });
    }
}

/// Drop exact duplicates, and empty-body findings sitting on the same line as a stub.
fn collapse_same_construct(generated: &[Finding]) -> Vec<&Finding> {
    let stub_lines: BTreeSet<(&str, u32)> = generated
        .iter()
        .filter(|f| f.kind == FindingKind::StubImplementation)
        .filter_map(|f| f.line.map(|line| (f.file.as_str(), line)))
        .collect();
    let mut seen = BTreeSet::new();
    generated
        .iter()
        .filter(|f| {
            !(f.kind == FindingKind::EmptyBody
                && f.line
                    .map(|line| stub_lines.contains(&(f.file.as_str(), line)))
                    .unwrap_or(false))
        })
        .filter(|f| seen.insert((f.file.as_str(), f.line, f.kind, f.description.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(file: &str, line: u32, text: &str) -> Marker {
        Marker {
            file: file.into(),
            line,
            label: "TODO".into(),
            owner: None,
            text: text.into(),
            reference: None,
            severity: Severity::Medium,
        }
    }

    fn finding(
        file: &str,
        line: u32,
        kind: FindingKind,
        severity: Severity,
        text: &str,
    ) -> Finding {
        Finding::new(file, Some(line), kind, severity, text)
    }

    #[test]
    fn substring_and_phrase_matching() {
        let policy = DedupPolicy::default();
        assert!(policy.matches("Implement LOAD", "function `load`: implement load later"));
        assert!(policy.matches(
            "handle network timeouts",
            "the client never handles network timeouts"
        ));
        // One shared phrase out of a two-phrase set clears the ratio.
        assert!(policy.matches("retry uploads forever please", "uploads stall"));
        assert!(!policy.matches("rename variable", "empty error handler swallows exception"));
        assert!(!policy.matches("", "anything at all"));
    }

    #[test]
    fn matching_is_symmetric() {
        let policy = DedupPolicy::default();
        let pairs = [
            ("validate input payload", "`validateInput` never rejects payload"),
            ("cache results", "results of parsing are never cached"),
        ];
        for (a, b) in pairs {
            assert_eq!(policy.matches(a, b), policy.matches(b, a));
        }
    }

    #[test]
    fn thresholds_are_tunable() {
        let strict = DedupPolicy {
            min_shared_phrases: 3,
            min_overlap_ratio: 0.9,
            min_phrase_chars: 5,
        };
        let note = "handle network timeouts later";
        let issue = "network timeouts are fatal here";
        assert!(!strict.matches(note, issue));
        assert!(DedupPolicy::default().matches(note, issue));
    }

    #[test]
    fn markers_suppress_covered_findings_in_the_same_file_only() {
        let markers = vec![marker("a.ts", 1, "implement the loader stub")];
        let generated = vec![
            finding(
                "a.ts",
                5,
                FindingKind::StubImplementation,
                Severity::Medium,
                "function `loader` is a stub with an empty body",
            ),
            finding(
                "b.ts",
                5,
                FindingKind::StubImplementation,
                Severity::Medium,
                "function `loader` is a stub with an empty body",
            ),
        ];
        let overrides = BTreeMap::new();
        let order = vec!["a.ts".to_string(), "b.ts".to_string()];
        let out = Reconciler::new(DedupPolicy::default(), &overrides, &order)
            .reconcile(&markers, &generated);
        assert_eq!(out.suppressed, 1);
        assert_eq!(out.missing.len(), 1);
        assert_eq!(out.missing[0].file, "b.ts");
        assert_eq!(out.markers.len(), 1);
        assert_eq!(out.findings.len(), 2);
    }

    #[test]
    fn ordering_is_severity_then_file_then_discovery() {
        let generated = vec![
            finding("b.ts", 1, FindingKind::EmptyBody, Severity::Medium, "first medium in b"),
            finding("a.ts", 9, FindingKind::EmptyBody, Severity::Medium, "medium in a"),
            finding("b.ts", 2, FindingKind::WeakErrorHandling, Severity::High, "high in b"),
            finding("b.ts", 0, FindingKind::EmptyBody, Severity::Medium, "second medium in b"),
        ];
        let overrides = BTreeMap::new();
        let order = vec!["a.ts".to_string(), "b.ts".to_string()];
        let out = Reconciler::new(DedupPolicy::default(), &overrides, &order)
            .reconcile(&[], &generated);
        let descriptions: Vec<&str> = out.missing.iter().map(|f| f.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec!["high in b", "medium in a", "first medium in b", "second medium in b"]
        );
    }

    #[test]
    fn stub_absorbs_empty_body_on_the_same_line() {
        let generated = vec![
            finding(
                "a.js",
                1,
                FindingKind::EmptyBody,
                Severity::Medium,
                "function `load` has an empty body",
            ),
            finding(
                "a.js",
                1,
                FindingKind::StubImplementation,
                Severity::Medium,
                "function `load` is a stub with an empty body",
            ),
            finding(
                "a.js",
                4,
                FindingKind::EmptyBody,
                Severity::Medium,
                "empty loop body for `x` in `run`",
            ),
        ];
        let overrides = BTreeMap::new();
        let order = vec!["a.js".to_string()];
        let out = Reconciler::new(DedupPolicy::default(), &overrides, &order)
            .reconcile(&[], &generated);
        let kinds: Vec<FindingKind> = out.missing.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FindingKind::StubImplementation, FindingKind::EmptyBody]);
    }

    #[test]
    fn overrides_relabel_without_touching_descriptions() {
        let generated = vec![finding(
            "a.py",
            3,
            FindingKind::EmptyBody,
            Severity::Medium,
            "empty block in `f`",
        )];
        let mut overrides = BTreeMap::new();
        overrides.insert(FindingKind::EmptyBody, Severity::Low);
        let order = vec!["a.py".to_string()];
        let out = Reconciler::new(DedupPolicy::default(), &overrides, &order)
            .reconcile(&[], &generated);
        assert_eq!(out.missing[0].severity, Severity::Low);
        assert_eq!(out.missing[0].description, "empty block in `f`");
    }

    #[test]
    fn reconciling_twice_is_identical() {
        let markers = vec![marker("a.ts", 2, "fix crash on empty input")];
        let generated = vec![
            finding(
                "a.ts",
                7,
                FindingKind::EmptyBody,
                Severity::Medium,
                "empty branch for `if x` in `f`",
            ),
            finding(
                "a.ts",
                3,
                FindingKind::WeakErrorHandling,
                Severity::High,
                "empty error handler in `f` silently swallows the error",
            ),
        ];
        let overrides = BTreeMap::new();
        let order = vec!["a.ts".to_string()];
        let reconciler = Reconciler::new(DedupPolicy::default(), &overrides, &order);
        let first = reconciler.reconcile(&markers, &generated);
        let second = reconciler.reconcile(&markers, &generated);
        assert_eq!(first.findings, second.findings);
        assert_eq!(first.missing, second.missing);
    }
}
