//! Report rendering. Pure functions over a finished [`ScanOutcome`].

use std::fmt::Write as _;

use crate::engine::ScanOutcome;
use crate::finding::{Finding, FindingKind, Severity};

/// Severity-grouped Markdown report. Every missing finding and every marker appears.
pub fn render_markdown(outcome: &ScanOutcome) -> String {
    let mut out = String::new();
    let summary = &outcome.summary;

    let _ = writeln!(out, "# Implementation Gaps\n");
    let _ = writeln!(out, "- **Root:** `{}`", outcome.root);
    let _ = writeln!(out, "- **Depth:** {}", outcome.depth.as_str());
    let _ = writeln!(
        out,
        "- **Files analyzed:** {} of {} ({} skipped)",
        summary.files_analyzed, summary.files_enumerated, summary.files_skipped
    );
    let _ = writeln!(
        out,
        "- **Missing:** {} | **Existing markers:** {} | **Already annotated:** {}\n",
        summary.missing, summary.markers, summary.suppressed
    );

    let _ = writeln!(out, "## Summary by category\n");
    let _ = writeln!(out, "| Category | Count |");
    let _ = writeln!(out, "|---|---:|");
    for kind in FindingKind::ALL {
        let count = summary.by_kind.get(&kind).copied().unwrap_or(0);
        let _ = writeln!(out, "| {} | {} |", kind.as_str(), count);
    }
    out.push('\n');

    let _ = writeln!(out, "## Severity breakdown\n");
    let _ = writeln!(out, "| Severity | Count |");
    let _ = writeln!(out, "|---|---:|");
    for severity in Severity::ALL {
        let count = summary.by_severity.get(&severity).copied().unwrap_or(0);
        let _ = writeln!(out, "| {} | {} |", severity.title(), count);
    }
    out.push('\n');

    let _ = writeln!(out, "## Missing implementation\n");
    if outcome.missing.is_empty() {
        let _ = writeln!(out, "_No missing implementation found._\n");
    }
    let mut index = 0;
    for severity in Severity::ALL {
        let group: Vec<&Finding> = outcome
            .missing
            .iter()
            .filter(|f| f.severity == severity)
            .collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {} ({})\n", severity.title(), group.len());
        for finding in group {
            index += 1;
            write_finding(&mut out, index, finding);
        }
    }

    let _ = writeln!(out, "## Existing markers ({})\n", outcome.markers.len());
    if outcome.markers.is_empty() {
        let _ = writeln!(out, "_No existing markers._\n");
    } else {
        let _ = writeln!(out, "| Location | Label | Severity | Reference | Text |");
        let _ = writeln!(out, "|---|---|---|---|---|");
        for marker in &outcome.markers {
            let _ = writeln!(
                out,
                "| `{}:{}` | {} | {} | {} | {} |",
                marker.file,
                marker.line,
                marker.label,
                marker.severity.title(),
                marker.reference.as_deref().map(table_cell).unwrap_or_default(),
                table_cell(&marker.text)
            );
        }
        out.push('\n');
    }

    if !outcome.skipped.is_empty() {
        let _ = writeln!(out, "## Skipped files ({})\n", outcome.skipped.len());
        for skip in &outcome.skipped {
            let _ = writeln!(out, "- `{}`: {}", skip.file, skip.reason);
        }
        out.push('\n');
    }

    out
}

fn write_finding(out: &mut String, index: usize, finding: &Finding) {
    let _ = writeln!(out, "#### {}. `{}`\n", index, finding.location());
    let _ = writeln!(out, "- **File:** `{}`", finding.file);
    match finding.line {
        Some(line) => {
            let _ = writeln!(out, "- **Line:** {line}");
        }
        None => {
            let _ = writeln!(out, "- **Line:** whole file");
        }
    }
    let _ = writeln!(out, "- **Kind:** {}", finding.kind.as_str());
    let _ = writeln!(out, "- **Description:** {}", finding.description);
    if let Some(annotation) = &finding.suggested_annotation {
        let fence = fence_for(annotation);
        let _ = writeln!(out, "- **Suggested annotation:**\n");
        let _ = writeln!(out, "{fence}\n{annotation}\n{fence}");
    }
    out.push('\n');
}

/// A backtick fence longer than any run inside `text`.
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for ch in text.chars() {
        if ch == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// The whole outcome as pretty JSON.
pub fn render_json(outcome: &ScanOutcome) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(outcome)
}
