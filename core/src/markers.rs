//! Annotation scanner: work-item markers already present in comments.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::finding::{Finding, FindingKind, Severity};
use crate::MarkerRules;

/// A developer-authored marker such as `// TODO(ana): handle retries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub file: String,
    pub line: u32,
    /// Upper-cased label (`TODO`, `FIXME`, ...).
    pub label: String,
    pub owner: Option<String>,
    pub text: String,
    /// Issue reference found in the text (`#42`, `PROJ-17`, issue URL).
    pub reference: Option<String>,
    pub severity: Severity,
}

impl Marker {
    pub fn description(&self) -> String {
        format!("{}: {}", self.label, self.text)
    }

    pub fn to_finding(&self) -> Finding {
        Finding::new(
            self.file.clone(),
            Some(self.line),
            FindingKind::PreexistingMarker,
            self.severity,
            self.description(),
        )
    }
}

/// One physical line of comment text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentLine {
    pub line: u32,
    pub text: String,
}

struct CommentSyntax {
    line: &'static [&'static str],
    block: Option<(&'static str, &'static str)>,
    quotes: &'static [u8],
    /// Quotes whose strings may span lines.
    multiline: &'static [u8],
    triple_quotes: bool,
    char_literals: bool,
}

fn comment_syntax_for(extension: &str) -> CommentSyntax {
    const C_BLOCK: Option<(&str, &str)> = Some(("/*", "*/"));
    match extension {
        "py" | "pyi" => CommentSyntax {
            line: &["#"],
            block: None,
            quotes: b"\"'",
            multiline: b"",
            triple_quotes: true,
            char_literals: false,
        },
        "rb" | "sh" | "bash" | "zsh" | "pl" | "r" | "toml" | "yml" | "yaml" => CommentSyntax {
            line: &["#"],
            block: None,
            quotes: b"\"'",
            multiline: b"",
            triple_quotes: false,
            char_literals: false,
        },
        "rs" => CommentSyntax {
            line: &["//"],
            block: C_BLOCK,
            quotes: b"\"",
            multiline: b"\"",
            triple_quotes: false,
            char_literals: true,
        },
        "ts" | "tsx" | "mts" | "cts" | "js" | "jsx" | "mjs" | "cjs" => CommentSyntax {
            line: &["//"],
            block: C_BLOCK,
            quotes: b"\"'`",
            multiline: b"`",
            triple_quotes: false,
            char_literals: false,
        },
        "php" => CommentSyntax {
            line: &["//", "#"],
            block: C_BLOCK,
            quotes: b"\"'",
            multiline: b"\"'",
            triple_quotes: false,
            char_literals: false,
        },
        "sql" | "lua" | "hs" => CommentSyntax {
            line: &["--"],
            block: None,
            quotes: b"'",
            multiline: b"",
            triple_quotes: false,
            char_literals: false,
        },
        "kt" | "swift" | "scala" => CommentSyntax {
            line: &["//"],
            block: C_BLOCK,
            quotes: b"\"",
            multiline: b"",
            triple_quotes: true,
            char_literals: true,
        },
        _ => CommentSyntax {
            line: &["//"],
            block: C_BLOCK,
            quotes: b"\"",
            multiline: b"",
            triple_quotes: false,
            char_literals: true,
        },
    }
}

/// Length of a char literal at the start of `rest` (`'a'`, `'\n'`), or
/// `None` for a lifetime / label.
fn char_literal_len(rest: &str) -> Option<usize> {
    let mut chars = rest.char_indices().skip(1);
    let (_, first) = chars.next()?;
    if first == '\\' {
        let close = rest.get(3..)?.find('\'')?;
        return (close <= 10).then_some(close + 4);
    }
    let (idx, second) = chars.next()?;
    (second == '\'').then_some(idx + 1)
}

/// Split `text` into comment lines, skipping comment openers inside strings.
pub fn extract_comments(text: &str, extension: &str) -> Vec<CommentLine> {
    let syntax = comment_syntax_for(extension);
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut out = Vec::new();
    let mut line: u32 = 1;
    let mut i = 0;

    while i < len {
        let rest = &text[i..];
        let byte = bytes[i];
        if byte == b'\n' {
            line += 1;
            i += 1;
            continue;
        }
        if let Some(opener) = syntax.line.iter().find(|opener| rest.starts_with(**opener)) {
            let end = rest.find('\n').map(|e| i + e).unwrap_or(len);
            out.push(CommentLine {
                line,
                text: text[i + opener.len()..end].to_string(),
            });
            i = end;
            continue;
        }
        if let Some((open, close)) = syntax.block {
            if rest.starts_with(open) {
                let body_start = i + open.len();
                let body_end = text[body_start..]
                    .find(close)
                    .map(|e| body_start + e)
                    .unwrap_or(len);
                let body = &text[body_start..body_end];
                for (offset, segment) in body.split('\n').enumerate() {
                    out.push(CommentLine {
                        line: line + offset as u32,
                        text: segment.to_string(),
                    });
                }
                line += body.matches('\n').count() as u32;
                i = (body_end + close.len()).min(len);
                continue;
            }
        }
        if syntax.triple_quotes && (rest.starts_with("\"\"\"") || rest.starts_with("'''")) {
            let delim = &rest[..3];
            let end = text[i + 3..]
                .find(delim)
                .map(|e| i + 3 + e + 3)
                .unwrap_or(len);
            line += text[i..end].matches('\n').count() as u32;
            i = end;
            continue;
        }
        if syntax.char_literals && byte == b'\'' {
            i += char_literal_len(rest).unwrap_or(1);
            continue;
        }
        if syntax.quotes.contains(&byte) {
            let spans_lines = syntax.multiline.contains(&byte);
            let mut j = i + 1;
            while j < len {
                match bytes[j] {
                    b'\\' => {
                        // An escaped line break still ends a source line.
                        match (bytes.get(j + 1), bytes.get(j + 2)) {
                            (Some(b'\n'), _) => {
                                line += 1;
                                j += 2;
                            }
                            (Some(b'\r'), Some(b'\n')) => {
                                line += 1;
                                j += 3;
                            }
                            _ => j += 2,
                        }
                    }
                    b'\n' if !spans_lines => break,
                    b'\n' => {
                        line += 1;
                        j += 1;
                    }
                    b if b == byte => {
                        j += 1;
                        break;
                    }
                    _ => j += 1,
                }
            }
            i = j.min(len);
            // Land on a char boundary after skipping escapes.
            while i < len && !text.is_char_boundary(i) {
                i += 1;
            }
            continue;
        }
        i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
    }
    out
}

/// Compiled marker rules.
#[derive(Debug)]
pub struct MarkerScanner {
    label_re: Regex,
    reference_re: Regex,
    high: Option<AhoCorasick>,
    low: Option<AhoCorasick>,
}

fn keyword_matcher(words: &[String]) -> Option<AhoCorasick> {
    if words.is_empty() {
        None
    } else {
        Some(
            AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(words),
        )
    }
}

/// Keyword hit that starts a word, so `fix` matches `FIXME` but not `prefix`.
fn has_word_start_match(matcher: &Option<AhoCorasick>, text: &str) -> bool {
    let Some(matcher) = matcher else {
        return false;
    };
    let bytes = text.as_bytes();
    matcher
        .find_overlapping_iter(bytes)
        .any(|mat| mat.start() == 0 || !bytes[mat.start() - 1].is_ascii_alphanumeric())
}

impl MarkerScanner {
    pub fn new(rules: &MarkerRules) -> Result<Self, ScanError> {
        if rules.labels.is_empty() {
            return Err(ScanError::InvalidConfig(
                "markers.labels must name at least one label".into(),
            ));
        }
        let alternatives: Vec<String> = rules.labels.iter().map(|l| regex::escape(l)).collect();
        let label_re = Regex::new(&format!(
            r"(?i)^({})(?:\(([^)]*)\))?(?:\s*[:\-]\s*|\s+|$)(.*)$",
            alternatives.join("|")
        ))?;
        Ok(Self {
            label_re,
            reference_re: Regex::new(&rules.reference_pattern)?,
            high: keyword_matcher(&rules.high_keywords),
            low: keyword_matcher(&rules.low_keywords),
        })
    }

    /// High keywords win over low ones; everything else is medium.
    pub fn severity_of(&self, text: &str) -> Severity {
        if has_word_start_match(&self.high, text) {
            Severity::High
        } else if has_word_start_match(&self.low, text) {
            Severity::Low
        } else {
            Severity::Medium
        }
    }

    pub fn scan(&self, file: &str, extension: &str, text: &str) -> Vec<Marker> {
        extract_comments(text, extension)
            .into_iter()
            .filter_map(|comment| self.parse(file, &comment))
            .collect()
    }

    fn parse(&self, file: &str, comment: &CommentLine) -> Option<Marker> {
        let trimmed = comment
            .text
            .trim_start_matches(|c: char| {
                c == '/' || c == '*' || c == '!' || c == '#' || c.is_whitespace()
            })
            .trim_end();
        let caps = self.label_re.captures(trimmed)?;
        let label = caps.get(1)?.as_str().to_uppercase();
        let content = caps
            .get(3)
            .map(|m| m.as_str().trim().trim_end_matches("*/").trim())
            .unwrap_or("");
        if !content.chars().any(char::is_alphanumeric) {
            return None;
        }
        let owner = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|o| !o.is_empty());
        let reference = self
            .reference_re
            .find(content)
            .map(|m| m.as_str().to_string());
        let severity = self.severity_of(&format!("{label} {content}"));
        Some(Marker {
            file: file.to_string(),
            line: comment.line,
            label,
            owner,
            text: content.to_string(),
            reference,
            severity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> MarkerScanner {
        MarkerScanner::new(&MarkerRules::default()).unwrap()
    }

    #[test]
    fn finds_line_and_block_markers_with_lines() {
        let src = "let a = 1; // TODO: handle overflow\n/*\n * FIXME(ana): crash on empty input #42\n */\nlet b = 2;\n";
        let markers = scanner().scan("a.ts", "ts", src);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].line, 1);
        assert_eq!(markers[0].label, "TODO");
        assert_eq!(markers[0].text, "handle overflow");
        assert_eq!(markers[1].line, 3);
        assert_eq!(markers[1].owner.as_deref(), Some("ana"));
        assert_eq!(markers[1].reference.as_deref(), Some("#42"));
        assert_eq!(markers[1].severity, Severity::High);
    }

    #[test]
    fn markers_inside_strings_are_ignored() {
        let src = "const s = \"// TODO: not a comment\";\nconst t = `\n// TODO: still a string\n`;\n";
        assert!(scanner().scan("a.js", "js", src).is_empty());
        let py = "x = '# TODO: nope'\n\"\"\"\nTODO: docstring\n\"\"\"\n# TODO: real one\n";
        let markers = scanner().scan("a.py", "py", py);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].line, 5);
    }

    #[test]
    fn escaped_line_breaks_inside_strings_keep_line_numbers() {
        let rs = "fn f() -> &'static str {\n    \"a\\\n     b\"\n}\n// TODO: fix this later\n";
        let markers = scanner().scan("a.rs", "rs", rs);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].line, 5);

        let js = "const s = 'one \\\ntwo';\n// TODO: drop the continuation\n";
        let markers = scanner().scan("a.js", "js", js);
        assert_eq!(markers[0].line, 3);

        let crlf = "x = \"a\\\r\nb\"\r\n# TODO: handle windows endings\r\n";
        let markers = scanner().scan("a.py", "py", crlf);
        assert_eq!(markers[0].line, 3);
    }

    #[test]
    fn rust_lifetimes_do_not_open_strings() {
        let src = "fn f<'a>(s: &'a str) -> char { '\"' } // TODO: tidy up\n";
        let markers = scanner().scan("a.rs", "rs", src);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].severity, Severity::Low);
    }

    #[test]
    fn boilerplate_markers_are_discarded() {
        let src = "// TODO\n// TODO:   \n// FIXME: ...\n// TODOS are listed elsewhere\n";
        assert!(scanner().scan("a.ts", "ts", src).is_empty());
    }

    #[test]
    fn severity_is_keyword_driven() {
        let s = scanner();
        assert_eq!(s.severity_of("TODO security review of tokens"), Severity::High);
        assert_eq!(s.severity_of("TODO polish the output"), Severity::Low);
        assert_eq!(s.severity_of("TODO support pagination"), Severity::Medium);
        assert_eq!(s.severity_of("TODO add a prefix option"), Severity::Medium);
        assert_eq!(s.severity_of("FIXME wrong label"), Severity::High);
    }

    #[test]
    fn unknown_extensions_use_c_style_comments() {
        let markers = scanner().scan("main.go", "go", "x := 1 // HACK: avoid the cache\n");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].to_finding().kind, FindingKind::PreexistingMarker);
        assert_eq!(markers[0].description(), "HACK: avoid the cache");
    }

    #[test]
    fn invalid_reference_pattern_is_a_config_error() {
        let rules = MarkerRules {
            reference_pattern: "(".into(),
            ..MarkerRules::default()
        };
        assert!(matches!(
            MarkerScanner::new(&rules),
            Err(ScanError::InvalidConfig(_))
        ));
    }
}
