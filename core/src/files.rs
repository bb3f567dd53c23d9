//! File enumeration and per-file source units.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use crate::error::ScanError;
use crate::finding::Language;
use crate::syntax::{self, SyntaxTree};
use crate::FilterPolicy;

/// A file handed to the engine by an enumerator.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Project-relative display path with `/` separators; the file's identity.
    pub rel: String,
    /// Pre-read contents; when absent the engine reads `path`.
    pub contents: Option<String>,
}

impl CandidateFile {
    pub fn on_disk(path: PathBuf, rel: String) -> Self {
        Self {
            path,
            rel,
            contents: None,
        }
    }

    pub fn in_memory(rel: impl Into<String>, contents: impl Into<String>) -> Self {
        let rel = rel.into();
        Self {
            path: PathBuf::from(&rel),
            rel,
            contents: Some(contents.into()),
        }
    }
}

/// A file the scan could not analyze, with the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Output of [`enumerate`]: candidates in stable order plus files filtered out
/// for a reason worth reporting (size cap, walk errors).
#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: Vec<CandidateFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Walk `root` and collect candidate files according to `policy`.
pub fn enumerate(root: &Path, policy: &FilterPolicy) -> Result<Enumeration, ScanError> {
    if !root.exists() {
        return Err(ScanError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let ignore = build_ignore_set(&policy.ignore_globs)?;
    let extensions: Vec<String> = policy
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut out = Enumeration::default();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || keep_entry(entry, policy));

    for entry_res in walker {
        let entry = match entry_res {
            Ok(entry) => entry,
            Err(err) => {
                let file = err
                    .path()
                    .map(|p| display_path(p, root))
                    .unwrap_or_else(|| "<unknown>".into());
                tracing::warn!(file = %file, error = %err, "directory walk error");
                out.skipped.push(SkippedFile {
                    file,
                    reason: format!("walk error: {err}"),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = display_path(path, root);
        if let Some(set) = &ignore {
            if set.is_match(&rel) {
                continue;
            }
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if !extensions.iter().any(|e| *e == ext) {
            continue;
        }
        if let Some(limit_kb) = policy.max_file_kb {
            match entry.metadata() {
                Ok(meta) if meta.len() > limit_kb * 1024 => {
                    tracing::warn!(
                        file = %rel,
                        size = meta.len(),
                        limit_kb,
                        "file exceeds size cap"
                    );
                    out.skipped.push(SkippedFile {
                        file: rel,
                        reason: format!("exceeds size cap of {limit_kb} KB"),
                    });
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(file = %rel, error = %err, "cannot stat file");
                    out.skipped.push(SkippedFile {
                        file: rel,
                        reason: format!("unreadable metadata: {err}"),
                    });
                    continue;
                }
            }
        }
        out.files.push(CandidateFile::on_disk(path.to_path_buf(), rel));
    }
    Ok(out)
}

fn keep_entry(entry: &DirEntry, policy: &FilterPolicy) -> bool {
    let name = entry.file_name().to_string_lossy();
    if !policy.include_hidden && name.starts_with('.') {
        return false;
    }
    if entry.file_type().is_dir() {
        return !policy
            .exclude_dirs
            .iter()
            .any(|excluded| name.eq_ignore_ascii_case(excluded));
    }
    true
}

pub(crate) fn build_ignore_set(patterns: &[String]) -> Result<Option<GlobSet>, ScanError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

fn display_path(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// One analyzed file: identity, raw text and its lowered structural tree.
#[derive(Debug)]
pub struct SourceUnit {
    pub path: String,
    pub extension: String,
    pub language: Option<Language>,
    pub text: String,
    /// Absent when the language has no parser or the parse failed.
    pub tree: Option<SyntaxTree>,
}

impl SourceUnit {
    /// Build a unit and lower its syntax tree. Parse failures are logged and
    /// leave the tree empty so text-only analysis still runs.
    pub fn from_text(path: impl Into<String>, text: impl Into<String>) -> Self {
        let path = path.into();
        let text = text.into();
        let extension = Path::new(&path)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        let language = Language::from_path(Path::new(&path));
        let tree = match language {
            Some(language) => match syntax::parse(language, &extension, &text) {
                Ok(tree) => Some(tree),
                Err(err) => {
                    tracing::warn!(file = %path, error = %err, "structural parse failed");
                    None
                }
            },
            None => None,
        };
        Self {
            path,
            extension,
            language,
            text,
            tree,
        }
    }

    /// Read a candidate from disk (or its pre-read contents) and parse it.
    pub fn load(candidate: &CandidateFile) -> Result<SourceUnit, SkippedFile> {
        let text = match &candidate.contents {
            Some(text) => text.clone(),
            None => std::fs::read_to_string(&candidate.path).map_err(|err| {
                tracing::warn!(file = %candidate.rel, error = %err, "unreadable file");
                SkippedFile {
                    file: candidate.rel.clone(),
                    reason: format!("unreadable: {err}"),
                }
            })?,
        };
        Ok(SourceUnit::from_text(candidate.rel.clone(), text))
    }

    pub fn file_stem(&self) -> &str {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        match name.find('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn enumerates_in_stable_order_and_prunes_excluded_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "src/b.ts", "export const b = 1;\n");
        write(tmp.path(), "src/a.py", "x = 1\n");
        write(tmp.path(), "node_modules/pkg/index.js", "module.exports = {};\n");
        write(tmp.path(), ".hidden/c.ts", "const c = 1;\n");
        write(tmp.path(), "README.md", "# readme\n");
        write(tmp.path(), "src/app.min.js", "var a;\n");

        let found = enumerate(tmp.path(), &FilterPolicy::default()).unwrap();
        let rels: Vec<&str> = found.files.iter().map(|f| f.rel.as_str()).collect();
        assert_eq!(rels, vec!["src/a.py", "src/b.ts"]);
        assert!(found.skipped.is_empty());
    }

    #[test]
    fn oversized_files_are_skipped_with_reason() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "big.js", &"// filler line\n".repeat(200));
        let policy = FilterPolicy {
            max_file_kb: Some(1),
            ..FilterPolicy::default()
        };
        let found = enumerate(tmp.path(), &policy).unwrap();
        assert!(found.files.is_empty());
        assert_eq!(found.skipped.len(), 1);
        assert!(found.skipped[0].reason.contains("size cap"));
    }

    #[test]
    fn missing_root_is_fatal() {
        let err = enumerate(Path::new("/definitely/not/here"), &FilterPolicy::default())
            .unwrap_err();
        assert!(matches!(err, ScanError::RootNotFound(_)));
    }

    #[test]
    fn file_root_is_not_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.ts", "let a = 1;\n");
        let err = enumerate(&tmp.path().join("a.ts"), &FilterPolicy::default()).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }

    #[test]
    fn unit_stem_strips_every_extension() {
        let unit = SourceUnit::from_text("src/foo.test.ts", "");
        assert_eq!(unit.file_stem(), "foo");
        assert_eq!(unit.language, Some(Language::TypeScript));
        let other = SourceUnit::from_text("scripts/run.sh", "# TODO: x\n");
        assert!(other.tree.is_none());
        assert_eq!(other.extension, "sh");
    }
}
