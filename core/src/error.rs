use std::path::PathBuf;
use std::time::Duration;

/// Failures that abort a whole scan.
///
/// Everything that can go wrong for a single file or a single check is
/// absorbed and logged by the engine instead; only these surface to callers.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("project root `{0}` does not exist")]
    RootNotFound(PathBuf),
    #[error("project root `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error("no readable source files under `{0}`")]
    NoReadableFiles(PathBuf),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("scan did not finish within {0:?}; partial results discarded")]
    TimedOut(Duration),
    #[error("worker pool could not start: {0}")]
    WorkerPool(String),
}

impl From<globset::Error> for ScanError {
    fn from(err: globset::Error) -> Self {
        ScanError::InvalidConfig(format!("invalid glob: {err}"))
    }
}

impl From<regex::Error> for ScanError {
    fn from(err: regex::Error) -> Self {
        ScanError::InvalidConfig(format!("invalid regex: {err}"))
    }
}

impl From<serde_yaml::Error> for ScanError {
    fn from(err: serde_yaml::Error) -> Self {
        ScanError::InvalidConfig(format!("invalid YAML: {err}"))
    }
}
