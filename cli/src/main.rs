use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context};
use clap::{ArgAction, Parser, ValueEnum};
use console::style;
use gapscan_core::{report, AnalysisDepth, Analyzer, Config, ScanOutcome, Severity};
use serde_yaml::{Mapping, Value as YamlValue};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "gapscan.yml";

/// gapscan CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "gapscan",
    about = "Find unfinished implementation and reconcile it with existing TODO markers."
)]
struct Args {
    /// Project root to scan.
    #[arg(value_name = "ROOT", default_value = ".")]
    root: PathBuf,

    /// Analysis depth: basic (markers + patterns), standard (+ stubs, interfaces), deep (+ tests).
    #[arg(long, value_enum)]
    depth: Option<DepthArg>,

    /// Where to write the Markdown report.
    #[arg(long, short, default_value = "IMPLEMENTATION_GAPS.md")]
    output: PathBuf,

    /// Path to config file (YAML). Defaults to gapscan.yml if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the full outcome as JSON on stdout.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Worker threads for per-file analysis.
    #[arg(long, short = 'j', value_name = "N")]
    jobs: Option<usize>,

    /// Abort the scan (with no report) after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Set config overrides (repeatable as key=value). Example: --set dedup.min_shared_phrases=3
    #[arg(long = "set", value_name = "KEY=VALUE", action = ArgAction::Append)]
    sets: Vec<String>,

    /// Only print errors.
    #[arg(long, short, action = ArgAction::SetTrue)]
    quiet: bool,

    /// Debug logging on stderr.
    #[arg(long, short, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DepthArg {
    Basic,
    Standard,
    Deep,
}

impl From<DepthArg> for AnalysisDepth {
    fn from(arg: DepthArg) -> Self {
        match arg {
            DepthArg::Basic => AnalysisDepth::Basic,
            DepthArg::Standard => AnalysisDepth::Standard,
            DepthArg::Deep => AnalysisDepth::Deep,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);
    run(args)
}

fn init_tracing(args: &Args) {
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else if args.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let cfg = build_config(&args)?;
    let analyzer = Analyzer::new(cfg).context("Invalid configuration")?;
    let outcome = analyzer
        .scan(&args.root)
        .with_context(|| format!("Scan of {} failed", args.root.display()))?;

    let markdown = report::render_markdown(&outcome);
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&args.output, markdown)
        .with_context(|| format!("Failed to write report {}", args.output.display()))?;

    if args.json {
        println!("{}", report::render_json(&outcome)?);
    } else if !args.quiet {
        print_summary(&outcome, &args.output);
    }
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut value = load_config_value(args.config.as_deref())?;
    apply_overrides(&mut value, &args.sets)?;
    let mut cfg: Config =
        serde_yaml::from_value(value).context("Invalid config structure after overrides")?;
    if let Some(depth) = args.depth {
        cfg.depth = depth.into();
    }
    if let Some(jobs) = args.jobs {
        cfg.parallelism = Some(jobs);
    }
    if let Some(secs) = args.timeout_secs {
        cfg.timeout_secs = Some(secs);
    }
    tracing::debug!(
        depth = cfg.depth.as_str(),
        parallelism = ?cfg.parallelism,
        timeout_secs = ?cfg.timeout_secs,
        overrides = args.sets.len(),
        "configuration resolved"
    );
    Ok(cfg)
}

/// Raw YAML so `--set` can patch it before it is typed. A missing default file is fine.
fn load_config_value(path: Option<&Path>) -> anyhow::Result<YamlValue> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.exists() {
                return Ok(YamlValue::Mapping(Mapping::new()));
            }
            default
        }
    };
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let value: YamlValue = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse YAML {}", path.display()))?;
    Ok(match value {
        YamlValue::Null => YamlValue::Mapping(Mapping::new()),
        other => other,
    })
}

fn apply_overrides(value: &mut YamlValue, sets: &[String]) -> anyhow::Result<()> {
    for kv in sets {
        let (key, raw) = kv
            .split_once('=')
            .ok_or_else(|| anyhow!("--set expects KEY=VALUE, got `{kv}`"))?;
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            bail!("--set has an empty key segment in `{kv}`");
        }
        let raw = raw.trim();
        let parsed = serde_yaml::from_str::<YamlValue>(raw)
            .unwrap_or_else(|_| YamlValue::String(raw.to_string()));
        let segments: Vec<&str> = key.split('.').collect();
        set_path(value, &segments, parsed);
    }
    Ok(())
}

fn set_path(node: &mut YamlValue, segments: &[&str], new: YamlValue) {
    let Some((first, rest)) = segments.split_first() else {
        *node = new;
        return;
    };
    if !node.is_mapping() {
        *node = YamlValue::Mapping(Mapping::new());
    }
    if let YamlValue::Mapping(map) = node {
        let child = map
            .entry(YamlValue::String((*first).to_string()))
            .or_insert(YamlValue::Null);
        set_path(child, rest, new);
    }
}

fn print_summary(outcome: &ScanOutcome, output: &Path) {
    let summary = &outcome.summary;
    println!(
        "{} {} file(s) analyzed, {} skipped",
        style("gapscan").bold(),
        summary.files_analyzed,
        summary.files_skipped
    );
    let count = |severity: Severity| {
        outcome
            .missing
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    };
    println!(
        "  {} missing: {} high, {} medium, {} low",
        summary.missing,
        style(count(Severity::High)).red(),
        style(count(Severity::Medium)).yellow(),
        style(count(Severity::Low)).cyan()
    );
    println!(
        "  {} existing marker(s), {} finding(s) already annotated",
        summary.markers, summary.suppressed
    );
    let shown = env::current_dir()
        .ok()
        .and_then(|cwd| pathdiff::diff_paths(output, cwd))
        .unwrap_or_else(|| output.to_path_buf());
    println!("  report: {}", style(shown.display()).cyan());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&["gapscan"]);
        assert_eq!(args.root, PathBuf::from("."));
        assert_eq!(args.output, PathBuf::from("IMPLEMENTATION_GAPS.md"));
        assert!(args.depth.is_none());
        assert!(args.sets.is_empty());
    }

    #[test]
    fn flags_parse() {
        let args = parse(&[
            "gapscan",
            "src",
            "--depth",
            "deep",
            "-o",
            "out/gaps.md",
            "--jobs",
            "4",
            "--timeout-secs",
            "30",
            "--set",
            "dedup.min_shared_phrases=3",
            "--json",
        ]);
        assert_eq!(args.root, PathBuf::from("src"));
        assert_eq!(args.depth, Some(DepthArg::Deep));
        assert_eq!(args.jobs, Some(4));
        assert_eq!(args.timeout_secs, Some(30));
        assert_eq!(args.sets, vec!["dedup.min_shared_phrases=3".to_string()]);
        assert!(args.json);
        assert!(Args::try_parse_from(["gapscan", "--depth", "extreme"]).is_err());
    }

    #[test]
    fn set_takes_one_value_per_flag() {
        let args = parse(&["gapscan", "--set", "depth=deep", "src", "--set", "parallelism=2"]);
        assert_eq!(args.root, PathBuf::from("src"));
        assert_eq!(args.sets, vec!["depth=deep".to_string(), "parallelism=2".to_string()]);
    }

    #[test]
    fn overrides_patch_nested_keys() {
        let mut value = YamlValue::Mapping(Mapping::new());
        apply_overrides(
            &mut value,
            &[
                "depth=deep".into(),
                "dedup.min_overlap_ratio=0.5".into(),
                "severity_overrides.empty-body=low".into(),
                "filter.exclude_dirs=[gen, out]".into(),
            ],
        )
        .unwrap();
        let cfg: Config = serde_yaml::from_value(value).unwrap();
        assert_eq!(cfg.depth, AnalysisDepth::Deep);
        assert!((cfg.dedup.min_overlap_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.dedup.min_shared_phrases, 2);
        assert_eq!(cfg.filter.exclude_dirs, vec!["gen".to_string(), "out".to_string()]);
        assert_eq!(cfg.severity_overrides.len(), 1);
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        let mut value = YamlValue::Mapping(Mapping::new());
        assert!(apply_overrides(&mut value, &["no-equals".into()]).is_err());
        assert!(apply_overrides(&mut value, &["a..b=1".into()]).is_err());
    }

    #[test]
    fn cli_flags_win_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gapscan.yml");
        fs::write(&path, "depth: basic\nparallelism: 2\n").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let args = parse(&["gapscan", "--config", &path_str, "--depth", "standard"]);
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.depth, AnalysisDepth::Standard);
        assert_eq!(cfg.parallelism, Some(2));
    }

    #[test]
    fn end_to_end_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("load.js"), "function load() { }\n").unwrap();
        let out = dir.path().join("report/GAPS.md");
        let root = dir.path().to_string_lossy().to_string();
        let out_str = out.to_string_lossy().to_string();
        let empty_cfg = dir.path().join("empty.yml");
        fs::write(&empty_cfg, "").unwrap();
        let cfg_str = empty_cfg.to_string_lossy().to_string();
        run(parse(&[
            "gapscan", &root, "--output", &out_str, "--config", &cfg_str, "--quiet",
        ]))
        .unwrap();
        let text = fs::read_to_string(out).unwrap();
        assert!(text.contains("stub-implementation"));
        assert!(text.contains("`load`"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").to_string_lossy().to_string();
        let out = dir.path().join("r.md").to_string_lossy().to_string();
        assert!(run(parse(&["gapscan", &missing, "--output", &out])).is_err());
    }
}
