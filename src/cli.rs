//! Command-line interface for changesense.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use globset::GlobSet;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

use crate::analysis::Language;
use crate::config::{EngineConfig, DEFAULT_CONFIG_YAML};
use crate::context::AnalysisContext;
use crate::engine::{analyze_batch, analyze_batch_with_progress, FileAnalysis, FileChange};
use crate::report;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Config file names searched in the current directory.
const DEFAULT_CONFIG_NAMES: &[&str] = &["changesense.yaml", ".changesense.yaml"];

/// Semantic change detection - report what a code change means.
///
/// changesense compares two versions of a source file and emits typed,
/// confidence-scored events: signature changes, exception handling added,
/// algorithm optimised, security-sensitive calls introduced, and so on.
#[derive(Parser)]
#[command(name = "changesense")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// Path to engine config YAML (default: auto-discover, else built-in defaults)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format: pretty or json
    #[arg(short, long, global = true, default_value = "pretty")]
    pub format: String,

    /// Never call interpretation providers
    #[arg(long, global = true)]
    pub no_ai: bool,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Exit with status 1 when any event is reported
    #[arg(long, global = true)]
    pub fail_on_events: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyse one before/after pair
    Diff(DiffArgs),
    /// Analyse every supported file pair under two directory trees
    Dirs(DirsArgs),
    /// Write the default configuration file
    Init(InitArgs),
}

/// Arguments for the diff command.
#[derive(Parser)]
pub struct DiffArgs {
    /// Source before the change (omit for an added file)
    #[arg(short, long)]
    pub before: Option<PathBuf>,

    /// Source after the change (omit for a removed file)
    #[arg(short, long)]
    pub after: Option<PathBuf>,

    /// Path reported in events (default: the after or before file)
    #[arg(short, long)]
    pub path: Option<String>,

    /// Language tag (default: from the file extension)
    #[arg(short, long)]
    pub language: Option<String>,
}

/// Arguments for the dirs command.
#[derive(Parser)]
pub struct DirsArgs {
    /// Tree before the change
    pub before_dir: PathBuf,

    /// Tree after the change
    pub after_dir: PathBuf,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "changesense.yaml")]
    pub output: PathBuf,
}

/// Install the stderr tracing subscriber.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .try_init();
}

fn discover_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn load_config(global: &GlobalArgs) -> anyhow::Result<EngineConfig> {
    let path = global.config.clone().or_else(discover_config);
    let mut config = match path {
        Some(path) => EngineConfig::parse_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if global.no_ai {
        config.layers.interpreter = false;
    }
    Ok(config)
}

fn build_context(config: EngineConfig) -> anyhow::Result<AnalysisContext> {
    let use_providers = config.layers.interpreter && !config.providers.is_empty();
    let ctx = AnalysisContext::new(config).context("invalid config")?;
    if use_providers {
        Ok(ctx.with_configured_providers().context("invalid provider config")?)
    } else {
        Ok(ctx)
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

fn check_format(format: &str) -> bool {
    if format != "pretty" && format != "json" {
        eprintln!("Error: invalid format {:?}, must be 'pretty' or 'json'", format);
        return false;
    }
    true
}

fn emit(global: &GlobalArgs, ctx: &AnalysisContext, results: &[FileAnalysis]) -> anyhow::Result<i32> {
    let counters = ctx.snapshot();
    match global.format.as_str() {
        "json" => report::write_json(results, counters)?,
        _ => report::write_pretty(results, &counters),
    }
    let any_events = results.iter().any(|r| !r.events.is_empty());
    if global.fail_on_events && any_events {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Run the diff command.
pub fn run_diff(global: &GlobalArgs, args: &DiffArgs) -> anyhow::Result<i32> {
    if !check_format(&global.format) {
        return Ok(EXIT_ERROR);
    }

    let Some(display) = args
        .path
        .clone()
        .or_else(|| args.after.as_ref().map(|p| p.to_string_lossy().to_string()))
        .or_else(|| args.before.as_ref().map(|p| p.to_string_lossy().to_string()))
    else {
        eprintln!("Error: at least one of --before or --after is required");
        return Ok(EXIT_ERROR);
    };

    let language = match &args.language {
        Some(tag) => tag.clone(),
        None => match Path::new(&display).extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_string(),
            None => {
                eprintln!("Error: cannot infer language for {:?}; pass --language", display);
                return Ok(EXIT_ERROR);
            }
        },
    };
    if Language::from_tag(&language).is_none() {
        eprintln!("Warning: unsupported language {:?}; no events will be reported", language);
    }

    let change = FileChange {
        path: display,
        language,
        before: args.before.as_deref().map(read_source).transpose()?,
        after: args.after.as_deref().map(read_source).transpose()?,
    };

    let ctx = build_context(load_config(global)?)?;
    let results = runtime()?.block_on(analyze_batch(&ctx, std::slice::from_ref(&change)));
    emit(global, &ctx, &results)
}

/// Relative paths of supported source files under `root`.
fn supported_files(root: &Path, exclude: &GlobSet) -> anyhow::Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            // Skip hidden and dependency directories
            !(e.file_type().is_dir()
                && e.depth() > 0
                && (name.starts_with('.') || name == "node_modules" || name == "vendor"))
        })
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if Language::from_path(&relative).is_none() || exclude.is_match(&relative) {
            continue;
        }
        files.insert(relative);
    }
    Ok(files)
}

fn read_optional(root: &Path, relative: &str) -> Option<String> {
    let path = root.join(relative);
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable file");
            None
        }
    }
}

/// Pair files by relative path across two trees.
///
/// Files present on one side only become added or removed changes; files
/// whose contents are byte-identical are dropped.
pub fn collect_pairs(
    before_root: &Path,
    after_root: &Path,
    exclude: &GlobSet,
) -> anyhow::Result<Vec<FileChange>> {
    let mut paths = supported_files(before_root, exclude)?;
    paths.extend(supported_files(after_root, exclude)?);

    let mut changes = Vec::new();
    for relative in paths {
        let before = read_optional(before_root, &relative);
        let after = read_optional(after_root, &relative);
        if before == after {
            continue;
        }
        let language = Path::new(&relative)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        changes.push(FileChange {
            path: relative,
            language,
            before,
            after,
        });
    }
    Ok(changes)
}

/// Run the dirs command.
pub fn run_dirs(global: &GlobalArgs, args: &DirsArgs) -> anyhow::Result<i32> {
    if !check_format(&global.format) {
        return Ok(EXIT_ERROR);
    }
    for dir in [&args.before_dir, &args.after_dir] {
        if !dir.is_dir() {
            eprintln!("Error: not a directory: {}", dir.display());
            return Ok(EXIT_ERROR);
        }
    }

    let config = load_config(global)?;
    let exclude = config.exclude_set()?;
    let changes = collect_pairs(&args.before_dir, &args.after_dir, &exclude)?;
    if changes.is_empty() {
        eprintln!("Warning: no changed files to analyse");
        return Ok(EXIT_SUCCESS);
    }
    let ctx = build_context(config)?;

    let progress = ProgressBar::new(changes.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    if global.format == "json" {
        progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    let results = runtime()?.block_on(analyze_batch_with_progress(&ctx, &changes, &|analysis: &FileAnalysis| {
        progress.set_message(analysis.path.clone());
        progress.inc(1);
    }));
    progress.finish_and_clear();

    emit(global, &ctx, &results)
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if args.output.exists() {
        eprintln!("Error: file already exists: {}", args.output.display());
        eprintln!("Remove it or use --output to specify a different path");
        return Ok(EXIT_ERROR);
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() && parent != Path::new(".") {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Error: failed to create directory: {}", e);
                return Ok(EXIT_ERROR);
            }
        }
    }

    if let Err(e) = std::fs::write(&args.output, DEFAULT_CONFIG_YAML) {
        eprintln!("Error: failed to write config: {}", e);
        return Ok(EXIT_ERROR);
    }

    println!("Created {}", args.output.display());
    println!();
    println!("Next steps:");
    println!("  1. Add providers to enable the interpreter layer");
    println!(
        "  2. Run: changesense --config {} dirs old/ new/",
        args.output.display()
    );

    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "changesense",
            "diff",
            "--after",
            "new.py",
            "--no-ai",
            "--format",
            "json",
        ])
        .unwrap();
        assert!(cli.global.no_ai);
        assert_eq!(cli.global.format, "json");
        match cli.command {
            Commands::Diff(args) => assert_eq!(args.after, Some(PathBuf::from("new.py"))),
            _ => panic!("expected diff"),
        }
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("changesense.yaml");
        let args = InitArgs {
            output: output.clone(),
        };
        assert_eq!(run_init(&args).unwrap(), EXIT_SUCCESS);
        let written = std::fs::read_to_string(&output).unwrap();
        assert!(EngineConfig::parse_str(&written).is_ok());
        assert_eq!(run_init(&args).unwrap(), EXIT_ERROR);
    }
}
