//! Binary entry point for the nsbridge CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Validate the namespace graph of the current directory
//! nsbridge --facts facts.json check
//!
//! # Print dependency records (and write them to an index file)
//! nsbridge deps --output deps.json
//!
//! # Preview the rewrite of every module as unified diffs
//! nsbridge transform --dry-run
//!
//! # Rewrite two files to CommonJS under out/
//! nsbridge --target commonjs transform src/a.js src/b.js --out-dir out
//! ```
//!
//! All results are JSON on stdout. Errors are JSON too, with the exit code
//! taken from the error's `OutputErrorCode`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use nsbridge_core::config::{CliOverrides, ResolvedConfig};
use nsbridge_core::deps::render_records;
use nsbridge_core::diff::unified_diff;
use nsbridge_core::error::{BridgeError, OutputErrorCode};
use nsbridge_core::facts::FactsBundle;
use nsbridge_core::output::{
    emit_response, CheckResponse, DepsResponse, ErrorResponse, Summary, TransformResponse,
    TransformedFile,
};
use nsbridge_core::source_set::GlobSourceSet;
use nsbridge_core::transform::{transform, TargetFormat};
use nsbridge_core::tree::{canonical_path, ScanOutcome, Tree};

/// Facts bundle looked up in the workspace root when `--facts` is absent.
const DEFAULT_FACTS: &str = "nsbridge.facts.json";

// ============================================================================
// CLI Structure
// ============================================================================

/// Rewrite namespace-declaring JavaScript into ES or CommonJS modules.
#[derive(Parser, Debug)]
#[command(
    name = "nsbridge",
    version,
    about = "Rewrite goog.provide/goog.module code into ES or CommonJS modules"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Workspace root directory (default: current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Facts bundle produced by the extractor (default: nsbridge.facts.json
    /// in the workspace).
    #[arg(long, global = true)]
    facts: Option<PathBuf>,

    /// Configuration file (default: nsbridge.json in the workspace).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format for modules that are not natively ESM or CommonJS.
    #[arg(long, global = true, value_enum)]
    target: Option<TargetArg>,

    /// Base library directory, relative to the workspace.
    #[arg(long, global = true)]
    base_library: Option<PathBuf>,

    /// Source include pattern (repeatable; replaces configured includes).
    #[arg(long, global = true)]
    include: Vec<String>,

    /// Source exclude pattern (repeatable).
    #[arg(long, global = true)]
    exclude: Vec<String>,

    /// Constant override in `NAME=VALUE` form, value as JS source text.
    #[arg(long = "define", global = true, value_parser = parse_define)]
    defines: Vec<(String, String)>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl GlobalArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            target: self.target.map(TargetFormat::from),
            base_library: self.base_library.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            defines: self.defines.clone(),
            global_import: None,
            source_maps: None,
        }
    }
}

/// Parse a `NAME=VALUE` constant override.
fn parse_define(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    if !nsbridge_core::namespace::is_valid(name) {
        return Err(format!("invalid constant name '{}'", name));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TargetArg {
    Esm,
    #[value(alias = "cjs")]
    Commonjs,
}

impl From<TargetArg> for TargetFormat {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Esm => TargetFormat::Esm,
            TargetArg::Commonjs => TargetFormat::CommonJs,
        }
    }
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the workspace and validate the namespace graph.
    ///
    /// Exits with code 4 when any error diagnostic remains.
    Check,
    /// Print the dependency record of every module.
    Deps {
        /// Also write the records as a JSON array to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rewrite modules into the target format.
    Transform {
        /// Files to rewrite (default: every module outside the base library).
        files: Vec<PathBuf>,
        /// Directory receiving the rewritten files, mirroring the workspace.
        #[arg(long, required_unless_present = "dry_run")]
        out_dir: Option<PathBuf>,
        /// Print unified diffs instead of writing files.
        #[arg(long)]
        dry_run: bool,
        /// Write a source map next to each output file.
        #[arg(long)]
        source_maps: bool,
        /// Import the system binding into every module outside the base library.
        #[arg(long)]
        global_import: bool,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level, cli.global.log_format);

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors go to stdout as JSON, like every other response.
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber. `RUST_LOG` overrides `--log-level`.
fn init_tracing(level: LogLevel, format: LogFormat) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<ExitCode, BridgeError> {
    let mut overrides = cli.global.overrides();
    if let Command::Transform {
        source_maps,
        global_import,
        ..
    } = &cli.command
    {
        overrides.source_maps = source_maps.then_some(true);
        overrides.global_import = global_import.then_some(true);
    }
    let mut project = Project::open(&cli.global, &overrides)?;
    match cli.command {
        Command::Check => execute_check(&mut project),
        Command::Deps { output } => execute_deps(&mut project, output.as_deref()),
        Command::Transform {
            files,
            out_dir,
            dry_run,
            ..
        } => execute_transform(&mut project, &files, out_dir.as_deref(), dry_run),
    }
}

// ============================================================================
// Project
// ============================================================================

/// Resolved workspace, configuration, and graph.
struct Project {
    root: PathBuf,
    config: ResolvedConfig,
    tree: Tree,
}

impl Project {
    fn open(global: &GlobalArgs, overrides: &CliOverrides) -> Result<Self, BridgeError> {
        let root = match &global.workspace {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        let root = fs::canonicalize(&root)
            .map_err(|_| BridgeError::file_not_found(root.display().to_string()))?;

        let config = ResolvedConfig::resolve(&root, global.config.as_deref(), overrides)?;
        let facts_path = global
            .facts
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_FACTS));
        let bundle = FactsBundle::load(&facts_path, &root)?;
        info!(
            root = %root.display(),
            facts = bundle.len(),
            target = %config.target.value,
            "workspace opened"
        );

        let source_set = GlobSourceSet::with_patterns(&root, &config.patterns())?;
        let tree = Tree::new(config.tree_config(), Box::new(source_set), Box::new(bundle));
        Ok(Project { root, config, tree })
    }

    fn scan(&mut self) -> Result<ScanOutcome, BridgeError> {
        Ok(self.tree.scan(None)?)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/")
    }
}

// ============================================================================
// Command Executors
// ============================================================================

fn execute_check(project: &mut Project) -> Result<ExitCode, BridgeError> {
    let outcome = project.scan()?;
    let filter = project.config.diagnostic_filter();
    let diagnostics: Vec<_> = filter
        .apply(&project.tree.diagnostics())
        .into_iter()
        .cloned()
        .map(|mut d| {
            if let Some(file) = d.file.take() {
                d.file = Some(PathBuf::from(project.relative(&file)));
            }
            d
        })
        .collect();

    let mut response = CheckResponse::new(&outcome.validation, diagnostics);
    response.repaired = outcome
        .validation
        .repaired
        .iter()
        .map(|p| project.relative(p))
        .collect();
    emit_response(&response, &mut io::stdout())?;

    if response.passed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(OutputErrorCode::GraphInvalid.code()))
    }
}

fn execute_deps(project: &mut Project, output: Option<&Path>) -> Result<ExitCode, BridgeError> {
    project.scan()?;
    let records: Vec<_> = project
        .tree
        .dependency_records()
        .into_iter()
        .map(|r| r.relative_to(&project.root))
        .collect();
    if let Some(path) = output {
        let json = render_records(&records).map_err(|e| BridgeError::internal(e.to_string()))?;
        fs::write(path, json + "\n")?;
        info!(path = %path.display(), records = records.len(), "dependency index written");
    }
    emit_response(&DepsResponse::new(records), &mut io::stdout())?;
    Ok(ExitCode::SUCCESS)
}

fn execute_transform(
    project: &mut Project,
    files: &[PathBuf],
    out_dir: Option<&Path>,
    dry_run: bool,
) -> Result<ExitCode, BridgeError> {
    project.scan()?;
    let options = project.config.transform_options();

    let targets: Vec<PathBuf> = if files.is_empty() {
        project
            .tree
            .modules()
            .filter(|m| !m.in_library())
            .map(|m| m.request().to_path_buf())
            .collect()
    } else {
        files
            .iter()
            .map(|f| canonical_path(&project.root.join(f)))
            .collect()
    };

    let mut results = Vec::with_capacity(targets.len());
    let mut all_edits = Vec::new();
    for path in &targets {
        let output = transform(&project.tree, path, &options)?;
        let rel = project.relative(path);
        let mut result = TransformedFile {
            path: rel.clone(),
            format: output.format,
            edits: output.edits.len(),
            output: None,
            diff: None,
        };

        if dry_run {
            let original = project
                .tree
                .module(path)
                .and_then(|m| m.source())
                .unwrap_or_default();
            result.diff = Some(unified_diff(&rel, original, &output.code));
        } else if let Some(dir) = out_dir {
            let dest = project.root.join(dir).join(&rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut code = output.code.clone();
            if let Some(map) = &output.map {
                let map_path = dest.with_extension("js.map");
                let json = map.to_json().map_err(|e| BridgeError::internal(e.to_string()))?;
                fs::write(&map_path, json)?;
                if let Some(name) = map_path.file_name() {
                    code.push_str(&format!("//# sourceMappingURL={}\n", name.to_string_lossy()));
                }
            }
            fs::write(&dest, code)?;
            debug!(path = %rel, dest = %dest.display(), "module written");
            result.output = Some(project.relative(&dest));
        }

        all_edits.extend(output.edits);
        results.push(result);
    }

    let summary = Summary::from_edits(&all_edits);
    info!(
        files = results.len(),
        edits = summary.edits_count,
        dry_run,
        "transform finished"
    );
    emit_response(
        &TransformResponse::new(dry_run, results, summary),
        &mut io::stdout(),
    )?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod cli_parsing {
        use super::*;

        #[test]
        fn global_flags_after_subcommand() {
            let cli = Cli::try_parse_from([
                "nsbridge",
                "check",
                "--target",
                "cjs",
                "--define",
                "app.DEBUG=false",
            ])
            .unwrap();
            assert_eq!(cli.global.target, Some(TargetArg::Commonjs));
            assert_eq!(
                cli.global.defines,
                vec![("app.DEBUG".to_string(), "false".to_string())]
            );
            assert!(matches!(cli.command, Command::Check));
        }

        #[test]
        fn transform_needs_out_dir_or_dry_run() {
            assert!(Cli::try_parse_from(["nsbridge", "transform"]).is_err());
            let cli = Cli::try_parse_from(["nsbridge", "transform", "--dry-run", "a.js"]).unwrap();
            match cli.command {
                Command::Transform { files, dry_run, .. } => {
                    assert!(dry_run);
                    assert_eq!(files, vec![PathBuf::from("a.js")]);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn defaults() {
            let cli = Cli::try_parse_from(["nsbridge", "deps"]).unwrap();
            assert!(matches!(cli.global.log_level, LogLevel::Warn));
            assert_eq!(cli.global.log_format, LogFormat::Text);
            assert!(cli.global.overrides().target.is_none());
        }
    }

    mod defines {
        use super::*;

        #[test]
        fn value_may_contain_equals() {
            assert_eq!(
                parse_define("a.B=x == y").unwrap(),
                ("a.B".to_string(), "x == y".to_string())
            );
        }

        #[test]
        fn rejects_missing_value_and_bad_name() {
            assert!(parse_define("a.B").is_err());
            assert!(parse_define("1a=2").is_err());
        }
    }

    mod log_level {
        use super::*;

        #[test]
        fn converts_to_tracing_level() {
            assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
            assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
            assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        }
    }
}
