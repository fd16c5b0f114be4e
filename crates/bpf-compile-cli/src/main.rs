//! bpfc - datapath compiler driver CLI
//!
//! Compiles the fixed datapath programs (or ad-hoc objects) with clang.
//!
//! ## Commands
//!
//! - `isa`: Show the ISA level the compiler will target
//! - `flags`: Print the toolchain arguments for a program without running it
//! - `compile`: Compile one object into the state directory
//! - `session`: Build all artifacts of a program category
//! - `template`: Build the endpoint or host endpoint template into a directory

use anyhow::{Context, Result};
use bpf_compile::{
    CancellationToken, CompilationResult, CompileError, KernelReleaseProbe, Loader, LoaderConfig,
    OutputKind, ProgramCategory, ProgramSpec, SessionError, SessionOutcome, Toolchain,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "bpfc")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Datapath program compiler driver", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    loader: LoaderArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LoaderArgs {
    /// Load settings from a JSON file (flags below override it)
    #[arg(long, global = true, env = "BPFC_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding program sources and headers
    #[arg(long, global = true, env = "BPFC_BPF_DIR")]
    bpf_dir: Option<PathBuf>,

    /// Runtime state directory
    #[arg(long, global = true, env = "BPFC_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Do not probe the kernel; target ISA v1
    #[arg(long, global = true, env = "BPFC_DRY_MODE")]
    dry_mode: bool,

    /// Also emit debug object, assembly and preprocessed source
    #[arg(long, global = true, env = "BPFC_DEBUG")]
    debug: bool,

    /// Compiler executable
    #[arg(long, global = true, env = "BPFC_CLANG", default_value = bpf_compile::COMPILER)]
    clang: PathBuf,
}

impl LoaderArgs {
    fn config(&self) -> Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => LoaderConfig::default(),
        };
        if let Some(dir) = &self.bpf_dir {
            config.bpf_dir = dir.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        config.dry_mode |= self.dry_mode;
        config.debug |= self.debug;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ISA level compiled programs will target
    Isa,

    /// Print the toolchain arguments for a program without running it
    Flags {
        /// Source file, relative to the bpf directory
        source: PathBuf,

        /// Output kind: obj, asm or c
        #[arg(short, long, default_value = "obj")]
        kind: OutputKind,

        /// Request debug symbols for object output
        #[arg(short = 'g', long)]
        debug_info: bool,

        /// Extra option passed to the compiler (repeatable)
        #[arg(short = 'O', long = "opt", allow_hyphen_values = true)]
        options: Vec<String>,
    },

    /// Compile one object into the state directory
    Compile {
        /// Source file, relative to the bpf directory
        source: PathBuf,

        /// Output file name, relative to the state directory
        output: PathBuf,

        /// Extra option passed to the compiler (repeatable)
        #[arg(short = 'O', long = "opt", allow_hyphen_values = true)]
        options: Vec<String>,
    },

    /// Build all artifacts of a program category into the state directory
    Session {
        /// endpoint, host-endpoint, network or overlay
        category: ProgramCategory,

        /// Extra option for the production compile (repeatable)
        #[arg(short = 'O', long = "opt", allow_hyphen_values = true)]
        options: Vec<String>,
    },

    /// Build the endpoint template into a directory
    Template {
        /// Output directory for headers and artifacts
        out: PathBuf,

        /// Build the host endpoint instead
        #[arg(long)]
        host: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    bpf_compile::init_tracing(cli.json, level);

    let config = cli.loader.config()?;
    let probe = KernelReleaseProbe::default();
    let loader = Loader::detect(config, Toolchain::new(&cli.loader.clang), &probe);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, aborting compilation");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Isa => cmd_isa(&loader, cli.json),
        Commands::Flags {
            source,
            kind,
            debug_info,
            options,
        } => cmd_flags(&loader, source, kind, debug_info, options, cli.json),
        Commands::Compile {
            source,
            output,
            options,
        } => cmd_compile(&loader, source, output, options, &cancel, cli.json).await,
        Commands::Session { category, options } => {
            cmd_session(&loader, category, options, &cancel, cli.json).await
        }
        Commands::Template { out, host } => {
            cmd_template(&loader, &out, host, &cancel, cli.json).await
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Show the selected ISA level
fn cmd_isa(loader: &Loader, json: bool) -> Result<()> {
    let isa = loader.compiler().isa();
    if json {
        return print_json(&serde_json::json!({
            "isa": isa,
            "dry_mode": loader.config().dry_mode,
        }));
    }
    println!("ISA level: {}", isa);
    println!("Flag: {}", isa.mcpu_flag());
    Ok(())
}

/// Print toolchain arguments
fn cmd_flags(
    loader: &Loader,
    source: PathBuf,
    kind: OutputKind,
    debug_info: bool,
    options: Vec<String>,
    json: bool,
) -> Result<()> {
    let output = source.with_extension(match kind {
        OutputKind::Object => "o",
        OutputKind::Assembly => "asm",
        OutputKind::PreprocessedSource => "i",
    });
    let mut spec = ProgramSpec::new(source, output, kind).with_options(options);
    spec.debug_info = debug_info;

    let flags = loader
        .compiler()
        .flags(&spec, &loader.config().standard_directories());
    if json {
        return print_json(&flags);
    }
    println!(
        "{} {}",
        loader.compiler().toolchain().program().display(),
        flags.as_slice().join(" ")
    );
    Ok(())
}

/// Compile a single object
async fn cmd_compile(
    loader: &Loader,
    source: PathBuf,
    output: PathBuf,
    options: Vec<String>,
    cancel: &CancellationToken,
    json: bool,
) -> Result<()> {
    let result = loader
        .compile_with_options(source, output, options, cancel)
        .await;
    let result = match split_cancelled(result)? {
        Ok(result) => result,
        Err(artifact) => abort(&artifact),
    };
    if json {
        return print_json(&result);
    }
    print_artifact(&result);
    Ok(())
}

/// Separate a cancelled compile, by artifact name, from real failures.
fn split_cancelled(
    result: std::result::Result<CompilationResult, CompileError>,
) -> Result<std::result::Result<CompilationResult, String>> {
    match result {
        Ok(result) => Ok(Ok(result)),
        Err(CompileError::Cancelled { artifact }) => Ok(Err(artifact)),
        Err(err) => Err(err.into()),
    }
}

/// Build one category session
async fn cmd_session(
    loader: &Loader,
    category: ProgramCategory,
    options: Vec<String>,
    cancel: &CancellationToken,
    json: bool,
) -> Result<()> {
    let result = loader.compile_session(category, options, cancel).await;
    report_session(result, json)
}

/// Build an endpoint template
async fn cmd_template(
    loader: &Loader,
    out: &Path,
    host: bool,
    cancel: &CancellationToken,
    json: bool,
) -> Result<()> {
    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create {}", out.display()))?;
    let result = loader.compile_template(out, host, cancel).await;
    report_session(result, json)
}

fn report_session(result: Result<SessionOutcome, SessionError>, json: bool) -> Result<()> {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) if err.is_cancelled() => abort(&format!("{} session", err.category)),
        Err(err) => return Err(err.into()),
    };

    if json {
        return print_json(&outcome);
    }

    println!("Category: {}", outcome.category);
    if let Some(banner) = outcome.toolchain_version.lines().next() {
        println!("Compiler: {}", banner);
    }
    for artifact in &outcome.artifacts {
        print_artifact(artifact);
    }
    Ok(())
}

/// Report a cancelled command and exit like a shell interrupted by SIGINT.
fn abort(what: &str) -> ! {
    println!("Aborted: {}", what);
    std::process::exit(130);
}

fn print_artifact(result: &CompilationResult) {
    if result.peak_rss_bytes > 0 {
        println!(
            "  ✓ {} (peak RSS {} KiB)",
            result.output_path.display(),
            result.peak_rss_bytes / 1024
        );
    } else {
        println!("  ✓ {}", result.output_path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_session_with_options() {
        let cli = Cli::try_parse_from([
            "bpfc",
            "--dry-mode",
            "session",
            "overlay",
            "-O",
            "-DFOO=1",
        ])
        .unwrap();
        assert!(cli.loader.dry_mode);
        match cli.command {
            Commands::Session { category, options } => {
                assert_eq!(category, ProgramCategory::Overlay);
                assert_eq!(options, vec!["-DFOO=1"]);
            }
            _ => panic!("expected session"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_compile_is_an_abort_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig {
            bpf_dir: dir.path().to_path_buf(),
            state_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let loader = Loader::new(
            config,
            bpf_compile::Compiler::new(
                Toolchain::new("/nonexistent/clang"),
                bpf_compile::IsaLevel::V1,
            ),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = loader.compile_object("x.c", "x.o", &cancel).await;
        assert_eq!(split_cancelled(result).unwrap().unwrap_err(), "x.o");

        let failed = loader
            .compile_object("x.c", "x.o", &CancellationToken::new())
            .await;
        assert!(split_cancelled(failed).is_err());
    }

    #[test]
    fn test_loader_args_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bpfc.json");
        std::fs::write(&path, r#"{"bpf_dir": "/from/file", "state_dir": "/state"}"#).unwrap();

        let cli = Cli::try_parse_from([
            "bpfc",
            "--config",
            path.to_str().unwrap(),
            "--bpf-dir",
            "/from/flag",
            "isa",
        ])
        .unwrap();
        let config = cli.loader.config().unwrap();
        assert_eq!(config.bpf_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.state_dir, PathBuf::from("/state"));
    }
}
