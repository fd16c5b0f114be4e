//! Toolchain invocation.
//!
//! One [`Compiler::compile`] call runs one toolchain process: stdout is the
//! artifact, stderr is kept (bounded) for failure reports, and the process
//! is killed if the session's cancellation token fires.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use serde::Serialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::diagnostics::{read_bounded, DiagnosticTail, MAX_DIAGNOSTIC_BYTES};
use crate::error::{CompileError, Result};
use crate::flags::{test_includes, CompileFlags, FlagBuilder};
use crate::isa::{detect_isa, IsaLevel};
use crate::probe::CapabilityProbe;
use crate::program::{OutputDirectories, ProgramSpec};
use crate::rusage::PeakRssSampler;

/// Default toolchain executable.
pub const COMPILER: &str = "clang";

const VERSION_ARTIFACT: &str = "toolchain version";

/// The external compiler executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    program: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            program: PathBuf::from(COMPILER),
        }
    }
}

impl Toolchain {
    /// Use an explicit executable instead of `clang` from `PATH`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `<compiler> --version` and return its combined output.
    pub async fn version(&self, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled {
                artifact: VERSION_ARTIFACT.to_string(),
            });
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("--version").stdin(Stdio::null()).kill_on_drop(true);

        // Dropping the pending future kills the child.
        let output = tokio::select! {
            output = cmd.output() => output,
            _ = cancel.cancelled() => {
                return Err(CompileError::Cancelled {
                    artifact: VERSION_ARTIFACT.to_string(),
                });
            }
        };

        let output = output.map_err(|e| {
            CompileError::io(
                format!("Failed to run {} --version", self.program.display()),
                e,
            )
        })?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        if !output.status.success() {
            return Err(CompileError::Toolchain {
                artifact: VERSION_ARTIFACT.to_string(),
                reason: output.status.to_string(),
                pid: None,
                exit_status: Some(output.status),
                peak_rss_bytes: 0,
                diagnostics: DiagnosticTail::from_bytes(combined, MAX_DIAGNOSTIC_BYTES),
            });
        }

        Ok(String::from_utf8_lossy(&combined).into_owned())
    }
}

/// A successfully produced artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilationResult {
    pub output_path: PathBuf,
    /// Peak resident memory of the compiler; 0 when unavailable.
    pub peak_rss_bytes: u64,
    pub pid: Option<u32>,
}

/// Compiles programs with a fixed toolchain and ISA level.
#[derive(Debug, Clone)]
pub struct Compiler {
    toolchain: Toolchain,
    isa: IsaLevel,
}

impl Compiler {
    pub fn new(toolchain: Toolchain, isa: IsaLevel) -> Self {
        Self { toolchain, isa }
    }

    /// Build a compiler targeting the process-wide detected ISA level.
    pub fn detect(toolchain: Toolchain, dry_mode: bool, probe: &dyn CapabilityProbe) -> Self {
        Self::new(toolchain, detect_isa(dry_mode, probe))
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn isa(&self) -> IsaLevel {
        self.isa
    }

    /// The exact arguments [`Compiler::compile`] passes to the toolchain.
    pub fn flags(&self, spec: &ProgramSpec, dirs: &OutputDirectories) -> CompileFlags {
        FlagBuilder::new(spec, dirs, self.isa)
            .extra_includes(test_includes())
            .build()
    }

    /// Compile `spec` into `<dirs.output>/<spec.output>`.
    pub async fn compile(
        &self,
        spec: &ProgramSpec,
        dirs: &OutputDirectories,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult> {
        let artifact = spec.artifact_name();
        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled { artifact });
        }

        let flags = self.flags(spec, dirs);
        debug!(
            target_bin = %self.toolchain.program.display(),
            args = ?flags.as_slice(),
            "Launching compiler"
        );

        let output_path = dirs.output_path(spec);
        let source_path = dirs.source_path(spec);
        if same_file(&output_path, &source_path).await {
            return Err(CompileError::io(
                format!(
                    "Refusing to write {} over its own source",
                    output_path.display()
                ),
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "output path is the source path",
                ),
            ));
        }
        let output = tokio::fs::File::create(&output_path)
            .await
            .map_err(|e| CompileError::create_output(&output_path, e))?
            .into_std()
            .await;

        let spawned = Command::new(&self.toolchain.program)
            .args(flags.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let failure = Failure {
                    artifact,
                    reason: format!("failed to execute {}: {}", self.toolchain.program.display(), e),
                    pid: None,
                    exit_status: None,
                    peak_rss_bytes: 0,
                    diagnostics: DiagnosticTail::default(),
                };
                return Err(failure.report());
            }
        };

        let pid = child.id();
        let sampler = PeakRssSampler::start(pid);
        let stderr = child.stderr.take();
        let mut diagnostics = tokio::spawn(async move {
            match stderr {
                Some(stderr) => read_bounded(stderr, MAX_DIAGNOSTIC_BYTES)
                    .await
                    .unwrap_or_default(),
                None => DiagnosticTail::default(),
            }
        });

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = status else {
            if let Err(e) = child.kill().await {
                debug!(artifact = %artifact, error = %e, "Compiler already exited");
            }
            sampler.finish();
            diagnostics.abort();
            debug!(artifact = %artifact, compiler_pid = %PidDisplay(pid), "Compilation aborted");
            return Err(CompileError::Cancelled { artifact });
        };

        let peak_rss_bytes = sampler.finish();

        let (reason, exit_status) = match status {
            Ok(status) if status.success() => {
                diagnostics.abort();
                if peak_rss_bytes > 0 {
                    debug!(
                        compiler_pid = %PidDisplay(pid),
                        output = %output_path.display(),
                        "Compilation had peak RSS of {} bytes",
                        peak_rss_bytes
                    );
                }
                return Ok(CompilationResult {
                    output_path,
                    peak_rss_bytes,
                    pid,
                });
            }
            Ok(status) => (status.to_string(), Some(status)),
            Err(e) => (format!("failed to wait for compiler: {e}"), None),
        };

        // A grandchild may still hold stderr open after the compiler exits.
        let diagnostics = tokio::select! {
            joined = &mut diagnostics => joined.unwrap_or_default(),
            _ = cancel.cancelled() => {
                diagnostics.abort();
                debug!(artifact = %artifact, compiler_pid = %PidDisplay(pid), "Compilation aborted");
                return Err(CompileError::Cancelled { artifact });
            }
        };

        let failure = Failure {
            artifact,
            reason,
            pid,
            exit_status,
            peak_rss_bytes,
            diagnostics,
        };
        Err(failure.report())
    }
}

/// Whether `a` and `b` name the same file, either literally or once resolved.
async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

struct Failure {
    artifact: String,
    reason: String,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    peak_rss_bytes: u64,
    diagnostics: DiagnosticTail,
}

impl Failure {
    /// Log the failure with the captured diagnostics and convert to an error.
    fn report(self) -> CompileError {
        let err = CompileError::Toolchain {
            artifact: self.artifact,
            reason: self.reason,
            pid: self.pid,
            exit_status: self.exit_status,
            peak_rss_bytes: self.peak_rss_bytes,
            diagnostics: self.diagnostics,
        };

        error!(
            compiler_pid = %PidDisplay(self.pid),
            max_rss = self.peak_rss_bytes,
            "{}",
            err
        );
        if let Some(diagnostics) = err.diagnostics() {
            for line in diagnostics.lines() {
                warn!("{}", line);
            }
            if diagnostics.truncated() {
                warn!(
                    limit = MAX_DIAGNOSTIC_BYTES,
                    "Compiler diagnostics truncated"
                );
            }
        }
        err
    }
}

struct PidDisplay(Option<u32>);

impl fmt::Display for PidDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(pid) => write!(f, "{pid}"),
            None => f.write_str("not-started"),
        }
    }
}
