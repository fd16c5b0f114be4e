//! Configured entry points for the fixed datapath builds.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::config::LoaderConfig;
use crate::error::{Result, SessionError};
use crate::invoke::{CompilationResult, Compiler, Toolchain};
use crate::probe::CapabilityProbe;
use crate::program::{ProgramCategory, ProgramSpec};
use crate::session::{SessionOrchestrator, SessionOutcome, SessionPlan};

/// Compiles datapath programs using directories from a [`LoaderConfig`].
#[derive(Debug, Clone)]
pub struct Loader {
    config: LoaderConfig,
    orchestrator: SessionOrchestrator,
}

impl Loader {
    pub fn new(config: LoaderConfig, compiler: Compiler) -> Self {
        let orchestrator = SessionOrchestrator::new(compiler, config.debug);
        Self {
            config,
            orchestrator,
        }
    }

    /// Use the process-wide ISA level, probing with `probe` on first use.
    pub fn detect(config: LoaderConfig, toolchain: Toolchain, probe: &dyn CapabilityProbe) -> Self {
        let compiler = Compiler::detect(toolchain, config.dry_mode, probe);
        Self::new(config, compiler)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn compiler(&self) -> &Compiler {
        self.orchestrator.compiler()
    }

    /// Compile `src` from the bpf directory into `out` in the state directory.
    pub async fn compile_object(
        &self,
        src: impl Into<PathBuf>,
        out: impl Into<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult> {
        self.compile_with_options(src, out, Vec::new(), cancel)
            .await
    }

    /// [`Loader::compile_object`] with extra toolchain options.
    pub async fn compile_with_options(
        &self,
        src: impl Into<PathBuf>,
        out: impl Into<PathBuf>,
        options: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult> {
        let spec = ProgramSpec::object(src, out).with_options(options);
        let dirs = self.config.standard_directories();
        self.compiler().compile(&spec, &dirs, cancel).await
    }

    /// Build the endpoint (or host endpoint) template into `out`.
    pub async fn compile_template(
        &self,
        out: &Path,
        is_host: bool,
        cancel: &CancellationToken,
    ) -> std::result::Result<SessionOutcome, SessionError> {
        let category = if is_host {
            ProgramCategory::HostEndpoint
        } else {
            ProgramCategory::Endpoint
        };
        let dirs = self.config.template_directories(out);
        self.orchestrator
            .compile_session(&dirs, category, cancel)
            .await
    }

    /// Build `category` into the state directory, passing `options` to the
    /// production compile.
    pub async fn compile_session(
        &self,
        category: ProgramCategory,
        options: Vec<String>,
        cancel: &CancellationToken,
    ) -> std::result::Result<SessionOutcome, SessionError> {
        let dirs = self.config.standard_directories();
        let plan = SessionPlan::with_options(category, self.config.debug, options);
        self.orchestrator.run(&dirs, plan, cancel).await
    }

    /// Build the network program into the state directory.
    pub async fn compile_network(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<SessionOutcome, SessionError> {
        let dirs = self.config.standard_directories();
        self.orchestrator
            .compile_session(&dirs, ProgramCategory::Network, cancel)
            .await
    }

    /// Build the overlay program into the state directory with `options`.
    pub async fn compile_overlay(
        &self,
        options: Vec<String>,
        cancel: &CancellationToken,
    ) -> std::result::Result<SessionOutcome, SessionError> {
        let dirs = self.config.standard_directories();
        let plan = SessionPlan::with_options(ProgramCategory::Overlay, false, options);
        self.orchestrator.run(&dirs, plan, cancel).await
    }
}
