//! Compile sessions: the ordered set of artifacts built for one program category.
//!
//! A session runs `VersionCheck → [debug artifacts] → production artifact`
//! strictly in order and stops at the first failure. Artifacts already
//! written stay in place.

use serde::Serialize;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::error::{CompileError, SessionError};
use crate::invoke::{CompilationResult, Compiler};
use crate::obs::{emit_session_finished, emit_session_started, SessionSpan};
use crate::program::{OutputDirectories, ProgramCategory, ProgramSpec};

/// Where in a session a step (or failure) belongs.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    VersionCheck,
    Debug,
    Production,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStage::VersionCheck => "version check",
            SessionStage::Debug => "debug artifacts",
            SessionStage::Production => "production artifact",
        })
    }
}

/// The ordered compile steps of a session, excluding the version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    category: ProgramCategory,
    steps: Vec<(SessionStage, ProgramSpec)>,
}

impl SessionPlan {
    pub fn new(category: ProgramCategory, debug: bool) -> Self {
        Self::with_options(category, debug, Vec::new())
    }

    /// Like [`SessionPlan::new`], passing `options` to the production compile.
    pub fn with_options(category: ProgramCategory, debug: bool, options: Vec<String>) -> Self {
        let mut steps = Vec::new();
        if debug {
            steps.extend(
                category
                    .debug_specs()
                    .into_iter()
                    .map(|spec| (SessionStage::Debug, spec)),
            );
        }
        steps.push((
            SessionStage::Production,
            category.production_spec().with_options(options),
        ));
        Self { category, steps }
    }

    pub fn category(&self) -> ProgramCategory {
        self.category
    }

    pub fn steps(&self) -> &[(SessionStage, ProgramSpec)] {
        &self.steps
    }
}

/// Artifacts produced by a successful session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub category: ProgramCategory,
    pub toolchain_version: String,
    pub artifacts: Vec<CompilationResult>,
}

/// Runs compile sessions with one compiler and debug setting.
#[derive(Debug, Clone)]
pub struct SessionOrchestrator {
    compiler: Compiler,
    debug: bool,
}

impl SessionOrchestrator {
    pub fn new(compiler: Compiler, debug: bool) -> Self {
        Self { compiler, debug }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Build all artifacts of `category` into `dirs.output`.
    pub async fn compile_session(
        &self,
        dirs: &OutputDirectories,
        category: ProgramCategory,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        self.run(dirs, SessionPlan::new(category, self.debug), cancel)
            .await
    }

    /// Run an explicit plan.
    pub async fn run(
        &self,
        dirs: &OutputDirectories,
        plan: SessionPlan,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let category = plan.category();
        let session = SessionSpan::new(category);
        emit_session_started(session.id(), category, self.debug);

        let result = self
            .run_steps(dirs, &plan, cancel)
            .instrument(session.span().clone())
            .await;
        emit_session_finished(session.id(), category, &result);
        result
    }

    async fn run_steps(
        &self,
        dirs: &OutputDirectories,
        plan: &SessionPlan,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let category = plan.category();

        let toolchain_version = self
            .compiler
            .toolchain()
            .version(cancel)
            .await
            .map_err(|source| SessionError {
                category,
                stage: SessionStage::VersionCheck,
                source,
            })?;
        debug!(
            compiler = %toolchain_version.trim(),
            category = %category,
            "Compiling datapath"
        );

        let mut artifacts = Vec::with_capacity(plan.steps().len());
        for (stage, spec) in plan.steps() {
            match self.compiler.compile(spec, dirs, cancel).await {
                Ok(result) => artifacts.push(result),
                Err(source) => {
                    report_step_failure(*stage, spec, &source);
                    return Err(SessionError {
                        category,
                        stage: *stage,
                        source,
                    });
                }
            }
        }

        Ok(SessionOutcome {
            category,
            toolchain_version,
            artifacts,
        })
    }
}

// Debug artifacts are auxiliary, so their failures log below production ones.
// Cancellation is the caller's doing and is never reported here.
fn report_step_failure(stage: SessionStage, spec: &ProgramSpec, err: &CompileError) {
    if err.is_cancelled() {
        return;
    }
    match stage {
        SessionStage::Debug => {
            debug!(params = ?spec, error = %err, "Failed to compile debug artifact")
        }
        _ => warn!(params = ?spec, error = %err, "Failed to compile"),
    }
}
