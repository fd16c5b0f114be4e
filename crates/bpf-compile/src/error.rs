//! Error types for bpf-compile

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::diagnostics::DiagnosticTail;
use crate::program::ProgramCategory;
use crate::session::SessionStage;

/// Errors produced by a single toolchain invocation.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Destination file could not be created, or the toolchain could not be run at all
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Toolchain ran and failed, or could not be executed
    #[error("Failed to compile {artifact}: {reason}")]
    Toolchain {
        artifact: String,
        reason: String,
        pid: Option<u32>,
        exit_status: Option<ExitStatus>,
        peak_rss_bytes: u64,
        diagnostics: DiagnosticTail,
    },

    /// The caller cancelled the invocation before or while it ran
    #[error("Compilation of {artifact} aborted")]
    Cancelled { artifact: String },
}

impl CompileError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CompileError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn create_output(path: &std::path::Path, source: std::io::Error) -> Self {
        CompileError::io(format!("Failed to create {}", path.display()), source)
    }

    /// Whether this error was caused by caller-driven cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompileError::Cancelled { .. })
    }

    /// Captured toolchain stderr, when the toolchain got far enough to produce any.
    pub fn diagnostics(&self) -> Option<&DiagnosticTail> {
        match self {
            CompileError::Toolchain { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

/// A compile session failure, tagged with where in the session it happened.
#[derive(Error, Debug)]
#[error("{category} session failed during {stage}: {source}")]
pub struct SessionError {
    pub category: ProgramCategory,
    pub stage: SessionStage,
    #[source]
    pub source: CompileError,
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

/// A capability probe could not confirm support.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The feature is known to be missing
    #[error("{0} is not supported")]
    NotSupported(&'static str),

    /// Probing itself failed
    #[error("probe for {feature} failed: {reason}")]
    Failed { feature: &'static str, reason: String },
}

/// Errors loading loader configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Result type for compile operations.
pub type Result<T> = std::result::Result<T, CompileError>;
