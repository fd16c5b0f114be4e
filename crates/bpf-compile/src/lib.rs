//! bpf-compile: compiler driver for kernel-bytecode datapath programs
//!
//! Turns C datapath sources into objects, assembly and preprocessed source by
//! running `clang` as a child process.
//!
//! ## Layers
//!
//! - [`isa`]: one-time selection of the target ISA level from kernel probes
//! - [`flags`]: deterministic toolchain argument construction
//! - [`invoke`]: a single cancellable toolchain run with bounded diagnostics
//! - [`session`]: ordered, fail-fast debug and production builds per category
//! - [`loader`]: configured entry points for the fixed datapath builds

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod flags;
pub mod invoke;
pub mod isa;
pub mod loader;
pub mod obs;
pub mod probe;
pub mod program;
pub mod rusage;
pub mod session;
pub mod telemetry;

pub use config::LoaderConfig;
pub use diagnostics::{DiagnosticTail, MAX_DIAGNOSTIC_BYTES};
pub use error::{CompileError, ConfigError, ProbeError, Result, SessionError};
pub use flags::{CompileFlags, FlagBuilder};
pub use invoke::{CompilationResult, Compiler, Toolchain, COMPILER};
pub use isa::{detect_isa, IsaLevel, IsaSelector};
pub use loader::Loader;
pub use probe::{CapabilityProbe, KernelReleaseProbe, StaticProbe};
pub use program::{OutputDirectories, OutputKind, ProgramCategory, ProgramSpec};
pub use session::{SessionOrchestrator, SessionOutcome, SessionPlan, SessionStage};
pub use telemetry::init_tracing;

pub use tokio_util::sync::CancellationToken;
