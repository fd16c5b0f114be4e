//! Toolchain argument construction.
//!
//! [`FlagBuilder`] is a pure mapping from a program, its directories and an
//! ISA level to the exact argument vector passed to the compiler.

use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use serde::Serialize;

use crate::isa::IsaLevel;
use crate::program::{OutputDirectories, OutputKind, ProgramSpec};

/// Preprocessor-only marker.
pub const PREPROCESS_FLAG: &str = "-E";
/// Assembly-only marker.
pub const ASSEMBLY_FLAG: &str = "-S";
/// Debug symbols.
pub const DEBUG_FLAG: &str = "-g";

const POSSIBLE_CPUS_PATH: &str = "/sys/devices/system/cpu/possible";

const WARNING_FLAGS: &[&str] = &[
    "-Wall",
    "-Wextra",
    "-Werror",
    "-Wshadow",
    "-Wno-address-of-packed-member",
    "-Wno-unknown-warning-option",
    "-Wno-gnu-variable-sized-type-not-at-end",
    "-Wdeclaration-after-statement",
    "-Wimplicit-int-conversion",
    "-Wenum-conversion",
];

static STANDARD_CFLAGS: OnceLock<Vec<String>> = OnceLock::new();

// Test-only include override, prepended to every include list.
static TEST_INCLUDES: RwLock<Vec<PathBuf>> = RwLock::new(Vec::new());

/// Target, language and warning flags shared by every invocation.
pub fn standard_cflags() -> &'static [String] {
    STANDARD_CFLAGS.get_or_init(|| {
        let mut flags: Vec<String> = ["-O2", "--target=bpf", "-std=gnu89", "-nostdinc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        flags.push(format!("-D__NR_CPUS__={}", possible_cpus()));
        flags.extend(WARNING_FLAGS.iter().map(|s| s.to_string()));
        flags
    })
}

/// Number of possible CPUs on this host.
pub fn possible_cpus() -> usize {
    std::fs::read_to_string(POSSIBLE_CPUS_PATH)
        .ok()
        .and_then(|raw| parse_cpu_range(&raw))
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

/// Count CPUs in a kernel cpu list such as `0-3,8-11` or `0`.
pub fn parse_cpu_range(raw: &str) -> Option<usize> {
    let mut count = 0;
    for part in raw.trim().split(',').filter(|p| !p.is_empty()) {
        count += match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.parse().ok()?;
                let hi: usize = hi.parse().ok()?;
                hi.checked_sub(lo)? + 1
            }
            None => {
                part.parse::<usize>().ok()?;
                1
            }
        };
    }
    (count > 0).then_some(count)
}

/// Inject include directories ahead of the standard ones. Tests only; not
/// safe to change while sessions are running.
#[doc(hidden)]
pub fn set_test_includes(includes: Vec<PathBuf>) {
    let mut guard = TEST_INCLUDES.write().unwrap_or_else(|e| e.into_inner());
    *guard = includes;
}

#[doc(hidden)]
pub fn test_includes() -> Vec<PathBuf> {
    TEST_INCLUDES
        .read()
        .map(|g| g.clone())
        .unwrap_or_else(|e| e.into_inner().clone())
}

/// An immutable, ordered toolchain argument list.
///
/// Paths are rendered with [`Path::display`], so a directory or file name that
/// is not valid UTF-8 reaches the toolchain lossily converted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CompileFlags(Vec<String>);

impl CompileFlags {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.0.iter().any(|f| f == flag)
    }

    pub fn position(&self, flag: &str) -> Option<usize> {
        self.0.iter().position(|f| f == flag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a CompileFlags {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Builds [`CompileFlags`] for a program.
#[derive(Debug, Clone)]
pub struct FlagBuilder<'a> {
    spec: &'a ProgramSpec,
    dirs: &'a OutputDirectories,
    isa: IsaLevel,
    extra_includes: Vec<PathBuf>,
}

impl<'a> FlagBuilder<'a> {
    pub fn new(spec: &'a ProgramSpec, dirs: &'a OutputDirectories, isa: IsaLevel) -> Self {
        Self {
            spec,
            dirs,
            isa,
            extra_includes: Vec::new(),
        }
    }

    /// Include directories searched before the standard ones.
    pub fn extra_includes(mut self, includes: Vec<PathBuf>) -> Self {
        self.extra_includes = includes;
        self
    }

    pub fn build(&self) -> CompileFlags {
        let mut args = Vec::with_capacity(self.extra_includes.len() + 32);

        let includes = self.extra_includes.iter().cloned().chain([
            self.dirs.runtime.join("globals"),
            self.dirs.state.clone(),
            self.dirs.library.clone(),
            self.dirs.library.join("include"),
        ]);
        args.extend(includes.map(|dir| include_flag(&dir)));

        match self.spec.kind {
            OutputKind::PreprocessedSource => args.push(PREPROCESS_FLAG.to_string()),
            OutputKind::Assembly => {
                args.push(ASSEMBLY_FLAG.to_string());
                args.push(DEBUG_FLAG.to_string());
            }
            OutputKind::Object => {
                if self.spec.debug_info {
                    args.push(DEBUG_FLAG.to_string());
                }
            }
        }

        args.extend(standard_cflags().iter().cloned());
        args.push(self.isa.mcpu_flag());
        args.extend(self.spec.options.iter().cloned());

        // Output always goes to stdout so the caller owns the artifact file.
        args.push("-c".to_string());
        args.push(path_arg(&self.dirs.source_path(self.spec)));
        args.push("-o".to_string());
        args.push("-".to_string());

        CompileFlags(args)
    }
}

fn include_flag(dir: &Path) -> String {
    format!("-I{}", dir.display())
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
