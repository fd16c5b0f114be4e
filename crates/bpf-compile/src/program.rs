//! Program descriptions, directory layout and the fixed artifact catalogue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Kind of artifact the toolchain is asked to produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// ELF object
    Object,
    /// Textual assembly
    Assembly,
    /// Source after the preprocessor ran
    PreprocessedSource,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Object => "obj",
            OutputKind::Assembly => "asm",
            OutputKind::PreprocessedSource => "c",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "obj" | "object" => Ok(OutputKind::Object),
            "asm" | "assembly" => Ok(OutputKind::Assembly),
            "c" | "source" | "preprocessed" => Ok(OutputKind::PreprocessedSource),
            other => Err(format!("unknown output kind: {other}")),
        }
    }
}

/// A single program to compile and the artifact expected from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramSpec {
    /// Source file name, relative to the library directory.
    pub source: PathBuf,
    /// Artifact file name, relative to the output directory.
    pub output: PathBuf,
    pub kind: OutputKind,
    /// Passed to the toolchain verbatim, after the standard flags.
    #[serde(default)]
    pub options: Vec<String>,
    /// Request debug symbols for object output.
    #[serde(default)]
    pub debug_info: bool,
}

impl ProgramSpec {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, kind: OutputKind) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            kind,
            options: Vec::new(),
            debug_info: false,
        }
    }

    /// Object compile of `source` into `output`.
    pub fn object(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self::new(source, output, OutputKind::Object)
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_debug_info(mut self) -> Self {
        self.debug_info = true;
        self
    }

    /// Name used in logs and errors for the artifact.
    pub fn artifact_name(&self) -> String {
        self.output.display().to_string()
    }
}

/// Directory roots used for include paths and output placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputDirectories {
    /// Program sources and shared headers.
    pub library: PathBuf,
    /// Runtime headers (`<runtime>/globals`).
    pub runtime: PathBuf,
    /// Node, endpoint and feature headers used for templating.
    pub state: PathBuf,
    /// Where artifacts are written.
    pub output: PathBuf,
}

impl OutputDirectories {
    pub fn new(
        library: impl Into<PathBuf>,
        runtime: impl Into<PathBuf>,
        state: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            library: library.into(),
            runtime: runtime.into(),
            state: state.into(),
            output: output.into(),
        }
    }

    pub fn source_path(&self, spec: &ProgramSpec) -> PathBuf {
        self.library.join(&spec.source)
    }

    pub fn output_path(&self, spec: &ProgramSpec) -> PathBuf {
        self.output.join(&spec.output)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }
}

const ENDPOINT_PREFIX: &str = "bpf_lxc";
const HOST_ENDPOINT_PREFIX: &str = "bpf_host";
const NETWORK_PREFIX: &str = "bpf_network";
const OVERLAY_PREFIX: &str = "bpf_overlay";

/// Semantic role of a compiled unit. Each has stable artifact names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProgramCategory {
    Endpoint,
    HostEndpoint,
    Network,
    Overlay,
}

impl ProgramCategory {
    pub const ALL: [ProgramCategory; 4] = [
        ProgramCategory::Endpoint,
        ProgramCategory::HostEndpoint,
        ProgramCategory::Network,
        ProgramCategory::Overlay,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProgramCategory::Endpoint => "endpoint",
            ProgramCategory::HostEndpoint => "host-endpoint",
            ProgramCategory::Network => "network",
            ProgramCategory::Overlay => "overlay",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            ProgramCategory::Endpoint => ENDPOINT_PREFIX,
            ProgramCategory::HostEndpoint => HOST_ENDPOINT_PREFIX,
            ProgramCategory::Network => NETWORK_PREFIX,
            ProgramCategory::Overlay => OVERLAY_PREFIX,
        }
    }

    /// `bpf_lxc.c`, `bpf_host.c`, ...
    pub fn source_file(&self) -> String {
        format!("{}.{}", self.prefix(), OutputKind::PreprocessedSource)
    }

    /// Canonical production object name, loaded by name downstream.
    pub fn object_file(&self) -> String {
        format!("{}.o", self.prefix())
    }

    pub fn has_debug_artifacts(&self) -> bool {
        matches!(
            self,
            ProgramCategory::Endpoint | ProgramCategory::HostEndpoint
        )
    }

    /// The production object spec for this category.
    pub fn production_spec(&self) -> ProgramSpec {
        ProgramSpec::object(self.source_file(), self.object_file())
    }

    /// Debug object, assembly and preprocessed source, in build order.
    /// Empty for categories without debug artifacts.
    pub fn debug_specs(&self) -> Vec<ProgramSpec> {
        if !self.has_debug_artifacts() {
            return Vec::new();
        }

        let prefix = self.prefix();
        let source = self.source_file();
        vec![
            ProgramSpec::object(&source, format!("{prefix}.dbg.o")).with_debug_info(),
            ProgramSpec::new(
                &source,
                format!("{prefix}.{}", OutputKind::Assembly),
                OutputKind::Assembly,
            ),
            ProgramSpec::new(&source, &source, OutputKind::PreprocessedSource),
        ]
    }
}

impl fmt::Display for ProgramCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProgramCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProgramCategory::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown program category: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_names_are_stable() {
        assert_eq!(ProgramCategory::Endpoint.object_file(), "bpf_lxc.o");
        assert_eq!(ProgramCategory::HostEndpoint.object_file(), "bpf_host.o");
        assert_eq!(ProgramCategory::Network.object_file(), "bpf_network.o");
        assert_eq!(ProgramCategory::Overlay.object_file(), "bpf_overlay.o");

        let prod = ProgramCategory::Overlay.production_spec();
        assert_eq!(prod.source, PathBuf::from("bpf_overlay.c"));
        assert_eq!(prod.kind, OutputKind::Object);
        assert!(!prod.debug_info);
    }

    #[test]
    fn test_debug_triple_order() {
        let specs = ProgramCategory::HostEndpoint.debug_specs();
        let outputs: Vec<_> = specs.iter().map(|s| s.artifact_name()).collect();
        assert_eq!(outputs, vec!["bpf_host.dbg.o", "bpf_host.asm", "bpf_host.c"]);

        let kinds: Vec<_> = specs.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OutputKind::Object,
                OutputKind::Assembly,
                OutputKind::PreprocessedSource
            ]
        );
        assert!(specs[0].debug_info);
        assert!(specs.iter().all(|s| s.source == PathBuf::from("bpf_host.c")));
    }

    #[test]
    fn test_network_and_overlay_have_no_debug_specs() {
        assert!(ProgramCategory::Network.debug_specs().is_empty());
        assert!(ProgramCategory::Overlay.debug_specs().is_empty());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "host-endpoint".parse::<ProgramCategory>().unwrap(),
            ProgramCategory::HostEndpoint
        );
        assert!("xdp".parse::<ProgramCategory>().is_err());
    }

    #[test]
    fn test_output_path_joins_output_dir() {
        let dirs = OutputDirectories::new("/L", "/R", "/S", "/O");
        let spec = ProgramSpec::object("x.c", "x.o");
        assert_eq!(dirs.output_path(&spec), PathBuf::from("/O/x.o"));
        assert_eq!(dirs.source_path(&spec), PathBuf::from("/L/x.c"));
    }
}
