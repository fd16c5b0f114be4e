//! Loader configuration and the directory layouts derived from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::program::OutputDirectories;

/// Default location of program sources.
pub const DEFAULT_BPF_DIR: &str = "/var/lib/bpf-compile/bpf";
/// Default runtime state directory.
pub const DEFAULT_STATE_DIR: &str = "/var/run/bpf-compile/state";

/// Settings consumed by the compile path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Program sources and shared headers.
    pub bpf_dir: PathBuf,
    /// Runtime headers and, for standard builds, the output location.
    pub state_dir: PathBuf,
    /// Skip kernel probing (ISA falls back to v1).
    pub dry_mode: bool,
    /// Also build debug object, assembly and preprocessed source.
    pub debug: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            bpf_dir: PathBuf::from(DEFAULT_BPF_DIR),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            dry_mode: false,
            debug: false,
        }
    }
}

impl LoaderConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: LoaderConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bpf_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("bpf_dir"));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("state_dir"));
        }
        Ok(())
    }

    /// Layout for network, overlay and ad-hoc object builds: everything
    /// except sources lives in the state directory.
    pub fn standard_directories(&self) -> OutputDirectories {
        OutputDirectories::new(
            &self.bpf_dir,
            &self.state_dir,
            &self.state_dir,
            &self.state_dir,
        )
    }

    /// Layout for endpoint templates: per-template headers and artifacts
    /// both live in `out`.
    pub fn template_directories(&self, out: &Path) -> OutputDirectories {
        OutputDirectories::new(&self.bpf_dir, &self.state_dir, out, out)
    }
}
