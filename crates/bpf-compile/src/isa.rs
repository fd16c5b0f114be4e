//! Target instruction-set selection.
//!
//! The level is probed at most once per [`IsaSelector`] and never changes
//! afterwards. The process-wide selector behind [`detect_isa`] is what the
//! compile path consults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::probe::CapabilityProbe;

/// Instruction-set level passed to the toolchain as `-mcpu`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum IsaLevel {
    #[default]
    V1,
    V2,
    V3,
}

impl IsaLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsaLevel::V1 => "v1",
            IsaLevel::V2 => "v2",
            IsaLevel::V3 => "v3",
        }
    }

    /// The toolchain CPU directive for this level.
    pub fn mcpu_flag(&self) -> String {
        format!("-mcpu={}", self.as_str())
    }
}

impl fmt::Display for IsaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsaLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(IsaLevel::V1),
            "v2" => Ok(IsaLevel::V2),
            "v3" => Ok(IsaLevel::V3),
            other => Err(format!("unknown ISA level: {other}")),
        }
    }
}

/// Computes the ISA level once and caches it.
#[derive(Debug, Default)]
pub struct IsaSelector {
    level: OnceLock<IsaLevel>,
}

impl IsaSelector {
    pub const fn new() -> Self {
        Self {
            level: OnceLock::new(),
        }
    }

    /// Return the cached level, probing on first use.
    ///
    /// Concurrent first callers block until the single probe finishes. Later
    /// calls ignore both arguments.
    pub fn detect(&self, dry_mode: bool, probe: &dyn CapabilityProbe) -> IsaLevel {
        *self.level.get_or_init(|| {
            let level = select(dry_mode, probe);
            info!(isa = %level, dry_mode, "Selected BPF ISA level");
            level
        })
    }

    /// The cached level, if it has been selected.
    pub fn get(&self) -> Option<IsaLevel> {
        self.level.get().copied()
    }
}

fn select(dry_mode: bool, probe: &dyn CapabilityProbe) -> IsaLevel {
    if dry_mode {
        return IsaLevel::V1;
    }

    // v3 requires the redirect-neighbour helper as well.
    match probe.have_v3_isa() {
        Ok(()) => match probe.have_redirect_neigh_helper() {
            Ok(()) => return IsaLevel::V3,
            Err(e) => debug!(error = %e, "Not selecting ISA v3"),
        },
        Err(e) => debug!(error = %e, "Not selecting ISA v3"),
    }

    match probe.have_v2_isa() {
        Ok(()) => IsaLevel::V2,
        Err(e) => {
            debug!(error = %e, "Not selecting ISA v2");
            IsaLevel::V1
        }
    }
}

static GLOBAL_SELECTOR: IsaSelector = IsaSelector::new();

/// Process-wide ISA level.
pub fn detect_isa(dry_mode: bool, probe: &dyn CapabilityProbe) -> IsaLevel {
    GLOBAL_SELECTOR.detect(dry_mode, probe)
}
