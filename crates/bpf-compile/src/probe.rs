//! Kernel capability probes consumed by ISA selection.
//!
//! The selector only needs three yes/no answers. [`KernelReleaseProbe`]
//! answers them from the running kernel's release string; [`StaticProbe`]
//! answers from fixed values and records how often it was asked.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ProbeError;

/// Answers capability queries. `Ok(())` means the capability is present.
pub trait CapabilityProbe: Send + Sync {
    /// ISA v3 instructions (32-bit jumps) are accepted by the verifier.
    fn have_v3_isa(&self) -> Result<(), ProbeError>;

    /// ISA v2 instructions (extended jumps) are accepted by the verifier.
    fn have_v2_isa(&self) -> Result<(), ProbeError>;

    /// The redirect-to-neighbour helper is available to sched_cls programs.
    fn have_redirect_neigh_helper(&self) -> Result<(), ProbeError>;
}

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

const V2_ISA_RELEASE: (u32, u32) = (4, 14);
const V3_ISA_RELEASE: (u32, u32) = (5, 1);
const REDIRECT_NEIGH_RELEASE: (u32, u32) = (5, 10);

/// Infers capabilities from the kernel release (e.g. `5.15.0-91-generic`).
#[derive(Debug, Clone)]
pub struct KernelReleaseProbe {
    osrelease: PathBuf,
}

impl Default for KernelReleaseProbe {
    fn default() -> Self {
        Self {
            osrelease: PathBuf::from(OSRELEASE_PATH),
        }
    }
}

impl KernelReleaseProbe {
    /// Read the release string from a different file.
    pub fn with_osrelease(path: impl Into<PathBuf>) -> Self {
        Self {
            osrelease: path.into(),
        }
    }

    fn release(&self, feature: &'static str) -> Result<(u32, u32), ProbeError> {
        let raw = std::fs::read_to_string(&self.osrelease).map_err(|e| ProbeError::Failed {
            feature,
            reason: format!("{}: {}", self.osrelease.display(), e),
        })?;
        parse_release(&raw).ok_or_else(|| ProbeError::Failed {
            feature,
            reason: format!("unrecognised kernel release {:?}", raw.trim()),
        })
    }

    fn require(&self, feature: &'static str, min: (u32, u32)) -> Result<(), ProbeError> {
        if self.release(feature)? >= min {
            Ok(())
        } else {
            Err(ProbeError::NotSupported(feature))
        }
    }
}

impl CapabilityProbe for KernelReleaseProbe {
    fn have_v3_isa(&self) -> Result<(), ProbeError> {
        self.require("ISA v3", V3_ISA_RELEASE)
    }

    fn have_v2_isa(&self) -> Result<(), ProbeError> {
        self.require("ISA v2", V2_ISA_RELEASE)
    }

    fn have_redirect_neigh_helper(&self) -> Result<(), ProbeError> {
        self.require("bpf_redirect_neigh", REDIRECT_NEIGH_RELEASE)
    }
}

/// Parse `major.minor` from a kernel release string.
pub fn parse_release(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.trim().split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Fixed answers, with a count of how many queries were made.
#[derive(Debug, Default)]
pub struct StaticProbe {
    pub v3_isa: bool,
    pub v2_isa: bool,
    pub redirect_neigh: bool,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn new(v3_isa: bool, v2_isa: bool, redirect_neigh: bool) -> Self {
        Self {
            v3_isa,
            v2_isa,
            redirect_neigh,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of queries answered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, present: bool, feature: &'static str) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if present {
            Ok(())
        } else {
            Err(ProbeError::NotSupported(feature))
        }
    }
}

impl CapabilityProbe for StaticProbe {
    fn have_v3_isa(&self) -> Result<(), ProbeError> {
        self.answer(self.v3_isa, "ISA v3")
    }

    fn have_v2_isa(&self) -> Result<(), ProbeError> {
        self.answer(self.v2_isa, "ISA v2")
    }

    fn have_redirect_neigh_helper(&self) -> Result<(), ProbeError> {
        self.answer(self.redirect_neigh, "bpf_redirect_neigh")
    }
}
