//! Best-effort peak resident memory sampling for child processes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Parse the `VmHWM` (peak RSS) line of a `/proc/<pid>/status` file, in bytes.
pub fn parse_vm_hwm(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let mut fields = line["VmHWM:".len()..].split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") | None => Some(value * 1024),
        Some(_) => None,
    }
}

fn read_peak_rss(path: &Path) -> Option<u64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| parse_vm_hwm(&s))
}

/// Polls a process's high-water RSS until stopped.
///
/// Reports 0 when the platform exposes no per-process status.
pub struct PeakRssSampler {
    peak: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl PeakRssSampler {
    pub fn start(pid: Option<u32>) -> Self {
        let peak = Arc::new(AtomicU64::new(0));
        let task = pid.map(|pid| {
            let peak = peak.clone();
            let status = PathBuf::from(format!("/proc/{pid}/status"));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
                loop {
                    interval.tick().await;
                    match read_peak_rss(&status) {
                        Some(rss) => {
                            peak.fetch_max(rss, Ordering::Relaxed);
                        }
                        None => break,
                    }
                }
            })
        });
        Self { peak, task }
    }

    /// Stop sampling and return the highest value seen.
    pub fn finish(mut self) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.peak.load(Ordering::Relaxed)
    }
}

impl Drop for PeakRssSampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
