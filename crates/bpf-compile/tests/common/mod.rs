//! Shared fixtures: a shell script that stands in for clang.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use bpf_compile::{OutputDirectories, Toolchain};
use tempfile::TempDir;

/// How the fake compiler behaves.
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// 1-based compile invocation that exits non-zero (0 = never).
    pub fail_at: usize,
    /// Exit code of `--version`.
    pub version_exit: i32,
    /// Block in every compile until killed.
    pub hang: bool,
    /// Leave a background process holding stderr open when failing.
    pub linger_stderr: bool,
}

/// A fake toolchain that appends each compile's arguments to a log file.
pub struct FakeToolchain {
    dir: TempDir,
    pub script: PathBuf,
    pub log: PathBuf,
}

impl FakeToolchain {
    pub fn new(behaviour: Behaviour) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-clang");
        let log = dir.path().join("invocations.log");

        let hang = if behaviour.hang { "exec sleep 30" } else { "" };
        let linger = if behaviour.linger_stderr { "sleep 5 &" } else { "" };
        let body = format!(
            r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "fake clang version 17.0.6"
    exit {version_exit}
fi
echo "$*" >> "{log}"
n=$(wc -l < "{log}" | tr -d ' ')
if [ "$n" -eq {fail_at} ]; then
    echo "x.c:1:1: error: synthetic failure" >&2
    echo "1 error generated." >&2
    {linger}
    exit 1
fi
{hang}
echo "artifact from: $*"
"#,
            version_exit = behaviour.version_exit,
            log = log.display(),
            fail_at = behaviour.fail_at,
            hang = hang,
            linger = linger,
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir, script, log }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::new(&self.script)
    }

    /// Argument lists of every compile invocation so far, in order.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .collect()
    }
}

/// Library, runtime, state and output directories under one temp root.
pub struct Layout {
    root: TempDir,
    pub dirs: OutputDirectories,
}

impl Layout {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let sub = |name: &str| {
            let p = root.path().join(name);
            std::fs::create_dir_all(&p).unwrap();
            p
        };
        let dirs = OutputDirectories::new(sub("lib"), sub("runtime"), sub("state"), sub("out"));
        Self { root, dirs }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.dirs.output.join(name)
    }
}

/// Whether any captured log line is at warn or error level.
pub fn has_failure_logs(lines: &[&str]) -> bool {
    lines
        .iter()
        .any(|l| l.contains("ERROR") || l.contains("WARN"))
}
