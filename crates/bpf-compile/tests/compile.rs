//! Integration tests for single toolchain invocations.

mod common;

use std::time::{Duration, Instant};

use bpf_compile::{
    CancellationToken, CompileError, Compiler, IsaLevel, OutputDirectories, OutputKind,
    ProgramSpec,
};
use common::{has_failure_logs, Behaviour, FakeToolchain, Layout};
use tracing_test::traced_test;

/// Test: object compile lands in the output dir and the toolchain sees the built flags
#[tokio::test]
async fn test_compile_writes_artifact_from_stdout() {
    let fake = FakeToolchain::new(Behaviour::default());
    let layout = Layout::new();
    let compiler = Compiler::new(fake.toolchain(), IsaLevel::V2);
    let spec = ProgramSpec::object("x.c", "x.o");

    let result = compiler
        .compile(&spec, &layout.dirs, &CancellationToken::new())
        .await
        .expect("compile failed");

    assert_eq!(result.output_path, layout.output("x.o"));
    assert!(result.pid.is_some());

    let artifact = std::fs::read_to_string(layout.output("x.o")).unwrap();
    assert!(artifact.starts_with("artifact from:"));

    let invocations = fake.invocations();
    assert_eq!(invocations.len(), 1);
    let expected = compiler.flags(&spec, &layout.dirs);
    assert_eq!(invocations[0], expected.as_slice());
}

/// Test: flag order for the canonical /L /R /S /O layout
#[test]
fn test_flag_order_end_to_end() {
    let dirs = OutputDirectories::new("/L", "/R", "/S", "/O");
    let spec = ProgramSpec::object("x.c", "x.o");
    let compiler = Compiler::new(Default::default(), IsaLevel::V3);
    let flags = compiler.flags(&spec, &dirs);

    let ordered = [
        "-I/R/globals",
        "-I/S",
        "-I/L",
        "-I/L/include",
        "-mcpu=v3",
        "-c",
        "/L/x.c",
        "-o",
        "-",
    ];
    let positions: Vec<usize> = ordered
        .iter()
        .map(|f| flags.position(f).unwrap_or_else(|| panic!("missing {f}")))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    assert_eq!(positions[0], 0);
    assert_eq!(*positions.last().unwrap(), flags.len() - 1);
}

/// Test: output-kind markers for every kind, with and without debug info
#[test]
fn test_output_kind_markers() {
    let dirs = OutputDirectories::new("/L", "/R", "/S", "/O");
    let compiler = Compiler::new(Default::default(), IsaLevel::V1);

    for kind in [
        OutputKind::Object,
        OutputKind::Assembly,
        OutputKind::PreprocessedSource,
    ] {
        for debug_info in [false, true] {
            let mut spec = ProgramSpec::new("x.c", "x.out", kind);
            spec.debug_info = debug_info;
            let flags = compiler.flags(&spec, &dirs);

            assert_eq!(flags.contains("-E"), kind == OutputKind::PreprocessedSource);
            assert_eq!(flags.contains("-S"), kind == OutputKind::Assembly);
            let expect_debug = match kind {
                OutputKind::Assembly => true,
                OutputKind::Object => debug_info,
                OutputKind::PreprocessedSource => false,
            };
            assert_eq!(flags.contains("-g"), expect_debug, "{kind:?} debug={debug_info}");
        }
    }
}

/// Test: non-zero exit yields a toolchain error with the diagnostic tail logged
#[traced_test]
#[tokio::test]
async fn test_failed_compile_reports_diagnostics() {
    let fake = FakeToolchain::new(Behaviour {
        fail_at: 1,
        ..Default::default()
    });
    let layout = Layout::new();
    let compiler = Compiler::new(fake.toolchain(), IsaLevel::V1);

    let err = compiler
        .compile(
            &ProgramSpec::object("x.c", "x.o"),
            &layout.dirs,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match &err {
        CompileError::Toolchain {
            artifact,
            pid,
            exit_status,
            diagnostics,
            ..
        } => {
            assert_eq!(artifact, "x.o");
            assert!(pid.is_some());
            assert_eq!(exit_status.and_then(|s| s.code()), Some(1));
            let lines: Vec<_> = diagnostics.lines().collect();
            assert_eq!(
                lines,
                vec!["x.c:1:1: error: synthetic failure", "1 error generated."]
            );
        }
        other => panic!("expected Toolchain, got {:?}", other),
    }
    assert!(err.to_string().starts_with("Failed to compile x.o"));
    assert!(logs_contain("synthetic failure"));
    assert!(!logs_contain("not-started"));
}

/// Test: cancelling mid-compile kills the process and logs nothing at failure level
#[traced_test]
#[tokio::test]
async fn test_cancel_mid_compile_is_quiet() {
    let fake = FakeToolchain::new(Behaviour {
        hang: true,
        ..Default::default()
    });
    let layout = Layout::new();
    let compiler = Compiler::new(fake.toolchain(), IsaLevel::V1);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = compiler
        .compile(&ProgramSpec::object("x.c", "x.o"), &layout.dirs, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "expected cancellation, got {err:?}");
    assert!(start.elapsed() < Duration::from_secs(10));
    logs_assert(|lines: &[&str]| {
        if has_failure_logs(lines) {
            Err(format!("unexpected failure-level logs: {lines:?}"))
        } else {
            Ok(())
        }
    });
}

/// Test: cancellation wins while a leftover process still holds the compiler's stderr
#[traced_test]
#[tokio::test]
async fn test_cancel_while_stderr_held_open() {
    let fake = FakeToolchain::new(Behaviour {
        fail_at: 1,
        linger_stderr: true,
        ..Default::default()
    });
    let layout = Layout::new();
    let compiler = Compiler::new(fake.toolchain(), IsaLevel::V1);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = compiler
        .compile(&ProgramSpec::object("x.c", "x.o"), &layout.dirs, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "expected cancellation, got {err:?}");
    assert!(start.elapsed() < Duration::from_secs(4));
    logs_assert(|lines: &[&str]| {
        if has_failure_logs(lines) {
            Err(format!("unexpected failure-level logs: {lines:?}"))
        } else {
            Ok(())
        }
    });
}

/// Test: an existing artifact is truncated, not appended to
#[tokio::test]
async fn test_destination_is_truncated() {
    let fake = FakeToolchain::new(Behaviour::default());
    let layout = Layout::new();
    std::fs::write(layout.output("x.o"), vec![b'z'; 64 * 1024]).unwrap();

    let compiler = Compiler::new(fake.toolchain(), IsaLevel::V1);
    compiler
        .compile(
            &ProgramSpec::object("x.c", "x.o"),
            &layout.dirs,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let artifact = std::fs::read_to_string(layout.output("x.o")).unwrap();
    assert!(artifact.starts_with("artifact from:"));
    assert!(artifact.len() < 64 * 1024);
}

/// Test: the version query returns the toolchain banner
#[tokio::test]
async fn test_version_query() {
    let fake = FakeToolchain::new(Behaviour::default());
    let version = fake
        .toolchain()
        .version(&CancellationToken::new())
        .await
        .unwrap();
    assert!(version.contains("fake clang version"));
    assert!(fake.invocations().is_empty());
}
