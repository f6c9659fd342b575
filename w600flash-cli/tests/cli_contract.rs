//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("w600flash")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("w600flash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("w600flash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_documents_the_flag_surface() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--upload")
                .and(predicate::str::contains("--get-mac"))
                .and(predicate::str::contains("--set-mac"))
                .and(predicate::str::contains("--erase"))
                .and(predicate::str::contains("--upload-baud")),
        );
}

// ============================================================================
// Exit Code Tests
// ============================================================================

/// Exit code 2: usage error (invalid arguments)
#[test]
fn exit_code_two_for_unsupported_baud() {
    let mut cmd = cli_cmd();
    cmd.args(["--baud", "9600"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("baud"));
}

#[test]
fn exit_code_two_for_unsupported_upload_baud() {
    let mut cmd = cli_cmd();
    cmd.args(["--upload-baud", "12345"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_malformed_mac() {
    let mut cmd = cli_cmd();
    cmd.args(["--set-mac", "not-a-mac"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("hex"));
}

#[test]
fn exit_code_two_for_unknown_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz").assert().failure().code(2);
}

/// Missing upload file is a precondition failure, reported before any
/// device I/O happens.
#[test]
fn missing_upload_file_fails_fast_with_diagnostic() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.fls");

    let mut cmd = cli_cmd();
    cmd.arg("--port")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("--upload")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("does not exist"));
}

/// An unreachable device must not succeed, and must keep stdout clean.
#[test]
fn unreachable_port_fails_with_stderr_diagnostic() {
    let mut cmd = cli_cmd();
    cmd.env("RUST_LOG", "error")
        .arg("--quiet")
        .arg("--port")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("--get-mac")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty().not());
}

// ============================================================================
// Hardware-independent commands
// ============================================================================

#[test]
fn list_ports_runs_without_hardware() {
    let mut cmd = cli_cmd();
    cmd.arg("--list-ports").assert().success();
}

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd.arg("--help").assert().success().get_output().clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    // ANSI color codes should NOT appear in non-TTY output
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

#[test]
fn env_variable_sets_baud() {
    // An unsupported baud via env var must be rejected like a flag
    let mut cmd = cli_cmd();
    cmd.env("W600FLASH_BAUD", "1200").assert().failure().code(2);
}
