//! Common test utilities for CLI tests.

use std::process::Command;

/// Run reattach against the mock warehouse with the given arguments.
///
/// The config path points at a file that does not exist so a local config
/// cannot change the outcome.
pub fn run_mock(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_reattach"))
        .args(args)
        .args([
            "--mock-db",
            "--interval-ms",
            "10",
            "--config",
            "/nonexistent/db-reattach/config.toml",
        ])
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command");

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    (exit_code, stdout, stderr)
}
