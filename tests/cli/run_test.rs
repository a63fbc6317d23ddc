//! End-to-end tests for the `reattach` subcommands.

use super::common::run_mock;

#[test]
fn test_run_prints_rows() {
    let (code, stdout, stderr) = run_mock(&["run", "CALL SYSTEM$WAIT(10, 'SECONDS')"]);

    assert_eq!(code, 0, "stderr: {stderr}");
    assert_eq!(stdout, "SYSTEM$WAIT\nwaited 10 seconds\n");
    assert!(stderr.contains("Submitted detached statement as query"));
}

#[test]
fn test_run_json_output() {
    let (code, stdout, _) = run_mock(&[
        "run",
        "CALL SYSTEM$WAIT(10, 'SECONDS')",
        "--format",
        "json",
    ]);

    assert_eq!(code, 0);
    let row: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(row["SYSTEM$WAIT"], "waited 10 seconds");
}

#[test]
fn test_submit_prints_query_id() {
    let (code, stdout, _) = run_mock(&["submit", "SELECT 1"]);

    assert_eq!(code, 0);
    assert!(stdout.trim().starts_with("01b00000-"));
}

#[test]
fn test_status_of_unrecorded_query() {
    let (code, stdout, _) = run_mock(&["status", "01b00000-0000-4000-0000-000000000001"]);

    assert_eq!(code, 0);
    assert_eq!(
        stdout,
        "01b00000-0000-4000-0000-000000000001\t(not recorded yet)\trunning\n"
    );
}

#[test]
fn test_resume_unknown_query_fails() {
    let (code, stdout, stderr) = run_mock(&["resume", "01b00000-0000-4000-0000-000000000042"]);

    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Fetch Error"));
}

#[test]
fn test_max_polls_timeout_suggests_resume() {
    let (code, _, stderr) = run_mock(&["run", "SELECT 1", "--max-polls", "1"]);

    assert_eq!(code, 1);
    assert!(stderr.contains("Poll Error"));
    assert!(stderr.contains("reattach resume"));
}

#[test]
fn test_invalid_format_rejected() {
    let (code, stdout, stderr) = run_mock(&["status", "q", "--format", "csv"]);

    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Invalid output format"));
}
