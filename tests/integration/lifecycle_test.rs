//! Detached-query lifecycle tests against the mock warehouse.

use std::sync::Arc;

use db_reattach::config::{Config, PollerConfig};
use db_reattach::db::{ColumnInfo, MockWarehouse, OracleReply, Session, SessionFactory, Value};
use db_reattach::detached::{gate, DetachedQueryManager};
use db_reattach::error::DetachError;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const WAIT: &str = "CALL SYSTEM$WAIT(10, 'SECONDS')";

fn manager_with(warehouse: &MockWarehouse, poller: PollerConfig) -> DetachedQueryManager {
    let config = Config {
        poller,
        ..Default::default()
    };
    DetachedQueryManager::new(Arc::new(warehouse.clone()), &config).unwrap()
}

fn manager(warehouse: &MockWarehouse) -> DetachedQueryManager {
    manager_with(warehouse, PollerConfig::default())
}

fn wait_result(warehouse: MockWarehouse) -> MockWarehouse {
    warehouse.with_result(
        WAIT,
        vec![ColumnInfo::new("SYSTEM$WAIT", "text")],
        vec![vec![Value::from("waited 10 seconds")]],
    )
}

/// Scenario: Detached wait survives the submitting session
/// Given the history relation reports absent, absent, running, success
/// When the wait statement is run detached
/// Then the poller makes 4 lookups with 3 waits
/// And the single expected row is returned
#[tokio::test(start_paused = true)]
async fn test_wait_statement_end_to_end() {
    let warehouse = wait_result(MockWarehouse::new()).with_oracle([
        OracleReply::Absent,
        OracleReply::Absent,
        OracleReply::status("RUNNING"),
        OracleReply::status("SUCCESS"),
    ]);

    let stream = manager(&warehouse)
        .run(WAIT, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stream.report().polls, 4);
    assert_eq!(stream.report().waits, 3);
    assert_eq!(stream.report().last_status.as_deref(), Some("SUCCESS"));
    assert_eq!(stream.columns()[0].name, "SYSTEM$WAIT");

    let rows = stream.collect_rows().await.unwrap();
    assert_eq!(rows, vec![vec![Value::from("waited 10 seconds")]]);
}

/// Scenario: Fetched rows match direct execution
/// Given a statement with a registered multi-column result
/// When it is run detached and also queried directly
/// Then both produce the same rows
#[tokio::test(start_paused = true)]
async fn test_fetched_rows_equal_direct_execution() {
    let statement = "SELECT ID, NAME, ACTIVE FROM USERS ORDER BY ID";
    let warehouse = MockWarehouse::new()
        .with_oracle([OracleReply::Absent, OracleReply::status("SUCCESS")])
        .with_result(
            statement,
            vec![
                ColumnInfo::new("ID", "fixed"),
                ColumnInfo::new("NAME", "text"),
                ColumnInfo::new("ACTIVE", "boolean"),
            ],
            vec![
                vec![Value::Int(1), Value::from("alice"), Value::Bool(true)],
                vec![Value::Int(2), Value::Null, Value::Bool(false)],
            ],
        );

    let detached = manager(&warehouse)
        .run(statement, &CancellationToken::new())
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();

    let session = warehouse
        .open(&Default::default())
        .await
        .unwrap();
    let direct = session
        .query(statement, &[])
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();
    session.close().await.unwrap();

    assert_eq!(detached, direct);
}

/// Scenario: Submitting session is never reused
/// Given a query that takes several polls
/// When the workflow runs
/// Then the submitting session is closed before the first status lookup
/// And every lookup and the fetch use the second session
#[tokio::test(start_paused = true)]
async fn test_polls_never_use_submitting_session() {
    let warehouse = wait_result(MockWarehouse::new()).with_oracle([
        OracleReply::Absent,
        OracleReply::status("QUEUED"),
        OracleReply::status("SUCCESS"),
    ]);

    manager(&warehouse)
        .run(WAIT, &CancellationToken::new())
        .await
        .unwrap()
        .close()
        .await
        .unwrap();

    let opened = warehouse.opened_sessions();
    assert_eq!(opened.len(), 2);
    let (submitting, polling) = (opened[0], opened[1]);
    assert_eq!(warehouse.closed_sessions(), vec![submitting, polling]);

    let log = warehouse.statements();
    let first_lookup = log
        .iter()
        .position(|entry| entry.statement.starts_with("SELECT EXECUTION_STATUS"))
        .unwrap();
    assert!(log[..first_lookup]
        .iter()
        .all(|entry| entry.session == submitting));
    assert!(log[first_lookup..]
        .iter()
        .all(|entry| entry.session == polling));
}

/// Scenario: Gate runs before launch on the same session
#[tokio::test]
async fn test_gate_precedes_launch() {
    let warehouse = MockWarehouse::new();

    let query_id = manager(&warehouse).submit(WAIT).await.unwrap();

    let log = warehouse.statements();
    assert_eq!(log[0].statement, gate::DISABLE_DETACHED_ABORT);
    assert!(!log[0].detached);
    assert_eq!(log[1].statement, WAIT);
    assert!(log[1].detached);
    assert_eq!(log[0].session, log[1].session);
    assert_eq!(warehouse.launched_queries(), vec![(query_id, log[1].session)]);
}

/// Scenario: Gate failure aborts before launch
#[tokio::test]
async fn test_gate_failure_aborts_before_launch() {
    let warehouse = MockWarehouse::new().fail_execute("Insufficient privileges to alter session");

    let err = manager(&warehouse)
        .run(WAIT, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "Configuration Error");
    assert!(warehouse.launched_queries().is_empty());
    assert_eq!(warehouse.opened_sessions().len(), 1);
    assert_eq!(warehouse.open_session_count(), 0);
}

/// Scenario: Submission failure produces no id and no rebind
#[tokio::test]
async fn test_launch_failure_never_rebinds() {
    let warehouse = MockWarehouse::new().fail_launch("SQL compilation error: syntax error");

    let err = manager(&warehouse)
        .run("CALL SYSTEM$WAIT(", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DetachError::Launch(_)));
    assert!(err.query_id().is_none());
    assert_eq!(warehouse.opened_sessions().len(), 1);
    assert!(warehouse.status_polls().is_empty());
    assert_eq!(warehouse.open_session_count(), 0);
}

/// Scenario: Terminal failure status stops polling without a fetch
#[tokio::test(start_paused = true)]
async fn test_failed_status_skips_fetch() {
    let warehouse = MockWarehouse::new().with_oracle([
        OracleReply::status("RUNNING"),
        OracleReply::status("FAILED_WITH_ERROR"),
    ]);

    let err = manager(&warehouse)
        .run(WAIT, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        DetachError::QueryFailed { status, .. } => assert_eq!(status, "FAILED_WITH_ERROR"),
        other => panic!("Expected QueryFailed, got {:?}", other),
    }
    assert!(!warehouse
        .statements()
        .iter()
        .any(|entry| entry.statement.contains("RESULT_SCAN")));
    assert_eq!(warehouse.open_session_count(), 0);
}

/// Scenario: History never records the query
/// Given the history relation always reports no row
/// And a 5 second wait budget with a 2 second backoff
/// When the workflow runs
/// Then it times out after 3 lookups
#[tokio::test(start_paused = true)]
async fn test_always_absent_times_out_after_three_polls() {
    let warehouse = MockWarehouse::new();
    let poller = PollerConfig {
        max_wait_secs: Some(5),
        ..Default::default()
    };

    let err = manager_with(&warehouse, poller)
        .run(WAIT, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        DetachError::Timeout { polls, query_id, .. } => {
            assert_eq!(polls, 3);
            assert_eq!(warehouse.launched_queries()[0].0, query_id);
        }
        other => panic!("Expected Timeout, got {:?}", other),
    }
    assert_eq!(warehouse.status_polls().len(), 3);
    assert_eq!(warehouse.open_session_count(), 0);
}

/// Scenario: Result scan fails after success was observed
#[tokio::test(start_paused = true)]
async fn test_fetch_failure_is_surfaced() {
    let warehouse = MockWarehouse::new()
        .with_oracle([OracleReply::status("SUCCESS")])
        .fail_fetch("Result for query has expired");

    let err = manager(&warehouse)
        .run(WAIT, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "Fetch Error");
    assert!(err.query_id().is_some());
    assert_eq!(warehouse.open_session_count(), 0);
}

/// Scenario: Cancellation mid-wait closes the polling session
#[tokio::test(start_paused = true)]
async fn test_cancellation_releases_session() {
    let warehouse = MockWarehouse::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let err = manager(&warehouse).run(WAIT, &cancel).await.unwrap_err();

    assert!(matches!(err, DetachError::Cancelled { .. }));
    assert_eq!(warehouse.status_polls().len(), 3);
    assert_eq!(warehouse.open_session_count(), 0);
}

/// Scenario: Reattach from another process
/// Given a query submitted and left running
/// When a separate manager resumes it by id
/// Then the rows are fetched without resubmitting the statement
#[tokio::test(start_paused = true)]
async fn test_submit_then_resume_elsewhere() {
    let warehouse = wait_result(MockWarehouse::new())
        .with_oracle([OracleReply::status("RUNNING"), OracleReply::status("SUCCESS")]);

    let query_id = manager(&warehouse).submit(WAIT).await.unwrap();
    let rows = manager(&warehouse)
        .resume(&query_id, &CancellationToken::new())
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();

    assert_eq!(rows, vec![vec![Value::from("waited 10 seconds")]]);
    assert_eq!(warehouse.launched_queries().len(), 1);
    assert_eq!(warehouse.open_session_count(), 0);
}

/// Scenario: Resuming an unknown id reports a fetch failure
#[tokio::test(start_paused = true)]
async fn test_resume_unknown_query() {
    let warehouse = MockWarehouse::new().with_oracle([OracleReply::status("SUCCESS")]);
    let query_id = db_reattach::db::QueryId::new("01b00000-0000-4000-0000-999999999999");

    let err = manager(&warehouse)
        .resume(&query_id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "Fetch Error");
    assert!(err.to_string().contains("not found"));
}
