//! Live Snowflake tests.
//!
//! Skipped unless SNOWFLAKE_TEST_ACCOUNT is set; credentials and context come
//! from the other SNOWFLAKE_TEST_* variables.

use std::sync::Arc;
use std::time::Duration;

use db_reattach::config::{Config, ConnectionConfig, PollerConfig};
use db_reattach::db::{SessionFactory, SnowflakeSessionFactory, Value};
use db_reattach::detached::{DetachedQueryManager, PollState};
use db_reattach::error::DetachError;
use tokio_util::sync::CancellationToken;

/// Helper to build the test configuration from the environment.
fn get_test_config() -> Option<Config> {
    std::env::var("SNOWFLAKE_TEST_ACCOUNT").ok()?;
    let mut connection = ConnectionConfig::default();
    connection.apply_env_defaults();
    Some(Config {
        connection,
        poller: PollerConfig {
            max_wait_secs: Some(120),
            ..Default::default()
        },
    })
}

fn get_test_manager(config: &Config) -> DetachedQueryManager {
    let factory = SnowflakeSessionFactory::new().unwrap();
    DetachedQueryManager::new(Arc::new(factory), config).unwrap()
}

/// Scenario: Detached wait against a live account
/// Given valid SNOWFLAKE_TEST_* credentials
/// When a 10 second wait is run detached
/// Then the submitting session is closed while it runs
/// And the result is read back by query id
#[tokio::test]
async fn test_live_detached_wait() {
    let Some(config) = get_test_config() else {
        eprintln!("Skipping test: SNOWFLAKE_TEST_ACCOUNT not set");
        return;
    };

    let stream = get_test_manager(&config)
        .run("CALL SYSTEM$WAIT(10, 'SECONDS')", &CancellationToken::new())
        .await
        .unwrap();
    assert!(stream.report().polls >= 1);

    let rows = stream.collect_rows().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(matches!(&rows[0][0], Value::String(s) if s.contains("waited")));
}

#[tokio::test]
async fn test_live_status_of_submitted_query() {
    let Some(config) = get_test_config() else {
        eprintln!("Skipping test: SNOWFLAKE_TEST_ACCOUNT not set");
        return;
    };
    let manager = get_test_manager(&config);

    let query_id = manager.submit("SELECT 1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let check = manager.check_status(&query_id).await.unwrap();

    assert!(!matches!(check.state, PollState::Failed(_)));
}

#[tokio::test]
async fn test_live_bound_parameters() {
    let Some(config) = get_test_config() else {
        eprintln!("Skipping test: SNOWFLAKE_TEST_ACCOUNT not set");
        return;
    };

    let factory = SnowflakeSessionFactory::new().unwrap();
    let session = factory.open(&config.connection).await.unwrap();
    let rows = session
        .query("SELECT ?::NUMBER AS N, ? AS S", &[Value::Int(7), Value::from("x")])
        .await
        .unwrap()
        .collect_rows()
        .await
        .unwrap();
    session.close().await.unwrap();

    assert_eq!(rows, vec![vec![Value::Int(7), Value::from("x")]]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_host() {
    let config = ConnectionConfig {
        account: Some("acme".to_string()),
        user: Some("nobody".to_string()),
        password: Some("wrong".to_string()),
        host: Some("invalid.host.that.does.not.exist.local".to_string()),
        ..Default::default()
    };

    let factory = SnowflakeSessionFactory::new().unwrap();
    let result = factory.open(&config).await;

    match result {
        Err(DetachError::Connection(msg)) => {
            assert!(msg.contains("invalid.host.that.does.not.exist.local"));
        }
        Err(other) => panic!("Expected Connection error, got {:?}", other),
        Ok(_) => panic!("Expected connection to fail"),
    }
}

#[tokio::test]
async fn test_connect_requires_credentials() {
    let factory = SnowflakeSessionFactory::new().unwrap();
    let result = factory.open(&ConnectionConfig::default()).await;

    match result {
        Err(DetachError::Settings(msg)) => {
            assert!(msg.contains("account"));
            assert!(msg.contains("password"));
        }
        Err(other) => panic!("Expected Settings error, got {:?}", other),
        Ok(_) => panic!("Expected validation to fail"),
    }
}
