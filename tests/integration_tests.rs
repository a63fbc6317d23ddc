//! Integration tests for db-reattach.
//!
//! Lifecycle and CLI tests run against the in-memory mock warehouse. The
//! Snowflake tests need a live account; set SNOWFLAKE_TEST_ACCOUNT,
//! SNOWFLAKE_TEST_USER and SNOWFLAKE_TEST_PASSWORD to run them.
//!
//! Run with: `cargo test --test integration_tests`

mod cli;
mod integration;
