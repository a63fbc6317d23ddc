//! Library-level integration tests.

pub mod lifecycle_test;
pub mod snowflake_test;
