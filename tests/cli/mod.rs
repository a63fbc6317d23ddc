//! CLI tests running the built `reattach` binary.

pub mod common;
pub mod run_test;
