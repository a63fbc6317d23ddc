//! db-reattach - run warehouse queries detached from the session that
//! submitted them, then reattach from a fresh session to collect results.
//!
//! This library exposes the core modules for the `reattach` binary and for
//! integration tests.

pub mod cli;
pub mod config;
pub mod connection;
pub mod db;
pub mod detached;
pub mod error;
pub mod logging;
pub mod output;
