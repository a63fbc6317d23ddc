//! Error types for db-reattach.
//!
//! Every stage of the detached-query lifecycle maps its failures onto one
//! variant of [`DetachError`], so callers can tell which stage failed.

use std::time::Duration;

use thiserror::Error;

use crate::db::QueryId;

/// Main error type for detached-query operations.
#[derive(Error, Debug)]
pub enum DetachError {
    /// Opening or closing a session failed (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session parameter that keeps detached queries alive could not be applied.
    #[error("Session configuration error: {0}")]
    Configuration(String),

    /// Submitting the detached statement failed; no query id exists.
    #[error("Launch error: {0}")]
    Launch(String),

    /// The status lookup itself failed (transport error, malformed query id, ...).
    #[error("Poll error for query {query_id}: {message}")]
    Poll { query_id: QueryId, message: String },

    /// The status oracle reported a terminal failure for the query.
    #[error("Query {query_id} finished with status {status}")]
    QueryFailed { query_id: QueryId, status: String },

    /// The caller-supplied wait or poll budget ran out.
    #[error("Timed out waiting for query {query_id} after {polls} polls ({elapsed:?})")]
    Timeout {
        query_id: QueryId,
        polls: u32,
        elapsed: Duration,
    },

    /// Polling was cancelled by the caller.
    #[error("Polling for query {query_id} was cancelled")]
    Cancelled { query_id: QueryId },

    /// The result scan failed after success had been observed.
    #[error("Fetch error for query {query_id}: {message}")]
    Fetch { query_id: QueryId, message: String },

    /// A statement failed at the session level, before a stage classified it.
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid configuration file, missing required fields, etc.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Unexpected states, bugs, etc.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetachError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a session configuration error with the given message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a launch error with the given message.
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Creates a poll error for the given query.
    pub fn poll(query_id: &QueryId, msg: impl Into<String>) -> Self {
        Self::Poll {
            query_id: query_id.clone(),
            message: msg.into(),
        }
    }

    /// Creates a fetch error for the given query.
    pub fn fetch(query_id: &QueryId, msg: impl Into<String>) -> Self {
        Self::Fetch {
            query_id: query_id.clone(),
            message: msg.into(),
        }
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a settings error with the given message.
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Configuration(_) => "Configuration Error",
            Self::Launch(_) => "Launch Error",
            Self::Poll { .. }
            | Self::QueryFailed { .. }
            | Self::Timeout { .. }
            | Self::Cancelled { .. } => "Poll Error",
            Self::Fetch { .. } => "Fetch Error",
            Self::Query(_) => "Query Error",
            Self::Settings(_) => "Settings Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the message without the category prefix, for re-wrapping
    /// into a stage-specific variant.
    pub fn detail(&self) -> String {
        match self {
            Self::Connection(msg)
            | Self::Configuration(msg)
            | Self::Launch(msg)
            | Self::Query(msg)
            | Self::Settings(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::Poll { message, .. } | Self::Fetch { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns the query id this error refers to, if one had been captured.
    pub fn query_id(&self) -> Option<&QueryId> {
        match self {
            Self::Poll { query_id, .. }
            | Self::QueryFailed { query_id, .. }
            | Self::Timeout { query_id, .. }
            | Self::Cancelled { query_id }
            | Self::Fetch { query_id, .. } => Some(query_id),
            _ => None,
        }
    }
}

/// Result type alias using DetachError.
pub type Result<T> = std::result::Result<T, DetachError>;
