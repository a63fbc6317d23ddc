//! Session abstraction layer for db-reattach.
//!
//! Provides a trait-based interface to the warehouse service so the
//! detached-query lifecycle can run against the real REST backend or the
//! in-memory mock interchangeably.

mod mock;
mod snowflake;
mod types;

pub use mock::{MockSession, MockWarehouse, OracleReply, StatementLog};
pub use snowflake::{SnowflakeSession, SnowflakeSessionFactory};
pub use types::{ColumnInfo, LiveCursor, QueryId, Row, RowCursor, SessionId, Value};

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Supported session backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Snowflake,
    Mock,
}

impl SessionBackend {
    /// Returns the backend as a string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snowflake => "snowflake",
            Self::Mock => "mock",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "snowflake" => Some(Self::Snowflake),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

/// Creates the session factory for the given backend.
///
/// The mock backend gets a warehouse that completes every detached
/// statement after a short running phase.
pub fn session_factory(backend: SessionBackend) -> Result<Arc<dyn SessionFactory>> {
    match backend {
        SessionBackend::Snowflake => Ok(Arc::new(SnowflakeSessionFactory::new()?)),
        SessionBackend::Mock => Ok(Arc::new(MockWarehouse::demo())),
    }
}

/// Opens sessions against the warehouse service.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Opens a new, independent session.
    async fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>>;
}

/// One logical connection to the warehouse service.
///
/// A session is open from the moment [`SessionFactory::open`] returns until
/// [`Session::close`] consumes it.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identity of this session.
    fn id(&self) -> SessionId;

    /// Executes a statement to completion and returns the affected row count.
    async fn execute(&self, statement: &str) -> Result<u64>;

    /// Executes a statement with positional `?` parameters and returns its rows.
    async fn query(&self, statement: &str, params: &[Value]) -> Result<RowCursor>;

    /// Returns the detached-execution capability if the backend supports it.
    fn detached(&self) -> Option<&dyn DetachedExecution> {
        None
    }

    /// Closes the session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Capability to submit a statement without waiting for it to finish.
#[async_trait]
pub trait DetachedExecution: Send + Sync {
    /// Submits the statement and returns as soon as the server has assigned
    /// it a query id.
    async fn execute_detached(&self, statement: &str) -> Result<LiveCursor>;
}
