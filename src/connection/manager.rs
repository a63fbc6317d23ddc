//! Session manager: opens sessions and swaps the submitting session for a
//! fresh one once a detached query is in flight.

use std::sync::Arc;

use tracing::{debug, info};

use super::SessionGuard;
use crate::config::ConnectionConfig;
use crate::db::SessionFactory;
use crate::error::{DetachError, Result};

/// Opens sessions with one fixed set of connection parameters.
#[derive(Clone)]
pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    config: ConnectionConfig,
}

impl SessionManager {
    /// Creates a session manager.
    pub fn new(factory: Arc<dyn SessionFactory>, config: ConnectionConfig) -> Self {
        Self { factory, config }
    }

    /// Connection parameters used for every session.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens a new session.
    pub async fn open(&self) -> Result<SessionGuard> {
        debug!("Opening session to {}", self.config.display_string());
        let session = self.factory.open(&self.config).await?;
        debug!("Opened {}", session.id());
        Ok(SessionGuard::new(session))
    }

    /// Closes the submitting session and opens an independent replacement.
    ///
    /// Taking the submitting guard by value means nothing can use it after
    /// this call.
    pub async fn rebind(&self, submitting: SessionGuard) -> Result<SessionGuard> {
        let old = submitting.id();
        submitting.release().await.map_err(|e| {
            DetachError::connection(format!("Failed to close submitting {old}: {e}"))
        })?;
        info!("Closed submitting {old}, opening a new session");

        let fresh = self.open().await?;
        if fresh.id() == old {
            return Err(DetachError::internal(format!(
                "Backend reused {old} after it was closed"
            )));
        }
        Ok(fresh)
    }
}
