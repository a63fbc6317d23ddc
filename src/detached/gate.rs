//! Session configuration gate.
//!
//! Warehouses cancel a statement when the session that issued it goes away
//! unless told otherwise. The gate turns that off for one session.

use tracing::debug;

use crate::db::Session;
use crate::error::{DetachError, Result};

/// Statement that keeps detached queries running after their session closes.
pub const DISABLE_DETACHED_ABORT: &str = "ALTER SESSION SET ABORT_DETACHED_QUERY = FALSE";

/// A session on which the gate statement has succeeded.
///
/// Only [`apply`] creates one, and the launcher requires one.
#[derive(Clone, Copy)]
pub struct GatedSession<'a> {
    session: &'a dyn Session,
}

impl<'a> GatedSession<'a> {
    /// The session the gate was applied to.
    pub fn session(&self) -> &'a dyn Session {
        self.session
    }
}

/// Disables abort-on-detach for the given session.
pub async fn apply(session: &dyn Session) -> Result<GatedSession<'_>> {
    session
        .execute(DISABLE_DETACHED_ABORT)
        .await
        .map_err(|e| {
            DetachError::configuration(format!(
                "Failed to set ABORT_DETACHED_QUERY on {}: {}",
                session.id(),
                e.detail()
            ))
        })?;

    debug!("ABORT_DETACHED_QUERY disabled on {}", session.id());
    Ok(GatedSession { session })
}
