//! Async query launcher.

use tracing::info;

use super::gate::GatedSession;
use crate::db::QueryId;
use crate::error::{DetachError, Result};

/// Submits `statement` without waiting for it and returns its query id.
///
/// The id is taken from the live cursor before this function returns, so it
/// is always in hand before the submitting session can be closed.
pub async fn launch(gated: GatedSession<'_>, statement: &str) -> Result<QueryId> {
    let session = gated.session();
    let detached = session.detached().ok_or_else(|| {
        DetachError::launch(format!(
            "{} does not support detached execution",
            session.id()
        ))
    })?;

    let cursor = detached
        .execute_detached(statement)
        .await
        .map_err(|e| DetachError::launch(e.detail()))?;

    let query_id = cursor.into_query_id();
    if query_id.is_empty() {
        return Err(DetachError::launch("Server returned an empty query id"));
    }

    info!("Submitted detached statement as query {query_id}");
    Ok(query_id)
}
