//! Scoped ownership of an open session.

use tracing::{debug, warn};

use crate::db::{Session, SessionId};
use crate::error::Result;

/// Owns an open session and guarantees it is closed.
///
/// [`SessionGuard::release`] closes the session and reports the outcome. A
/// guard dropped without being released (an early return, or a cancelled
/// future) hands the session to a background task that closes it.
pub struct SessionGuard {
    id: SessionId,
    session: Option<Box<dyn Session>>,
}

impl SessionGuard {
    /// Takes ownership of an open session.
    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            id: session.id(),
            session: Some(session),
        }
    }

    /// Identity of the guarded session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Borrows the guarded session.
    pub fn session(&self) -> &dyn Session {
        self.session
            .as_deref()
            .expect("session is present until the guard is released")
    }

    /// Closes the session.
    pub async fn release(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => {
                debug!("Closing {}", self.id);
                session.close().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("{id} dropped without release, closing in background");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("Background close of {id} failed: {e}");
                    }
                });
            }
            Err(_) => warn!("{id} dropped outside a runtime and could not be closed"),
        }
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("id", &self.id)
            .field("open", &self.session.is_some())
            .finish()
    }
}
