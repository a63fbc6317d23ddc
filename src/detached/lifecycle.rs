//! Detached-query lifecycle manager.
//!
//! Sequences the stages: gate and launch on a submitting session, rebind to
//! a fresh session, poll, then materialize. Every session opened here is
//! closed on every exit path.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::gate;
use super::launcher;
use super::materializer::{self, release_quietly, ResultStream};
use super::poller::{Observation, PollState, StatusPoller};
use crate::config::Config;
use crate::connection::{SessionGuard, SessionManager};
use crate::db::{QueryId, SessionFactory};
use crate::error::Result;

/// Outcome of a single status lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCheck {
    pub query_id: QueryId,
    pub observation: Observation,
    pub state: PollState,
}

/// Runs detached statements end to end and reattaches to earlier ones.
#[derive(Clone)]
pub struct DetachedQueryManager {
    sessions: SessionManager,
    poller: StatusPoller,
}

impl DetachedQueryManager {
    /// Creates a manager from a session factory and validated settings.
    pub fn new(factory: Arc<dyn SessionFactory>, config: &Config) -> Result<Self> {
        Ok(Self {
            sessions: SessionManager::new(factory, config.connection.clone()),
            poller: StatusPoller::new(&config.poller)?,
        })
    }

    /// The status poller in use.
    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Submits `statement` detached and closes the submitting session.
    ///
    /// Returns the query id to pass to [`DetachedQueryManager::resume`] later.
    pub async fn submit(&self, statement: &str) -> Result<QueryId> {
        let submitting = self.sessions.open().await?;
        let query_id = match gate_and_launch(&submitting, statement).await {
            Ok(query_id) => query_id,
            Err(e) => {
                release_quietly(submitting).await;
                return Err(e);
            }
        };

        if let Err(e) = submitting.release().await {
            warn!("Query {query_id} was submitted but closing the session failed: {e}");
            return Err(e);
        }
        Ok(query_id)
    }

    /// Runs the whole workflow for `statement` and returns its rows.
    ///
    /// The submitting session is closed and replaced before the first status
    /// lookup, so polling and fetching never touch it.
    pub async fn run(&self, statement: &str, cancel: &CancellationToken) -> Result<ResultStream> {
        let submitting = self.sessions.open().await?;
        let query_id = match gate_and_launch(&submitting, statement).await {
            Ok(query_id) => query_id,
            Err(e) => {
                release_quietly(submitting).await;
                return Err(e);
            }
        };

        let polling = match self.sessions.rebind(submitting).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Lost the session after submitting query {query_id}; resume it with this id");
                return Err(e);
            }
        };

        self.poll_and_fetch(polling, &query_id, cancel).await
    }

    /// Reattaches to a query submitted earlier, possibly by another process.
    pub async fn resume(&self, query_id: &QueryId, cancel: &CancellationToken) -> Result<ResultStream> {
        info!("Reattaching to query {query_id}");
        let session = self.sessions.open().await?;
        self.poll_and_fetch(session, query_id, cancel).await
    }

    /// Looks up the status of a query once, without waiting.
    pub async fn check_status(&self, query_id: &QueryId) -> Result<StatusCheck> {
        let session = self.sessions.open().await?;
        let observed = self.poller.observe(session.session(), query_id).await;

        let observation = match observed {
            Ok(observation) => observation,
            Err(e) => {
                release_quietly(session).await;
                return Err(e);
            }
        };
        release_quietly(session).await;

        let state = self.poller.vocabulary().transition(&observation);
        Ok(StatusCheck {
            query_id: query_id.clone(),
            observation,
            state,
        })
    }

    async fn poll_and_fetch(
        &self,
        session: SessionGuard,
        query_id: &QueryId,
        cancel: &CancellationToken,
    ) -> Result<ResultStream> {
        let polled = self
            .poller
            .poll_until_complete(session.session(), query_id, cancel)
            .await;

        match polled {
            Ok(completed) => materializer::materialize(session, completed).await,
            Err(e) => {
                release_quietly(session).await;
                Err(e)
            }
        }
    }
}

async fn gate_and_launch(submitting: &SessionGuard, statement: &str) -> Result<QueryId> {
    let gated = gate::apply(submitting.session()).await?;
    launcher::launch(gated, statement).await
}
