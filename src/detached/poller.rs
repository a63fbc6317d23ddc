//! Status poller.
//!
//! Asks the warehouse's query-history relation for the execution status of
//! one query id until the query succeeds, fails, or the caller's budget or
//! cancellation ends the wait. The history relation lags behind submission,
//! so "no row" means "not recorded yet", not "gone".

use std::time::Duration;

use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::db::{QueryId, Session, Value};
use crate::error::{DetachError, Result};

/// Where the poller stands after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Not finished yet; wait and poll again.
    Polling,
    /// The query finished successfully.
    Succeeded,
    /// The query finished with this non-success status.
    Failed(String),
    /// Polling stopped without a verdict on the query.
    Aborted(AbortReason),
}

impl PollState {
    /// Returns true for every state except `Polling`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Polling)
    }
}

/// Why polling stopped without a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The status lookup failed.
    Error(String),
    /// The wait or poll budget ran out.
    Timeout,
    /// The caller cancelled.
    Cancelled,
}

/// One answer from the history relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// No row for the query yet.
    Absent,
    /// The recorded execution status.
    Reported(String),
}

/// Classification of server status strings.
///
/// Matching ignores case and surrounding whitespace. Anything that is
/// neither a success nor a running status is a terminal failure.
#[derive(Debug, Clone)]
pub struct StatusVocabulary {
    success: Vec<String>,
    running: Vec<String>,
}

impl StatusVocabulary {
    /// Builds a vocabulary from success and running status lists.
    pub fn new<S: AsRef<str>>(success: &[S], running: &[S]) -> Self {
        Self {
            success: canonical(success),
            running: canonical(running),
        }
    }

    /// Maps an observation to the next poller state.
    pub fn transition(&self, observation: &Observation) -> PollState {
        match observation {
            Observation::Absent => PollState::Polling,
            Observation::Reported(status) => {
                let status_upper = status.trim().to_uppercase();
                if self.success.contains(&status_upper) {
                    PollState::Succeeded
                } else if self.running.contains(&status_upper) {
                    PollState::Polling
                } else {
                    PollState::Failed(status.clone())
                }
            }
        }
    }
}

fn canonical<S: AsRef<str>>(list: &[S]) -> Vec<String> {
    list.iter()
        .map(|s| s.as_ref().trim().to_uppercase())
        .collect()
}

/// Counters describing one polling run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Status lookups issued.
    pub polls: u32,
    /// Backoff waits completed.
    pub waits: u32,
    /// Most recent status reported by the server.
    pub last_status: Option<String>,
    /// Time from the first lookup to the terminal state.
    pub elapsed: Duration,
}

/// Proof that a query id was observed in a success state.
///
/// Only the poller constructs these; the result materializer requires one.
#[derive(Debug, Clone)]
pub struct CompletedQuery {
    query_id: QueryId,
    report: PollReport,
}

impl CompletedQuery {
    /// The succeeded query.
    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// How the poller got there.
    pub fn report(&self) -> &PollReport {
        &self.report
    }
}

/// Polls the query-history relation for one query id at a time.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    vocabulary: StatusVocabulary,
    interval: Duration,
    max_wait: Option<Duration>,
    max_polls: Option<u32>,
    status_sql: String,
}

impl StatusPoller {
    /// Creates a poller from validated settings.
    pub fn new(config: &PollerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            vocabulary: StatusVocabulary::new(&config.success_statuses, &config.running_statuses),
            interval: config.interval(),
            max_wait: config.max_wait(),
            max_polls: config.max_polls,
            status_sql: format!(
                "SELECT EXECUTION_STATUS FROM TABLE({}()) WHERE QUERY_ID = ?",
                config.history_function
            ),
        })
    }

    /// The status lookup statement; the query id is bound to its `?`.
    pub fn status_statement(&self) -> &str {
        &self.status_sql
    }

    /// The status classification in use.
    pub fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    /// Issues one status lookup.
    pub async fn observe(&self, session: &dyn Session, query_id: &QueryId) -> Result<Observation> {
        let mut cursor = session
            .query(&self.status_sql, &[Value::from(query_id)])
            .await
            .map_err(|e| DetachError::poll(query_id, e.detail()))?;

        match cursor.next_row().await {
            None => Ok(Observation::Absent),
            Some(Err(e)) => Err(DetachError::poll(query_id, e.detail())),
            Some(Ok(row)) => match row.into_iter().next() {
                None | Some(Value::Null) => Ok(Observation::Absent),
                Some(Value::String(status)) => Ok(Observation::Reported(status)),
                Some(other) => Ok(Observation::Reported(other.to_display_string())),
            },
        }
    }

    /// Runs the state machine to a terminal state.
    ///
    /// Returns the terminal state together with the counters; callers that
    /// only care about success should use [`StatusPoller::poll_until_complete`].
    pub async fn run(
        &self,
        session: &dyn Session,
        query_id: &QueryId,
        cancel: &CancellationToken,
    ) -> (PollState, PollReport) {
        let started = Instant::now();
        let mut report = PollReport::default();

        let state = loop {
            report.polls += 1;
            let remaining = self.max_wait.map(|max| max.saturating_sub(started.elapsed()));
            let lookup = async {
                match remaining {
                    Some(left) => timeout(left, self.observe(session, query_id)).await.ok(),
                    None => Some(self.observe(session, query_id).await),
                }
            };

            let observed = tokio::select! {
                biased;

                observed = lookup => observed,
                _ = cancel.cancelled() => break PollState::Aborted(AbortReason::Cancelled),
            };
            let Some(observed) = observed else {
                warn!("Status lookup for query {query_id} outlived the wait budget");
                break PollState::Aborted(AbortReason::Timeout);
            };

            let state = match observed {
                Ok(observation) => {
                    if let Observation::Reported(status) = &observation {
                        report.last_status = Some(status.clone());
                    }
                    debug!(
                        "Poll {} for query {query_id}: {:?}",
                        report.polls, observation
                    );
                    self.vocabulary.transition(&observation)
                }
                Err(e) => PollState::Aborted(AbortReason::Error(e.detail())),
            };

            if state.is_terminal() {
                break state;
            }

            if self.max_polls.is_some_and(|max| report.polls >= max) {
                break PollState::Aborted(AbortReason::Timeout);
            }
            if self
                .max_wait
                .is_some_and(|max| started.elapsed() + self.interval > max)
            {
                break PollState::Aborted(AbortReason::Timeout);
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break PollState::Aborted(AbortReason::Cancelled),
                _ = tokio::time::sleep(self.interval) => report.waits += 1,
            }
        };

        report.elapsed = started.elapsed();
        (state, report)
    }

    /// Polls until the query succeeds; every other outcome is an error.
    pub async fn poll_until_complete(
        &self,
        session: &dyn Session,
        query_id: &QueryId,
        cancel: &CancellationToken,
    ) -> Result<CompletedQuery> {
        info!("Polling status of query {query_id} on {}", session.id());
        let (state, report) = self.run(session, query_id, cancel).await;

        match state {
            PollState::Succeeded => {
                info!(
                    "Query {query_id} succeeded after {} polls ({:?})",
                    report.polls, report.elapsed
                );
                Ok(CompletedQuery {
                    query_id: query_id.clone(),
                    report,
                })
            }
            PollState::Failed(status) => {
                warn!("Query {query_id} finished with status {status}");
                Err(DetachError::QueryFailed {
                    query_id: query_id.clone(),
                    status,
                })
            }
            PollState::Aborted(AbortReason::Error(message)) => {
                Err(DetachError::poll(query_id, message))
            }
            PollState::Aborted(AbortReason::Timeout) => {
                warn!(
                    "Gave up on query {query_id} after {} polls; it may still be running",
                    report.polls
                );
                Err(DetachError::Timeout {
                    query_id: query_id.clone(),
                    polls: report.polls,
                    elapsed: report.elapsed,
                })
            }
            PollState::Aborted(AbortReason::Cancelled) => {
                info!("Polling for query {query_id} cancelled");
                Err(DetachError::Cancelled {
                    query_id: query_id.clone(),
                })
            }
            PollState::Polling => Err(DetachError::internal(
                "Poller stopped in a non-terminal state",
            )),
        }
    }
}
