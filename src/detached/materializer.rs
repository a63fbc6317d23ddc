//! Result materializer.
//!
//! Re-reads a finished query's result set from the server-side cache by query
//! id, without running the statement again.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tracing::{info, warn};

use super::poller::{CompletedQuery, PollReport};
use crate::connection::SessionGuard;
use crate::db::{ColumnInfo, QueryId, Row, Value};
use crate::error::{DetachError, Result};

/// Result-scan statement; the query id is bound to its `?`.
pub const RESULT_SCAN: &str = "SELECT * FROM TABLE(RESULT_SCAN(?))";

/// Rows of a completed detached query.
///
/// Holds the session the rows are read through; [`ResultStream::close`]
/// releases it, and dropping the stream closes it in the background.
pub struct ResultStream {
    query_id: QueryId,
    report: PollReport,
    columns: Vec<ColumnInfo>,
    rows: BoxStream<'static, Result<Row>>,
    session: SessionGuard,
}

impl ResultStream {
    /// The query the rows belong to.
    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// How polling went before the fetch.
    pub fn report(&self) -> &PollReport {
        &self.report
    }

    /// Column metadata for the result set.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Reads the next row, or `None` once the result set is exhausted.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        self.next().await
    }

    /// Reads every remaining row, then closes the session.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            match row {
                Ok(row) => rows.push(row),
                Err(e) => {
                    release_quietly(self.session).await;
                    return Err(e);
                }
            }
        }
        self.close().await?;
        Ok(rows)
    }

    /// Closes the session the rows were read through.
    pub async fn close(self) -> Result<()> {
        self.session.release().await
    }
}

impl Stream for ResultStream {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rows.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => {
                Poll::Ready(Some(Err(DetachError::fetch(&this.query_id, e.detail()))))
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("query_id", &self.query_id)
            .field("columns", &self.columns)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Starts reading the results of a completed query through `session`.
///
/// On failure the session is closed before the error is returned.
pub async fn materialize(session: SessionGuard, completed: CompletedQuery) -> Result<ResultStream> {
    let query_id = completed.query_id().clone();
    info!("Fetching results of query {query_id} on {}", session.id());

    let fetched = session
        .session()
        .query(RESULT_SCAN, &[Value::from(&query_id)])
        .await;

    match fetched {
        Ok(cursor) => {
            let (columns, rows) = cursor.into_parts();
            Ok(ResultStream {
                report: completed.report().clone(),
                query_id,
                columns,
                rows,
                session,
            })
        }
        Err(e) => {
            release_quietly(session).await;
            Err(DetachError::fetch(&query_id, e.detail()))
        }
    }
}

/// Closes a session on an error path, where the original error matters more.
pub(crate) async fn release_quietly(session: SessionGuard) {
    let id = session.id();
    if let Err(e) = session.release().await {
        warn!("Failed to close {id}: {e}");
    }
}
