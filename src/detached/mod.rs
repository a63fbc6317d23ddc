//! Detached-query lifecycle.
//!
//! Stages, in the order they run:
//! - [`gate`]: keeps the statement alive after its session closes
//! - [`launcher`]: submits it and captures the query id
//! - [`crate::connection::SessionManager::rebind`]: swaps to a fresh session
//! - [`poller`]: waits for a terminal status
//! - [`materializer`]: re-reads the result by query id

pub mod gate;
pub mod launcher;
pub mod lifecycle;
pub mod materializer;
pub mod poller;

pub use lifecycle::{DetachedQueryManager, StatusCheck};
pub use materializer::ResultStream;
pub use poller::{AbortReason, CompletedQuery, Observation, PollReport, PollState, StatusPoller};
