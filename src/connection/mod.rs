//! Session lifecycle for db-reattach.
//!
//! Centralizes opening, rebinding and guaranteed release of sessions.

pub mod guard;
pub mod manager;

pub use guard::SessionGuard;
pub use manager::SessionManager;
