//! Hook notification IPC for a version-control hosting server.
//!
//! Short-lived VCS hook processes connect back over loopback TCP,
//! authenticate with a one-time challenge and a per-invocation bearer
//! secret, and receive an abort/continue decision plus ordered
//! user-facing messages produced by registered listeners.

pub mod auth;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod environment;
pub mod errors;
pub mod protocol;
pub mod server;
pub mod transaction;
