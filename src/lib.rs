//! tracksync - webhook-driven issue synchronization between GitHub and Jira
//!
//! GitHub ("System A") and Jira ("System B") each POST their issue and comment
//! webhooks to tracksync, which mirrors the change into the other tracker.
//!
//! # Architecture
//!
//! - **webhook**: Decoding of native deliveries into typed events
//! - **sync**: Routers, loop prevention, field reconciliation, identity resolution
//! - **store**: SQLite mapping store (issue, comment and user links)
//! - **integrations**: GitHub and Jira REST clients and the retry executor
//! - **server**: axum HTTP surface
//! - **config**: YAML / environment configuration and validation

pub mod config;
pub mod error;
pub mod integrations;
pub mod logging;
pub mod server;
pub mod store;
pub mod sync;
pub mod webhook;

// Re-exports
pub use error::{Result, SyncError};
