//! Barrel - Log-Structured Key-Value Store
//!
//! An append-only, log-structured key-value store with in-memory hash
//! indexing, background segment compaction and crash recovery on
//! reopen. Every write is persisted durably in a self-describing,
//! checksum-protected record format.
//!
//! # Architecture
//!
//! All writes go to a single active log file. When the log exceeds a
//! configured size it is sealed as a numbered segment and a background
//! merger folds the two oldest segments into one, keeping only the
//! newest record per key. Reads consult the active index first, then
//! sealed segments newest-first.
//!
//! # Features
//!
//! - Length-prefixed, SHA-256-checksummed on-disk records
//! - Crash recovery that tolerates a torn trailing write
//! - Background compaction that never blocks the writer
//! - HTTP API for reads and writes
//! - Least-bytes-transferred load balancer for multi-node deployments

pub mod api;
pub mod config;
pub mod error;
pub mod lb;
pub mod store;

pub use config::BarrelConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::BarrelConfig;
    pub use crate::error::{Error, Result};
    pub use crate::lb::Balancer;
    pub use crate::store::{Entry, Store};
}
