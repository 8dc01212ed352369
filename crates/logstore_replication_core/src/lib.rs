//! Shared logstore replication domain primitives.
//!
//! This crate owns the invocation contract, the retry policy, and the error
//! taxonomy. It intentionally excludes Lambda runtime and HTTP concerns, which
//! live in `logstore_replication_lambda`.

pub mod contract;
pub mod error;
pub mod retry;
pub mod settings;
