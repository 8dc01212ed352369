//! Lambda-facing adapters and handlers for logstore replication.
//!
//! This crate owns runtime integration details (the Lambda handler, the HTTP
//! log-store client, and credential resolution) and exposes a single
//! `runtime` module boundary for the contract, retry, and settings primitives.

pub mod adapters;
pub mod handlers;
pub mod logging;
pub mod runtime;
