//! # dbaas-core
//!
//! Core types and utilities for working with the DBaaS control-plane API.
//!
//! This crate provides the error taxonomy, strongly-typed identifiers, the HTTP
//! transport shared by API clients, and the tracker that waits on long-running
//! operations (backups, restores, scaling, configuration changes).
//!
//! ## Modules
//!
//! - [`error`] - Error types and HTTP status code mapping
//! - [`ids`] - Strongly-typed identifier wrappers for DBaaS resources
//! - [`config`] - Configuration structures for DBaaS clients
//! - [`client`] - HTTP transport, retry logic and connection settings
//! - [`query`] - Query string helpers
//! - [`task`] - Remote task model and state parsing
//! - [`tracker`] - Polling of asynchronous operations until they finish

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod ids;
pub mod query;
pub mod task;
pub mod tracker;

// Re-export commonly used types
pub use error::{Error, Result};
pub use ids::{BackupId, ClusterId, TaskId};
pub use task::{Operation, Task, TaskState, TaskSubmission};
pub use tracker::{OperationTracker, PollPolicy, TaskStatusSource};
