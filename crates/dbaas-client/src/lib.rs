//! DBaaS control-plane client and data models.
//!
//! Provides typed structures and an asynchronous client for managing database
//! clusters: users, compute and storage, backups and restore, engine
//! configuration, tasks and logs. Mutating calls return a
//! [`TaskSubmission`](dbaas_core::TaskSubmission); the [`workflows`] helpers
//! track the task to completion through [`dbaas_core::OperationTracker`].

#![deny(missing_docs)]

pub mod client;
pub mod models;
pub mod workflows;

pub use client::{DbaasClient, DbaasClientBuilder};
pub use models::{
    Backup, BackupListParams, BackupPolicy, Cluster, ClusterConfiguration, ClusterListParams,
    ClusterResources, CreateUserRequest, DatabaseUser, LogEntry, LogQuery, RestoreRequest,
    ScaleRequest, TaskListParams, UpdateConfigurationRequest,
};

/// Convenient result alias that reuses the shared DBaaS error type.
pub type Result<T> = dbaas_core::Result<T>;
