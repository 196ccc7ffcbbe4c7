//! Remote task model.
//!
//! Long-running administrative calls (scaling, restores, backup policy and
//! configuration changes) answer with a task identifier. The control plane
//! reports progress through task documents; [`Task`] is that document as it
//! appears on the wire and [`Operation`] is the typed snapshot the tracker
//! hands back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::ids::{ClusterId, TaskId};

/// State of a remote task.
///
/// Parsed once per status read. Matching is case-insensitive because the
/// control plane does not fix the casing of state names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// The task is still in progress; the only state that keeps polling alive.
    Running,
    /// Terminal, successful.
    Succeeded,
    /// Terminal, unsuccessful.
    Failed,
    /// Terminal value the client does not know, kept verbatim.
    ///
    /// An empty or missing state also lands here so that a misbehaving
    /// backend cannot keep a caller polling forever.
    Unrecognized(String),
}

impl TaskState {
    /// Parse a raw state as returned by the control plane.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::Unrecognized(String::new());
        };

        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("running") {
            Self::Running
        } else if trimmed.eq_ignore_ascii_case("succeeded") {
            Self::Succeeded
        } else if trimmed.eq_ignore_ascii_case("failed") {
            Self::Failed
        } else {
            Self::Unrecognized(raw.to_string())
        }
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Returns true for every state except [`TaskState::Running`].
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl FromStr for TaskState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(Some(s)))
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::parse(raw.as_deref()))
    }
}

/// Task document returned by `GET clusters/{cluster_id}/tasks/{task_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Task identifier.
    pub id: TaskId,
    /// Raw state string; may be missing on a misbehaving backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Failure explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Operation type (restore, scale, backup-enable, ...).
    #[serde(default, alias = "type", alias = "name", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Cluster the task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Parsed state.
    #[must_use]
    pub fn parsed_state(&self) -> TaskState {
        TaskState::parse(self.state.as_deref())
    }
}

/// Response body of calls that start a long-running operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSubmission {
    /// Identifier of the task tracking the operation.
    #[serde(alias = "id")]
    pub task_id: TaskId,
    /// Operation type, when the control plane reports it.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl TaskSubmission {
    /// Snapshot of the freshly submitted operation, before the first status read.
    #[must_use]
    pub fn into_operation(self, resource_id: ClusterId) -> Operation {
        let mut op = Operation::new(resource_id, self.task_id, TaskState::Running);
        op.kind = self.kind;
        op
    }
}

/// Snapshot of a remote asynchronous operation.
///
/// Only ever built from what the control plane reported; nothing here is
/// inferred locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    /// Task identifier assigned at submission.
    pub task_id: TaskId,
    /// Cluster the operation targets.
    pub resource_id: ClusterId,
    /// Informational operation type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Last reported state.
    pub state: TaskState,
    /// Failure explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// Create a bare snapshot.
    #[must_use]
    pub fn new(resource_id: ClusterId, task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            resource_id,
            kind: None,
            state,
            reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Build a snapshot from a task document read for `resource_id`.
    #[must_use]
    pub fn from_task(resource_id: ClusterId, task: Task) -> Self {
        let state = task.parsed_state();
        Self {
            task_id: task.id,
            resource_id,
            kind: task.kind,
            state,
            reason: task.reason,
            started_at: task.started_at,
            finished_at: task.finished_at,
        }
    }

    /// Set the failure reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns true once the state is anything but running.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true if the operation succeeded.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// Returns true if the operation failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }

    /// Returns true if the control plane reported a state this client does not know.
    #[must_use]
    pub const fn is_unrecognized(&self) -> bool {
        matches!(self.state, TaskState::Unrecognized(_))
    }

    /// Wall-clock duration when both timestamps are known.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
