//! Waiting on asynchronous operations.
//!
//! Administrative calls return a task id straight away and finish in the
//! background. [`OperationTracker`] reads the task status, sleeps for the
//! policy interval while the task reports `RUNNING`, and returns the first
//! non-running snapshot.
//!
//! Only the `RUNNING` business state is retried. A failed status query is
//! returned to the caller as-is; retrying HTTP failures is the transport's job
//! (see [`crate::client::RetryPolicy`]).
//!
//! ```rust,ignore
//! use dbaas_core::{OperationTracker, PollPolicy};
//! use std::time::Duration;
//!
//! let tracker = OperationTracker::new(client.clone());
//! let policy = PollPolicy::new().with_timeout(Duration::from_secs(900));
//! let op = tracker.await_completion(&cluster_id, &task_id, &policy).await?;
//! if op.is_failed() {
//!     eprintln!("restore failed: {}", op.reason.unwrap_or_default());
//! }
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ids::{ClusterId, TaskId};
use crate::task::{Operation, TaskState};

/// Default delay between two status queries (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Polling cadence and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Fixed delay between two status queries.
    pub interval: Duration,

    /// Overall deadline for the whole poll loop.
    ///
    /// The loop gives up as soon as the next query could not start before the
    /// deadline, so it may end up to one `interval` before `timeout` elapses.
    pub timeout: Option<Duration>,

    /// Maximum number of status queries.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    /// Create a policy polling every 30 seconds with no deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: None,
            max_attempts: None,
        }
    }

    /// Set the delay between status queries.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the overall deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cap the number of status queries.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Check the policy before any query is issued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPollPolicy`] if the interval or timeout is zero,
    /// or if the attempt cap is zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidPollPolicy(
                "interval must be positive".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidPollPolicy(
                "timeout must be positive when set".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidPollPolicy(
                "max_attempts must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of task status reads.
///
/// Implemented by API clients with a `GET clusters/{id}/tasks/{task_id}` call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    /// Read the current status of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    async fn query_status(&self, resource_id: &ClusterId, task_id: &TaskId) -> Result<Operation>;
}

#[async_trait]
impl<T> TaskStatusSource for Arc<T>
where
    T: TaskStatusSource + ?Sized,
{
    async fn query_status(&self, resource_id: &ClusterId, task_id: &TaskId) -> Result<Operation> {
        (**self).query_status(resource_id, task_id).await
    }
}

/// Progress events emitted while waiting on a task.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Tracking started.
    Started {
        /// Task being tracked.
        task_id: TaskId,
    },
    /// A status query returned.
    Polled {
        /// 1-based query number.
        attempt: u32,
        /// Reported state.
        state: TaskState,
        /// Time since tracking started.
        elapsed: Duration,
    },
    /// The task is still running; the tracker is about to sleep.
    Waiting {
        /// Query number that reported `RUNNING`.
        attempt: u32,
        /// Sleep duration.
        delay: Duration,
    },
    /// A terminal state was observed.
    Finished {
        /// Terminal state.
        state: TaskState,
        /// Number of status queries issued.
        attempts: u32,
    },
}

/// Callback receiving [`ProgressEvent`]s, e.g. to drive a spinner.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Polls a task until it leaves the `RUNNING` state.
///
/// The tracker keeps no state between calls, so one instance can wait on many
/// operations concurrently and repeated waits on a finished task are harmless.
#[derive(Clone)]
pub struct OperationTracker<S> {
    source: S,
    on_progress: Option<ProgressCallback>,
}

impl<S> std::fmt::Debug for OperationTracker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTracker")
            .field("has_progress_callback", &self.on_progress.is_some())
            .finish_non_exhaustive()
    }
}

impl<S> OperationTracker<S>
where
    S: TaskStatusSource,
{
    /// Create a tracker reading status from `source`.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            on_progress: None,
        }
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Access the status source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Wait until the task leaves the `RUNNING` state.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPollPolicy`] if `policy` is invalid.
    /// - Any transport error returned by a status query, immediately.
    /// - [`Error::DeadlineExceeded`] or [`Error::AttemptsExhausted`] if the
    ///   task is still running when the policy runs out.
    pub async fn await_completion(
        &self,
        resource_id: &ClusterId,
        task_id: &TaskId,
        policy: &PollPolicy,
    ) -> Result<Operation> {
        self.await_completion_with_cancel(resource_id, task_id, policy, &CancellationToken::new())
            .await
    }

    /// Like [`Self::await_completion`], aborting promptly once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Same as [`Self::await_completion`], plus [`Error::Cancelled`].
    pub async fn await_completion_with_cancel(
        &self,
        resource_id: &ClusterId,
        task_id: &TaskId,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<Operation> {
        policy.validate()?;

        let start = Instant::now();
        let deadline = policy.timeout.map(|timeout| start + timeout);
        let mut attempts: u32 = 0;
        let mut last: Option<Operation> = None;

        info!(cluster = %resource_id, task = %task_id, interval = ?policy.interval, timeout = ?policy.timeout, "waiting for task");
        self.emit(&ProgressEvent::Started {
            task_id: task_id.clone(),
        });

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(task_id, last));
            }

            attempts += 1;
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(task_id, last.take())),
                polled = bounded(deadline, self.source.query_status(resource_id, task_id)) => polled,
            };

            let Some(result) = polled else {
                warn!(task = %task_id, attempts, "deadline passed during status query");
                return Err(Error::DeadlineExceeded {
                    task_id: task_id.to_string(),
                    elapsed: start.elapsed(),
                    last: last.map(Box::new),
                });
            };

            let op = match result {
                Ok(op) => op,
                Err(err) => {
                    warn!(task = %task_id, attempts, error = %err, "task status query failed");
                    return Err(err);
                }
            };

            let elapsed = start.elapsed();
            debug!(task = %task_id, attempt = attempts, state = %op.state, ?elapsed, "task status");
            self.emit(&ProgressEvent::Polled {
                attempt: attempts,
                state: op.state.clone(),
                elapsed,
            });

            if op.is_terminal() {
                if op.is_unrecognized() {
                    warn!(task = %task_id, state = %op.state, "task reported an unrecognized state");
                }
                info!(task = %task_id, state = %op.state, attempts, "task finished");
                self.emit(&ProgressEvent::Finished {
                    state: op.state.clone(),
                    attempts,
                });
                return Ok(op);
            }

            if policy.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(Error::AttemptsExhausted {
                    task_id: task_id.to_string(),
                    attempts,
                    last: Some(Box::new(op)),
                });
            }

            let wake_at = Instant::now() + policy.interval;
            if deadline.is_some_and(|deadline| wake_at >= deadline) {
                return Err(Error::DeadlineExceeded {
                    task_id: task_id.to_string(),
                    elapsed: start.elapsed(),
                    last: Some(Box::new(op)),
                });
            }

            self.emit(&ProgressEvent::Waiting {
                attempt: attempts,
                delay: policy.interval,
            });
            last = Some(op);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(task_id, last.take())),
                () = sleep_until(wake_at) => {}
            }
        }
    }

    fn emit(&self, event: &ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }
}

/// Run `fut`, giving up at `deadline`. `None` means the deadline won.
async fn bounded<F>(deadline: Option<Instant>, fut: F) -> Option<F::Output>
where
    F: Future,
{
    match deadline {
        Some(deadline) => timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn cancelled(task_id: &TaskId, last: Option<Operation>) -> Error {
    info!(task = %task_id, "stopped waiting for task: cancelled");
    Error::Cancelled {
        task_id: task_id.to_string(),
        last: last.map(Box::new),
    }
}
