//! Submit-and-wait helpers.
//!
//! Each `*_and_wait` call submits a mutating request, then tracks the returned
//! task until it reaches a terminal state. A `FAILED` task is returned as a
//! value; inspect [`Operation::is_succeeded`] before relying on the change.
//! Without an explicit policy the client's default (see
//! [`DbaasClientBuilder::with_poll_policy`](crate::DbaasClientBuilder::with_poll_policy))
//! is used.

use crate::client::DbaasClient;
use crate::models::{BackupPolicy, RestoreRequest, ScaleRequest, UpdateConfigurationRequest};
use crate::Result;
use dbaas_core::{ClusterId, Operation, PollPolicy, TaskId, TaskSubmission};
use tokio_util::sync::CancellationToken;
use tracing::info;

impl DbaasClient {
    /// Wait for an already submitted task.
    ///
    /// # Errors
    ///
    /// Returns the tracker's error: a transport error, `DeadlineExceeded`,
    /// `AttemptsExhausted` or `InvalidPollPolicy`.
    pub async fn wait_for_task(
        &self,
        cluster_id: &ClusterId,
        task_id: &TaskId,
        policy: Option<&PollPolicy>,
    ) -> Result<Operation> {
        self.wait_for_task_with_cancel(cluster_id, task_id, policy, &CancellationToken::new())
            .await
    }

    /// Wait for an already submitted task until it finishes or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Same as [`wait_for_task`](Self::wait_for_task), plus `Cancelled`.
    pub async fn wait_for_task_with_cancel(
        &self,
        cluster_id: &ClusterId,
        task_id: &TaskId,
        policy: Option<&PollPolicy>,
        cancel: &CancellationToken,
    ) -> Result<Operation> {
        let policy = policy.unwrap_or(self.poll_policy());
        self.tracker()
            .await_completion_with_cancel(cluster_id, task_id, policy, cancel)
            .await
    }

    /// Scale a cluster and wait for the resize to finish.
    ///
    /// # Errors
    ///
    /// Returns the submission error, or the error of the wait.
    pub async fn scale_resources_and_wait(
        &self,
        cluster_id: &ClusterId,
        request: &ScaleRequest,
        policy: Option<&PollPolicy>,
    ) -> Result<Operation> {
        let submission = self.scale_resources(cluster_id, request).await?;
        self.track_submission(cluster_id, submission, policy).await
    }

    /// Restore a cluster and wait for the restore to finish.
    ///
    /// # Errors
    ///
    /// Returns the submission error, or the error of the wait.
    pub async fn restore_and_wait(
        &self,
        cluster_id: &ClusterId,
        request: &RestoreRequest,
        policy: Option<&PollPolicy>,
    ) -> Result<Operation> {
        let submission = self.restore(cluster_id, request).await?;
        self.track_submission(cluster_id, submission, policy).await
    }

    /// Replace the backup policy and wait for it to be applied.
    ///
    /// # Errors
    ///
    /// Returns the submission error, or the error of the wait.
    pub async fn update_backup_policy_and_wait(
        &self,
        cluster_id: &ClusterId,
        backup_policy: &BackupPolicy,
        policy: Option<&PollPolicy>,
    ) -> Result<Operation> {
        let submission = self.update_backup_policy(cluster_id, backup_policy).await?;
        self.track_submission(cluster_id, submission, policy).await
    }

    /// Change engine parameters and wait for them to be applied.
    ///
    /// # Errors
    ///
    /// Returns the submission error, or the error of the wait.
    pub async fn update_configuration_and_wait(
        &self,
        cluster_id: &ClusterId,
        request: &UpdateConfigurationRequest,
        policy: Option<&PollPolicy>,
    ) -> Result<Operation> {
        let submission = self.update_configuration(cluster_id, request).await?;
        self.track_submission(cluster_id, submission, policy).await
    }

    async fn track_submission(
        &self,
        cluster_id: &ClusterId,
        submission: TaskSubmission,
        policy: Option<&PollPolicy>,
    ) -> Result<Operation> {
        info!(
            cluster_id = %cluster_id,
            task_id = %submission.task_id,
            kind = submission.kind.as_deref().unwrap_or("unknown"),
            "task submitted"
        );
        self.wait_for_task(cluster_id, &submission.task_id, policy)
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::client::DbaasClientBuilder;
    use crate::models::{RestoreRequest, ScaleRequest, UpdateConfigurationRequest};
    use dbaas_core::client::RetryPolicy;
    use dbaas_core::{BackupId, ClusterId, Error, PollPolicy, TaskId, TaskState};
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_ok;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> PollPolicy {
        PollPolicy::new().with_interval(Duration::from_millis(10))
    }

    fn test_client(server: &MockServer) -> crate::DbaasClient {
        DbaasClientBuilder::new(server.uri())
            .unwrap()
            .with_retry_policy(RetryPolicy::no_retry())
            .with_poll_policy(fast_policy())
            .build()
            .unwrap()
    }

    fn cluster() -> ClusterId {
        ClusterId::parse_str("c1").unwrap()
    }

    async fn mount_task(server: &MockServer, task: &str, state: &str, times: Option<u64>) {
        let reason = (state == "FAILED").then_some("disk full");
        let mock = Mock::given(method("GET"))
            .and(path(format!("/clusters/c1/tasks/{task}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": task,
                "state": state,
                "reason": reason
            })));
        match times {
            Some(n) => mock.up_to_n_times(n).mount(server).await,
            None => mock.mount(server).await,
        }
    }

    #[tokio::test]
    async fn scale_and_wait_polls_until_succeeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clusters/c1/resources"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"task_id": "t-1"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_task(&server, "t-1", "RUNNING", Some(2)).await;
        mount_task(&server, "t-1", "SUCCEEDED", None).await;

        let client = test_client(&server);
        let request = ScaleRequest {
            storage_gb: Some(200),
            ..ScaleRequest::default()
        };
        let op = client
            .scale_resources_and_wait(&cluster(), &request, None)
            .await
            .unwrap();

        assert!(op.is_succeeded());
        assert_eq!(op.task_id.as_str(), "t-1");
        assert_eq!(op.resource_id, cluster());

        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "GET")
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn restore_failure_is_returned_as_value() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clusters/c1/restore"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"task_id": "t-2"})))
            .mount(&server)
            .await;
        mount_task(&server, "t-2", "FAILED", None).await;

        let client = test_client(&server);
        let request = RestoreRequest::from_backup(BackupId::parse_str("bk-1").unwrap());
        let op = assert_ok!(client.restore_and_wait(&cluster(), &request, None).await);

        assert_eq!(op.state, TaskState::Failed);
        assert_eq!(op.reason.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn submission_error_skips_polling() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/clusters/c1/configuration"))
            .respond_with(ResponseTemplate::new(409).set_body_string("busy"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let request = UpdateConfigurationRequest::new().set("work_mem", "8MB");
        let err = client
            .update_configuration_and_wait(&cluster(), &request, None)
            .await
            .unwrap_err();
        assert_eq!(err, Error::Conflict("busy".into()));
    }

    #[tokio::test]
    async fn backup_policy_wait_stops_at_attempt_cap() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/clusters/c1/backup-policy"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"task_id": "t-3"})))
            .mount(&server)
            .await;
        mount_task(&server, "t-3", "RUNNING", None).await;

        let client = test_client(&server);
        let policy = fast_policy().with_max_attempts(2);
        let err = client
            .update_backup_policy_and_wait(
                &cluster(),
                &crate::models::BackupPolicy::enabled(7),
                Some(&policy),
            )
            .await
            .unwrap_err();

        match err {
            Error::AttemptsExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(last.map(|op| op.state), Some(TaskState::Running));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_for_task_honours_cancellation() {
        let server = MockServer::start().await;
        mount_task(&server, "t-4", "RUNNING", None).await;

        let client = test_client(&server);
        let token = CancellationToken::new();
        token.cancel();

        let task_id = TaskId::parse_str("t-4").unwrap();
        let err = client
            .wait_for_task_with_cancel(&cluster(), &task_id, None, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn wait_for_task_missing_task_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clusters/c1/tasks/t-5"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such task"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let task_id = TaskId::parse_str("t-5").unwrap();
        let err = client
            .wait_for_task(&cluster(), &task_id, None)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound("no such task".into()));
    }
}
