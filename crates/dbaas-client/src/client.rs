//! Asynchronous DBaaS control-plane client implementation.

use crate::models::{
    validate_user_name, Backup, BackupListParams, BackupPolicy, Cluster, ClusterConfiguration,
    ClusterListParams, CreateUserRequest, DatabaseUser, LogEntry, LogQuery, RestoreRequest,
    ScaleRequest, TaskListParams, UpdateConfigurationRequest,
};
use crate::Result;
use async_trait::async_trait;
use dbaas_core::client::{
    ClientConfig, RetryPolicy, ServiceClient, ServiceClientBuilder, DBAAS_DEFAULT_TIMEOUT,
};
use dbaas_core::config::DbaasClientConfig;
use dbaas_core::{
    ClusterId, Error, Operation, OperationTracker, PollPolicy, Task, TaskId, TaskStatusSource,
    TaskSubmission,
};
use reqwest::{Method, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;
use validator::Validate;

const SERVICE: &str = "dbaas";
const USER_AGENT: &str = concat!("dbaas-client/", env!("CARGO_PKG_VERSION"));

/// Builder for [`DbaasClient`].
#[derive(Debug, Clone)]
pub struct DbaasClientBuilder {
    inner: ServiceClientBuilder,
    poll_policy: PollPolicy,
}

impl DbaasClientBuilder {
    /// Create a builder for the specified API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the URL is not usable as a base.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let builder = ServiceClientBuilder::new(
            SERVICE,
            base_url,
            Duration::from_secs(DBAAS_DEFAULT_TIMEOUT),
        )?
        .with_user_agent(USER_AGENT);

        Ok(Self {
            inner: builder,
            poll_policy: PollPolicy::default(),
        })
    }

    /// Create a builder from a validated [`DbaasClientConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if the configuration is out of range
    /// and [`Error::InvalidEndpoint`] if the API URL is unusable.
    pub fn from_config(config: &DbaasClientConfig) -> Result<Self> {
        config.validate()?;

        let http = ClientConfig::new()
            .with_timeout(config.timeout())
            .with_retry_policy(config.retry_policy());

        let mut builder = Self::new(&config.api_url)?
            .with_http_config(http)
            .with_tls_verify(config.tls_verify)
            .with_poll_policy(config.poll.to_policy());

        if let Some(token) = &config.api_token {
            builder = builder.with_token(token.clone());
        }
        if let Some(ca_cert) = &config.tls_ca_cert {
            builder = builder.with_ca_cert(ca_cert.clone());
        }

        Ok(builder)
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.inner = self.inner.with_retry_policy(retry);
        self
    }

    /// Override the HTTP client configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: ClientConfig) -> Self {
        self.inner = self.inner.with_http_config(config);
        self
    }

    /// Authenticate with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<SecretString>) -> Self {
        self.inner = self.inner.with_token(token);
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub fn with_tls_verify(mut self, verify: bool) -> Self {
        self.inner = self.inner.with_tls_verify(verify);
        self
    }

    /// Trust an additional PEM CA certificate.
    #[must_use]
    pub fn with_ca_cert(mut self, path: PathBuf) -> Self {
        self.inner = self.inner.with_ca_cert(path);
        self
    }

    /// Default policy used by the `*_and_wait` workflows.
    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<DbaasClient> {
        self.poll_policy.validate()?;
        let inner = self.inner.build()?;
        Ok(DbaasClient {
            inner,
            poll_policy: self.poll_policy,
        })
    }
}

/// Asynchronous DBaaS control-plane client.
#[derive(Debug, Clone)]
pub struct DbaasClient {
    inner: ServiceClient,
    poll_policy: PollPolicy,
}

impl DbaasClient {
    /// Construct a client directly from the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is unusable or the HTTP client cannot be built.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        DbaasClientBuilder::new(base_url)?.build()
    }

    /// Construct a client from a [`DbaasClientConfig`].
    ///
    /// # Errors
    ///
    /// See [`DbaasClientBuilder::from_config`].
    pub fn from_config(config: &DbaasClientConfig) -> Result<Self> {
        DbaasClientBuilder::from_config(config)?.build()
    }

    /// Return the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        self.inner.base_url()
    }

    /// Default poll policy for the `*_and_wait` workflows.
    #[must_use]
    pub const fn poll_policy(&self) -> &PollPolicy {
        &self.poll_policy
    }

    /// Tracker that polls task status through this client.
    #[must_use]
    pub fn tracker(&self) -> OperationTracker<Self> {
        OperationTracker::new(self.clone())
    }

    /// List clusters.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range parameters, or the
    /// transport error of the request.
    pub async fn list_clusters(&self, params: &ClusterListParams) -> Result<Vec<Cluster>> {
        params.validate()?;
        self.get_json("clusters", &params.to_pairs()).await
    }

    /// Fetch a single cluster.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the cluster does not exist.
    pub async fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Cluster> {
        let path = format!("clusters/{cluster_id}");
        self.get_json(&path, &[]).await
    }

    /// List database users of a cluster.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the request.
    pub async fn list_users(&self, cluster_id: &ClusterId) -> Result<Vec<DatabaseUser>> {
        let path = format!("clusters/{cluster_id}/users");
        self.get_json(&path, &[]).await
    }

    /// Create a database user (returns the submitted task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] for an empty or malformed name.
    pub async fn create_user(
        &self,
        cluster_id: &ClusterId,
        request: &CreateUserRequest,
    ) -> Result<TaskSubmission> {
        request.validate()?;
        let path = format!("clusters/{cluster_id}/users");
        self.send_json(Method::POST, &path, Some(request), &[])
            .await
    }

    /// Delete a database user (returns the submitted task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] for an empty or malformed name.
    pub async fn delete_user(&self, cluster_id: &ClusterId, name: &str) -> Result<TaskSubmission> {
        if name.is_empty() {
            return Err(Error::ValidationError("user name must not be empty".into()));
        }
        validate_user_name(name)
            .map_err(|_| Error::ValidationError(format!("invalid user name `{name}`")))?;

        let path = format!("clusters/{cluster_id}/users/{name}");
        self.send_json::<(), TaskSubmission>(Method::DELETE, &path, None, &[])
            .await
    }

    /// Change compute, storage or replica count (returns the submitted task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if the request changes nothing.
    pub async fn scale_resources(
        &self,
        cluster_id: &ClusterId,
        request: &ScaleRequest,
    ) -> Result<TaskSubmission> {
        request.validate()?;
        let path = format!("clusters/{cluster_id}/resources");
        self.send_json(Method::POST, &path, Some(request), &[])
            .await
    }

    /// List backups of a cluster.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range parameters, or the
    /// transport error of the request.
    pub async fn list_backups(
        &self,
        cluster_id: &ClusterId,
        params: &BackupListParams,
    ) -> Result<Vec<Backup>> {
        params.validate()?;
        let path = format!("clusters/{cluster_id}/backups");
        self.get_json(&path, &params.to_pairs()).await
    }

    /// Fetch the automated backup policy.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the request.
    pub async fn get_backup_policy(&self, cluster_id: &ClusterId) -> Result<BackupPolicy> {
        let path = format!("clusters/{cluster_id}/backup-policy");
        self.get_json(&path, &[]).await
    }

    /// Replace the automated backup policy (returns the submitted task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] for an out-of-range retention.
    pub async fn update_backup_policy(
        &self,
        cluster_id: &ClusterId,
        policy: &BackupPolicy,
    ) -> Result<TaskSubmission> {
        policy.validate()?;
        let path = format!("clusters/{cluster_id}/backup-policy");
        self.send_json(Method::PUT, &path, Some(policy), &[]).await
    }

    /// Restore a cluster from a backup or a point in time (returns the submitted task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] unless exactly one restore source is set.
    pub async fn restore(
        &self,
        cluster_id: &ClusterId,
        request: &RestoreRequest,
    ) -> Result<TaskSubmission> {
        request.validate()?;
        let path = format!("clusters/{cluster_id}/restore");
        self.send_json(Method::POST, &path, Some(request), &[])
            .await
    }

    /// Fetch engine parameters.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the request.
    pub async fn get_configuration(&self, cluster_id: &ClusterId) -> Result<ClusterConfiguration> {
        let path = format!("clusters/{cluster_id}/configuration");
        self.get_json(&path, &[]).await
    }

    /// Change engine parameters (returns the submitted task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if no parameter is set.
    pub async fn update_configuration(
        &self,
        cluster_id: &ClusterId,
        request: &UpdateConfigurationRequest,
    ) -> Result<TaskSubmission> {
        request.validate()?;
        let path = format!("clusters/{cluster_id}/configuration");
        self.send_json(Method::PATCH, &path, Some(request), &[])
            .await
    }

    /// List tasks of a cluster.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range parameters, or the
    /// transport error of the request.
    pub async fn list_tasks(
        &self,
        cluster_id: &ClusterId,
        params: &TaskListParams,
    ) -> Result<Vec<Task>> {
        params.validate()?;
        let path = format!("clusters/{cluster_id}/tasks");
        self.get_json(&path, &params.to_pairs()).await
    }

    /// Fetch a single task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task does not exist.
    pub async fn get_task(&self, cluster_id: &ClusterId, task_id: &TaskId) -> Result<Task> {
        let path = format!("clusters/{cluster_id}/tasks/{task_id}");
        self.get_json(&path, &[]).await
    }

    /// Fetch database log entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] for a `limit` outside 1..=1000 or an
    /// inverted time range.
    pub async fn list_logs(&self, cluster_id: &ClusterId, query: &LogQuery) -> Result<Vec<LogEntry>> {
        query.validate()?;
        let path = format!("clusters/{cluster_id}/logs");
        self.get_json(&path, &query.to_pairs()).await
    }

    async fn get_json<T>(&self, path: &str, params: &[(&'static str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.send_json::<(), T>(Method::GET, path, None, params)
            .await
    }

    async fn send_json<B, R>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        params: &[(&'static str, String)],
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .inner
            .execute_with_retry(
                method,
                path,
                params,
                |mut request| {
                    request = request.header("Accept", "application/json");
                    if let Some(payload) = body {
                        request = request.json(payload);
                    }
                    request
                },
                map_status_to_error,
            )
            .await?;

        response.json::<R>().await.map_err(|err| {
            Error::ParseError(format!("Failed to parse DBaaS response for `{path}`: {err}"))
        })
    }
}

#[async_trait]
impl TaskStatusSource for DbaasClient {
    async fn query_status(&self, resource_id: &ClusterId, task_id: &TaskId) -> Result<Operation> {
        let task = self.get_task(resource_id, task_id).await?;
        debug!(
            cluster_id = %resource_id,
            task_id = %task_id,
            state = task.state.as_deref().unwrap_or(""),
            "fetched task status"
        );
        Ok(Operation::from_task(resource_id.clone(), task))
    }
}

fn map_status_to_error(status: StatusCode, text: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(text),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Unauthorized(format!("DBaaS authentication failed: {text}"))
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::BadRequest(text),
        StatusCode::CONFLICT => Error::Conflict(text),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(text),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Error::ServiceUnavailable(format!("DBaaS temporarily unavailable: {text}"))
        }
        status if status.is_server_error() => {
            Error::ServiceUnavailable(format!("DBaaS server error {status}: {text}"))
        }
        _ => Error::HttpError(format!("DBaaS error {status}: {text}")),
    }
}
