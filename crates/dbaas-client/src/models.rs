//! Request and response models for the DBaaS control-plane API.

use chrono::{DateTime, Utc};
use dbaas_core::query::QueryParams;
use dbaas_core::{BackupId, ClusterId, TaskState};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use validator::{Validate, ValidationError};

/// Parameters supported by the `clusters` list endpoint.
#[derive(Debug, Default, Clone, Validate)]
pub struct ClusterListParams {
    /// Filter by cluster name.
    pub name: Option<String>,
    /// Filter by database engine (postgresql, mysql, ...).
    pub engine: Option<String>,
    /// Filter by cluster state.
    pub state: Option<String>,
    /// Maximum number of results (1-1000).
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl ClusterListParams {
    /// Convert the parameters into URL query pairs.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut params = QueryParams::new();
        params.push_opt("name", self.name.as_deref());
        params.push_opt("engine", self.engine.as_deref());
        params.push_opt("state", self.state.as_deref());
        params.push_opt("limit", self.limit);
        params.push_opt("offset", self.offset);
        params.into_pairs()
    }
}

/// Database cluster as returned by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    /// Cluster identifier.
    pub id: ClusterId,
    /// Human-readable name.
    pub name: String,
    /// Database engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Engine version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Lifecycle state (creating, available, scaling, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Deployment region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Connection host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Connection port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Allocated resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ClusterResources>,
    /// Tag map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Compute and storage allocated to a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterResources {
    /// vCPU count per node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Memory per node (MiB).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// Storage per node (GiB).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_gb: Option<u64>,
    /// Number of replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

/// Database account on a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseUser {
    /// Login name.
    pub name: String,
    /// Granted roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST clusters/{id}/users`.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct CreateUserRequest {
    /// Login name.
    #[validate(length(min = 1, max = 63), custom(function = "validate_user_name"))]
    pub name: String,
    /// Initial password.
    #[serde(serialize_with = "serialize_secret")]
    pub password: SecretString,
    /// Roles to grant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl CreateUserRequest {
    /// Create a request without roles.
    #[must_use]
    pub fn new(name: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            roles: Vec::new(),
        }
    }

    /// Grant a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

/// Body of `POST clusters/{id}/resources`.
///
/// At least one field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[validate(schema(function = "validate_scale_request"))]
pub struct ScaleRequest {
    /// Target vCPU count per node.
    #[validate(range(min = 1, max = 256))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Target memory per node (MiB).
    #[validate(range(min = 256))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// Target storage per node (GiB).
    #[validate(range(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_gb: Option<u64>,
    /// Target replica count.
    #[validate(range(min = 0, max = 15))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

/// Parameters supported by the `clusters/{id}/backups` list endpoint.
#[derive(Debug, Default, Clone, Validate)]
pub struct BackupListParams {
    /// Only backups taken at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Only backups taken before this time.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of results (1-1000).
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u32>,
}

impl BackupListParams {
    /// Convert the parameters into URL query pairs.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut params = QueryParams::new();
        params.push_opt_time("since", self.since.as_ref());
        params.push_opt_time("until", self.until.as_ref());
        params.push_opt("limit", self.limit);
        params.into_pairs()
    }
}

/// A stored backup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backup {
    /// Backup identifier.
    pub id: BackupId,
    /// Backup state (running, completed, failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Full or incremental.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Automated backup settings of a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct BackupPolicy {
    /// Whether scheduled backups are enabled.
    pub enabled: bool,
    /// Days to keep backups.
    #[validate(range(min = 1, max = 365))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    /// Daily backup window start, `HH:MM` UTC.
    #[validate(length(equal = 5))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<String>,
}

impl BackupPolicy {
    /// Policy enabling backups with the given retention.
    #[must_use]
    pub fn enabled(retention_days: u32) -> Self {
        Self {
            enabled: true,
            retention_days: Some(retention_days),
            window_start: None,
        }
    }

    /// Policy disabling scheduled backups.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Body of `POST clusters/{id}/restore`.
///
/// Exactly one of `backup_id` and `point_in_time` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[validate(schema(function = "validate_restore_request"))]
pub struct RestoreRequest {
    /// Backup to restore from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<BackupId>,
    /// Point in time to restore to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_in_time: Option<DateTime<Utc>>,
}

impl RestoreRequest {
    /// Restore from a backup.
    #[must_use]
    pub fn from_backup(backup_id: BackupId) -> Self {
        Self {
            backup_id: Some(backup_id),
            point_in_time: None,
        }
    }

    /// Restore to a point in time.
    #[must_use]
    pub fn to_point_in_time(at: DateTime<Utc>) -> Self {
        Self {
            backup_id: None,
            point_in_time: Some(at),
        }
    }
}

/// Engine parameters of a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfiguration {
    /// Parameter values keyed by name.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Whether applied changes wait for a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_restart: Option<bool>,
    /// Last modification timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of `PATCH clusters/{id}/configuration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "validate_configuration_request"))]
pub struct UpdateConfigurationRequest {
    /// Parameters to change.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Restart if needed instead of waiting for the maintenance window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_immediately: Option<bool>,
}

impl UpdateConfigurationRequest {
    /// Create an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one parameter.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Apply immediately.
    #[must_use]
    pub const fn apply_immediately(mut self, immediately: bool) -> Self {
        self.apply_immediately = Some(immediately);
        self
    }
}

/// Parameters supported by the `clusters/{id}/tasks` list endpoint.
#[derive(Debug, Default, Clone, Validate)]
pub struct TaskListParams {
    /// Keep tasks in any of these states; empty means all.
    pub states: Vec<TaskState>,
    /// Filter by operation type.
    pub kind: Option<String>,
    /// Maximum number of results (1-1000).
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl TaskListParams {
    /// Convert the parameters into URL query pairs.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut params = QueryParams::new();
        params.push_list("state", &self.states);
        params.push_opt("type", self.kind.as_deref());
        params.push_opt("limit", self.limit);
        params.push_opt("offset", self.offset);
        params.into_pairs()
    }
}

/// Parameters supported by the `clusters/{id}/logs` endpoint.
#[derive(Debug, Default, Clone, Validate)]
#[validate(schema(function = "validate_log_query"))]
pub struct LogQuery {
    /// Start of the time range.
    pub since: Option<DateTime<Utc>>,
    /// End of the time range.
    pub until: Option<DateTime<Utc>>,
    /// Minimum severity.
    pub level: Option<String>,
    /// Substring filter on the message.
    pub search: Option<String>,
    /// Maximum number of entries (1-1000).
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<u32>,
}

impl LogQuery {
    /// Convert the parameters into URL query pairs.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut params = QueryParams::new();
        params.push_opt_time("since", self.since.as_ref());
        params.push_opt_time("until", self.until.as_ref());
        params.push_opt("level", self.level.as_deref());
        params.push_opt("search", self.search.as_deref());
        params.push_opt("limit", self.limit);
        params.into_pairs()
    }
}

/// One database log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Log message.
    pub message: String,
    /// Emitting node or component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

pub(crate) fn validate_user_name(name: &str) -> Result<(), ValidationError> {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("user_name_charset"))
    }
}

fn validate_scale_request(request: &ScaleRequest) -> Result<(), ValidationError> {
    if request == &ScaleRequest::default() {
        return Err(ValidationError::new("scale_request_empty"));
    }
    Ok(())
}

fn validate_restore_request(request: &RestoreRequest) -> Result<(), ValidationError> {
    match (&request.backup_id, &request.point_in_time) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ValidationError::new("restore_source_exactly_one")),
    }
}

fn validate_configuration_request(
    request: &UpdateConfigurationRequest,
) -> Result<(), ValidationError> {
    if request.parameters.is_empty() {
        return Err(ValidationError::new("configuration_parameters_empty"));
    }
    Ok(())
}

fn validate_log_query(query: &LogQuery) -> Result<(), ValidationError> {
    match (query.since, query.until) {
        (Some(since), Some(until)) if since >= until => {
            Err(ValidationError::new("log_range_inverted"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn cluster_list_params_skip_unset() {
        let params = ClusterListParams {
            engine: Some("postgresql".into()),
            limit: Some(20),
            ..ClusterListParams::default()
        };
        assert_eq!(
            params.to_pairs(),
            vec![
                ("engine", "postgresql".to_string()),
                ("limit", "20".to_string())
            ]
        );
    }

    #[test]
    fn create_user_request_exposes_password_only_on_the_wire() {
        let request = CreateUserRequest::new("app_user", "s3cr3t").with_role("readwrite");
        assert!(request.validate().is_ok());

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({"name": "app_user", "password": "s3cr3t", "roles": ["readwrite"]})
        );
        assert!(!format!("{request:?}").contains("s3cr3t"));
    }

    #[test]
    fn create_user_request_rejects_bad_names() {
        assert!(CreateUserRequest::new("", "pw").validate().is_err());
        assert!(CreateUserRequest::new("drop table", "pw").validate().is_err());
        assert!(CreateUserRequest::new("a/b", "pw").validate().is_err());
    }

    #[test]
    fn scale_request_requires_a_change() {
        assert!(ScaleRequest::default().validate().is_err());

        let request = ScaleRequest {
            replicas: Some(2),
            ..ScaleRequest::default()
        };
        assert!(request.validate().is_ok());
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"replicas": 2}));

        let too_small = ScaleRequest {
            memory_mb: Some(128),
            ..ScaleRequest::default()
        };
        assert!(too_small.validate().is_err());
    }

    #[test]
    fn restore_request_needs_exactly_one_source() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let backup = BackupId::parse_str("bk-1").unwrap();

        assert!(RestoreRequest::from_backup(backup.clone()).validate().is_ok());
        assert!(RestoreRequest::to_point_in_time(at).validate().is_ok());
        assert!(RestoreRequest::default().validate().is_err());

        let both = RestoreRequest {
            backup_id: Some(backup),
            point_in_time: Some(at),
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn backup_policy_bounds() {
        assert!(BackupPolicy::enabled(7).validate().is_ok());
        assert!(BackupPolicy::enabled(0).validate().is_err());
        assert!(BackupPolicy::disabled().validate().is_ok());
        assert_eq!(
            serde_json::to_value(BackupPolicy::disabled()).unwrap(),
            json!({"enabled": false})
        );
    }

    #[test]
    fn configuration_request_requires_parameters() {
        assert!(UpdateConfigurationRequest::new().validate().is_err());
        let request = UpdateConfigurationRequest::new()
            .set("max_connections", 200)
            .apply_immediately(true);
        assert!(request.validate().is_ok());
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"parameters": {"max_connections": 200}, "apply_immediately": true})
        );
    }

    #[test]
    fn log_query_validation_and_pairs() {
        let since = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();

        let query = LogQuery {
            since: Some(since),
            until: Some(until),
            level: Some("error".into()),
            limit: Some(100),
            ..LogQuery::default()
        };
        assert!(query.validate().is_ok());
        assert_eq!(
            query.to_pairs(),
            vec![
                ("since", "2024-06-01T00:00:00Z".to_string()),
                ("until", "2024-06-02T00:00:00Z".to_string()),
                ("level", "error".to_string()),
                ("limit", "100".to_string()),
            ]
        );

        let inverted = LogQuery {
            since: Some(until),
            until: Some(since),
            ..LogQuery::default()
        };
        assert!(inverted.validate().is_err());

        let too_many = LogQuery {
            limit: Some(5000),
            ..LogQuery::default()
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn task_list_params_use_type_key() {
        let params = TaskListParams {
            kind: Some("restore".into()),
            ..TaskListParams::default()
        };
        assert_eq!(params.to_pairs(), vec![("type", "restore".to_string())]);
    }

    #[test]
    fn task_list_params_join_states() {
        let params = TaskListParams {
            states: vec![TaskState::Running, TaskState::Failed],
            limit: Some(10),
            ..TaskListParams::default()
        };
        assert_eq!(
            params.to_pairs(),
            vec![
                ("state", "RUNNING,FAILED".to_string()),
                ("limit", "10".to_string())
            ]
        );
    }
}
