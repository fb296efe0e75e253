//! API collaborator trait and the plain data it exchanges

use crate::error::ApiError;
use crate::kind::ResourceKind;
use crate::power::PowerState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Prism Central v3 operations consumed by the reconciler
///
/// Implementations own authentication, transport retries and pagination.
/// Every mutating call returns as soon as the backend accepted it; the
/// returned task identifier is what the reconciler waits on.
#[async_trait]
pub trait PrismApi: Send + Sync {
    /// Submit a create and return the assigned UUID with its task
    async fn create(&self, kind: ResourceKind, intent: &IntentInput) -> ApiResult<Submitted>;

    /// Fetch the current representation of a resource
    async fn get(&self, kind: ResourceKind, uuid: &str) -> ApiResult<Entity>;

    /// Submit an update that echoes the last observed spec version
    async fn update(
        &self,
        kind: ResourceKind,
        uuid: &str,
        intent: &IntentInput,
        spec_version: SpecVersion,
    ) -> ApiResult<TaskId>;

    /// Submit a delete
    async fn delete(&self, kind: ResourceKind, uuid: &str) -> ApiResult<TaskId>;

    /// List every resource matching a server-side filter expression
    async fn list_filtered(&self, kind: ResourceKind, filter: &str) -> ApiResult<Vec<Entity>>;

    /// Read the status of a backend task
    async fn task_status(&self, task_id: &TaskId) -> ApiResult<TaskStatus>;

    /// Upload binary content for an existing image object
    async fn upload_image(&self, uuid: &str, content: Vec<u8>) -> ApiResult<()>;
}

/// Identifier of an asynchronous backend task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optimistic-concurrency counter attached to every resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecVersion(pub i64);

impl std::fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Accepted create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub uuid: String,
    pub task_id: TaskId,
}

/// Body of a create or update request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentInput {
    pub spec: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl IntentInput {
    pub fn new(spec: serde_json::Value, metadata: serde_json::Value) -> Self {
        Self { spec, metadata }
    }

    /// Rebuild an intent from an observed entity, unchanged.
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            spec: entity.spec.clone(),
            metadata: entity.metadata.clone(),
        }
    }

    /// Override `spec.resources.power_state`, creating the path if needed.
    pub fn set_power_state(&mut self, state: PowerState) {
        if !self.spec.is_object() {
            self.spec = serde_json::json!({});
        }
        let Some(spec) = self.spec.as_object_mut() else {
            return;
        };
        let resources = spec
            .entry("resources")
            .or_insert_with(|| serde_json::json!({}));
        if !resources.is_object() {
            *resources = serde_json::json!({});
        }
        if let Some(resources) = resources.as_object_mut() {
            resources.insert(
                "power_state".to_string(),
                serde_json::Value::String(state.as_str().to_string()),
            );
        }
    }
}

/// Observed representation of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub uuid: String,
    pub name: Option<String>,
    pub spec_version: SpecVersion,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Entity {
    /// `status.state`, e.g. `COMPLETE` or `PENDING`
    pub fn state(&self) -> Option<&str> {
        self.status.get("state").and_then(|v| v.as_str())
    }

    /// `status.resources.power_state`
    pub fn power_state(&self) -> Option<PowerState> {
        self.status
            .pointer("/resources/power_state")
            .and_then(|v| v.as_str())
            .and_then(PowerState::parse)
    }

    /// First IP address reported on any NIC
    pub fn ip_address(&self) -> Option<String> {
        self.status
            .pointer("/resources/nic_list")
            .and_then(|v| v.as_array())?
            .iter()
            .filter_map(|nic| nic.get("ip_endpoint_list").and_then(|v| v.as_array()))
            .flatten()
            .find_map(|ep| ep.get("ip").and_then(|v| v.as_str()))
            .map(str::to_string)
    }
}

/// State of a backend task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Other(String),
}

impl TaskState {
    pub fn parse(s: &str) -> Self {
        match s {
            "QUEUED" => TaskState::Queued,
            "RUNNING" => TaskState::Running,
            "SUCCEEDED" => TaskState::Succeeded,
            "FAILED" => TaskState::Failed,
            "ABORTED" => TaskState::Aborted,
            other => TaskState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Queued => "QUEUED",
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Aborted => "ABORTED",
            TaskState::Other(s) => s,
        }
    }

    /// QUEUED and RUNNING; anything else is terminal.
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Queued | TaskState::Running)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a backend task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub uuid: TaskId,
    pub state: TaskState,
    pub progress_message: Option<String>,
    pub percentage_complete: Option<i64>,
    pub error_detail: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub fn new(uuid: TaskId, state: TaskState) -> Self {
        Self {
            uuid,
            state,
            progress_message: None,
            percentage_complete: None,
            error_detail: None,
            creation_time: None,
        }
    }

    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }
}
