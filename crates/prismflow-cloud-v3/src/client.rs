//! Prism Central v3 API client
//!
//! Every request carries basic auth. Failures are classified here, once,
//! into [`ApiError`] variants so the reconciler never looks at message text.

use crate::error::{PrismApiError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prismflow_cloud::{
    ApiError, ApiResult, Entity, IntentInput, PrismApi, ResourceKind, SpecVersion, Submitted,
    TaskId, TaskState, TaskStatus,
};
use prismflow_config::ProviderConfig;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Entities requested per list page
pub const PAGE_SIZE: usize = 250;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Reason code Prism puts on lookups of unknown entities
const ENTITY_NOT_FOUND: &str = "ENTITY_NOT_FOUND";

/// Prism Central v3 client
pub struct PrismClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl PrismClient {
    /// Create a client for the instance described by `config`
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(url).map_err(|source| PrismApiError::InvalidProxy {
                url: url.clone(),
                source,
            })?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Create a client from `NUTANIX_*` variables and the config file
    pub fn from_env() -> Result<Self> {
        Self::new(&ProviderConfig::load()?)
    }

    /// Point the client at another API root, e.g. a mock server
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Fatal(format!("unexpected response body: {}", e)))
    }

    /// List one page of `kind`
    async fn list_page(
        &self,
        kind: ResourceKind,
        filter: &str,
        offset: usize,
    ) -> ApiResult<ListResponse> {
        let body = ListRequest {
            kind: kind.entity_kind(),
            filter: Some(filter).filter(|f| !f.is_empty()),
            length: PAGE_SIZE,
            offset,
        };
        let url = self.url(&format!("{}/list", kind.collection()));
        self.send_json(self.client.post(&url).json(&body)).await
    }
}

#[async_trait]
impl PrismApi for PrismClient {
    async fn create(&self, kind: ResourceKind, intent: &IntentInput) -> ApiResult<Submitted> {
        let url = self.url(kind.collection());
        let response: IntentResponse = self.send_json(self.client.post(&url).json(intent)).await?;

        let uuid = response
            .meta()
            .uuid
            .ok_or_else(|| ApiError::Fatal("create response carries no uuid".to_string()))?;
        let task_id = response.task_id()?;
        tracing::debug!(kind = %kind, uuid = %uuid, task = %task_id, "create accepted");
        Ok(Submitted { uuid, task_id })
    }

    async fn get(&self, kind: ResourceKind, uuid: &str) -> ApiResult<Entity> {
        let url = self.url(&format!("{}/{}", kind.collection(), uuid));
        let response: IntentResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.into_entity(uuid))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        uuid: &str,
        intent: &IntentInput,
        spec_version: SpecVersion,
    ) -> ApiResult<TaskId> {
        let mut metadata = match &intent.metadata {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        metadata.insert("kind".into(), Value::from(kind.entity_kind()));
        metadata.insert("uuid".into(), Value::from(uuid));
        metadata.insert("spec_version".into(), Value::from(spec_version.0));
        let body = serde_json::json!({ "spec": intent.spec, "metadata": metadata });

        let url = self.url(&format!("{}/{}", kind.collection(), uuid));
        let response: IntentResponse = self.send_json(self.client.put(&url).json(&body)).await?;
        response.task_id()
    }

    async fn delete(&self, kind: ResourceKind, uuid: &str) -> ApiResult<TaskId> {
        let url = self.url(&format!("{}/{}", kind.collection(), uuid));
        let response: IntentResponse = self.send_json(self.client.delete(&url)).await?;
        response.task_id()
    }

    async fn list_filtered(&self, kind: ResourceKind, filter: &str) -> ApiResult<Vec<Entity>> {
        let mut entities = Vec::new();
        loop {
            let page = self.list_page(kind, filter, entities.len()).await?;
            let received = page.entities.len();
            entities.extend(page.entities.into_iter().map(|e| e.into_entity("")));

            let total = page.metadata.total_matches.unwrap_or(entities.len());
            if received == 0 || entities.len() >= total {
                break;
            }
        }
        tracing::debug!(kind = %kind, filter, count = entities.len(), "listed");
        Ok(entities)
    }

    async fn task_status(&self, task_id: &TaskId) -> ApiResult<TaskStatus> {
        let url = self.url(&format!("tasks/{}", task_id));
        let task: TaskResponse = self.send_json(self.client.get(&url)).await?;
        Ok(task.into_status(task_id))
    }

    async fn upload_image(&self, uuid: &str, content: Vec<u8>) -> ApiResult<()> {
        let url = self.url(&format!("images/{}/file", uuid));
        let request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        self.send(request).await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() || err.is_connect() {
        ApiError::Transient(err.to_string())
    } else {
        ApiError::Fatal(err.to_string())
    }
}

/// Map a non-success response onto [`ApiError`].
pub(crate) fn classify(status: StatusCode, body: &str) -> ApiError {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let messages = parsed
        .as_ref()
        .map(|e| e.messages())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("{} {}", status, body.trim()));

    let entity_missing = parsed.as_ref().is_some_and(|e| {
        e.message_list
            .iter()
            .any(|m| m.reason.as_deref() == Some(ENTITY_NOT_FOUND))
    });

    if status == StatusCode::NOT_FOUND || entity_missing {
        ApiError::NotFound(messages)
    } else if status == StatusCode::CONFLICT {
        ApiError::Conflict(messages)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ApiError::Transient(messages)
    } else {
        ApiError::Fatal(messages)
    }
}

// ============ API Types ============

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    length: usize,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    entities: Vec<IntentResponse>,
    #[serde(default)]
    metadata: ListMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ListMetadata {
    total_matches: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct IntentMetadata {
    uuid: Option<String>,
    spec_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    #[serde(default)]
    spec: Value,
    #[serde(default)]
    status: Value,
    #[serde(default)]
    metadata: Value,
}

impl IntentResponse {
    fn meta(&self) -> IntentMetadata {
        serde_json::from_value(self.metadata.clone()).unwrap_or_default()
    }

    /// `status.execution_context.task_uuid`, a string or a one-element list
    fn task_id(&self) -> ApiResult<TaskId> {
        let task = self.status.pointer("/execution_context/task_uuid");
        let id = match task {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Array(ids)) => ids.first().and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        };
        id.map(TaskId::new)
            .ok_or_else(|| ApiError::Fatal("response carries no task uuid".to_string()))
    }

    fn into_entity(self, requested: &str) -> Entity {
        let meta = self.meta();
        let name = self
            .spec
            .get("name")
            .or_else(|| self.status.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Entity {
            uuid: meta.uuid.unwrap_or_else(|| requested.to_string()),
            name,
            spec_version: SpecVersion(meta.spec_version.unwrap_or(0)),
            spec: self.spec,
            status: self.status,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    progress_message: Option<String>,
    #[serde(default)]
    percentage_complete: Option<i64>,
    #[serde(default)]
    error_detail: Option<String>,
    #[serde(default)]
    creation_time: Option<String>,
}

impl TaskResponse {
    fn into_status(self, task_id: &TaskId) -> TaskStatus {
        TaskStatus {
            uuid: task_id.clone(),
            state: TaskState::parse(&self.status),
            progress_message: self.progress_message,
            percentage_complete: self.percentage_complete,
            error_detail: self.error_detail.filter(|d| !d.is_empty()),
            creation_time: self
                .creation_time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message_list: Vec<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl ErrorResponse {
    fn messages(&self) -> String {
        self.message_list
            .iter()
            .filter_map(|m| m.message.as_deref().or(m.reason.as_deref()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
