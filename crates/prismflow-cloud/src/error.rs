//! Reconciliation error types

use crate::kind::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the API collaborator.
///
/// The transport decides the class once, from the HTTP status and the
/// backend's error body. Callers match on the variant and never look at
/// the message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("conflicting request: {0}")]
    Conflict(String),

    #[error("transient API failure: {0}")]
    Transient(String),

    #[error("API request failed: {0}")]
    Fatal(String),
}

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(
        "{count} {kind} resources are named {name:?}; look the resource up by its UUID instead"
    )]
    AmbiguousName {
        kind: ResourceKind,
        name: String,
        count: usize,
    },

    #[error("{kind} named {name:?} already exists with UUID {uuid}")]
    AlreadyExists {
        kind: ResourceKind,
        name: String,
        uuid: String,
    },

    #[error("task {task_id} ended in state {state}: {detail}")]
    TaskFailed {
        task_id: String,
        state: String,
        detail: String,
    },

    #[error("Timeout after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("spec version of {uuid} is stale, the resource was modified concurrently: {detail}")]
    ConcurrencyConflict { uuid: String, detail: String },

    #[error("creation of {uuid} failed and the resource was deleted: {source}")]
    RolledBack {
        uuid: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("creation of {uuid} failed: {original}; deleting it afterwards also failed: {rollback}")]
    RollbackFailed {
        uuid: String,
        original: Box<CloudError>,
        rollback: Box<CloudError>,
    },

    #[error("API error: {0}")]
    Api(ApiError),

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Lift an API failure that concerns `uuid` into the taxonomy.
    pub fn from_api(uuid: &str, err: ApiError) -> Self {
        match err {
            ApiError::NotFound(_) => CloudError::NotFound(uuid.to_string()),
            ApiError::Conflict(detail) => CloudError::ConcurrencyConflict {
                uuid: uuid.to_string(),
                detail,
            },
            other => CloudError::Api(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout { .. })
    }

    /// The error that started a failed create, looking through rollback
    /// wrappers.
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::RolledBack { source, .. } => source.root(),
            CloudError::RollbackFailed { original, .. } => original.root(),
            other => other,
        }
    }
}

impl From<ApiError> for CloudError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(what) => CloudError::NotFound(what),
            other => CloudError::Api(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_becomes_concurrency_conflict() {
        let err = CloudError::from_api("vm-1", ApiError::Conflict("spec_version 3 != 4".into()));
        assert!(matches!(
            err,
            CloudError::ConcurrencyConflict { ref uuid, .. } if uuid == "vm-1"
        ));
    }

    #[test]
    fn test_rollback_failed_mentions_both_failures() {
        let err = CloudError::RollbackFailed {
            uuid: "img-1".into(),
            original: Box::new(CloudError::TaskFailed {
                task_id: "t-1".into(),
                state: "FAILED".into(),
                detail: "disk full".into(),
            }),
            rollback: Box::new(CloudError::Api(ApiError::Fatal("permission denied".into()))),
        };
        let msg = err.to_string();
        assert!(msg.contains("t-1"));
        assert!(msg.contains("disk full"));
        assert!(msg.contains("permission denied"));
        assert!(matches!(err.root(), CloudError::TaskFailed { .. }));
    }
}
