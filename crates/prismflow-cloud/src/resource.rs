//! Desired specs handed to the reconciler

use crate::api::IntentInput;
use crate::classify::{ChangeSet, diff_fields};
use crate::error::{CloudError, Result};
use crate::kind::ResourceKind;
use crate::power::PowerState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a caller wants a resource to look like
pub trait ResourceSpec: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn name(&self) -> &str;

    /// Request body for create and update
    fn to_intent(&self) -> Result<IntentInput>;

    /// Differences from `self` (last applied) to `desired`
    fn diff(&self, desired: &Self) -> Result<ChangeSet>
    where
        Self: Sized;

    /// Power state to leave the resource in after a disruptive update
    fn power_state(&self) -> Option<PowerState> {
        None
    }

    /// Local file whose content is uploaded once the resource exists
    fn upload_source(&self) -> Option<&Path> {
        None
    }

    /// Wait for a reported IP address after creation
    fn wait_for_ip(&self) -> bool {
        false
    }

    /// Replaces the kind's task timeout for this resource
    fn wait_timeout(&self) -> Option<Duration> {
        None
    }
}

pub(crate) fn flatten<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CloudError::InvalidSpec(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Kind-agnostic spec for resources without a power state
///
/// `resources` is the already-expanded `spec.resources` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericSpec {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resources: Value,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,

    /// Not part of the resource, so never diffed
    #[serde(default, skip_serializing)]
    pub wait_timeout_minutes: Option<u64>,
}

impl GenericSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>, resources: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            description: None,
            resources,
            categories: BTreeMap::new(),
            wait_timeout_minutes: None,
        }
    }

    pub fn with_wait_timeout(mut self, minutes: u64) -> Self {
        self.wait_timeout_minutes = Some(minutes);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl ResourceSpec for GenericSpec {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(m * 60))
    }

    fn to_intent(&self) -> Result<IntentInput> {
        if self.kind.has_power_state() {
            return Err(CloudError::InvalidSpec(format!(
                "{} resources need a typed spec",
                self.kind
            )));
        }
        let mut spec = json!({ "name": self.name, "resources": self.resources });
        if let Some(description) = &self.description {
            spec["description"] = json!(description);
        }
        Ok(IntentInput::new(
            spec,
            json!({ "kind": self.kind.entity_kind(), "categories": self.categories }),
        ))
    }

    fn diff(&self, desired: &Self) -> Result<ChangeSet> {
        if self.kind != desired.kind {
            return Err(CloudError::InvalidSpec(format!(
                "cannot change kind from {} to {}",
                self.kind, desired.kind
            )));
        }
        Ok(diff_fields(
            &flatten(self)?,
            &flatten(desired)?,
            |_, _, _| false,
        ))
    }
}

/// Image checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: String,
    pub value: String,
}

/// Disk or ISO image
///
/// Exactly one of `source_uri` (fetched by the backend) and `source_path`
/// (uploaded after the image object exists) must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_type: Option<String>,
    #[serde(default)]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    #[serde(default)]
    pub checksum: Option<Checksum>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

impl ImageSpec {
    pub fn from_uri(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            image_type: None,
            source_uri: Some(uri.into()),
            source_path: None,
            checksum: None,
            categories: BTreeMap::new(),
        }
    }

    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_uri: None,
            source_path: Some(path.into()),
            ..Self::from_uri(name, "")
        }
    }
}

impl ResourceSpec for ImageSpec {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn to_intent(&self) -> Result<IntentInput> {
        let mut resources = Map::new();
        match (&self.source_uri, &self.source_path) {
            (Some(uri), None) => {
                resources.insert("source_uri".into(), json!(uri));
            }
            (None, Some(_)) => {}
            _ => {
                return Err(CloudError::InvalidSpec(format!(
                    "image {} needs exactly one of source_uri and source_path",
                    self.name
                )));
            }
        }
        if let Some(image_type) = &self.image_type {
            resources.insert("image_type".into(), json!(image_type));
        }
        if let Some(checksum) = &self.checksum {
            resources.insert(
                "checksum".into(),
                json!({
                    "checksum_algorithm": checksum.algorithm,
                    "checksum_value": checksum.value,
                }),
            );
        }

        let mut spec = json!({ "name": self.name, "resources": resources });
        if let Some(description) = &self.description {
            spec["description"] = json!(description);
        }
        Ok(IntentInput::new(
            spec,
            json!({ "kind": "image", "categories": self.categories }),
        ))
    }

    fn diff(&self, desired: &Self) -> Result<ChangeSet> {
        Ok(diff_fields(
            &flatten(self)?,
            &flatten(desired)?,
            |_, _, _| false,
        ))
    }

    fn upload_source(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}
