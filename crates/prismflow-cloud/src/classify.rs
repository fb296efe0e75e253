//! Change classification
//!
//! A change set is computed fresh for every update by comparing the last
//! applied spec with the desired one, field by field. Each field carries a
//! static [`Disruption`] class; whether the whole update can be applied to a
//! running resource is the AND over the changed fields.

use serde::Serialize;
use serde_json::{Map, Value};

/// How changing a field affects a running resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disruption {
    /// Applied live
    HotPluggable,

    /// Requires the resource to be powered off
    Disruptive,

    /// Grows live when hot-add is enabled; shrinking always needs a power cycle
    Quantity,

    /// Disk list: disruptive only when the number of CD-ROM devices changes
    CdromCount,
}

impl Disruption {
    /// Whether changing a field of this class from `old` to `new` is disruptive.
    pub fn is_disruptive(&self, old: &Value, new: &Value, hot_add: bool) -> bool {
        match self {
            Disruption::HotPluggable => false,
            Disruption::Disruptive => true,
            Disruption::Quantity => match (old.as_i64(), new.as_i64()) {
                (Some(old), Some(new)) if new < old => true,
                _ => !hot_add,
            },
            Disruption::CdromCount => count_cdroms(old) != count_cdroms(new),
        }
    }
}

fn count_cdroms(disks: &Value) -> usize {
    disks
        .as_array()
        .map(|list| {
            list.iter()
                .filter(|disk| {
                    disk.pointer("/device_properties/device_type")
                        .and_then(|v| v.as_str())
                        == Some("CDROM")
                })
                .count()
        })
        .unwrap_or(0)
}

/// One field-level difference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub field: String,
    pub old: Value,
    pub new: Value,
    pub disruptive: bool,
}

/// All differences between two specs of the same resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn get(&self, field: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.field == field)
    }

    /// True when no changed field needs a power cycle.
    pub fn can_hot_apply(&self) -> bool {
        self.changes.iter().all(|c| !c.disruptive)
    }

    /// Names of the fields that force a power cycle
    pub fn disruptive_fields(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.disruptive)
            .map(|c| c.field.as_str())
            .collect()
    }
}

impl std::fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<_> = self.changes.iter().map(|c| c.field.as_str()).collect();
        write!(
            f,
            "{} changed ({} disruptive): {}",
            self.changes.len(),
            self.disruptive_fields().len(),
            fields.join(", ")
        )
    }
}

/// Compare two flattened specs key by key.
///
/// Keys missing on one side compare as `null`. `classify` decides the
/// disruption of each differing key.
pub fn diff_fields<F>(old: &Map<String, Value>, new: &Map<String, Value>, classify: F) -> ChangeSet
where
    F: Fn(&str, &Value, &Value) -> bool,
{
    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut set = ChangeSet::new();
    for key in keys {
        let before = old.get(key).unwrap_or(&Value::Null);
        let after = new.get(key).unwrap_or(&Value::Null);
        if before == after {
            continue;
        }
        set.push(Change {
            field: key.clone(),
            old: before.clone(),
            new: after.clone(),
            disruptive: classify(key, before, after),
        });
    }
    set
}
