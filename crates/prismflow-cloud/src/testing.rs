//! In-memory Prism Central for tests
//!
//! `FakePrism` keeps entities and task scripts behind a mutex and records
//! every call. Mutations succeed with a SUCCEEDED task unless a test
//! scripted something else. Scripts are consumed once.

use crate::api::{
    ApiResult, Entity, IntentInput, PrismApi, SpecVersion, Submitted, TaskId, TaskState,
    TaskStatus,
};
use crate::error::ApiError;
use crate::kind::ResourceKind;
use crate::power::PowerState;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A call received by the fake, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create {
        kind: ResourceKind,
        name: Option<String>,
    },
    Get {
        uuid: String,
    },
    Update {
        uuid: String,
        spec_version: SpecVersion,
        power_state: Option<PowerState>,
    },
    Delete {
        uuid: String,
    },
    List {
        kind: ResourceKind,
        filter: String,
    },
    TaskStatus {
        task_id: TaskId,
    },
    Upload {
        uuid: String,
        bytes: usize,
    },
}

struct Stored {
    kind: ResourceKind,
    entity: Entity,
}

#[derive(Default)]
struct State {
    next_id: u64,
    entities: HashMap<String, Stored>,
    tasks: HashMap<TaskId, VecDeque<TaskStatus>>,
    hidden: HashMap<TaskId, u32>,
    uploads: HashMap<String, Vec<u8>>,
    calls: Vec<Call>,

    power_lag: u32,
    concurrent_edits: HashSet<String>,
    pending_power: HashMap<String, (PowerState, u32)>,

    updates_seen: usize,
    create_script: Option<Vec<TaskState>>,
    delete_script: Option<Vec<TaskState>>,
    update_scripts: HashMap<usize, Vec<TaskState>>,
    update_rejections: HashMap<usize, ApiError>,
    delete_rejection: Option<ApiError>,
    upload_rejection: Option<ApiError>,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn add_task(&mut self, states: &[TaskState]) -> TaskId {
        let id = TaskId::new(self.next_id("task"));
        let statuses = states
            .iter()
            .map(|s| TaskStatus::new(id.clone(), s.clone()))
            .collect();
        self.tasks.insert(id.clone(), statuses);
        id
    }

    fn insert(&mut self, kind: ResourceKind, name: &str, spec: Value, status: Value) -> String {
        let uuid = self.next_id(kind.entity_kind());
        let entity = Entity {
            uuid: uuid.clone(),
            name: Some(name.to_string()),
            spec_version: SpecVersion(1),
            spec,
            status,
            metadata: json!({ "kind": kind.entity_kind() }),
        };
        self.entities.insert(uuid.clone(), Stored { kind, entity });
        uuid
    }
}

fn succeeded(script: Option<Vec<TaskState>>) -> Vec<TaskState> {
    script.unwrap_or_else(|| vec![TaskState::Succeeded])
}

fn ends_in_success(script: &[TaskState]) -> bool {
    script.last() == Some(&TaskState::Succeeded)
}

/// Undo the percent-encoding of FIQL separators in a filter value.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let code = rest.get(at + 1..at + 3);
        match code {
            Some("25") => out.push('%'),
            Some("2C") => out.push(','),
            Some("3B") => out.push(';'),
            _ => {
                out.push('%');
                rest = &rest[at + 1..];
                continue;
            }
        }
        rest = &rest[at + 3..];
    }
    out.push_str(rest);
    out
}

fn power_of(spec: &Value) -> Option<PowerState> {
    spec.pointer("/resources/power_state")
        .and_then(|v| v.as_str())
        .and_then(PowerState::parse)
}

fn set_status_power(entity: &mut Entity, state: PowerState) {
    if let Some(resources) = entity
        .status
        .get_mut("resources")
        .and_then(|r| r.as_object_mut())
    {
        resources.insert("power_state".into(), json!(state));
    }
}

/// In-memory [`PrismApi`]
#[derive(Default)]
pub struct FakePrism {
    state: Mutex<State>,
}

impl FakePrism {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a task that reports `states` in order, then repeats the last.
    pub fn script_task(&self, states: &[TaskState]) -> TaskId {
        self.state().add_task(states)
    }

    /// Like [`script_task`](Self::script_task) with full status records.
    pub fn script_task_status(&self, statuses: Vec<TaskStatus>) -> TaskId {
        let mut state = self.state();
        let id = TaskId::new(state.next_id("task"));
        let statuses = statuses
            .into_iter()
            .map(|s| TaskStatus {
                uuid: id.clone(),
                ..s
            })
            .collect();
        state.tasks.insert(id.clone(), statuses);
        id
    }

    /// Answer the next `lookups` status requests for `task` with NotFound.
    pub fn hide_task(&self, task: &TaskId, lookups: u32) {
        self.state().hidden.insert(task.clone(), lookups);
    }

    /// Task states reported for the next create.
    pub fn script_create(&self, states: &[TaskState]) {
        self.state().create_script = Some(states.to_vec());
    }

    /// Task states reported for the next delete.
    pub fn script_delete(&self, states: &[TaskState]) {
        self.state().delete_script = Some(states.to_vec());
    }

    /// Task states reported for the `n`th update (0-based) from now on.
    pub fn script_update(&self, n: usize, states: &[TaskState]) {
        let mut state = self.state();
        let at = state.updates_seen + n;
        state.update_scripts.insert(at, states.to_vec());
    }

    /// Reject the `n`th update (0-based) from now on.
    pub fn reject_update(&self, n: usize, err: ApiError) {
        let mut state = self.state();
        let at = state.updates_seen + n;
        state.update_rejections.insert(at, err);
    }

    /// Reject the next delete request.
    pub fn reject_delete(&self, err: ApiError) {
        self.state().delete_rejection = Some(err);
    }

    /// Reject the next image upload.
    pub fn reject_upload(&self, err: ApiError) {
        self.state().upload_rejection = Some(err);
    }

    /// Power transitions become visible only after `gets` further reads.
    pub fn set_power_lag(&self, gets: u32) {
        self.state().power_lag = gets;
    }

    pub fn insert_vm(&self, name: &str, memory_mib: i64, power: PowerState) -> String {
        let resources = json!({
            "num_sockets": 1,
            "memory_size_mib": memory_mib,
            "power_state": power,
        });
        self.state().insert(
            ResourceKind::Vm,
            name,
            json!({ "name": name, "resources": resources }),
            json!({ "state": "COMPLETE", "resources": resources }),
        )
    }

    pub fn insert_entity(&self, kind: ResourceKind, name: &str) -> String {
        self.state().insert(
            kind,
            name,
            json!({ "name": name, "resources": {} }),
            json!({ "state": "COMPLETE", "resources": {} }),
        )
    }

    /// Report `ip` on the VM's only NIC.
    pub fn set_ip(&self, uuid: &str, ip: &str) {
        if let Some(stored) = self.state().entities.get_mut(uuid) {
            stored.entity.status["resources"]["nic_list"] =
                json!([{ "ip_endpoint_list": [{ "ip": ip }] }]);
        }
    }

    /// Someone else modifies the entity right after its next read, so the
    /// spec version that read returned is stale by the time it is echoed.
    pub fn edit_after_next_get(&self, uuid: &str) {
        self.state().concurrent_edits.insert(uuid.to_string());
    }

    /// Simulate an out-of-band delete.
    pub fn remove(&self, uuid: &str) {
        self.state().entities.remove(uuid);
    }

    pub fn entity(&self, uuid: &str) -> Option<Entity> {
        self.state().entities.get(uuid).map(|s| s.entity.clone())
    }

    pub fn entity_count(&self) -> usize {
        self.state().entities.len()
    }

    pub fn uploaded(&self, uuid: &str) -> Option<Vec<u8>> {
        self.state().uploads.get(uuid).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Power states requested by updates, in order
    pub fn requested_power_states(&self) -> Vec<Option<PowerState>> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Update { power_state, .. } => Some(*power_state),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PrismApi for FakePrism {
    async fn create(&self, kind: ResourceKind, intent: &IntentInput) -> ApiResult<Submitted> {
        let mut state = self.state();
        let name = intent
            .spec
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        state.calls.push(Call::Create {
            kind,
            name: name.clone(),
        });

        let mut resources = intent.spec.get("resources").cloned().unwrap_or(json!({}));
        if kind.has_power_state() && power_of(&intent.spec).is_none() {
            resources["power_state"] = json!(PowerState::On);
        }
        let uuid = state.next_id(kind.entity_kind());
        let entity = Entity {
            uuid: uuid.clone(),
            name,
            spec_version: SpecVersion(0),
            spec: intent.spec.clone(),
            status: json!({ "state": "COMPLETE", "resources": resources }),
            metadata: intent.metadata.clone(),
        };
        state.entities.insert(uuid.clone(), Stored { kind, entity });

        let script = succeeded(state.create_script.take());
        let task_id = state.add_task(&script);
        Ok(Submitted { uuid, task_id })
    }

    async fn get(&self, kind: ResourceKind, uuid: &str) -> ApiResult<Entity> {
        let mut state = self.state();
        state.calls.push(Call::Get {
            uuid: uuid.to_string(),
        });

        let landed = match state.pending_power.get_mut(uuid) {
            Some((target, 0)) => Some(*target),
            Some((_, remaining)) => {
                *remaining -= 1;
                None
            }
            None => None,
        };
        if let Some(target) = landed {
            state.pending_power.remove(uuid);
            if let Some(stored) = state.entities.get_mut(uuid) {
                set_status_power(&mut stored.entity, target);
            }
        }

        let observed = match state.entities.get(uuid) {
            Some(stored) if stored.kind == kind => stored.entity.clone(),
            _ => return Err(ApiError::NotFound(uuid.to_string())),
        };
        if state.concurrent_edits.remove(uuid) {
            if let Some(stored) = state.entities.get_mut(uuid) {
                stored.entity.spec_version.0 += 1;
            }
        }
        Ok(observed)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        uuid: &str,
        intent: &IntentInput,
        spec_version: SpecVersion,
    ) -> ApiResult<TaskId> {
        let mut guard = self.state();
        let state = &mut *guard;
        let target = power_of(&intent.spec);
        state.calls.push(Call::Update {
            uuid: uuid.to_string(),
            spec_version,
            power_state: target,
        });

        let n = state.updates_seen;
        state.updates_seen += 1;
        if let Some(err) = state.update_rejections.remove(&n) {
            return Err(err);
        }

        let lag = state.power_lag;
        let Some(stored) = state.entities.get_mut(uuid).filter(|s| s.kind == kind) else {
            return Err(ApiError::NotFound(uuid.to_string()));
        };
        if stored.entity.spec_version != spec_version {
            return Err(ApiError::Conflict(format!(
                "spec_version {} does not match {}",
                spec_version, stored.entity.spec_version
            )));
        }

        let script = succeeded(state.update_scripts.remove(&n));
        if ends_in_success(&script) {
            let Some(stored) = state.entities.get_mut(uuid) else {
                return Err(ApiError::NotFound(uuid.to_string()));
            };
            let entity = &mut stored.entity;
            let before = entity.power_state();
            entity.spec = intent.spec.clone();
            entity.spec_version.0 += 1;
            if let Some(name) = intent.spec.get("name").and_then(|v| v.as_str()) {
                entity.name = Some(name.to_string());
            }
            let mut resources = intent.spec.get("resources").cloned().unwrap_or(json!({}));
            if let (Some(before), Some(obj)) = (before, resources.as_object_mut()) {
                obj.insert("power_state".into(), json!(before));
            }
            entity.status["resources"] = resources;

            if let Some(target) = target.filter(|t| Some(*t) != before) {
                if lag == 0 {
                    set_status_power(entity, target);
                } else {
                    state.pending_power.insert(uuid.to_string(), (target, lag));
                }
            }
        }
        Ok(state.add_task(&script))
    }

    async fn delete(&self, kind: ResourceKind, uuid: &str) -> ApiResult<TaskId> {
        let mut state = self.state();
        state.calls.push(Call::Delete {
            uuid: uuid.to_string(),
        });
        if let Some(err) = state.delete_rejection.take() {
            return Err(err);
        }
        if !state.entities.get(uuid).is_some_and(|s| s.kind == kind) {
            return Err(ApiError::NotFound(uuid.to_string()));
        }

        let script = succeeded(state.delete_script.take());
        if ends_in_success(&script) {
            state.entities.remove(uuid);
        }
        Ok(state.add_task(&script))
    }

    /// Like Prism, `name==` filters also match longer names; callers are
    /// expected to compare names exactly.
    async fn list_filtered(&self, kind: ResourceKind, filter: &str) -> ApiResult<Vec<Entity>> {
        let mut state = self.state();
        state.calls.push(Call::List {
            kind,
            filter: filter.to_string(),
        });
        let needle = unescape(filter.strip_prefix("name==").unwrap_or(filter));

        let mut found: Vec<Entity> = state
            .entities
            .values()
            .filter(|s| s.kind == kind)
            .filter(|s| s.entity.name.as_deref().is_some_and(|n| n.contains(&needle)))
            .map(|s| s.entity.clone())
            .collect();
        found.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(found)
    }

    async fn task_status(&self, task_id: &TaskId) -> ApiResult<TaskStatus> {
        let mut state = self.state();
        state.calls.push(Call::TaskStatus {
            task_id: task_id.clone(),
        });

        if let Some(remaining) = state.hidden.get_mut(task_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::NotFound(task_id.to_string()));
            }
        }

        let Some(script) = state.tasks.get_mut(task_id) else {
            return Err(ApiError::NotFound(task_id.to_string()));
        };
        let status = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        status.ok_or_else(|| ApiError::Fatal(format!("task {} has no status", task_id)))
    }

    async fn upload_image(&self, uuid: &str, content: Vec<u8>) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Upload {
            uuid: uuid.to_string(),
            bytes: content.len(),
        });
        if let Some(err) = state.upload_rejection.take() {
            return Err(err);
        }
        if !state.entities.contains_key(uuid) {
            return Err(ApiError::NotFound(uuid.to_string()));
        }
        state.uploads.insert(uuid.to_string(), content);
        Ok(())
    }
}
