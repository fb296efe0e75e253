//! Resource lifecycle
//!
//! [`Reconciler`] turns a desired spec into backend mutations and waits on
//! every task it submits. A create that does not finish cleanly is undone
//! with a compensating delete so no half-built resource is left behind.

use crate::api::{Entity, IntentInput, PrismApi, SpecVersion, TaskId};
use crate::classify::ChangeSet;
use crate::error::{ApiError, CloudError, Result};
use crate::kind::ResourceKind;
use crate::poll::{PollConfig, Refresh, TaskPoller, Timeouts};
use crate::power::{PowerController, PowerState};
use crate::resolve::named;
use crate::resource::ResourceSpec;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How one operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    Applied,

    /// Create failed after submission and the resource was deleted again
    AppliedWithRollback,

    Failed,
}

impl ReconciliationOutcome {
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ReconciliationOutcome::Applied,
            Err(CloudError::RolledBack { .. }) => ReconciliationOutcome::AppliedWithRollback,
            Err(_) => ReconciliationOutcome::Failed,
        }
    }
}

/// Creates, updates, deletes and reads resources
pub struct Reconciler {
    api: Arc<dyn PrismApi>,
    timeouts: Timeouts,
}

impl Reconciler {
    pub fn new(api: Arc<dyn PrismApi>, timeouts: Timeouts) -> Self {
        Self { api, timeouts }
    }

    pub fn api(&self) -> &dyn PrismApi {
        self.api.as_ref()
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Create a resource and return its UUID.
    ///
    /// Fails with [`CloudError::RolledBack`] when the create task or a
    /// post-create step failed and the resource was deleted again, or
    /// [`CloudError::RollbackFailed`] when that delete failed too. Kinds
    /// with unique names fail with [`CloudError::AlreadyExists`] before
    /// anything is submitted.
    pub async fn create<S: ResourceSpec>(&self, spec: &S) -> Result<String> {
        let kind = spec.kind();
        ensure_writable(kind)?;
        let config = self.poll_config(spec);
        let intent = spec.to_intent()?;

        if kind.requires_unique_name() {
            if let Some(existing) = named(self.api(), kind, spec.name()).await?.first() {
                return Err(CloudError::AlreadyExists {
                    kind,
                    name: spec.name().to_string(),
                    uuid: existing.uuid.clone(),
                });
            }
        }

        let submitted = self.api.create(kind, &intent).await?;
        let uuid = submitted.uuid;
        info!(kind = %kind, name = spec.name(), uuid = %uuid, task = %submitted.task_id, "create submitted");

        if let Err(err) = self.await_create(&submitted.task_id, &config).await {
            return Err(self.roll_back(kind, &uuid, &config, err).await);
        }

        if let Some(path) = spec.upload_source() {
            if let Err(err) = self.upload(&uuid, path).await {
                return Err(self.roll_back(kind, &uuid, &config, err).await);
            }
        }

        if kind.has_power_state() && spec.wait_for_ip() {
            match PowerController::new(self.api(), &config).wait_for_ip(&uuid).await {
                Ok(ip) => info!(uuid = %uuid, ip = %ip, "VM reported an IP address"),
                Err(err) => warn!(uuid = %uuid, error = %err, "VM did not report an IP address"),
            }
        }

        info!(kind = %kind, uuid = %uuid, "created");
        Ok(uuid)
    }

    /// Wait on a create task. A timed-out task gets one more look before
    /// the create is declared failed.
    async fn await_create(&self, task_id: &TaskId, config: &PollConfig) -> Result<()> {
        let poller = TaskPoller::new(self.api());
        match poller.wait_for_completion(task_id, config).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_timeout() => match poller.check_once(task_id).await {
                Ok(Refresh::Done(_)) => {
                    info!(task = %task_id, "task finished right after the timeout");
                    Ok(())
                }
                _ => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn upload(&self, uuid: &str, path: &Path) -> Result<()> {
        let content = tokio::fs::read(path).await?;
        info!(uuid, path = %path.display(), bytes = content.len(), "uploading image content");
        self.api
            .upload_image(uuid, content)
            .await
            .map_err(|e| CloudError::from_api(uuid, e))
    }

    async fn roll_back(
        &self,
        kind: ResourceKind,
        uuid: &str,
        config: &PollConfig,
        original: CloudError,
    ) -> CloudError {
        warn!(kind = %kind, uuid, error = %original, "create failed, deleting the resource");
        match self.delete_and_wait(kind, uuid, config).await {
            Ok(()) => CloudError::RolledBack {
                uuid: uuid.to_string(),
                source: Box::new(original),
            },
            Err(rollback) => {
                warn!(kind = %kind, uuid, error = %rollback, "rollback delete failed");
                CloudError::RollbackFailed {
                    uuid: uuid.to_string(),
                    original: Box::new(original),
                    rollback: Box::new(rollback),
                }
            }
        }
    }

    /// Bring the resource at `uuid` from `old` to `desired`.
    ///
    /// Returns the applied change set; an empty one means nothing was sent.
    /// A VM whose change set cannot be hot-applied is powered off for the
    /// update and brought back to its desired power state afterwards, even
    /// when the update failed.
    pub async fn update<S: ResourceSpec>(
        &self,
        uuid: &str,
        old: &S,
        desired: &S,
    ) -> Result<ChangeSet> {
        let changes = old.diff(desired)?;
        if changes.is_empty() {
            debug!(uuid, "no changes");
            return Ok(changes);
        }

        let kind = desired.kind();
        ensure_writable(kind)?;
        let config = self.poll_config(desired);
        let intent = desired.to_intent()?;
        let entity = self.fetch(kind, uuid).await?;

        if kind.has_power_state() && !changes.can_hot_apply() {
            info!(uuid, fields = ?changes.disruptive_fields(), "update needs a power cycle");
            let restore = desired.power_state().unwrap_or(PowerState::On);
            self.update_powered_off(kind, uuid, intent, restore, &config)
                .await?;
        } else {
            info!(uuid, %changes, "applying update");
            self.submit_update(kind, uuid, &intent, entity.spec_version, &config)
                .await?;
        }
        Ok(changes)
    }

    async fn update_powered_off(
        &self,
        kind: ResourceKind,
        uuid: &str,
        mut intent: IntentInput,
        restore: PowerState,
        config: &PollConfig,
    ) -> Result<()> {
        let power = PowerController::new(self.api(), config);
        if let Err(err) = power.set_power_state(uuid, PowerState::Off).await {
            // the VM may have stopped even though the wait gave up
            if restore != PowerState::Off {
                if let Err(restore_err) = power.set_power_state(uuid, restore).await {
                    warn!(uuid, error = %restore_err, "could not restore power state after failed power off");
                }
            }
            return Err(err);
        }

        intent.set_power_state(PowerState::Off);
        let applied = match self.fetch(kind, uuid).await {
            Ok(entity) => {
                self.submit_update(kind, uuid, &intent, entity.spec_version, config)
                    .await
            }
            Err(err) => Err(err),
        };

        if restore == PowerState::Off {
            return applied;
        }
        let restored = power.set_power_state(uuid, restore).await;
        match (applied, restored) {
            (Ok(()), restored) => restored,
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore_err)) => {
                warn!(uuid, error = %restore_err, "could not restore power state after failed update");
                Err(err)
            }
        }
    }

    async fn submit_update(
        &self,
        kind: ResourceKind,
        uuid: &str,
        intent: &IntentInput,
        spec_version: SpecVersion,
        config: &PollConfig,
    ) -> Result<()> {
        let task_id = self
            .api
            .update(kind, uuid, intent, spec_version)
            .await
            .map_err(|e| CloudError::from_api(uuid, e))?;
        debug!(uuid, task = %task_id, %spec_version, "update submitted");

        TaskPoller::new(self.api())
            .wait_for_completion(&task_id, config)
            .await?;
        Ok(())
    }

    /// Delete a resource. Deleting something that is already gone succeeds.
    pub async fn delete(&self, kind: ResourceKind, uuid: &str) -> Result<()> {
        ensure_writable(kind)?;
        let config = kind.poll_config(&self.timeouts);
        self.delete_and_wait(kind, uuid, &config).await
    }

    async fn delete_and_wait(&self, kind: ResourceKind, uuid: &str, config: &PollConfig) -> Result<()> {
        let task_id = match self.api.delete(kind, uuid).await {
            Ok(task_id) => task_id,
            Err(ApiError::NotFound(_)) => {
                debug!(kind = %kind, uuid, "already deleted");
                return Ok(());
            }
            Err(err) => return Err(CloudError::from_api(uuid, err)),
        };
        info!(kind = %kind, uuid, task = %task_id, "delete submitted");

        TaskPoller::new(self.api())
            .wait_for_completion(&task_id, config)
            .await?;
        Ok(())
    }

    /// Current representation, or `None` when the resource no longer exists.
    pub async fn read(&self, kind: ResourceKind, uuid: &str) -> Result<Option<Entity>> {
        match self.api.get(kind, uuid).await {
            Ok(entity) => Ok(Some(entity)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(err) => Err(CloudError::Api(err)),
        }
    }

    /// Power a VM on or off outside of an update.
    pub async fn set_power_state(&self, uuid: &str, target: PowerState) -> Result<()> {
        let config = ResourceKind::Vm.poll_config(&self.timeouts);
        PowerController::new(self.api(), &config)
            .set_power_state(uuid, target)
            .await
    }

    fn poll_config<S: ResourceSpec>(&self, spec: &S) -> PollConfig {
        spec.kind()
            .poll_config(&self.timeouts)
            .with_timeout_override(spec.wait_timeout())
    }

    async fn fetch(&self, kind: ResourceKind, uuid: &str) -> Result<Entity> {
        self.api
            .get(kind, uuid)
            .await
            .map_err(|e| CloudError::from_api(uuid, e))
    }
}

fn ensure_writable(kind: ResourceKind) -> Result<()> {
    if kind.is_read_only() {
        return Err(CloudError::InvalidSpec(format!(
            "{} resources are read-only",
            kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TaskState;
    use crate::resource::{GenericSpec, ImageSpec};
    use crate::testing::{Call, FakePrism};
    use crate::vm::VmSpec;
    use serde_json::json;
    use std::time::Duration;

    fn timeouts() -> Timeouts {
        let fast = PollConfig::new(Duration::from_secs(30))
            .with_delay(Duration::from_secs(1))
            .with_min_timeout(Duration::from_secs(1));
        Timeouts {
            default: fast.clone(),
            vm: fast,
        }
    }

    fn setup() -> (Arc<FakePrism>, Reconciler) {
        let fake = Arc::new(FakePrism::new());
        let reconciler = Reconciler::new(fake.clone(), timeouts());
        (fake, reconciler)
    }

    fn vm(memory: i64) -> VmSpec {
        VmSpec::new("db-server", 2, memory)
    }

    /// Create `spec` through the fake and return its UUID.
    async fn existing(fake: &FakePrism, reconciler: &Reconciler, spec: &VmSpec) -> String {
        let uuid = reconciler.create(spec).await.unwrap();
        assert!(fake.entity(&uuid).is_some());
        uuid
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_returns_uuid() {
        let (fake, reconciler) = setup();
        let uuid = reconciler
            .create(&GenericSpec::new(ResourceKind::Subnet, "lan", json!({"vlan_id": 10})))
            .await
            .unwrap();

        let entity = fake.entity(&uuid).unwrap();
        assert_eq!(entity.name.as_deref(), Some("lan"));
        assert_eq!(fake.count(|c| matches!(c, Call::Delete { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_deletes_the_new_uuid() {
        let (fake, reconciler) = setup();
        fake.script_create(&[TaskState::Running, TaskState::Failed]);

        let result = reconciler.create(&vm(2048)).await;
        assert_eq!(
            ReconciliationOutcome::of(&result),
            ReconciliationOutcome::AppliedWithRollback
        );
        let err = result.unwrap_err();
        assert!(matches!(err.root(), CloudError::TaskFailed { .. }));

        let created = fake.calls().iter().find_map(|c| match c {
            Call::Delete { uuid } => Some(uuid.clone()),
            _ => None,
        });
        assert!(created.is_some());
        assert_eq!(fake.entity_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rollback_reports_both_errors() {
        let (fake, reconciler) = setup();
        fake.script_create(&[TaskState::Failed]);
        fake.reject_delete(ApiError::Fatal("permission denied".into()));

        let result = reconciler.create(&vm(2048)).await;
        assert_eq!(ReconciliationOutcome::of(&result), ReconciliationOutcome::Failed);

        let err = result.unwrap_err();
        assert!(matches!(err, CloudError::RollbackFailed { .. }));
        let msg = err.to_string();
        assert!(msg.contains("FAILED"), "{msg}");
        assert!(msg.contains("permission denied"), "{msg}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_create_is_rechecked_before_rollback() {
        let fake = Arc::new(FakePrism::new());
        // one observation at the deadline, then the recheck
        let once = PollConfig::new(Duration::from_secs(5)).with_delay(Duration::from_secs(5));
        let reconciler = Reconciler::new(
            fake.clone(),
            Timeouts {
                default: once.clone(),
                vm: once,
            },
        );

        fake.script_create(&[TaskState::Running, TaskState::Succeeded]);
        let uuid = reconciler.create(&vm(2048)).await.unwrap();
        assert!(fake.entity(&uuid).is_some());

        fake.script_create(&[TaskState::Running]);
        let err = reconciler.create(&vm(2048)).await.unwrap_err();
        assert!(err.root().is_timeout(), "{err}");
        assert_eq!(fake.entity_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_upload_after_create() {
        let (fake, reconciler) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpine.iso");
        std::fs::write(&path, b"iso-bytes").unwrap();

        let uuid = reconciler
            .create(&ImageSpec::from_path("alpine", &path))
            .await
            .unwrap();
        assert_eq!(fake.uploaded(&uuid).as_deref(), Some(&b"iso-bytes"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upload_rolls_back() {
        let (fake, reconciler) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpine.iso");
        std::fs::write(&path, b"iso-bytes").unwrap();
        fake.reject_upload(ApiError::Transient("connection reset".into()));

        let err = reconciler
            .create(&ImageSpec::from_path("alpine", &path))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::RolledBack { .. }));
        assert_eq!(fake.entity_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ip_is_not_fatal() {
        let (fake, reconciler) = setup();
        let mut spec = vm(2048);
        spec.wait_for_ip = true;

        let uuid = reconciler.create(&spec).await.unwrap();
        assert!(fake.entity(&uuid).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_growth_is_applied_hot() {
        let (fake, reconciler) = setup();
        let uuid = existing(&fake, &reconciler, &vm(2048)).await;
        let before = fake.count(|c| matches!(c, Call::Update { .. }));

        let changes = reconciler.update(&uuid, &vm(2048), &vm(4096)).await.unwrap();
        assert!(changes.can_hot_apply());

        assert_eq!(fake.count(|c| matches!(c, Call::Update { .. })) - before, 1);
        assert_eq!(fake.requested_power_states(), vec![Some(PowerState::On)]);
        let read = reconciler.read(ResourceKind::Vm, &uuid).await.unwrap().unwrap();
        assert_eq!(read.status["resources"]["memory_size_mib"], 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_shrink_power_cycles() {
        for hot_add in [true, false] {
            let (fake, reconciler) = setup();
            let mut old = vm(4096);
            old.use_hot_add = hot_add;
            let mut new = vm(2048);
            new.use_hot_add = hot_add;
            let uuid = existing(&fake, &reconciler, &old).await;

            reconciler.update(&uuid, &old, &new).await.unwrap();

            assert_eq!(
                fake.requested_power_states(),
                vec![
                    Some(PowerState::Off),
                    Some(PowerState::Off),
                    Some(PowerState::On)
                ]
            );
            let entity = fake.entity(&uuid).unwrap();
            assert_eq!(entity.power_state(), Some(PowerState::On));
            assert_eq!(entity.status["resources"]["memory_size_mib"], 2048);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_is_restored_after_failed_update() {
        let (fake, reconciler) = setup();
        let uuid = existing(&fake, &reconciler, &vm(4096)).await;
        // power off, update, power on
        fake.script_update(1, &[TaskState::Failed]);

        let err = reconciler
            .update(&uuid, &vm(4096), &vm(2048))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::TaskFailed { .. }));
        assert_eq!(fake.requested_power_states().last(), Some(&Some(PowerState::On)));
        assert_eq!(fake.entity(&uuid).unwrap().power_state(), Some(PowerState::On));
    }

    #[tokio::test(start_paused = true)]
    async fn test_desired_off_stays_off() {
        let (fake, reconciler) = setup();
        let uuid = existing(&fake, &reconciler, &vm(4096)).await;
        let mut desired = vm(2048);
        desired.power_state = PowerState::Off;

        reconciler.update(&uuid, &vm(4096), &desired).await.unwrap();
        assert_eq!(fake.entity(&uuid).unwrap().power_state(), Some(PowerState::Off));
        assert_eq!(fake.requested_power_states().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_change_set_sends_nothing() {
        let (fake, reconciler) = setup();
        let uuid = existing(&fake, &reconciler, &vm(2048)).await;
        let calls = fake.calls().len();

        let changes = reconciler.update(&uuid, &vm(2048), &vm(2048)).await.unwrap();
        assert!(changes.is_empty());
        assert_eq!(fake.calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_spec_version_is_a_conflict() {
        let (fake, reconciler) = setup();
        let uuid = fake.insert_vm("web", 2048, PowerState::On);
        fake.reject_update(0, ApiError::Conflict("spec_version mismatch".into()));

        let err = reconciler
            .update(&uuid, &vm(2048), &vm(4096))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::ConcurrencyConflict { .. }));
        assert_eq!(fake.count(|c| matches!(c, Call::Update { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_of_vanished_resource_is_not_found() {
        let (fake, reconciler) = setup();
        let uuid = existing(&fake, &reconciler, &vm(2048)).await;
        fake.remove(&uuid);

        let err = reconciler
            .update(&uuid, &vm(2048), &vm(4096))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_twice_succeeds() {
        let (fake, reconciler) = setup();
        let uuid = fake.insert_entity(ResourceKind::Subnet, "lan");

        reconciler.delete(ResourceKind::Subnet, &uuid).await.unwrap();
        reconciler.delete(ResourceKind::Subnet, &uuid).await.unwrap();
        assert_eq!(fake.count(|c| matches!(c, Call::Delete { .. })), 2);
        assert!(reconciler.read(ResourceKind::Subnet, &uuid).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_task_is_surfaced() {
        let (fake, reconciler) = setup();
        let uuid = fake.insert_entity(ResourceKind::Image, "ubuntu");
        fake.script_delete(&[TaskState::Failed]);

        let err = reconciler.delete(ResourceKind::Image, &uuid).await.unwrap_err();
        assert!(matches!(err, CloudError::TaskFailed { .. }));
        assert!(fake.entity(&uuid).is_some());
    }
    #[tokio::test(start_paused = true)]
    async fn test_timed_out_delete_is_surfaced() {
        let (fake, reconciler) = setup();
        let uuid = fake.insert_entity(ResourceKind::Image, "ubuntu");
        fake.script_delete(&[TaskState::Running]);

        let err = reconciler.delete(ResourceKind::Image, &uuid).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert!(fake.entity(&uuid).is_some());
        assert_eq!(fake.count(|c| matches!(c, Call::Delete { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_update_keeps_resource_and_restores_power() {
        let (fake, reconciler) = setup();
        let uuid = existing(&fake, &reconciler, &vm(4096)).await;
        // power off, update, power on
        fake.script_update(1, &[TaskState::Queued]);

        let err = reconciler
            .update(&uuid, &vm(4096), &vm(2048))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert_eq!(fake.count(|c| matches!(c, Call::Delete { .. })), 0);
        assert_eq!(
            fake.requested_power_states(),
            vec![
                Some(PowerState::Off),
                Some(PowerState::Off),
                Some(PowerState::On)
            ]
        );
        let entity = fake.entity(&uuid).unwrap();
        assert_eq!(entity.power_state(), Some(PowerState::On));
        assert_eq!(entity.status["resources"]["memory_size_mib"], 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_is_restored_when_power_off_times_out() {
        let (fake, reconciler) = setup();
        let uuid = existing(&fake, &reconciler, &vm(4096)).await;
        fake.set_power_lag(1000);

        let err = reconciler
            .update(&uuid, &vm(4096), &vm(2048))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert_eq!(
            fake.requested_power_states(),
            vec![Some(PowerState::Off), Some(PowerState::On)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_between_read_and_write_is_a_conflict() {
        let (fake, reconciler) = setup();
        let uuid = fake.insert_vm("db-server", 2048, PowerState::On);
        fake.edit_after_next_get(&uuid);

        let err = reconciler
            .update(&uuid, &vm(2048), &vm(4096))
            .await
            .unwrap_err();
        assert!(
            matches!(err, CloudError::ConcurrencyConflict { ref uuid, .. } if uuid.starts_with("vm-")),
            "{err}"
        );
        assert_eq!(fake.count(|c| matches!(c, Call::Update { .. })), 1);
        let entity = fake.entity(&uuid).unwrap();
        assert_eq!(entity.spec_version, SpecVersion(2));
        assert_eq!(entity.status["resources"]["memory_size_mib"], 2048);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_plan_name_taken_is_refused() {
        let (fake, reconciler) = setup();
        let taken = fake.insert_entity(ResourceKind::RecoveryPlan, "dr-east");

        let err = reconciler
            .create(&GenericSpec::new(ResourceKind::RecoveryPlan, "dr-east", json!({})))
            .await
            .unwrap_err();
        assert!(
            matches!(err, CloudError::AlreadyExists { ref uuid, .. } if *uuid == taken),
            "{err}"
        );
        assert!(err.to_string().contains(&taken));
        assert_eq!(ReconciliationOutcome::of(&Err::<(), _>(err)), ReconciliationOutcome::Failed);
        assert_eq!(fake.count(|c| matches!(c, Call::Create { .. })), 0);
        assert_eq!(fake.entity_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_plan_with_longer_namesake_is_created() {
        let (fake, reconciler) = setup();
        fake.insert_entity(ResourceKind::RecoveryPlan, "dr-east-2");

        reconciler
            .create(&GenericSpec::new(ResourceKind::RecoveryPlan, "dr-east", json!({})))
            .await
            .unwrap();
        assert_eq!(fake.count(|c| matches!(c, Call::Create { .. })), 1);
        assert_eq!(fake.entity_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_subnet_names_are_allowed() {
        let (fake, reconciler) = setup();
        fake.insert_entity(ResourceKind::Subnet, "lan");

        reconciler
            .create(&GenericSpec::new(ResourceKind::Subnet, "lan", json!({})))
            .await
            .unwrap();
        assert_eq!(fake.count(|c| matches!(c, Call::List { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clusters_are_read_only() {
        let (fake, reconciler) = setup();
        let uuid = fake.insert_entity(ResourceKind::Cluster, "prod");

        let err = reconciler.delete(ResourceKind::Cluster, &uuid).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidSpec(_)));
        let err = reconciler
            .create(&GenericSpec::new(ResourceKind::Cluster, "prod-2", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidSpec(_)));
        assert!(fake.calls().is_empty());

        let read = reconciler.read(ResourceKind::Cluster, &uuid).await.unwrap();
        assert!(read.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resource_wait_timeout_replaces_kind_timeout() {
        let (fake, reconciler) = setup();
        fake.script_create(&[TaskState::Running]);
        let start = tokio::time::Instant::now();

        let err = reconciler
            .create(&GenericSpec::new(ResourceKind::Subnet, "lan", json!({})).with_wait_timeout(2))
            .await
            .unwrap_err();
        assert!(err.root().is_timeout(), "{err}");
        assert!(matches!(err, CloudError::RolledBack { .. }));
        // the kind's own bound is 30s
        assert!(start.elapsed() >= Duration::from_secs(120));
    }
}
