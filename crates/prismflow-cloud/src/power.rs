//! VM power transitions
//!
//! A power change is two nested waits: first the update task, which only
//! says the API accepted the new spec, then the VM's own status until it
//! reports the requested power state.

use crate::api::{Entity, IntentInput, PrismApi};
use crate::error::{ApiError, CloudError, Result};
use crate::kind::ResourceKind;
use crate::poll::{PollConfig, Refresh, TaskPoller, wait_for};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Requested or reported VM power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ON" => Some(PowerState::On),
            "OFF" => Some(PowerState::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "ON",
            PowerState::Off => "OFF",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives a VM through power transitions
pub struct PowerController<'a> {
    api: &'a dyn PrismApi,
    config: &'a PollConfig,
}

impl<'a> PowerController<'a> {
    pub fn new(api: &'a dyn PrismApi, config: &'a PollConfig) -> Self {
        Self { api, config }
    }

    /// Bring the VM to `target` and wait until it reports that state.
    ///
    /// Requesting the current state is not an error; the update is still
    /// submitted and the second wait returns at once.
    pub async fn set_power_state(&self, uuid: &str, target: PowerState) -> Result<()> {
        let entity = self
            .api
            .get(ResourceKind::Vm, uuid)
            .await
            .map_err(|e| CloudError::from_api(uuid, e))?;

        let mut intent = IntentInput::from_entity(&entity);
        intent.set_power_state(target);

        info!(uuid, power_state = %target, "changing VM power state");
        let task_id = self
            .api
            .update(ResourceKind::Vm, uuid, &intent, entity.spec_version)
            .await
            .map_err(|e| CloudError::from_api(uuid, e))?;

        TaskPoller::new(self.api)
            .wait_for_completion(&task_id, self.config)
            .await?;

        let what = format!("VM {} to report power state {}", uuid, target);
        let api = self.api;
        wait_for(self.config, &what, || async move {
            let vm = fetch_vm(api, uuid).await?;
            if vm.state() == Some("COMPLETE") && vm.power_state() == Some(target) {
                Ok(Refresh::Done(()))
            } else {
                Ok(Refresh::Pending)
            }
        })
        .await
    }

    /// Wait until any NIC of the VM reports an IP address.
    pub async fn wait_for_ip(&self, uuid: &str) -> Result<String> {
        let what = format!("an IP address on VM {}", uuid);
        let api = self.api;
        wait_for(self.config, &what, || async move {
            let vm = fetch_vm(api, uuid).await?;
            Ok(match vm.ip_address() {
                Some(ip) => Refresh::Done(ip),
                None => Refresh::Pending,
            })
        })
        .await
    }
}

/// A VM that vanishes while we wait on it was deleted out-of-band.
async fn fetch_vm(api: &dyn PrismApi, uuid: &str) -> Result<Entity> {
    match api.get(ResourceKind::Vm, uuid).await {
        Ok(vm) => Ok(vm),
        Err(ApiError::NotFound(_)) => Err(CloudError::NotFound(uuid.to_string())),
        Err(err) => Err(CloudError::Api(err)),
    }
}
