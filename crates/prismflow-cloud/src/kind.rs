//! Resource kinds managed through Prism Central

use crate::poll::{PollConfig, Timeouts};
use serde::{Deserialize, Serialize};

/// Kind of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vm,
    Subnet,
    Image,
    NetworkSecurityRule,
    ProtectionRule,
    RecoveryPlan,

    /// Looked up only; clusters are never created or changed here
    Cluster,
}

impl ResourceKind {
    /// Collection segment under `/api/nutanix/v3`
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "vms",
            ResourceKind::Subnet => "subnets",
            ResourceKind::Image => "images",
            ResourceKind::NetworkSecurityRule => "network_security_rules",
            ResourceKind::ProtectionRule => "protection_rules",
            ResourceKind::RecoveryPlan => "recovery_plans",
            ResourceKind::Cluster => "clusters",
        }
    }

    /// Value of `metadata.kind` in intent payloads and list requests
    pub fn entity_kind(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "vm",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Image => "image",
            ResourceKind::NetworkSecurityRule => "network_security_rule",
            ResourceKind::ProtectionRule => "protection_rule",
            ResourceKind::RecoveryPlan => "recovery_plan",
            ResourceKind::Cluster => "cluster",
        }
    }

    /// Only VMs carry a power state; every other kind is updated in place.
    pub fn has_power_state(&self) -> bool {
        matches!(self, ResourceKind::Vm)
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, ResourceKind::Cluster)
    }

    /// Names must be unique; a create is refused while another resource
    /// of the kind carries the same name.
    pub fn requires_unique_name(&self) -> bool {
        matches!(self, ResourceKind::RecoveryPlan)
    }

    pub fn poll_config(&self, timeouts: &Timeouts) -> PollConfig {
        match self {
            ResourceKind::Vm => timeouts.vm.clone(),
            _ => timeouts.default.clone(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.entity_kind())
    }
}
