//! Virtual machine spec and its disruption table

use crate::api::IntentInput;
use crate::classify::{ChangeSet, Disruption, diff_fields};
use crate::error::Result;
use crate::kind::ResourceKind;
use crate::power::PowerState;
use crate::resource::{ResourceSpec, flatten};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Disruption class of every VM field.
///
/// A field missing from this table is treated as disruptive.
pub const VM_FIELDS: &[(&str, Disruption)] = &[
    ("name", Disruption::Disruptive),
    ("description", Disruption::HotPluggable),
    ("availability_zone_reference", Disruption::Disruptive),
    ("cluster_uuid", Disruption::Disruptive),
    ("parent_reference", Disruption::Disruptive),
    ("categories", Disruption::HotPluggable),
    ("owner_reference", Disruption::HotPluggable),
    ("project_reference", Disruption::HotPluggable),
    ("use_hot_add", Disruption::HotPluggable),
    ("power_state", Disruption::HotPluggable),
    ("num_sockets", Disruption::Quantity),
    ("memory_size_mib", Disruption::Quantity),
    ("num_vcpus_per_socket", Disruption::Disruptive),
    ("num_vnuma_nodes", Disruption::Disruptive),
    ("enable_cpu_passthrough", Disruption::Disruptive),
    ("guest_os_id", Disruption::Disruptive),
    ("hardware_clock_timezone", Disruption::Disruptive),
    ("vga_console_enabled", Disruption::Disruptive),
    ("machine_type", Disruption::Disruptive),
    ("power_state_mechanism", Disruption::Disruptive),
    ("power_state_guest_transition_config", Disruption::Disruptive),
    ("guest_customization_is_overridable", Disruption::Disruptive),
    ("guest_customization_cloud_init_user_data", Disruption::Disruptive),
    ("guest_customization_cloud_init_meta_data", Disruption::Disruptive),
    ("guest_customization_cloud_init_custom_key_values", Disruption::Disruptive),
    ("guest_customization_sysprep", Disruption::Disruptive),
    ("guest_customization_sysprep_custom_key_values", Disruption::Disruptive),
    ("nic_list", Disruption::HotPluggable),
    ("disk_list", Disruption::CdromCount),
    ("serial_port_list", Disruption::Disruptive),
    ("gpu_list", Disruption::Disruptive),
    ("nutanix_guest_tools", Disruption::HotPluggable),
    ("ngt_credentials", Disruption::HotPluggable),
    ("ngt_enabled_capability_list", Disruption::HotPluggable),
    ("boot_device_order_list", Disruption::Disruptive),
    ("boot_type", Disruption::Disruptive),
    ("boot_device", Disruption::Disruptive),
];

fn disruption_of(field: &str) -> Disruption {
    VM_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, class)| *class)
        .unwrap_or(Disruption::Disruptive)
}

/// Reference to another Prism entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: String,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Reference {
    pub fn new(kind: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            uuid: uuid.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_index: Option<i64>,
}

/// Device the VM boots from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_address: Option<DiskAddress>,
}

impl BootDevice {
    /// A boot device with neither a MAC nor any disk-address field means
    /// "no boot device".
    pub fn effective(&self) -> Option<BootDevice> {
        let mac = self.mac_address.as_deref().filter(|m| !m.is_empty());
        let disk = self
            .disk_address
            .as_ref()
            .filter(|d| d.adapter_type.is_some() || d.device_index.is_some());
        if mac.is_none() && disk.is_none() {
            return None;
        }
        Some(BootDevice {
            mac_address: mac.map(str::to_string),
            disk_address: disk.cloned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestTransitionConfig {
    #[serde(default)]
    pub enable_script_exec: Option<bool>,
    #[serde(default)]
    pub should_fail_on_script_failure: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sysprep {
    #[serde(default)]
    pub install_type: Option<String>,
    #[serde(default)]
    pub unattend_xml: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_power_state() -> PowerState {
    PowerState::On
}

/// Desired state of a virtual machine
///
/// NIC, disk, serial port, GPU and guest-tools entries are carried as
/// already-expanded v3 JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub availability_zone_reference: Option<Reference>,
    #[serde(default)]
    pub cluster_uuid: Option<String>,
    #[serde(default)]
    pub parent_reference: Option<Reference>,
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_reference: Option<Reference>,
    #[serde(default)]
    pub project_reference: Option<Reference>,
    #[serde(default = "default_true")]
    pub use_hot_add: bool,
    #[serde(default = "default_power_state")]
    pub power_state: PowerState,

    pub num_sockets: i64,
    pub memory_size_mib: i64,
    #[serde(default)]
    pub num_vcpus_per_socket: Option<i64>,
    #[serde(default)]
    pub num_vnuma_nodes: Option<i64>,
    #[serde(default)]
    pub enable_cpu_passthrough: Option<bool>,
    #[serde(default)]
    pub guest_os_id: Option<String>,
    #[serde(default)]
    pub hardware_clock_timezone: Option<String>,
    #[serde(default)]
    pub vga_console_enabled: Option<bool>,
    #[serde(default)]
    pub machine_type: Option<String>,

    #[serde(default)]
    pub power_state_mechanism: Option<String>,
    #[serde(default)]
    pub power_state_guest_transition_config: Option<GuestTransitionConfig>,

    #[serde(default)]
    pub guest_customization_is_overridable: Option<bool>,
    #[serde(default)]
    pub guest_customization_cloud_init_user_data: Option<String>,
    #[serde(default)]
    pub guest_customization_cloud_init_meta_data: Option<String>,
    #[serde(default)]
    pub guest_customization_cloud_init_custom_key_values: BTreeMap<String, String>,
    #[serde(default)]
    pub guest_customization_sysprep: Option<Sysprep>,
    #[serde(default)]
    pub guest_customization_sysprep_custom_key_values: BTreeMap<String, String>,

    #[serde(default)]
    pub nic_list: Vec<Value>,
    #[serde(default)]
    pub disk_list: Vec<Value>,
    #[serde(default)]
    pub serial_port_list: Vec<Value>,
    #[serde(default)]
    pub gpu_list: Vec<Value>,

    #[serde(default)]
    pub nutanix_guest_tools: Option<Value>,
    #[serde(default)]
    pub ngt_credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub ngt_enabled_capability_list: Vec<String>,

    #[serde(default)]
    pub boot_device_order_list: Vec<String>,
    #[serde(default)]
    pub boot_type: Option<String>,
    #[serde(default)]
    pub boot_device: Option<BootDevice>,

    /// Not part of the resource; asks create to wait for a NIC address.
    #[serde(default, skip_serializing)]
    pub wait_for_ip: bool,
}

impl VmSpec {
    pub fn new(name: impl Into<String>, num_sockets: i64, memory_size_mib: i64) -> Self {
        Self {
            name: name.into(),
            description: None,
            availability_zone_reference: None,
            cluster_uuid: None,
            parent_reference: None,
            categories: BTreeMap::new(),
            owner_reference: None,
            project_reference: None,
            use_hot_add: true,
            power_state: PowerState::On,
            num_sockets,
            memory_size_mib,
            num_vcpus_per_socket: None,
            num_vnuma_nodes: None,
            enable_cpu_passthrough: None,
            guest_os_id: None,
            hardware_clock_timezone: None,
            vga_console_enabled: None,
            machine_type: None,
            power_state_mechanism: None,
            power_state_guest_transition_config: None,
            guest_customization_is_overridable: None,
            guest_customization_cloud_init_user_data: None,
            guest_customization_cloud_init_meta_data: None,
            guest_customization_cloud_init_custom_key_values: BTreeMap::new(),
            guest_customization_sysprep: None,
            guest_customization_sysprep_custom_key_values: BTreeMap::new(),
            nic_list: Vec::new(),
            disk_list: Vec::new(),
            serial_port_list: Vec::new(),
            gpu_list: Vec::new(),
            nutanix_guest_tools: None,
            ngt_credentials: BTreeMap::new(),
            ngt_enabled_capability_list: Vec::new(),
            boot_device_order_list: Vec::new(),
            boot_type: None,
            boot_device: None,
            wait_for_ip: false,
        }
    }

    /// Copy with the boot device collapsed to its effective value
    fn normalized(&self) -> VmSpec {
        let mut spec = self.clone();
        spec.boot_device = self.boot_device.as_ref().and_then(BootDevice::effective);
        spec
    }

    fn resources(&self) -> Map<String, Value> {
        let mut res = Map::new();
        res.insert("power_state".into(), json!(self.power_state));
        res.insert("num_sockets".into(), json!(self.num_sockets));
        res.insert("memory_size_mib".into(), json!(self.memory_size_mib));
        put(&mut res, "num_vcpus_per_socket", &self.num_vcpus_per_socket);
        put(&mut res, "enable_cpu_passthrough", &self.enable_cpu_passthrough);
        put(&mut res, "guest_os_id", &self.guest_os_id);
        put(&mut res, "hardware_clock_timezone", &self.hardware_clock_timezone);
        put(&mut res, "vga_console_enabled", &self.vga_console_enabled);
        put(&mut res, "machine_type", &self.machine_type);
        put(&mut res, "parent_reference", &self.parent_reference);
        if let Some(nodes) = self.num_vnuma_nodes {
            res.insert("vnuma_config".into(), json!({ "num_vnuma_nodes": nodes }));
        }
        res.insert("nic_list".into(), json!(self.nic_list));
        res.insert("disk_list".into(), json!(self.disk_list));
        if !self.serial_port_list.is_empty() {
            res.insert("serial_port_list".into(), json!(self.serial_port_list));
        }
        if !self.gpu_list.is_empty() {
            res.insert("gpu_list".into(), json!(self.gpu_list));
        }

        if let Some(ngt) = &self.nutanix_guest_tools {
            let mut tools = ngt.clone();
            if let Some(obj) = tools.as_object_mut() {
                if !self.ngt_credentials.is_empty() {
                    obj.insert("credentials".into(), json!(self.ngt_credentials));
                }
                if !self.ngt_enabled_capability_list.is_empty() {
                    obj.insert(
                        "enabled_capability_list".into(),
                        json!(self.ngt_enabled_capability_list),
                    );
                }
            }
            res.insert("guest_tools".into(), json!({ "nutanix_guest_tools": tools }));
        }

        let mut boot = Map::new();
        if !self.boot_device_order_list.is_empty() {
            boot.insert(
                "boot_device_order_list".into(),
                json!(self.boot_device_order_list),
            );
        }
        put(&mut boot, "boot_type", &self.boot_type);
        if let Some(device) = self.boot_device.as_ref().and_then(BootDevice::effective) {
            boot.insert("boot_device".into(), json!(device));
        }
        if !boot.is_empty() {
            res.insert("boot_config".into(), Value::Object(boot));
        }

        let mut mechanism = Map::new();
        put(&mut mechanism, "mechanism", &self.power_state_mechanism);
        put(
            &mut mechanism,
            "guest_transition_config",
            &self.power_state_guest_transition_config,
        );
        if !mechanism.is_empty() {
            res.insert("power_state_mechanism".into(), Value::Object(mechanism));
        }

        let mut guest = Map::new();
        put(
            &mut guest,
            "is_overridable",
            &self.guest_customization_is_overridable,
        );
        let mut cloud_init = Map::new();
        put(
            &mut cloud_init,
            "user_data",
            &self.guest_customization_cloud_init_user_data,
        );
        put(
            &mut cloud_init,
            "meta_data",
            &self.guest_customization_cloud_init_meta_data,
        );
        if !self.guest_customization_cloud_init_custom_key_values.is_empty() {
            cloud_init.insert(
                "custom_key_values".into(),
                json!(self.guest_customization_cloud_init_custom_key_values),
            );
        }
        if !cloud_init.is_empty() {
            guest.insert("cloud_init".into(), Value::Object(cloud_init));
        }
        if self.guest_customization_sysprep.is_some()
            || !self.guest_customization_sysprep_custom_key_values.is_empty()
        {
            let mut sysprep = match &self.guest_customization_sysprep {
                Some(s) => json!(s),
                None => json!({}),
            };
            if !self.guest_customization_sysprep_custom_key_values.is_empty() {
                sysprep["custom_key_values"] =
                    json!(self.guest_customization_sysprep_custom_key_values);
            }
            guest.insert("sysprep".into(), sysprep);
        }
        if !guest.is_empty() {
            res.insert("guest_customization".into(), Value::Object(guest));
        }

        res
    }
}

fn put<T: Serialize>(map: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        map.insert(key.to_string(), json!(v));
    }
}

impl ResourceSpec for VmSpec {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Vm
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn to_intent(&self) -> Result<IntentInput> {
        let mut spec = Map::new();
        spec.insert("name".into(), json!(self.name));
        put(&mut spec, "description", &self.description);
        put(
            &mut spec,
            "availability_zone_reference",
            &self.availability_zone_reference,
        );
        if let Some(cluster) = &self.cluster_uuid {
            spec.insert(
                "cluster_reference".into(),
                json!(Reference::new("cluster", cluster)),
            );
        }
        spec.insert("resources".into(), Value::Object(self.resources()));

        let mut metadata = Map::new();
        metadata.insert("kind".into(), json!("vm"));
        metadata.insert("categories".into(), json!(self.categories));
        put(&mut metadata, "owner_reference", &self.owner_reference);
        put(&mut metadata, "project_reference", &self.project_reference);

        Ok(IntentInput::new(Value::Object(spec), Value::Object(metadata)))
    }

    fn diff(&self, desired: &Self) -> Result<ChangeSet> {
        let hot_add = desired.use_hot_add;
        Ok(diff_fields(
            &flatten(&self.normalized())?,
            &flatten(&desired.normalized())?,
            |field, old, new| disruption_of(field).is_disruptive(old, new, hot_add),
        ))
    }

    fn power_state(&self) -> Option<PowerState> {
        Some(self.power_state)
    }

    fn wait_for_ip(&self) -> bool {
        self.wait_for_ip
    }
}
