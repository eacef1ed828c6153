// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions for the resources exposed by the bare metal (Ironic) v1 API
//! that the underlay suite reads and writes.
//!
//! Only the fields the suite inspects are modelled. Unknown fields in
//! responses are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

mod state;

pub use state::{PowerAction, PowerState, ProvisionAction, ProvisionState};

/// A free-form JSON object, used for `driver_info`, `extra` and friends.
pub type JsonObject = Map<String, Value>;

/// A bare metal machine record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Node {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub driver: String,
    #[serde(default)]
    pub driver_info: JsonObject,
    pub provision_state: ProvisionState,
    #[serde(default)]
    pub target_provision_state: Option<ProvisionState>,
    #[serde(default)]
    pub power_state: Option<PowerState>,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub maintenance_reason: Option<String>,
    #[serde(default)]
    pub chassis_uuid: Option<Uuid>,
    #[serde(default)]
    pub instance_uuid: Option<String>,
    #[serde(default)]
    pub instance_info: JsonObject,
    #[serde(default)]
    pub properties: JsonObject,
    #[serde(default)]
    pub extra: JsonObject,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Node {
    /// The IPv4 address the deployed instance reported, if any.
    pub fn instance_ipv4_address(&self) -> Option<&str> {
        self.instance_info
            .get("ipv4_address")
            .and_then(Value::as_str)
            .filter(|addr| !addr.is_empty())
    }

    /// Whether the node is currently powered on, in the sense that deleting
    /// it requires powering it off first.
    pub fn is_powered(&self) -> bool {
        !matches!(self.power_state, None | Some(PowerState::Off))
    }
}

/// A network interface (MAC address) attached to a node.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Port {
    pub uuid: Uuid,
    pub address: String,
    pub node_uuid: Uuid,
    #[serde(default)]
    pub pxe_enabled: Option<bool>,
    #[serde(default)]
    pub extra: JsonObject,
    #[serde(default)]
    pub local_link_connection: JsonObject,
}

/// A grouping record nodes can be attached to.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Chassis {
    pub uuid: Uuid,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub extra: JsonObject,
}

/// Body of a node creation request.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NodeCreate {
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chassis_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub driver_info: JsonObject,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: JsonObject,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: JsonObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_class: Option<String>,
}

impl NodeCreate {
    pub fn new(driver: impl Into<String>) -> Self {
        Self { driver: driver.into(), ..Default::default() }
    }
}

/// Body of a port creation request.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PortCreate {
    pub address: String,
    pub node_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pxe_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: JsonObject,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub local_link_connection: JsonObject,
}

/// Body of a chassis creation request.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ChassisCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: JsonObject,
}

/// One JSON-patch operation, as accepted by the resource update endpoints.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path } => path,
        }
    }

    /// The top-level resource field this operation touches, e.g.
    /// `instance_info` for `/instance_info/image_source`.
    pub fn top_level_field(&self) -> &str {
        self.path().trim_start_matches('/').split('/').next().unwrap_or("")
    }
}

/// A single manual cleaning step.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CleanStep {
    pub interface: String,
    pub step: String,
    #[serde(default)]
    pub args: JsonObject,
}

/// Body of `PUT /v1/nodes/{node}/states/provision`.
#[derive(Clone, Debug, Serialize)]
pub struct ProvisionStateRequest {
    pub target: ProvisionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_steps: Option<Vec<CleanStep>>,
}

/// Body of `PUT /v1/nodes/{node}/states/power`.
#[derive(Clone, Debug, Serialize)]
pub struct PowerStateRequest {
    pub target: PowerAction,
}

/// Body of `PUT /v1/nodes/{node}/maintenance`.
#[derive(Clone, Debug, Serialize)]
pub struct MaintenanceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of validating one driver interface of a node.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InterfaceValidation {
    /// `None` if the driver does not implement the interface.
    #[serde(default)]
    pub result: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response of `GET /v1/nodes/{node}/validate`, keyed by interface name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct NodeValidation(pub BTreeMap<String, InterfaceValidation>);

impl NodeValidation {
    /// Returns the interfaces among `required` that did not validate,
    /// paired with the reason the service gave.
    pub fn failures<'a>(
        &self,
        required: &[&'a str],
    ) -> Vec<(&'a str, Option<String>)> {
        required
            .iter()
            .filter_map(|iface| match self.0.get(*iface) {
                Some(InterfaceValidation { result: Some(true), .. }) => None,
                Some(v) => Some((*iface, v.reason.clone())),
                None => Some((*iface, Some("not reported".to_string()))),
            })
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<Node>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PortList {
    pub ports: Vec<Port>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChassisList {
    pub chassis: Vec<Chassis>,
}
