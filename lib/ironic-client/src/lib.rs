// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A thin blocking client for the bare metal (Ironic) v1 API and the one
//! networking-service lookup the underlay suite needs.
//!
//! Callers program against [`BareMetalApi`] and [`NetworkApi`]; [`Client`]
//! and [`NetworkClient`] implement them over HTTP. With the `mock` feature
//! the traits also get `mockall` mocks.

use std::net::IpAddr;

use ironic_api_types::{
    Chassis, ChassisCreate, CleanStep, Node, NodeCreate, NodeValidation,
    PatchOperation, Port, PortCreate, PowerAction, ProvisionAction,
};
use uuid::Uuid;

pub mod auth;
mod client;
mod error;

pub use client::{Client, ClientBuilder, NetworkClient, DEFAULT_API_VERSION};
pub use error::Error;
pub use ironic_api_types as types;

/// Operations on nodes, ports and chassis.
///
/// Every method blocks the calling thread until the service answers.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait BareMetalApi: Send + Sync {
    fn node_create(&self, body: &NodeCreate) -> Result<Node, Error>;
    fn node_get(&self, node: Uuid) -> Result<Node, Error>;
    /// Looks a node up by the instance deployed on it.
    fn node_get_by_instance_uuid(
        &self,
        instance_uuid: &str,
    ) -> Result<Node, Error>;
    /// Lists all nodes with their full details.
    fn node_list(&self) -> Result<Vec<Node>, Error>;
    fn node_update(
        &self,
        node: Uuid,
        patch: &[PatchOperation],
    ) -> Result<Node, Error>;
    fn node_delete(&self, node: Uuid) -> Result<(), Error>;
    fn node_set_power_state(
        &self,
        node: Uuid,
        action: PowerAction,
    ) -> Result<(), Error>;
    fn node_set_provision_state(
        &self,
        node: Uuid,
        action: ProvisionAction,
        clean_steps: Option<Vec<CleanStep>>,
    ) -> Result<(), Error>;
    fn node_set_maintenance(
        &self,
        node: Uuid,
        on: bool,
        reason: Option<String>,
    ) -> Result<(), Error>;
    fn node_validate(&self, node: Uuid) -> Result<NodeValidation, Error>;

    fn port_create(&self, body: &PortCreate) -> Result<Port, Error>;
    fn port_get(&self, port: Uuid) -> Result<Port, Error>;
    /// Looks a port up by its MAC address.
    fn port_get_by_address(&self, address: &str) -> Result<Port, Error>;
    fn port_list(&self) -> Result<Vec<Port>, Error>;
    fn port_delete(&self, port: Uuid) -> Result<(), Error>;

    fn chassis_create(&self, body: &ChassisCreate) -> Result<Chassis, Error>;
    fn chassis_get(&self, chassis: Uuid) -> Result<Chassis, Error>;
    fn chassis_list(&self) -> Result<Vec<Chassis>, Error>;
    fn chassis_delete(&self, chassis: Uuid) -> Result<(), Error>;
}

/// The networking-service lookup used to find the addresses a node's
/// ramdisk obtained while cleaning.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait NetworkApi: Send + Sync {
    /// Fixed IPs of every networking port whose MAC is `mac`.
    fn port_fixed_ips(&self, mac: &str) -> Result<Vec<IpAddr>, Error>;
}
