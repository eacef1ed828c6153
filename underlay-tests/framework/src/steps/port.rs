// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use ironic_client::types::{JsonObject, Node, Port, PortCreate};
use ironic_client::BareMetalApi;
use rand::Rng;
use tracing::info;

use super::{found, wait_for_each};
use crate::config::NodeConfig;
use crate::wait::Poller;

/// Optional attributes applied to every port a call creates.
#[derive(Clone, Debug, Default)]
pub struct PortAttributes {
    pub pxe_enabled: Option<bool>,
    pub extra: JsonObject,
    pub local_link_connection: JsonObject,
}

/// Random locally administered unicast MAC addresses.
pub fn generate_mac_addresses(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut octets: [u8; 6] = rng.gen();
            octets[0] = (octets[0] & 0xfc) | 0x02;
            octets
                .iter()
                .map(|o| format!("{o:02x}"))
                .collect::<Vec<_>>()
                .join(":")
        })
        .collect()
}

pub struct PortSteps<'a> {
    api: &'a dyn BareMetalApi,
    poller: &'a Poller,
}

impl<'a> PortSteps<'a> {
    pub fn new(api: &'a dyn BareMetalApi, poller: &'a Poller) -> Self {
        Self { api, poller }
    }

    /// Creates one port on `node` per address.
    pub fn create_ports(
        &self,
        node: &Node,
        addresses: &[String],
        attributes: &PortAttributes,
    ) -> Result<Vec<Port>> {
        addresses
            .iter()
            .map(|address| {
                let body = PortCreate {
                    address: address.clone(),
                    node_uuid: node.uuid,
                    pxe_enabled: attributes.pxe_enabled,
                    extra: attributes.extra.clone(),
                    local_link_connection: attributes
                        .local_link_connection
                        .clone(),
                };
                let port = self.api.port_create(&body).with_context(|| {
                    format!("creating port {address} on node {}", node.uuid)
                })?;
                info!(uuid = %port.uuid, %address, node = %node.uuid, "Created port");
                Ok(port)
            })
            .collect()
    }

    /// Checks that `ports[i]` has MAC `addresses[i]`. The service normalizes
    /// MACs to lower case.
    pub fn check_port_addresses(
        &self,
        ports: &[Port],
        addresses: &[String],
    ) -> Result<()> {
        ensure!(
            ports.len() == addresses.len(),
            "{} port(s) for {} address(es)",
            ports.len(),
            addresses.len()
        );
        for (port, address) in ports.iter().zip(addresses) {
            ensure!(
                port.address.eq_ignore_ascii_case(address),
                "port {} has address {}, expected {}",
                port.uuid,
                port.address,
                address
            );
        }
        Ok(())
    }

    /// Re-reads each port.
    pub fn get_ports(&self, ports: &[Port]) -> Result<Vec<Port>> {
        ports
            .iter()
            .map(|p| {
                self.api
                    .port_get(p.uuid)
                    .with_context(|| format!("getting port {}", p.uuid))
            })
            .collect()
    }

    pub fn get_port_by_address(&self, address: &str) -> Result<Port> {
        self.api
            .port_get_by_address(address)
            .with_context(|| format!("getting port {address}"))
    }

    pub fn get_ports_by_address(&self, addresses: &[String]) -> Result<Vec<Port>> {
        addresses.iter().map(|a| self.get_port_by_address(a)).collect()
    }

    pub fn list_ports(&self) -> Result<Vec<Port>> {
        self.api.port_list().context("listing ports")
    }

    pub fn delete_ports(&self, ports: &[Port]) -> Result<()> {
        for port in ports {
            self.api
                .port_delete(port.uuid)
                .with_context(|| format!("deleting port {}", port.uuid))?;
            info!(uuid = %port.uuid, "Deleted port");
        }
        Ok(())
    }

    pub fn check_ports_presence(
        &self,
        ports: &[Port],
        must_present: bool,
        per_port_timeout: Duration,
    ) -> Result<()> {
        let ids: Vec<_> = ports.iter().map(|p| p.uuid).collect();
        wait_for_each(
            self.poller,
            "port presence",
            &ids,
            must_present,
            per_port_timeout,
            |id| Ok(found(self.api.port_get(id))?.is_some()),
        )
    }

    /// The first-NIC MAC of each configured node.
    pub fn ports_mac_addresses(&self, nodes_config: &[NodeConfig]) -> Vec<String> {
        nodes_config.iter().map(|n| n.mac.clone()).collect()
    }
}
