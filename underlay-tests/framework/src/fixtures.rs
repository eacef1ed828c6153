// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node preparation and resource cleanup shared by tests and the runner.

use std::collections::BTreeSet;

use anyhow::Result;
use ironic_client::types::{
    Node, NodeCreate, PatchOperation, ProvisionAction, ProvisionState,
};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::steps::{generate_node_names, PortAttributes};
use crate::Framework;

/// Driver for nodes that never touch hardware.
const FAKE_DRIVER: &str = "fake";

/// The nodes and chassis that existed at some point in time.
#[derive(Clone, Debug, Default)]
pub struct ResourceSnapshot {
    pub nodes: BTreeSet<Uuid>,
    pub chassis: BTreeSet<Uuid>,
}

impl Framework {
    /// Enrolls every inventory node with the configured driver and gives it
    /// a port for its first NIC.
    #[instrument(skip_all)]
    pub fn create_nodes(&self) -> Result<Vec<Node>> {
        let node_steps = self.node_steps();
        let port_steps = self.port_steps();
        let mut nodes = Vec::new();

        for nc in self.node_configs()? {
            let template = NodeCreate {
                driver_info: nc.driver_info.clone(),
                ..NodeCreate::new(self.config.node_driver.clone())
            };
            let names = generate_node_names(1);
            let created = node_steps.create_nodes(&template, &names)?;
            node_steps.check_nodes_presence(
                &created,
                true,
                self.config.timeouts.available_node_state,
            )?;

            for node in &created {
                let ports = port_steps.create_ports(
                    node,
                    std::slice::from_ref(&nc.mac),
                    &PortAttributes::default(),
                )?;
                port_steps
                    .check_port_addresses(&ports, std::slice::from_ref(&nc.mac))?;
            }
            info!(inventory_name = %nc.name, "Enrolled inventory node");
            nodes.extend(created);
        }

        Ok(nodes)
    }

    /// Enrolls the inventory nodes, points them at the boot image and moves
    /// them to `available`.
    #[instrument(skip_all)]
    pub fn prepare_nodes(&self) -> Result<Vec<Node>> {
        let nodes = self.create_nodes()?;
        let steps = self.node_steps();
        let timeout = self.config.timeouts.available_node_state;

        let patch = [PatchOperation::Add {
            path: "/instance_info/image_source".to_string(),
            value: Value::String(self.config.images.boot_image_url.clone()),
        }];
        steps.update_nodes(&nodes, &patch)?;
        steps.check_nodes_updated(&nodes, &patch)?;

        steps.set_nodes_provision_state(&nodes, ProvisionAction::Manage)?;
        steps.check_nodes_provision_state(
            &nodes,
            ProvisionState::Manageable,
            timeout,
        )?;
        steps.set_nodes_provision_state(&nodes, ProvisionAction::Provide)?;
        steps.check_nodes_provision_state(
            &nodes,
            ProvisionState::Available,
            timeout,
        )?;

        nodes.iter().map(|n| steps.get_node(n.uuid)).collect()
    }

    /// A single node on the fake driver.
    pub fn create_fake_node(&self) -> Result<Node> {
        let steps = self.node_steps();
        let names = generate_node_names(1);
        let mut nodes =
            steps.create_nodes(&NodeCreate::new(FAKE_DRIVER), &names)?;
        steps.check_node_names(&nodes, &names)?;
        steps.check_nodes_presence(
            &nodes,
            true,
            self.config.timeouts.available_node_state,
        )?;
        nodes.pop().ok_or_else(|| anyhow::anyhow!("no node was created"))
    }

    pub fn snapshot(&self) -> Result<ResourceSnapshot> {
        let nodes = self.node_steps().list_nodes()?;
        let chassis = self.chassis_steps().list_chassis()?;
        Ok(ResourceSnapshot {
            nodes: nodes.iter().map(|n| n.uuid).collect(),
            chassis: chassis.iter().map(|c| c.uuid).collect(),
        })
    }

    /// Deletes every node not in `keep`, but only if there are more than
    /// `limit` of them. Returns how many nodes were deleted.
    #[instrument(skip(self, keep))]
    pub fn cleanup_nodes(
        &self,
        keep: &BTreeSet<Uuid>,
        limit: usize,
    ) -> Result<usize> {
        let steps = self.node_steps();
        let doomed: Vec<Node> = steps
            .list_nodes()?
            .into_iter()
            .filter(|n| !keep.contains(&n.uuid))
            .collect();

        if doomed.len() <= limit {
            return Ok(0);
        }

        info!(count = doomed.len(), "Deleting nodes");
        steps.delete_nodes(&doomed)?;
        steps.check_nodes_presence(
            &doomed,
            false,
            self.config.timeouts.available_node_state,
        )?;
        Ok(doomed.len())
    }

    /// Deletes every chassis not in `keep`. Nodes must be detached first.
    #[instrument(skip_all)]
    pub fn cleanup_chassis(&self, keep: &BTreeSet<Uuid>) -> Result<usize> {
        let steps = self.chassis_steps();
        let doomed: Vec<_> = steps
            .list_chassis()?
            .into_iter()
            .filter(|c| !keep.contains(&c.uuid))
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        info!(count = doomed.len(), "Deleting chassis");
        steps.delete_chassis(&doomed)?;
        Ok(doomed.len())
    }
}
