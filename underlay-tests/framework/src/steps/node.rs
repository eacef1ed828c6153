// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use ironic_client::types::{
    Chassis, CleanStep, JsonObject, Node, NodeCreate, PatchOperation,
    PowerAction, ProvisionAction, ProvisionState,
};
use ironic_client::{BareMetalApi, Error};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::{found, wait_for_each};
use crate::config::SuiteConfig;
use crate::ssh::{check_ssh_connections, ConnectionProber};
use crate::wait::Poller;

/// Driver interfaces that must validate before a node can be deployed.
const REQUIRED_INTERFACES: &[&str] =
    &["boot", "deploy", "management", "network", "power"];

/// Properties hardware inspection must discover.
const INSPECTED_PROPERTIES: &[&str] =
    &["memory_mb", "cpu_arch", "local_gb", "cpus", "capabilities"];

/// Random node names, one per requested node.
pub fn generate_node_names(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| format!("underlay-{}", Uuid::new_v4().simple()))
        .collect()
}

fn uuids(nodes: &[Node]) -> Vec<Uuid> {
    nodes.iter().map(|n| n.uuid).collect()
}

/// The value `attribute` has in the node's API representation. Null and
/// missing attributes are both absent.
fn attribute_value(node: &Node, attribute: &str) -> Option<Value> {
    let Ok(Value::Object(fields)) = serde_json::to_value(node) else {
        return None;
    };
    fields.get(attribute).filter(|v| !v.is_null()).cloned()
}

pub struct NodeSteps<'a> {
    api: &'a dyn BareMetalApi,
    config: &'a SuiteConfig,
    poller: &'a Poller,
    ssh: &'a dyn ConnectionProber,
}

impl<'a> NodeSteps<'a> {
    pub fn new(
        api: &'a dyn BareMetalApi,
        config: &'a SuiteConfig,
        poller: &'a Poller,
        ssh: &'a dyn ConnectionProber,
    ) -> Self {
        Self { api, config, poller, ssh }
    }

    /// Creates one node named after each of `names`, with every other
    /// attribute taken from `template`.
    pub fn create_nodes(
        &self,
        template: &NodeCreate,
        names: &[String],
    ) -> Result<Vec<Node>> {
        names
            .iter()
            .map(|name| {
                let body =
                    NodeCreate { name: Some(name.clone()), ..template.clone() };
                let node = self
                    .api
                    .node_create(&body)
                    .with_context(|| format!("creating node {name}"))?;
                info!(uuid = %node.uuid, %name, driver = %node.driver, "Created node");
                Ok(node)
            })
            .collect()
    }

    /// Checks that `nodes[i]` is named `names[i]`.
    pub fn check_node_names(
        &self,
        nodes: &[Node],
        names: &[String],
    ) -> Result<()> {
        ensure!(
            nodes.len() == names.len(),
            "{} node(s) for {} name(s)",
            nodes.len(),
            names.len()
        );
        for (node, name) in nodes.iter().zip(names) {
            ensure!(
                node.name.as_deref() == Some(name.as_str()),
                "node {} is named {:?}, expected {:?}",
                node.uuid,
                node.name,
                name
            );
        }
        Ok(())
    }

    /// Deletes nodes, first undeploying and powering off any that need it.
    /// Nodes that are already gone are skipped.
    pub fn delete_nodes(&self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            let Some(current) = found(self.api.node_get(node.uuid))? else {
                debug!(uuid = %node.uuid, "Node already deleted");
                continue;
            };

            if !current.provision_state.is_deletable() {
                info!(uuid = %current.uuid, state = %current.provision_state,
                      "Undeploying node before deletion");
                self.set_nodes_provision_state(
                    std::slice::from_ref(&current),
                    ProvisionAction::Deleted,
                )?;
                self.check_nodes_provision_state(
                    std::slice::from_ref(&current),
                    ProvisionState::Available,
                    self.config.timeouts.change_node_state,
                )?;
            }

            let current = self
                .api
                .node_get(current.uuid)
                .with_context(|| format!("re-reading node {}", current.uuid))?;
            if current.is_powered() {
                self.set_nodes_power_state(
                    std::slice::from_ref(&current),
                    PowerAction::Off,
                )?;
                self.check_nodes_power_state(
                    std::slice::from_ref(&current),
                    PowerAction::Off,
                    self.config.timeouts.change_node_state,
                )?;
            }

            self.api
                .node_delete(current.uuid)
                .with_context(|| format!("deleting node {}", current.uuid))?;
            info!(uuid = %current.uuid, "Deleted node");
        }
        Ok(())
    }

    pub fn check_nodes_presence(
        &self,
        nodes: &[Node],
        must_present: bool,
        per_node_timeout: Duration,
    ) -> Result<()> {
        wait_for_each(
            self.poller,
            "presence",
            &uuids(nodes),
            must_present,
            per_node_timeout,
            |id| Ok(found(self.api.node_get(id))?.is_some()),
        )
    }

    pub fn set_maintenance(
        &self,
        nodes: &[Node],
        on: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        for node in nodes {
            self.api
                .node_set_maintenance(node.uuid, on, reason.map(str::to_owned))
                .with_context(|| {
                    format!("setting maintenance {on} on node {}", node.uuid)
                })?;
            info!(uuid = %node.uuid, on, ?reason, "Set node maintenance");
        }
        Ok(())
    }

    pub fn check_nodes_maintenance(
        &self,
        nodes: &[Node],
        on: bool,
        per_node_timeout: Duration,
    ) -> Result<()> {
        wait_for_each(
            self.poller,
            "maintenance",
            &uuids(nodes),
            Some(on),
            per_node_timeout,
            |id| Ok(found(self.api.node_get(id))?.map(|n| n.maintenance)),
        )
    }

    pub fn set_nodes_power_state(
        &self,
        nodes: &[Node],
        action: PowerAction,
    ) -> Result<()> {
        for node in nodes {
            self.api.node_set_power_state(node.uuid, action).with_context(
                || format!("setting power {action} on node {}", node.uuid),
            )?;
            info!(uuid = %node.uuid, %action, "Requested power action");
        }
        Ok(())
    }

    /// Waits for the power state `action` leads to. Actions that leave the
    /// node briefly reporting its old state first wait out the configured
    /// settle delay.
    pub fn check_nodes_power_state(
        &self,
        nodes: &[Node],
        action: PowerAction,
        per_node_timeout: Duration,
    ) -> Result<()> {
        let settle = self.config.timeouts.reboot;
        if action.needs_settle_delay() && !settle.is_zero() {
            info!(?settle, %action, "Letting nodes settle");
            std::thread::sleep(settle);
        }

        wait_for_each(
            self.poller,
            "power state",
            &uuids(nodes),
            Some(action.expected_state()),
            per_node_timeout,
            |id| Ok(found(self.api.node_get(id))?.and_then(|n| n.power_state)),
        )
    }

    /// Every node.
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.api.node_list().context("listing nodes")
    }

    /// Nodes whose API representation has exactly the values in `filter`.
    /// An empty filter matches every node.
    pub fn get_nodes(&self, filter: &JsonObject) -> Result<Vec<Node>> {
        let nodes = self.list_nodes()?;
        if filter.is_empty() {
            return Ok(nodes);
        }

        Ok(nodes
            .into_iter()
            .filter(|node| {
                let Ok(Value::Object(fields)) = serde_json::to_value(node)
                else {
                    return false;
                };
                filter.iter().all(|(k, v)| fields.get(k) == Some(v))
            })
            .collect())
    }

    pub fn get_node(&self, node: Uuid) -> Result<Node> {
        self.api.node_get(node).with_context(|| format!("getting node {node}"))
    }

    pub fn get_node_by_instance_uuid(&self, instance_uuid: &str) -> Result<Node> {
        self.api
            .node_get_by_instance_uuid(instance_uuid)
            .with_context(|| format!("getting node of instance {instance_uuid}"))
    }

    pub fn check_node_instance_uuid(
        &self,
        node: &Node,
        instance_uuid: &str,
    ) -> Result<()> {
        ensure!(
            node.instance_uuid.as_deref() == Some(instance_uuid),
            "node {} hosts instance {:?}, expected {}",
            node.uuid,
            node.instance_uuid,
            instance_uuid
        );
        Ok(())
    }

    /// The IPv4 address each deployed node reported, in node order.
    pub fn instance_ipv4_addresses(&self, nodes: &[Node]) -> Result<Vec<IpAddr>> {
        nodes
            .iter()
            .map(|node| {
                let node = self.get_node(node.uuid)?;
                let addr = node.instance_ipv4_address().ok_or_else(|| {
                    anyhow!("node {} has no instance IPv4 address", node.uuid)
                })?;
                addr.parse::<IpAddr>().with_context(|| {
                    format!("node {} reported address {addr:?}", node.uuid)
                })
            })
            .collect()
    }

    pub fn set_nodes_provision_state(
        &self,
        nodes: &[Node],
        action: ProvisionAction,
    ) -> Result<()> {
        for node in nodes {
            self.api
                .node_set_provision_state(node.uuid, action, None)
                .with_context(|| {
                    format!("requesting {action} on node {}", node.uuid)
                })?;
            info!(uuid = %node.uuid, %action, "Requested provision action");
        }
        Ok(())
    }

    pub fn check_nodes_provision_state(
        &self,
        nodes: &[Node],
        state: ProvisionState,
        per_node_timeout: Duration,
    ) -> Result<()> {
        wait_for_each(
            self.poller,
            "provision state",
            &uuids(nodes),
            Some(state),
            per_node_timeout,
            |id| Ok(found(self.api.node_get(id))?.map(|n| n.provision_state)),
        )
    }

    /// Waits for the top-level `attribute` of every node to equal `expected`,
    /// where `None` stands for unset (or for the node being gone).
    pub fn check_nodes_attribute(
        &self,
        nodes: &[Node],
        attribute: &str,
        expected: Option<Value>,
        per_node_timeout: Duration,
    ) -> Result<()> {
        wait_for_each(
            self.poller,
            &format!("attribute {attribute}"),
            &uuids(nodes),
            expected,
            per_node_timeout,
            |id| {
                Ok(found(self.api.node_get(id))?
                    .and_then(|n| attribute_value(&n, attribute)))
            },
        )
    }

    pub fn update_nodes(
        &self,
        nodes: &[Node],
        patch: &[PatchOperation],
    ) -> Result<Vec<Node>> {
        nodes
            .iter()
            .map(|node| {
                debug!(uuid = %node.uuid, ?patch, "Patching node");
                self.api
                    .node_update(node.uuid, patch)
                    .with_context(|| format!("updating node {}", node.uuid))
            })
            .collect()
    }

    /// Checks that every add and replace in `patch` took effect and every
    /// removed path is now unset.
    pub fn check_nodes_updated(
        &self,
        nodes: &[Node],
        patch: &[PatchOperation],
    ) -> Result<()> {
        for node in nodes {
            let current = serde_json::to_value(self.get_node(node.uuid)?)?;
            for op in patch {
                let actual =
                    current.pointer(op.path()).filter(|v| !v.is_null());
                match op {
                    PatchOperation::Add { value, .. }
                    | PatchOperation::Replace { value, .. } => ensure!(
                        actual == Some(value),
                        "node {} has {} = {:?}, expected {}",
                        node.uuid,
                        op.path(),
                        actual,
                        value
                    ),
                    PatchOperation::Remove { .. } => ensure!(
                        actual.is_none(),
                        "node {} still has {} = {:?}",
                        node.uuid,
                        op.path(),
                        actual
                    ),
                }
            }
        }
        Ok(())
    }

    /// Checks that every interface needed for deployment validates.
    pub fn validate_nodes(&self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            let validation = self
                .api
                .node_validate(node.uuid)
                .with_context(|| format!("validating node {}", node.uuid))?;
            let failures = validation.failures(REQUIRED_INTERFACES);
            if !failures.is_empty() {
                let details: Vec<String> = failures
                    .iter()
                    .map(|(iface, reason)| {
                        format!(
                            "{iface}: {}",
                            reason.as_deref().unwrap_or("no reason given")
                        )
                    })
                    .collect();
                bail!(
                    "node {} failed validation: {}",
                    node.uuid,
                    details.join("; ")
                );
            }
        }
        Ok(())
    }

    /// Moves nodes to manageable, checks that they know nothing about their
    /// hardware yet, then runs inspection and waits for it to finish.
    pub fn inspect_nodes(&self, nodes: &[Node]) -> Result<()> {
        let timeouts = &self.config.timeouts;
        self.set_nodes_provision_state(nodes, ProvisionAction::Manage)?;
        self.check_nodes_provision_state(
            nodes,
            ProvisionState::Manageable,
            timeouts.available_node_state,
        )?;

        for node in nodes {
            let current = self.get_node(node.uuid)?;
            ensure!(
                current.properties.is_empty(),
                "node {} already has properties {:?}",
                node.uuid,
                current.properties.keys().collect::<Vec<_>>()
            );
        }

        self.set_nodes_provision_state(nodes, ProvisionAction::Inspect)?;
        self.check_nodes_provision_state(
            nodes,
            ProvisionState::Manageable,
            timeouts.change_node_state,
        )
    }

    pub fn check_nodes_inspected(&self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            let current = self.get_node(node.uuid)?;
            let missing: Vec<&str> = INSPECTED_PROPERTIES
                .iter()
                .copied()
                .filter(|p| !current.properties.contains_key(*p))
                .collect();
            ensure!(
                missing.is_empty(),
                "node {} lacks inspected properties {:?}",
                node.uuid,
                missing
            );
        }
        Ok(())
    }

    /// Starts manual cleaning with `clean_steps`.
    pub fn clean_nodes(
        &self,
        nodes: &[Node],
        clean_steps: &[CleanStep],
    ) -> Result<()> {
        for node in nodes {
            self.api
                .node_set_provision_state(
                    node.uuid,
                    ProvisionAction::Clean,
                    Some(clean_steps.to_vec()),
                )
                .with_context(|| format!("cleaning node {}", node.uuid))?;
            info!(uuid = %node.uuid, steps = clean_steps.len(), "Started cleaning");
        }
        Ok(())
    }

    /// Deploys nodes and waits until the deployed image accepts SSH logins.
    pub fn boot_servers(&self, nodes: &[Node]) -> Result<()> {
        self.set_nodes_provision_state(nodes, ProvisionAction::Active)?;
        self.check_nodes_provision_state(
            nodes,
            ProvisionState::Active,
            self.config.timeouts.change_node_state,
        )?;
        self.check_ssh_connection(nodes)
    }

    /// Waits until every deployed node accepts an SSH login with the image
    /// credentials.
    pub fn check_ssh_connection(&self, nodes: &[Node]) -> Result<()> {
        let addresses = self.instance_ipv4_addresses(nodes)?;
        check_ssh_connections(
            self.poller,
            self.ssh,
            &addresses,
            &self.config.image_credentials,
            self.config.timeouts.ssh,
            true,
        )
        .context("waiting for SSH on deployed nodes")
    }

    /// Requests `action` on each node and requires the service to refuse it
    /// because of the node's current state.
    pub fn set_nodes_provision_state_rejected(
        &self,
        nodes: &[Node],
        action: ProvisionAction,
    ) -> Result<()> {
        self.expect_rejection(nodes, action, |node| {
            format!(
                "The requested action \"{action}\" can not be performed on \
                 node \"{}\" while it is in state \"{}\".",
                node.uuid, node.provision_state
            )
        })
    }

    /// Requests `action` on each node and requires the service to refuse it
    /// because the node is in maintenance.
    pub fn set_nodes_provision_state_rejected_in_maintenance(
        &self,
        nodes: &[Node],
        action: ProvisionAction,
    ) -> Result<()> {
        self.expect_rejection(nodes, action, |node| {
            format!(
                "The provisioning operation can't be performed on node {} \
                 because it's in maintenance mode.",
                node.uuid
            )
        })
    }

    fn expect_rejection<F>(
        &self,
        nodes: &[Node],
        action: ProvisionAction,
        expected_message: F,
    ) -> Result<()>
    where
        F: Fn(&Node) -> String,
    {
        for node in nodes {
            match self.api.node_set_provision_state(node.uuid, action, None) {
                Ok(()) => bail!(
                    "{action} on node {} was accepted, expected a rejection",
                    node.uuid
                ),
                Err(Error::BadRequest { message }) => {
                    let current = self.get_node(node.uuid)?;
                    let expected = expected_message(&current);
                    ensure!(
                        message.contains(&expected),
                        "{action} on node {} was rejected with {:?}, \
                         expected {:?}",
                        node.uuid,
                        message,
                        expected
                    );
                    info!(uuid = %node.uuid, %action, "Action rejected as expected");
                }
                Err(e) => {
                    return Err(anyhow!(e).context(format!(
                        "{action} on node {} failed, expected HTTP 400",
                        node.uuid
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn attach_nodes_to_chassis(
        &self,
        nodes: &[Node],
        chassis: &Chassis,
    ) -> Result<()> {
        let patch = [PatchOperation::Replace {
            path: "/chassis_uuid".to_string(),
            value: Value::String(chassis.uuid.to_string()),
        }];
        self.update_nodes(nodes, &patch).map(drop)
    }

    pub fn check_nodes_attached_to_chassis(
        &self,
        nodes: &[Node],
        chassis: &Chassis,
    ) -> Result<()> {
        for node in nodes {
            let current = self.get_node(node.uuid)?;
            ensure!(
                current.chassis_uuid == Some(chassis.uuid),
                "node {} is attached to {:?}, expected chassis {}",
                node.uuid,
                current.chassis_uuid,
                chassis.uuid
            );
        }
        Ok(())
    }

    pub fn detach_nodes_from_chassis(&self, nodes: &[Node]) -> Result<()> {
        let patch =
            [PatchOperation::Remove { path: "/chassis_uuid".to_string() }];
        self.update_nodes(nodes, &patch).map(drop)
    }

    /// Checks that no node is attached to any of `chassis`.
    pub fn check_nodes_not_attached_to_chassis(
        &self,
        nodes: &[Node],
        chassis: &[Chassis],
    ) -> Result<()> {
        for node in nodes {
            let current = self.get_node(node.uuid)?;
            if let Some(attached) = current.chassis_uuid {
                ensure!(
                    chassis.iter().all(|c| c.uuid != attached),
                    "node {} is still attached to chassis {}",
                    node.uuid,
                    attached
                );
            }
        }
        Ok(())
    }
}
