// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::anyhow;
use ironic_client::types::{ProvisionAction, ProvisionState};
use tracing::info;
use underlay_testcase::underlay_framework::ssh::check_ssh_connections;
use underlay_testcase::*;

/// Manual cleaning of deployed nodes. While cleaning is paused by maintenance
/// the cleaning ramdisk must be reachable over SSH at the address the
/// networking service gave the node's port.
#[underlay_testcase(id = "de64a66b-5bb5-4c79-a8a4-cf486c007dae")]
fn clean_deployed_nodes(fw: &Framework) {
    let Some(network) = fw.network() else {
        underlay_skip!("no networking service in the service catalog");
    };

    let nodes = fw.prepare_nodes()?;
    let steps = fw.node_steps();
    let config = fw.config();
    let timeouts = &config.timeouts;

    steps.boot_servers(&nodes)?;

    steps.set_nodes_provision_state(&nodes, ProvisionAction::Deleted)?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::Available,
        timeouts.change_node_state,
    )?;
    steps.set_nodes_provision_state(&nodes, ProvisionAction::Manage)?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::Manageable,
        timeouts.change_node_state,
    )?;

    steps.clean_nodes(&nodes, &config.clean_steps)?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::CleanWait,
        timeouts.change_node_state,
    )?;

    steps.set_maintenance(&nodes, true, Some("underlay cleaning check"))?;
    steps.check_nodes_maintenance(&nodes, true, timeouts.change_node_state)?;

    let macs = fw.port_steps().ports_mac_addresses(&fw.node_configs()?);
    let mut addresses = Vec::with_capacity(macs.len());
    for mac in &macs {
        let ips = network
            .port_fixed_ips(mac)
            .with_context(|| format!("looking up addresses of {mac}"))?;
        let ip = ips
            .first()
            .copied()
            .ok_or_else(|| anyhow!("port {mac} has no fixed IP"))?;
        info!(%mac, %ip, "Found cleaning ramdisk address");
        addresses.push(ip);
    }

    check_ssh_connections(
        fw.poller(),
        fw.ssh(),
        &addresses,
        &config.ansible_image_credentials,
        timeouts.ssh,
        true,
    )
    .context("waiting for SSH on the cleaning ramdisk")?;

    steps.set_maintenance(&nodes, false, None)?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::CleanWait,
        timeouts.change_node_state,
    )?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::Manageable,
        timeouts.cleaning,
    )?;
}
