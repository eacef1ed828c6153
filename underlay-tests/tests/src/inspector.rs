// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::ensure;
use ironic_client::types::{ProvisionAction, ProvisionState};
use underlay_testcase::*;

#[underlay_testcase(id = "0070e720-558d-4f3d-873f-74a016e7369e")]
fn inspect_then_boot(fw: &Framework) {
    let nodes = fw.prepare_nodes()?;
    let steps = fw.node_steps();
    let timeouts = &fw.config().timeouts;

    steps.inspect_nodes(&nodes)?;
    steps.check_nodes_inspected(&nodes)?;

    steps.set_nodes_provision_state(&nodes, ProvisionAction::Provide)?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::Available,
        timeouts.available_node_state,
    )?;

    steps.boot_servers(&nodes)?;
}

/// Deploys all but one node while the remaining one is inspected.
#[underlay_testcase(id = "e9925ea2-7cda-4471-8b05-d357205334bf")]
fn boot_while_inspecting(fw: &Framework) {
    let nodes = fw.prepare_nodes()?;
    ensure!(nodes.len() >= 2, "needs at least 2 nodes, have {}", nodes.len());

    let steps = fw.node_steps();
    let timeouts = &fw.config().timeouts;
    let (inspected, booted) = nodes.split_at(1);

    steps.set_nodes_provision_state(booted, ProvisionAction::Active)?;
    steps.inspect_nodes(inspected)?;

    steps.check_nodes_provision_state(
        booted,
        ProvisionState::Active,
        timeouts.change_node_state,
    )?;
    steps.check_ssh_connection(booted)?;

    steps.set_nodes_provision_state(inspected, ProvisionAction::Provide)?;
    steps.check_nodes_provision_state(
        inspected,
        ProvisionState::Available,
        timeouts.available_node_state,
    )?;
}
