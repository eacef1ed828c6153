// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ironic_client::types::{PowerAction, ProvisionAction, ProvisionState};
use underlay_testcase::*;

#[underlay_testcase(id = "6492f39a-cceb-4bf9-aaff-27b123366ccc")]
fn enroll_and_boot(fw: &Framework) {
    let nodes = fw.prepare_nodes()?;
    fw.node_steps().boot_servers(&nodes)?;
}

/// Power cycles deployed nodes. The deployed image must come back either
/// way.
fn power_cycle(fw: &Framework, maintenance: bool) -> anyhow::Result<()> {
    let nodes = fw.prepare_nodes()?;
    let steps = fw.node_steps();
    let timeouts = &fw.config().timeouts;

    steps.boot_servers(&nodes)?;

    steps.set_maintenance(&nodes, maintenance, None)?;
    steps.check_nodes_maintenance(
        &nodes,
        maintenance,
        timeouts.change_node_state,
    )?;

    for action in [PowerAction::Off, PowerAction::On] {
        steps.set_nodes_power_state(&nodes, action)?;
        steps.check_nodes_power_state(
            &nodes,
            action,
            timeouts.change_node_state,
        )?;
    }

    steps.check_ssh_connection(&nodes)
}

#[underlay_testcase(id = "8ba5c32a-8b1d-4006-86c1-3827d33b9229")]
fn power_cycle_in_maintenance(fw: &Framework) {
    power_cycle(fw, true)?;
}

#[underlay_testcase(id = "8ba5c32a-8b1d-4006-86c1-3827d33b9229")]
fn power_cycle_without_maintenance(fw: &Framework) {
    power_cycle(fw, false)?;
}

/// Walks nodes through manage, inspect and provide.
fn provision_cycle(fw: &Framework, maintenance: bool) -> anyhow::Result<()> {
    let nodes = fw.prepare_nodes()?;
    let steps = fw.node_steps();
    let timeouts = &fw.config().timeouts;

    steps.set_maintenance(&nodes, maintenance, None)?;
    steps.check_nodes_maintenance(
        &nodes,
        maintenance,
        timeouts.change_node_state,
    )?;

    for (action, state) in [
        (ProvisionAction::Manage, ProvisionState::Manageable),
        (ProvisionAction::Inspect, ProvisionState::Manageable),
        (ProvisionAction::Provide, ProvisionState::Available),
    ] {
        steps.set_nodes_provision_state(&nodes, action)?;
        steps.check_nodes_provision_state(
            &nodes,
            state,
            timeouts.change_node_state,
        )?;
    }
    Ok(())
}

#[underlay_testcase(id = "078a29c0-f420-4414-bfed-43987c94526f")]
fn provision_cycle_without_maintenance(fw: &Framework) {
    provision_cycle(fw, false)?;
}

#[underlay_testcase(id = "078a29c0-f420-4414-bfed-43987c94526f")]
fn provision_cycle_in_maintenance(fw: &Framework) {
    provision_cycle(fw, true)?;
}

#[underlay_testcase(id = "b3c476ba-d2f6-404b-8961-d8347818c930")]
fn rebuild(fw: &Framework) {
    let nodes = fw.prepare_nodes()?;
    let steps = fw.node_steps();

    steps.boot_servers(&nodes)?;

    steps.set_nodes_provision_state(&nodes, ProvisionAction::Rebuild)?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::Active,
        fw.config().timeouts.change_node_state,
    )?;
    steps.check_ssh_connection(&nodes)?;
}
