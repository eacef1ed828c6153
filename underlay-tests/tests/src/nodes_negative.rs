// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use ironic_client::types::{ProvisionAction, ProvisionState};
use underlay_testcase::*;

/// Manageable nodes cannot be undeployed, regardless of maintenance.
fn undeploy_manageable_rejected(
    fw: &Framework,
    maintenance: bool,
) -> anyhow::Result<()> {
    let nodes = fw.prepare_nodes()?;
    let steps = fw.node_steps();
    let timeouts = &fw.config().timeouts;

    steps.set_maintenance(&nodes, maintenance, None)?;
    steps.check_nodes_maintenance(
        &nodes,
        maintenance,
        timeouts.change_node_state,
    )?;

    steps.set_nodes_provision_state(&nodes, ProvisionAction::Manage)?;
    steps.check_nodes_provision_state(
        &nodes,
        ProvisionState::Manageable,
        timeouts.change_node_state,
    )?;

    steps.set_nodes_provision_state_rejected(&nodes, ProvisionAction::Deleted)
}

#[underlay_testcase(id = "5a017a61-67cf-404c-bc11-1d95a4ab6cad")]
fn undeploy_manageable_rejected_without_maintenance(fw: &Framework) {
    undeploy_manageable_rejected(fw, false)?;
}

#[underlay_testcase(id = "5a017a61-67cf-404c-bc11-1d95a4ab6cad")]
fn undeploy_manageable_rejected_in_maintenance(fw: &Framework) {
    undeploy_manageable_rejected(fw, true)?;
}

#[underlay_testcase(id = "f4670127-81b7-472c-898b-4e7cbdda789c")]
fn deploy_rejected_in_maintenance(fw: &Framework) {
    let nodes = fw.prepare_nodes()?;
    let steps = fw.node_steps();

    steps.set_maintenance(&nodes, true, Some("underlay negative check"))?;
    steps.check_nodes_maintenance(
        &nodes,
        true,
        fw.config().timeouts.change_node_state,
    )?;

    steps.set_nodes_provision_state_rejected_in_maintenance(
        &nodes,
        ProvisionAction::Active,
    )?;
}
