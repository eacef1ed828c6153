// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use underlay_testcase::*;

/// Nodes move between chassis and can be detached from all of them.
#[underlay_testcase(id = "cde24671-65b2-46f5-b8e5-e3ff087e4da6")]
fn attach_detach_nodes(fw: &Framework) {
    let nodes = fw.create_nodes()?;
    let node_steps = fw.node_steps();

    let chassis = fw.chassis_steps().create_chassis(&[
        "underlay chassis 1".to_string(),
        "underlay chassis 2".to_string(),
    ])?;
    let (first, second) = (&chassis[0], &chassis[1]);

    node_steps.attach_nodes_to_chassis(&nodes, first)?;
    node_steps.check_nodes_attached_to_chassis(&nodes, first)?;

    node_steps.attach_nodes_to_chassis(&nodes, second)?;
    node_steps.check_nodes_attached_to_chassis(&nodes, second)?;
    node_steps
        .check_nodes_not_attached_to_chassis(&nodes, std::slice::from_ref(first))?;

    node_steps.detach_nodes_from_chassis(&nodes)?;
    node_steps.check_nodes_not_attached_to_chassis(&nodes, &chassis)?;
}
