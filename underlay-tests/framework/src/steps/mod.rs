// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operations tests compose: commands that ask the service to do something,
//! and checks that wait for the service to get there.
//!
//! Commands return as soon as the service has accepted the request. Checks
//! poll every named resource until it matches, or fail naming the resources
//! that did not.

use std::time::Duration;

use anyhow::{anyhow, Context};
use ironic_client::Error;
use tracing::info;
use uuid::Uuid;

use crate::expect::{expect_all, wait_for_expected, Observed};
use crate::wait::{scaled_timeout, Poller, WaitError};

mod chassis;
mod node;
mod port;

pub use chassis::ChassisSteps;
pub use node::{generate_node_names, NodeSteps};
pub use port::{generate_mac_addresses, PortAttributes, PortSteps};

/// Turns a lookup that failed with "not found" into an absent observation.
pub(crate) fn found<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Polls `observe` for each of `ids` until every one yields `expected`.
///
/// The timeout is `per_resource_timeout` times the number of resources.
pub(crate) fn wait_for_each<V, F>(
    poller: &Poller,
    what: &str,
    ids: &[Uuid],
    expected: V,
    per_resource_timeout: Duration,
    mut observe: F,
) -> anyhow::Result<()>
where
    V: Clone + PartialEq + Observed,
    F: FnMut(Uuid) -> Result<V, Error>,
{
    let timeout = scaled_timeout(per_resource_timeout, ids.len());
    info!(
        "Waiting {:?} for {} resource(s) to have {} {}",
        timeout,
        ids.len(),
        what,
        expected.describe()
    );

    let expected_map = expect_all(ids.iter().copied(), expected);
    wait_for_expected(poller, timeout, &expected_map, || {
        ids.iter().map(|id| observe(*id).map(|v| (*id, v))).collect()
    })
    .map_err(|e| match e {
        WaitError::Timeout(e) => anyhow!(e),
        WaitError::Failed(e) => anyhow!(e),
    })
    .with_context(|| format!("waiting for {what}"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use ironic_client::types::{Node, PowerState, ProvisionState};
    use ironic_client::Error;
    use serde_json::Map;
    use uuid::Uuid;

    use crate::config::SuiteConfig;
    use crate::wait::Poller;

    pub fn node(state: ProvisionState) -> Node {
        Node {
            uuid: Uuid::new_v4(),
            name: Some("node".to_string()),
            driver: "fake-hardware".to_string(),
            driver_info: Map::new(),
            provision_state: state,
            target_provision_state: None,
            power_state: Some(PowerState::Off),
            maintenance: false,
            maintenance_reason: None,
            chassis_uuid: None,
            instance_uuid: None,
            instance_info: Map::new(),
            properties: Map::new(),
            extra: Map::new(),
            last_error: None,
        }
    }

    pub fn quick_poller() -> Poller {
        Poller::new(Duration::from_millis(1), Duration::from_millis(2))
    }

    /// Configuration with short timeouts and no settle delay.
    pub fn quick_config() -> SuiteConfig {
        let mut config = SuiteConfig::default();
        config.timeouts.change_node_state = Duration::from_millis(50);
        config.timeouts.available_node_state = Duration::from_millis(50);
        config.timeouts.ssh = Duration::from_millis(50);
        config.timeouts.reboot = Duration::ZERO;
        config.timeouts.cleaning = Duration::from_millis(50);
        config
    }

    pub fn not_found() -> Error {
        Error::NotFound { message: "gone".to_string() }
    }
}
