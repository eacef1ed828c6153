// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::{info, instrument};
use underlay_tests::underlay_testcase::underlay_framework::ResourceSnapshot;
use underlay_tests::underlay_testcase::Framework;

/// Keeps the deployment free of resources tests leave behind.
///
/// Nodes that existed before the run are never deleted. Everything a test
/// creates is deleted after it; nodes that appear from elsewhere are deleted
/// only when the cleanup policy asks for it.
pub struct TestFixtures<'a> {
    framework: &'a Framework,
    uncleanable: ResourceSnapshot,
    before_test: ResourceSnapshot,
}

impl<'a> TestFixtures<'a> {
    pub fn new(framework: &'a Framework) -> Self {
        Self {
            framework,
            uncleanable: ResourceSnapshot::default(),
            before_test: ResourceSnapshot::default(),
        }
    }

    #[instrument(skip_all)]
    pub fn execution_setup(&mut self) -> Result<()> {
        self.uncleanable = self.framework.snapshot()?;
        info!(
            nodes = self.uncleanable.nodes.len(),
            chassis = self.uncleanable.chassis.len(),
            "Recorded pre-existing resources"
        );
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn execution_cleanup(&mut self) -> Result<()> {
        if self.framework.config().cleanup.unexpected_after_all {
            self.framework.cleanup_nodes(&self.uncleanable.nodes, 0)?;
        }
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn test_setup(&mut self) -> Result<()> {
        if self.framework.config().cleanup.unexpected_before_test {
            self.framework.cleanup_nodes(&self.uncleanable.nodes, 0)?;
        }
        self.before_test = self.framework.snapshot()?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub fn test_cleanup(&mut self) -> Result<()> {
        let keep: BTreeSet<_> = if self
            .framework
            .config()
            .cleanup
            .unexpected_after_test
        {
            self.uncleanable.nodes.clone()
        } else {
            self.before_test.nodes.union(&self.uncleanable.nodes).copied().collect()
        };

        let nodes = self.framework.cleanup_nodes(&keep, 0)?;
        let chassis = self.framework.cleanup_chassis(&self.before_test.chassis)?;
        if nodes + chassis > 0 {
            info!(nodes, chassis, "Cleaned up after test");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::net::IpAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use ironic_client::types::{Chassis, Node};
    use ironic_client::{Error, MockBareMetalApi};
    use serde_json::json;
    use underlay_tests::underlay_testcase::underlay_framework::config::{
        CleanupPolicy, Credentials, NodeInventory, SuiteConfig,
    };
    use underlay_tests::underlay_testcase::underlay_framework::ssh::ConnectionProber;
    use underlay_tests::underlay_testcase::underlay_framework::wait::Poller;
    use uuid::Uuid;

    use super::*;

    struct Unreachable;

    impl ConnectionProber for Unreachable {
        fn can_connect(&self, _: IpAddr, _: &Credentials) -> bool {
            false
        }
    }

    /// What the mocked service currently holds, plus what was deleted.
    #[derive(Default)]
    struct Deployment {
        nodes: BTreeMap<Uuid, Node>,
        chassis: BTreeMap<Uuid, Chassis>,
        deleted_nodes: BTreeSet<Uuid>,
        deleted_chassis: BTreeSet<Uuid>,
    }

    impl Deployment {
        fn add_node(&mut self) -> Uuid {
            let node: Node = serde_json::from_value(json!({
                "uuid": Uuid::new_v4(),
                "driver": "fake",
                "provision_state": "available",
                "power_state": "power off"
            }))
            .unwrap();
            let uuid = node.uuid;
            self.nodes.insert(uuid, node);
            uuid
        }

        fn add_chassis(&mut self) -> Uuid {
            let chassis: Chassis =
                serde_json::from_value(json!({ "uuid": Uuid::new_v4() }))
                    .unwrap();
            let uuid = chassis.uuid;
            self.chassis.insert(uuid, chassis);
            uuid
        }
    }

    fn gone() -> Error {
        Error::NotFound { message: "gone".to_string() }
    }

    fn api(deployment: &Arc<Mutex<Deployment>>) -> MockBareMetalApi {
        let mut api = MockBareMetalApi::new();

        let d = deployment.clone();
        api.expect_node_list().returning(move || {
            Ok(d.lock().unwrap().nodes.values().cloned().collect())
        });
        let d = deployment.clone();
        api.expect_node_get().returning(move |id| {
            d.lock().unwrap().nodes.get(&id).cloned().ok_or_else(gone)
        });
        let d = deployment.clone();
        api.expect_node_delete().returning(move |id| {
            let mut d = d.lock().unwrap();
            d.nodes.remove(&id).ok_or_else(gone)?;
            d.deleted_nodes.insert(id);
            Ok(())
        });
        let d = deployment.clone();
        api.expect_chassis_list().returning(move || {
            Ok(d.lock().unwrap().chassis.values().cloned().collect())
        });
        let d = deployment.clone();
        api.expect_chassis_delete().returning(move |id| {
            let mut d = d.lock().unwrap();
            d.chassis.remove(&id).ok_or_else(gone)?;
            d.deleted_chassis.insert(id);
            Ok(())
        });
        api
    }

    fn framework(
        deployment: &Arc<Mutex<Deployment>>,
        cleanup: CleanupPolicy,
    ) -> Framework {
        let mut config = SuiteConfig::default();
        config.cleanup = cleanup;
        config.timeouts.available_node_state = Duration::from_millis(50);
        config.timeouts.change_node_state = Duration::from_millis(50);
        let inventory: NodeInventory = serde_json::from_str("{}").unwrap();

        Framework::from_parts(
            config,
            inventory,
            Arc::new(api(deployment)),
            None,
            Arc::new(Unreachable),
        )
        .with_poller(Poller::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
        ))
    }

    /// A run with one pre-existing node and chassis, a node that shows up
    /// between execution setup and the test, and a node and chassis the
    /// test itself creates.
    struct Run {
        deployment: Arc<Mutex<Deployment>>,
        pre_run_node: Uuid,
        pre_run_chassis: Uuid,
        stray_node: Uuid,
        test_node: Uuid,
        test_chassis: Uuid,
    }

    fn run_one_test(cleanup: CleanupPolicy) -> Run {
        let deployment = Arc::new(Mutex::new(Deployment::default()));
        let (pre_run_node, pre_run_chassis) = {
            let mut d = deployment.lock().unwrap();
            (d.add_node(), d.add_chassis())
        };

        let fw = framework(&deployment, cleanup);
        let mut fixtures = TestFixtures::new(&fw);
        fixtures.execution_setup().unwrap();

        let stray_node = deployment.lock().unwrap().add_node();
        fixtures.test_setup().unwrap();

        let (test_node, test_chassis) = {
            let mut d = deployment.lock().unwrap();
            (d.add_node(), d.add_chassis())
        };
        fixtures.test_cleanup().unwrap();
        fixtures.execution_cleanup().unwrap();

        Run {
            deployment,
            pre_run_node,
            pre_run_chassis,
            stray_node,
            test_node,
            test_chassis,
        }
    }

    #[test]
    fn test_resources_are_deleted_after_test() {
        let run = run_one_test(CleanupPolicy::default());
        let d = run.deployment.lock().unwrap();

        assert_eq!(d.deleted_nodes, BTreeSet::from([run.test_node]));
        assert_eq!(d.deleted_chassis, BTreeSet::from([run.test_chassis]));
        assert!(d.nodes.contains_key(&run.pre_run_node));
        assert!(d.nodes.contains_key(&run.stray_node));
        assert!(d.chassis.contains_key(&run.pre_run_chassis));
    }

    #[test]
    fn unexpected_nodes_deleted_after_test_when_asked() {
        let run = run_one_test(CleanupPolicy {
            unexpected_after_test: true,
            ..CleanupPolicy::default()
        });
        let d = run.deployment.lock().unwrap();

        assert_eq!(
            d.deleted_nodes,
            BTreeSet::from([run.stray_node, run.test_node])
        );
        assert_eq!(d.deleted_chassis, BTreeSet::from([run.test_chassis]));
        assert!(d.nodes.contains_key(&run.pre_run_node));
    }

    #[test]
    fn unexpected_nodes_deleted_before_test_when_asked() {
        let run = run_one_test(CleanupPolicy {
            unexpected_before_test: true,
            ..CleanupPolicy::default()
        });
        let d = run.deployment.lock().unwrap();

        assert!(d.deleted_nodes.contains(&run.stray_node));
        assert!(d.deleted_nodes.contains(&run.test_node));
        assert_eq!(d.nodes.keys().collect::<Vec<_>>(), vec![&run.pre_run_node]);
    }

    #[test]
    fn unexpected_nodes_deleted_after_all_when_asked() {
        let run = run_one_test(CleanupPolicy {
            unexpected_after_all: true,
            ..CleanupPolicy::default()
        });
        let d = run.deployment.lock().unwrap();

        assert_eq!(
            d.deleted_nodes,
            BTreeSet::from([run.stray_node, run.test_node])
        );
        assert_eq!(d.nodes.keys().collect::<Vec<_>>(), vec![&run.pre_run_node]);
        assert!(d.chassis.contains_key(&run.pre_run_chassis));
    }
}
