// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The underlay framework: everything a test needs to drive a bare metal
//! deployment and wait for it to converge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use camino::Utf8PathBuf;
use ironic_client::{BareMetalApi, Client, ClientBuilder, NetworkApi};
use tracing::info;

pub mod config;
pub mod expect;
mod fixtures;
pub mod ssh;
pub mod steps;
pub mod wait;

pub use fixtures::ResourceSnapshot;

use config::{
    load_from_file, CloudConfig, CloudsFile, NodeConfig, NodeInventory,
    SuiteConfig,
};
use ssh::{ConnectionProber, SshProber};
use steps::{ChassisSteps, NodeSteps, PortSteps};
use wait::Poller;

/// How long one SSH login attempt may take before it counts as a failure.
const SSH_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where to find the deployment under test and how to talk to it.
#[derive(Debug)]
pub struct FrameworkParameters {
    pub clouds_file: Utf8PathBuf,
    pub cloud_name: String,
    pub nodes_inventory: Utf8PathBuf,
    pub config: SuiteConfig,
}

/// State shared by every test in a run.
pub struct Framework {
    api: Arc<dyn BareMetalApi>,
    network: Option<Arc<dyn NetworkApi>>,
    ssh: Arc<dyn ConnectionProber>,
    config: SuiteConfig,
    inventory: NodeInventory,
    poller: Poller,
}

impl Framework {
    /// Connects to the cloud named in `params` and loads the node inventory.
    pub fn new(params: FrameworkParameters) -> anyhow::Result<Self> {
        let clouds: CloudsFile = load_from_file(&params.clouds_file)?;
        let cloud = clouds.cloud(&params.cloud_name)?;
        let (api, network) = connect(cloud, &params.config)
            .with_context(|| format!("connecting to cloud {}", params.cloud_name))?;

        let inventory = NodeInventory::load(&params.nodes_inventory)?;
        info!(nodes = inventory.len(), "Loaded node inventory");

        let ssh = Arc::new(SshProber::new(SSH_ATTEMPT_TIMEOUT)?);
        Ok(Self::from_parts(params.config, inventory, api, network, ssh))
    }

    /// Assembles a framework from already-built collaborators.
    pub fn from_parts(
        config: SuiteConfig,
        inventory: NodeInventory,
        api: Arc<dyn BareMetalApi>,
        network: Option<Arc<dyn NetworkApi>>,
        ssh: Arc<dyn ConnectionProber>,
    ) -> Self {
        Self { api, network, ssh, config, inventory, poller: Poller::default() }
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn api(&self) -> &dyn BareMetalApi {
        self.api.as_ref()
    }

    /// The networking service, if the cloud's catalog has one.
    pub fn network(&self) -> Option<&dyn NetworkApi> {
        self.network.as_deref()
    }

    pub fn ssh(&self) -> &dyn ConnectionProber {
        self.ssh.as_ref()
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn node_steps(&self) -> NodeSteps<'_> {
        NodeSteps::new(self.api(), &self.config, &self.poller, self.ssh())
    }

    pub fn port_steps(&self) -> PortSteps<'_> {
        PortSteps::new(self.api(), &self.poller)
    }

    pub fn chassis_steps(&self) -> ChassisSteps<'_> {
        ChassisSteps::new(self.api(), &self.poller)
    }

    /// Enrollment details of every inventory node.
    pub fn node_configs(&self) -> anyhow::Result<Vec<NodeConfig>> {
        Ok(self.inventory.node_configs(&self.config.images)?)
    }
}

fn connect(
    cloud: &CloudConfig,
    config: &SuiteConfig,
) -> anyhow::Result<(Arc<dyn BareMetalApi>, Option<Arc<dyn NetworkApi>>)> {
    if cloud.is_noauth() {
        let endpoint =
            cloud.baremetal_endpoint_override.as_deref().ok_or_else(|| {
                anyhow!("cloud has auth_type none but no baremetal_endpoint_override")
            })?;
        info!(endpoint, "Using bare metal endpoint without authentication");
        let client = ClientBuilder::new(endpoint)
            .api_version(config.ironic_api_version.clone())
            .build()?;
        return Ok((Arc::new(client), None));
    }

    let creds = cloud.password_credentials()?;
    let (client, network) = Client::connect_with_password(
        &creds,
        cloud.interface(),
        cloud.region_name.as_deref(),
        &config.ironic_api_version,
    )?;
    if network.is_none() {
        info!("No network endpoint in catalog");
    }

    Ok((
        Arc::new(client),
        network.map(|n| Arc::new(n) as Arc<dyn NetworkApi>),
    ))
}
