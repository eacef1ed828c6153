// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Suite configuration: tunables, cloud credentials and the node inventory.
//!
//! Everything is read once at startup into plain structures that the
//! framework hands out by reference.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ironic_client::auth::PasswordCredentials;
use ironic_client::types::{CleanStep, JsonObject};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read file {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file {path} is not valid TOML")]
    Toml {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("file {path} is not valid YAML")]
    Yaml {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("file {path} is not valid JSON")]
    Json {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot process file {0}: it must have a .json or .yaml extension")]
    UnsupportedExtension(Utf8PathBuf),

    #[error("cloud {0:?} not found in clouds file")]
    MissingCloud(String),

    #[error("{0}")]
    Invalid(String),
}

/// Deserializes a YAML (`.yaml`, `.yml`) or JSON (`.json`) file.
pub fn load_from_file<T: DeserializeOwned>(
    path: &Utf8Path,
) -> Result<T, ConfigError> {
    let read = || {
        std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_owned(), source })
    };

    match path.extension() {
        Some("yaml" | "yml") => serde_yaml::from_str(&read()?)
            .map_err(|source| ConfigError::Yaml { path: path.to_owned(), source }),
        Some("json") => serde_json::from_str(&read()?)
            .map_err(|source| ConfigError::Json { path: path.to_owned(), source }),
        _ => Err(ConfigError::UnsupportedExtension(path.to_owned())),
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        d: &Duration,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// How long checks wait, in whole seconds in the configuration file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Per node, for deploy, undeploy, inspection and similar transitions.
    #[serde(with = "secs")]
    pub change_node_state: Duration,

    /// Per node, for `manage` and `provide` on freshly enrolled nodes.
    #[serde(with = "secs")]
    pub available_node_state: Duration,

    /// For SSH to become reachable on a booted node.
    #[serde(with = "secs")]
    pub ssh: Duration,

    /// Settle delay after a power-off or reboot request.
    #[serde(with = "secs")]
    pub reboot: Duration,

    /// Per node, for manual cleaning to finish.
    #[serde(with = "secs")]
    pub cleaning: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            change_node_state: Duration::from_secs(600),
            available_node_state: Duration::from_secs(120),
            ssh: Duration::from_secs(300),
            reboot: Duration::from_secs(20),
            cleaning: Duration::from_secs(1200),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    fn new(username: &str, password: &str) -> Self {
        Self { username: username.to_string(), password: password.to_string() }
    }
}

/// Images served to nodes during deployment.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeployImages {
    pub kernel_url: String,
    pub ramdisk_url: String,
    pub boot_image_url: String,
}

impl Default for DeployImages {
    fn default() -> Self {
        Self {
            kernel_url: "http://10.100.0.2:8080/deploy_kernel".to_string(),
            ramdisk_url: "http://10.100.0.2:8080/deploy_ramdisk".to_string(),
            boot_image_url: "http://10.100.0.2:8080/deployment_image.qcow2"
                .to_string(),
        }
    }
}

/// Whether to delete nodes that the suite did not create and that did not
/// exist when the run started.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupPolicy {
    pub unexpected_before_test: bool,
    pub unexpected_after_test: bool,
    pub unexpected_after_all: bool,
}

/// Tunables for a suite run.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SuiteConfig {
    /// Microversion sent with every bare metal API request.
    pub ironic_api_version: String,
    pub timeouts: Timeouts,
    /// Login for the deployed user image.
    pub image_credentials: Credentials,
    /// Login for the cleaning ramdisk.
    pub ansible_image_credentials: Credentials,
    pub images: DeployImages,
    pub node_driver: String,
    pub clean_steps: Vec<CleanStep>,
    pub cleanup: CleanupPolicy,
    pub reports_dir: Utf8PathBuf,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        let mut args = JsonObject::new();
        args.insert("tags".to_string(), json!("zap"));

        Self {
            ironic_api_version: ironic_client::DEFAULT_API_VERSION.to_string(),
            timeouts: Timeouts::default(),
            image_credentials: Credentials::new("cirros", "cubswin:)"),
            ansible_image_credentials: Credentials::new("ansible", "secret"),
            images: DeployImages::default(),
            node_driver: "pxe_ipmitool_ansible".to_string(),
            clean_steps: vec![CleanStep {
                interface: "deploy".to_string(),
                step: "erase_devices_metadata".to_string(),
                args,
            }],
            cleanup: CleanupPolicy::default(),
            reports_dir: Utf8PathBuf::from("test_reports"),
        }
    }
}

impl SuiteConfig {
    /// Reads `path` (TOML) if given, otherwise starts from the defaults, then
    /// applies overrides from the process environment.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::Io { path: path.to_owned(), source }
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Toml {
                    path: path.to_owned(),
                    source,
                })?
            }
            None => SuiteConfig::default(),
        };

        config.apply_overrides(|var| std::env::var(var).ok());
        info!(?config, "Loaded suite configuration");
        Ok(config)
    }

    /// Applies `TEST_REPORTS_DIR` and the `CLEANUP_UNEXPECTED_*` flags, as
    /// returned by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("TEST_REPORTS_DIR") {
            self.reports_dir = Utf8PathBuf::from(dir);
        }

        let flags = [
            ("CLEANUP_UNEXPECTED_BEFORE_TEST", &mut self.cleanup.unexpected_before_test),
            ("CLEANUP_UNEXPECTED_AFTER_TEST", &mut self.cleanup.unexpected_after_test),
            ("CLEANUP_UNEXPECTED_AFTER_ALL", &mut self.cleanup.unexpected_after_all),
        ];
        for (var, flag) in flags {
            if let Some(value) = lookup(var) {
                *flag = env_flag(&value);
            }
        }
    }
}

fn env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// The parsed contents of an OpenStack `clouds.yaml`.
#[derive(Clone, Debug, Deserialize)]
pub struct CloudsFile {
    pub clouds: BTreeMap<String, CloudConfig>,
}

impl CloudsFile {
    pub fn cloud(&self, name: &str) -> Result<&CloudConfig, ConfigError> {
        self.clouds
            .get(name)
            .ok_or_else(|| ConfigError::MissingCloud(name.to_string()))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CloudAuth {
    pub auth_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub project_name: Option<String>,
    pub user_domain_name: Option<String>,
    pub project_domain_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub auth: CloudAuth,
    /// Given as either a number or a string in the wild.
    #[serde(default)]
    pub identity_api_version: Option<Value>,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub baremetal_endpoint_override: Option<String>,
}

impl CloudConfig {
    /// Whether the cloud runs without Keystone (standalone Bifrost).
    pub fn is_noauth(&self) -> bool {
        self.auth_type.as_deref() == Some("none")
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("public")
    }

    pub fn identity_api_version(&self) -> Option<String> {
        self.identity_api_version.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn password_credentials(
        &self,
    ) -> Result<PasswordCredentials, ConfigError> {
        if let Some(version) = self.identity_api_version() {
            if !version.starts_with('3') {
                return Err(ConfigError::Invalid(format!(
                    "identity API version {version} is not supported"
                )));
            }
        }

        let required = |field: &Option<String>, name: &str| {
            field.clone().ok_or_else(|| {
                ConfigError::Invalid(format!("cloud auth lacks {name}"))
            })
        };
        let auth = &self.auth;
        Ok(PasswordCredentials {
            auth_url: required(&auth.auth_url, "auth_url")?,
            username: required(&auth.username, "username")?,
            password: required(&auth.password, "password")?,
            project_name: required(&auth.project_name, "project_name")?,
            user_domain_name: auth
                .user_domain_name
                .clone()
                .unwrap_or_else(|| "Default".to_string()),
            project_domain_name: auth
                .project_domain_name
                .clone()
                .unwrap_or_else(|| "Default".to_string()),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
struct InventoryDriverInfo {
    power: JsonObject,
}

#[derive(Clone, Debug, Deserialize)]
struct InventoryNic {
    mac: String,
}

#[derive(Clone, Debug, Deserialize)]
struct InventoryNode {
    driver_info: InventoryDriverInfo,
    #[serde(default)]
    nics: Vec<InventoryNic>,
}

/// The physical nodes available to the suite (`nodes_creds.yaml`), keyed by
/// name.
#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct NodeInventory(BTreeMap<String, InventoryNode>);

/// What the suite needs to enroll one inventory node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    /// The power section of the inventory entry plus the deploy images.
    pub driver_info: JsonObject,
    /// The MAC of the node's first NIC.
    pub mac: String,
}

impl NodeInventory {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        load_from_file(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn node_configs(
        &self,
        images: &DeployImages,
    ) -> Result<Vec<NodeConfig>, ConfigError> {
        self.0
            .iter()
            .map(|(name, node)| {
                let mac = node
                    .nics
                    .first()
                    .map(|nic| nic.mac.clone())
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!("node {name} has no NICs"))
                    })?;

                let mut driver_info = node.driver_info.power.clone();
                driver_info.insert(
                    "deploy_kernel".to_string(),
                    Value::String(images.kernel_url.clone()),
                );
                driver_info.insert(
                    "deploy_ramdisk".to_string(),
                    Value::String(images.ramdisk_url.clone()),
                );

                Ok(NodeConfig { name: name.clone(), driver_info, mac })
            })
            .collect()
    }
}
