// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::net::IpAddr;
use std::time::Duration;

use ironic_api_types::{
    Chassis, ChassisCreate, ChassisList, CleanStep, MaintenanceRequest, Node,
    NodeCreate, NodeList, NodeValidation, PatchOperation, Port, PortCreate,
    PortList, PowerAction, PowerStateRequest, ProvisionAction,
    ProvisionStateRequest,
};
use reqwest::blocking::{RequestBuilder, Response};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::auth::{self, PasswordCredentials};
use crate::{BareMetalApi, Error, NetworkApi};

/// The microversion requested when the caller does not pick one.
pub const DEFAULT_API_VERSION: &str = "1.30";

const API_VERSION_HEADER: &str = "X-OpenStack-Ironic-API-Version";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct ClientBuilder {
    endpoint: String,
    token: Option<String>,
    api_version: String,
    timeout: Duration,
    connect_timeout: Duration,
}

impl ClientBuilder {
    /// Starts building a client for the service at `endpoint`. The endpoint
    /// may be given with or without its `/v1` suffix.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sends `token` as `X-Auth-Token` on every request.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let base = normalize_endpoint(&self.endpoint, "/v1")?;
        let http = http_client(self.timeout, self.connect_timeout)?;
        Ok(Client {
            http,
            base,
            token: self.token,
            api_version: self.api_version,
        })
    }
}

/// Blocking client for the bare metal v1 API.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::blocking::Client,
    base: String,
    token: Option<String>,
    api_version: String,
}

impl Client {
    /// Authenticates against Keystone and builds a client for the catalog's
    /// `baremetal` endpoint, plus one for the `network` endpoint if the
    /// catalog has it.
    pub fn connect_with_password(
        creds: &PasswordCredentials,
        interface: &str,
        region: Option<&str>,
        api_version: &str,
    ) -> Result<(Client, Option<NetworkClient>), Error> {
        let http = http_client(DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)?;
        let session = auth::authenticate(&http, creds)?;

        let baremetal =
            session.endpoint("baremetal", interface, region).ok_or_else(
                || {
                    Error::Endpoint(format!(
                        "no {interface} baremetal endpoint in catalog"
                    ))
                },
            )?;
        info!(endpoint = baremetal, "Using bare metal endpoint from catalog");

        let client = Client {
            http: http.clone(),
            base: normalize_endpoint(baremetal, "/v1")?,
            token: Some(session.token.clone()),
            api_version: api_version.to_string(),
        };

        let network = session
            .endpoint("network", interface, region)
            .map(|url| -> Result<NetworkClient, Error> {
                Ok(NetworkClient {
                    http: http.clone(),
                    base: normalize_endpoint(url, "/v2.0")?,
                    token: Some(session.token.clone()),
                })
            })
            .transpose()?;

        Ok((client, network))
    }

    /// The service root, without the `/v1` suffix.
    pub fn endpoint(&self) -> &str {
        &self.base
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    fn request(&self, method: Method, path: &str) -> (RequestBuilder, String) {
        let url = format!("{}/v1{}", self.base, path);
        debug!(%method, %url, "bare metal API request");
        let mut req = self
            .http
            .request(method, &url)
            .header(API_VERSION_HEADER, &self.api_version);
        if let Some(token) = &self.token {
            req = req.header(AUTH_TOKEN_HEADER, token);
        }
        (req, url)
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let (req, url) = self.request(Method::GET, path);
        decode(send(req, &url)?, url)
    }

    fn delete(&self, path: &str) -> Result<(), Error> {
        let (req, url) = self.request(Method::DELETE, path);
        send(req, &url).map(drop)
    }
}

impl BareMetalApi for Client {
    fn node_create(&self, body: &NodeCreate) -> Result<Node, Error> {
        let (req, url) = self.request(Method::POST, "/nodes");
        decode(send(req.json(body), &url)?, url)
    }

    fn node_get(&self, node: Uuid) -> Result<Node, Error> {
        self.get(&format!("/nodes/{node}"))
    }

    fn node_get_by_instance_uuid(
        &self,
        instance_uuid: &str,
    ) -> Result<Node, Error> {
        let (req, url) = self.request(Method::GET, "/nodes/detail");
        let list: NodeList = decode(
            send(req.query(&[("instance_uuid", instance_uuid)]), &url)?,
            url,
        )?;
        list.nodes.into_iter().next().ok_or_else(|| Error::NotFound {
            message: format!(
                "Node with instance {instance_uuid} could not be found."
            ),
        })
    }

    fn node_list(&self) -> Result<Vec<Node>, Error> {
        self.get::<NodeList>("/nodes/detail").map(|l| l.nodes)
    }

    fn node_update(
        &self,
        node: Uuid,
        patch: &[PatchOperation],
    ) -> Result<Node, Error> {
        let (req, url) = self.request(Method::PATCH, &format!("/nodes/{node}"));
        decode(send(req.json(patch), &url)?, url)
    }

    fn node_delete(&self, node: Uuid) -> Result<(), Error> {
        self.delete(&format!("/nodes/{node}"))
    }

    fn node_set_power_state(
        &self,
        node: Uuid,
        action: PowerAction,
    ) -> Result<(), Error> {
        let (req, url) =
            self.request(Method::PUT, &format!("/nodes/{node}/states/power"));
        send(req.json(&PowerStateRequest { target: action }), &url).map(drop)
    }

    fn node_set_provision_state(
        &self,
        node: Uuid,
        action: ProvisionAction,
        clean_steps: Option<Vec<CleanStep>>,
    ) -> Result<(), Error> {
        let (req, url) = self
            .request(Method::PUT, &format!("/nodes/{node}/states/provision"));
        let body = ProvisionStateRequest { target: action, clean_steps };
        send(req.json(&body), &url).map(drop)
    }

    fn node_set_maintenance(
        &self,
        node: Uuid,
        on: bool,
        reason: Option<String>,
    ) -> Result<(), Error> {
        let path = format!("/nodes/{node}/maintenance");
        if on {
            let (req, url) = self.request(Method::PUT, &path);
            send(req.json(&MaintenanceRequest { reason }), &url).map(drop)
        } else {
            self.delete(&path)
        }
    }

    fn node_validate(&self, node: Uuid) -> Result<NodeValidation, Error> {
        self.get(&format!("/nodes/{node}/validate"))
    }

    fn port_create(&self, body: &PortCreate) -> Result<Port, Error> {
        let (req, url) = self.request(Method::POST, "/ports");
        decode(send(req.json(body), &url)?, url)
    }

    fn port_get(&self, port: Uuid) -> Result<Port, Error> {
        self.get(&format!("/ports/{port}"))
    }

    fn port_get_by_address(&self, address: &str) -> Result<Port, Error> {
        let (req, url) = self.request(Method::GET, "/ports/detail");
        let list: PortList =
            decode(send(req.query(&[("address", address)]), &url)?, url)?;
        list.ports.into_iter().next().ok_or_else(|| Error::NotFound {
            message: format!("Port {address} could not be found."),
        })
    }

    fn port_list(&self) -> Result<Vec<Port>, Error> {
        self.get::<PortList>("/ports/detail").map(|l| l.ports)
    }

    fn port_delete(&self, port: Uuid) -> Result<(), Error> {
        self.delete(&format!("/ports/{port}"))
    }

    fn chassis_create(&self, body: &ChassisCreate) -> Result<Chassis, Error> {
        let (req, url) = self.request(Method::POST, "/chassis");
        decode(send(req.json(body), &url)?, url)
    }

    fn chassis_get(&self, chassis: Uuid) -> Result<Chassis, Error> {
        self.get(&format!("/chassis/{chassis}"))
    }

    fn chassis_list(&self) -> Result<Vec<Chassis>, Error> {
        self.get::<ChassisList>("/chassis/detail").map(|l| l.chassis)
    }

    fn chassis_delete(&self, chassis: Uuid) -> Result<(), Error> {
        self.delete(&format!("/chassis/{chassis}"))
    }
}

/// Blocking client for the networking service's port lookup.
#[derive(Clone, Debug)]
pub struct NetworkClient {
    http: reqwest::blocking::Client,
    base: String,
    token: Option<String>,
}

impl NetworkClient {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
    ) -> Result<NetworkClient, Error> {
        Ok(NetworkClient {
            http: http_client(DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)?,
            base: normalize_endpoint(endpoint, "/v2.0")?,
            token,
        })
    }
}

impl NetworkApi for NetworkClient {
    fn port_fixed_ips(&self, mac: &str) -> Result<Vec<IpAddr>, Error> {
        #[derive(Deserialize)]
        struct FixedIp {
            ip_address: IpAddr,
        }

        #[derive(Deserialize)]
        struct NetworkPort {
            #[serde(default)]
            fixed_ips: Vec<FixedIp>,
        }

        #[derive(Deserialize)]
        struct NetworkPorts {
            ports: Vec<NetworkPort>,
        }

        let url = format!("{}/v2.0/ports", self.base);
        debug!(%url, mac, "network API request");
        let mut req = self.http.get(&url).query(&[("mac_address", mac)]);
        if let Some(token) = &self.token {
            req = req.header(AUTH_TOKEN_HEADER, token);
        }

        let ports: NetworkPorts = decode(send(req, &url)?, url)?;
        Ok(ports
            .ports
            .into_iter()
            .flat_map(|p| p.fixed_ips)
            .map(|ip| ip.ip_address)
            .collect())
    }
}

fn http_client(
    timeout: Duration,
    connect_timeout: Duration,
) -> Result<reqwest::blocking::Client, Error> {
    reqwest::blocking::ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|source| Error::Transport { url: String::new(), source })
}

/// Strips trailing slashes and a trailing version segment (`/v1`, `/v2.0`)
/// so that paths can be appended uniformly.
fn normalize_endpoint(endpoint: &str, version: &str) -> Result<String, Error> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(version).unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(Error::Endpoint(endpoint.to_string()));
    }
    Ok(trimmed.to_string())
}

fn send(req: RequestBuilder, url: &str) -> Result<Response, Error> {
    let response = req
        .send()
        .map_err(|source| Error::Transport { url: url.to_string(), source })?;
    let status = response.status();
    trace!(%url, %status, "response");
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .map_err(|source| Error::Transport { url: url.to_string(), source })?;
    let err = Error::from_response(status.as_u16(), &body);
    debug!(%url, %status, error = %err, "request failed");
    Err(err)
}

fn decode<T: DeserializeOwned>(
    response: Response,
    url: String,
) -> Result<T, Error> {
    let body = response
        .text()
        .map_err(|source| Error::Transport { url: url.clone(), source })?;
    serde_json::from_str(&body).map_err(|source| Error::Decode { url, source })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoints_are_normalized() {
        assert_eq!(
            normalize_endpoint("http://10.0.0.1:6385/v1/", "/v1").unwrap(),
            "http://10.0.0.1:6385"
        );
        assert_eq!(
            normalize_endpoint("https://ironic.example/", "/v1").unwrap(),
            "https://ironic.example"
        );
        assert_eq!(
            normalize_endpoint("http://neutron:9696/v2.0", "/v2.0").unwrap(),
            "http://neutron:9696"
        );
    }

    #[test]
    fn endpoint_without_scheme_is_rejected() {
        let err = normalize_endpoint("10.0.0.1:6385", "/v1").unwrap_err();
        assert!(matches!(err, Error::Endpoint(_)));
    }
}
