// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keystone v3 password authentication and service catalog lookup.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::Error;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Credentials for a project-scoped Keystone v3 password login.
#[derive(Clone, Debug)]
pub struct PasswordCredentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub user_domain_name: String,
    pub project_domain_name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,
    pub url: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

/// An issued token together with the catalog it was issued with.
#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub catalog: Vec<CatalogEntry>,
}

impl Session {
    /// Finds the URL of `service_type` for the given interface (`public`,
    /// `internal`, `admin`), optionally restricted to one region.
    pub fn endpoint(
        &self,
        service_type: &str,
        interface: &str,
        region: Option<&str>,
    ) -> Option<&str> {
        self.catalog
            .iter()
            .filter(|entry| entry.service_type == service_type)
            .flat_map(|entry| entry.endpoints.iter())
            .find(|ep| {
                ep.interface == interface
                    && region.map_or(true, |r| ep.region.as_deref() == Some(r))
            })
            .map(|ep| ep.url.as_str())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

/// Logs in to Keystone and returns the resulting session.
pub fn authenticate(
    http: &reqwest::blocking::Client,
    creds: &PasswordCredentials,
) -> Result<Session, Error> {
    let url = format!("{}/auth/tokens", identity_v3_root(&creds.auth_url));
    info!(%url, username = %creds.username, project = %creds.project_name,
          "Requesting Keystone token");

    let body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": creds.username,
                        "domain": { "name": creds.user_domain_name },
                        "password": creds.password,
                    }
                }
            },
            "scope": {
                "project": {
                    "name": creds.project_name,
                    "domain": { "name": creds.project_domain_name },
                }
            }
        }
    });

    let response = http
        .post(&url)
        .json(&body)
        .send()
        .map_err(|source| Error::Transport { url: url.clone(), source })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().unwrap_or_default();
        return Err(Error::Auth(format!("{}: {}", status, text.trim())));
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| {
            Error::Auth(format!("response lacks {SUBJECT_TOKEN_HEADER}"))
        })?;

    let text = response
        .text()
        .map_err(|source| Error::Transport { url: url.clone(), source })?;
    let parsed: TokenResponse = serde_json::from_str(&text)
        .map_err(|source| Error::Decode { url, source })?;

    debug!(services = parsed.token.catalog.len(), "Keystone token issued");
    Ok(Session { token, catalog: parsed.token.catalog })
}

/// Normalizes an `auth_url` as found in `clouds.yaml`, which may or may not
/// include the `/v3` suffix.
fn identity_v3_root(auth_url: &str) -> String {
    let trimmed = auth_url.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v3")
    }
}
