// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested resource does not exist (HTTP 404, or an empty result
    /// for a lookup that must return exactly one resource).
    #[error("Not Found: {message}")]
    NotFound { message: String },

    /// The service refused the request as invalid (HTTP 400).
    #[error("Bad Request: {message}")]
    BadRequest { message: String },

    /// Any other non-success response.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid endpoint {0:?}")]
    Endpoint(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// The HTTP status the service answered with, if the error came from a
    /// response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::NotFound { .. } => Some(404),
            Error::BadRequest { .. } => Some(400),
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The service's error message, if the error came from a response.
    pub fn message(&self) -> Option<&str> {
        match self {
            Error::NotFound { message }
            | Error::BadRequest { message }
            | Error::Status { message, .. } => Some(message),
            _ => None,
        }
    }

    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        let message = fault_message(body);
        match status {
            400 => Error::BadRequest { message },
            404 => Error::NotFound { message },
            _ => Error::Status { status, message },
        }
    }
}

/// Extracts the human-readable fault string from an error response body.
///
/// The service wraps errors as `{"error_message": ...}`, where the inner value
/// is (depending on the service version) either a JSON document serialized
/// into a string or an object, carrying a `faultstring`. Bodies that do not
/// follow this shape are returned verbatim.
pub(crate) fn fault_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error_message: Value,
    }

    #[derive(Deserialize)]
    struct Fault {
        faultstring: String,
    }

    let Ok(envelope) = serde_json::from_str::<Envelope>(body) else {
        return body.trim().to_string();
    };

    match envelope.error_message {
        Value::String(inner) => serde_json::from_str::<Fault>(&inner)
            .map(|f| f.faultstring)
            .unwrap_or(inner),
        other => serde_json::from_value::<Fault>(other.clone())
            .map(|f| f.faultstring)
            .unwrap_or_else(|_| other.to_string()),
    }
}
