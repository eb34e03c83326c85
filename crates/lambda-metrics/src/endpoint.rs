// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::EndpointError;
use reqwest::Url;

/// Import path of the collector used when the configured URL has none.
pub const DEFAULT_IMPORT_PATH: &str = "/api/v1/import/prometheus";

/// Where snapshots are delivered, resolved from the configured URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    secure: bool,
    host: String,
    port: u16,
    path: String,
}

impl RemoteEndpoint {
    pub fn parse(endpoint: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(endpoint.trim()).map_err(|e| EndpointError::Parse(e.to_string()))?;

        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(EndpointError::Scheme(other.to_string())),
        };
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(EndpointError::MissingHost),
        };
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });
        let path = match url.path() {
            "" | "/" => DEFAULT_IMPORT_PATH.to_string(),
            path => match url.query() {
                Some(query) => format!("{path}?{query}"),
                None => path.to_string(),
            },
        };

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The URL the POST request is sent to.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}
