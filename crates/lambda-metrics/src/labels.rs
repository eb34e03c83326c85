// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identity labels attached to every series exported by a function instance.

use std::collections::{BTreeMap, HashMap};
use std::env;
use tracing::warn;

const NAMESPACE: &str = "AWS/Lambda";
const SOURCE: &str = "prometheus";
const RUNTIME: &str = "rust";

/// Labels describing the function instance that produced a snapshot.
///
/// `function_name` and `version` identify the function and must both be known before a
/// snapshot is produced. All other labels are optional and omitted when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceLabels {
    pub function_name: Option<String>,
    pub version: Option<String>,
    pub region: Option<String>,
    pub site: Option<String>,
    pub account_id: Option<String>,
    pub environment: Option<String>,
    pub tenant: Option<String>,
    pub instance: String,
}

impl InstanceLabels {
    /// Reads the instance labels from the Lambda environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the labels from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        let region = non_empty("AWS_REGION").map(|region| map_region_code(&region));
        let site = non_empty("ASSERTS_SITE").or_else(|| region.clone());
        let account_id = non_empty("ACCOUNT_ID");
        let environment = non_empty("ASSERTS_ENVIRONMENT").or_else(|| account_id.clone());

        Self {
            function_name: non_empty("AWS_LAMBDA_FUNCTION_NAME"),
            version: non_empty("AWS_LAMBDA_FUNCTION_VERSION"),
            region,
            site,
            account_id,
            environment,
            tenant: non_empty("ASSERTS_TENANT_NAME"),
            instance: format!("{}:{}", hostname(), std::process::id()),
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: Option<String>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Whether the function identity is known.
    pub fn is_name_and_version_set(&self) -> bool {
        self.function_name.is_some() && self.version.is_some()
    }

    /// The label set as name/value pairs, absent labels omitted.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("asserts_source".to_string(), SOURCE.to_string());
        labels.insert("namespace".to_string(), NAMESPACE.to_string());
        labels.insert("runtime".to_string(), RUNTIME.to_string());
        labels.insert("instance".to_string(), self.instance.clone());

        let mut insert = |name: &str, value: &Option<String>| {
            if let Some(value) = value {
                labels.insert(name.to_string(), value.clone());
            }
        };
        insert("function_name", &self.function_name);
        insert("job", &self.function_name);
        insert("version", &self.version);
        insert("region", &self.region);
        insert("asserts_site", &self.site);
        insert("account_id", &self.account_id);
        insert("asserts_env", &self.environment);
        insert("tenant", &self.tenant);
        insert("asserts_tenant", &self.tenant);
        labels
    }

    pub(crate) fn to_const_labels(&self) -> HashMap<String, String> {
        self.to_map().into_iter().collect()
    }
}

/// Expands the compact region codes some deployments export into AWS region names.
pub fn map_region_code(region: &str) -> String {
    match region {
        "uswest1" => "us-west-1",
        "uswest2" => "us-west-2",
        "useast1" => "us-east-1",
        "useast2" => "us-east-2",
        other => other,
    }
    .to_string()
}

fn hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str() {
                if !hostname.is_empty() {
                    return hostname.to_string();
                }
            }
        }
        Err(e) => warn!("Failed to get system hostname: {}", e),
    }

    "unknown".to_string()
}
