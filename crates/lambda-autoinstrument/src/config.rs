// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use lambda_metrics::labels::InstanceLabels;
use lambda_metrics::remote_writer::{
    RemoteWriteConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn is_valid_log_level(log_level: &str) -> bool {
    VALID_LOG_LEVELS.contains(&log_level)
}

/// `ASSERTS_METRICSTORE_HOST` holds a bare host name, served over https.
fn metricstore_url(host: String) -> String {
    if host.contains("://") {
        host
    } else {
        format!("https://{}", host.trim())
    }
}

/// Inputs of the activation gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationConfig {
    /// Only an explicit `true` enables patching.
    pub enabled: bool,
    pub task_root: Option<PathBuf>,
    pub handler: Option<String>,
}

/// Configuration of the auto-instrumentation agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub activation: ActivationConfig,
    pub remote_write: RemoteWriteConfig,
    /// Keeps the flush task from starting
    pub layer_disabled: bool,
    pub flush_interval: Duration,
    /// Upper bound for a single remote write request
    pub remote_write_timeout: Duration,
    pub log_level: String,
    /// Log every gathered snapshot at debug level
    pub debug_snapshots: bool,
    pub memory_limit_mb: Option<String>,
    pub labels: InstanceLabels,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            activation: ActivationConfig::default(),
            remote_write: RemoteWriteConfig::default(),
            layer_disabled: false,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            remote_write_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: "info".to_string(),
            debug_snapshots: false,
            memory_limit_mb: None,
            labels: InstanceLabels::default(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());
        let is_true = |key: &str| lookup(key).map(|val| val == "true").unwrap_or(false);
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|val| val.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let tenant_name = non_empty("ASSERTS_TENANT_NAME");
        let remote_write = RemoteWriteConfig {
            endpoint: non_empty("ASSERTS_REMOTE_WRITE_URL")
                .or_else(|| non_empty("ASSERTS_METRICSTORE_HOST").map(metricstore_url)),
            tenant_name: tenant_name.clone(),
            password: non_empty("ASSERTS_PASSWORD"),
        };

        Self {
            activation: ActivationConfig {
                enabled: is_true("ASSERTS_DYNAMIC_PATCHING"),
                task_root: non_empty("LAMBDA_TASK_ROOT").map(PathBuf::from),
                handler: non_empty("_HANDLER"),
            },
            remote_write,
            layer_disabled: is_true("ASSERTS_LAYER_DISABLED"),
            flush_interval: secs("ASSERTS_FLUSH_INTERVAL_SECS", DEFAULT_FLUSH_INTERVAL),
            remote_write_timeout: secs("ASSERTS_REMOTE_WRITE_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT),
            log_level: lookup("ASSERTS_LOG_LEVEL")
                .map(|val| val.trim().to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            debug_snapshots: is_true("DEBUG"),
            memory_limit_mb: non_empty("AWS_LAMBDA_FUNCTION_MEMORY_SIZE"),
            labels: InstanceLabels::from_lookup(&lookup).with_tenant(tenant_name),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush interval must be greater than 0".to_string(),
            ));
        }

        if self.remote_write_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "remote write timeout must be greater than 0".to_string(),
            ));
        }

        if !is_valid_log_level(&self.log_level) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
