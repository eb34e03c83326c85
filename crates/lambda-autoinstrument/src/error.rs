// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Why a handler specifier could not be turned into a callable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Malformed handler specifier '{0}', expected <module>.<export>")]
    MalformedSpecifier(String),

    #[error("Failed to load module '{module}': {reason}")]
    ModuleLoad { module: String, reason: String },

    #[error("Export '{export}' of module '{module}' is missing or not callable")]
    NotCallable { module: String, export: String },
}

/// Configuration values that cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that keep the agent from being built.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Failed to create metrics registry: {0}")]
    Metrics(#[from] lambda_metrics::errors::MetricsError),

    #[error("Agent already installed")]
    AlreadyInstalled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ResolveError::MalformedSpecifier("index".to_string());
        assert_eq!(
            error.to_string(),
            "Malformed handler specifier 'index', expected <module>.<export>"
        );

        let error = ResolveError::NotCallable {
            module: "index".to_string(),
            export: "handler1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Export 'handler1' of module 'index' is missing or not callable"
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Invalid("flush interval must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: flush interval must be greater than 0"
        );
    }
}
