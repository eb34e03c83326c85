// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the metrics registry and remote writer.

/// Failure to build or encode the metrics registry.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[source] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encoding(#[source] prometheus::Error),
    #[error("encoded metrics are not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// The configured remote write endpoint cannot be used.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid endpoint URL: {0}")]
    Parse(String),
    #[error("unsupported scheme '{0}', expected http or https")]
    Scheme(String),
    #[error("endpoint URL has no host")]
    MissingHost,
}

/// Delivering a snapshot to the collector failed.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("failed to build request: {0}")]
    Request(String),
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
}
