// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide registry holding the invocation series of a function instance.

use crate::errors::MetricsError;
use crate::labels::InstanceLabels;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

pub const UP: &str = "up";
pub const INVOCATIONS: &str = "aws_lambda_invocations_total";
pub const ERRORS: &str = "aws_lambda_errors_total";
pub const DURATION: &str = "aws_lambda_duration_seconds";
pub const COLD_START: &str = "aws_lambda_cold_start";
pub const MEMORY_LIMIT: &str = "aws_lambda_memory_limit_mb";
pub const LAYER_INFO: &str = "aws_lambda_layer_info";

/// Anything able to produce a text snapshot of its current metric values.
///
/// `None` means the source is not ready to be exported yet.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> Option<String>;
}

/// Optional knobs for [`LambdaMetrics`].
#[derive(Debug, Clone, Default)]
pub struct MetricsOptions {
    /// Configured memory size of the function, in MB, as read from the environment.
    pub memory_limit_mb: Option<String>,
    /// Log every gathered snapshot.
    pub debug_snapshots: bool,
}

pub struct LambdaMetrics {
    labels: InstanceLabels,
    registry: Registry,
    up: Gauge,
    invocations: Counter,
    errors: Counter,
    latency: Histogram,
    cold_start: Gauge,
    memory_limit_mb: Gauge,
    cold_start_recorded: AtomicBool,
    options: MetricsOptions,
}

impl LambdaMetrics {
    pub fn new(labels: InstanceLabels, options: MetricsOptions) -> Result<Self, MetricsError> {
        let registry = Registry::new_custom(None, Some(labels.to_const_labels()))
            .map_err(MetricsError::Registration)?;

        let up = Gauge::with_opts(Opts::new(UP, "Heartbeat metric"))
            .map_err(MetricsError::Registration)?;
        let invocations = Counter::with_opts(Opts::new(INVOCATIONS, "AWS Lambda Invocations Count"))
            .map_err(MetricsError::Registration)?;
        let errors = Counter::with_opts(Opts::new(ERRORS, "AWS Lambda Errors Count"))
            .map_err(MetricsError::Registration)?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            DURATION,
            "AWS Lambda Duration Histogram",
        ))
        .map_err(MetricsError::Registration)?;
        let cold_start = Gauge::with_opts(Opts::new(COLD_START, "AWS Lambda Cold Start"))
            .map_err(MetricsError::Registration)?;
        let memory_limit_mb =
            Gauge::with_opts(Opts::new(MEMORY_LIMIT, "AWS Lambda Memory Limit in MB"))
                .map_err(MetricsError::Registration)?;
        let layer_info = Gauge::with_opts(
            Opts::new(LAYER_INFO, "AWS Lambda Layer Build Info")
                .const_label("layer_version", env!("CARGO_PKG_VERSION")),
        )
        .map_err(MetricsError::Registration)?;
        layer_info.set(1.0);

        registry
            .register(Box::new(up.clone()))
            .and_then(|()| registry.register(Box::new(invocations.clone())))
            .and_then(|()| registry.register(Box::new(errors.clone())))
            .and_then(|()| registry.register(Box::new(latency.clone())))
            .and_then(|()| registry.register(Box::new(cold_start.clone())))
            .and_then(|()| registry.register(Box::new(memory_limit_mb.clone())))
            .and_then(|()| registry.register(Box::new(layer_info)))
            .map_err(MetricsError::Registration)?;

        Ok(Self {
            labels,
            registry,
            up,
            invocations,
            errors,
            latency,
            cold_start,
            memory_limit_mb,
            cold_start_recorded: AtomicBool::new(false),
            options,
        })
    }

    pub fn labels(&self) -> &InstanceLabels {
        &self.labels
    }

    pub fn record_invocation(&self) {
        self.invocations.inc();
    }

    pub fn record_error(&self) {
        self.errors.inc();
    }

    /// Observes an invocation duration, in seconds.
    pub fn record_latency(&self, seconds: f64) {
        self.latency.observe(seconds);
    }

    /// Sets the cold start gauge. Returns `true` only for the first call.
    pub fn record_cold_start(&self) -> bool {
        if self.cold_start_recorded.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cold_start.set(1.0);
        true
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocations.get() as u64
    }

    pub fn error_count(&self) -> u64 {
        self.errors.get() as u64
    }

    pub fn latency_sample_count(&self) -> u64 {
        self.latency.get_sample_count()
    }

    pub fn cold_start_value(&self) -> f64 {
        self.cold_start.get()
    }

    fn record_latest_memory_limit(&self) {
        if let Some(memory) = self.options.memory_limit_mb.as_deref() {
            match memory.trim().parse::<f64>() {
                Ok(limit) => self.memory_limit_mb.set(limit),
                Err(_) => debug!("Ignoring unparseable memory size '{}'", memory),
            }
        }
    }

    /// Encodes every registered series in the text exposition format.
    ///
    /// Returns `Ok(None)` while the function name or version is unknown.
    pub fn gather_text(&self) -> Result<Option<String>, MetricsError> {
        self.record_latest_memory_limit();
        if !self.labels.is_name_and_version_set() {
            return Ok(None);
        }

        self.up.set(1.0);
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(MetricsError::Encoding)?;
        let text = String::from_utf8(buffer)?;
        if self.options.debug_snapshots {
            debug!("Gathered metrics:\n{}", text);
        }
        Ok(Some(text))
    }
}

impl SnapshotSource for LambdaMetrics {
    fn snapshot(&self) -> Option<String> {
        match self.gather_text() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to gather metrics: {}", e);
                None
            }
        }
    }
}

impl std::fmt::Debug for LambdaMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaMetrics")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}
