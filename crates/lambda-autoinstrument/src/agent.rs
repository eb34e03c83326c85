// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The long-lived context of an instrumented function instance.

use crate::activation::{Activation, ActivationGate};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::handler::Handler;
use crate::instrumentor::Instrumentor;
use crate::logger;
use crate::resolver::ModuleLoader;
use lambda_metrics::registry::{LambdaMetrics, MetricsOptions, SnapshotSource};
use lambda_metrics::remote_writer::{
    FlushOutcome, RemoteWriter, RemoteWriterConfig, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT,
};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

static AGENT: OnceLock<Agent> = OnceLock::new();

#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    metrics: Arc<LambdaMetrics>,
    instrumentor: Instrumentor,
    gate: ActivationGate,
    activation: Activation,
    remote_writer: Arc<RemoteWriter>,
}

impl Agent {
    /// Builds the registry, patches the configured handler and starts the remote writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bootstrap(
        config: AgentConfig,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Agent, AgentError> {
        let config = sanitize(config);

        let metrics = Arc::new(LambdaMetrics::new(
            config.labels.clone(),
            MetricsOptions {
                memory_limit_mb: config.memory_limit_mb.clone(),
                debug_snapshots: config.debug_snapshots,
            },
        )?);
        let instrumentor = Instrumentor::new(Arc::clone(&metrics));

        let gate = ActivationGate::new(loader, instrumentor.clone());
        let activation = gate.activate_if_enabled(&config.activation);
        debug!("Activation result: {:?}", activation);

        let remote_writer = RemoteWriter::start(RemoteWriterConfig {
            remote_write: config.remote_write.clone(),
            source: Arc::clone(&metrics) as Arc<dyn SnapshotSource>,
            flush_interval: config.flush_interval,
            timeout: config.remote_write_timeout,
            layer_disabled: config.layer_disabled,
        });

        Ok(Agent {
            config,
            metrics,
            instrumentor,
            gate,
            activation,
            remote_writer,
        })
    }

    /// Reads the environment, sets up logging and installs the process-wide agent.
    pub fn start_from_env(loader: Arc<dyn ModuleLoader>) -> Result<&'static Agent, AgentError> {
        let config = AgentConfig::from_env();
        logger::init(&config.log_level);
        Agent::install(Agent::bootstrap(config, loader)?)
    }

    /// Makes `agent` the process-wide agent. Only the first install succeeds.
    pub fn install(agent: Agent) -> Result<&'static Agent, AgentError> {
        AGENT
            .set(agent)
            .map_err(|_| AgentError::AlreadyInstalled)?;
        AGENT.get().ok_or(AgentError::AlreadyInstalled)
    }

    pub fn global() -> Option<&'static Agent> {
        AGENT.get()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<LambdaMetrics> {
        &self.metrics
    }

    pub fn instrumentor(&self) -> &Instrumentor {
        &self.instrumentor
    }

    pub fn activation_gate(&self) -> &ActivationGate {
        &self.gate
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    pub fn remote_writer(&self) -> &Arc<RemoteWriter> {
        &self.remote_writer
    }

    /// The instrumented proxy, if the handler was patched.
    pub fn handler(&self) -> Option<Handler> {
        self.activation
            .patched()
            .map(|patched| patched.proxy.clone())
    }

    /// Sends a last snapshot, then stops the remote writer for good.
    pub async fn shutdown(&self) -> FlushOutcome {
        let outcome = self.remote_writer.flush().await;
        self.remote_writer.cancel();
        outcome
    }
}

fn sanitize(config: AgentConfig) -> AgentConfig {
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            error!("{}, using default timings and log level", e);
            AgentConfig {
                flush_interval: DEFAULT_FLUSH_INTERVAL,
                remote_write_timeout: DEFAULT_REQUEST_TIMEOUT,
                log_level: "info".to_string(),
                ..config
            }
        }
    }
}
