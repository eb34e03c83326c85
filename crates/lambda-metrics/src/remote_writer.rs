// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::endpoint::RemoteEndpoint;
use crate::errors::ShippingError;
use crate::registry::SnapshotSource;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and as whom snapshots are written.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RemoteWriteConfig {
    pub endpoint: Option<String>,
    pub tenant_name: Option<String>,
    pub password: Option<String>,
}

impl RemoteWriteConfig {
    /// The parsed endpoint, if one is configured and usable.
    pub fn parsed_endpoint(&self) -> Option<RemoteEndpoint> {
        let endpoint = self.endpoint.as_deref()?;
        match RemoteEndpoint::parse(endpoint) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!("Ignoring remote write endpoint '{}': {}", endpoint, e);
                None
            }
        }
    }
}

impl Debug for RemoteWriteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWriteConfig")
            .field("endpoint", &self.endpoint)
            .field("tenant_name", &self.tenant_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub struct RemoteWriterConfig {
    pub remote_write: RemoteWriteConfig,
    pub source: Arc<dyn SnapshotSource>,
    pub flush_interval: Duration,
    pub timeout: Duration,
    /// Keeps the tick task from starting even when the endpoint is usable.
    pub layer_disabled: bool,
}

/// Result of a single flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No usable endpoint, or the writer was cancelled.
    Disabled,
    /// The snapshot source is not ready yet.
    NotReady,
    Delivered(StatusCode),
    Rejected(StatusCode),
    /// The request never got a response.
    Failed,
}

/// Periodically pushes the snapshot of a [`SnapshotSource`] to a remote collector.
pub struct RemoteWriter {
    remote_write: RemoteWriteConfig,
    endpoint: Option<RemoteEndpoint>,
    source: Arc<dyn SnapshotSource>,
    client: reqwest::Client,
    flush_interval: Duration,
    layer_disabled: bool,
    cancel_token: CancellationToken,
    timer_started: AtomicBool,
}

impl RemoteWriter {
    /// Builds the writer without starting its tick task.
    pub fn new(config: RemoteWriterConfig) -> Self {
        let endpoint = config.remote_write.parsed_endpoint();
        RemoteWriter {
            client: build_client(config.timeout),
            remote_write: config.remote_write,
            endpoint,
            source: config.source,
            flush_interval: config.flush_interval,
            layer_disabled: config.layer_disabled,
            cancel_token: CancellationToken::new(),
            timer_started: AtomicBool::new(false),
        }
    }

    /// Builds the writer and, if it is on, starts flushing on every tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: RemoteWriterConfig) -> Arc<Self> {
        let writer = Arc::new(Self::new(config));
        if writer.layer_disabled {
            info!("Layer disabled, not starting the metric flush task");
        } else if writer.is_remote_writing_on() {
            writer.spawn_ticker();
        } else {
            info!(
                "Remote write configuration incomplete, not starting the metric flush task: {:?}",
                writer.remote_write
            );
        }
        writer
    }

    fn spawn_ticker(self: &Arc<Self>) {
        if self.timer_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let writer = Arc::clone(self);
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            let mut flush_interval = interval(writer.flush_interval);
            flush_interval.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Metric flush task stopped");
                        break;
                    }
                    _ = flush_interval.tick() => {
                        debug!("Timer task flushing metrics");
                        // Each flush runs on its own so a slow collector never delays the next tick
                        let writer = Arc::clone(&writer);
                        tokio::spawn(async move {
                            writer.flush().await;
                        });
                    }
                }
            }
        });
        info!(
            "Registered metric flush task with timer at {} seconds interval",
            self.flush_interval.as_secs()
        );
    }

    pub fn remote_write_config(&self) -> &RemoteWriteConfig {
        &self.remote_write
    }

    pub fn endpoint(&self) -> Option<&RemoteEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_remote_writing_on(&self) -> bool {
        self.endpoint.is_some() && !self.is_cancelled()
    }

    pub fn is_timer_started(&self) -> bool {
        self.timer_started.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Stops the tick task for good. Flushes already in flight run to completion.
    pub fn cancel(&self) {
        if !self.cancel_token.is_cancelled() {
            debug!("Cancelling remote writer");
        }
        self.cancel_token.cancel();
    }

    /// Sends the current snapshot, if there is one, to the remote endpoint.
    pub async fn flush(&self) -> FlushOutcome {
        let endpoint = match (&self.endpoint, self.is_cancelled()) {
            (Some(endpoint), false) => endpoint,
            _ => {
                info!(
                    "Remote write configuration incomplete or cancelled: {:?}",
                    self.remote_write
                );
                return FlushOutcome::Disabled;
            }
        };

        let snapshot = match self.source.snapshot() {
            Some(snapshot) => snapshot,
            None => {
                info!("Function name and version not known yet");
                return FlushOutcome::NotReady;
            }
        };

        match self.ship_snapshot(endpoint, snapshot).await {
            Ok(response) => handle_response(response).await,
            Err(e) => {
                error!("POST of metrics to {} resulted in an error: {}", endpoint.url(), e);
                FlushOutcome::Failed
            }
        }
    }

    async fn ship_snapshot(
        &self,
        endpoint: &RemoteEndpoint,
        snapshot: String,
    ) -> Result<Response, ShippingError> {
        let body_len = snapshot.len();
        let mut request = self
            .client
            .post(endpoint.url())
            .header(CONTENT_TYPE, "text/plain")
            .header(CONTENT_LENGTH, body_len)
            .body(snapshot);

        if let Some(password) = &self.remote_write.password {
            let tenant = self.remote_write.tenant_name.as_deref().unwrap_or_default();
            request = request.basic_auth(tenant, Some(password));
        }

        debug!("Flushing {} bytes of metrics to {}", body_len, endpoint.url());
        request.send().await.map_err(ShippingError::Transport)
    }
}

impl Debug for RemoteWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWriter")
            .field("remote_write", &self.remote_write)
            .field("flush_interval", &self.flush_interval)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn handle_response(response: Response) -> FlushOutcome {
    let status = response.status();
    let headers = format!("{:?}", response.headers());
    let body = response.text().await.unwrap_or_default();

    if status.is_client_error() {
        error!(
            "{}: remote write rejected the metrics, headers: {}, body: {:?}",
            status, headers, body
        );
        FlushOutcome::Rejected(status)
    } else if status.is_server_error() {
        warn!("{}: remote write failed: {:?}", status, body);
        FlushOutcome::Rejected(status)
    } else {
        debug!("{}: flushed metrics to remote", status);
        FlushOutcome::Delivered(status)
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}, using reqwest defaults", e);
            reqwest::Client::new()
        }
    }
}
