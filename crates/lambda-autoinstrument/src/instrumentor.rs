// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Behavior-preserving proxies around function entry points.
//!
//! A proxy counts the invocation before the target runs, then observes the latency and,
//! on failure, counts the error once the target completes. Completion is whatever the
//! target's convention says it is: the return value, the settled future, or the callback.
//! Results and errors are handed back untouched, through the same channel.

use crate::handler::{Callback, CallingConvention, Handler, HandlerOutput, HandlerResult};
use lambda_metrics::registry::LambdaMetrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Instrumentor {
    metrics: Arc<LambdaMetrics>,
}

impl Instrumentor {
    pub fn new(metrics: Arc<LambdaMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<LambdaMetrics> {
        &self.metrics
    }

    /// Returns a proxy with the same shape as `target`.
    pub fn wrap(&self, target: Handler) -> Handler {
        if self.metrics.record_cold_start() {
            debug!("Recorded cold start");
        }

        let convention = CallingConvention::detect(&target);
        debug!("Wrapping {:?} as {:?}", target, convention);

        let metrics = Arc::clone(&self.metrics);
        match target {
            Handler::EventContext(f) => Handler::EventContext(Arc::new(move |event, context| {
                let invocation = Invocation::start(&metrics);
                invocation.track(f(event, context))
            })),
            // Arity unknown: handled as returning. A callback given by the caller is passed
            // through as is.
            Handler::Variadic(f) => Handler::Variadic(Arc::new(move |event, context, callback| {
                let invocation = Invocation::start(&metrics);
                invocation.track(f(event, context, callback))
            })),
            Handler::EventContextCallback(f) => {
                Handler::EventContextCallback(Arc::new(move |event, context, callback| {
                    let invocation = Invocation::start(&metrics);
                    f(
                        event,
                        context,
                        Callback::new(move |result| {
                            invocation.finish(&result);
                            callback.call(result);
                        }),
                    )
                }))
            }
        }
    }
}

/// One in-flight call of a proxied handler.
struct Invocation {
    metrics: Arc<LambdaMetrics>,
    start: Instant,
}

impl Invocation {
    fn start(metrics: &Arc<LambdaMetrics>) -> Self {
        let start = Instant::now();
        metrics.record_invocation();
        Self {
            metrics: Arc::clone(metrics),
            start,
        }
    }

    fn track(self, output: HandlerOutput) -> HandlerOutput {
        match output {
            HandlerOutput::Ready(result) => {
                self.finish(&result);
                HandlerOutput::Ready(result)
            }
            HandlerOutput::Pending(future) => HandlerOutput::pending(async move {
                let result = future.await;
                self.finish(&result);
                result
            }),
        }
    }

    fn finish(self, result: &HandlerResult) {
        if result.is_err() {
            self.metrics.record_error();
        }
        self.metrics
            .record_latency(self.start.elapsed().as_secs_f64());
    }
}
