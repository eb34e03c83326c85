// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Auto-instrumentation of a Lambda function entry point.
//!
//! At startup the [`agent::Agent`] resolves the handler named by `_HANDLER` under
//! `LAMBDA_TASK_ROOT`, swaps the module export for a metric-recording proxy and starts the
//! remote writer that periodically pushes the metrics to the configured collector.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod activation;
pub mod agent;
pub mod config;
pub mod error;
pub mod handler;
pub mod instrumentor;
pub mod logger;
pub mod resolver;

pub use agent::Agent;
pub use handler::{Callback, Handler, HandlerOutput, LambdaContext, Module};
pub use resolver::StaticModuleLoader;
