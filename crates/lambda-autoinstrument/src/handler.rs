// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Function entry points and the modules that export them.
//!
//! A handler is one of three shapes, fixed by how it was declared:
//!
//! - `(event, context)`: returns a [`HandlerOutput`], either an immediate result or a
//!   future that settles later.
//! - `(event, context, callback)`: reports completion by calling the [`Callback`].
//! - variadic: declares no fixed arity. It may be handed a callback and returns a
//!   [`HandlerOutput`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::oneshot;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<Value, HandlerError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

pub type EventContextFn = Arc<dyn Fn(Value, LambdaContext) -> HandlerOutput + Send + Sync>;
pub type EventContextCallbackFn = Arc<dyn Fn(Value, LambdaContext, Callback) + Send + Sync>;
pub type VariadicFn =
    Arc<dyn Fn(Value, LambdaContext, Option<Callback>) -> HandlerOutput + Send + Sync>;

/// Invocation metadata handed to the function next to its event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaContext {
    pub aws_request_id: String,
    pub function_name: String,
    pub function_version: String,
    pub invoked_function_arn: String,
    pub memory_limit_in_mb: Option<u32>,
    pub deadline_ms: Option<u64>,
}

/// What an `(event, context)` handler gives back.
pub enum HandlerOutput {
    Ready(HandlerResult),
    Pending(HandlerFuture),
}

impl HandlerOutput {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        HandlerOutput::Pending(Box::pin(future))
    }

    pub fn convention(&self) -> CallingConvention {
        match self {
            HandlerOutput::Ready(_) => CallingConvention::SyncReturn,
            HandlerOutput::Pending(_) => CallingConvention::PromiseReturn,
        }
    }

    /// Waits for the result, whichever way it is delivered.
    pub async fn settle(self) -> HandlerResult {
        match self {
            HandlerOutput::Ready(result) => result,
            HandlerOutput::Pending(future) => future.await,
        }
    }
}

impl Debug for HandlerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutput::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            HandlerOutput::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Completion callback of a callback-style handler.
pub struct Callback(Box<dyn FnOnce(HandlerResult) + Send>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(HandlerResult) + Send + 'static,
    {
        Callback(Box::new(f))
    }

    pub fn call(self, result: HandlerResult) {
        (self.0)(result)
    }
}

impl Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback")
    }
}

/// How a handler hands its result back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    SyncReturn,
    PromiseReturn,
    CallbackStyle,
}

impl CallingConvention {
    /// Picks the convention from the declared shape of the handler.
    ///
    /// `SyncReturn` and `PromiseReturn` share a shape; which of the two applies is only
    /// known once the handler returns, see [`HandlerOutput::convention`]. Handlers without
    /// a declared arity are treated as returning.
    pub fn detect(handler: &Handler) -> Self {
        match handler.declared_params() {
            Some(3) => CallingConvention::CallbackStyle,
            _ => CallingConvention::SyncReturn,
        }
    }
}

#[derive(Clone)]
pub enum Handler {
    EventContext(EventContextFn),
    EventContextCallback(EventContextCallbackFn),
    Variadic(VariadicFn),
}

impl Handler {
    /// A handler that completes before returning.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value, LambdaContext) -> HandlerResult + Send + Sync + 'static,
    {
        Handler::EventContext(Arc::new(move |event, context| {
            HandlerOutput::Ready(f(event, context))
        }))
    }

    /// A handler returning a future.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, LambdaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::EventContext(Arc::new(move |event, context| {
            HandlerOutput::pending(f(event, context))
        }))
    }

    /// A handler that decides per call whether to complete now or later.
    pub fn returning<F>(f: F) -> Self
    where
        F: Fn(Value, LambdaContext) -> HandlerOutput + Send + Sync + 'static,
    {
        Handler::EventContext(Arc::new(f))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Value, LambdaContext, Callback) + Send + Sync + 'static,
    {
        Handler::EventContextCallback(Arc::new(f))
    }

    pub fn variadic<F>(f: F) -> Self
    where
        F: Fn(Value, LambdaContext, Option<Callback>) -> HandlerOutput + Send + Sync + 'static,
    {
        Handler::Variadic(Arc::new(f))
    }

    /// Number of parameters the handler declares, `None` when variadic.
    pub fn declared_params(&self) -> Option<usize> {
        match self {
            Handler::EventContext(_) => Some(2),
            Handler::EventContextCallback(_) => Some(3),
            Handler::Variadic(_) => None,
        }
    }

    /// Calls the handler the way a runtime host would, whatever its convention.
    ///
    /// Callback-style handlers are given a callback that resolves the returned future.
    /// A handler that drops its callback without calling it resolves to an error.
    pub fn invoke(&self, event: Value, context: LambdaContext) -> HandlerOutput {
        match self {
            Handler::EventContext(f) => f(event, context),
            Handler::Variadic(f) => f(event, context, None),
            Handler::EventContextCallback(f) => {
                let (tx, rx) = oneshot::channel();
                f(
                    event,
                    context,
                    Callback::new(move |result| {
                        let _ = tx.send(result);
                    }),
                );
                HandlerOutput::pending(async move {
                    match rx.await {
                        Ok(result) => result,
                        Err(_) => Err("handler dropped its callback without calling it".into()),
                    }
                })
            }
        }
    }
}

impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::EventContext(_) => f.write_str("Handler(event, context)"),
            Handler::EventContextCallback(_) => f.write_str("Handler(event, context, callback)"),
            Handler::Variadic(_) => f.write_str("Handler(..)"),
        }
    }
}

/// A named member of a [`Module`].
#[derive(Debug, Clone)]
pub enum Export {
    Handler(Handler),
    Value(Value),
}

impl From<Handler> for Export {
    fn from(handler: Handler) -> Self {
        Export::Handler(handler)
    }
}

impl From<Value> for Export {
    fn from(value: Value) -> Self {
        Export::Value(value)
    }
}

/// A unit of function code with named exports.
///
/// Exports can be replaced after the module is shared, which is how the instrumented
/// proxy takes the place of the original entry point.
#[derive(Debug, Default)]
pub struct Module {
    exports: RwLock<HashMap<String, Export>>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_export(self, name: &str, export: impl Into<Export>) -> Self {
        self.set_export(name, export);
        self
    }

    pub fn export(&self, name: &str) -> Option<Export> {
        self.exports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// The export as a handler, `None` if it is missing or not callable.
    pub fn handler(&self, name: &str) -> Option<Handler> {
        match self.export(name)? {
            Export::Handler(handler) => Some(handler),
            Export::Value(_) => None,
        }
    }

    /// Replaces an export, returning the previous one.
    pub fn set_export(&self, name: &str, export: impl Into<Export>) -> Option<Export> {
        self.exports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), export.into())
    }

    pub fn export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .exports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_params() {
        assert_eq!(Handler::sync(|_, _| Ok(json!(null))).declared_params(), Some(2));
        assert_eq!(
            Handler::future(|_, _| async { Ok(json!(null)) }).declared_params(),
            Some(2)
        );
        assert_eq!(
            Handler::callback(|_, _, cb| cb.call(Ok(json!(null)))).declared_params(),
            Some(3)
        );
        assert_eq!(
            Handler::variadic(|_, _, _| HandlerOutput::Ready(Ok(json!(null)))).declared_params(),
            None
        );
    }

    #[test]
    fn test_detect_convention() {
        let callback = Handler::callback(|_, _, cb| cb.call(Ok(json!(1))));
        assert_eq!(
            CallingConvention::detect(&callback),
            CallingConvention::CallbackStyle
        );

        let variadic = Handler::variadic(|_, _, _| HandlerOutput::Ready(Ok(json!(1))));
        assert_eq!(
            CallingConvention::detect(&variadic),
            CallingConvention::SyncReturn
        );
    }

    #[test]
    fn test_output_convention() {
        assert_eq!(
            HandlerOutput::Ready(Ok(json!(1))).convention(),
            CallingConvention::SyncReturn
        );
        assert_eq!(
            HandlerOutput::pending(async { Ok(json!(1)) }).convention(),
            CallingConvention::PromiseReturn
        );
    }

    #[tokio::test]
    async fn test_invoke_callback_handler() {
        let handler = Handler::callback(|event, _, cb| cb.call(Ok(json!({ "echo": event }))));
        let result = handler
            .invoke(json!("hi"), LambdaContext::default())
            .settle()
            .await
            .expect("handler should succeed");
        assert_eq!(result, json!({ "echo": "hi" }));
    }

    #[tokio::test]
    async fn test_invoke_callback_handler_dropping_callback() {
        let handler = Handler::callback(|_, _, cb| drop(cb));
        let result = handler
            .invoke(json!(null), LambdaContext::default())
            .settle()
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_module_exports() {
        let module = Module::new()
            .with_export("handler", Handler::sync(|_, _| Ok(json!(1))))
            .with_export("config", json!({ "retries": 3 }));

        assert!(module.handler("handler").is_some());
        assert!(module.handler("config").is_none());
        assert!(module.handler("missing").is_none());
        assert_eq!(module.export_names(), vec!["config", "handler"]);

        let previous = module.set_export("handler", json!("replaced"));
        assert!(matches!(previous, Some(Export::Handler(_))));
        assert!(module.handler("handler").is_none());
    }

    #[test]
    fn test_context_deserializes_from_runtime_json() {
        let context: LambdaContext = serde_json::from_value(json!({
            "awsRequestId": "8476a536-e9f4-11e8-9739-2dfe598c3fcd",
            "functionName": "OrderProcessor",
            "functionVersion": "1",
            "invokedFunctionArn": "arn:aws:lambda:us-east-2:123456789012:function:OrderProcessor",
            "memoryLimitInMb": 128
        }))
        .expect("context should deserialize");
        assert_eq!(context.function_name, "OrderProcessor");
        assert_eq!(context.memory_limit_in_mb, Some(128));
        assert_eq!(context.deadline_ms, None);
    }
}
