// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-shot patching of the configured handler.
//!
//! Nothing in here fails the host: every problem ends in [`Activation::Skipped`] with a log
//! line, and the module keeps its original export.

use crate::config::ActivationConfig;
use crate::error::ResolveError;
use crate::handler::{Handler, Module};
use crate::instrumentor::Instrumentor;
use crate::resolver::{self, ModuleLoader};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotEnabled,
    MissingTaskRoot,
    MissingHandler,
    Resolution(ResolveError),
    AlreadyActivated,
}

/// The module export replaced by the gate.
#[derive(Clone)]
pub struct PatchedHandler {
    pub module: Arc<Module>,
    pub module_path: String,
    pub export_name: String,
    pub original: Handler,
    pub proxy: Handler,
}

impl Debug for PatchedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchedHandler")
            .field("module_path", &self.module_path)
            .field("export_name", &self.export_name)
            .field("original", &self.original)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Activation {
    Skipped(SkipReason),
    Patched(PatchedHandler),
}

impl Activation {
    pub fn is_patched(&self) -> bool {
        matches!(self, Activation::Patched(_))
    }

    pub fn patched(&self) -> Option<&PatchedHandler> {
        match self {
            Activation::Patched(patched) => Some(patched),
            Activation::Skipped(_) => None,
        }
    }
}

pub struct ActivationGate {
    loader: Arc<dyn ModuleLoader>,
    instrumentor: Instrumentor,
    activated: AtomicBool,
}

impl ActivationGate {
    pub fn new(loader: Arc<dyn ModuleLoader>, instrumentor: Instrumentor) -> Self {
        Self {
            loader,
            instrumentor,
            activated: AtomicBool::new(false),
        }
    }

    /// Resolves and wraps the configured handler, at most once per gate.
    pub fn activate_if_enabled(&self, config: &ActivationConfig) -> Activation {
        if !config.enabled {
            debug!("Dynamic patching not enabled, leaving handler as is");
            return Activation::Skipped(SkipReason::NotEnabled);
        }

        if self.activated.swap(true, Ordering::SeqCst) {
            warn!("Handler already instrumented, ignoring repeated activation");
            return Activation::Skipped(SkipReason::AlreadyActivated);
        }

        let Some(task_root) = &config.task_root else {
            info!("LAMBDA_TASK_ROOT not set, cannot instrument handler");
            return Activation::Skipped(SkipReason::MissingTaskRoot);
        };
        let Some(specifier) = &config.handler else {
            info!("_HANDLER not set, cannot instrument handler");
            return Activation::Skipped(SkipReason::MissingHandler);
        };

        let resolved = match resolver::resolve(self.loader.as_ref(), task_root, specifier) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Failed to instrument handler {}: {}", specifier, e);
                return Activation::Skipped(SkipReason::Resolution(e));
            }
        };

        let proxy = self.instrumentor.wrap(resolved.target.clone());
        resolved
            .module
            .set_export(&resolved.export_name, proxy.clone());
        info!("Handler {} instrumented", specifier);

        Activation::Patched(PatchedHandler {
            module: resolved.module,
            module_path: resolved.module_path,
            export_name: resolved.export_name,
            original: resolved.target,
            proxy,
        })
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }
}

impl Debug for ActivationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationGate")
            .field("instrumentor", &self.instrumentor)
            .field("activated", &self.is_activated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::LambdaContext;
    use crate::resolver::StaticModuleLoader;
    use lambda_metrics::labels::InstanceLabels;
    use lambda_metrics::registry::{LambdaMetrics, MetricsOptions};
    use serde_json::json;
    use std::path::PathBuf;
    use tracing_test::traced_test;

    fn gate() -> (ActivationGate, Arc<StaticModuleLoader>, Arc<Module>) {
        let loader = Arc::new(StaticModuleLoader::new());
        let module = loader.register(
            "/var/task",
            "index",
            Module::new().with_export("handler", Handler::sync(|_, _| Ok(json!({ "ok": true })))),
        );
        let metrics = LambdaMetrics::new(InstanceLabels::default(), MetricsOptions::default())
            .expect("failed to create metrics");
        let gate = ActivationGate::new(
            Arc::clone(&loader) as Arc<dyn ModuleLoader>,
            Instrumentor::new(Arc::new(metrics)),
        );
        (gate, loader, module)
    }

    fn enabled(handler: &str) -> ActivationConfig {
        ActivationConfig {
            enabled: true,
            task_root: Some(PathBuf::from("/var/task")),
            handler: Some(handler.to_string()),
        }
    }

    #[test]
    fn test_patches_export() {
        let (gate, _loader, module) = gate();
        let activation = gate.activate_if_enabled(&enabled("index.handler"));

        let patched = activation.patched().expect("should be patched");
        assert_eq!(patched.export_name, "handler");
        assert_eq!(patched.module_path, "index");

        let handler = module.handler("handler").expect("export is still callable");
        let _ = handler.invoke(json!({}), LambdaContext::default());
        assert_eq!(gate.instrumentor.metrics().invocation_count(), 1);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let (gate, _loader, module) = gate();
        let config = ActivationConfig {
            enabled: false,
            ..enabled("index.handler")
        };

        let activation = gate.activate_if_enabled(&config);
        assert!(matches!(
            activation,
            Activation::Skipped(SkipReason::NotEnabled)
        ));
        assert!(!gate.is_activated());

        let handler = module.handler("handler").expect("export is callable");
        let _ = handler.invoke(json!({}), LambdaContext::default());
        assert_eq!(gate.instrumentor.metrics().invocation_count(), 0);
    }

    #[test]
    #[traced_test]
    fn test_missing_environment() {
        let (gate, _loader, _module) = gate();
        let config = ActivationConfig {
            task_root: None,
            ..enabled("index.handler")
        };
        assert!(matches!(
            gate.activate_if_enabled(&config),
            Activation::Skipped(SkipReason::MissingTaskRoot)
        ));
        assert!(logs_contain("LAMBDA_TASK_ROOT not set"));

        let (gate, _loader, _module) = self::gate();
        let config = ActivationConfig {
            handler: None,
            ..enabled("index.handler")
        };
        assert!(matches!(
            gate.activate_if_enabled(&config),
            Activation::Skipped(SkipReason::MissingHandler)
        ));
        assert!(logs_contain("_HANDLER not set"));
    }

    #[test]
    #[traced_test]
    fn test_missing_export_leaves_module_untouched() {
        let (gate, _loader, module) = gate();
        let activation = gate.activate_if_enabled(&enabled("index.handler1"));

        let Activation::Skipped(SkipReason::Resolution(err)) = activation else {
            panic!("resolution should fail");
        };
        assert_eq!(
            err,
            ResolveError::NotCallable {
                module: "index".to_string(),
                export: "handler1".to_string(),
            }
        );
        assert_eq!(module.export_names(), vec!["handler".to_string()]);
        assert!(logs_contain("Failed to instrument handler index.handler1"));
    }

    #[test]
    fn test_malformed_and_unknown_module() {
        let (gate, _loader, _module) = gate();
        assert!(matches!(
            gate.activate_if_enabled(&enabled("index")),
            Activation::Skipped(SkipReason::Resolution(ResolveError::MalformedSpecifier(_)))
        ));

        let (gate, _loader, _module) = self::gate();
        assert!(matches!(
            gate.activate_if_enabled(&enabled("missing.handler")),
            Activation::Skipped(SkipReason::Resolution(ResolveError::ModuleLoad { .. }))
        ));
    }

    #[test]
    fn test_activates_once() {
        let (gate, _loader, module) = gate();
        assert!(gate.activate_if_enabled(&enabled("index.handler")).is_patched());
        assert!(matches!(
            gate.activate_if_enabled(&enabled("index.handler")),
            Activation::Skipped(SkipReason::AlreadyActivated)
        ));

        // wrapped only once
        let handler = module.handler("handler").expect("export is callable");
        let _ = handler.invoke(json!({}), LambdaContext::default());
        assert_eq!(gate.instrumentor.metrics().invocation_count(), 1);
    }
}
