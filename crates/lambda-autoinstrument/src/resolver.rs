// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a `<module>.<export>` handler string into the function it names.

use crate::error::ResolveError;
use crate::handler::{Handler, Module};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A parsed `<module>.<export>` handler string.
///
/// The module part may contain directories (`src/app.handler`). The split happens on the
/// last `.` of the final path segment, so dots in directory names are kept
/// (`v1.2/app.handler` names export `handler` of module `v1.2/app`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSpecifier {
    module_path: String,
    export_name: String,
}

impl HandlerSpecifier {
    pub fn parse(specifier: &str) -> Result<Self, ResolveError> {
        let malformed = || ResolveError::MalformedSpecifier(specifier.to_string());

        let trimmed = specifier.trim();
        let segment_start = trimmed.rfind('/').map_or(0, |idx| idx + 1);
        let (module_name, export_name) = trimmed[segment_start..]
            .rsplit_once('.')
            .ok_or_else(malformed)?;
        if module_name.is_empty() || export_name.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            module_path: format!("{}{}", &trimmed[..segment_start], module_name),
            export_name: export_name.to_string(),
        })
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn export_name(&self) -> &str {
        &self.export_name
    }
}

impl FromStr for HandlerSpecifier {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HandlerSpecifier::parse(s)
    }
}

/// Finds the module a handler specifier refers to.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, task_root: &Path, module_path: &str) -> Result<Arc<Module>, ResolveError>;
}

/// Modules registered up front by the host, keyed by their location under a task root.
#[derive(Debug, Default)]
pub struct StaticModuleLoader {
    modules: RwLock<HashMap<PathBuf, Arc<Module>>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        task_root: impl AsRef<Path>,
        module_path: &str,
        module: Module,
    ) -> Arc<Module> {
        let module = Arc::new(module);
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                module_key(task_root.as_ref(), module_path),
                Arc::clone(&module),
            );
        module
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, task_root: &Path, module_path: &str) -> Result<Arc<Module>, ResolveError> {
        let key = module_key(task_root, module_path);
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| ResolveError::ModuleLoad {
                module: module_path.to_string(),
                reason: format!("no module registered at {}", key.display()),
            })
    }
}

fn module_key(task_root: &Path, module_path: &str) -> PathBuf {
    task_root
        .join(module_path)
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// A handler found through its specifier, along with the module exporting it.
#[derive(Clone)]
pub struct ResolvedHandler {
    pub module_path: String,
    pub export_name: String,
    pub module: Arc<Module>,
    pub target: Handler,
}

impl Debug for ResolvedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedHandler")
            .field("module_path", &self.module_path)
            .field("export_name", &self.export_name)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Loads the module named by `specifier` from `task_root` and looks up its export.
pub fn resolve(
    loader: &dyn ModuleLoader,
    task_root: &Path,
    specifier: &str,
) -> Result<ResolvedHandler, ResolveError> {
    let specifier = HandlerSpecifier::parse(specifier)?;
    let module = loader.load(task_root, specifier.module_path())?;
    let target =
        module
            .handler(specifier.export_name())
            .ok_or_else(|| ResolveError::NotCallable {
                module: specifier.module_path().to_string(),
                export: specifier.export_name().to_string(),
            })?;

    debug!(
        "Resolved handler '{}' of module '{}' under {}",
        specifier.export_name(),
        specifier.module_path(),
        task_root.display()
    );

    Ok(ResolvedHandler {
        module_path: specifier.module_path,
        export_name: specifier.export_name,
        module,
        target,
    })
}
