use std::path::Path;

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use tracing::{error, info, warn};

use super::descriptor::{BuiltinModule, ModuleDescriptor};
use super::library;
use crate::core::{BlockBindings, CalcBlock};
use crate::telemetry::LogContext;

/// Registry of available module types, keyed by declared type tag
pub struct PluginRegistry {
    modules: IndexMap<String, ModuleDescriptor>,
    log: LogContext,
}

impl PluginRegistry {
    pub fn new(log: LogContext) -> Self {
        Self {
            modules: IndexMap::new(),
            log,
        }
    }

    /// Register a module. The first module declaring a type tag wins;
    /// later ones are logged and dropped.
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> bool {
        let _span = self.log.span().enter();

        if let Some(existing) = self.modules.get(&descriptor.type_tag) {
            warn!(
                type_tag = %descriptor.type_tag,
                kept = %existing.origin,
                ignored = %descriptor.origin,
                "Two modules declare the same type"
            );
            return false;
        }

        self.modules.insert(descriptor.type_tag.clone(), descriptor);
        true
    }

    /// Register every module compiled into this binary
    pub fn load_builtin(&mut self) -> usize {
        let mut loaded = 0;
        for wrapper in inventory::iter::<BuiltinModule> {
            if self.register((wrapper.0)()) {
                loaded += 1;
            }
        }

        self.log.in_scope(|| info!(loaded, "Registered built-in modules"));
        loaded
    }

    /// Load every native module in `dir`. A module that fails to load is
    /// logged and skipped; the rest of the directory is still processed.
    pub fn load_dir(&mut self, dir: &Path) -> usize {
        let paths = match library::module_paths(dir) {
            Ok(paths) => paths,
            Err(e) => {
                self.log.in_scope(|| {
                    error!(dir = %dir.display(), error = %e, "Cannot read module directory")
                });
                return 0;
            }
        };

        let mut loaded = 0;
        for path in paths {
            match library::load_library(&path) {
                Ok(module) => {
                    if self.register(ModuleDescriptor::from_library(module)) {
                        loaded += 1;
                    }
                }
                Err(e) => self.log.in_scope(|| error!(error = %e, "Module skipped")),
            }
        }

        self.log
            .in_scope(|| info!(dir = %dir.display(), loaded, "Loaded native modules"));
        loaded
    }

    pub fn factory(&self, type_tag: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(type_tag)
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.modules.contains_key(type_tag)
    }

    pub fn type_tags(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn create(&self, type_tag: &str, bindings: &BlockBindings) -> Result<Box<dyn CalcBlock>> {
        self.modules
            .get(type_tag)
            .ok_or_else(|| anyhow!("Unknown module type: {}", type_tag))?
            .create(bindings)
    }
}
