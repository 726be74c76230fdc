use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use libloading::Library;
use serde_json::{Map, Value};

use super::library::LoadedModule;
use crate::core::{BlockBindings, BlockIo, CalcBlock};
use crate::registry::SignalRegistry;

/// Factory building a block from its reference sets
pub type BlockFactory = Arc<dyn Fn(&BlockBindings) -> Result<Box<dyn CalcBlock>> + Send + Sync>;

/// Where a module's code lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    Builtin,
    Library(PathBuf),
}

impl fmt::Display for ModuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("<builtin>"),
            Self::Library(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A registered module: its type tag and the capability to build blocks
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub type_tag: String,
    pub origin: ModuleOrigin,
    factory: BlockFactory,
    library: Option<Arc<Library>>,
}

impl ModuleDescriptor {
    pub fn builtin<F>(type_tag: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&BlockBindings) -> Result<Box<dyn CalcBlock>> + Send + Sync + 'static,
    {
        Self {
            type_tag: type_tag.into(),
            origin: ModuleOrigin::Builtin,
            factory: Arc::new(factory),
            library: None,
        }
    }

    pub(crate) fn from_library(module: LoadedModule) -> Self {
        let create = module.declaration.create;
        Self {
            type_tag: module.declaration.type_tag.to_string(),
            origin: ModuleOrigin::Library(module.path),
            factory: Arc::new(move |bindings: &BlockBindings| create(bindings)),
            library: Some(module.library),
        }
    }

    /// Build a block. Blocks from a native module keep it loaded while they live.
    pub fn create(&self, bindings: &BlockBindings) -> Result<Box<dyn CalcBlock>> {
        let block = (self.factory)(bindings)?;
        Ok(match &self.library {
            Some(library) => Box::new(LibraryBlock {
                inner: block,
                _library: Arc::clone(library),
            }),
            None => block,
        })
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("type_tag", &self.type_tag)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

// Field order matters: the block is dropped before the library holding its code.
struct LibraryBlock {
    inner: Box<dyn CalcBlock>,
    _library: Arc<Library>,
}

impl CalcBlock for LibraryBlock {
    fn process(&mut self, io: &mut BlockIo<'_>, time: f64, step: f64) -> Result<()> {
        self.inner.process(io, time, step)
    }

    fn debug_dump(&self, registry: &SignalRegistry, out: &mut Map<String, Value>, time: f64, step: f64) {
        self.inner.debug_dump(registry, out, time, step)
    }
}

// Factory type for creating module descriptors at runtime
pub type ModuleDescriptorFactory = fn() -> ModuleDescriptor;

// Wrapper for inventory collection of built-in modules
pub struct BuiltinModule(pub ModuleDescriptorFactory);

inventory::collect!(BuiltinModule);
