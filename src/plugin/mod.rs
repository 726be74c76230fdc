pub mod descriptor;
pub mod library;
pub mod registry;

pub use descriptor::{BlockFactory, BuiltinModule, ModuleDescriptor, ModuleOrigin};
pub use library::{ModuleDeclaration, ABI_VERSION, CORE_VERSION};
pub use registry::PluginRegistry;
