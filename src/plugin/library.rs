//! Native module ABI and loading.
//!
//! A module is a dynamic library built against this crate that exports a
//! `ModuleDeclaration` under the symbol `calc_module_declaration`, usually via
//! [`export_calc_module!`](crate::export_calc_module). Modules share trait
//! object layouts with the host, so both must come from the same crate version
//! and compiler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result as AnyResult;
use libloading::Library;

use crate::core::{BlockBindings, CalcBlock};
use crate::error::{CalcError, Result};

pub const ABI_VERSION: u32 = 1;
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DECLARATION_SYMBOL: &[u8] = b"calc_module_declaration\0";

#[derive(Clone, Copy)]
pub struct ModuleDeclaration {
    pub abi_version: u32,
    pub core_version: &'static str,
    pub type_tag: &'static str,
    pub create: fn(&BlockBindings) -> AnyResult<Box<dyn CalcBlock>>,
}

/// Export a module declaration from a native module crate.
///
/// ```ignore
/// calcserver::export_calc_module!("Valve", |bindings| Ok(Box::new(Valve::build(bindings)?)));
/// ```
#[macro_export]
macro_rules! export_calc_module {
    ($type_tag:expr, $create:expr) => {
        #[doc(hidden)]
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static calc_module_declaration: $crate::plugin::ModuleDeclaration =
            $crate::plugin::ModuleDeclaration {
                abi_version: $crate::plugin::ABI_VERSION,
                core_version: $crate::plugin::CORE_VERSION,
                type_tag: $type_tag,
                create: $create,
            };
    };
}

pub struct LoadedModule {
    pub path: PathBuf,
    pub declaration: ModuleDeclaration,
    pub library: Arc<Library>,
}

/// Dynamic libraries directly under `dir`, sorted by file name
pub fn module_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_module = path.is_file()
            && path.extension().and_then(|s| s.to_str()) == Some(std::env::consts::DLL_EXTENSION);
        if is_module {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn load_library(path: &Path) -> Result<LoadedModule> {
    let fail = |reason: String| CalcError::PluginLoad {
        path: path.to_path_buf(),
        reason,
    };

    // SAFETY: opening the library runs its initialisers; modules are trusted
    // calculation code placed in the configured module directory.
    let library = unsafe { Library::new(path) }.map_err(|e| fail(e.to_string()))?;

    // SAFETY: the symbol is a `ModuleDeclaration` static exported by
    // `export_calc_module!`; it is copied out while the library is loaded.
    let declaration: ModuleDeclaration = unsafe {
        let symbol = library
            .get::<*const ModuleDeclaration>(DECLARATION_SYMBOL)
            .map_err(|e| fail(format!("no module declaration: {}", e)))?;
        **symbol
    };

    if declaration.abi_version != ABI_VERSION {
        return Err(fail(format!(
            "ABI version {} does not match host version {}",
            declaration.abi_version, ABI_VERSION
        )));
    }
    if declaration.core_version != CORE_VERSION {
        return Err(fail(format!(
            "built against calcserver {}, host is {}",
            declaration.core_version, CORE_VERSION
        )));
    }
    if declaration.type_tag.is_empty() {
        return Err(fail("empty type tag".to_string()));
    }

    Ok(LoadedModule {
        path: path.to_path_buf(),
        declaration,
        library: Arc::new(library),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_module_paths_filters_by_extension() {
        let dir = tempdir().unwrap();
        let module = dir
            .path()
            .join(format!("valve.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&module, b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let paths = module_paths(dir.path()).unwrap();
        assert_eq!(paths, vec![module]);
    }

    #[test]
    fn test_invalid_library_is_a_load_error() {
        let dir = tempdir().unwrap();
        let module = dir
            .path()
            .join(format!("broken.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&module, b"not a library").unwrap();

        match load_library(&module) {
            Err(CalcError::PluginLoad { path, .. }) => assert_eq!(path, module),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("garbage file loaded as a module"),
        }
    }
}
