//! Opening device modules.
//!
//! A [`ModuleOpener`] turns a path into a [`ModuleImage`], the mapped module
//! from which the host reads the module info and resolves the factory. The
//! real implementation wraps `libloading`; tests supply images built in
//! process.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use nodal_devices::abi::{DeviceFactory, MODULE_INFO_SYMBOL, ModuleInfo, read_c_str};

use crate::error::{LoadError, Result};

/// Name and interface version a module reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdent {
    pub name: String,
    pub version: String,
}

/// A mapped module.
///
/// Dropping the image unmaps the module; every device it produced must be
/// gone by then.
pub trait ModuleImage {
    /// Read the exported module info.
    fn ident(&self) -> Result<ModuleIdent>;

    /// Resolve the factory exported under `symbol`.
    fn factory(&self, symbol: &str) -> Result<DeviceFactory>;
}

/// Maps modules from paths.
pub trait ModuleOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>>;
}

/// Opens shared libraries with the platform loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryOpener;

impl ModuleOpener for LibraryOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>> {
        // Running the library's initializers is the point of loading it.
        let lib = unsafe { Library::new(path) }.map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Ok(Box::new(LibraryImage {
            lib,
            path: path.to_path_buf(),
        }))
    }
}

/// A shared library kept mapped for as long as the image lives.
struct LibraryImage {
    lib: Library,
    path: PathBuf,
}

impl ModuleImage for LibraryImage {
    fn ident(&self) -> Result<ModuleIdent> {
        let info = unsafe {
            let sym: Symbol<*const ModuleInfo> = self
                .lib
                .get(MODULE_INFO_SYMBOL.as_bytes())
                .map_err(|_| LoadError::MissingSymbol(MODULE_INFO_SYMBOL.into()))?;
            *sym
        };
        if info.is_null() {
            return Err(LoadError::MissingModuleInfo);
        }
        // The static lives in the module image, which self keeps mapped.
        let info = unsafe { &*info };
        let name = unsafe { read_c_str(info.name) };
        let version = unsafe { read_c_str(info.version) };
        match (name, version) {
            (Some(name), Some(version)) if !name.is_empty() => {
                log::debug!("{}: module {} interface {}", self.path.display(), name, version);
                Ok(ModuleIdent { name, version })
            }
            _ => Err(LoadError::MissingModuleInfo),
        }
    }

    fn factory(&self, symbol: &str) -> Result<DeviceFactory> {
        let factory = unsafe {
            let sym: Symbol<DeviceFactory> = self
                .lib
                .get(symbol.as_bytes())
                .map_err(|_| LoadError::MissingSymbol(symbol.to_string()))?;
            *sym
        };
        Ok(factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let err = LibraryOpener
            .open(Path::new("/nonexistent/libnothing.so"))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Open { .. }));
        assert!(err.to_string().starts_with("failed to load /nonexistent/libnothing.so"));
    }

    #[test]
    fn test_not_a_library() {
        let dir = std::env::temp_dir().join("nodal_plugin_test_loader");
        std::fs::create_dir_all(&dir).unwrap();
        let fake = dir.join("not_a_module.so");
        std::fs::write(&fake, b"this is not a shared library").unwrap();

        let result = LibraryOpener.open(&fake);
        assert!(matches!(result, Err(LoadError::Open { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
