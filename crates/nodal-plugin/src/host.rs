//! Loading and unloading device modules into a registry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::rc::{Rc, Weak};

use nodal_devices::abi::{
    ABI_VERSION, FACTORY_CAPACITY, FACTORY_OK, MAX_DEVICES, RawDevice, factory_symbol,
    take_devices,
};
use nodal_devices::{DeviceKind, DeviceRegistry, DeviceSource};
use nodal_solver::Circuit;

use crate::error::{LoadError, Result};
use crate::loader::{LibraryOpener, ModuleImage, ModuleOpener};
use crate::version::check_version;

/// Largest device count the host grows its buffer to.
const DEVICE_LIMIT: usize = 4096;

/// Identifies a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(u64);

impl fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a loaded module contributed.
#[derive(Debug, Clone)]
pub struct ModuleSummary {
    pub handle: PluginHandle,
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub devices: Vec<String>,
}

struct LoadedModule {
    summary: ModuleSummary,
    /// Device types handed out; the image may only be unmapped once all are
    /// dropped. Declared before `image`: dropping a `Weak<dyn _>` reads its
    /// vtable, which lives in the image.
    kinds: Vec<Weak<dyn DeviceKind>>,
    image: Option<Box<dyn ModuleImage>>,
}

impl LoadedModule {
    fn devices_alive(&self) -> bool {
        self.kinds.iter().any(|k| k.strong_count() > 0)
    }

    /// Unmap the image unless device code from it may still run.
    fn release(&mut self) {
        let Some(image) = self.image.take() else {
            return;
        };
        let alive = self.devices_alive();
        self.kinds.clear();
        if alive {
            log::warn!(
                "module {} still has live device types; keeping it mapped",
                self.summary.name
            );
            std::mem::forget(image);
        } else {
            drop(image);
        }
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owner of every loaded device module.
pub struct PluginHost {
    opener: Box<dyn ModuleOpener>,
    modules: Vec<LoadedModule>,
    next_id: u64,
}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginHost {
    /// Host loading shared libraries from disk.
    pub fn new() -> Self {
        Self::with_opener(Box::new(LibraryOpener))
    }

    pub fn with_opener(opener: Box<dyn ModuleOpener>) -> Self {
        Self {
            opener,
            modules: Vec::new(),
            next_id: 1,
        }
    }

    /// Load the module at `path` and register its devices.
    ///
    /// The module's version is checked before its factory is resolved.
    pub fn load(&mut self, path: &Path, registry: &mut DeviceRegistry) -> Result<PluginHandle> {
        let image = self.opener.open(path)?;
        let ident = image.ident()?;
        let host_version = ABI_VERSION.to_string_lossy();
        check_version(&ident.name, &ident.version, &host_version)?;
        if self.modules.iter().any(|m| m.summary.name == ident.name) {
            return Err(LoadError::AlreadyLoaded(ident.name));
        }

        let factory = image.factory(&factory_symbol(&ident.name))?;
        let mut buf: Vec<RawDevice> = vec![ptr::null_mut(); MAX_DEVICES];
        let mut count = buf.len() as u32;
        let mut code = unsafe { factory(buf.as_mut_ptr(), &mut count) };
        if code == FACTORY_CAPACITY {
            let needed = count as usize;
            if needed > DEVICE_LIMIT {
                return Err(LoadError::TooManyDevices {
                    module: ident.name,
                    count: needed,
                });
            }
            buf = vec![ptr::null_mut(); needed];
            count = needed as u32;
            code = unsafe { factory(buf.as_mut_ptr(), &mut count) };
        }
        if code != FACTORY_OK {
            return Err(LoadError::FactoryFailed {
                module: ident.name,
                code,
            });
        }
        // Own whatever was written before any further check, so a rejected
        // module's devices are dropped while its image is still mapped.
        let written = (count as usize).min(buf.len());
        let devices = unsafe { take_devices(&buf[..written]) };
        if count as usize > buf.len() {
            drop(devices);
            return Err(LoadError::TooManyDevices {
                module: ident.name,
                count: count as usize,
            });
        }
        if devices.is_empty() {
            return Err(LoadError::NoDevices(ident.name));
        }

        let handle = PluginHandle(self.next_id);
        self.next_id += 1;
        let mut kinds = Vec::with_capacity(devices.len());
        let mut names = Vec::with_capacity(devices.len());
        for device in devices {
            let kind: Rc<dyn DeviceKind> = Rc::from(device);
            kinds.push(Rc::downgrade(&kind));
            names.push(kind.info().name.clone());
            registry.register(kind, DeviceSource::Module(ident.name.clone()));
        }
        log::info!(
            "loaded module {} ({}) from {}: {}",
            ident.name,
            ident.version,
            path.display(),
            names.join(", ")
        );

        self.modules.push(LoadedModule {
            summary: ModuleSummary {
                handle,
                name: ident.name,
                version: ident.version,
                path: path.to_path_buf(),
                devices: names,
            },
            kinds,
            image: Some(image),
        });
        Ok(handle)
    }

    /// Unregister a module's devices and unmap it.
    ///
    /// Fails with [`LoadError::InUse`] while `circuit` holds models of the
    /// module's devices, unless `detach` is set, in which case those models
    /// and their instances are removed first. Returns the names of the
    /// devices that were unregistered.
    pub fn unload(
        &mut self,
        handle: PluginHandle,
        registry: &mut DeviceRegistry,
        circuit: &mut Circuit,
        detach: bool,
    ) -> Result<Vec<String>> {
        let index = self
            .modules
            .iter()
            .position(|m| m.summary.handle == handle)
            .ok_or(LoadError::UnknownHandle(handle))?;

        let devices = self.modules[index].summary.devices.clone();
        if !detach {
            for device in &devices {
                let models = circuit.models_of_device(device);
                if !models.is_empty() {
                    return Err(LoadError::InUse {
                        device: device.clone(),
                        models,
                    });
                }
            }
        }
        for device in &devices {
            circuit.detach_device(device);
        }

        let mut module = self.modules.remove(index);
        let removed = registry.unregister_module(&module.summary.name);
        module.release();
        log::info!("unloaded module {}", module.summary.name);
        Ok(removed)
    }

    /// Loaded modules in load order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleSummary> {
        self.modules.iter().map(|m| &m.summary)
    }

    pub fn module(&self, handle: PluginHandle) -> Option<&ModuleSummary> {
        self.modules().find(|m| m.handle == handle)
    }
}
