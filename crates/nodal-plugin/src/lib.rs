//! Dynamic loading of device modules for the Nodal engine.
//!
//! A device module is a shared library built with
//! [`nodal_devices::export_devices!`]. Loading one:
//!
//! 1. maps the library and reads its module info
//! 2. checks the module's interface version against the host's
//!    (`major.minor` must match, a patch difference only warns)
//! 3. resolves the factory `<module>_c` and lets it fill a device buffer
//! 4. registers every device with the [`DeviceRegistry`](nodal_devices::DeviceRegistry),
//!    the newest registration winning a key/level collision
//!
//! Unloading requires that no circuit still uses the module's devices, or an
//! explicit detach that removes those models first.

pub mod error;
pub mod host;
pub mod loader;
pub mod version;

pub use error::{LoadError, Result};
pub use host::{ModuleSummary, PluginHandle, PluginHost};
pub use loader::{LibraryOpener, ModuleIdent, ModuleImage, ModuleOpener};
pub use version::{AbiVersion, Compatibility, check_version};
