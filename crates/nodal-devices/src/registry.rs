//! Registry of device types available to the circuit builder.
//!
//! Each device type occupies a netlist slot `(key, level)`. When a new
//! registration collides with an existing one the newest wins; the rule is
//! the pure function [`resolve_clash`] so it can be checked on its own.

use std::fmt;
use std::rc::Rc;

use crate::builtin::builtin_devices;
use crate::device::{DeviceInfo, DeviceKind};

/// Where a registered device type came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSource {
    Builtin,
    /// Loaded from the named device module.
    Module(String),
}

impl fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSource::Builtin => write!(f, "built-in"),
            DeviceSource::Module(name) => write!(f, "module {}", name),
        }
    }
}

/// A registered device type.
#[derive(Clone)]
pub struct Registration {
    pub kind: Rc<dyn DeviceKind>,
    pub source: DeviceSource,
}

impl Registration {
    pub fn info(&self) -> &DeviceInfo {
        self.kind.info()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("info", self.info())
            .field("source", &self.source)
            .finish()
    }
}

/// Outcome of registering `incoming` against the existing registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clash {
    /// No collision: append.
    Insert,
    /// Replace the registration at `index`.
    ///
    /// `warn` is false for a newer version of the same device and true when a
    /// different device is shadowed and becomes inaccessible.
    Replace { index: usize, warn: bool },
    /// Replace the same-name registration at `index` and remove the
    /// different device at `shadowed` that holds the incoming slot.
    ReplaceAndShadow { index: usize, shadowed: usize },
}

/// Decide how `incoming` enters a registry holding `existing`.
///
/// A registration with the same device name is replaced silently. A
/// different device holding the same key and level is replaced, or removed
/// when the same name is replaced elsewhere, with a warning. Either way the
/// slot ends up with exactly one registration, the incoming one.
pub fn resolve_clash<'a>(
    existing: impl IntoIterator<Item = &'a DeviceInfo>,
    incoming: &DeviceInfo,
) -> Clash {
    let mut same_name = None;
    let mut same_slot = None;
    for (index, info) in existing.into_iter().enumerate() {
        if info.name.eq_ignore_ascii_case(&incoming.name) {
            same_name = same_name.or(Some(index));
        } else if info.same_slot(incoming) {
            same_slot = same_slot.or(Some(index));
        }
    }
    match (same_name, same_slot) {
        (Some(index), Some(shadowed)) => Clash::ReplaceAndShadow { index, shadowed },
        (Some(index), None) => Clash::Replace { index, warn: false },
        (None, Some(index)) => Clash::Replace { index, warn: true },
        (None, None) => Clash::Insert,
    }
}

/// Device types by name and netlist slot.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<Registration>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in devices.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in builtin_devices() {
            registry.register(Rc::from(kind), DeviceSource::Builtin);
        }
        registry
    }

    /// Add a device type, replacing whatever it collides with.
    pub fn register(&mut self, kind: Rc<dyn DeviceKind>, source: DeviceSource) -> Clash {
        let clash = resolve_clash(self.entries.iter().map(|r| r.info()), kind.info());
        let incoming = Registration { kind, source };
        match clash {
            Clash::Insert => {
                log::debug!(
                    "registered {} ({}{}) from {}",
                    incoming.info().name,
                    incoming.info().key,
                    incoming.info().level,
                    incoming.source
                );
                self.entries.push(incoming);
            }
            Clash::Replace { index, warn } => {
                let old = &self.entries[index];
                if warn {
                    log::warn!(
                        "{} from {} takes slot {} level {}; {} from {} is no longer accessible",
                        incoming.info().name,
                        incoming.source,
                        incoming.info().key,
                        incoming.info().level,
                        old.info().name,
                        old.source
                    );
                } else {
                    log::info!(
                        "{} from {} replaces the one from {}",
                        incoming.info().name,
                        incoming.source,
                        old.source
                    );
                }
                self.entries[index] = incoming;
            }
            Clash::ReplaceAndShadow { index, shadowed } => {
                let old = &self.entries[shadowed];
                log::warn!(
                    "{} from {} moves to slot {} level {}; {} from {} is no longer accessible",
                    incoming.info().name,
                    incoming.source,
                    incoming.info().key,
                    incoming.info().level,
                    old.info().name,
                    old.source
                );
                self.entries[index] = incoming;
                self.entries.remove(shadowed);
            }
        }
        clash
    }

    /// Device type registered for a netlist key and level.
    pub fn lookup(&self, key: char, level: u32) -> Option<Rc<dyn DeviceKind>> {
        let key = key.to_ascii_uppercase();
        self.entries
            .iter()
            .rev()
            .find(|r| r.info().key == key && r.info().level == level)
            .map(|r| Rc::clone(&r.kind))
    }

    /// Device type by its unique name.
    pub fn by_name(&self, name: &str) -> Option<Rc<dyn DeviceKind>> {
        self.find(name).map(|r| Rc::clone(&r.kind))
    }

    /// Registration by device name.
    pub fn find(&self, name: &str) -> Option<&Registration> {
        self.entries
            .iter()
            .find(|r| r.info().name.eq_ignore_ascii_case(name))
    }

    /// Remove every device a module contributed; returns their names.
    ///
    /// Devices the module had shadowed are not restored.
    pub fn unregister_module(&mut self, module: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|r| match &r.source {
            DeviceSource::Module(m) if m == module => {
                removed.push(r.info().name.clone());
                false
            }
            _ => true,
        });
        removed
    }

    /// Names of the devices a module contributed.
    pub fn devices_of(&self, module: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|r| matches!(&r.source, DeviceSource::Module(m) if m == module))
            .map(|r| r.info().name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
