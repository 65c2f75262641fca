//! Device models and the device contract for the Nodal engine.
//!
//! This crate provides:
//! - The contract every device type implements ([`DeviceKind`], [`DeviceModel`])
//! - Newton step limiting for junctions and FETs
//! - Built-in devices: R, C, independent V and I sources, junction diode and
//!   a level-1 MOSFET with shared size-dependent parameters
//! - The [`DeviceRegistry`] with its clash-resolution policy
//! - The binary interface used by dynamically loaded device modules

pub mod abi;
pub mod builtin;
pub mod capacitor;
pub mod device;
pub mod diode;
pub mod limit;
pub mod mosfet;
pub mod registry;
pub mod resistor;
pub mod sources;
pub mod waveform;

pub use builtin::builtin_devices;
pub use device::{DeviceInfo, DeviceKind, DeviceModel, Instances, LoadStatus, check_terminals};
pub use diode::{DiodeKind, DiodeModel};
pub use mosfet::{MosfetKind, MosfetModel};
pub use registry::{Clash, DeviceRegistry, DeviceSource, Registration, resolve_clash};
pub use waveform::Waveform;
