//! Device types compiled into the engine.

use crate::capacitor::CapacitorKind;
use crate::device::DeviceKind;
use crate::diode::DiodeKind;
use crate::mosfet::MosfetKind;
use crate::resistor::ResistorKind;
use crate::sources::{CurrentSourceKind, VoltageSourceKind};

/// Every built-in device type, in registration order.
pub fn builtin_devices() -> Vec<Box<dyn DeviceKind>> {
    vec![
        Box::new(ResistorKind::default()),
        Box::new(CapacitorKind::default()),
        Box::new(VoltageSourceKind::default()),
        Box::new(CurrentSourceKind::default()),
        Box::new(DiodeKind::default()),
        Box::new(MosfetKind::default()),
    ]
}
