//! Binary interface between the engine and device modules.
//!
//! A device module is a `cdylib` exporting two symbols:
//!
//! - `nodal_module_info`: a [`ModuleInfo`] with the module name and the ABI
//!   version it was built against
//! - `<name>_c`: a [`DeviceFactory`] filling a host buffer with boxed
//!   [`DeviceKind`]s
//!
//! Device types cross the boundary as Rust trait objects, so a module must be
//! built by the same toolchain as the host. The version gate is what enforces
//! that in practice; the host keeps the library mapped for as long as any
//! device it produced is alive.
//!
//! Modules normally use [`export_devices!`](crate::export_devices) instead of
//! writing the symbols by hand.

use std::ffi::{CStr, c_char};

use crate::device::DeviceKind;

/// Version of this interface, `major.minor.patch`.
pub const ABI_VERSION: &CStr = c"1.0.0";

/// Name of the static every module exports.
pub const MODULE_INFO_SYMBOL: &str = "nodal_module_info";

/// Factory returned success.
pub const FACTORY_OK: i32 = 0;
/// Factory got a null buffer or count.
pub const FACTORY_NULL: i32 = -1;
/// Module has more devices than the host buffer holds; `*count` holds the
/// number needed.
pub const FACTORY_CAPACITY: i32 = -2;

/// Most devices a host asks one module for.
pub const MAX_DEVICES: usize = 64;

/// Identification a module exports before anything else is called.
#[repr(C)]
#[derive(Debug)]
pub struct ModuleInfo {
    /// NUL-terminated module name; the factory is `<name>_c`.
    pub name: *const c_char,
    /// NUL-terminated ABI version the module was built against.
    pub version: *const c_char,
}

// Only ever points at string literals in the module image.
unsafe impl Sync for ModuleInfo {}

/// One device type handed across the boundary.
pub type RawDevice = *mut Box<dyn DeviceKind>;

/// Signature of the `<name>_c` factory.
pub type DeviceFactory = unsafe extern "C" fn(out: *mut RawDevice, count: *mut u32) -> i32;

/// Name of the factory symbol of a module.
pub fn factory_symbol(module: &str) -> String {
    format!("{}_c", module)
}

/// Write `devices` into a host buffer of `*count` slots.
///
/// On success `*count` is set to the number written.
///
/// # Safety
/// `out` must be valid for `*count` writes and `count` must be valid for a
/// read and a write.
pub unsafe fn write_devices(
    devices: Vec<Box<dyn DeviceKind>>,
    out: *mut RawDevice,
    count: *mut u32,
) -> i32 {
    if out.is_null() || count.is_null() {
        return FACTORY_NULL;
    }
    let capacity = unsafe { *count } as usize;
    if devices.len() > capacity {
        unsafe { *count = devices.len() as u32 };
        return FACTORY_CAPACITY;
    }
    let written = devices.len();
    for (i, device) in devices.into_iter().enumerate() {
        unsafe { out.add(i).write(Box::into_raw(Box::new(device))) };
    }
    unsafe { *count = written as u32 };
    FACTORY_OK
}

/// Take ownership of devices a factory wrote. Null slots are skipped.
///
/// # Safety
/// Every non-null pointer must come from [`write_devices`] and must not be
/// taken twice.
pub unsafe fn take_devices(raw: &[RawDevice]) -> Vec<Box<dyn DeviceKind>> {
    raw.iter()
        .filter(|p| !p.is_null())
        .map(|&p| *unsafe { Box::from_raw(p) })
        .collect()
}

/// Read a NUL-terminated string exported by a module.
///
/// # Safety
/// `ptr` must be null or point at a NUL-terminated string that outlives the
/// call.
pub unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Export a device module.
///
/// ```ignore
/// nodal_devices::export_devices!("nlres", nlres_c, || vec![
///     Box::new(NonlinearResistorKind::default()) as Box<dyn DeviceKind>,
/// ]);
/// ```
///
/// The factory identifier must be the module name followed by `_c`.
#[macro_export]
macro_rules! export_devices {
    ($name:literal, $factory:ident, $devices:expr) => {
        $crate::export_devices!($name, $factory, $devices, version = $crate::abi::ABI_VERSION);
    };
    ($name:literal, $factory:ident, $devices:expr, version = $version:expr) => {
        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static nodal_module_info: $crate::abi::ModuleInfo = $crate::abi::ModuleInfo {
            name: concat!($name, "\0").as_ptr().cast(),
            version: ($version).as_ptr(),
        };

        /// Device factory of this module.
        ///
        /// # Safety
        /// `out` must hold `*count` writable slots.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $factory(
            out: *mut $crate::abi::RawDevice,
            count: *mut u32,
        ) -> i32 {
            let make = $devices;
            unsafe { $crate::abi::write_devices(make(), out, count) }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacitor::CapacitorKind;
    use crate::resistor::ResistorKind;
    use std::ptr;

    fn two() -> Vec<Box<dyn DeviceKind>> {
        vec![
            Box::new(ResistorKind::default()),
            Box::new(CapacitorKind::default()),
        ]
    }

    #[test]
    fn test_write_then_take() {
        let mut buf = [ptr::null_mut(); 4];
        let mut count = buf.len() as u32;
        let rc = unsafe { write_devices(two(), buf.as_mut_ptr(), &mut count) };
        assert_eq!(rc, FACTORY_OK);
        assert_eq!(count, 2);
        let devices = unsafe { take_devices(&buf[..count as usize]) };
        let names: Vec<_> = devices.iter().map(|d| d.info().name.as_str()).collect();
        assert_eq!(names, ["resistor", "capacitor"]);
    }

    #[test]
    fn test_small_buffer_reports_needed_count() {
        let mut buf = [ptr::null_mut(); 1];
        let mut count = 1;
        let rc = unsafe { write_devices(two(), buf.as_mut_ptr(), &mut count) };
        assert_eq!(rc, FACTORY_CAPACITY);
        assert_eq!(count, 2);
        assert!(buf[0].is_null());
    }

    #[test]
    fn test_null_arguments() {
        let mut count = 4;
        let rc = unsafe { write_devices(two(), ptr::null_mut(), &mut count) };
        assert_eq!(rc, FACTORY_NULL);
    }

    #[test]
    fn test_version_string() {
        assert_eq!(ABI_VERSION.to_str().ok(), Some("1.0.0"));
        assert_eq!(factory_symbol("nlres"), "nlres_c");
        assert_eq!(unsafe { read_c_str(ABI_VERSION.as_ptr()) }.as_deref(), Some("1.0.0"));
        assert_eq!(unsafe { read_c_str(ptr::null()) }, None);
    }
}
