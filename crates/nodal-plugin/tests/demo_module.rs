//! Loading the demo device module from disk.
//!
//! `nodal-demo-device` is a dev-dependency, so its cdylib is built next to
//! this test. Set `NODAL_DEMO_MODULE` to load a module from elsewhere.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::PathBuf;

use nodal_core::{CollectSink, ParamList};
use nodal_devices::{DeviceRegistry, DeviceSource};
use nodal_plugin::{LoadError, PluginHost};
use nodal_solver::{Circuit, operating_point};

/// The demo cdylib in the build directories of this test binary.
fn demo_module() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("NODAL_DEMO_MODULE") {
        return Some(PathBuf::from(path));
    }
    let exe = std::env::current_exe().ok()?;
    let deps = exe.parent()?;
    let stem = format!("{}nodal_demo_device", DLL_PREFIX);
    let mut dirs = vec![deps.to_path_buf()];
    if let Some(profile) = deps.parent() {
        dirs.push(profile.to_path_buf());
    }
    dirs.into_iter().find_map(|dir| {
        std::fs::read_dir(dir).ok()?.flatten().map(|e| e.path()).find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&stem) && n.ends_with(DLL_SUFFIX))
        })
    })
}

#[test]
fn test_load_solve_unload() {
    let Some(path) = demo_module() else {
        eprintln!("demo module not built, skipping test");
        return;
    };

    let mut registry = DeviceRegistry::with_builtins();
    let mut host = PluginHost::new();
    let handle = host.load(&path, &mut registry).unwrap();
    assert_eq!(
        registry.find("nlres").map(|r| r.source.clone()),
        Some(DeviceSource::Module("nlres".into()))
    );
    assert_eq!(registry.lookup('N', 1).unwrap().info().name, "nlres");

    // 2 V across the device through a 1 ohm sense resistor
    let mut circuit = Circuit::default();
    circuit
        .add_model_from(&registry, "vsource", "v", &ParamList::new())
        .unwrap();
    circuit
        .add_model_from(&registry, "resistor", "r", &ParamList::new())
        .unwrap();
    circuit
        .add_model_from(&registry, "nlres", "nl", &ParamList::new())
        .unwrap();
    circuit
        .add_instance("v", "v1", &["in", "0"], &ParamList::new().with("dc", 2.0))
        .unwrap();
    circuit
        .add_instance("r", "rs", &["in", "a"], &ParamList::new().with("r", 1.0))
        .unwrap();
    circuit
        .add_instance("nl", "n1", &["a", "0"], &ParamList::new())
        .unwrap();
    let mut sink = CollectSink::new();
    operating_point(&mut circuit, &mut sink).unwrap();

    // KCL at a: sense current equals g1·v + g3·v³
    let va = circuit.voltage("a").unwrap();
    let i_sense = 2.0 - va;
    let i_dev = 1e-3 * va + 1e-4 * va.powi(3);
    assert!((i_sense - i_dev).abs() < 1e-6 * i_dev, "{} vs {}", i_sense, i_dev);

    let err = host
        .unload(handle, &mut registry, &mut circuit, false)
        .unwrap_err();
    assert!(matches!(err, LoadError::InUse { .. }));
    let removed = host.unload(handle, &mut registry, &mut circuit, true).unwrap();
    assert_eq!(removed, ["nlres"]);
    assert!(registry.lookup('N', 1).is_none());
    assert!(circuit.model("nl").is_none());
    assert_eq!(host.modules().count(), 0);

    // the circuit still solves without the module's devices
    circuit
        .add_instance("r", "rl", &["a", "0"], &ParamList::new().with("r", 1.0))
        .unwrap();
    operating_point(&mut circuit, &mut sink).unwrap();
    assert!((circuit.voltage("a").unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn test_host_drop_with_module_loaded() {
    let Some(path) = demo_module() else {
        eprintln!("demo module not built, skipping test");
        return;
    };
    let mut registry = DeviceRegistry::with_builtins();
    let mut host = PluginHost::new();
    host.load(&path, &mut registry).unwrap();
    // registry entries go first, then the host unmaps the image
    drop(registry);
    drop(host);
}

#[test]
fn test_missing_module_is_an_open_error() {
    let mut registry = DeviceRegistry::with_builtins();
    let mut host = PluginHost::new();
    let err = host
        .load(&PathBuf::from("/nonexistent/libnodal_nothing.so"), &mut registry)
        .unwrap_err();
    assert!(matches!(err, LoadError::Open { .. }));
    assert!(host.modules().next().is_none());
}
