//! Circuit arena, Newton-Raphson driver and analyses for the Nodal engine.
//!
//! This crate provides:
//! - The [`Circuit`] arena: models grouped by device type, their instances,
//!   the node table, the matrix store and the state history
//! - The linear solvers behind each Newton iteration (dense LU, with sparse
//!   LU above [`linear::SPARSE_THRESHOLD`] unknowns)
//! - The Newton driver with its initialization-phase machine
//! - DC operating point, transient, AC sweep and pole search
//!
//! # Example
//!
//! ```
//! use nodal_core::{LogSink, ParamList};
//! use nodal_devices::DeviceRegistry;
//! use nodal_solver::{Circuit, operating_point};
//!
//! let registry = DeviceRegistry::with_builtins();
//! let mut circuit = Circuit::default();
//! circuit.add_model_from(&registry, "vsource", "v", &ParamList::new()).unwrap();
//! circuit.add_model_from(&registry, "resistor", "r", &ParamList::new()).unwrap();
//! circuit.add_instance("v", "v1", &["in", "0"], &ParamList::new().with("dc", 10.0)).unwrap();
//! circuit.add_instance("r", "r1", &["in", "out"], &ParamList::new().with("r", 1e3)).unwrap();
//! circuit.add_instance("r", "r2", &["out", "0"], &ParamList::new().with("r", 1e3)).unwrap();
//!
//! operating_point(&mut circuit, &mut LogSink).unwrap();
//! assert!((circuit.voltage("out").unwrap() - 5.0).abs() < 1e-9);
//! ```

pub mod ac;
pub mod circuit;
pub mod dc;
pub mod error;
pub mod linear;
pub mod newton;
pub mod pz;
pub mod transient;

pub use ac::{AcParams, AcPoint, AcResult, AcSweepType, ac_sweep};
pub use circuit::{Circuit, LoadPass};
pub use dc::{DcResult, operating_point};
pub use error::{Error, HaltReason, Result};
pub use newton::NewtonStats;
pub use pz::{PzParams, PzResult, poles};
pub use transient::{
    InitialConditions, StepOutcome, TimePoint, TransientParams, TransientResult, TransientRun,
    transient,
};
