//! Transient analysis engine.
//!
//! Time points are solved with the Newton driver using the integration
//! formula chosen in the simulator options. After each converged point every
//! model bounds the next step from the truncation error of its charges.
//!
//! # Module Structure
//!
//! - [`types`] - Parameters and initial conditions
//! - [`controller`] - Accept/reject and order policy
//! - [`result`] - Result types with interpolation support
//! - [`run`] - The resumable driver

pub mod controller;
pub mod result;
pub mod run;
pub mod types;

pub use controller::{StepController, StepDecision};
pub use result::{TimePoint, TransientResult};
pub use run::{StepOutcome, TransientRun, transient};
pub use types::{InitialConditions, STEP_CUT_FACTOR, TransientParams};
