//! Core data structures for the Nodal circuit engine.
//!
//! This crate provides the pieces every device model and the Newton driver
//! share:
//! - Node numbering ([`NodeTable`]) and the sparse matrix store with stable
//!   entry handles ([`MatrixStore`], [`MatrixHandle`])
//! - The per-instance state history ([`StateStore`]) addressed through typed
//!   slot enums ([`StateSlot`])
//! - Implicit integration coefficients and truncation-error estimates
//!   ([`Integrator`])
//! - The convergence checker and its trouble-element bookkeeping
//! - Simulator options, parameter values and diagnostics

pub mod context;
pub mod convergence;
pub mod diag;
pub mod error;
pub mod integration;
pub mod matrix;
pub mod mode;
pub mod node;
pub mod options;
pub mod params;
pub mod state;

pub use context::{
    AcLoadContext, ConvTestContext, LoadContext, PzLoadContext, SetupContext, TempContext,
    TruncContext,
};
pub use convergence::{ConvergenceChecker, InstanceRef};
pub use diag::{CollectSink, Diagnostic, DiagnosticSink, LogSink, Origin, Severity};
pub use error::{Error, Result};
pub use integration::{IntegrationMethod, Integrator, MAX_ORDER};
pub use matrix::{MatrixHandle, MatrixStore};
pub use mode::{AnalysisKind, InitPhase, Mode};
pub use node::{NodeId, NodeKind, NodeTable};
pub use options::SimOptions;
pub use params::{ParamList, ParamValue};
pub use state::{StateBlock, StateSlot, StateStore};
