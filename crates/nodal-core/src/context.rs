//! Borrowed views of the circuit handed to device operations.
//!
//! Each operation gets exactly the pieces it may touch: setup can create
//! unknowns and matrix entries, a load can only add to existing entries and
//! write its own state slots.

use num_complex::Complex64;

use crate::convergence::ConvergenceChecker;
use crate::diag::DiagnosticSink;
use crate::error::Result;
use crate::integration::Integrator;
use crate::matrix::{MatrixHandle, MatrixStore};
use crate::mode::Mode;
use crate::node::{NodeId, NodeTable};
use crate::options::SimOptions;
use crate::state::{StateBlock, StateStore};

/// Value of `node` in a solution vector (ground reads as zero).
#[inline]
pub fn voltage_at(solution: &[f64], node: NodeId) -> f64 {
    node.index().and_then(|i| solution.get(i)).copied().unwrap_or(0.0)
}

/// Context for `setup`.
pub struct SetupContext<'a> {
    pub nodes: &'a mut NodeTable,
    pub matrix: &'a mut MatrixStore,
    pub states: &'a mut StateStore,
    pub options: &'a SimOptions,
    pub diag: &'a mut dyn DiagnosticSink,
}

impl SetupContext<'_> {
    /// Handle for the Jacobian position `(row, col)`.
    pub fn entry(&mut self, row: NodeId, col: NodeId) -> MatrixHandle {
        self.matrix.entry(row, col)
    }

    /// Handles for the four positions coupling two nodes:
    /// `[aa, bb, ab, ba]`.
    pub fn entries2(&mut self, a: NodeId, b: NodeId) -> [MatrixHandle; 4] {
        [
            self.matrix.entry(a, a),
            self.matrix.entry(b, b),
            self.matrix.entry(a, b),
            self.matrix.entry(b, a),
        ]
    }

    /// Device-owned node, or `external` itself when no internal node is needed.
    pub fn internal_or(
        &mut self,
        needed: bool,
        external: NodeId,
        owner: &str,
        suffix: &str,
    ) -> Result<NodeId> {
        if needed {
            self.nodes.internal(owner, suffix)
        } else {
            Ok(external)
        }
    }

    /// Branch-current unknown for `owner`.
    pub fn branch(&mut self, owner: &str) -> Result<NodeId> {
        self.nodes.branch(owner)
    }

    /// Reserve `count` state slots.
    pub fn allocate_states(&mut self, count: usize) -> StateBlock {
        self.states.allocate(count)
    }
}

/// Context for `temperature_update`.
pub struct TempContext<'a> {
    pub options: &'a SimOptions,
    pub diag: &'a mut dyn DiagnosticSink,
}

/// Context for one `load` pass.
pub struct LoadContext<'a> {
    pub mode: Mode,
    pub options: &'a SimOptions,
    /// Latest Newton iterate, indexed by matrix row.
    pub solution: &'a [f64],
    pub matrix: &'a mut MatrixStore,
    pub states: &'a mut StateStore,
    pub integrator: &'a Integrator,
    pub conv: &'a mut ConvergenceChecker,
    /// Time of the point being solved (zero outside transient).
    pub time: f64,
    pub diag: &'a mut dyn DiagnosticSink,
    bypassed: usize,
}

impl<'a> LoadContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: Mode,
        options: &'a SimOptions,
        solution: &'a [f64],
        matrix: &'a mut MatrixStore,
        states: &'a mut StateStore,
        integrator: &'a Integrator,
        conv: &'a mut ConvergenceChecker,
        time: f64,
        diag: &'a mut dyn DiagnosticSink,
    ) -> Self {
        Self {
            mode,
            options,
            solution,
            matrix,
            states,
            integrator,
            conv,
            time,
            diag,
            bypassed: 0,
        }
    }

    /// Trial value of `node` for this iteration.
    #[inline]
    pub fn voltage(&self, node: NodeId) -> f64 {
        voltage_at(self.solution, node)
    }

    /// Trial voltage `v(a) - v(b)`.
    #[inline]
    pub fn voltage_between(&self, a: NodeId, b: NodeId) -> f64 {
        self.voltage(a) - self.voltage(b)
    }

    /// Stamp a conductance `g` between `a` and `b` through `[aa, bb, ab, ba]`.
    #[inline]
    pub fn stamp_conductance(&mut self, h: &[MatrixHandle; 4], g: f64) {
        self.matrix.add(h[0], g);
        self.matrix.add(h[1], g);
        self.matrix.add(h[2], -g);
        self.matrix.add(h[3], -g);
    }

    /// Stamp a current `i` flowing from `a` to `b` inside the device.
    #[inline]
    pub fn stamp_current(&mut self, a: NodeId, b: NodeId, i: f64) {
        self.matrix.add_rhs(a, -i);
        self.matrix.add_rhs(b, i);
    }

    /// Record that an instance reused its previous evaluation.
    pub fn note_bypass(&mut self) {
        self.bypassed += 1;
    }

    /// Instances bypassed so far in this pass.
    pub fn bypassed(&self) -> usize {
        self.bypassed
    }
}

/// Context for a small-signal load at angular frequency `omega`.
pub struct AcLoadContext<'a> {
    pub omega: f64,
    pub options: &'a SimOptions,
    pub matrix: &'a mut MatrixStore,
    pub states: &'a StateStore,
}

impl AcLoadContext<'_> {
    /// Stamp admittance `g + jb` between two nodes.
    pub fn stamp_admittance(&mut self, h: &[MatrixHandle; 4], g: f64, b: f64) {
        self.matrix.add_complex(h[0], g, b);
        self.matrix.add_complex(h[1], g, b);
        self.matrix.add_complex(h[2], -g, -b);
        self.matrix.add_complex(h[3], -g, -b);
    }
}

/// Context for a load at complex frequency `s`.
pub struct PzLoadContext<'a> {
    pub s: Complex64,
    pub options: &'a SimOptions,
    pub matrix: &'a mut MatrixStore,
    pub states: &'a StateStore,
}

impl PzLoadContext<'_> {
    /// Stamp `g + s·c` between two nodes.
    pub fn stamp_gc(&mut self, h: &[MatrixHandle; 4], g: f64, c: f64) {
        let y = self.s * c + g;
        self.matrix.add_complex(h[0], y.re, y.im);
        self.matrix.add_complex(h[1], y.re, y.im);
        self.matrix.add_complex(h[2], -y.re, -y.im);
        self.matrix.add_complex(h[3], -y.re, -y.im);
    }
}

/// Context for the per-device convergence test.
pub struct ConvTestContext<'a> {
    pub mode: Mode,
    pub options: &'a SimOptions,
    /// Solution produced by the last linear solve.
    pub solution: &'a [f64],
    pub states: &'a StateStore,
    pub conv: &'a mut ConvergenceChecker,
}

impl ConvTestContext<'_> {
    #[inline]
    pub fn voltage(&self, node: NodeId) -> f64 {
        voltage_at(self.solution, node)
    }
}

/// Context for truncation-error estimates after a converged time point.
pub struct TruncContext<'a> {
    pub options: &'a SimOptions,
    pub states: &'a StateStore,
    pub integrator: &'a Integrator,
}

impl TruncContext<'_> {
    /// Shrink `step` to what charge slot `q` allows.
    pub fn limit(&self, q: usize, step: f64) -> f64 {
        step.min(self.integrator.truncation_step(self.states, q, self.options))
    }
}
