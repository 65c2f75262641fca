//! Nonconvergence counting and the trouble element.

use crate::node::NodeKind;
use crate::options::SimOptions;

/// Index-based reference to one device instance of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    /// Position of the model in the circuit.
    pub model: usize,
    /// Position of the instance within its model.
    pub instance: usize,
}

/// Collects pass/fail signals from one Newton iteration.
///
/// Failures never stop the pass: every device is evaluated and tested, and
/// the driver looks at [`noncon`](Self::noncon) once all of them have run.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceChecker {
    noncon: usize,
    trouble: Option<InstanceRef>,
    trouble_node: Option<usize>,
    model: usize,
}

impl ConvergenceChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new iteration.
    pub fn reset(&mut self) {
        self.noncon = 0;
        self.trouble = None;
        self.trouble_node = None;
    }

    /// Set the model whose instances report next.
    pub fn enter(&mut self, model: usize) {
        self.model = model;
    }

    /// Record a failing instance of the current model.
    pub fn fail(&mut self, instance: usize) {
        self.noncon += 1;
        self.trouble = Some(InstanceRef {
            model: self.model,
            instance,
        });
    }

    /// Record a failing matrix unknown.
    pub fn fail_node(&mut self, row: usize) {
        self.noncon += 1;
        self.trouble_node = Some(row);
    }

    /// Force another iteration without naming anyone.
    pub fn force(&mut self) {
        self.noncon += 1;
    }

    /// Number of failures recorded since the last reset.
    pub fn noncon(&self) -> usize {
        self.noncon
    }

    pub fn is_converged(&self) -> bool {
        self.noncon == 0
    }

    /// Last instance recorded as failing.
    pub fn trouble(&self) -> Option<InstanceRef> {
        self.trouble
    }

    /// Last unknown recorded as failing.
    pub fn trouble_node(&self) -> Option<usize> {
        self.trouble_node
    }

    /// Current test: `|predicted - actual| < reltol·max + abstol`.
    pub fn current_within(predicted: f64, actual: f64, opts: &SimOptions) -> bool {
        let tol = opts.reltol * predicted.abs().max(actual.abs()) + opts.abstol;
        (predicted - actual).abs() < tol
    }

    /// Voltage-step test used for bypass decisions.
    pub fn voltage_within(new: f64, old: f64, opts: &SimOptions) -> bool {
        let tol = opts.reltol * new.abs().max(old.abs()) + opts.vntol;
        (new - old).abs() < tol
    }

    /// Test one unknown between two iterates.
    pub fn unknown_within(new: f64, old: f64, kind: NodeKind, opts: &SimOptions) -> bool {
        let abs = if kind.is_voltage() {
            opts.vntol
        } else {
            opts.abstol
        };
        let tol = opts.reltol * new.abs().max(old.abs()) + abs;
        (new - old).abs() <= tol
    }

    /// Check every unknown and count each failure.
    ///
    /// `kind_of` maps a matrix row to what it represents.
    pub fn check_unknowns(
        &mut self,
        new: &[f64],
        old: &[f64],
        kind_of: impl Fn(usize) -> NodeKind,
        opts: &SimOptions,
    ) {
        for (row, (&n, &o)) in new.iter().zip(old).enumerate() {
            if !n.is_finite() || !Self::unknown_within(n, o, kind_of(row), opts) {
                log::debug!("unknown {} not converged: {} -> {}", row, o, n);
                self.fail_node(row);
            }
        }
    }
}
