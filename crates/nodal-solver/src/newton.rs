//! Newton-Raphson iteration at one analysis point.
//!
//! Every iteration evaluates all devices, solves the linearized system and
//! then tests the new iterate: first every unknown against the previous one,
//! then every device's predicted current against its evaluated current. A
//! point is accepted only in the `Float` phase with zero nonconvergence.

use nodal_core::{ConvergenceChecker, DiagnosticSink, InitPhase, Integrator, Mode, NodeId};
use nodal_devices::LoadStatus;

use crate::circuit::Circuit;
use crate::error::{Error, HaltReason, Result};
use crate::linear::solve_store;

/// Work done by one converged Newton solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NewtonStats {
    /// Evaluation passes, including the accepting one.
    pub iterations: usize,
    /// Instance evaluations skipped by bypass, summed over iterations.
    pub bypassed: usize,
}

/// Drive `circuit` to convergence starting from `mode.phase`.
///
/// The circuit's current solution is the starting iterate and holds the
/// converged point on success. On a halt request the solution is left as
/// the devices last saw it.
pub fn solve(
    circuit: &mut Circuit,
    mode: Mode,
    integrator: &Integrator,
    time: f64,
    max_iterations: usize,
    diag: &mut dyn DiagnosticSink,
) -> Result<NewtonStats> {
    let mut mode = mode;
    let mut conv = ConvergenceChecker::new();
    let mut previous = circuit.solution.clone();
    let mut stats = NewtonStats::default();

    for iteration in 1..=max_iterations {
        conv.reset();
        let pass = circuit.load(mode, integrator, &mut conv, time, diag)?;
        stats.iterations = iteration;
        stats.bypassed += pass.bypassed;
        match pass.status {
            LoadStatus::Finish => return Err(Error::Halted(HaltReason::Finish { time })),
            LoadStatus::Pause => return Err(Error::Halted(HaltReason::Pause { time })),
            LoadStatus::Continue => {}
        }

        previous.copy_from_slice(&circuit.solution);
        let x = solve_store(&circuit.matrix)?;
        circuit.solution.copy_from_slice(x.as_slice());

        if conv.noncon() == 0 && iteration > 1 {
            let nodes = circuit.nodes();
            conv.check_unknowns(
                &circuit.solution,
                &previous,
                |row| nodes.kind_of_row(row),
                circuit.options(),
            );
            if conv.noncon() == 0 {
                circuit.convergence_test(mode, &mut conv);
            }
        } else if conv.noncon() == 0 {
            // the first solve has nothing to compare against
            conv.force();
        }

        log::debug!(
            "newton {} {:?}: noncon {}, bypassed {}",
            iteration,
            mode.phase,
            conv.noncon(),
            pass.bypassed
        );

        match mode.phase {
            InitPhase::Float | InitPhase::SmallSignal => {
                if conv.is_converged() {
                    return Ok(stats);
                }
            }
            InitPhase::Junction => mode.phase = InitPhase::Fix,
            InitPhase::Fix => {
                if conv.is_converged() {
                    mode.phase = InitPhase::Float;
                }
            }
            InitPhase::Transient | InitPhase::Predict => mode.phase = InitPhase::Float,
        }
    }

    let trouble = trouble_element(circuit, &conv);
    log::warn!(
        "no convergence after {} iterations at t={:e} (trouble element: {})",
        max_iterations,
        time,
        trouble.as_deref().unwrap_or("none")
    );
    Err(Error::Nonconvergence {
        iterations: max_iterations,
        trouble,
    })
}

/// The last failing instance, or failing unknown when no device was named.
fn trouble_element(circuit: &Circuit, conv: &ConvergenceChecker) -> Option<String> {
    conv.trouble()
        .and_then(|r| circuit.describe(r))
        .or_else(|| {
            conv.trouble_node().and_then(|row| {
                circuit
                    .nodes()
                    .name(NodeId::new(row as u32 + 1))
                    .map(|n| format!("node {}", n))
            })
        })
}
