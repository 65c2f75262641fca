//! DC operating point.

use nalgebra::DVector;
use nodal_core::{AnalysisKind, ConvergenceChecker, DiagnosticSink, InitPhase, Integrator, Mode};

use crate::circuit::Circuit;
use crate::error::{Error, HaltReason, Result};
use crate::newton::{self, NewtonStats};
use nodal_devices::LoadStatus;

/// Result of an operating-point solve.
#[derive(Debug, Clone)]
pub struct DcResult {
    /// Node voltages and branch currents, indexed by matrix row.
    pub solution: DVector<f64>,
    pub iterations: usize,
    /// Instance evaluations skipped by bypass.
    pub bypassed: usize,
}

impl DcResult {
    fn new(solution: &[f64], stats: NewtonStats) -> Self {
        Self {
            solution: DVector::from_column_slice(solution),
            iterations: stats.iterations,
            bypassed: stats.bypassed,
        }
    }

    /// Value of matrix row `index`.
    pub fn value(&self, index: usize) -> f64 {
        self.solution[index]
    }
}

/// Solve the DC operating point from a cold start.
///
/// Devices seed their own bias guesses in the first (junction) phase; the
/// solution vector starts at zero.
pub fn operating_point(circuit: &mut Circuit, diag: &mut dyn DiagnosticSink) -> Result<DcResult> {
    circuit.ensure_ready(diag)?;
    circuit.solution.fill(0.0);
    let integrator = Integrator::new(circuit.options().method);
    let max = circuit.options().dc_max_iterations;
    let stats = newton::solve(circuit, Mode::dc(), &integrator, 0.0, max, diag)?;
    log::info!(
        "operating point converged in {} iterations ({} bypassed evaluations)",
        stats.iterations,
        stats.bypassed
    );
    Ok(DcResult::new(&circuit.solution, stats))
}

/// Operating point followed by one small-signal capture pass.
///
/// The capture pass lets nonlinear devices store the conductances and
/// capacitances that `ac_load` and `pz_load` stamp.
pub(crate) fn small_signal_point(
    circuit: &mut Circuit,
    analysis: AnalysisKind,
    diag: &mut dyn DiagnosticSink,
) -> Result<DcResult> {
    let op = operating_point(circuit, diag)?;
    let integrator = Integrator::new(circuit.options().method);
    let mut conv = ConvergenceChecker::new();
    let mode = Mode::new(analysis, InitPhase::SmallSignal);
    let pass = circuit.load(mode, &integrator, &mut conv, 0.0, diag)?;
    match pass.status {
        LoadStatus::Finish => Err(Error::Halted(HaltReason::Finish { time: 0.0 })),
        LoadStatus::Pause => Err(Error::Halted(HaltReason::Pause { time: 0.0 })),
        LoadStatus::Continue => Ok(op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodal_core::{CollectSink, ParamList};
    use nodal_devices::DeviceRegistry;

    #[test]
    fn test_diode_operating_point() {
        let reg = DeviceRegistry::with_builtins();
        let mut ckt = Circuit::default();
        ckt.add_model_from(&reg, "vsource", "v", &ParamList::new())
            .unwrap();
        ckt.add_model_from(&reg, "resistor", "r", &ParamList::new())
            .unwrap();
        ckt.add_model_from(&reg, "diode", "dmod", &ParamList::new())
            .unwrap();
        ckt.add_instance("v", "v1", &["in", "0"], &ParamList::new().with("dc", 5.0))
            .unwrap();
        ckt.add_instance("r", "r1", &["in", "a"], &ParamList::new().with("r", 1e3))
            .unwrap();
        ckt.add_instance("dmod", "d1", &["a", "0"], &ParamList::new())
            .unwrap();
        let mut sink = CollectSink::new();
        let op = operating_point(&mut ckt, &mut sink).unwrap();

        let va = ckt.voltage("a").unwrap();
        assert!(va > 0.6 && va < 0.75, "va = {}", va);
        // KCL: resistor current equals diode current
        let ir = (5.0 - va) / 1e3;
        let vt = nodal_core::options::thermal_voltage(ckt.options().temperature);
        let id = 1e-14 * ((va / vt).exp() - 1.0);
        assert!(
            (ir - id).abs() < 1e-3 * ir + 1e-9,
            "ir = {}, id = {}",
            ir,
            id
        );
        assert!(op.iterations > 3);
    }

    #[test]
    fn test_operating_point_runs_setup_when_dirty() {
        let reg = DeviceRegistry::with_builtins();
        let mut ckt = Circuit::default();
        ckt.add_model_from(&reg, "isource", "i", &ParamList::new())
            .unwrap();
        ckt.add_model_from(&reg, "resistor", "r", &ParamList::new())
            .unwrap();
        ckt.add_instance("i", "i1", &["0", "a"], &ParamList::new().with("dc", 1e-3))
            .unwrap();
        ckt.add_instance("r", "r1", &["a", "0"], &ParamList::new().with("r", 2e3))
            .unwrap();
        let mut sink = CollectSink::new();
        let op = operating_point(&mut ckt, &mut sink).unwrap();
        assert!((op.value(0) - 2.0).abs() < 1e-9, "v(a) = {}", op.value(0));
    }
}
