//! The transient driver.
//!
//! A [`TransientRun`] owns the step state between accepted points so a run
//! halted by a device can be resumed by calling [`TransientRun::step`] again.

use nodal_core::{AnalysisKind, DiagnosticSink, InitPhase, Integrator, Mode};

use super::controller::{StepController, StepDecision};
use super::result::TransientResult;
use super::types::{STEP_CUT_FACTOR, TransientParams};
use crate::circuit::Circuit;
use crate::dc;
use crate::error::{Error, Result};
use crate::newton;

/// What one call to [`TransientRun::step`] achieved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// A point was accepted at this time.
    Accepted(f64),
    /// The stop time had already been reached.
    Finished,
}

/// A transient analysis in progress.
pub struct TransientRun<'c> {
    circuit: &'c mut Circuit,
    params: TransientParams,
    integrator: Integrator,
    controller: StepController,
    time: f64,
    /// Step to try next.
    delta: f64,
    /// No point has been accepted since the initial one.
    first: bool,
    /// Solution at the last accepted point.
    accepted: Vec<f64>,
    result: TransientResult,
}

impl<'c> TransientRun<'c> {
    /// Find the starting point and record it at t = 0.
    pub fn start(
        circuit: &'c mut Circuit,
        params: TransientParams,
        diag: &mut dyn DiagnosticSink,
    ) -> Result<Self> {
        params.validate().map_err(Error::InvalidAnalysis)?;
        circuit.ensure_ready(diag)?;

        if params.use_ic {
            circuit.seed_solution(&params.initial_conditions);
            circuit.initial_conditions();
            log::info!("transient: starting from initial conditions");
        } else {
            dc::operating_point(circuit, diag)?;
        }
        circuit.states.seed_history();

        let opts = circuit.options();
        let mut integrator = Integrator::new(opts.method);
        integrator.reset_history(params.h_init);
        let controller = StepController::new(params.h_min, params.h_max, opts.max_order);

        let mut result = TransientResult::new();
        result.push(0.0, &circuit.solution, None);
        let accepted = circuit.solution.clone();
        Ok(Self {
            circuit,
            delta: params.h_init,
            params,
            integrator,
            controller,
            time: 0.0,
            first: true,
            accepted,
            result,
        })
    }

    /// Time of the last accepted point.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn result(&self) -> &TransientResult {
        &self.result
    }

    pub fn into_result(self) -> TransientResult {
        self.result
    }

    /// Advance to the next accepted point.
    ///
    /// Steps rejected by Newton failure or by the truncation test are retried
    /// inside this call with a smaller step. On a halt request the run is
    /// rolled back to the last accepted point.
    pub fn step(&mut self, diag: &mut dyn DiagnosticSink) -> Result<StepOutcome> {
        if self.time >= self.params.tstop {
            return Ok(StepOutcome::Finished);
        }
        loop {
            let (h, t_new) = self.next_step();
            self.integrator.set_delta(h);
            self.integrator.compute_coefficients()?;

            let phase = if self.first {
                InitPhase::Transient
            } else {
                InitPhase::Predict
            };
            let mode = Mode {
                analysis: AnalysisKind::Transient,
                phase,
                use_ic: self.params.use_ic && self.first,
            };
            let max = self.circuit.options().tran_max_iterations;

            match newton::solve(self.circuit, mode, &self.integrator, t_new, max, diag) {
                Ok(stats) => self.result.newton_iterations += stats.iterations,
                Err(Error::Nonconvergence { iterations, .. }) => {
                    self.rollback();
                    self.result.failed_steps += 1;
                    self.integrator.set_order(1);
                    self.delta = h / STEP_CUT_FACTOR;
                    log::debug!(
                        "t={:e}: no convergence in {} iterations, step cut to {:e}",
                        t_new,
                        iterations,
                        self.delta
                    );
                    self.check_step(self.delta)?;
                    continue;
                }
                Err(e) => {
                    self.rollback();
                    return Err(e);
                }
            }

            let next = if self.first {
                // the operating point has no charge history to test against
                h
            } else {
                let proposed = self.controller.propose(self.circuit, &self.integrator, h);
                match self.controller.judge(h, proposed) {
                    StepDecision::Accept { next } => self
                        .controller
                        .raise_order(self.circuit, &mut self.integrator, h)
                        .unwrap_or(next),
                    StepDecision::Reject { retry } => {
                        self.rollback();
                        self.result.rejected_steps += 1;
                        log::debug!("t={:e}: truncation rejects step {:e}, retry {:e}", t_new, h, retry);
                        self.check_step(retry)?;
                        self.delta = retry;
                        continue;
                    }
                }
            };

            self.accept(t_new, h);
            self.delta = next;
            return Ok(StepOutcome::Accepted(t_new));
        }
    }

    /// Run until the stop time.
    pub fn run_to_end(&mut self, diag: &mut dyn DiagnosticSink) -> Result<()> {
        while let StepOutcome::Accepted(_) = self.step(diag)? {}
        log::info!(
            "transient: {} points, {} rejected, {} Newton failures, steps {:e}..{:e}",
            self.result.points.len(),
            self.result.rejected_steps,
            self.result.failed_steps,
            self.result.min_step_used,
            self.result.max_step_used
        );
        Ok(())
    }

    /// Step to try and the time it lands on, clamped to the stop time.
    fn next_step(&self) -> (f64, f64) {
        let h = self.delta.min(self.params.h_max);
        let remaining = self.params.tstop - self.time;
        // never leave a sliver shorter than h_min before tstop
        if h >= remaining || remaining - h < self.params.h_min {
            (remaining, self.params.tstop)
        } else {
            (h, self.time + h)
        }
    }

    fn check_step(&self, step: f64) -> Result<()> {
        if step < self.params.h_min {
            return Err(Error::TimestepTooSmall {
                time: self.time,
                step,
            });
        }
        Ok(())
    }

    /// Return to the last accepted point.
    fn rollback(&mut self) {
        self.circuit.states.restore_present();
        self.circuit.solution.copy_from_slice(&self.accepted);
    }

    fn accept(&mut self, time: f64, h: f64) {
        self.circuit.states.rotate();
        self.integrator.accept_step();
        self.time = time;
        self.first = false;
        self.accepted.copy_from_slice(&self.circuit.solution);
        self.result.push(time, &self.circuit.solution, Some(h));
    }
}

/// Run a transient analysis from start to stop time.
pub fn transient(
    circuit: &mut Circuit,
    params: TransientParams,
    diag: &mut dyn DiagnosticSink,
) -> Result<TransientResult> {
    let mut run = TransientRun::start(circuit, params, diag)?;
    run.run_to_end(diag)?;
    Ok(run.into_result())
}
