//! Time-step and order control from truncation-error estimates.

use nodal_core::Integrator;

use crate::circuit::Circuit;

/// Verdict on a converged time point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepDecision {
    /// Keep the point and continue with step `next`.
    Accept { next: f64 },
    /// Discard the point and retry with step `retry`.
    Reject { retry: f64 },
}

/// Accept/reject and order policy of the transient driver.
#[derive(Debug, Clone)]
pub struct StepController {
    pub h_min: f64,
    pub h_max: f64,
    pub max_order: usize,
}

impl StepController {
    pub fn new(h_min: f64, h_max: f64, max_order: usize) -> Self {
        Self {
            h_min,
            h_max,
            max_order,
        }
    }

    /// Largest step the circuit's charges allow after a step of `h`.
    ///
    /// Never more than twice the step just taken.
    pub fn propose(&self, circuit: &Circuit, integrator: &Integrator, h: f64) -> f64 {
        circuit.truncation(integrator, 2.0 * h)
    }

    /// Judge a step of `h` given the truncation proposal.
    pub fn judge(&self, h: f64, proposed: f64) -> StepDecision {
        if proposed > 0.9 * h {
            StepDecision::Accept {
                next: proposed.min(2.0 * h).min(self.h_max),
            }
        } else {
            StepDecision::Reject { retry: proposed }
        }
    }

    /// Try one order higher after an accepted step of `h`.
    ///
    /// Returns the step the higher order allows when it is worth switching.
    pub fn raise_order(&self, circuit: &Circuit, integrator: &mut Integrator, h: f64) -> Option<f64> {
        let order = integrator.order();
        if order >= self.max_order {
            return None;
        }
        let mut trial = integrator.clone();
        trial.set_order(order + 1);
        if trial.order() == order {
            return None;
        }
        let proposed = self.propose(circuit, &trial, h);
        if proposed > 1.05 * h {
            log::debug!("integration order {} -> {}", order, order + 1);
            integrator.set_order(order + 1);
            Some(proposed.min(2.0 * h).min(self.h_max))
        } else {
            None
        }
    }
}
