//! Implicit integration coefficients and local truncation error.
//!
//! A device turns a charge `q` into an equivalent conductance and current with
//! [`Integrator::integrate`]; after a time point converges it bounds the next
//! step with [`Integrator::truncation_step`] for every charge it owns.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::options::SimOptions;
use crate::state::StateStore;

/// Highest supported integration order (Gear).
pub const MAX_ORDER: usize = 6;

/// Error constants of the trapezoidal family, indexed by `order - 1`.
const TRAP_COEFF: [f64; 2] = [0.5, 0.083_333_333_33];

/// Error constants of the Gear (BDF) family, indexed by `order - 1`.
const GEAR_COEFF: [f64; MAX_ORDER] = [
    0.5,
    0.222_222_222_2,
    0.136_363_636_4,
    0.096,
    0.072_992_700_73,
    0.058_309_037_90,
];

/// Floor for the truncation denominator.
///
/// Kept independent of every tolerance so the proposed step is monotone in them.
pub const LTE_FLOOR: f64 = 1e-30;

/// Integration formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    /// Backward Euler at order 1, trapezoidal rule at order 2.
    Trapezoidal,
    /// Backward differentiation formulas, orders 1 to 6.
    Gear,
}

/// Coefficients of the active integration formula and the step history.
#[derive(Debug, Clone)]
pub struct Integrator {
    method: IntegrationMethod,
    order: usize,
    ag: [f64; MAX_ORDER + 1],
    /// `delta_old[0]` is the step being taken, `delta_old[i]` the i-th previous.
    delta_old: [f64; MAX_ORDER + 1],
}

impl Integrator {
    /// Create an integrator at order 1.
    pub fn new(method: IntegrationMethod) -> Self {
        Self {
            method,
            order: 1,
            ag: [0.0; MAX_ORDER + 1],
            delta_old: [0.0; MAX_ORDER + 1],
        }
    }

    /// Integration formula.
    pub fn method(&self) -> IntegrationMethod {
        self.method
    }

    /// Current order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Set the order, clamped to what the method supports.
    pub fn set_order(&mut self, order: usize) {
        let max = match self.method {
            IntegrationMethod::Trapezoidal => 2,
            IntegrationMethod::Gear => MAX_ORDER,
        };
        self.order = order.clamp(1, max);
    }

    /// Step being taken.
    pub fn delta(&self) -> f64 {
        self.delta_old[0]
    }

    /// Step history, newest first.
    pub fn delta_history(&self) -> &[f64] {
        &self.delta_old
    }

    /// Coefficient `ag[i]` of the formula.
    pub fn ag(&self, i: usize) -> f64 {
        self.ag[i]
    }

    /// Seed the whole step history with `delta` (start of a transient run).
    pub fn reset_history(&mut self, delta: f64) {
        self.delta_old = [delta; MAX_ORDER + 1];
        self.order = 1;
    }

    /// Set the step about to be taken.
    pub fn set_delta(&mut self, delta: f64) {
        self.delta_old[0] = delta;
    }

    /// Push the accepted step into the history.
    pub fn accept_step(&mut self) {
        self.delta_old.rotate_right(1);
        self.delta_old[0] = self.delta_old[1];
    }

    /// Extrapolation factor `h / h_prev` used by predictors.
    pub fn predictor_factor(&self) -> f64 {
        if self.delta_old[1] > 0.0 {
            self.delta_old[0] / self.delta_old[1]
        } else {
            0.0
        }
    }

    /// Recompute `ag` for the current step and order.
    pub fn compute_coefficients(&mut self) -> Result<()> {
        let delta = self.delta_old[0];
        if !(delta > 0.0) {
            return Err(Error::InvalidCircuit(format!(
                "integration step must be positive, got {}",
                delta
            )));
        }
        self.ag = [0.0; MAX_ORDER + 1];
        match (self.method, self.order) {
            (IntegrationMethod::Trapezoidal, 1) => {
                self.ag[0] = 1.0 / delta;
                self.ag[1] = -1.0 / delta;
            }
            (IntegrationMethod::Trapezoidal, _) => {
                let xmu = 0.5;
                self.ag[0] = 1.0 / delta / (1.0 - xmu);
                self.ag[1] = xmu / (1.0 - xmu);
            }
            (IntegrationMethod::Gear, order) => {
                self.ag[..=order].copy_from_slice(gear_coefficients(order, &self.delta_old)?.as_slice());
            }
        }
        Ok(())
    }

    /// Turn the charge in slot `q` into a companion conductance and current.
    ///
    /// Writes the capacitor current into slot `q + 1` of `state0` and returns
    /// `(geq, ceq)` with `geq = ag0·cap` and `ceq = i - ag0·q`.
    pub fn integrate(&self, states: &mut StateStore, q: usize, cap: f64) -> (f64, f64) {
        let ccap = q + 1;
        let current = match (self.method, self.order) {
            (IntegrationMethod::Trapezoidal, 1) => {
                self.ag[0] * states.get(0, q) + self.ag[1] * states.get(1, q)
            }
            (IntegrationMethod::Trapezoidal, _) => {
                -states.get(1, ccap) * self.ag[1]
                    + self.ag[0] * (states.get(0, q) - states.get(1, q))
            }
            (IntegrationMethod::Gear, order) => (0..=order)
                .map(|i| self.ag[i] * states.get(i, q))
                .sum(),
        };
        states.set(0, ccap, current);
        (self.ag[0] * cap, current - self.ag[0] * states.get(0, q))
    }

    /// Largest step that keeps the truncation error of charge `q` in tolerance.
    ///
    /// Slot `q + 1` must hold the capacitor current written by [`integrate`].
    ///
    /// [`integrate`]: Integrator::integrate
    pub fn truncation_step(&self, states: &StateStore, q: usize, opts: &SimOptions) -> f64 {
        let ccap = q + 1;
        let order = self.order;
        let delta = self.delta_old[0];

        let volttol =
            opts.abstol + opts.reltol * states.get(0, ccap).abs().max(states.get(1, ccap).abs());
        let chargetol = states.get(0, q).abs().max(states.get(1, q).abs());
        let chargetol = opts.reltol * chargetol.max(opts.chgtol) / delta;
        let tol = volttol.max(chargetol);

        // divided differences over the last order+1 accepted points
        let mut diff = [0.0; MAX_ORDER + 2];
        let mut deltmp = [0.0; MAX_ORDER + 2];
        for (i, d) in diff.iter_mut().enumerate().take(order + 2) {
            *d = states.get(i, q);
        }
        deltmp[..=order].copy_from_slice(&self.delta_old[..=order]);
        let mut j = order as isize;
        loop {
            for i in 0..=(j as usize) {
                diff[i] = (diff[i] - diff[i + 1]) / deltmp[i];
            }
            j -= 1;
            if j < 0 {
                break;
            }
            for i in 0..=(j as usize) {
                deltmp[i] = deltmp[i + 1] + self.delta_old[i];
            }
        }

        let factor = match self.method {
            IntegrationMethod::Trapezoidal => TRAP_COEFF[order - 1],
            IntegrationMethod::Gear => GEAR_COEFF[order - 1],
        };
        let del = opts.trtol * tol / (factor * diff[0].abs()).max(LTE_FLOOR);
        match order {
            1 => del,
            2 => del.sqrt(),
            _ => (del.ln() / order as f64).exp(),
        }
    }
}

/// Solve the variable-step BDF coefficient system for `order`.
fn gear_coefficients(order: usize, delta_old: &[f64]) -> Result<DVector<f64>> {
    let n = order + 1;
    let delta = delta_old[0];
    let mut mat = DMatrix::zeros(n, n);
    for i in 0..n {
        mat[(0, i)] = 1.0;
    }
    let mut arg = 0.0;
    for i in 1..n {
        arg += delta_old[i - 1];
        let mut arg1 = 1.0;
        for j in 1..n {
            arg1 *= arg / delta;
            mat[(j, i)] = arg1;
        }
    }
    let mut rhs = DVector::zeros(n);
    rhs[1] = -1.0 / delta;
    mat.lu()
        .solve(&rhs)
        .ok_or_else(|| Error::MatrixError("singular Gear coefficient system".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateSlot, StateStore};

    #[derive(Clone, Copy)]
    enum Slot {
        Q,
        #[allow(dead_code)]
        Cq,
    }

    impl StateSlot for Slot {
        const COUNT: usize = 2;
        fn offset(self) -> usize {
            self as usize
        }
    }

    #[test]
    fn test_backward_euler_coefficients() {
        let mut int = Integrator::new(IntegrationMethod::Trapezoidal);
        int.reset_history(1e-6);
        int.compute_coefficients().unwrap();
        assert!((int.ag(0) - 1e6).abs() < 1e-3);
        assert!((int.ag(1) + 1e6).abs() < 1e-3);
    }

    #[test]
    fn test_gear1_matches_backward_euler() {
        let mut gear = Integrator::new(IntegrationMethod::Gear);
        gear.reset_history(1e-3);
        gear.compute_coefficients().unwrap();
        assert!((gear.ag(0) - 1e3).abs() < 1e-6, "ag0 = {}", gear.ag(0));
        assert!((gear.ag(1) + 1e3).abs() < 1e-6, "ag1 = {}", gear.ag(1));
    }

    #[test]
    fn test_gear2_uniform_steps() {
        // BDF2 with uniform h: i = (3q0 - 4q1 + q2) / 2h
        let mut gear = Integrator::new(IntegrationMethod::Gear);
        gear.reset_history(1.0);
        gear.set_order(2);
        gear.compute_coefficients().unwrap();
        assert!((gear.ag(0) - 1.5).abs() < 1e-12);
        assert!((gear.ag(1) + 2.0).abs() < 1e-12);
        assert!((gear.ag(2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_integrate_linear_capacitor() {
        let mut states = StateStore::new();
        let block = states.allocate(Slot::COUNT);
        let q = block.at(Slot::Q);
        let cap = 1e-6;
        states.set(1, q, cap * 1.0);
        states.set(0, q, cap * 2.0);

        let mut int = Integrator::new(IntegrationMethod::Trapezoidal);
        int.reset_history(1e-3);
        int.compute_coefficients().unwrap();
        let (geq, ceq) = int.integrate(&mut states, q, cap);

        assert!((geq - 1e-3).abs() < 1e-15);
        // i = C dv/dt = 1e-6 * 1 / 1e-3
        assert!((states.get(0, q + 1) - 1e-3).abs() < 1e-15);
        // the companion reproduces the current at the present voltage
        assert!((geq * 2.0 + ceq - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn test_truncation_zero_for_linear_charge() {
        let mut states = StateStore::new();
        let block = states.allocate(Slot::COUNT);
        let q = block.at(Slot::Q);
        for age in 0..4 {
            states.set(age, q, 1e-9 * (10.0 - age as f64));
        }
        let mut int = Integrator::new(IntegrationMethod::Trapezoidal);
        int.reset_history(1e-6);
        int.set_order(2);
        int.compute_coefficients().unwrap();
        let step = int.truncation_step(&states, q, &SimOptions::default());
        assert!(step > 1.0, "linear charge should not constrain the step: {}", step);
    }

    #[test]
    fn test_truncation_tightens_with_tolerance() {
        let mut states = StateStore::new();
        let block = states.allocate(Slot::COUNT);
        let q = block.at(Slot::Q);
        for age in 0..4 {
            let t = -(age as f64) * 1e-6;
            states.set(age, q, 1e-9 * (t * 1e6).exp());
        }
        let mut int = Integrator::new(IntegrationMethod::Trapezoidal);
        int.reset_history(1e-6);
        int.set_order(2);
        int.compute_coefficients().unwrap();

        let loose = int.truncation_step(&states, q, &SimOptions::default());
        let tight = int.truncation_step(&states, q, &SimOptions::default().with_trtol(1.0));
        assert!(tight <= loose, "tight {} > loose {}", tight, loose);
    }
}
