//! Type definitions for transient analysis.

use std::collections::HashMap;

use nodal_core::NodeTable;

/// Divisor applied to the step after a Newton failure.
pub const STEP_CUT_FACTOR: f64 = 8.0;

/// Initial conditions for transient analysis.
///
/// Stores node name -> voltage mappings, used when the run skips the
/// operating point.
#[derive(Debug, Clone, Default)]
pub struct InitialConditions {
    /// Node voltages keyed by node name.
    pub voltages: HashMap<String, f64>,
}

impl InitialConditions {
    /// Create an empty initial conditions set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node voltage initial condition.
    pub fn set_voltage(&mut self, node: &str, voltage: f64) {
        self.voltages.insert(node.to_ascii_lowercase(), voltage);
    }

    /// Write the known voltages into a solution vector.
    ///
    /// Names the circuit does not know are skipped with a warning.
    pub fn apply(&self, solution: &mut [f64], nodes: &NodeTable) {
        for (node, &voltage) in &self.voltages {
            match nodes.find(node).map(|id| id.index()) {
                Ok(Some(idx)) if idx < solution.len() => solution[idx] = voltage,
                _ => log::warn!("initial condition for unknown node {}", node),
            }
        }
    }

    /// Check if any initial conditions are set.
    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }
}

/// Transient analysis parameters.
#[derive(Debug, Clone)]
pub struct TransientParams {
    /// Stop time (s).
    pub tstop: f64,
    /// Suggested output step (s).
    pub tstep: f64,
    /// Largest step the controller may take (s).
    pub h_max: f64,
    /// Below this step a failing point aborts the run (s).
    pub h_min: f64,
    /// First step after the operating point (s).
    pub h_init: f64,
    /// Start from initial conditions instead of an operating point.
    pub use_ic: bool,
    pub initial_conditions: InitialConditions,
}

impl Default for TransientParams {
    fn default() -> Self {
        Self::new(1e-5, 1e-3)
    }
}

impl TransientParams {
    /// Parameters for a run to `tstop` with output step `tstep`.
    pub fn new(tstep: f64, tstop: f64) -> Self {
        let h_max = tstep.min(tstop / 50.0);
        Self {
            tstop,
            tstep,
            h_max,
            h_min: 1e-11 * h_max,
            h_init: (tstop / 100.0).min(tstep) / 10.0,
            use_ic: false,
            initial_conditions: InitialConditions::new(),
        }
    }

    /// Set the largest step.
    pub fn with_max_step(mut self, h_max: f64) -> Self {
        self.h_max = h_max;
        self.h_min = 1e-11 * h_max;
        self
    }

    /// Skip the operating point and start from `ic`.
    pub fn with_initial_conditions(mut self, ic: InitialConditions) -> Self {
        self.initial_conditions = ic;
        self.use_ic = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(self.tstop > 0.0) {
            return Err(format!("stop time must be positive, got {}", self.tstop));
        }
        if !(self.h_min > 0.0) || !(self.h_max >= self.h_min) {
            return Err(format!(
                "step bounds must satisfy 0 < h_min <= h_max, got {} and {}",
                self.h_min, self.h_max
            ));
        }
        if !(self.h_init > 0.0) {
            return Err(format!("initial step must be positive, got {}", self.h_init));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_step_bounds() {
        let p = TransientParams::new(1e-6, 1e-3);
        assert_eq!(p.h_max, 1e-6);
        assert!((p.h_init - 1e-7).abs() < 1e-20);
        assert!(p.validate().is_ok());

        // a coarse output step is capped at tstop/50
        let p = TransientParams::new(1e-3, 1e-3);
        assert!((p.h_max - 2e-5).abs() < 1e-18);
    }

    #[test]
    fn test_initial_conditions_apply() {
        let mut nodes = NodeTable::new();
        nodes.node("a");
        nodes.node("b");
        let mut ic = InitialConditions::new();
        ic.set_voltage("B", 1.5);
        ic.set_voltage("missing", 3.0);
        let mut sol = vec![0.0; 2];
        ic.apply(&mut sol, &nodes);
        assert_eq!(sol, [0.0, 1.5]);
    }
}
