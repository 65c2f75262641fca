//! Simulator options shared by the Newton driver and device models.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::integration::{IntegrationMethod, MAX_ORDER};

/// Tolerances and iteration limits.
///
/// Defaults follow the usual SPICE option values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimOptions {
    /// Relative tolerance for currents, voltages and charges.
    pub reltol: f64,
    /// Absolute current tolerance (A).
    pub abstol: f64,
    /// Absolute voltage tolerance (V).
    pub vntol: f64,
    /// Absolute charge tolerance (C).
    pub chgtol: f64,
    /// Truncation-error overestimation factor.
    pub trtol: f64,
    /// Minimum conductance placed across junctions (S).
    pub gmin: f64,
    /// Circuit temperature (K).
    pub temperature: f64,
    /// Temperature at which model parameters were measured (K).
    pub nominal_temperature: f64,
    /// Newton iteration ceiling for operating-point solves.
    pub dc_max_iterations: usize,
    /// Newton iteration ceiling per transient time point.
    pub tran_max_iterations: usize,
    /// Allow devices to skip re-evaluation when their inputs did not move.
    pub bypass: bool,
    /// Integration formula.
    pub method: IntegrationMethod,
    /// Highest integration order the controller may reach.
    pub max_order: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            abstol: 1e-12,
            vntol: 1e-6,
            chgtol: 1e-14,
            trtol: 7.0,
            gmin: 1e-12,
            temperature: 300.15,
            nominal_temperature: 300.15,
            dc_max_iterations: 100,
            tran_max_iterations: 10,
            bypass: true,
            method: IntegrationMethod::Trapezoidal,
            max_order: 2,
        }
    }
}

impl SimOptions {
    /// Parse options from JSON; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let opts: SimOptions =
            serde_json::from_str(text).map_err(|e| Error::InvalidOptions(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Reject option sets the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("reltol", self.reltol),
            ("abstol", self.abstol),
            ("vntol", self.vntol),
            ("trtol", self.trtol),
            ("temperature", self.temperature),
            ("nominal_temperature", self.nominal_temperature),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(Error::InvalidOptions(format!("{} must be positive", name)));
            }
        }
        let max = match self.method {
            IntegrationMethod::Trapezoidal => 2,
            IntegrationMethod::Gear => MAX_ORDER,
        };
        if self.max_order == 0 || self.max_order > max {
            return Err(Error::InvalidOptions(format!(
                "max_order must be in 1..={} for {:?}",
                max, self.method
            )));
        }
        if self.dc_max_iterations == 0 || self.tran_max_iterations == 0 {
            return Err(Error::InvalidOptions(
                "iteration limits must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Set the relative tolerance.
    pub fn with_reltol(mut self, reltol: f64) -> Self {
        self.reltol = reltol;
        self
    }

    /// Set the truncation-error factor.
    pub fn with_trtol(mut self, trtol: f64) -> Self {
        self.trtol = trtol;
        self
    }

    /// Enable or disable device bypass.
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    /// Select the integration formula and its maximum order.
    pub fn with_method(mut self, method: IntegrationMethod, max_order: usize) -> Self {
        self.method = method;
        self.max_order = max_order;
        self
    }

    /// Set the circuit temperature (K).
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Thermal voltage kT/q at the circuit temperature.
    pub fn thermal_voltage(&self) -> f64 {
        thermal_voltage(self.temperature)
    }
}

/// Boltzmann constant (J/K).
pub const BOLTZMANN: f64 = 1.380649e-23;
/// Elementary charge (C).
pub const CHARGE: f64 = 1.602176634e-19;

/// Thermal voltage at a given temperature.
pub fn thermal_voltage(temp_k: f64) -> f64 {
    BOLTZMANN * temp_k / CHARGE
}
