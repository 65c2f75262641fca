//! AC small-signal frequency-domain analysis.
//!
//! Nonlinear devices are linearized at the DC operating point; each model's
//! `ac_load` stamps `G + jωC` into the complex half of the matrix store and
//! independent sources stamp their AC phasors.

use std::f64::consts::PI;

use nalgebra::DVector;
use nodal_core::{AnalysisKind, DiagnosticSink};
use num_complex::Complex64;

use crate::circuit::Circuit;
use crate::dc::{self, DcResult};
use crate::error::{Error, Result};
use crate::linear::solve_store_complex;

/// AC sweep type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcSweepType {
    /// Linear frequency spacing.
    Linear,
    /// Logarithmic spacing, points per decade.
    Decade,
    /// Logarithmic spacing, points per octave.
    Octave,
}

/// AC analysis parameters.
#[derive(Debug, Clone)]
pub struct AcParams {
    /// Start frequency (Hz).
    pub fstart: f64,
    /// Stop frequency (Hz).
    pub fstop: f64,
    /// Number of points (total for Linear, per decade/octave for log sweeps).
    pub num_points: usize,
    pub sweep_type: AcSweepType,
}

impl AcParams {
    /// Logarithmic sweep with `per_decade` points per decade.
    pub fn decade(per_decade: usize, fstart: f64, fstop: f64) -> Self {
        Self {
            fstart,
            fstop,
            num_points: per_decade,
            sweep_type: AcSweepType::Decade,
        }
    }

    /// Linear sweep with `points` points in total.
    pub fn linear(points: usize, fstart: f64, fstop: f64) -> Self {
        Self {
            fstart,
            fstop,
            num_points: points,
            sweep_type: AcSweepType::Linear,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.fstart > 0.0) || !(self.fstop >= self.fstart) || self.num_points == 0 {
            return Err(Error::InvalidAnalysis(format!(
                "AC sweep needs 0 < fstart <= fstop and at least one point, got {} {} {}",
                self.fstart, self.fstop, self.num_points
            )));
        }
        Ok(())
    }
}

/// Frequencies visited by a sweep, in increasing order.
pub fn generate_frequencies(params: &AcParams) -> Vec<f64> {
    let log_sweep = |base: f64| {
        let spans = (params.fstop / params.fstart).ln() / base.ln();
        let total_points = (params.num_points as f64 * spans).ceil() as usize + 1;
        (0..total_points)
            .map(|i| params.fstart * base.powf(i as f64 / params.num_points as f64))
            .filter(|&f| f <= params.fstop * 1.001)
            .collect()
    };
    match params.sweep_type {
        AcSweepType::Linear => {
            if params.num_points <= 1 {
                return vec![params.fstart];
            }
            let step = (params.fstop - params.fstart) / (params.num_points as f64 - 1.0);
            (0..params.num_points)
                .map(|i| params.fstart + step * i as f64)
                .collect()
        }
        AcSweepType::Decade => log_sweep(10.0),
        AcSweepType::Octave => log_sweep(2.0),
    }
}

/// A single frequency point in AC analysis.
#[derive(Debug, Clone)]
pub struct AcPoint {
    /// Frequency (Hz).
    pub frequency: f64,
    /// Complex solution vector (node voltages + branch currents).
    pub solution: DVector<Complex64>,
}

/// Result of AC analysis.
#[derive(Debug, Clone)]
pub struct AcResult {
    /// The operating point the circuit was linearized at.
    pub operating_point: DcResult,
    pub points: Vec<AcPoint>,
}

impl AcResult {
    /// Complex value of row `idx` at every frequency.
    pub fn phasor(&self, idx: usize) -> Vec<(f64, Complex64)> {
        self.points
            .iter()
            .map(|p| (p.frequency, p.solution[idx]))
            .collect()
    }

    /// Magnitude of row `idx` in dB.
    pub fn magnitude_db(&self, idx: usize) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.frequency, 20.0 * p.solution[idx].norm().log10()))
            .collect()
    }

    /// Phase of row `idx` in degrees.
    pub fn phase_deg(&self, idx: usize) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.frequency, p.solution[idx].arg().to_degrees()))
            .collect()
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.frequency).collect()
    }
}

/// Run an AC small-signal analysis.
pub fn ac_sweep(
    circuit: &mut Circuit,
    params: &AcParams,
    diag: &mut dyn DiagnosticSink,
) -> Result<AcResult> {
    params.validate()?;
    let operating_point = dc::small_signal_point(circuit, AnalysisKind::Ac, diag)?;
    let frequencies = generate_frequencies(params);
    let mut points = Vec::with_capacity(frequencies.len());
    for frequency in frequencies {
        circuit.ac_load(2.0 * PI * frequency)?;
        let solution = solve_store_complex(circuit.matrix())?;
        points.push(AcPoint {
            frequency,
            solution,
        });
    }
    log::info!("AC sweep: {} frequencies", points.len());
    Ok(AcResult {
        operating_point,
        points,
    })
}
