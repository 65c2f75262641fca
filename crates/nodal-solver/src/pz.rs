//! Pole search on the linearized circuit.
//!
//! Each model's `pz_load` stamps `G + sC` at a complex frequency `s`; the
//! poles of the network are the roots of `det Y(s)`. Roots are found one at
//! a time with Muller's method, dividing out every root already found.

use nodal_core::{AnalysisKind, DiagnosticSink};
use num_complex::Complex64;
use num_traits::Zero;

use crate::circuit::Circuit;
use crate::dc::{self, DcResult};
use crate::error::Result;
use crate::linear::complex_determinant;

/// Pole search parameters.
#[derive(Debug, Clone)]
pub struct PzParams {
    /// Magnitude of the starting points (rad/s).
    pub scale: f64,
    /// Relative step at which a root is considered found.
    pub tolerance: f64,
    /// Muller iterations per root.
    pub max_iterations: usize,
}

impl Default for PzParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            tolerance: 1e-10,
            max_iterations: 200,
        }
    }
}

/// Result of a pole search.
#[derive(Debug, Clone)]
pub struct PzResult {
    pub operating_point: DcResult,
    /// Poles in rad/s, ordered by magnitude.
    pub poles: Vec<Complex64>,
}

/// Find the poles of the circuit linearized at its operating point.
pub fn poles(
    circuit: &mut Circuit,
    params: &PzParams,
    diag: &mut dyn DiagnosticSink,
) -> Result<PzResult> {
    let operating_point = dc::small_signal_point(circuit, AnalysisKind::PoleZero, diag)?;
    let max_poles = circuit.size();
    let mut found: Vec<Complex64> = Vec::new();

    while found.len() < max_poles {
        let starts = [
            Complex64::new(-params.scale, 0.0),
            Complex64::new(-0.5 * params.scale, 0.0),
            Complex64::zero(),
        ];
        let mut deflated = |s: Complex64| -> Result<Complex64> {
            circuit.pz_load(s)?;
            let det = complex_determinant(circuit.matrix());
            Ok(found.iter().fold(det, |acc, &p| acc / (s - p)))
        };
        let Some(root) = muller(&mut deflated, starts, params)? else {
            break;
        };
        log::debug!("pole {}", root);
        found.push(root);
        // poles of a real network come in conjugate pairs
        if root.im.abs() > params.tolerance * root.norm() && found.len() < max_poles {
            found.push(root.conj());
        }
    }

    found.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
    log::info!("pole search: {} poles", found.len());
    Ok(PzResult {
        operating_point,
        poles: found,
    })
}

/// One root of `f` near `starts`, or `None` when the iteration does not
/// settle on a point where `f` actually vanishes.
fn muller(
    f: &mut impl FnMut(Complex64) -> Result<Complex64>,
    starts: [Complex64; 3],
    params: &PzParams,
) -> Result<Option<Complex64>> {
    let [mut x0, mut x1, mut x2] = starts;
    let (mut f0, mut f1, mut f2) = (f(x0)?, f(x1)?, f(x2)?);
    let reference = f0.norm().max(f1.norm()).max(f2.norm());
    if !(reference > 0.0) || !reference.is_finite() {
        return Ok(None);
    }

    for _ in 0..params.max_iterations {
        let h1 = x1 - x0;
        let h2 = x2 - x1;
        let d1 = (f1 - f0) / h1;
        let d2 = (f2 - f1) / h2;
        let a = (d2 - d1) / (h2 + h1);
        let b = a * h2 + d2;
        let disc = (b * b - a * f2 * 4.0).sqrt();
        let den = if (b + disc).norm() >= (b - disc).norm() {
            b + disc
        } else {
            b - disc
        };
        if den.is_zero() {
            return Ok(None);
        }
        let dx = -f2 * 2.0 / den;
        let x3 = x2 + dx;
        if !(x3.re.is_finite() && x3.im.is_finite()) {
            return Ok(None);
        }
        let f3 = f(x3)?;
        if dx.norm() <= params.tolerance * (x3.norm() + params.tolerance) || f3.is_zero() {
            if f3.norm() <= 1e-6 * reference {
                return Ok(Some(x3));
            }
            return Ok(None);
        }
        (x0, x1, x2) = (x1, x2, x3);
        (f0, f1, f2) = (f1, f2, f3);
    }
    Ok(None)
}
