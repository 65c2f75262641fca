//! Error types for nodal-solver.

use std::fmt;

use thiserror::Error;

/// Why a device stopped the analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HaltReason {
    /// Terminate and report.
    Finish { time: f64 },
    /// Suspended; the analysis can be resumed.
    Pause { time: f64 },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Finish { time } => write!(f, "finish requested at t={:e}", time),
            HaltReason::Pause { time } => write!(f, "pause requested at t={:e}", time),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix")]
    SingularMatrix,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no convergence after {iterations} iterations{}", trouble_suffix(.trouble))]
    Nonconvergence {
        iterations: usize,
        /// Last element reported as failing, for diagnostics only.
        trouble: Option<String>,
    },

    #[error("time step {step:e} too small at t={time:e}")]
    TimestepTooSmall { time: f64, step: f64 },

    #[error("analysis halted: {0}")]
    Halted(HaltReason),

    #[error("unknown device type: {0}")]
    UnknownDevice(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("invalid analysis: {0}")]
    InvalidAnalysis(String),

    #[error(transparent)]
    Core(#[from] nodal_core::Error),
}

fn trouble_suffix(trouble: &Option<String>) -> String {
    match trouble {
        Some(t) => format!(" (trouble element: {})", t),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonconvergence_names_trouble_element() {
        let e = Error::Nonconvergence {
            iterations: 100,
            trouble: Some("dmod/d1".into()),
        };
        assert_eq!(
            e.to_string(),
            "no convergence after 100 iterations (trouble element: dmod/d1)"
        );
        let e = Error::Nonconvergence {
            iterations: 10,
            trouble: None,
        };
        assert_eq!(e.to_string(), "no convergence after 10 iterations");
    }
}
