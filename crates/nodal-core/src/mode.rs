//! Analysis and Newton initialization mode.

/// Which analysis is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    /// DC operating point.
    DcOp,
    /// Time-domain analysis.
    Transient,
    /// Small-signal frequency sweep.
    Ac,
    /// Pole-zero analysis.
    PoleZero,
}

/// Initialization phase of the Newton iteration at one analysis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    /// Cold start: devices seed their own bias guesses.
    Junction,
    /// Devices marked off are held off.
    Fix,
    /// Ordinary iteration; the only phase in which a point may be accepted.
    Float,
    /// First point of a transient run; devices read the operating point from history.
    Transient,
    /// Devices extrapolate their voltages from accepted history.
    Predict,
    /// Capture of small-signal parameters at a converged operating point.
    SmallSignal,
}

/// Mode flags passed to every device load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub analysis: AnalysisKind,
    pub phase: InitPhase,
    /// Use instance initial conditions instead of solving for an operating point.
    pub use_ic: bool,
}

impl Mode {
    /// Cold-start DC operating point.
    pub fn dc() -> Self {
        Self {
            analysis: AnalysisKind::DcOp,
            phase: InitPhase::Junction,
            use_ic: false,
        }
    }

    /// Mode for the given analysis and phase.
    pub fn new(analysis: AnalysisKind, phase: InitPhase) -> Self {
        Self {
            analysis,
            phase,
            use_ic: false,
        }
    }

    /// Same mode with a different phase.
    pub fn with_phase(self, phase: InitPhase) -> Self {
        Self { phase, ..self }
    }

    /// True when charges must be integrated.
    pub fn is_transient(self) -> bool {
        self.analysis == AnalysisKind::Transient
    }

    /// True while devices marked off are exempt from convergence checks.
    pub fn off_exempt(self) -> bool {
        matches!(self.phase, InitPhase::Junction | InitPhase::Fix)
    }

    /// True when a device may reuse its previous evaluation.
    pub fn bypass_allowed(self) -> bool {
        matches!(self.phase, InitPhase::Fix | InitPhase::Float)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self::dc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_flags() {
        let m = Mode::dc();
        assert!(m.off_exempt());
        assert!(!m.bypass_allowed());
        let m = m.with_phase(InitPhase::Float);
        assert!(!m.off_exempt());
        assert!(m.bypass_allowed());
        assert!(!m.is_transient());
        assert!(Mode::new(AnalysisKind::Transient, InitPhase::Predict).is_transient());
    }
}
