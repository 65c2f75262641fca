//! Result types for transient analysis.

use nalgebra::DVector;

/// A single timepoint in a transient simulation result.
#[derive(Debug, Clone)]
pub struct TimePoint {
    /// Time value (s).
    pub time: f64,
    /// Solution vector at this time.
    pub solution: DVector<f64>,
}

/// Result of a transient simulation with step statistics.
#[derive(Debug, Clone, Default)]
pub struct TransientResult {
    /// Accepted timepoints, starting at t = 0.
    pub points: Vec<TimePoint>,
    /// Steps rejected by the truncation test.
    pub rejected_steps: usize,
    /// Steps cut after a Newton failure.
    pub failed_steps: usize,
    /// Newton iterations over the whole run.
    pub newton_iterations: usize,
    /// Smallest accepted step.
    pub min_step_used: f64,
    /// Largest accepted step.
    pub max_step_used: f64,
}

impl TransientResult {
    pub(crate) fn new() -> Self {
        Self {
            min_step_used: f64::INFINITY,
            ..Self::default()
        }
    }

    pub(crate) fn push(&mut self, time: f64, solution: &[f64], step: Option<f64>) {
        if let Some(h) = step {
            self.min_step_used = self.min_step_used.min(h);
            self.max_step_used = self.max_step_used.max(h);
        }
        self.points.push(TimePoint {
            time,
            solution: DVector::from_column_slice(solution),
        });
    }

    /// Accepted steps (the initial point excluded).
    pub fn accepted_steps(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    /// Get the value of row `idx` across all timepoints.
    pub fn waveform(&self, idx: usize) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|tp| (tp.time, tp.solution[idx]))
            .collect()
    }

    /// Get all time values.
    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|tp| tp.time).collect()
    }

    /// Interpolate the solution at a specific time.
    ///
    /// Uses linear interpolation between the two nearest timepoints and
    /// clamps outside the simulated range.
    pub fn interpolate_at(&self, time: f64) -> Option<DVector<f64>> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if time <= first.time {
            return Some(first.solution.clone());
        }
        if time >= last.time {
            return Some(last.solution.clone());
        }
        let i = self.points.partition_point(|p| p.time <= time);
        let (p0, p1) = (&self.points[i - 1], &self.points[i]);
        let alpha = (time - p0.time) / (p1.time - p0.time);
        Some(&p0.solution * (1.0 - alpha) + &p1.solution * alpha)
    }

    /// Get the value of row `idx` at a specific time (interpolated).
    pub fn value_at(&self, idx: usize, time: f64) -> Option<f64> {
        self.interpolate_at(time).map(|sol| sol[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation() {
        let mut r = TransientResult::new();
        r.push(0.0, &[0.0], None);
        r.push(1.0, &[2.0], Some(1.0));
        r.push(3.0, &[4.0], Some(2.0));
        assert_eq!(r.value_at(0, 0.5), Some(1.0));
        assert_eq!(r.value_at(0, 2.0), Some(3.0));
        assert_eq!(r.value_at(0, 10.0), Some(4.0));
        assert_eq!(r.accepted_steps(), 2);
        assert_eq!((r.min_step_used, r.max_step_used), (1.0, 2.0));
    }
}
