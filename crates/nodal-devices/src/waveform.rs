//! Time functions for independent sources.

use std::f64::consts::PI;

use nodal_core::{Error, ParamList, Result};

/// Value of an independent source over time.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    Dc(f64),
    /// `v1 v2 td tr tf pw per`
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },
    /// `vo va freq td theta`
    Sin {
        vo: f64,
        va: f64,
        freq: f64,
        td: f64,
        theta: f64,
    },
    /// `(t, v)` corners in increasing time.
    Pwl(Vec<(f64, f64)>),
}

impl Waveform {
    /// Read the waveform of a source instance.
    ///
    /// At most one of `pulse`, `sin` and `pwl` may be given; otherwise the
    /// `dc` value applies.
    pub fn from_params(params: &ParamList) -> Result<Self> {
        let dc = params.real_or("dc", 0.0)?;
        if let Some(v) = params.vec("pulse")? {
            if v.len() < 2 {
                return Err(Error::InvalidCircuit("pulse needs at least v1 v2".into()));
            }
            let at = |i: usize, default: f64| v.get(i).copied().unwrap_or(default);
            return Ok(Waveform::Pulse {
                v1: v[0],
                v2: v[1],
                td: at(2, 0.0),
                tr: at(3, 0.0),
                tf: at(4, 0.0),
                pw: at(5, f64::INFINITY),
                per: at(6, 0.0),
            });
        }
        if let Some(v) = params.vec("sin")? {
            if v.len() < 3 {
                return Err(Error::InvalidCircuit("sin needs vo va freq".into()));
            }
            return Ok(Waveform::Sin {
                vo: v[0],
                va: v[1],
                freq: v[2],
                td: v.get(3).copied().unwrap_or(0.0),
                theta: v.get(4).copied().unwrap_or(0.0),
            });
        }
        if let Some(v) = params.vec("pwl")? {
            if v.is_empty() || v.len() % 2 != 0 {
                return Err(Error::InvalidCircuit("pwl needs time/value pairs".into()));
            }
            let points: Vec<(f64, f64)> = v.chunks(2).map(|p| (p[0], p[1])).collect();
            if points.windows(2).any(|w| w[1].0 < w[0].0) {
                return Err(Error::InvalidCircuit("pwl times must not decrease".into()));
            }
            return Ok(Waveform::Pwl(points));
        }
        Ok(Waveform::Dc(dc))
    }

    /// Value at time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            Waveform::Dc(v) => *v,
            Waveform::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => {
                if t < *td {
                    return *v1;
                }
                let mut local = t - td;
                if *per > 0.0 {
                    local %= per;
                }
                if local < *tr {
                    v1 + (v2 - v1) * local / tr
                } else if local < tr + pw {
                    *v2
                } else if local < tr + pw + tf {
                    v2 - (v2 - v1) * (local - tr - pw) / tf
                } else {
                    *v1
                }
            }
            Waveform::Sin {
                vo,
                va,
                freq,
                td,
                theta,
            } => {
                if t < *td {
                    return *vo;
                }
                let local = t - td;
                vo + va * (-theta * local).exp() * (2.0 * PI * freq * local).sin()
            }
            Waveform::Pwl(points) => match points.iter().position(|&(pt, _)| pt > t) {
                Some(0) => points[0].1,
                None => points.last().map(|p| p.1).unwrap_or(0.0),
                Some(i) => {
                    let (t0, v0) = points[i - 1];
                    let (t1, v1) = points[i];
                    v0 + (v1 - v0) * (t - t0) / (t1 - t0)
                }
            },
        }
    }

    /// Value used for the operating point.
    pub fn dc_value(&self) -> f64 {
        self.value_at(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_edges() {
        let w = Waveform::from_params(
            &ParamList::new().with("pulse", vec![0.0, 1.0, 1e-9, 1e-9, 1e-9, 5e-9, 20e-9]),
        )
        .unwrap();
        assert_eq!(w.value_at(0.0), 0.0);
        assert!((w.value_at(1.5e-9) - 0.5).abs() < 1e-9);
        assert_eq!(w.value_at(4e-9), 1.0);
        assert_eq!(w.value_at(10e-9), 0.0);
        // second period
        assert_eq!(w.value_at(24e-9), 1.0);
    }

    #[test]
    fn test_sin_and_dc() {
        let w = Waveform::from_params(&ParamList::new().with("sin", vec![1.0, 2.0, 1e3])).unwrap();
        assert_eq!(w.dc_value(), 1.0);
        assert!((w.value_at(0.25e-3) - 3.0).abs() < 1e-9);
        let w = Waveform::from_params(&ParamList::new().with("dc", 5.0)).unwrap();
        assert_eq!(w, Waveform::Dc(5.0));
    }

    #[test]
    fn test_pwl_interpolates_and_holds() {
        let w = Waveform::from_params(&ParamList::new().with("pwl", vec![1.0, 0.0, 2.0, 4.0]))
            .unwrap();
        assert_eq!(w.value_at(0.0), 0.0);
        assert_eq!(w.value_at(1.5), 2.0);
        assert_eq!(w.value_at(3.0), 4.0);
        assert!(
            Waveform::from_params(&ParamList::new().with("pwl", vec![2.0, 0.0, 1.0, 1.0])).is_err()
        );
    }
}
