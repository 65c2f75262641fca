//! MOSFET model card.

use nodal_core::{Error, ParamList, ParamValue, Result};

pub(super) const MODEL_PARAMS: &[&str] = &[
    "nmos", "pmos", "vto", "kp", "gamma", "phi", "lambda", "rd", "rs", "cbd", "cbs", "is", "pb",
    "mj", "fc", "cgso", "cgdo", "cgbo", "tox", "uo", "ld", "tnom", "defl", "defw",
];

/// Permittivity of silicon dioxide (F/m).
pub const EPS_OX: f64 = 3.9 * 8.854_187_817e-12;

/// Channel polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    N,
    P,
}

impl Polarity {
    /// `+1` for NMOS, `-1` for PMOS.
    pub fn sign(self) -> f64 {
        match self {
            Polarity::N => 1.0,
            Polarity::P => -1.0,
        }
    }
}

/// Square-law MOSFET parameters.
#[derive(Debug, Clone)]
pub struct MosParams {
    pub polarity: Polarity,
    /// Zero-bias threshold voltage (V).
    pub vto: f64,
    /// Transconductance (A/V²). Derived from `uo` and `tox` when absent.
    pub kp: Option<f64>,
    /// Body-effect coefficient (V^0.5).
    pub gamma: f64,
    /// Surface potential (V).
    pub phi: f64,
    /// Channel-length modulation (1/V).
    pub lambda: f64,
    pub rd: f64,
    pub rs: f64,
    /// Zero-bias bulk junction capacitances (F).
    pub cbd: f64,
    pub cbs: f64,
    /// Bulk junction saturation current (A).
    pub is: f64,
    /// Bulk junction potential (V).
    pub pb: f64,
    pub mj: f64,
    pub fc: f64,
    /// Overlap capacitances per unit width / length (F/m).
    pub cgso: f64,
    pub cgdo: f64,
    pub cgbo: f64,
    /// Oxide thickness (m).
    pub tox: f64,
    /// Surface mobility (cm²/V·s).
    pub uo: f64,
    /// Lateral diffusion (m).
    pub ld: f64,
    pub tnom: Option<f64>,
    /// Geometry used when an instance gives none.
    pub defl: f64,
    pub defw: f64,
}

impl Default for MosParams {
    fn default() -> Self {
        Self {
            polarity: Polarity::N,
            vto: 0.0,
            kp: None,
            gamma: 0.0,
            phi: 0.6,
            lambda: 0.0,
            rd: 0.0,
            rs: 0.0,
            cbd: 0.0,
            cbs: 0.0,
            is: 1e-14,
            pb: 0.8,
            mj: 0.5,
            fc: 0.5,
            cgso: 0.0,
            cgdo: 0.0,
            cgbo: 0.0,
            tox: 1e-7,
            uo: 600.0,
            ld: 0.0,
            tnom: None,
            defl: 100e-6,
            defw: 100e-6,
        }
    }
}

impl MosParams {
    pub fn from_list(params: &ParamList) -> Result<Self> {
        params.check_known(MODEL_PARAMS)?;
        let mut p = MosParams::default();
        for (name, value) in params.iter() {
            p.set(name, value)?;
        }
        Ok(p)
    }

    pub fn set(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let key = name.to_ascii_lowercase();
        match key.as_str() {
            "nmos" => {
                if value.expect_flag(name)? {
                    self.polarity = Polarity::N;
                }
                return Ok(());
            }
            "pmos" => {
                if value.expect_flag(name)? {
                    self.polarity = Polarity::P;
                }
                return Ok(());
            }
            _ => {}
        }
        let v = value.expect_real(name)?;
        match key.as_str() {
            "vto" => self.vto = v,
            "kp" => self.kp = Some(v),
            "gamma" => self.gamma = v,
            "phi" => self.phi = v,
            "lambda" => self.lambda = v,
            "rd" => self.rd = v,
            "rs" => self.rs = v,
            "cbd" => self.cbd = v,
            "cbs" => self.cbs = v,
            "is" => self.is = v,
            "pb" => self.pb = v,
            "mj" => self.mj = v,
            "fc" => self.fc = v,
            "cgso" => self.cgso = v,
            "cgdo" => self.cgdo = v,
            "cgbo" => self.cgbo = v,
            "tox" => self.tox = v,
            "uo" => self.uo = v,
            "ld" => self.ld = v,
            "tnom" => self.tnom = Some(v),
            "defl" => self.defl = v,
            "defw" => self.defw = v,
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    /// Oxide capacitance per unit area (F/m²).
    pub fn cox(&self) -> f64 {
        EPS_OX / self.tox
    }

    /// Checks that do not depend on geometry.
    pub fn validate(&self, model: &str) -> Result<()> {
        let bad = |reason: &str| Err(Error::bad_parameter(model, "*", reason));
        if !(self.tox > 0.0) {
            return bad("tox must be positive");
        }
        if !(self.phi > 0.0) || !(self.pb > 0.0) {
            return bad("phi and pb must be positive");
        }
        if self.rd < 0.0 || self.rs < 0.0 {
            return bad("rd and rs must not be negative");
        }
        if self.fc >= 1.0 || self.mj >= 1.0 {
            return bad("fc and mj must be below 1");
        }
        Ok(())
    }
}
