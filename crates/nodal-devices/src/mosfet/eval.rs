//! Square-law channel, bulk junctions and Meyer gate capacitances.
//!
//! All voltages are polarity-normalized: for a PMOS the caller multiplies
//! terminal voltages by `-1` before calling in and the results come back in
//! the same frame.

/// Channel current and its derivatives.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Channel {
    pub cdrain: f64,
    pub gm: f64,
    pub gds: f64,
    pub gmbs: f64,
    /// Threshold voltage at this body bias.
    pub von: f64,
    pub vdsat: f64,
}

/// Channel evaluation in the forward frame (`vds >= 0`).
///
/// For reverse operation pass `(vgd, -vds, vbd)`.
#[allow(clippy::too_many_arguments)]
pub fn channel(
    beta: f64,
    vto: f64,
    gamma: f64,
    phi: f64,
    lambda: f64,
    vgs: f64,
    vds: f64,
    vbs: f64,
) -> Channel {
    let sqrt_phi = phi.sqrt();
    let sarg = if vbs <= 0.0 {
        (phi - vbs).sqrt()
    } else {
        (sqrt_phi - vbs / (2.0 * sqrt_phi)).max(0.0)
    };
    let von = vto + gamma * (sarg - sqrt_phi);
    let vgst = vgs - von;
    let vdsat = vgst.max(0.0);
    let arg = if sarg <= 0.0 { 0.0 } else { gamma / (2.0 * sarg) };

    if vgst <= 0.0 {
        return Channel {
            von,
            vdsat,
            ..Channel::default()
        };
    }
    let betap = beta * (1.0 + lambda * vds);
    if vgst <= vds {
        // saturation
        let gm = betap * vgst;
        Channel {
            cdrain: betap * vgst * vgst * 0.5,
            gm,
            gds: lambda * beta * vgst * vgst * 0.5,
            gmbs: gm * arg,
            von,
            vdsat,
        }
    } else {
        let gm = betap * vds;
        Channel {
            cdrain: betap * vds * (vgst - 0.5 * vds),
            gm,
            gds: betap * (vgst - vds) + lambda * beta * vds * (vgst - 0.5 * vds),
            gmbs: gm * arg,
            von,
            vdsat,
        }
    }
}

/// Bulk junction current and conductance, `gmin` included.
pub fn bulk_junction(v: f64, isat: f64, vt: f64, gmin: f64) -> (f64, f64) {
    if v <= 0.0 {
        let g = isat / vt + gmin;
        (g * v, g)
    } else {
        let ev = (v / vt).min(709.0).exp();
        (isat * (ev - 1.0) + gmin * v, isat * ev / vt + gmin)
    }
}

/// Depletion charge and capacitance of a junction with zero-bias capacitance `cj0`.
pub fn depletion(v: f64, cj0: f64, pb: f64, mj: f64, fc: f64) -> (f64, f64) {
    if cj0 <= 0.0 {
        return (0.0, 0.0);
    }
    let corner = fc * pb;
    if v < corner {
        let arg = 1.0 - v / pb;
        let sarg = (-mj * arg.ln()).exp();
        (pb * cj0 * (1.0 - arg * sarg) / (1.0 - mj), cj0 * sarg)
    } else {
        let f1 = pb * (1.0 - (1.0 - fc).powf(1.0 - mj)) / (1.0 - mj);
        let f2 = (1.0 - fc).powf(1.0 + mj);
        let f3 = 1.0 - fc * (1.0 + mj);
        let czof2 = cj0 / f2;
        let q = cj0 * f1
            + czof2 * (f3 * (v - corner) + mj * (v * v - corner * corner) / (2.0 * pb));
        (q, czof2 * (f3 + mj * v / pb))
    }
}

/// Meyer gate capacitances `(capgs, capgd, capgb)`.
///
/// Returns half of each capacitance; the charge update sums the present and
/// previous halves.
pub fn meyer(vgs: f64, vgd: f64, von: f64, vdsat: f64, phi: f64, cox: f64) -> (f64, f64, f64) {
    let vgst = vgs - von;
    if vgst <= -phi {
        (0.0, 0.0, cox / 2.0)
    } else if vgst <= -phi / 2.0 {
        (0.0, 0.0, -vgst * cox / (2.0 * phi))
    } else if vgst <= 0.0 {
        let capgs = vgst * cox / (1.5 * phi) + cox / 3.0;
        (capgs, 0.0, -vgst * cox / (2.0 * phi))
    } else {
        let vds = vgs - vgd;
        if vdsat <= vds {
            (cox / 3.0, 0.0, 0.0)
        } else {
            let vddif = 2.0 * vdsat - vds;
            let vddif1 = vdsat - vds - 1e-12;
            let vddif2 = vddif * vddif;
            let capgd = cox * (1.0 - vdsat * vdsat / vddif2) / 3.0;
            let capgs = cox * (1.0 - vddif1 * vddif1 / vddif2) / 3.0;
            (capgs, capgd, 0.0)
        }
    }
}
