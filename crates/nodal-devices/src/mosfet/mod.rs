//! Square-law MOSFET (key `M`, level 1).
//!
//! Drain and source series resistances create internal nodes, bulk junctions
//! are modeled as diodes with depletion charge, and the gate charge follows
//! Meyer's model. Geometry-dependent coefficients live in a per-model
//! [`SizeCache`] so instances with the same `L`/`W` share one block.
//!
//! # Usage
//!
//! ```text
//! .MODEL NCH NMOS LEVEL=1 VTO=0.7 KP=110u GAMMA=0.4 LAMBDA=0.04
//! M1 d g s b NCH L=1u W=10u
//! ```

pub mod eval;
pub mod params;
pub mod size;

pub use params::{MosParams, Polarity};
pub use size::{SizeCache, SizeParams};

use std::rc::Rc;

use nodal_core::options::thermal_voltage;
use nodal_core::{
    AcLoadContext, ConvTestContext, ConvergenceChecker, Error, InitPhase, LoadContext,
    MatrixHandle, NodeId, ParamList, ParamValue, PzLoadContext, Result, SetupContext, SimOptions,
    StateBlock, StateSlot, StateStore, TempContext, TruncContext, context::voltage_at,
};

use crate::device::{DeviceInfo, DeviceKind, DeviceModel, Instances, LoadStatus, check_terminals};
use crate::limit::{critical_voltage, fetlim, limvds, pnjlim};
use eval::{bulk_junction, channel, depletion, meyer};

const INSTANCE_PARAMS: &[&str] = &["l", "w", "off", "icvds", "icvgs", "icvbs"];

/// State slots of one MOSFET. Every charge is followed by its current.
#[derive(Debug, Clone, Copy)]
pub enum MosState {
    Vbs,
    Vbd,
    Vgs,
    Vds,
    Cd,
    Cdrain,
    Cbs,
    Cbd,
    Gm,
    Gds,
    Gmbs,
    Gbd,
    Gbs,
    Qgs,
    Cqgs,
    Qgd,
    Cqgd,
    Qgb,
    Cqgb,
    Qbd,
    Cqbd,
    Qbs,
    Cqbs,
    Capgs,
    Capgd,
    Capgb,
    Capbd,
    Capbs,
    Von,
    Vdsat,
    /// `1.0` in forward operation, `-1.0` with drain and source swapped.
    Mode,
}

impl StateSlot for MosState {
    const COUNT: usize = 31;
    fn offset(self) -> usize {
        self as usize
    }
}

use MosState as S;

/// Device type for `M` elements, level 1.
pub struct MosfetKind {
    info: DeviceInfo,
}

impl Default for MosfetKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("mos1", 'M', 1, 4, "Square-law MOSFET"),
        }
    }
}

impl DeviceKind for MosfetKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>> {
        Ok(Box::new(MosfetModel::new(name, params)?))
    }
}

/// Matrix positions, named `<row><col>` with `dp`/`sp` the internal drain and source.
#[derive(Debug, Clone, Copy, Default)]
struct Handles {
    dd: MatrixHandle,
    gg: MatrixHandle,
    ss: MatrixHandle,
    bb: MatrixHandle,
    dpdp: MatrixHandle,
    spsp: MatrixHandle,
    ddp: MatrixHandle,
    gb: MatrixHandle,
    gdp: MatrixHandle,
    gsp: MatrixHandle,
    ssp: MatrixHandle,
    bdp: MatrixHandle,
    bsp: MatrixHandle,
    dpsp: MatrixHandle,
    dpd: MatrixHandle,
    bg: MatrixHandle,
    dpg: MatrixHandle,
    spg: MatrixHandle,
    sps: MatrixHandle,
    dpb: MatrixHandle,
    spb: MatrixHandle,
    spdp: MatrixHandle,
}

#[derive(Debug, Clone)]
struct Mosfet {
    drain: NodeId,
    gate: NodeId,
    source: NodeId,
    bulk: NodeId,
    drain_prime: NodeId,
    source_prime: NodeId,
    l: Option<f64>,
    w: Option<f64>,
    off: bool,
    /// `(vds, vgs, vbs)` initial conditions.
    ic: [Option<f64>; 3],
    size: Option<Rc<SizeParams>>,
    states: StateBlock,
    h: Handles,
}

/// Temperature-dependent coefficients shared by the model's instances.
#[derive(Debug, Clone, Copy, Default)]
struct TempCoeffs {
    vt: f64,
    beta_ratio: f64,
    vcrit: f64,
    gdrain: f64,
    gsource: f64,
}

/// Gate and bulk capacitances stamped at one point.
#[derive(Debug, Clone, Copy, Default)]
struct Caps {
    gs: f64,
    gd: f64,
    gb: f64,
    bd: f64,
    bs: f64,
}

/// Polarity-normalized terminal voltages.
#[derive(Debug, Clone, Copy)]
struct Bias {
    vbs: f64,
    vgs: f64,
    vds: f64,
}

impl Bias {
    fn vbd(self) -> f64 {
        self.vbs - self.vds
    }

    fn vgd(self) -> f64 {
        self.vgs - self.vds
    }
}

/// MOSFET model with its size cache and instances.
#[derive(Debug)]
pub struct MosfetModel {
    name: String,
    params: MosParams,
    sizes: SizeCache,
    temp: TempCoeffs,
    instances: Instances<Mosfet>,
}

impl MosfetModel {
    pub fn new(name: &str, params: &ParamList) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            params: MosParams::from_list(params)?,
            sizes: SizeCache::default(),
            temp: TempCoeffs::default(),
            instances: Instances::new(),
        })
    }

    pub fn params(&self) -> &MosParams {
        &self.params
    }

    /// Size block an instance received at the last setup.
    pub fn size_params(&self, instance: &str) -> Option<Rc<SizeParams>> {
        self.instances
            .iter()
            .find(|(_, n, _)| n.eq_ignore_ascii_case(instance))
            .and_then(|(_, _, m)| m.size.clone())
    }

    /// Number of distinct size blocks.
    pub fn size_blocks(&self) -> usize {
        self.sizes.len()
    }

    fn sign(&self) -> f64 {
        self.params.polarity.sign()
    }

    fn size<'m>(&self, name: &str, m: &'m Mosfet) -> Result<&'m SizeParams> {
        m.size.as_deref().ok_or_else(|| {
            Error::InvalidCircuit(format!("{}/{}: load before setup", self.name, name))
        })
    }

    fn bias_from(&self, m: &Mosfet, solution: &[f64]) -> Bias {
        let ty = self.sign();
        let vsp = voltage_at(solution, m.source_prime);
        Bias {
            vbs: ty * (voltage_at(solution, m.bulk) - vsp),
            vgs: ty * (voltage_at(solution, m.gate) - vsp),
            vds: ty * (voltage_at(solution, m.drain_prime) - vsp),
        }
    }

    fn stored_bias(st: &StateStore, age: usize, b: StateBlock) -> Bias {
        Bias {
            vbs: st.aged(age, b, S::Vbs),
            vgs: st.aged(age, b, S::Vgs),
            vds: st.aged(age, b, S::Vds),
        }
    }

    fn ic_bias(&self, m: &Mosfet) -> Option<Bias> {
        let ty = self.sign();
        match m.ic {
            [None, None, None] => None,
            [vds, vgs, vbs] => Some(Bias {
                vbs: ty * vbs.unwrap_or(0.0),
                vgs: ty * vgs.unwrap_or(0.0),
                vds: ty * vds.unwrap_or(0.0),
            }),
        }
    }

    /// Drain and bulk currents linearized around `state0`: `(cdhat, cbhat)`.
    fn predicted_currents(st: &StateStore, b: StateBlock, v: Bias) -> (f64, f64) {
        let delvbs = v.vbs - st.now(b, S::Vbs);
        let delvbd = v.vbd() - st.now(b, S::Vbd);
        let delvgs = v.vgs - st.now(b, S::Vgs);
        let delvds = v.vds - st.now(b, S::Vds);
        let delvgd = v.vgd() - (st.now(b, S::Vgs) - st.now(b, S::Vds));

        let cd = st.now(b, S::Cd);
        let (gm, gds, gmbs, gbd) = (
            st.now(b, S::Gm),
            st.now(b, S::Gds),
            st.now(b, S::Gmbs),
            st.now(b, S::Gbd),
        );
        let cdhat = if st.now(b, S::Mode) >= 0.0 {
            cd - gbd * delvbd + gmbs * delvbs + gm * delvgs + gds * delvds
        } else {
            cd - (gbd - gmbs) * delvbd - gm * delvgd + gds * delvds
        };
        let cbhat = st.now(b, S::Cbs)
            + st.now(b, S::Cbd)
            + gbd * delvbd
            + st.now(b, S::Gbs) * delvbs;
        (cdhat, cbhat)
    }

    fn currents_within(st: &StateStore, b: StateBlock, v: Bias, opts: &SimOptions) -> bool {
        let (cdhat, cbhat) = Self::predicted_currents(st, b, v);
        let cb = st.now(b, S::Cbs) + st.now(b, S::Cbd);
        ConvergenceChecker::current_within(cdhat, st.now(b, S::Cd), opts)
            && ConvergenceChecker::current_within(cbhat, cb, opts)
    }

    fn can_bypass(st: &StateStore, b: StateBlock, v: Bias, opts: &SimOptions) -> bool {
        let within = |new: f64, slot: MosState| {
            ConvergenceChecker::voltage_within(new, st.now(b, slot), opts)
        };
        within(v.vbs, S::Vbs)
            && within(v.vbd(), S::Vbd)
            && within(v.vgs, S::Vgs)
            && within(v.vds, S::Vds)
            && Self::currents_within(st, b, v, opts)
    }

    /// Limit a Newton step against `state0`; returns the bias and whether it changed.
    fn limit(&self, st: &StateStore, b: StateBlock, v: Bias) -> (Bias, bool) {
        let von = st.now(b, S::Von);
        let vgs_old = st.now(b, S::Vgs);
        let vds_old = st.now(b, S::Vds);
        let (mut vgs, mut vgd) = (v.vgs, v.vgd());
        let vds;
        let mut limited = false;

        if vds_old >= 0.0 {
            let vgs_lim = fetlim(vgs, vgs_old, von);
            limited |= vgs_lim != vgs;
            vgs = vgs_lim;
            let vds_raw = vgs - vgd;
            vds = limvds(vds_raw, vds_old);
            limited |= vds != vds_raw;
        } else {
            let vgd_lim = fetlim(vgd, vgs_old - vds_old, von);
            limited |= vgd_lim != vgd;
            vgd = vgd_lim;
            let vds_raw = vgs - vgd;
            vds = -limvds(-vds_raw, -vds_old);
            limited |= vds != vds_raw;
            vgs = vgd + vds;
        }

        let (vt, vcrit) = (self.temp.vt, self.temp.vcrit);
        let vbs = if vds >= 0.0 {
            let (vbs, lim) = pnjlim(v.vbs, st.now(b, S::Vbs), vt, vcrit);
            limited |= lim;
            vbs
        } else {
            let (vbd, lim) = pnjlim(v.vbs - v.vds, st.now(b, S::Vbd), vt, vcrit);
            limited |= lim;
            vbd + vds
        };
        (Bias { vbs, vgs, vds }, limited)
    }

    /// Evaluate the device at `v` and store the results in `state0`.
    fn evaluate(&self, m: &Mosfet, size: &SizeParams, ctx: &mut LoadContext, v: Bias) {
        let p = &self.params;
        let ty = self.sign();
        let gmin = ctx.options.gmin;
        let (vbd, vgd) = (v.vbd(), v.vgd());

        let (cbs, gbs) = bulk_junction(v.vbs, p.is, self.temp.vt, gmin);
        let (cbd, gbd) = bulk_junction(vbd, p.is, self.temp.vt, gmin);

        let beta = size.beta * self.temp.beta_ratio;
        let forward = v.vds >= 0.0;
        let ch = if forward {
            channel(beta, ty * p.vto, p.gamma, p.phi, p.lambda, v.vgs, v.vds, v.vbs)
        } else {
            channel(beta, ty * p.vto, p.gamma, p.phi, p.lambda, vgd, -v.vds, vbd)
        };
        let mode = if forward { 1.0 } else { -1.0 };

        let (capgs, capgd, capgb) = if forward {
            meyer(v.vgs, vgd, ch.von, ch.vdsat, p.phi, size.oxide_cap)
        } else {
            let (gd, gs, gb) = meyer(vgd, v.vgs, ch.von, ch.vdsat, p.phi, size.oxide_cap);
            (gs, gd, gb)
        };
        let (qbd, capbd) = depletion(vbd, p.cbd, p.pb, p.mj, p.fc);
        let (qbs, capbs) = depletion(v.vbs, p.cbs, p.pb, p.mj, p.fc);

        let b = m.states;
        let first_step = ctx.mode.phase == InitPhase::Transient;
        let st = &mut *ctx.states;
        for (slot, value) in [
            (S::Vbs, v.vbs),
            (S::Vbd, vbd),
            (S::Vgs, v.vgs),
            (S::Vds, v.vds),
            (S::Cd, mode * ch.cdrain - cbd),
            (S::Cdrain, ch.cdrain),
            (S::Cbs, cbs),
            (S::Cbd, cbd),
            (S::Gm, ch.gm),
            (S::Gds, ch.gds),
            (S::Gmbs, ch.gmbs),
            (S::Gbd, gbd),
            (S::Gbs, gbs),
            (S::Capgs, capgs),
            (S::Capgd, capgd),
            (S::Capgb, capgb),
            (S::Qbd, qbd),
            (S::Capbd, capbd),
            (S::Qbs, qbs),
            (S::Capbs, capbs),
            (S::Von, ch.von),
            (S::Vdsat, ch.vdsat),
            (S::Mode, mode),
        ] {
            st.set_now(b, slot, value);
        }

        if ctx.mode.is_transient() {
            let caps = Self::gate_caps(size, st, b, first_step);
            let vgb = v.vgs - v.vbs;
            if first_step {
                st.set_now(b, S::Qgs, caps.gs * v.vgs);
                st.set_now(b, S::Qgd, caps.gd * vgd);
                st.set_now(b, S::Qgb, caps.gb * vgb);
            } else {
                let old = Self::stored_bias(st, 1, b);
                let qgs = (v.vgs - old.vgs) * caps.gs + st.prev(b, S::Qgs);
                let qgd = (vgd - old.vgd()) * caps.gd + st.prev(b, S::Qgd);
                let qgb = (vgb - (old.vgs - old.vbs)) * caps.gb + st.prev(b, S::Qgb);
                st.set_now(b, S::Qgs, qgs);
                st.set_now(b, S::Qgd, qgd);
                st.set_now(b, S::Qgb, qgb);
            }
        }
    }

    /// Gate capacitances for the transient charge update, overlap included.
    fn gate_caps(size: &SizeParams, st: &StateStore, b: StateBlock, first_step: bool) -> Caps {
        let sum = |slot: MosState| {
            if first_step {
                2.0 * st.now(b, slot)
            } else {
                st.now(b, slot) + st.prev(b, slot)
            }
        };
        Caps {
            gs: sum(S::Capgs) + size.gs_overlap,
            gd: sum(S::Capgd) + size.gd_overlap,
            gb: sum(S::Capgb) + size.gb_overlap,
            bd: st.now(b, S::Capbd),
            bs: st.now(b, S::Capbs),
        }
    }

    /// Capacitances at the operating point for small-signal loads.
    fn small_signal_caps(size: &SizeParams, st: &StateStore, b: StateBlock) -> Caps {
        Self::gate_caps(size, st, b, true)
    }

    /// Every Jacobian contribution as `(handle, conductance, capacitance)`.
    fn linear_entries(
        &self,
        m: &Mosfet,
        st: &StateStore,
        c: Caps,
    ) -> [(MatrixHandle, f64, f64); 22] {
        let b = m.states;
        let (gm, gds, gmbs) = (st.now(b, S::Gm), st.now(b, S::Gds), st.now(b, S::Gmbs));
        let (gbd, gbs) = (st.now(b, S::Gbd), st.now(b, S::Gbs));
        let (xnrm, xrev) = if st.now(b, S::Mode) >= 0.0 {
            (1.0, 0.0)
        } else {
            (0.0, 1.0)
        };
        let (gd, gs) = (self.temp.gdrain, self.temp.gsource);
        let h = &m.h;
        [
            (h.dd, gd, 0.0),
            (h.gg, 0.0, c.gd + c.gs + c.gb),
            (h.ss, gs, 0.0),
            (h.bb, gbd + gbs, c.gb + c.bd + c.bs),
            (h.dpdp, gd + gds + gbd + xrev * (gm + gmbs), c.gd + c.bd),
            (h.spsp, gs + gds + gbs + xnrm * (gm + gmbs), c.gs + c.bs),
            (h.ddp, -gd, 0.0),
            (h.gb, 0.0, -c.gb),
            (h.gdp, 0.0, -c.gd),
            (h.gsp, 0.0, -c.gs),
            (h.ssp, -gs, 0.0),
            (h.bg, 0.0, -c.gb),
            (h.bdp, -gbd, -c.bd),
            (h.bsp, -gbs, -c.bs),
            (h.dpd, -gd, 0.0),
            (h.dpg, (xnrm - xrev) * gm, -c.gd),
            (h.dpb, -gbd + (xnrm - xrev) * gmbs, -c.bd),
            (h.dpsp, -gds - xnrm * (gm + gmbs), 0.0),
            (h.spg, -(xnrm - xrev) * gm, -c.gs),
            (h.sps, -gs, 0.0),
            (h.spb, -gbs - (xnrm - xrev) * gmbs, -c.bs),
            (h.spdp, -gds - xrev * (gm + gmbs), 0.0),
        ]
    }

    /// Stamp the companion model from `state0`.
    fn stamp(&self, m: &Mosfet, size: &SizeParams, ctx: &mut LoadContext) {
        let ty = self.sign();
        let b = m.states;
        let v = Self::stored_bias(ctx.states, 0, b);
        let (vbd, vgd, vgb) = (v.vbd(), v.vgd(), v.vgs - v.vbs);

        let mut cbs = ctx.states.now(b, S::Cbs);
        let mut cbd = ctx.states.now(b, S::Cbd);
        let (mut ceqgs, mut ceqgd, mut ceqgb) = (0.0, 0.0, 0.0);
        let mut caps = Caps::default();
        let mut ag0 = 0.0;

        if ctx.mode.is_transient() {
            let first_step = ctx.mode.phase == InitPhase::Transient;
            let charges = [S::Qgs, S::Qgd, S::Qgb, S::Qbd, S::Qbs];
            if first_step {
                for q in charges {
                    ctx.states.set_prev(b, q, ctx.states.now(b, q));
                }
            }
            caps = Self::gate_caps(size, ctx.states, b, first_step);
            ag0 = ctx.integrator.ag(0);
            for (q, cap) in [
                (S::Qgs, caps.gs),
                (S::Qgd, caps.gd),
                (S::Qgb, caps.gb),
                (S::Qbd, caps.bd),
                (S::Qbs, caps.bs),
            ] {
                ctx.integrator.integrate(ctx.states, b.at(q), cap);
            }
            let st = &*ctx.states;
            ceqgs = st.now(b, S::Cqgs) - ag0 * caps.gs * v.vgs;
            ceqgd = st.now(b, S::Cqgd) - ag0 * caps.gd * vgd;
            ceqgb = st.now(b, S::Cqgb) - ag0 * caps.gb * vgb;
            cbd += st.now(b, S::Cqbd);
            cbs += st.now(b, S::Cqbs);
            if first_step {
                for cq in [S::Cqgs, S::Cqgd, S::Cqgb, S::Cqbd, S::Cqbs] {
                    ctx.states.set_prev(b, cq, ctx.states.now(b, cq));
                }
            }
        }

        let st = &*ctx.states;
        let gbs = st.now(b, S::Gbs) + ag0 * caps.bs;
        let gbd = st.now(b, S::Gbd) + ag0 * caps.bd;
        let ceqbs = ty * (cbs - gbs * v.vbs);
        let ceqbd = ty * (cbd - gbd * vbd);
        let (cdrain, gm, gds, gmbs) = (
            st.now(b, S::Cdrain),
            st.now(b, S::Gm),
            st.now(b, S::Gds),
            st.now(b, S::Gmbs),
        );
        let cdreq = if st.now(b, S::Mode) >= 0.0 {
            ty * (cdrain - gds * v.vds - gm * v.vgs - gmbs * v.vbs)
        } else {
            -ty * (cdrain + gds * v.vds - gm * vgd - gmbs * vbd)
        };
        let entries = self.linear_entries(m, st, caps);

        for (h, g, c) in entries {
            ctx.matrix.add(h, g + ag0 * c);
        }
        ctx.matrix.add_rhs(m.gate, -ty * (ceqgs + ceqgb + ceqgd));
        ctx.matrix.add_rhs(m.bulk, -(ceqbs + ceqbd - ty * ceqgb));
        ctx.matrix.add_rhs(m.drain_prime, ceqbd - cdreq + ty * ceqgd);
        ctx.matrix.add_rhs(m.source_prime, cdreq + ceqbs + ty * ceqgs);
    }
}

impl DeviceModel for MosfetModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "mos1"
    }

    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList) -> Result<usize> {
        check_terminals("mos1", name, nodes, 4)?;
        params.check_known(INSTANCE_PARAMS)?;
        let inst = Mosfet {
            drain: nodes[0],
            gate: nodes[1],
            source: nodes[2],
            bulk: nodes[3],
            drain_prime: nodes[0],
            source_prime: nodes[2],
            l: params.real("l")?,
            w: params.real("w")?,
            off: params.flag_or("off", false)?,
            ic: [
                params.real("icvds")?,
                params.real("icvgs")?,
                params.real("icvbs")?,
            ],
            size: None,
            states: StateBlock::default(),
            h: Handles::default(),
        };
        self.instances.push(name, inst)
    }

    fn delete_instance(&mut self, name: &str) -> Result<()> {
        self.instances.remove(name).map(|_| ())
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn instance_name(&self, index: usize) -> Option<&str> {
        self.instances.name(index)
    }

    fn set_param(&mut self, instance: Option<&str>, name: &str, value: &ParamValue) -> Result<()> {
        let Some(inst) = instance else {
            self.params.set(name, value)?;
            self.sizes.clear();
            return Ok(());
        };
        let m = self.instances.get_mut(inst)?;
        match name.to_ascii_lowercase().as_str() {
            "l" => m.l = Some(value.expect_real(name)?),
            "w" => m.w = Some(value.expect_real(name)?),
            "off" => m.off = value.expect_flag(name)?,
            "icvds" => m.ic[0] = Some(value.expect_real(name)?),
            "icvgs" => m.ic[1] = Some(value.expect_real(name)?),
            "icvbs" => m.ic[2] = Some(value.expect_real(name)?),
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        let Self {
            name: model,
            params: p,
            sizes,
            instances,
            ..
        } = self;
        p.validate(model)?;
        for (_, name, m) in instances.iter_mut() {
            let l = m.l.unwrap_or(p.defl);
            let w = m.w.unwrap_or(p.defw);
            m.size = Some(sizes.get_or_derive(p, model, name, l, w)?);

            m.drain_prime = ctx.internal_or(p.rd > 0.0, m.drain, name, "drain")?;
            m.source_prime = ctx.internal_or(p.rs > 0.0, m.source, name, "source")?;
            let (d, g, s, b, dp, sp) = (
                m.drain,
                m.gate,
                m.source,
                m.bulk,
                m.drain_prime,
                m.source_prime,
            );
            m.h = Handles {
                dd: ctx.entry(d, d),
                gg: ctx.entry(g, g),
                ss: ctx.entry(s, s),
                bb: ctx.entry(b, b),
                dpdp: ctx.entry(dp, dp),
                spsp: ctx.entry(sp, sp),
                ddp: ctx.entry(d, dp),
                gb: ctx.entry(g, b),
                gdp: ctx.entry(g, dp),
                gsp: ctx.entry(g, sp),
                ssp: ctx.entry(s, sp),
                bdp: ctx.entry(b, dp),
                bsp: ctx.entry(b, sp),
                dpsp: ctx.entry(dp, sp),
                dpd: ctx.entry(dp, d),
                bg: ctx.entry(b, g),
                dpg: ctx.entry(dp, g),
                spg: ctx.entry(sp, g),
                sps: ctx.entry(sp, s),
                dpb: ctx.entry(dp, b),
                spb: ctx.entry(sp, b),
                spdp: ctx.entry(sp, dp),
            };
            m.states = ctx.allocate_states(MosState::COUNT);
        }
        Ok(())
    }

    fn temperature_update(&mut self, ctx: &mut TempContext) -> Result<()> {
        let p = &self.params;
        let temp = ctx.options.temperature;
        let tnom = p.tnom.unwrap_or(ctx.options.nominal_temperature);
        let vt = thermal_voltage(temp);
        self.temp = TempCoeffs {
            vt,
            beta_ratio: (temp / tnom).powf(-1.5),
            vcrit: critical_voltage(vt, p.is),
            gdrain: if p.rd > 0.0 { 1.0 / p.rd } else { 0.0 },
            gsource: if p.rs > 0.0 { 1.0 / p.rs } else { 0.0 },
        };
        Ok(())
    }

    fn initial_conditions(&mut self, solution: &[f64]) {
        for (_, _, m) in self.instances.iter_mut() {
            let vs = voltage_at(solution, m.source);
            let fill = [
                voltage_at(solution, m.drain) - vs,
                voltage_at(solution, m.gate) - vs,
                voltage_at(solution, m.bulk) - vs,
            ];
            for (ic, v) in m.ic.iter_mut().zip(fill) {
                ic.get_or_insert(v);
            }
        }
    }

    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus> {
        let vto = self.sign() * self.params.vto;
        for (index, name, m) in self.instances.iter() {
            let size = self.size(name, m)?;
            let b = m.states;
            let st = &*ctx.states;
            let zero = Bias {
                vbs: 0.0,
                vgs: 0.0,
                vds: 0.0,
            };

            let mut limited = false;
            let mut bypass = false;
            let bias = match ctx.mode.phase {
                InitPhase::SmallSignal => Self::stored_bias(st, 0, b),
                InitPhase::Transient => match self.ic_bias(m) {
                    Some(ic) if ctx.mode.use_ic => ic,
                    _ => Self::stored_bias(st, 1, b),
                },
                InitPhase::Junction => match self.ic_bias(m) {
                    Some(ic) if ctx.mode.use_ic => ic,
                    _ if m.off => zero,
                    _ => Bias {
                        vbs: -1.0,
                        vgs: vto,
                        vds: 0.0,
                    },
                },
                InitPhase::Fix if m.off => zero,
                InitPhase::Predict => {
                    let xf = ctx.integrator.predictor_factor();
                    let (b1, b2) = (Self::stored_bias(st, 1, b), Self::stored_bias(st, 2, b));
                    Bias {
                        vbs: (1.0 + xf) * b1.vbs - xf * b2.vbs,
                        vgs: (1.0 + xf) * b1.vgs - xf * b2.vgs,
                        vds: (1.0 + xf) * b1.vds - xf * b2.vds,
                    }
                }
                _ => {
                    let raw = self.bias_from(m, ctx.solution);
                    if ctx.options.bypass
                        && ctx.mode.bypass_allowed()
                        && Self::can_bypass(st, b, raw, ctx.options)
                    {
                        bypass = true;
                        raw
                    } else {
                        let (v, lim) = self.limit(st, b, raw);
                        limited = lim;
                        v
                    }
                }
            };

            if bypass {
                ctx.note_bypass();
            } else {
                self.evaluate(m, size, ctx, bias);
            }
            if ctx.mode.phase == InitPhase::SmallSignal {
                continue;
            }
            if limited && !(m.off && ctx.mode.phase == InitPhase::Fix) {
                ctx.conv.fail(index);
            }
            self.stamp(m, size, ctx);
        }
        Ok(LoadStatus::Continue)
    }

    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()> {
        for (_, name, m) in self.instances.iter() {
            let caps = Self::small_signal_caps(self.size(name, m)?, ctx.states, m.states);
            for (h, g, c) in self.linear_entries(m, ctx.states, caps) {
                ctx.matrix.add_complex(h, g, ctx.omega * c);
            }
        }
        Ok(())
    }

    fn pz_load(&self, ctx: &mut PzLoadContext) -> Result<()> {
        for (_, name, m) in self.instances.iter() {
            let caps = Self::small_signal_caps(self.size(name, m)?, ctx.states, m.states);
            for (h, g, c) in self.linear_entries(m, ctx.states, caps) {
                let y = ctx.s * c + g;
                ctx.matrix.add_complex(h, y.re, y.im);
            }
        }
        Ok(())
    }

    fn convergence_test(&self, ctx: &mut ConvTestContext) {
        for (index, _, m) in self.instances.iter() {
            if m.off && ctx.mode.off_exempt() {
                continue;
            }
            let v = self.bias_from(m, ctx.solution);
            if !Self::currents_within(ctx.states, m.states, v, ctx.options) {
                ctx.conv.fail(index);
            }
        }
    }

    fn truncation_error(&self, ctx: &TruncContext, step: f64) -> f64 {
        let charges = [S::Qgs, S::Qgd, S::Qgb, S::Qbd, S::Qbs];
        self.instances.iter().fold(step, |h, (_, _, m)| {
            charges
                .iter()
                .fold(h, |h, &q| ctx.limit(m.states.at(q), h))
        })
    }
}
