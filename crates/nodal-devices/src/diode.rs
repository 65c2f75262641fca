//! Junction diode with series resistance, depletion and diffusion charge.
//!
//! The load is split into bias selection, evaluation and stamping. Stamping
//! reads only the state vector, so a bypassed iteration stamps exactly what
//! the evaluation that filled the state stamped.

use nodal_core::options::thermal_voltage;
use nodal_core::{
    AcLoadContext, ConvTestContext, ConvergenceChecker, Error, InitPhase, LoadContext,
    MatrixHandle, NodeId, ParamList, ParamValue, PzLoadContext, Result, SetupContext, StateBlock,
    StateSlot, StateStore, TempContext, TruncContext, context::voltage_at,
};

use crate::device::{DeviceInfo, DeviceKind, DeviceModel, Instances, LoadStatus, check_terminals};
use crate::limit::{critical_voltage, pnjlim};

const MODEL_PARAMS: &[&str] = &[
    "is", "n", "rs", "cjo", "vj", "mj", "tt", "fc", "bv", "eg", "xti", "tnom",
];
const INSTANCE_PARAMS: &[&str] = &["area", "m", "off", "ic"];

/// State slots of one diode.
#[derive(Debug, Clone, Copy)]
pub enum DiodeState {
    Voltage,
    Current,
    Conductance,
    Charge,
    ChargeCurrent,
    Capacitance,
}

impl StateSlot for DiodeState {
    const COUNT: usize = 6;
    fn offset(self) -> usize {
        self as usize
    }
}

use DiodeState as S;

/// Device type for `D` elements.
pub struct DiodeKind {
    info: DeviceInfo,
}

impl Default for DiodeKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("diode", 'D', 1, 2, "Junction diode"),
        }
    }
}

impl DeviceKind for DiodeKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>> {
        Ok(Box::new(DiodeModel::new(name, params)?))
    }
}

/// Diode model card.
#[derive(Debug, Clone)]
pub struct DiodeParams {
    pub is: f64,
    pub n: f64,
    pub rs: f64,
    pub cjo: f64,
    pub vj: f64,
    pub mj: f64,
    pub tt: f64,
    pub fc: f64,
    pub bv: Option<f64>,
    pub eg: f64,
    pub xti: f64,
    pub tnom: Option<f64>,
}

impl DiodeParams {
    fn from_list(params: &ParamList) -> Result<Self> {
        params.check_known(MODEL_PARAMS)?;
        Ok(Self {
            is: params.real_or("is", 1e-14)?,
            n: params.real_or("n", 1.0)?,
            rs: params.real_or("rs", 0.0)?,
            cjo: params.real_or("cjo", 0.0)?,
            vj: params.real_or("vj", 1.0)?,
            mj: params.real_or("mj", 0.5)?,
            tt: params.real_or("tt", 0.0)?,
            fc: params.real_or("fc", 0.5)?,
            bv: params.real("bv")?,
            eg: params.real_or("eg", 1.11)?,
            xti: params.real_or("xti", 3.0)?,
            tnom: params.real("tnom")?,
        })
    }

    fn set(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let v = value.expect_real(name)?;
        match name.to_ascii_lowercase().as_str() {
            "is" => self.is = v,
            "n" => self.n = v,
            "rs" => self.rs = v,
            "cjo" => self.cjo = v,
            "vj" => self.vj = v,
            "mj" => self.mj = v,
            "tt" => self.tt = v,
            "fc" => self.fc = v,
            "bv" => self.bv = Some(v),
            "eg" => self.eg = v,
            "xti" => self.xti = v,
            "tnom" => self.tnom = Some(v),
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }
}

/// Temperature- and area-scaled coefficients of one instance.
#[derive(Debug, Clone, Copy, Default)]
struct Scaled {
    is: f64,
    nvt: f64,
    vcrit: f64,
    cjo: f64,
    gspr: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Handles {
    /// `[pp, nn, pn, np]` between the internal anode and the cathode.
    junction: [MatrixHandle; 4],
    /// `[aa, pp, ap, pa]` across the series resistance.
    series: [MatrixHandle; 4],
}

#[derive(Debug, Clone)]
struct Diode {
    anode: NodeId,
    cathode: NodeId,
    /// Internal anode behind `rs`, or the anode itself.
    anode_prime: NodeId,
    area: f64,
    off: bool,
    ic: Option<f64>,
    states: StateBlock,
    handles: Handles,
    scaled: Scaled,
}

/// Diode model with its instances.
#[derive(Debug)]
pub struct DiodeModel {
    name: String,
    params: DiodeParams,
    instances: Instances<Diode>,
}

impl DiodeModel {
    pub fn new(name: &str, params: &ParamList) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            params: DiodeParams::from_list(params)?,
            instances: Instances::new(),
        })
    }

    /// Current and conductance of the junction at `vd`, gmin included.
    fn junction_current(&self, s: &Scaled, vd: f64, gmin: f64) -> (f64, f64) {
        let nvt = s.nvt;
        if vd >= -3.0 * nvt {
            let evd = (vd / nvt).exp();
            (s.is * (evd - 1.0) + gmin * vd, s.is * evd / nvt + gmin)
        } else if self.params.bv.is_none_or(|bv| vd >= -bv) {
            let arg = 3.0 * nvt / (vd * std::f64::consts::E);
            let arg = arg * arg * arg;
            (-s.is * (1.0 + arg) + gmin * vd, s.is * 3.0 * arg / vd + gmin)
        } else {
            let bv = self.params.bv.unwrap_or(f64::INFINITY);
            let evrev = (-(bv + vd) / nvt).exp();
            (-s.is * evrev + gmin * vd, s.is * evrev / nvt + gmin)
        }
    }

    /// Junction charge and capacitance at `vd`.
    fn junction_charge(&self, s: &Scaled, vd: f64, cd: f64, gd: f64) -> (f64, f64) {
        let p = &self.params;
        let (mut q, mut cap) = (p.tt * cd, p.tt * gd);
        if s.cjo > 0.0 {
            let depletion = p.fc * p.vj;
            if vd < depletion {
                let arg = 1.0 - vd / p.vj;
                let sarg = (-p.mj * arg.ln()).exp();
                q += p.vj * s.cjo * (1.0 - arg * sarg) / (1.0 - p.mj);
                cap += s.cjo * sarg;
            } else {
                let f1 = p.vj * (1.0 - (1.0 - p.fc).powf(1.0 - p.mj)) / (1.0 - p.mj);
                let f2 = (1.0 - p.fc).powf(1.0 + p.mj);
                let f3 = 1.0 - p.fc * (1.0 + p.mj);
                let czof2 = s.cjo / f2;
                q += s.cjo * f1
                    + czof2
                        * (f3 * (vd - depletion)
                            + p.mj * (vd * vd - depletion * depletion) / (2.0 * p.vj));
                cap += czof2 * (f3 + p.mj * vd / p.vj);
            }
        }
        (q, cap)
    }

    /// Junction voltage to evaluate at, and whether it had to be limited.
    fn bias(&self, d: &Diode, ctx: &LoadContext) -> (f64, bool) {
        let st = &*ctx.states;
        match ctx.mode.phase {
            InitPhase::SmallSignal => (st.now(d.states, S::Voltage), false),
            InitPhase::Transient => match d.ic {
                Some(ic) if ctx.mode.use_ic => (ic, false),
                _ => (st.prev(d.states, S::Voltage), false),
            },
            InitPhase::Junction => match d.ic {
                Some(ic) if ctx.mode.use_ic => (ic, false),
                _ if d.off => (0.0, false),
                _ => (d.scaled.vcrit, false),
            },
            InitPhase::Fix if d.off => (0.0, false),
            _ => {
                let vd = ctx.voltage_between(d.anode_prime, d.cathode);
                self.limit(d, vd, st.now(d.states, S::Voltage))
            }
        }
    }

    fn limit(&self, d: &Diode, vd: f64, vold: f64) -> (f64, bool) {
        let nvt = d.scaled.nvt;
        match self.params.bv {
            Some(bv) if vd < (-bv + 10.0 * nvt).min(0.0) => {
                let (vtemp, limited) = pnjlim(-(vd + bv), -(vold + bv), nvt, d.scaled.vcrit);
                (-(vtemp + bv), limited)
            }
            _ => pnjlim(vd, vold, nvt, d.scaled.vcrit),
        }
    }

    /// True when the previous evaluation can be reused for `vd`.
    fn can_bypass(d: &Diode, ctx: &LoadContext, vd: f64) -> bool {
        if !ctx.options.bypass || !ctx.mode.bypass_allowed() {
            return false;
        }
        let st = &*ctx.states;
        let vold = st.now(d.states, S::Voltage);
        let cd = st.now(d.states, S::Current);
        let cdhat = cd + st.now(d.states, S::Conductance) * (vd - vold);
        ConvergenceChecker::voltage_within(vd, vold, ctx.options)
            && ConvergenceChecker::current_within(cdhat, cd, ctx.options)
    }

    /// Evaluate the junction at `vd` and store the result in `state0`.
    fn evaluate(&self, d: &Diode, ctx: &mut LoadContext, vd: f64) {
        let (cd, gd) = self.junction_current(&d.scaled, vd, ctx.options.gmin);
        let st = &mut *ctx.states;
        st.set_now(d.states, S::Voltage, vd);
        st.set_now(d.states, S::Current, cd);
        st.set_now(d.states, S::Conductance, gd);
        if self.params.tt > 0.0 || d.scaled.cjo > 0.0 {
            let (q, cap) = self.junction_charge(&d.scaled, vd, cd, gd);
            st.set_now(d.states, S::Charge, q);
            st.set_now(d.states, S::Capacitance, cap);
        }
    }

    /// Stamp from `state0` only.
    fn stamp(&self, d: &Diode, ctx: &mut LoadContext) {
        let vd = ctx.states.now(d.states, S::Voltage);
        let mut cd = ctx.states.now(d.states, S::Current);
        let mut gd = ctx.states.now(d.states, S::Conductance);

        if ctx.mode.is_transient() && (self.params.tt > 0.0 || d.scaled.cjo > 0.0) {
            let q = d.states.at(S::Charge);
            let first_step = ctx.mode.phase == InitPhase::Transient;
            if first_step {
                ctx.states.set(1, q, ctx.states.get(0, q));
            }
            let cap = ctx.states.now(d.states, S::Capacitance);
            let (geq, _) = ctx.integrator.integrate(ctx.states, q, cap);
            gd += geq;
            cd += ctx.states.now(d.states, S::ChargeCurrent);
            if first_step {
                let i = d.states.at(S::ChargeCurrent);
                ctx.states.set(1, i, ctx.states.get(0, i));
            }
        }

        let cdeq = cd - gd * vd;
        ctx.stamp_conductance(&d.handles.junction, gd);
        ctx.stamp_current(d.anode_prime, d.cathode, cdeq);
        if d.scaled.gspr > 0.0 {
            ctx.stamp_conductance(&d.handles.series, d.scaled.gspr);
        }
    }

    /// Conductance and capacitance at the operating point.
    fn small_signal(d: &Diode, states: &StateStore) -> (f64, f64) {
        (
            states.now(d.states, S::Conductance),
            states.now(d.states, S::Capacitance),
        )
    }
}

impl DeviceModel for DiodeModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "diode"
    }

    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList) -> Result<usize> {
        check_terminals("diode", name, nodes, 2)?;
        params.check_known(INSTANCE_PARAMS)?;
        let inst = Diode {
            anode: nodes[0],
            cathode: nodes[1],
            anode_prime: nodes[0],
            area: params.real_or("area", 1.0)? * params.real_or("m", 1.0)?,
            off: params.flag_or("off", false)?,
            ic: params.real("ic")?,
            states: StateBlock::default(),
            handles: Handles::default(),
            scaled: Scaled::default(),
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
            return self.params.set(name, value);
        };
        let d = self.instances.get_mut(inst)?;
        match name.to_ascii_lowercase().as_str() {
            "area" => d.area = value.expect_real(name)?,
            "off" => d.off = value.expect_flag(name)?,
            "ic" => d.ic = Some(value.expect_real(name)?),
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        let p = &self.params;
        if p.is <= 0.0 || p.n <= 0.0 || p.vj <= 0.0 || p.rs < 0.0 || p.fc >= 1.0 || p.mj >= 1.0 {
            return Err(Error::bad_parameter(
                &self.name,
                "*",
                "is, n and vj must be positive, rs non-negative, fc and mj below 1",
            ));
        }
        let has_rs = p.rs > 0.0;
        for (_, name, d) in self.instances.iter_mut() {
            if !(d.area > 0.0) {
                return Err(Error::bad_parameter(&self.name, name, "area must be positive"));
            }
            d.anode_prime = ctx.internal_or(has_rs, d.anode, name, "anode")?;
            d.handles.junction = ctx.entries2(d.anode_prime, d.cathode);
            d.handles.series = ctx.entries2(d.anode, d.anode_prime);
            d.states = ctx.allocate_states(DiodeState::COUNT);
        }
        Ok(())
    }

    fn temperature_update(&mut self, ctx: &mut TempContext) -> Result<()> {
        let p = &self.params;
        let temp = ctx.options.temperature;
        let tnom = p.tnom.unwrap_or(ctx.options.nominal_temperature);
        let vt = thermal_voltage(temp);
        let nvt = p.n * vt;
        let ratio = temp / tnom;
        let is_t = p.is * ((ratio - 1.0) * p.eg / nvt).exp() * ratio.powf(p.xti / p.n);
        for (_, _, d) in self.instances.iter_mut() {
            let is = is_t * d.area;
            d.scaled = Scaled {
                is,
                nvt,
                vcrit: critical_voltage(nvt, is),
                cjo: p.cjo * d.area,
                gspr: if p.rs > 0.0 { d.area / p.rs } else { 0.0 },
            };
        }
        Ok(())
    }

    fn initial_conditions(&mut self, solution: &[f64]) {
        for (_, _, d) in self.instances.iter_mut() {
            if d.ic.is_none() {
                d.ic = Some(voltage_at(solution, d.anode) - voltage_at(solution, d.cathode));
            }
        }
    }

    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus> {
        for (index, _, d) in self.instances.iter() {
            let (vd, limited) = self.bias(d, ctx);
            let bypass = !limited && Self::can_bypass(d, ctx, vd);
            if bypass {
                ctx.note_bypass();
            } else {
                self.evaluate(d, ctx, vd);
            }
            if ctx.mode.phase == InitPhase::SmallSignal {
                continue;
            }
            if limited && !(d.off && ctx.mode.phase == InitPhase::Fix) {
                ctx.conv.fail(index);
            }
            self.stamp(d, ctx);
        }
        Ok(LoadStatus::Continue)
    }

    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()> {
        for (_, _, d) in self.instances.iter() {
            let (gd, cap) = Self::small_signal(d, ctx.states);
            ctx.stamp_admittance(&d.handles.junction, gd, ctx.omega * cap);
            if d.scaled.gspr > 0.0 {
                ctx.stamp_admittance(&d.handles.series, d.scaled.gspr, 0.0);
            }
        }
        Ok(())
    }

    fn pz_load(&self, ctx: &mut PzLoadContext) -> Result<()> {
        for (_, _, d) in self.instances.iter() {
            let (gd, cap) = Self::small_signal(d, ctx.states);
            ctx.stamp_gc(&d.handles.junction, gd, cap);
            if d.scaled.gspr > 0.0 {
                ctx.stamp_gc(&d.handles.series, d.scaled.gspr, 0.0);
            }
        }
        Ok(())
    }

    fn convergence_test(&self, ctx: &mut ConvTestContext) {
        for (index, _, d) in self.instances.iter() {
            if d.off && ctx.mode.off_exempt() {
                continue;
            }
            let vd = ctx.voltage(d.anode_prime) - ctx.voltage(d.cathode);
            let vold = ctx.states.now(d.states, S::Voltage);
            let cd = ctx.states.now(d.states, S::Current);
            let cdhat = cd + ctx.states.now(d.states, S::Conductance) * (vd - vold);
            if !ConvergenceChecker::current_within(cdhat, cd, ctx.options) {
                ctx.conv.fail(index);
            }
        }
    }

    fn truncation_error(&self, ctx: &TruncContext, step: f64) -> f64 {
        if self.params.tt <= 0.0 && self.params.cjo <= 0.0 {
            return step;
        }
        self.instances
            .iter()
            .fold(step, |h, (_, _, d)| ctx.limit(d.states.at(S::Charge), h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodal_core::{
        CollectSink, IntegrationMethod, Integrator, MatrixStore, Mode, NodeTable, SimOptions,
    };

    struct Bench {
        model: DiodeModel,
        nodes: NodeTable,
        matrix: MatrixStore,
        states: StateStore,
        opts: SimOptions,
    }

    fn bench(params: ParamList) -> Bench {
        let mut model = DiodeModel::new("dmod", &params).unwrap();
        let mut nodes = NodeTable::new();
        let a = nodes.node("a");
        model
            .add_instance("d1", &[a, NodeId::GROUND], &ParamList::new())
            .unwrap();
        let mut matrix = MatrixStore::new(0);
        let mut states = StateStore::new();
        let opts = SimOptions::default();
        let mut sink = CollectSink::new();
        model
            .setup(&mut SetupContext {
                nodes: &mut nodes,
                matrix: &mut matrix,
                states: &mut states,
                options: &opts,
                diag: &mut sink,
            })
            .unwrap();
        model
            .temperature_update(&mut TempContext {
                options: &opts,
                diag: &mut sink,
            })
            .unwrap();
        matrix.set_size(nodes.num_unknowns());
        Bench {
            model,
            nodes,
            matrix,
            states,
            opts,
        }
    }

    #[test]
    fn test_series_resistance_adds_internal_node() {
        let b = bench(ParamList::new().with("rs", 10.0));
        assert_eq!(b.nodes.num_unknowns(), 2);
        assert!(b.nodes.find("d1#anode").is_ok());
    }

    #[test]
    fn test_junction_phase_starts_at_vcrit() {
        let mut b = bench(ParamList::new());
        let integrator = Integrator::new(IntegrationMethod::Trapezoidal);
        let mut conv = ConvergenceChecker::new();
        let mut sink = CollectSink::new();
        let sol = [0.0];
        let mut ctx = LoadContext::new(
            Mode::dc(),
            &b.opts,
            &sol,
            &mut b.matrix,
            &mut b.states,
            &integrator,
            &mut conv,
            0.0,
            &mut sink,
        );
        b.model.load(&mut ctx).unwrap();
        let vd = b.states.get(0, 0);
        assert!(vd > 0.6 && vd < 0.8, "vd = {}", vd);
    }

    #[test]
    fn test_large_step_is_limited_and_flagged() {
        let mut b = bench(ParamList::new());
        b.states.set(0, 0, 0.7);
        let integrator = Integrator::new(IntegrationMethod::Trapezoidal);
        let mut conv = ConvergenceChecker::new();
        let mut sink = CollectSink::new();
        let sol = [5.0];
        let mut ctx = LoadContext::new(
            Mode::dc().with_phase(InitPhase::Float),
            &b.opts,
            &sol,
            &mut b.matrix,
            &mut b.states,
            &integrator,
            &mut conv,
            0.0,
            &mut sink,
        );
        b.model.load(&mut ctx).unwrap();
        assert_eq!(conv.noncon(), 1);
        assert_eq!(conv.trouble().map(|t| t.instance), Some(0));
        assert!(b.states.get(0, 0) < 1.0);
    }

    #[test]
    fn test_reverse_current_saturates() {
        let b = bench(ParamList::new());
        let d = b.model.instances.iter().next().map(|(_, _, d)| d.clone()).unwrap();
        let (cd, gd) = b.model.junction_current(&d.scaled, -5.0, 0.0);
        assert!(cd < 0.0 && cd.abs() < 1.1e-14, "cd = {}", cd);
        assert!(gd > 0.0);
    }
}
