//! Example device module: a two-terminal resistor with a cubic term.
//!
//! `i = m·(g1·v + g3·v³)`
//!
//! Built as a `cdylib`, the module exports `nodal_module_info` and the
//! factory `nlres_c` through [`export_devices!`]; the host loads it with
//! `nodal-plugin`.

use nodal_core::{
    AcLoadContext, ConvTestContext, ConvergenceChecker, Error, InitPhase, LoadContext,
    MatrixHandle, NodeId, ParamList, ParamValue, PzLoadContext, Result, SetupContext, StateBlock,
    StateSlot,
};
use nodal_devices::{
    DeviceInfo, DeviceKind, DeviceModel, Instances, LoadStatus, check_terminals, export_devices,
};

const MODEL_PARAMS: &[&str] = &["g1", "g3"];
const INSTANCE_PARAMS: &[&str] = &["m"];

export_devices!("nlres", nlres_c, || vec![
    Box::new(NonlinearResistorKind::default()) as Box<dyn DeviceKind>
]);

/// State slots of one instance.
#[derive(Debug, Clone, Copy)]
enum NlState {
    Voltage,
    Current,
    Conductance,
}

impl StateSlot for NlState {
    const COUNT: usize = 3;
    fn offset(self) -> usize {
        self as usize
    }
}

use NlState as S;

/// Current and incremental conductance at `v`.
pub fn cubic(g1: f64, g3: f64, v: f64) -> (f64, f64) {
    (g1 * v + g3 * v * v * v, g1 + 3.0 * g3 * v * v)
}

/// Device type for `N` elements.
pub struct NonlinearResistorKind {
    info: DeviceInfo,
}

impl Default for NonlinearResistorKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("nlres", 'N', 1, 2, "Cubic nonlinear resistor"),
        }
    }
}

impl DeviceKind for NonlinearResistorKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>> {
        params.check_known(MODEL_PARAMS)?;
        Ok(Box::new(NonlinearResistorModel {
            name: name.to_string(),
            g1: params.real_or("g1", 1e-3)?,
            g3: params.real_or("g3", 1e-4)?,
            instances: Instances::new(),
        }))
    }
}

#[derive(Debug, Clone)]
struct NonlinearResistor {
    pos: NodeId,
    neg: NodeId,
    multiplier: f64,
    handles: [MatrixHandle; 4],
    states: StateBlock,
}

#[derive(Debug)]
struct NonlinearResistorModel {
    name: String,
    g1: f64,
    g3: f64,
    instances: Instances<NonlinearResistor>,
}

impl NonlinearResistorModel {
    fn evaluate(&self, r: &NonlinearResistor, v: f64) -> (f64, f64) {
        let (i, g) = cubic(self.g1, self.g3, v);
        (r.multiplier * i, r.multiplier * g)
    }
}

impl DeviceModel for NonlinearResistorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "nlres"
    }

    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList) -> Result<usize> {
        check_terminals("nlres", name, nodes, 2)?;
        params.check_known(INSTANCE_PARAMS)?;
        let multiplier = params.real_or("m", 1.0)?;
        if !(multiplier > 0.0) {
            return Err(Error::bad_parameter(&self.name, name, "m must be positive"));
        }
        self.instances.push(
            name,
            NonlinearResistor {
                pos: nodes[0],
                neg: nodes[1],
                multiplier,
                handles: [MatrixHandle::GROUND; 4],
                states: StateBlock::default(),
            },
        )
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
        match (instance, name.to_ascii_lowercase().as_str()) {
            (None, "g1") => self.g1 = value.expect_real(name)?,
            (None, "g3") => self.g3 = value.expect_real(name)?,
            (Some(inst), "m") => self.instances.get_mut(inst)?.multiplier = value.expect_real(name)?,
            _ => return Err(Error::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        for (_, _, r) in self.instances.iter_mut() {
            r.handles = ctx.entries2(r.pos, r.neg);
            r.states = ctx.allocate_states(S::COUNT);
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus> {
        for (_, _, r) in self.instances.iter() {
            let v = ctx.voltage_between(r.pos, r.neg);
            let vold = ctx.states.now(r.states, S::Voltage);
            let iold = ctx.states.now(r.states, S::Current);
            let gold = ctx.states.now(r.states, S::Conductance);
            let reuse = ctx.options.bypass
                && ctx.mode.bypass_allowed()
                && ConvergenceChecker::voltage_within(v, vold, ctx.options)
                && ConvergenceChecker::current_within(iold + gold * (v - vold), iold, ctx.options);
            let (v, i, g) = if reuse {
                ctx.note_bypass();
                (vold, iold, gold)
            } else {
                let (i, g) = self.evaluate(r, v);
                ctx.states.set_now(r.states, S::Voltage, v);
                ctx.states.set_now(r.states, S::Current, i);
                ctx.states.set_now(r.states, S::Conductance, g);
                (v, i, g)
            };
            if ctx.mode.phase == InitPhase::SmallSignal {
                continue;
            }
            ctx.stamp_conductance(&r.handles, g);
            ctx.stamp_current(r.pos, r.neg, i - g * v);
        }
        Ok(LoadStatus::Continue)
    }

    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()> {
        for (_, _, r) in self.instances.iter() {
            let g = ctx.states.now(r.states, S::Conductance);
            ctx.stamp_admittance(&r.handles, g, 0.0);
        }
        Ok(())
    }

    fn pz_load(&self, ctx: &mut PzLoadContext) -> Result<()> {
        for (_, _, r) in self.instances.iter() {
            let g = ctx.states.now(r.states, S::Conductance);
            ctx.stamp_gc(&r.handles, g, 0.0);
        }
        Ok(())
    }

    fn convergence_test(&self, ctx: &mut ConvTestContext) {
        for (index, _, r) in self.instances.iter() {
            let v = ctx.voltage(r.pos) - ctx.voltage(r.neg);
            let vold = ctx.states.now(r.states, S::Voltage);
            let iold = ctx.states.now(r.states, S::Current);
            let predicted = iold + ctx.states.now(r.states, S::Conductance) * (v - vold);
            let (actual, _) = self.evaluate(r, v);
            if !ConvergenceChecker::current_within(predicted, actual, ctx.options) {
                ctx.conv.fail(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodal_core::{
        CollectSink, IntegrationMethod, Integrator, MatrixStore, Mode, NodeTable, SimOptions,
        StateStore,
    };

    struct Fixture {
        model: Box<dyn DeviceModel>,
        matrix: MatrixStore,
        states: StateStore,
        opts: SimOptions,
    }

    fn fixture(params: ParamList) -> Fixture {
        let mut model = NonlinearResistorKind::default()
            .new_model("nl", &params)
            .unwrap();
        let mut nodes = NodeTable::new();
        let a = nodes.node("a");
        model
            .add_instance("n1", &[a, NodeId::GROUND], &ParamList::new())
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
        matrix.set_size(1);
        Fixture {
            model,
            matrix,
            states,
            opts,
        }
    }

    fn load(f: &mut Fixture, v: f64, phase: InitPhase) -> usize {
        let integrator = Integrator::new(IntegrationMethod::Trapezoidal);
        let mut conv = ConvergenceChecker::new();
        let mut sink = CollectSink::new();
        f.matrix.clear();
        let sol = [v];
        let mut ctx = LoadContext::new(
            Mode::dc().with_phase(phase),
            &f.opts,
            &sol,
            &mut f.matrix,
            &mut f.states,
            &integrator,
            &mut conv,
            0.0,
            &mut sink,
        );
        f.model.load(&mut ctx).unwrap();
        ctx.bypassed()
    }

    #[test]
    fn test_cubic() {
        let (i, g) = cubic(1e-3, 1e-4, 2.0);
        assert!((i - 2.8e-3).abs() < 1e-15);
        assert!((g - 2.2e-3).abs() < 1e-15);
    }

    #[test]
    fn test_linearized_stamp() {
        let mut f = fixture(ParamList::new());
        load(&mut f, 2.0, InitPhase::Junction);
        assert!((f.matrix.get(0, 0) - 2.2e-3).abs() < 1e-15);
        // i - g·v = -1.6 mA leaves the node
        assert!((f.matrix.rhs()[0] - 1.6e-3).abs() < 1e-15);
    }

    #[test]
    fn test_bypass_stamps_the_same() {
        let mut f = fixture(ParamList::new());
        assert_eq!(load(&mut f, 2.0, InitPhase::Float), 0);
        let full = (f.matrix.get(0, 0), f.matrix.rhs()[0]);
        assert_eq!(load(&mut f, 2.0, InitPhase::Float), 1);
        assert_eq!((f.matrix.get(0, 0), f.matrix.rhs()[0]), full);
    }

    #[test]
    fn test_unknown_parameter() {
        let kind = NonlinearResistorKind::default();
        assert!(kind.new_model("nl", &ParamList::new().with("g5", 1.0)).is_err());
        let mut model = kind.new_model("nl", &ParamList::new()).unwrap();
        assert!(model.set_param(None, "g1", &ParamValue::Real(2e-3)).is_ok());
        assert!(model.set_param(None, "m", &ParamValue::Real(2.0)).is_err());
    }

    #[test]
    fn test_exported_factory() {
        use nodal_devices::abi::{FACTORY_OK, RawDevice, take_devices};
        let mut buf: [RawDevice; 2] = [std::ptr::null_mut(); 2];
        let mut count = 2;
        let rc = unsafe { nlres_c(buf.as_mut_ptr(), &mut count) };
        assert_eq!(rc, FACTORY_OK);
        let devices = unsafe { take_devices(&buf[..count as usize]) };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].info().name, "nlres");
        let name = unsafe { nodal_devices::abi::read_c_str(nodal_module_info.name) };
        assert_eq!(name.as_deref(), Some("nlres"));
    }
}
