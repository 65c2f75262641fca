//! End-to-end tests of the analyses on small circuits.

use std::rc::Rc;

use nodal_core::{
    AcLoadContext, CollectSink, Error as CoreError, IntegrationMethod, LoadContext, NodeId,
    Origin, ParamList, ParamValue, PzLoadContext, Result as CoreResult, SetupContext, Severity,
    SimOptions,
};
use nodal_devices::{DeviceInfo, DeviceKind, DeviceModel, DeviceRegistry, Instances, LoadStatus};
use nodal_solver::{
    AcParams, Circuit, Error, HaltReason, InitialConditions, PzParams, StepOutcome,
    TransientParams, TransientRun, ac_sweep, operating_point, poles, transient,
};

fn registry() -> DeviceRegistry {
    DeviceRegistry::with_builtins()
}

/// Requests a pause once transient time passes `pause_at`, or a finish on
/// every load when `finish` is set.
struct HaltKind {
    info: DeviceInfo,
}

impl Default for HaltKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("halter", 'P', 1, 2, "Requests a halt"),
        }
    }
}

impl DeviceKind for HaltKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> CoreResult<Box<dyn DeviceModel>> {
        Ok(Box::new(HaltModel {
            name: name.to_string(),
            pause_at: params.real("pause_at")?,
            finish: params.flag_or("finish", false)?,
            paused: false,
            instances: Instances::new(),
        }))
    }
}

struct HaltModel {
    name: String,
    pause_at: Option<f64>,
    finish: bool,
    paused: bool,
    instances: Instances<()>,
}

impl DeviceModel for HaltModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "halter"
    }

    fn add_instance(&mut self, name: &str, _nodes: &[NodeId], _params: &ParamList) -> CoreResult<usize> {
        self.instances.push(name, ())
    }

    fn delete_instance(&mut self, name: &str) -> CoreResult<()> {
        self.instances.remove(name)
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn instance_name(&self, index: usize) -> Option<&str> {
        self.instances.name(index)
    }

    fn set_param(&mut self, _instance: Option<&str>, name: &str, _value: &ParamValue) -> CoreResult<()> {
        Err(CoreError::UnknownParameter(name.to_string()))
    }

    fn setup(&mut self, _ctx: &mut SetupContext) -> CoreResult<()> {
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext) -> CoreResult<LoadStatus> {
        if self.finish {
            return Ok(LoadStatus::Finish);
        }
        match self.pause_at {
            Some(t) if ctx.mode.is_transient() && ctx.time > t && !self.paused => {
                self.paused = true;
                Ok(LoadStatus::Pause)
            }
            _ => Ok(LoadStatus::Continue),
        }
    }

    fn ac_load(&self, _ctx: &mut AcLoadContext) -> CoreResult<()> {
        Ok(())
    }

    fn pz_load(&self, _ctx: &mut PzLoadContext) -> CoreResult<()> {
        Ok(())
    }
}

fn rc_charge(halter: Option<ParamList>) -> Circuit {
    let reg = registry();
    let mut ckt = Circuit::default();
    ckt.add_model_from(&reg, "vsource", "v", &ParamList::new())
        .unwrap();
    ckt.add_model_from(&reg, "resistor", "r", &ParamList::new())
        .unwrap();
    ckt.add_model_from(&reg, "capacitor", "c", &ParamList::new())
        .unwrap();
    ckt.add_instance("v", "v1", &["in", "0"], &ParamList::new().with("dc", 1.0))
        .unwrap();
    ckt.add_instance("r", "r1", &["in", "out"], &ParamList::new().with("r", 1e3))
        .unwrap();
    ckt.add_instance("c", "c1", &["out", "0"], &ParamList::new().with("c", 1e-6))
        .unwrap();
    if let Some(params) = halter {
        ckt.add_model(Rc::new(HaltKind::default()), "p", &params)
            .unwrap();
        ckt.add_instance("p", "p1", &["out", "0"], &ParamList::new())
            .unwrap();
    }
    ckt
}

#[test]
fn test_load_order_does_not_change_the_system() {
    // conductances and currents are exact binary fractions
    let build = |order: &[(&str, &str)]| {
        let reg = registry();
        let mut ckt = Circuit::default();
        ckt.node("in");
        ckt.node("out");
        for (device, model) in order {
            ckt.add_model_from(&reg, device, model, &ParamList::new())
                .unwrap();
        }
        ckt.add_instance("v", "v1", &["in", "0"], &ParamList::new().with("dc", 1.0))
            .unwrap();
        ckt.add_instance("r", "r1", &["in", "out"], &ParamList::new().with("r", 2.0))
            .unwrap();
        ckt.add_instance("r", "r2", &["out", "0"], &ParamList::new().with("r", 4.0))
            .unwrap();
        ckt.add_instance("r", "r3", &["out", "0"], &ParamList::new().with("r", 0.5))
            .unwrap();
        ckt.add_instance("i", "i1", &["0", "out"], &ParamList::new().with("dc", 0.25))
            .unwrap();
        let mut sink = CollectSink::new();
        operating_point(&mut ckt, &mut sink).unwrap();
        ckt
    };

    let a = build(&[("vsource", "v"), ("resistor", "r"), ("isource", "i")]);
    let b = build(&[("isource", "i"), ("resistor", "r"), ("vsource", "v")]);

    assert_eq!(a.size(), b.size());
    assert_eq!(a.matrix().to_dense_matrix(), b.matrix().to_dense_matrix());
    assert_eq!(a.matrix().rhs(), b.matrix().rhs());
    assert_eq!(a.solution(), b.solution());
}

#[test]
fn test_tighter_tolerance_never_converges_sooner() {
    let build = |reltol: f64| {
        let reg = registry();
        let mut ckt = Circuit::new(SimOptions::default().with_reltol(reltol));
        ckt.add_model_from(&reg, "vsource", "v", &ParamList::new())
            .unwrap();
        ckt.add_model_from(&reg, "resistor", "r", &ParamList::new())
            .unwrap();
        ckt.add_model_from(&reg, "diode", "d", &ParamList::new())
            .unwrap();
        ckt.add_instance("v", "v1", &["in", "0"], &ParamList::new().with("dc", 5.0))
            .unwrap();
        ckt.add_instance("r", "r1", &["in", "a"], &ParamList::new().with("r", 1e3))
            .unwrap();
        ckt.add_instance("d", "d1", &["a", "0"], &ParamList::new())
            .unwrap();
        ckt
    };

    let mut last = 0;
    let mut voltages = Vec::new();
    for reltol in [1e-2, 1e-3, 1e-4, 1e-6] {
        let mut ckt = build(reltol);
        let mut sink = CollectSink::new();
        let op = operating_point(&mut ckt, &mut sink).unwrap();
        assert!(
            op.iterations >= last,
            "reltol {} took {} iterations, looser took {}",
            reltol,
            op.iterations,
            last
        );
        last = op.iterations;
        voltages.push(ckt.voltage("a").unwrap());
    }
    let spread = voltages.iter().cloned().fold(f64::MIN, f64::max)
        - voltages.iter().cloned().fold(f64::MAX, f64::min);
    assert!(spread < 1e-2, "diode voltages {:?}", voltages);
}

fn assert_rc_discharge(options: SimOptions) {
    let reg = registry();
    let mut ckt = Circuit::new(options);
    ckt.add_model_from(&reg, "resistor", "r", &ParamList::new())
        .unwrap();
    ckt.add_model_from(&reg, "capacitor", "c", &ParamList::new())
        .unwrap();
    ckt.add_instance("r", "r1", &["out", "0"], &ParamList::new().with("r", 1e3))
        .unwrap();
    ckt.add_instance("c", "c1", &["out", "0"], &ParamList::new().with("c", 1e-6))
        .unwrap();

    let mut ic = InitialConditions::new();
    ic.set_voltage("out", 1.0);
    let params = TransientParams::new(50e-6, 5e-3).with_initial_conditions(ic);
    let mut sink = CollectSink::new();
    let result = transient(&mut ckt, params, &mut sink).unwrap();

    let out = ckt.nodes().find("out").unwrap().index().unwrap();
    let tau = 1e-3;
    assert!(result.accepted_steps() > 10);
    for (t, v) in result.waveform(out) {
        let expected = (-t / tau).exp();
        assert!(
            (v - expected).abs() < 5e-3,
            "v(out) at t={:e}: {} vs {}",
            t,
            v,
            expected
        );
    }
    let last = result.points.last().unwrap();
    assert!((last.time - 5e-3).abs() < 1e-15);
}

#[test]
fn test_rc_discharge_matches_exponential() {
    assert_rc_discharge(SimOptions::default());
}

#[test]
fn test_gear_rc_discharge_matches_exponential() {
    assert_rc_discharge(SimOptions::default().with_method(IntegrationMethod::Gear, 4));
}

#[test]
fn test_rc_charge_from_operating_point_stays_put() {
    // a DC source already at steady state: nothing should move
    let mut ckt = rc_charge(None);
    let mut sink = CollectSink::new();
    let result = transient(&mut ckt, TransientParams::new(1e-5, 1e-4), &mut sink).unwrap();
    let out = ckt.nodes().find("out").unwrap().index().unwrap();
    for (_, v) in result.waveform(out) {
        assert!((v - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_pause_keeps_last_point_and_resumes() {
    let pause_at = 2e-5;
    let mut ckt = rc_charge(Some(ParamList::new().with("pause_at", pause_at)));
    let mut sink = CollectSink::new();
    let mut run = TransientRun::start(&mut ckt, TransientParams::new(1e-5, 1e-4), &mut sink).unwrap();

    let err = loop {
        match run.step(&mut sink) {
            Ok(StepOutcome::Accepted(_)) => continue,
            Ok(StepOutcome::Finished) => panic!("run finished without pausing"),
            Err(e) => break e,
        }
    };
    let Error::Halted(HaltReason::Pause { time }) = err else {
        panic!("expected a pause, got {}", err);
    };
    assert!(time > pause_at);
    let held = run.time();
    assert!(held <= pause_at);
    assert_eq!(run.result().points.last().map(|p| p.time), Some(held));

    let Ok(StepOutcome::Accepted(t)) = run.step(&mut sink) else {
        panic!("resume did not accept a point");
    };
    assert!(t > held);
    run.run_to_end(&mut sink).unwrap();
    assert!((run.time() - 1e-4).abs() < 1e-15);
}

#[test]
fn test_finish_request_stops_operating_point() {
    let mut ckt = rc_charge(Some(ParamList::new().with("finish", true)));
    let mut sink = CollectSink::new();
    let err = operating_point(&mut ckt, &mut sink).unwrap_err();
    assert!(matches!(
        err,
        Error::Halted(HaltReason::Finish { time }) if time == 0.0
    ));
}

#[test]
fn test_short_channel_is_fatal_with_origin() {
    let reg = registry();
    let mut ckt = Circuit::default();
    ckt.add_model_from(
        &reg,
        "mos1",
        "nch",
        &ParamList::new().with("vto", 1.0).with("kp", 2e-5).with("ld", 0.5e-6),
    )
    .unwrap();
    ckt.add_instance(
        "nch",
        "m1",
        &["d", "g", "0", "0"],
        &ParamList::new().with("l", 1e-6).with("w", 10e-6),
    )
    .unwrap();

    let mut sink = CollectSink::new();
    let err = ckt.setup(&mut sink).unwrap_err();
    assert!(matches!(err, Error::Core(CoreError::BadParameter { .. })));
    let fatal: Vec<_> = sink.at_least(Severity::Fatal).collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].origin, Some(Origin::instance("nch", "m1")));
}

/// A diode forward biased from `dc` volts through 1 kΩ, optionally loaded
/// by a capacitor across the junction.
fn biased_diode(dc: f64, cap: Option<f64>) -> Circuit {
    let reg = registry();
    let mut ckt = Circuit::default();
    for (device, model) in [
        ("vsource", "v"),
        ("resistor", "r"),
        ("diode", "d"),
        ("capacitor", "c"),
    ] {
        ckt.add_model_from(&reg, device, model, &ParamList::new())
            .unwrap();
    }
    ckt.add_instance(
        "v",
        "v1",
        &["in", "0"],
        &ParamList::new().with("dc", dc).with("ac", 1.0),
    )
    .unwrap();
    ckt.add_instance("r", "r1", &["in", "a"], &ParamList::new().with("r", 1e3))
        .unwrap();
    ckt.add_instance("d", "d1", &["a", "0"], &ParamList::new())
        .unwrap();
    if let Some(c) = cap {
        ckt.add_instance("c", "c1", &["a", "0"], &ParamList::new().with("c", c))
            .unwrap();
    }
    ckt
}

/// Small-signal conductance of the diode at the solved bias.
fn diode_conductance(ckt: &Circuit, dc: f64) -> f64 {
    let va = ckt.voltage("a").unwrap();
    let id = (dc - va) / 1e3;
    (id + 1e-14) / SimOptions::default().thermal_voltage()
}

#[test]
fn test_ac_gain_follows_diode_bias() {
    let mut gains = Vec::new();
    for dc in [2.0, 10.0] {
        let mut ckt = biased_diode(dc, None);
        let mut sink = CollectSink::new();
        let result = ac_sweep(&mut ckt, &AcParams::linear(1, 1e3, 1e3), &mut sink).unwrap();

        let gd = diode_conductance(&ckt, dc);
        let expected = 1e-3 / (1e-3 + gd);
        let a = ckt.nodes().find("a").unwrap().index().unwrap();
        let (_, phasor) = result.phasor(a)[0];
        assert!(
            (phasor.re - expected).abs() < 1e-3 * expected,
            "bias {} V: gain {} vs {}",
            dc,
            phasor.re,
            expected
        );
        assert!(phasor.im.abs() < 1e-12, "bias {} V: phasor {}", dc, phasor);
        gains.push(phasor.re);
    }
    // more current, lower junction resistance
    assert!(gains[1] < gains[0], "gains {:?}", gains);
}

#[test]
fn test_pole_of_capacitor_across_biased_diode() {
    let dc = 5.0;
    let c = 1e-6;
    let mut ckt = biased_diode(dc, Some(c));
    let mut sink = CollectSink::new();
    let params = PzParams {
        scale: 1e5,
        ..PzParams::default()
    };
    let result = poles(&mut ckt, &params, &mut sink).unwrap();

    let gd = diode_conductance(&ckt, dc);
    let expected = -(1e-3 + gd) / c;
    assert_eq!(result.poles.len(), 1, "poles = {:?}", result.poles);
    let p = result.poles[0];
    assert!(
        (p.re - expected).abs() < 1e-3 * expected.abs(),
        "pole {} vs {}",
        p,
        expected
    );
    assert!(p.im.abs() < 1e-6 * expected.abs(), "pole = {}", p);
    // the unbiased RC pole would sit at -1e3 rad/s
    assert!(p.re < -1e4);
}

/// Level-1 NMOS and PMOS models with `beta = 2e-4` at `W/L = 10`.
fn add_mos_models(ckt: &mut Circuit, reg: &DeviceRegistry) {
    ckt.add_model_from(
        reg,
        "mos1",
        "nch",
        &ParamList::new()
            .with("nmos", true)
            .with("vto", 1.0)
            .with("kp", 2e-5),
    )
    .unwrap();
    ckt.add_model_from(
        reg,
        "mos1",
        "pch",
        &ParamList::new()
            .with("pmos", true)
            .with("vto", -1.0)
            .with("kp", 2e-5),
    )
    .unwrap();
}

fn mos_geometry() -> ParamList {
    ParamList::new().with("l", 1e-6).with("w", 10e-6)
}

/// CMOS inverter on a 5 V supply, input driven by `vin`, output loaded by
/// 1 pF.
fn cmos_inverter(vin: ParamList) -> Circuit {
    let reg = registry();
    let mut ckt = Circuit::default();
    for (device, model) in [("vsource", "v"), ("capacitor", "c")] {
        ckt.add_model_from(&reg, device, model, &ParamList::new())
            .unwrap();
    }
    add_mos_models(&mut ckt, &reg);
    ckt.add_instance("v", "vdd", &["vdd", "0"], &ParamList::new().with("dc", 5.0))
        .unwrap();
    ckt.add_instance("v", "vin", &["in", "0"], &vin).unwrap();
    ckt.add_instance("nch", "mn", &["out", "in", "0", "0"], &mos_geometry())
        .unwrap();
    ckt.add_instance("pch", "mp", &["out", "in", "vdd", "vdd"], &mos_geometry())
        .unwrap();
    ckt.add_instance("c", "cl", &["out", "0"], &ParamList::new().with("c", 1e-12))
        .unwrap();
    ckt
}

#[test]
fn test_nmos_inverter_operating_point() {
    let reg = registry();
    let mut ckt = Circuit::default();
    for (device, model) in [("vsource", "v"), ("resistor", "r")] {
        ckt.add_model_from(&reg, device, model, &ParamList::new())
            .unwrap();
    }
    add_mos_models(&mut ckt, &reg);
    ckt.add_instance("v", "vdd", &["vdd", "0"], &ParamList::new().with("dc", 5.0))
        .unwrap();
    ckt.add_instance("v", "vin", &["in", "0"], &ParamList::new().with("dc", 5.0))
        .unwrap();
    ckt.add_instance("r", "rl", &["vdd", "out"], &ParamList::new().with("r", 1e4))
        .unwrap();
    ckt.add_instance("nch", "mn", &["out", "in", "0", "0"], &mos_geometry())
        .unwrap();

    let mut sink = CollectSink::new();
    operating_point(&mut ckt, &mut sink).unwrap();

    // triode: (5 - vo)/1e4 = 2e-4·(4·vo - vo²/2), so vo² - 9·vo + 5 = 0
    let expected = (9.0 - 61.0_f64.sqrt()) / 2.0;
    let out = ckt.voltage("out").unwrap();
    assert!(
        (out - expected).abs() < 1e-4,
        "v(out) = {} vs {}",
        out,
        expected
    );
}

#[test]
fn test_cmos_inverter_operating_point_rails() {
    for (vin, low) in [(0.0, false), (5.0, true)] {
        let mut ckt = cmos_inverter(ParamList::new().with("dc", vin));
        let mut sink = CollectSink::new();
        operating_point(&mut ckt, &mut sink).unwrap();
        let out = ckt.voltage("out").unwrap();
        let expected = if low { 0.0 } else { 5.0 };
        assert!(
            (out - expected).abs() < 1e-3,
            "vin {} V: v(out) = {}",
            vin,
            out
        );
    }
}

#[test]
fn test_cmos_inverter_switches_in_transient() {
    // high from 2 ns to 22 ns, low again from 23 ns
    let pulse = vec![0.0, 5.0, 1e-9, 1e-9, 1e-9, 20e-9, 100e-9];
    let mut ckt = cmos_inverter(ParamList::new().with("pulse", pulse));
    let mut sink = CollectSink::new();
    let result = transient(&mut ckt, TransientParams::new(0.5e-9, 40e-9), &mut sink).unwrap();

    let out = ckt.nodes().find("out").unwrap().index().unwrap();
    let at = |t: f64| result.value_at(out, t).unwrap();
    assert!((at(0.0) - 5.0).abs() < 1e-3, "v(out) at 0 = {}", at(0.0));
    assert!(at(18e-9) < 0.05, "v(out) at 18 ns = {}", at(18e-9));
    assert!(at(40e-9) > 4.95, "v(out) at 40 ns = {}", at(40e-9));
    assert!(result.accepted_steps() > 40);
}
