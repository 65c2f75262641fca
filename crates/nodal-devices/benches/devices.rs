//! Benchmarks for device load passes.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nodal_core::{
    CollectSink, ConvergenceChecker, InitPhase, IntegrationMethod, Integrator, LoadContext,
    MatrixStore, Mode, NodeId, NodeTable, ParamList, SetupContext, SimOptions, StateStore,
    TempContext,
};
use nodal_devices::{DeviceKind, DeviceModel, DiodeKind, MosfetKind};

struct Chain {
    model: Box<dyn DeviceModel>,
    matrix: MatrixStore,
    states: StateStore,
    solution: Vec<f64>,
}

/// `count` devices of one model, each between a fresh node and ground.
fn chain(kind: &dyn DeviceKind, model_params: ParamList, count: usize, bias: &[f64]) -> Chain {
    let mut model = kind.new_model("bench", &model_params).unwrap();
    let mut nodes = NodeTable::new();
    let terminals = kind.info().terminals;
    for i in 0..count {
        let mut pins: Vec<NodeId> = (0..terminals - 1)
            .map(|t| nodes.node(&format!("n{}_{}", i, t)))
            .collect();
        pins.push(NodeId::GROUND);
        let params = if terminals == 4 {
            ParamList::new().with("l", 1e-6).with("w", 10e-6)
        } else {
            ParamList::new()
        };
        model
            .add_instance(&format!("x{}", i), &pins, &params)
            .unwrap();
    }
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
    let solution = (0..nodes.num_unknowns())
        .map(|i| bias[i % bias.len()])
        .collect();
    Chain {
        model,
        matrix,
        states,
        solution,
    }
}

fn run(c: &mut Criterion, group_name: &str, make: impl Fn(usize) -> Chain, bypass: bool) {
    let mut group = c.benchmark_group(group_name);
    let opts = SimOptions::default().with_bypass(bypass);
    let integrator = Integrator::new(IntegrationMethod::Trapezoidal);
    let mode = Mode::dc().with_phase(InitPhase::Float);

    for count in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |bencher, &count| {
            let mut chain = make(count);
            let mut conv = ConvergenceChecker::new();
            let mut sink = CollectSink::new();
            bencher.iter(|| {
                chain.matrix.clear();
                conv.reset();
                let mut ctx = LoadContext::new(
                    mode,
                    &opts,
                    &chain.solution,
                    &mut chain.matrix,
                    &mut chain.states,
                    &integrator,
                    &mut conv,
                    0.0,
                    &mut sink,
                );
                chain.model.load(&mut ctx).unwrap();
                black_box(ctx.bypassed())
            });
        });
    }

    group.finish();
}

fn bench_diode_load(c: &mut Criterion) {
    let make = |n| chain(&DiodeKind::default(), ParamList::new(), n, &[0.65]);
    run(c, "diode_load", make, false);
    run(c, "diode_load_bypass", make, true);
}

fn bench_mosfet_load(c: &mut Criterion) {
    let params = ParamList::new()
        .with("vto", 0.7)
        .with("kp", 1e-4)
        .with("lambda", 0.02);
    let make = |n| chain(&MosfetKind::default(), params.clone(), n, &[3.0, 1.5, 0.0]);
    run(c, "mosfet_load", make, false);
}

criterion_group!(benches, bench_diode_load, bench_mosfet_load);
criterion_main!(benches);
