//! Benchmarks for the Newton driver.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nalgebra::{DMatrix, DVector};
use nodal_core::{CollectSink, MatrixStore, NodeId, ParamList};
use nodal_devices::DeviceRegistry;
use nodal_solver::linear::solve_dense;
use nodal_solver::{Circuit, operating_point};

/// A source feeding `stages` resistor-diode sections in series.
fn diode_ladder(stages: usize) -> Circuit {
    let reg = DeviceRegistry::with_builtins();
    let mut ckt = Circuit::default();
    ckt.add_model_from(&reg, "vsource", "v", &ParamList::new())
        .unwrap();
    ckt.add_model_from(&reg, "resistor", "r", &ParamList::new())
        .unwrap();
    ckt.add_model_from(&reg, "diode", "d", &ParamList::new())
        .unwrap();
    ckt.add_instance("v", "v1", &["n0", "0"], &ParamList::new().with("dc", 5.0))
        .unwrap();
    for i in 0..stages {
        let from = format!("n{}", i);
        let to = format!("n{}", i + 1);
        ckt.add_instance("r", &format!("r{}", i), &[&from, &to], &ParamList::new().with("r", 100.0))
            .unwrap();
        ckt.add_instance("d", &format!("d{}", i), &[&to, "0"], &ParamList::new())
            .unwrap();
    }
    ckt
}

fn bench_operating_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("operating_point");

    for stages in [10, 40, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(stages),
            &stages,
            |bencher, &stages| {
                let mut ckt = diode_ladder(stages);
                let mut sink = CollectSink::new();
                bencher.iter(|| {
                    sink.diagnostics.clear();
                    operating_point(black_box(&mut ckt), &mut sink).unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_matrix_accumulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_accumulation");

    for size in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &size,
            |bencher, &size| {
                // Tridiagonal pattern, one conductance per neighbor pair
                let mut matrix = MatrixStore::new(size);
                let handles: Vec<_> = (1..size as u32)
                    .map(|i| {
                        let (a, b) = (NodeId::new(i), NodeId::new(i + 1));
                        [
                            matrix.entry(a, a),
                            matrix.entry(b, b),
                            matrix.entry(a, b),
                            matrix.entry(b, a),
                        ]
                    })
                    .collect();

                bencher.iter(|| {
                    matrix.clear();
                    for h in &handles {
                        matrix.add(h[0], black_box(1e-3));
                        matrix.add(h[1], black_box(1e-3));
                        matrix.add(h[2], black_box(-1e-3));
                        matrix.add(h[3], black_box(-1e-3));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_solve_dense(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_dense");

    for size in [10, 50, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &size,
            |bencher, &size| {
                // Diagonally dominant, so never singular
                let a = DMatrix::from_fn(size, size, |i, j| {
                    if i == j {
                        (size as f64) + 1.0
                    } else {
                        1.0 / ((i as f64 - j as f64).abs() + 1.0)
                    }
                });
                let rhs = DVector::from_fn(size, |i, _| (i + 1) as f64);

                bencher.iter(|| solve_dense(black_box(&a), black_box(&rhs)).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_operating_point,
    bench_matrix_accumulation,
    bench_solve_dense
);
criterion_main!(benches);
