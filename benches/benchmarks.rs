use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use nalgebra::DVector;

use pvcell::discretization::mesh::DeviceMesh;
use pvcell::models::perovskite;
use pvcell::numerics::steady::initial_state;
use pvcell::numerics::SolverConfig;
use pvcell::physics::{Engine, JacobianPath, Mode};

fn problem_sizes() -> Vec<usize> {
    vec![50, 200]
}

fn setup(n: usize) -> (perovskite::Params, DeviceMesh) {
    let params = perovskite::soft_cell();
    let mesh = DeviceMesh::build(&params, n / 4, n, n / 4, 4.0).unwrap();
    (params, mesh)
}

fn steady_guess(engine: &Engine) -> DVector<f64> {
    let lay = &engine.layout;
    let mut u = DVector::zeros(lay.n_dof());
    for i in 0..lay.n_e {
        u[lay.etl_phi(i)] = 0.2;
        u[lay.etl_n(i)] = 1.0;
    }
    for j in 0..=lay.n {
        u[lay.pk_v(j)] = 1.0;
        u[lay.pk_phi(j)] = 0.1;
        u[lay.pk_n(j)] = 0.3;
        u[lay.pk_p(j)] = 0.3;
    }
    for k in 1..=lay.n_h {
        u[lay.htl_phi(k)] = -0.2;
        u[lay.htl_p(k)] = 1.0;
    }
    u
}

fn bench_dense_jacobian(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_jacobian");
    for &size in &problem_sizes() {
        let (params, mesh) = setup(size);
        let engine = Engine::new(&params, &mesh, Mode::Transient);
        let u = steady_guess(&engine);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter(|| {
                let (_res, jac) =
                    engine.residual_and_jacobian(JacobianPath::Dense, &u, 1.0, 0.4);
                std::hint::black_box(jac);
            });
        });
    }
    group.finish();
}

fn bench_sparse_jacobian(c: &mut Criterion) {
    let mut group = c.benchmark_group("sparse_jacobian");
    for &size in &problem_sizes() {
        let (params, mesh) = setup(size);
        let engine = Engine::new(&params, &mesh, Mode::Transient);
        let u = steady_guess(&engine);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter(|| {
                let (_res, jac) =
                    engine.residual_and_jacobian(JacobianPath::Sparse, &u, 1.0, 0.4);
                std::hint::black_box(jac);
            });
        });
    }
    group.finish();
}

fn bench_banded_newton_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("banded_newton_step");
    for &size in &problem_sizes() {
        let (params, mesh) = setup(size);
        let engine = Engine::new(&params, &mesh, Mode::Transient);
        let u = steady_guess(&engine);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter_batched(
                || engine.residual_and_jacobian(JacobianPath::Sparse, &u, 1.0, 0.4),
                |(res, jac)| {
                    let delta = jac.solve(&(-&res)).unwrap();
                    std::hint::black_box(delta);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_initializer(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_initializer");
    group.sample_size(10);
    for &size in &[30usize, 60] {
        let params = perovskite::soft_cell();
        let cfg = SolverConfig {
            n_etl: size / 3,
            n_psk: size,
            n_htl: size / 3,
            ..SolverConfig::default()
        };
        let mesh = DeviceMesh::build(&params, cfg.n_etl, cfg.n_psk, cfg.n_htl, cfg.stretch).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter(|| {
                let s = initial_state(&params, &mesh, 1.0, 0.3, &cfg).unwrap();
                std::hint::black_box(s.u);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_dense_jacobian,
    bench_sparse_jacobian,
    bench_banded_newton_step,
    bench_initializer
);
criterion_main!(benches);
