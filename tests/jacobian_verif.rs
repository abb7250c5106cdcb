use nalgebra::DVector;

use pvcell::discretization::mesh::DeviceMesh;
use pvcell::models::{perovskite, Layout};
use pvcell::physics::{Engine, JacobianPath, Mode};

/// A structured, strictly positive state with visible gradients in every
/// field, so no Jacobian entry degenerates to zero by accident.
fn test_state(layout: &Layout) -> DVector<f64> {
    let mut u = DVector::zeros(layout.n_dof());
    for i in 0..layout.n_e {
        let s = i as f64 / layout.n_e as f64;
        u[layout.etl_phi(i)] = 0.4 - 0.3 * s;
        u[layout.etl_n(i)] = 1.0 - 0.4 * s;
    }
    for j in 0..=layout.n {
        let s = j as f64 / layout.n as f64;
        u[layout.pk_v(j)] = 1.0 + 0.2 * (3.1 * s).sin();
        u[layout.pk_phi(j)] = 0.1 * (2.0 * s).cos() - 0.2 * s;
        u[layout.pk_n(j)] = 0.3 * (-2.0 * s).exp() + 0.01;
        u[layout.pk_p(j)] = 0.2 * (2.0 * (s - 1.0)).exp() + 0.02;
    }
    for k in 1..=layout.n_h {
        let s = k as f64 / layout.n_h as f64;
        u[layout.htl_phi(k)] = -0.1 - 0.2 * s;
        u[layout.htl_p(k)] = 0.6 + 0.4 * s;
    }
    u
}

#[test]
fn sparse_and_dense_jacobians_are_close() {
    let params = perovskite::soft_cell();
    let mesh = DeviceMesh::build(&params, 6, 12, 5, 2.0).unwrap();

    for mode in [Mode::Init, Mode::Transient] {
        let engine = Engine::new(&params, &mesh, mode);
        let u = test_state(&engine.layout);
        let (light, psi) = (0.8, 0.6);

        let (r_dense, j_dense) = engine.residual_and_jacobian(JacobianPath::Dense, &u, light, psi);
        let (r_sparse, j_sparse) =
            engine.residual_and_jacobian(JacobianPath::Sparse, &u, light, psi);

        assert!((&r_dense - &r_sparse).amax() < 1e-13 * (1.0 + r_dense.amax()));

        let d = j_dense.to_dense();
        let s = j_sparse.to_dense();
        let diff = (&s - &d).norm();
        let norm = d.norm();
        assert!(
            diff / norm < 1e-12,
            "mode {mode:?}: relative Jacobian difference {diff} / {norm}"
        );
    }
}

#[test]
fn dense_jacobian_respects_declared_sparsity() {
    let params = perovskite::soft_cell();
    let mesh = DeviceMesh::build(&params, 5, 10, 6, 1.5).unwrap();

    for mode in [Mode::Init, Mode::Transient] {
        let engine = Engine::new(&params, &mesh, mode);
        let u = test_state(&engine.layout);
        let (_, jac) = engine.residual_and_jacobian(JacobianPath::Dense, &u, 1.0, 0.3);
        let d = jac.to_dense();

        for r in 0..engine.n_dof() {
            for c in 0..engine.n_dof() {
                if d[(r, c)].abs() > 1e-12 {
                    assert!(
                        engine.stencils[r].contains(&c),
                        "mode {mode:?}: entry ({r}, {c}) = {} outside declared stencil",
                        d[(r, c)]
                    );
                }
            }
        }
    }
}

#[test]
fn init_mode_pins_ion_rows_to_the_frozen_profile() {
    let params = perovskite::soft_cell();
    let mesh = DeviceMesh::build(&params, 5, 10, 5, 2.0).unwrap();
    let engine = Engine::new(&params, &mesh, Mode::Init);
    let layout = &engine.layout;

    let mut u = test_state(layout);
    for j in 0..=layout.n {
        u[layout.pk_v(j)] = 1.0;
    }
    let f = engine.rhs(&u, 0.5, 0.2);
    for j in 0..=layout.n {
        assert_eq!(f[layout.pk_v(j)], 0.0);
    }

    // Masses vanish entirely in init mode, and only carrier/ion rows carry
    // mass in transient mode.
    assert!(engine.masses().iter().all(|&m| m == 0.0));
    let transient = Engine::new(&params, &mesh, Mode::Transient);
    let m = transient.masses();
    assert!(m[layout.pk_v(1)] > 0.0);
    assert!(m[layout.pk_n(0)] > 0.0);
    assert_eq!(m[layout.pk_phi(1)], 0.0);
    assert_eq!(m[layout.etl_phi(0)], 0.0);
    assert_eq!(m[layout.etl_n(0)], 0.0);
}
