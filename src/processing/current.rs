//! Terminal current reconstruction from solution slices.
//!
//! The dimensionless total current is constant in space:
//! `J = F_ion + delta (F_p - F_n) + lam2 dE/dt`,
//! with the particle fluxes taken at a mid-perovskite face and the
//! displacement term reconstructed by backward difference between saved
//! states. At steady state the ionic and displacement terms vanish.

use nalgebra::DVector;

use crate::discretization::mesh::DeviceMesh;
use crate::models::{Layout, Params};
use crate::numerics::transient::Solution;
use crate::physics::residual::{sg_electron, sg_hole};

/// Current at the mid-perovskite face for state `u`; `prev` supplies the
/// previous state and the time difference for the displacement term.
pub fn terminal_current(
    params: &Params,
    mesh: &DeviceMesh,
    u: &DVector<f64>,
    prev: Option<(&DVector<f64>, f64)>,
) -> f64 {
    let lay = Layout::new(mesh);
    let f = lay.n / 2;
    let h = mesh.perovskite.dx[f];

    let field = |v: &DVector<f64>| -> f64 { -(v[lay.pk_phi(f + 1)] - v[lay.pk_phi(f)]) / h };

    let flux_n = sg_electron(
        &u[lay.pk_phi(f)],
        &u[lay.pk_phi(f + 1)],
        &u[lay.pk_n(f)],
        &u[lay.pk_n(f + 1)],
        h,
    ) * params.kappa_n;
    let flux_p = sg_hole(
        &u[lay.pk_phi(f)],
        &u[lay.pk_phi(f + 1)],
        &u[lay.pk_p(f)],
        &u[lay.pk_p(f + 1)],
        h,
    ) * params.kappa_p;
    let flux_ion = sg_hole(
        &u[lay.pk_phi(f)],
        &u[lay.pk_phi(f + 1)],
        &u[lay.pk_v(f)],
        &u[lay.pk_v(f + 1)],
        h,
    );

    let displacement = match prev {
        Some((u_prev, dt)) if dt > 0.0 => params.lam2 * (field(u) - field(u_prev)) / dt,
        _ => 0.0,
    };

    flux_ion + params.delta * (flux_p - flux_n) + displacement
}

/// Current at every saved time of a solution. The first entry carries no
/// displacement contribution (the run starts from steady state).
pub fn current_series(sol: &Solution) -> Vec<f64> {
    (0..sol.states.len())
        .map(|i| {
            let prev = if i > 0 {
                Some((&sol.states[i - 1], sol.t[i] - sol.t[i - 1]))
            } else {
                None
            };
            terminal_current(&sol.params, &sol.mesh, &sol.states[i], prev)
        })
        .collect()
}
