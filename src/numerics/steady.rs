//! Steady-state initializer.
//!
//! Produces a consistent initial state for a given constant forcing:
//! 1. a reduced zero-field carrier boundary-value problem on the perovskite
//!    grid (collocation, damped Newton) for the electron/hole profiles,
//! 2. assembly of a full-vector guess around those profiles,
//! 3. damped Newton on the init-mode residual (ions frozen) with the
//!    declared sparsity,
//! 4. an exact re-solve of the Poisson rows so the returned state satisfies
//!    the elliptic constraint to LU roundoff rather than Newton tolerance.
//!
//! Non-convergence of the Newton stages is reported, not raised: the caller
//! receives the best iterate and the `converged` flag.

use nalgebra::DVector;
use num_dual::{jacobian, DualDVec64, DualNum};

use crate::discretization::mesh::DeviceMesh;
use crate::error::Result;
use crate::models::Params;
use crate::numerics::banded::BandedMatrix;
use crate::numerics::newton::NewtonSolver;
use crate::numerics::SolverConfig;
use crate::physics::recombination;
use crate::physics::{Engine, Jacobian, JacobianPath, Mode};

/// Initializer output: the state plus the refinement's convergence report.
pub struct SteadyState {
    pub u: DVector<f64>,
    pub converged: bool,
    pub iterations: u32,
    pub residual_norm: f64,
}

#[inline]
fn c<T: DualNum<f64>>(v: f64) -> T {
    T::from_f64(v).expect("finite constant")
}

/// Residual of the reduced carrier BVP: pure diffusion against generation
/// and bulk recombination, Dirichlet injection on each carrier's majority
/// side, zero flux on its blocking side. Unknowns interleave `[n_j, p_j]`.
fn bvp_rhs<T>(params: &Params, mesh: &DeviceMesh, light: f64, y: &DVector<T>) -> DVector<T>
where
    T: nalgebra::Scalar + DualNum<f64> + num_traits::Zero,
{
    let psk = &mesh.perovskite;
    let n_cells = psk.cells();
    let ups = params.upsilon;
    let profile = |x: f64| {
        let depth = if params.inverted { 1.0 - x } else { x };
        ups * (-ups * depth).exp() / (1.0 - (-ups).exp())
    };

    let nn = |j: usize| y[2 * j].clone();
    let pp = |j: usize| y[2 * j + 1].clone();
    let source = |j: usize| -> T {
        c::<T>(params.gen_rate * light * profile(psk.x[j]))
            - recombination::bulk(&nn(j), &pp(j), params)
    };
    // Diffusive face flux in the +x direction.
    let flux_n = |f: usize| (nn(f) - nn(f + 1)) * c::<T>(params.kappa_n / psk.dx[f]);
    let flux_p = |f: usize| (pp(f) - pp(f + 1)) * c::<T>(params.kappa_p / psk.dx[f]);

    let mut out = DVector::from_element(2 * (n_cells + 1), T::zero());
    for j in 0..=n_cells {
        out[2 * j] = if j == 0 {
            nn(0) - c::<T>(params.k_e * params.d_e)
        } else if j == n_cells {
            flux_n(n_cells - 1) + source(j) * c::<T>(psk.right_half())
        } else {
            flux_n(j - 1) - flux_n(j) + source(j) * c::<T>(psk.volume(j))
        };
        out[2 * j + 1] = if j == n_cells {
            pp(n_cells) - c::<T>(params.k_h * params.d_h)
        } else if j == 0 {
            T::zero() - flux_p(0) + source(0) * c::<T>(psk.left_half())
        } else {
            flux_p(j - 1) - flux_p(j) + source(j) * c::<T>(psk.volume(j))
        };
    }
    out
}

/// Solve the reduced BVP; returns the node-wise electron and hole profiles.
fn carrier_bvp(
    params: &Params,
    mesh: &DeviceMesh,
    light: f64,
    cfg: &SolverConfig,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let n_nodes = mesh.perovskite.cells() + 1;
    let mut guess = DVector::zeros(2 * n_nodes);
    for j in 0..n_nodes {
        guess[2 * j] = params.k_e * params.d_e;
        guess[2 * j + 1] = params.k_h * params.d_h;
    }

    let newton = NewtonSolver {
        tolerance: cfg.newton_tol,
        max_iterations: cfg.max_newton_iters,
        logging: cfg.logging,
        ..NewtonSolver::default()
    };
    let out = newton.solve(
        |y| {
            let (res, jac) = jacobian(
                |arg: DVector<DualDVec64>| bvp_rhs(params, mesh, light, &arg),
                y.clone(),
            );
            (res, Jacobian::Dense(jac))
        },
        |y| bvp_rhs(params, mesh, light, y),
        guess,
    )?;
    if !out.converged {
        tracing::warn!(
            residual_norm = out.residual_norm,
            "carrier BVP did not reach tolerance; continuing with best iterate"
        );
    }

    let y = out.solution;
    let n_prof = (0..n_nodes).map(|j| y[2 * j]).collect();
    let p_prof = (0..n_nodes).map(|j| y[2 * j + 1]).collect();
    Ok((n_prof, p_prof))
}

/// Full-vector guess: uniform ions, linear potential between the contacts,
/// BVP carriers in the perovskite, linear blends in the transport layers.
fn assemble_guess(
    params: &Params,
    mesh: &DeviceMesh,
    engine: &Engine,
    psi: f64,
    n_prof: &[f64],
    p_prof: &[f64],
) -> DVector<f64> {
    let lay = &engine.layout;
    let span = params.w_e + 1.0 + params.w_h;
    let phi_lin = |x: f64| psi - 2.0 * psi * (x + params.w_e) / span;

    let mut u = DVector::zeros(lay.n_dof());
    let x0 = -params.w_e;
    for i in 0..lay.n_e {
        let x = mesh.etl.x[i];
        let frac = (x - x0) / params.w_e;
        u[lay.etl_phi(i)] = phi_lin(x);
        u[lay.etl_n(i)] = params.d_e + (n_prof[0] / params.k_e - params.d_e) * frac;
    }
    for j in 0..=lay.n {
        let x = mesh.perovskite.x[j];
        u[lay.pk_v(j)] = 1.0;
        u[lay.pk_phi(j)] = phi_lin(x);
        u[lay.pk_n(j)] = n_prof[j];
        u[lay.pk_p(j)] = p_prof[j];
    }
    for k in 1..=lay.n_h {
        let x = mesh.htl.x[k];
        let frac = (x - 1.0) / params.w_h;
        u[lay.htl_phi(k)] = phi_lin(x);
        u[lay.htl_p(k)] = p_prof[lay.n] / params.k_h + (params.d_h - p_prof[lay.n] / params.k_h) * frac;
    }
    u
}

/// Re-solve the (linear, given the densities) Poisson rows exactly. The
/// potential sub-block of the declared-sparsity Jacobian is tridiagonal in
/// the device-ordered potential unknowns, so one banded solve lands the
/// elliptic constraint at LU roundoff.
pub fn poisson_correct(engine: &Engine, u: &mut DVector<f64>, light: f64, psi: f64) -> Result<f64> {
    let lay = &engine.layout;
    let mut phis = Vec::with_capacity(lay.n_e + lay.n + 1 + lay.n_h);
    for i in 0..lay.n_e {
        phis.push(lay.etl_phi(i));
    }
    for j in 0..=lay.n {
        phis.push(lay.pk_phi(j));
    }
    for k in 1..=lay.n_h {
        phis.push(lay.htl_phi(k));
    }

    let (f, jac) = engine.residual_and_jacobian(JacobianPath::Sparse, u, light, psi);
    let band = match jac {
        Jacobian::Banded(b) => b,
        Jacobian::Dense(_) => unreachable!("sparse path requested"),
    };

    let m = phis.len();
    let mut tri = BandedMatrix::new(m, 1, 1);
    let mut rhs = DVector::zeros(m);
    for (a, &r) in phis.iter().enumerate() {
        rhs[a] = -f[r];
        let lo = a.saturating_sub(1);
        let hi = (a + 1).min(m - 1);
        for b in lo..=hi {
            tri.add(a, b, band.get(r, phis[b]));
        }
    }
    let delta = tri.lu_solve(&rhs)?;
    for (a, &r) in phis.iter().enumerate() {
        u[r] += delta[a];
    }
    Ok(delta.amax())
}

/// Boltzmann-equilibrated ion profile for the potential in `u`, normalized
/// so the vacancy content of the perovskite stays at the mean density.
fn equilibrated_ions(engine: &Engine, u: &DVector<f64>) -> Vec<f64> {
    let lay = &engine.layout;
    let psk = &engine.mesh.perovskite;
    let phi0 = u[lay.pk_phi(0)];
    let weights: Vec<f64> = (0..=lay.n)
        .map(|j| (-(u[lay.pk_phi(j)] - phi0)).exp())
        .collect();
    let mut content = 0.0;
    for j in 0..=lay.n {
        let vol = if j == 0 {
            psk.left_half()
        } else if j == lay.n {
            psk.right_half()
        } else {
            psk.volume(j)
        };
        content += weights[j] * vol;
    }
    weights.iter().map(|w| w / content).collect()
}

/// Produce the steady initial state for constant forcing `(light, psi)`.
///
/// An outer fixed point equilibrates the frozen ion profile against the
/// refined potential (`P` proportional to `exp(-phi)`); the
/// Scharfetter-Gummel ion flux vanishes identically on such a profile, so
/// the converged state is a steady state of the full transient system, not
/// only of the frozen-ion subsystem.
pub fn initial_state(
    params: &Params,
    mesh: &DeviceMesh,
    light: f64,
    psi: f64,
    cfg: &SolverConfig,
) -> Result<SteadyState> {
    crate::numerics::timing::reset_timing();
    let mut engine = Engine::new(params, mesh, Mode::Init);

    let (n_prof, p_prof) = carrier_bvp(params, mesh, light, cfg)?;
    let guess = assemble_guess(params, mesh, &engine, psi, &n_prof, &p_prof);

    let newton = NewtonSolver {
        tolerance: cfg.newton_tol,
        max_iterations: cfg.max_newton_iters,
        logging: cfg.logging,
        ..NewtonSolver::default()
    };

    let mut out = newton.solve(
        |v| engine.residual_and_jacobian(cfg.jacobian, v, light, psi),
        |v| engine.rhs(v, light, psi),
        guess,
    )?;

    // Ion equilibration: freeze, refine, repeat until the profile is
    // self-consistent with the potential. The Picard update is
    // under-relaxed, and the relaxation halves whenever the mismatch grows,
    // which keeps the loop contractive through strong Debye coupling.
    const ION_RELAX_MAX: usize = 100;
    let ion_tol = (cfg.newton_tol * 1e2).max(1e-12);
    let mut relaxed = false;
    let mut omega: f64 = 0.5;
    let mut prev_shift = f64::INFINITY;
    for _ in 0..ION_RELAX_MAX {
        let target = equilibrated_ions(&engine, &out.solution);
        let shift = target
            .iter()
            .zip(&engine.frozen_ions)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);
        if shift < ion_tol {
            relaxed = true;
            break;
        }
        if shift > prev_shift {
            omega = (omega * 0.5).max(0.05);
        }
        prev_shift = shift;

        // Convex blend of two unit-content profiles keeps unit content.
        let profile: Vec<f64> = engine
            .frozen_ions
            .iter()
            .zip(&target)
            .map(|(old, new)| old + omega * (new - old))
            .collect();
        let mut u = out.solution;
        for (j, &p) in profile.iter().enumerate() {
            u[engine.layout.pk_v(j)] = p;
        }
        engine.set_frozen_ions(profile);
        out = newton.solve(
            |v| engine.residual_and_jacobian(cfg.jacobian, v, light, psi),
            |v| engine.rhs(v, light, psi),
            u,
        )?;
    }
    if !relaxed {
        tracing::warn!(
            budget = ION_RELAX_MAX,
            "ion equilibration did not settle within its budget"
        );
    }
    if !out.converged {
        tracing::warn!(
            iterations = out.iterations,
            residual_norm = out.residual_norm,
            "steady-state refinement below tolerance; returning best iterate"
        );
    }

    let mut u = out.solution;
    poisson_correct(&engine, &mut u, light, psi)?;
    crate::numerics::timing::report();

    Ok(SteadyState {
        u,
        converged: out.converged && relaxed,
        iterations: out.iterations,
        residual_norm: out.residual_norm,
    })
}
