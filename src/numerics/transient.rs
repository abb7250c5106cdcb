//! Time integration driver.
//!
//! Resolves the open-circuit voltage when the protocol demands it, produces
//! the steady initial state, then advances the DAE across the compiled time
//! grid. In split mode each consecutive pair of split points gets its own
//! integrator call, re-seeded with the previous final state, which resets
//! the step-size history exactly at the protocol's non-smooth points.

use nalgebra::DVector;

use crate::discretization::mesh::DeviceMesh;
use crate::error::{Error, Result};
use crate::models::Params;
use crate::numerics::bdf::{self, BdfOptions, DaeSystem};
use crate::numerics::newton::NewtonSolver;
use crate::numerics::steady;
use crate::numerics::SolverConfig;
use crate::physics::{Engine, Jacobian, JacobianPath, Mode};
use crate::processing::current;
use crate::protocol::{Applied, Forcing, ImpedanceWindow};

/// Terminal entity of a run: the state at every grid time, tagged with the
/// inputs that produced it, plus the forcing samples and the impedance
/// window table for downstream analysis.
pub struct Solution {
    pub t: Vec<f64>,
    pub states: Vec<DVector<f64>>,
    pub params: Params,
    pub mesh: DeviceMesh,
    pub light: Vec<f64>,
    pub psi: Vec<f64>,
    pub impedance: Option<Vec<ImpedanceWindow>>,
}

/// Report of the open-circuit root-find.
#[derive(Debug, Clone, Copy)]
pub struct VocSearch {
    pub voltage: f64,
    pub current: f64,
    pub converged: bool,
    pub iterations: u32,
}

pub struct RunOutcome {
    pub solution: Solution,
    pub steady_converged: bool,
    pub steady_iterations: u32,
    pub steady_residual_norm: f64,
    pub voc: Option<VocSearch>,
}

/// Adapter exposing the transient engine plus forcing to the integrator.
struct EngineSystem<'a> {
    engine: &'a Engine<'a>,
    path: JacobianPath,
    masses: DVector<f64>,
    light: &'a dyn Fn(f64) -> f64,
    psi: &'a dyn Fn(f64) -> f64,
}

impl DaeSystem for EngineSystem<'_> {
    fn masses(&self) -> DVector<f64> {
        self.masses.clone()
    }
    fn residual_and_jacobian(&self, u: &DVector<f64>, t: f64) -> (DVector<f64>, Jacobian) {
        self.engine
            .residual_and_jacobian(self.path, u, (self.light)(t), (self.psi)(t))
    }
    fn residual(&self, u: &DVector<f64>, t: f64) -> DVector<f64> {
        self.engine.rhs(u, (self.light)(t), (self.psi)(t))
    }
}

/// Bracketed bisection for the voltage with zero steady net current. Each
/// trial settles the device by an init-mode steady solve and evaluates the
/// terminal current; tolerance and budget come from the configuration. A
/// failed bracket or exhausted budget is a warning, not an error.
fn solve_voc(
    params: &Params,
    mesh: &DeviceMesh,
    forcing: &Forcing,
    cfg: &SolverConfig,
) -> Result<VocSearch> {
    let light0 = forcing.light_at(0.0);
    let mut evals = 0u32;
    let mut current_at = |v: f64| -> Result<f64> {
        evals += 1;
        let psi = forcing.psi_of_voltage(v);
        let ss = steady::initial_state(params, mesh, light0, psi, cfg)?;
        Ok(current::terminal_current(params, mesh, &ss.u, None))
    };

    let mut lo = 0.0;
    let mut hi = params.vbi + 10.0 * params.vt;
    let mut f_lo = current_at(lo)?;
    if f_lo.abs() < cfg.voc_tol {
        return Ok(VocSearch {
            voltage: lo,
            current: f_lo,
            converged: true,
            iterations: evals,
        });
    }
    let mut f_hi = current_at(hi)?;
    let mut widened = 0;
    while f_lo.signum() == f_hi.signum() && widened < 5 {
        hi += 8.0 * params.vt;
        f_hi = current_at(hi)?;
        widened += 1;
    }
    if f_lo.signum() == f_hi.signum() {
        let (voltage, current) = if f_lo.abs() <= f_hi.abs() {
            (lo, f_lo)
        } else {
            (hi, f_hi)
        };
        tracing::warn!(
            voltage,
            current,
            "open-circuit search found no sign change; proceeding with best trial"
        );
        return Ok(VocSearch {
            voltage,
            current,
            converged: false,
            iterations: evals,
        });
    }

    let mut best = (lo, f_lo);
    for _ in 0..cfg.voc_max_iters {
        let mid = 0.5 * (lo + hi);
        let f_mid = current_at(mid)?;
        if f_mid.abs() < best.1.abs() {
            best = (mid, f_mid);
        }
        if f_mid.abs() < cfg.voc_tol {
            return Ok(VocSearch {
                voltage: mid,
                current: f_mid,
                converged: true,
                iterations: evals,
            });
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    tracing::warn!(
        voltage = best.0,
        current = best.1,
        budget = cfg.voc_max_iters,
        "open-circuit search exhausted its budget; proceeding with best iterate"
    );
    Ok(VocSearch {
        voltage: best.0,
        current: best.1,
        converged: false,
        iterations: evals,
    })
}

/// Run a compiled protocol: steady initialization, optional open-circuit
/// resolution, then split-interval (or single-call) stiff integration over
/// the whole time grid.
pub fn run_protocol(
    params: &Params,
    mesh: &DeviceMesh,
    forcing: &Forcing,
    cfg: &SolverConfig,
) -> Result<RunOutcome> {
    let voc = if forcing.find_voc {
        Some(solve_voc(params, mesh, forcing, cfg)?)
    } else {
        None
    };
    let v_oc = voc.as_ref().map(|v| v.voltage);

    let light_fn = |t: f64| forcing.light_at(t);
    let psi_fn = |t: f64| -> f64 {
        match forcing.psi_at(t, v_oc) {
            Applied::Imposed(p) => p,
            Applied::SolveForVoc => {
                unreachable!("open-circuit voltage is resolved before integration")
            }
        }
    };

    let grid = &forcing.time_grid;
    let t0 = grid[0];
    let steady_state = steady::initial_state(params, mesh, light_fn(t0), psi_fn(t0), cfg)?;

    let engine = Engine::new(params, mesh, Mode::Transient);
    let system = EngineSystem {
        engine: &engine,
        path: cfg.jacobian,
        masses: engine.masses(),
        light: &light_fn,
        psi: &psi_fn,
    };
    let opts = BdfOptions {
        rtol: cfg.rtol,
        atol: cfg.atol,
        newton: NewtonSolver {
            tolerance: cfg.newton_tol,
            max_iterations: cfg.max_newton_iters.min(15),
            logging: false,
            ..NewtonSolver::default()
        },
        ..BdfOptions::default()
    };

    let spans: Vec<(f64, f64)> = if cfg.split_solve {
        forcing.splits.windows(2).map(|w| (w[0], w[1])).collect()
    } else {
        vec![(t0, forcing.t_end())]
    };

    let tol = forcing.t_end().max(1.0) * 1e-12;
    let mut t_all = vec![t0];
    let mut states = vec![steady_state.u.clone()];
    let mut u = steady_state.u.clone();

    for (a, b) in spans {
        if b - a <= tol {
            continue;
        }
        let t_out: Vec<f64> = grid
            .iter()
            .copied()
            .filter(|&t| t >= a - tol && t <= b + tol)
            .collect();
        if t_out.len() < 2 {
            continue;
        }
        let span_states = match bdf::integrate(&system, &t_out, u.clone(), &opts) {
            Ok(s) => s,
            Err(Error::Integration { time, reason, .. }) => {
                return Err(Error::Integration {
                    time,
                    light: light_fn(time),
                    psi: psi_fn(time),
                    reason,
                });
            }
            Err(e) => return Err(e),
        };
        for (i, s) in span_states.into_iter().enumerate() {
            if i == 0 {
                continue; // seam state already recorded
            }
            t_all.push(t_out[i]);
            states.push(s);
        }
        u = states.last().expect("at least the initial state").clone();
    }

    let light: Vec<f64> = t_all.iter().map(|&t| light_fn(t)).collect();
    let psi: Vec<f64> = t_all.iter().map(|&t| psi_fn(t)).collect();

    Ok(RunOutcome {
        solution: Solution {
            t: t_all,
            states,
            params: params.clone(),
            mesh: mesh.clone(),
            light,
            psi,
            impedance: forcing.impedance.clone(),
        },
        steady_converged: steady_state.converged,
        steady_iterations: steady_state.iterations,
        steady_residual_norm: steady_state.residual_norm,
        voc,
    })
}
