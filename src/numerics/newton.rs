//! Damped Newton iteration with Armijo backtracking.
//!
//! Shared by the steady-state initializer and the BDF corrector. The solver
//! works against two closures (full residual+Jacobian, residual-only for the
//! cheap line search) so the same loop serves the algebraic init system and
//! the shifted implicit-step systems.

use nalgebra::DVector;

use crate::error::{Error, Result};
use crate::numerics::timing::{record_jacobian, record_linear_solve};
use crate::physics::Jacobian;

#[derive(Debug, Clone)]
pub struct NewtonSolver {
    pub tolerance: f64,
    pub max_iterations: u32,
    /// Smallest accepted backtracking step.
    pub min_step: f64,
    /// Sufficient-decrease parameter.
    pub armijo: f64,
    pub logging: bool,
}

impl Default for NewtonSolver {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 60,
            min_step: 1e-3,
            armijo: 1e-4,
            logging: false,
        }
    }
}

/// Best iterate plus convergence report. A `false` flag is a recoverable
/// condition: the caller decides whether to proceed with the iterate.
pub struct NewtonOutcome {
    pub solution: DVector<f64>,
    pub converged: bool,
    pub iterations: u32,
    pub residual_norm: f64,
}

impl NewtonSolver {
    pub fn solve<FJ, FR>(
        &self,
        mut eval: FJ,
        mut residual_only: FR,
        initial_guess: DVector<f64>,
    ) -> Result<NewtonOutcome>
    where
        FJ: FnMut(&DVector<f64>) -> (DVector<f64>, Jacobian),
        FR: FnMut(&DVector<f64>) -> DVector<f64>,
    {
        let mut u = initial_guess;
        let mut norm = f64::INFINITY;

        if self.logging {
            println!("{} unknowns", u.len());
            println!("  Iter | Residual   | Alpha");
        }

        for i in 0..self.max_iterations {
            let (residual, jac) = record_jacobian(|| eval(&u));
            if !residual.iter().all(|x| x.is_finite()) {
                return Err(Error::LinearSolve(format!(
                    "residual contains non-finite values at Newton iteration {i}"
                )));
            }
            norm = residual.norm();
            if norm < self.tolerance {
                return Ok(NewtonOutcome {
                    solution: u,
                    converged: true,
                    iterations: i,
                    residual_norm: norm,
                });
            }

            let delta = record_linear_solve(|| jac.solve(&(-&residual)))?;

            // Backtracking line search on the residual norm.
            let mut alpha = 1.0;
            let mut accepted = false;
            while alpha >= self.min_step {
                let candidate = &u + &delta * alpha;
                let cand_norm = residual_only(&candidate).norm();
                if cand_norm.is_finite() && cand_norm < (1.0 - alpha * self.armijo) * norm {
                    if self.logging {
                        println!("  {i:>4} | {cand_norm:>10.3e} | {alpha:.3}");
                    }
                    u = candidate;
                    norm = cand_norm;
                    accepted = true;
                    break;
                }
                alpha *= 0.5;
            }

            if !accepted {
                tracing::warn!(
                    iteration = i,
                    residual_norm = norm,
                    "Newton line search stalled; returning best iterate"
                );
                return Ok(NewtonOutcome {
                    solution: u,
                    converged: false,
                    iterations: i,
                    residual_norm: norm,
                });
            }
        }

        tracing::warn!(
            iterations = self.max_iterations,
            residual_norm = norm,
            "Newton iteration budget exhausted; returning best iterate"
        );
        Ok(NewtonOutcome {
            solution: u,
            converged: false,
            iterations: self.max_iterations,
            residual_norm: norm,
        })
    }
}
