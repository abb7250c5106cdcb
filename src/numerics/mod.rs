pub mod banded;
pub mod bdf;
pub mod newton;
pub mod steady;
pub mod timing;
pub mod transient;

use crate::error::{Error, Result};
use crate::physics::JacobianPath;

/// Explicit, immutable per-run solver configuration. Passed into each
/// component; nothing reads ambient state.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Integrator relative tolerance.
    pub rtol: f64,
    /// Integrator absolute tolerance.
    pub atol: f64,
    /// Subdivisions per layer and the mesh stretching factor.
    pub n_etl: usize,
    pub n_psk: usize,
    pub n_htl: usize,
    pub stretch: f64,
    /// Newton iteration budget (steady-state refinement and BDF corrector).
    pub max_newton_iters: u32,
    /// Newton residual tolerance for the steady-state refinement.
    pub newton_tol: f64,
    /// One integrator call per consecutive split pair instead of a single
    /// continuous solve.
    pub split_solve: bool,
    /// Which Jacobian evaluation the solvers use.
    pub jacobian: JacobianPath,
    /// Time-grid resolution of non-impedance protocol segments.
    pub points_per_segment: usize,
    /// Minimum time-grid points per period of an impedance sine.
    pub points_per_period: usize,
    /// Settling span before each impedance measurement window, in periods.
    pub settle_periods: f64,
    /// Open-circuit search: net-current tolerance and iteration budget.
    pub voc_tol: f64,
    pub voc_max_iters: u32,
    /// Console iteration tables from the Newton solvers.
    pub logging: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-10,
            n_etl: 30,
            n_psk: 100,
            n_htl: 30,
            stretch: 5.0,
            max_newton_iters: 60,
            newton_tol: 1e-10,
            split_solve: true,
            jacobian: JacobianPath::Sparse,
            points_per_segment: 100,
            points_per_period: 32,
            settle_periods: 2.0,
            voc_tol: 1e-8,
            voc_max_iters: 60,
            logging: false,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rtol > 0.0) || !(self.atol > 0.0) {
            return Err(Error::Config(format!(
                "tolerances must be positive (rtol = {}, atol = {})",
                self.rtol, self.atol
            )));
        }
        if self.n_etl < 2 || self.n_psk < 2 || self.n_htl < 2 {
            return Err(Error::Config(format!(
                "each layer needs at least 2 subdivisions (got {}, {}, {})",
                self.n_etl, self.n_psk, self.n_htl
            )));
        }
        if self.points_per_segment < 2 {
            return Err(Error::Config(
                "points_per_segment must be at least 2".into(),
            ));
        }
        if self.points_per_period < 4 {
            return Err(Error::Config("points_per_period must be at least 4".into()));
        }
        if self.max_newton_iters == 0 || self.voc_max_iters == 0 {
            return Err(Error::Config("iteration budgets must be positive".into()));
        }
        if !(self.voc_tol > 0.0) {
            return Err(Error::Config(format!(
                "voc_tol must be positive (got {})",
                self.voc_tol
            )));
        }
        Ok(())
    }
}
