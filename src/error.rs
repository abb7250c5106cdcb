use thiserror::Error;

/// Crate-wide error type.
///
/// Convergence shortfalls of the Newton and open-circuit searches are not
/// errors: those return their best iterate together with a `converged` flag
/// (see [`crate::numerics::newton::NewtonOutcome`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed protocol grammar, non-positive widths/subdivisions, or an
    /// otherwise inconsistent input. Raised before any solve begins.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The (banded or dense) linear solve hit a zero pivot or produced
    /// non-finite values.
    #[error("linear solve failed: {0}")]
    LinearSolve(String),

    /// The stiff integrator could not complete a span: repeated step
    /// rejections drove the step size below the floor. The failing time and
    /// forcing values identify where a split point or looser tolerance is
    /// needed.
    #[error(
        "integration failed at t = {time:.6e} (light = {light:.4}, psi = {psi:.4}): {reason}"
    )]
    Integration {
        time: f64,
        light: f64,
        psi: f64,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
