//! Two interchangeable Jacobian evaluations behind one interface.
//!
//! The dense path differentiates the assembled residual with a full dual
//! vector (`num_dual::jacobian`), is always available, and serves as the
//! reference. The sparse path seeds dual numbers only over each row's
//! declared stencil and scatters into a banded matrix, which is what the
//! Newton and BDF solves factorize. Both paths evaluate the same generic
//! row kernel, so they agree to machine precision.

use nalgebra::{DMatrix, DVector, Dyn, U1};
use num_dual::{jacobian, Derivative, DualDVec64};

use super::Engine;
use crate::error::{Error, Result};
use crate::numerics::banded::BandedMatrix;

/// Which Jacobian evaluation the solvers use; a configuration choice, not a
/// runtime probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianPath {
    Dense,
    Sparse,
}

/// Jacobian of `F` with respect to the state, in the representation the
/// chosen path produced.
pub enum Jacobian {
    Dense(DMatrix<f64>),
    Banded(BandedMatrix),
}

impl Jacobian {
    /// Turn `dF/du` into the Newton matrix of an implicit step,
    /// `scale * diag(m) - dF/du`, in place.
    pub fn into_newton_matrix(self, masses: &DVector<f64>, scale: f64) -> Jacobian {
        match self {
            Jacobian::Dense(mut a) => {
                a.neg_mut();
                for i in 0..masses.len() {
                    a[(i, i)] += scale * masses[i];
                }
                Jacobian::Dense(a)
            }
            Jacobian::Banded(mut b) => {
                b.scale(-1.0);
                for i in 0..masses.len() {
                    b.add(i, i, scale * masses[i]);
                }
                Jacobian::Banded(b)
            }
        }
    }

    /// Negate in place (Newton on the algebraic system solves `-J dx = F`,
    /// i.e. `J dx = -F`; keeping the residual untouched is cheaper).
    pub fn solve(self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        match self {
            Jacobian::Dense(a) => a
                .lu()
                .solve(rhs)
                .ok_or_else(|| Error::LinearSolve("dense LU is singular".into())),
            Jacobian::Banded(b) => b.lu_solve(rhs),
        }
    }

    /// Densify for comparisons in tests.
    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            Jacobian::Dense(a) => a.clone(),
            Jacobian::Banded(b) => b.to_dense(),
        }
    }
}

impl<'a> Engine<'a> {
    /// Evaluate the residual `F(u)` and its Jacobian along the chosen path.
    pub fn residual_and_jacobian(
        &self,
        path: JacobianPath,
        u: &DVector<f64>,
        light: f64,
        psi: f64,
    ) -> (DVector<f64>, Jacobian) {
        match path {
            JacobianPath::Dense => {
                let (res, jac) = jacobian(
                    |arg: DVector<DualDVec64>| self.rhs_vec(&arg, light, psi),
                    u.clone(),
                );
                (res, Jacobian::Dense(jac))
            }
            JacobianPath::Sparse => {
                let (res, banded) = self.residual_and_banded(u, light, psi);
                (res, Jacobian::Banded(banded))
            }
        }
    }

    /// Row-local assembly into the declared band: for each row, seed dual
    /// numbers over the stencil, evaluate the row kernel once, and scatter
    /// the gradient.
    fn residual_and_banded(
        &self,
        u: &DVector<f64>,
        light: f64,
        psi: f64,
    ) -> (DVector<f64>, BandedMatrix) {
        let n = self.n_dof();
        let (kl, ku) = self.bandwidths;
        let mut residual = DVector::zeros(n);
        let mut matrix = BandedMatrix::new(n, kl, ku);

        let mut u_dual: Vec<DualDVec64> = u.iter().map(|&x| DualDVec64::from_re(x)).collect();

        for r in 0..n {
            let stencil = &self.stencils[r];
            let m = stencil.len();
            for (slot, &col) in stencil.iter().enumerate() {
                let eps = Derivative::derivative_generic(Dyn(m), U1, slot);
                u_dual[col] = DualDVec64::new(u[col], eps);
            }

            let value = self.rhs_row(&u_dual, r, light, psi);
            residual[r] = value.re;
            let grad = value.eps.unwrap_generic(Dyn(m), U1);
            for (slot, &col) in stencil.iter().enumerate() {
                matrix.add(r, col, grad[(slot, 0)]);
            }

            for &col in stencil {
                u_dual[col] = DualDVec64::from_re(u[col]);
            }
        }

        (residual, matrix)
    }
}
