//! Semi-discrete residual of the three-layer drift-diffusion system.
//!
//! Finite volumes on the graded mesh with Scharfetter-Gummel fluxes. The
//! per-row kernel [`Engine::rhs_row`] is generic over the AD scalar so both
//! Jacobian paths evaluate the same expressions: the dense path
//! differentiates the assembled vector, the sparse path seeds the row's
//! declared stencil locally.
//!
//! Sign conventions (dimensionless):
//!   ions        dP/dt = -d/dx F_P,          F_P = -(P_x + P phi_x)
//!   electrons   dn/dt = -d/dx F_n + G - R,  F_n = -kappa_n (n_x - n phi_x)
//!   holes       dp/dt = -d/dx F_p + G - R,  F_p = -kappa_p (p_x + p phi_x)
//!   Poisson     lam^2 phi_xx + rho = 0 per layer, rho in ion-density units.
//!
//! Contact rows impose `phi = +/- psi` and the majority-carrier doping
//! density; they are algebraic, like the Poisson rows. The two interface
//! nodes belong to the perovskite block and carry union control volumes;
//! transport-layer values there follow from `n_E = n / k_e`, `p_H = p / k_h`
//! and the shared potential.

use nalgebra::DVector;
use num_dual::DualNum;

use super::{Engine, Mode};
use crate::models::RowKind;
use crate::physics::recombination;

#[inline]
fn c<T: DualNum<f64>>(v: f64) -> T {
    T::from_f64(v).expect("finite constant")
}

/// Bernoulli function `x / (exp(x) - 1)` with a series fallback near zero so
/// the AD derivative stays smooth through the removable singularity.
pub fn bernoulli<T: DualNum<f64>>(x: T) -> T {
    if x.re().abs() < 1e-5 {
        let half = c::<T>(0.5);
        let twelfth = c::<T>(1.0 / 12.0);
        c::<T>(1.0) - x.clone() * half + x.clone() * x * twelfth
    } else {
        x.clone() / (x.exp() - c::<T>(1.0))
    }
}

/// Scharfetter-Gummel electron particle flux in the +x direction across a
/// face of width `h` (transport coefficient applied by the caller).
#[inline]
pub fn sg_electron<T: DualNum<f64>>(phi_l: &T, phi_r: &T, n_l: &T, n_r: &T, h: f64) -> T {
    let dphi = phi_r.clone() - phi_l.clone();
    (bernoulli(-dphi.clone()) * n_l.clone() - bernoulli(dphi) * n_r.clone()) * c::<T>(1.0 / h)
}

/// Scharfetter-Gummel flux for positively charged carriers (holes, ions).
#[inline]
pub fn sg_hole<T: DualNum<f64>>(phi_l: &T, phi_r: &T, p_l: &T, p_r: &T, h: f64) -> T {
    let dphi = phi_r.clone() - phi_l.clone();
    (bernoulli(dphi.clone()) * p_l.clone() - bernoulli(-dphi) * p_r.clone()) * c::<T>(1.0 / h)
}

impl<'a> Engine<'a> {
    /// Beer-Lambert generation profile, normalized to unit integral over the
    /// perovskite, evaluated at scaled position `x`. The illumination
    /// direction flips the coordinate for inverted architectures.
    pub fn generation_profile(&self, x: f64) -> f64 {
        let ups = self.params.upsilon;
        let depth = if self.params.inverted { 1.0 - x } else { x };
        ups * (-ups * depth).exp() / (1.0 - (-ups).exp())
    }

    /// One component of `F(u)`. `light` and `psi` are the forcing values at
    /// the evaluation time; `psi` is the scaled potential drop
    /// `(Vbi - V) / (2 Vt)` imposed at the contacts.
    pub fn rhs_row<T>(&self, u: &[T], r: usize, light: f64, psi: f64) -> T
    where
        T: DualNum<f64> + num_traits::Zero,
    {
        let pr = self.params;
        let lay = &self.layout;
        let etl = &self.mesh.etl;
        let psk = &self.mesh.perovskite;
        let htl = &self.mesh.htl;
        let ne = lay.n_e;
        let n = lay.n;
        let nh = lay.n_h;

        // Accessors spanning the interfaces by continuity.
        let phi_e = |i: usize| -> T {
            if i < ne {
                u[lay.etl_phi(i)].clone()
            } else {
                u[lay.pk_phi(0)].clone()
            }
        };
        let n_e = |i: usize| -> T {
            if i < ne {
                u[lay.etl_n(i)].clone()
            } else {
                u[lay.pk_n(0)].clone() * c::<T>(1.0 / pr.k_e)
            }
        };
        let phi_h = |k: usize| -> T {
            if k == 0 {
                u[lay.pk_phi(n)].clone()
            } else {
                u[lay.htl_phi(k)].clone()
            }
        };
        let p_h = |k: usize| -> T {
            if k == 0 {
                u[lay.pk_p(n)].clone() * c::<T>(1.0 / pr.k_h)
            } else {
                u[lay.htl_p(k)].clone()
            }
        };

        // Layer fluxes by face index (face f sits between nodes f and f+1).
        let flux_ion = |f: usize| -> T {
            sg_hole(
                &u[lay.pk_phi(f)],
                &u[lay.pk_phi(f + 1)],
                &u[lay.pk_v(f)],
                &u[lay.pk_v(f + 1)],
                psk.dx[f],
            )
        };
        let flux_n = |f: usize| -> T {
            sg_electron(
                &u[lay.pk_phi(f)],
                &u[lay.pk_phi(f + 1)],
                &u[lay.pk_n(f)],
                &u[lay.pk_n(f + 1)],
                psk.dx[f],
            ) * c::<T>(pr.kappa_n)
        };
        let flux_p = |f: usize| -> T {
            sg_hole(
                &u[lay.pk_phi(f)],
                &u[lay.pk_phi(f + 1)],
                &u[lay.pk_p(f)],
                &u[lay.pk_p(f + 1)],
                psk.dx[f],
            ) * c::<T>(pr.kappa_p)
        };
        let flux_ne = |f: usize| -> T {
            sg_electron(&phi_e(f), &phi_e(f + 1), &n_e(f), &n_e(f + 1), etl.dx[f])
                * c::<T>(pr.kappa_e)
        };
        let flux_ph = |f: usize| -> T {
            sg_hole(&phi_h(f), &phi_h(f + 1), &p_h(f), &p_h(f + 1), htl.dx[f])
                * c::<T>(pr.kappa_h)
        };

        // Net bulk source for carriers at perovskite node j.
        let source = |j: usize| -> T {
            let g = pr.gen_rate * light * self.generation_profile(psk.x[j]);
            c::<T>(g) - recombination::bulk(&u[lay.pk_n(j)], &u[lay.pk_p(j)], pr)
        };

        match lay.locate(r) {
            // Contacts.
            RowKind::EtlPhi(0) => u[lay.etl_phi(0)].clone() - c::<T>(psi),
            RowKind::EtlN(0) => u[lay.etl_n(0)].clone() - c::<T>(pr.d_e),
            RowKind::HtlPhi(k) if k == nh => u[lay.htl_phi(nh)].clone() + c::<T>(psi),
            RowKind::HtlP(k) if k == nh => u[lay.htl_p(nh)].clone() - c::<T>(pr.d_h),

            // Poisson, ETL interior.
            RowKind::EtlPhi(i) => {
                let (hl, hr) = (etl.dx[i - 1], etl.dx[i]);
                let lap = (phi_e(i + 1) - phi_e(i)) * c::<T>(pr.lam_e2 / hr)
                    - (phi_e(i) - phi_e(i - 1)) * c::<T>(pr.lam_e2 / hl);
                let rho = (c::<T>(pr.d_e) - n_e(i)) * c::<T>(pr.delta);
                lap + rho * c::<T>(etl.volume(i))
            }

            // Electron transport, ETL interior (the accessor closes over the
            // interface for i = n_e - 1).
            RowKind::EtlN(i) => flux_ne(i - 1) - flux_ne(i),

            // Ion vacancies: frozen in init mode, blocked at both interfaces
            // in transient mode.
            RowKind::PskV(j) => match self.mode {
                Mode::Init => u[lay.pk_v(j)].clone() - c::<T>(self.frozen_ions[j]),
                Mode::Transient => {
                    if j == 0 {
                        T::zero() - flux_ion(0)
                    } else if j == n {
                        flux_ion(n - 1)
                    } else {
                        flux_ion(j - 1) - flux_ion(j)
                    }
                }
            },

            // Poisson, perovskite: interfaces carry union half-cells with the
            // displacement jump, interior rows the plain graded Laplacian.
            RowKind::PskPhi(j) => {
                let rho_pk = |j: usize| -> T {
                    u[lay.pk_v(j)].clone() - c::<T>(1.0)
                        + (u[lay.pk_p(j)].clone() - u[lay.pk_n(j)].clone()) * c::<T>(pr.delta)
                };
                if j == 0 {
                    let d_right = (u[lay.pk_phi(1)].clone() - u[lay.pk_phi(0)].clone())
                        * c::<T>(pr.lam2 / psk.dx[0]);
                    let d_left = (u[lay.pk_phi(0)].clone() - phi_e(ne - 1))
                        * c::<T>(pr.lam_e2 / etl.dx[ne - 1]);
                    let rho_e = (c::<T>(pr.d_e) - n_e(ne)) * c::<T>(pr.delta * etl.right_half());
                    d_right - d_left + rho_pk(0) * c::<T>(psk.left_half()) + rho_e
                } else if j == n {
                    let d_right = (phi_h(1) - u[lay.pk_phi(n)].clone())
                        * c::<T>(pr.lam_h2 / htl.dx[0]);
                    let d_left = (u[lay.pk_phi(n)].clone() - u[lay.pk_phi(n - 1)].clone())
                        * c::<T>(pr.lam2 / psk.dx[n - 1]);
                    let rho_h = (p_h(0) - c::<T>(pr.d_h)) * c::<T>(pr.delta * htl.left_half());
                    d_right - d_left + rho_pk(n) * c::<T>(psk.right_half()) + rho_h
                } else {
                    let (hl, hr) = (psk.dx[j - 1], psk.dx[j]);
                    let lap = (u[lay.pk_phi(j + 1)].clone() - u[lay.pk_phi(j)].clone())
                        * c::<T>(pr.lam2 / hr)
                        - (u[lay.pk_phi(j)].clone() - u[lay.pk_phi(j - 1)].clone())
                            * c::<T>(pr.lam2 / hl);
                    lap + rho_pk(j) * c::<T>(psk.volume(j))
                }
            }

            // Electrons in the perovskite. The left interface row couples the
            // ETL flux, the half-cell source and the interfacial sink; the
            // right interface blocks electrons apart from the interfacial
            // recombination with HTL holes.
            RowKind::PskN(j) => {
                if j == 0 {
                    let r_if = recombination::interface_etl(&n_e(ne), &u[lay.pk_p(0)], pr);
                    flux_ne(ne - 1) - flux_n(0) + source(0) * c::<T>(psk.left_half()) - r_if
                } else if j == n {
                    let r_if = recombination::interface_htl(&u[lay.pk_n(n)], &p_h(0), pr);
                    flux_n(n - 1) + source(n) * c::<T>(psk.right_half()) - r_if
                } else {
                    flux_n(j - 1) - flux_n(j) + source(j) * c::<T>(psk.volume(j))
                }
            }

            // Holes in the perovskite, mirrored.
            RowKind::PskP(j) => {
                if j == 0 {
                    let r_if = recombination::interface_etl(&n_e(ne), &u[lay.pk_p(0)], pr);
                    T::zero() - flux_p(0) + source(0) * c::<T>(psk.left_half()) - r_if
                } else if j == n {
                    let r_if = recombination::interface_htl(&u[lay.pk_n(n)], &p_h(0), pr);
                    flux_p(n - 1) - flux_ph(0) + source(n) * c::<T>(psk.right_half()) - r_if
                } else {
                    flux_p(j - 1) - flux_p(j) + source(j) * c::<T>(psk.volume(j))
                }
            }

            // Poisson, HTL interior.
            RowKind::HtlPhi(k) => {
                let (hl, hr) = (htl.dx[k - 1], htl.dx[k]);
                let lap = (phi_h(k + 1) - phi_h(k)) * c::<T>(pr.lam_h2 / hr)
                    - (phi_h(k) - phi_h(k - 1)) * c::<T>(pr.lam_h2 / hl);
                let rho = (p_h(k) - c::<T>(pr.d_h)) * c::<T>(pr.delta);
                lap + rho * c::<T>(htl.volume(k))
            }

            // Hole transport, HTL interior.
            RowKind::HtlP(k) => flux_ph(k - 1) - flux_ph(k),
        }
    }

    /// Assemble `F(u)` for the full state vector.
    pub fn rhs_vec<T>(&self, u: &DVector<T>, light: f64, psi: f64) -> DVector<T>
    where
        T: nalgebra::Scalar + DualNum<f64> + num_traits::Zero,
    {
        let slice = u.as_slice();
        DVector::from_iterator(
            self.n_dof(),
            (0..self.n_dof()).map(|r| self.rhs_row(slice, r, light, psi)),
        )
    }

    /// Plain `f64` residual evaluation (used by line searches and output).
    pub fn rhs(&self, u: &DVector<f64>, light: f64, psi: f64) -> DVector<f64> {
        self.rhs_vec(u, light, psi)
    }

    /// Diagonal mass of the DAE, volume-weighted. Zero everywhere in init
    /// mode; in transient mode the interface carrier rows integrate over
    /// their union cells, with the transport-layer halves weighted by the
    /// interface density ratios.
    pub fn masses(&self) -> DVector<f64> {
        let lay = &self.layout;
        let mut m = DVector::zeros(self.n_dof());
        if self.mode == Mode::Init {
            return m;
        }
        let etl = &self.mesh.etl;
        let psk = &self.mesh.perovskite;
        let htl = &self.mesh.htl;
        let n = lay.n;

        for i in 1..lay.n_e {
            m[lay.etl_n(i)] = etl.volume(i);
        }
        for j in 0..=n {
            let vol = if j == 0 {
                psk.left_half()
            } else if j == n {
                psk.right_half()
            } else {
                psk.volume(j)
            };
            m[lay.pk_v(j)] = vol;
            m[lay.pk_n(j)] = vol;
            m[lay.pk_p(j)] = vol;
        }
        // Union cells across the interfaces.
        m[lay.pk_n(0)] += etl.right_half() / self.params.k_e;
        m[lay.pk_p(n)] += htl.left_half() / self.params.k_h;
        for k in 1..lay.n_h {
            m[lay.htl_p(k)] = htl.volume(k);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::mesh::DeviceMesh;
    use crate::models::perovskite;
    use approx::assert_relative_eq;

    #[test]
    fn bernoulli_matches_series_and_limits() {
        assert_relative_eq!(bernoulli(0.0_f64), 1.0);
        assert_relative_eq!(bernoulli(1e-9_f64), 1.0 - 0.5e-9, epsilon = 1e-15);
        assert_relative_eq!(
            bernoulli(2.0_f64),
            2.0 / (2.0_f64.exp() - 1.0),
            epsilon = 1e-14
        );
        // Continuity across the series switch.
        let a = bernoulli(0.9999e-5_f64);
        let b = bernoulli(1.0001e-5_f64);
        assert_relative_eq!(a, b, epsilon = 1e-10);
    }

    #[test]
    fn sg_fluxes_reduce_to_diffusion_at_zero_field() {
        let f = sg_electron(&0.3_f64, &0.3, &2.0, &1.0, 0.1);
        assert_relative_eq!(f, (2.0 - 1.0) / 0.1, epsilon = 1e-12);
        let f = sg_hole(&0.3_f64, &0.3, &2.0, &1.0, 0.1);
        assert_relative_eq!(f, (2.0 - 1.0) / 0.1, epsilon = 1e-12);
    }

    #[test]
    fn sg_fluxes_respect_drift_signs() {
        // Potential rising to the right: electrons drift right, holes left.
        let fe = sg_electron(&0.0_f64, &5.0, &1.0, &1.0, 0.1);
        assert!(fe > 0.0);
        let fh = sg_hole(&0.0_f64, &5.0, &1.0, &1.0, 0.1);
        assert!(fh < 0.0);
    }

    #[test]
    fn generation_profile_integrates_to_one() {
        let params = perovskite::soft_cell();
        let mesh = DeviceMesh::build(&params, 6, 200, 6, 0.5).unwrap();
        let engine = Engine::new(&params, &mesh, Mode::Transient);
        let psk = &mesh.perovskite;
        let mut total = 0.0;
        for f in 0..psk.cells() {
            let mid = 0.5 * (psk.x[f] + psk.x[f + 1]);
            total += engine.generation_profile(mid) * psk.dx[f];
        }
        assert_relative_eq!(total, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn flat_dark_equilibrium_state_has_small_carrier_residuals() {
        // psi = 0 and uniform densities at the contact values: transport
        // rows vanish identically except for recombination of the tiny
        // minority products, which the ni2 terms nearly cancel.
        let mut params = perovskite::soft_cell();
        params.gen_rate = 0.0;
        params.beta = 0.0;
        params.auger_n = 0.0;
        params.auger_p = 0.0;
        params.tau_n = 0.0;
        params.tau_p = 0.0;
        params.v_n_e = 0.0;
        params.v_p_h = 0.0;
        let mesh = DeviceMesh::build(&params, 6, 10, 6, 1.0).unwrap();
        let engine = Engine::new(&params, &mesh, Mode::Transient);
        let lay = &engine.layout;

        let mut u = nalgebra::DVector::zeros(engine.n_dof());
        for i in 0..lay.n_e {
            u[lay.etl_n(i)] = params.d_e;
        }
        for j in 0..=lay.n {
            u[lay.pk_v(j)] = 1.0;
            u[lay.pk_n(j)] = params.d_e * params.k_e;
            u[lay.pk_p(j)] = params.d_h * params.k_h;
        }
        for k in 1..=lay.n_h {
            u[lay.htl_p(k)] = params.d_h;
        }

        let f = engine.rhs(&u, 0.0, 0.0);
        for j in 1..lay.n {
            assert_relative_eq!(f[lay.pk_n(j)], 0.0, epsilon = 1e-10);
            assert_relative_eq!(f[lay.pk_p(j)], 0.0, epsilon = 1e-10);
            assert_relative_eq!(f[lay.pk_v(j)], 0.0, epsilon = 1e-12);
        }
        for i in 1..lay.n_e {
            assert_relative_eq!(f[lay.etl_n(i)], 0.0, epsilon = 1e-10);
        }
    }
}
