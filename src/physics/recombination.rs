//! Bulk and interfacial recombination rates.
//!
//! Everything is generic over the AD scalar so the same expressions feed the
//! residual, the dense AD Jacobian and the row-local sparse Jacobian.

use crate::models::Params;
use num_dual::DualNum;

#[inline]
fn c<T: DualNum<f64>>(v: f64) -> T {
    T::from_f64(v).expect("finite parameter")
}

/// Bulk recombination in the perovskite: Shockley-Read-Hall plus bimolecular
/// plus Auger, all driven by the excess product `n p - ni^2`.
pub fn bulk<T>(n: &T, p: &T, pr: &Params) -> T
where
    T: DualNum<f64> + num_traits::Zero,
{
    let excess = n.clone() * p.clone() - c::<T>(pr.ni2);
    let mut rate = T::zero();

    if pr.tau_n > 0.0 || pr.tau_p > 0.0 {
        let denom = (n.clone() + c::<T>(pr.n1)) * c::<T>(pr.tau_p)
            + (p.clone() + c::<T>(pr.p1)) * c::<T>(pr.tau_n);
        rate = rate + excess.clone() / denom;
    }
    if pr.beta > 0.0 {
        rate = rate + excess.clone() * c::<T>(pr.beta);
    }
    if pr.auger_n > 0.0 || pr.auger_p > 0.0 {
        let weight = n.clone() * c::<T>(pr.auger_n) + p.clone() * c::<T>(pr.auger_p);
        rate = rate + weight * excess;
    }
    rate
}

/// SRH-style interfacial rate from one-sided densities and the two
/// recombination velocities. `ni2_if` is the equilibrium product in the
/// mixed units of the two sides; `n1`/`p1` are the trap densities in those
/// same units. Either velocity at zero disables the channel.
fn interfacial<T>(n: &T, p: &T, ni2_if: f64, n1: f64, p1: f64, v_n: f64, v_p: f64) -> T
where
    T: DualNum<f64>,
{
    let excess = n.clone() * p.clone() - c::<T>(ni2_if);
    let denom =
        (n.clone() + c::<T>(n1)) * c::<T>(1.0 / v_p) + (p.clone() + c::<T>(p1)) * c::<T>(1.0 / v_n);
    excess / denom
}

/// ETL/perovskite interface: ETL-side electrons against perovskite holes.
pub fn interface_etl<T>(n_etl: &T, p: &T, pr: &Params) -> T
where
    T: DualNum<f64> + num_traits::Zero,
{
    if pr.v_n_e == 0.0 || pr.v_p_e == 0.0 {
        return T::zero();
    }
    interfacial(
        n_etl,
        p,
        pr.ni2_etl(),
        pr.n1 / pr.k_e,
        pr.p1,
        pr.v_n_e,
        pr.v_p_e,
    )
}

/// Perovskite/HTL interface: perovskite electrons against HTL-side holes.
pub fn interface_htl<T>(n: &T, p_htl: &T, pr: &Params) -> T
where
    T: DualNum<f64> + num_traits::Zero,
{
    if pr.v_n_h == 0.0 || pr.v_p_h == 0.0 {
        return T::zero();
    }
    interfacial(
        n,
        p_htl,
        pr.ni2_htl(),
        pr.n1,
        pr.p1 / pr.k_h,
        pr.v_n_h,
        pr.v_p_h,
    )
}
