use crate::error::{Error, Result};

/// Immutable record of the dimensionless device parameters.
///
/// Space is scaled to the perovskite width, time to the ion diffusion time
/// `L^2 / D_ion`, potential to the thermal voltage, ion density to the mean
/// vacancy density `N0` and carrier density to a reference carrier density
/// `n0`. All derived groups are expected from the external parameter loader;
/// [`reference_cell`] and [`soft_cell`] show the construction.
#[derive(Debug, Clone)]
pub struct Params {
    /// Transport layer widths relative to the perovskite width.
    pub w_e: f64,
    pub w_h: f64,

    /// Squared scaled Debye lengths per layer (permittivity ratios folded in).
    pub lam2: f64,
    pub lam_e2: f64,
    pub lam_h2: f64,

    /// Carrier-to-ion density scale ratio `n0 / N0`.
    pub delta: f64,

    /// Contact doping densities in carrier units.
    pub d_e: f64,
    pub d_h: f64,

    /// Interface density ratios (perovskite side over transport-layer side)
    /// from the band offsets and densities of states.
    pub k_e: f64,
    pub k_h: f64,

    /// Scaled intrinsic carrier product in the perovskite.
    pub ni2: f64,

    /// Carrier diffusion coefficients over the ion diffusion coefficient.
    pub kappa_n: f64,
    pub kappa_p: f64,
    pub kappa_e: f64,
    pub kappa_h: f64,

    /// Photogeneration prefactor in ion-time units.
    pub gen_rate: f64,

    /// Dimensionless absorption coefficient of the Beer-Lambert profile.
    pub upsilon: f64,
    /// Illumination through the HTL instead of the ETL.
    pub inverted: bool,

    /// Bulk SRH lifetimes and trap densities.
    pub tau_n: f64,
    pub tau_p: f64,
    pub n1: f64,
    pub p1: f64,

    /// Bimolecular rate constant.
    pub beta: f64,

    /// Auger coefficients.
    pub auger_n: f64,
    pub auger_p: f64,

    /// Interface recombination velocities at the ETL/perovskite and
    /// perovskite/HTL interfaces.
    pub v_n_e: f64,
    pub v_p_e: f64,
    pub v_n_h: f64,
    pub v_p_h: f64,

    /// Built-in voltage and thermal voltage in volts, used only for the
    /// `psi = (Vbi - V) / (2 Vt)` transform of applied voltages.
    pub vbi: f64,
    pub vt: f64,
}

impl Params {
    /// Fail fast on inconsistent inputs before any solve begins.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("w_e", self.w_e),
            ("w_h", self.w_h),
            ("lam2", self.lam2),
            ("lam_e2", self.lam_e2),
            ("lam_h2", self.lam_h2),
            ("delta", self.delta),
            ("d_e", self.d_e),
            ("d_h", self.d_h),
            ("k_e", self.k_e),
            ("k_h", self.k_h),
            ("kappa_n", self.kappa_n),
            ("kappa_p", self.kappa_p),
            ("kappa_e", self.kappa_e),
            ("kappa_h", self.kappa_h),
            ("vt", self.vt),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(Error::Config(format!(
                    "parameter {name} must be positive and finite (got {value})"
                )));
            }
        }
        let non_negative = [
            ("ni2", self.ni2),
            ("gen_rate", self.gen_rate),
            ("tau_n", self.tau_n),
            ("tau_p", self.tau_p),
            ("beta", self.beta),
            ("auger_n", self.auger_n),
            ("auger_p", self.auger_p),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(Error::Config(format!(
                    "parameter {name} must be non-negative and finite (got {value})"
                )));
            }
        }
        if self.tau_n + self.tau_p == 0.0 && (self.n1 > 0.0 || self.p1 > 0.0) {
            return Err(Error::Config(
                "SRH trap densities given with zero lifetimes".into(),
            ));
        }
        if !(self.upsilon > 0.0) {
            return Err(Error::Config(format!(
                "absorption coefficient upsilon must be positive (got {})",
                self.upsilon
            )));
        }
        Ok(())
    }

    /// Intrinsic product seen from the ETL interface (`n_E * p` units).
    pub fn ni2_etl(&self) -> f64 {
        self.ni2 / self.k_e
    }

    /// Intrinsic product seen from the HTL interface (`n * p_H` units).
    pub fn ni2_htl(&self) -> f64 {
        self.ni2 / self.k_h
    }
}

/// Literature-value TiO2 / MAPbI3 / spiro-OMeTAD cell, nondimensionalized
/// here so the scaling arithmetic is on record.
pub fn reference_cell() -> Params {
    // Physical constants (SI).
    let q = 1.602176634e-19; // [C]
    let kb = 1.380649e-23; // [J/K]
    let eps0 = 8.8541878128e-12; // [F/m]
    let temp = 298.0; // [K]
    let vt: f64 = kb * temp / q; // [V] thermal voltage

    // Geometry.
    let width = 600e-9; // [m] perovskite width
    let width_e = 100e-9; // [m] ETL
    let width_h = 200e-9; // [m] HTL

    // Material data.
    let n0_ion = 1.6e25; // [m^-3] mean vacancy density
    let d_ion = 6.5e-12; // [m^2/s] vacancy diffusion coefficient
    let eps_p = 24.1 * eps0;
    let eps_e = 10.0 * eps0;
    let eps_h = 3.0 * eps0;
    let dope_e = 1.0e24; // [m^-3] ETL donor density
    let dope_h = 1.0e24; // [m^-3] HTL acceptor density
    let n0 = 1.0e24; // [m^-3] carrier density scale
    let dn = 1.7e-4; // [m^2/s] electron diffusion, perovskite
    let dp = 1.7e-4; // [m^2/s] hole diffusion, perovskite
    let de = 1.0e-5; // [m^2/s] ETL electrons
    let dh = 1.0e-6; // [m^2/s] HTL holes

    // Band structure (eV, vacuum-referenced).
    let gc = 8.1e24; // [m^-3] perovskite conduction DoS
    let gv = 5.8e24; // [m^-3] perovskite valence DoS
    let gc_e = 5.0e25;
    let gv_h = 5.0e25;
    let ec = -3.7;
    let ev = -5.4;
    let ec_e = -4.0;
    let ev_h = -5.1;

    // Optical generation.
    let flux = 1.4e21; // [m^-2 s^-1] incident photon flux at 1 sun
    let alpha = 1.3e7; // [m^-1] absorption coefficient

    // Bulk and interface recombination (SI).
    let tau_n = 3e-9; // [s]
    let tau_p = 3e-7; // [s]
    let beta = 4.78e-17; // [m^3/s]
    let auger = 1.55e-41; // [m^6/s]
    let v_n_e = 1e5 * 1e-2; // [m/s]
    let v_p_e = 10.0 * 1e-2;
    let v_n_h = 0.1 * 1e-2;
    let v_p_h = 1e5 * 1e-2;

    // Scales.
    let t_ion = width * width / d_ion; // [s] ion diffusion time
    let lam2 = eps_p * vt / (q * n0_ion * width * width);
    let ni2_dim = gc * gv * (-(ec - ev) / vt).exp(); // [m^-6]

    // Interface density ratios from Boltzmann statistics.
    let k_e = (gc / gc_e) * ((ec_e - ec) / vt).exp();
    let k_h = (gv / gv_h) * ((ev - ev_h) / vt).exp();

    Params {
        w_e: width_e / width,
        w_h: width_h / width,
        lam2,
        lam_e2: lam2 * (eps_e / eps_p),
        lam_h2: lam2 * (eps_h / eps_p),
        delta: n0 / n0_ion,
        d_e: dope_e / n0,
        d_h: dope_h / n0,
        k_e,
        k_h,
        ni2: ni2_dim / (n0 * n0),
        kappa_n: dn / d_ion,
        kappa_p: dp / d_ion,
        kappa_e: de / d_ion,
        kappa_h: dh / d_ion,
        gen_rate: flux * t_ion / (width * n0),
        upsilon: alpha * width,
        inverted: false,
        tau_n: tau_n / t_ion,
        tau_p: tau_p / t_ion,
        n1: ni2_dim.sqrt() / n0,
        p1: ni2_dim.sqrt() / n0,
        beta: beta * n0 * t_ion,
        auger_n: auger * n0 * n0 * t_ion,
        auger_p: auger * n0 * n0 * t_ion,
        v_n_e: v_n_e * t_ion / width,
        v_p_e: v_p_e * t_ion / width,
        v_n_h: v_n_h * t_ion / width,
        v_p_h: v_p_h * t_ion / width,
        vbi: 1.0,
        vt,
    }
}

/// Artificially mild device for fast verification runs: every dimensionless
/// group is pulled toward unity so boundary layers stay resolvable on coarse
/// grids and the DAE is only moderately stiff. Physically self-consistent,
/// numerically forgiving.
pub fn soft_cell() -> Params {
    Params {
        w_e: 0.25,
        w_h: 0.25,
        lam2: 2e-2,
        lam_e2: 3e-2,
        lam_h2: 3e-2,
        delta: 0.5,
        d_e: 1.0,
        d_h: 1.0,
        k_e: 0.5,
        k_h: 0.5,
        ni2: 1e-6,
        kappa_n: 50.0,
        kappa_p: 40.0,
        kappa_e: 30.0,
        kappa_h: 20.0,
        gen_rate: 10.0,
        upsilon: 3.0,
        inverted: false,
        tau_n: 1.0,
        tau_p: 1.0,
        n1: 1e-3,
        p1: 1e-3,
        beta: 1.0,
        auger_n: 0.1,
        auger_p: 0.1,
        v_n_e: 1.0,
        v_p_e: 1.0,
        v_n_h: 1.0,
        v_p_h: 1.0,
        vbi: 1.0,
        vt: 0.025693,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_cells_validate() {
        reference_cell().validate().unwrap();
        soft_cell().validate().unwrap();
    }

    #[test]
    fn validation_names_the_offender() {
        let mut p = soft_cell();
        p.lam2 = -1.0;
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("lam2"));
    }
}
