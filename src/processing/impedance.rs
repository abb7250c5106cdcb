//! Impedance extraction from time-domain transients.
//!
//! For each measured window of an impedance protocol the late-time terminal
//! current is projected onto the single applied frequency (trapezoid-rule
//! Fourier projection over whole periods); the impedance is the ratio of the
//! known voltage phasor to the extracted current phasor. Results are ordered
//! by frequency.

use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::numerics::transient::Solution;
use crate::processing::current;

/// Complex impedance at one sampled frequency.
#[derive(Debug, Clone, Copy)]
pub struct ImpedancePoint {
    pub freq: f64,
    pub z: Complex64,
}

/// Single-frequency Fourier phasor of a sampled signal over `[t0, t_end]`:
/// `(2 / T) * integral v(t) exp(-i w (t - t0)) dt` by the trapezoid rule.
pub(crate) fn fit_phasor(times: &[f64], values: &[f64], freq: f64, t_ref: f64) -> Complex64 {
    debug_assert!(times.len() >= 2 && times.len() == values.len());
    let omega = 2.0 * std::f64::consts::PI * freq;
    let mut acc = Complex64::new(0.0, 0.0);
    let mut prev = values[0] * (-Complex64::i() * omega * (times[0] - t_ref)).exp();
    for k in 1..times.len() {
        let cur = values[k] * (-Complex64::i() * omega * (times[k] - t_ref)).exp();
        acc += (prev + cur) * (0.5 * (times[k] - times[k - 1]));
        prev = cur;
    }
    acc * (2.0 / (times[times.len() - 1] - times[0]))
}

/// Extract the impedance spectrum from a solution produced by an impedance
/// protocol. The first measured period of each window is discarded as
/// residual settling whenever more than one period was recorded.
pub fn extract(sol: &Solution) -> Result<Vec<ImpedancePoint>> {
    let windows = sol.impedance.as_ref().ok_or_else(|| {
        Error::Config("solution was not produced by an impedance protocol".into())
    })?;
    let j = current::current_series(sol);

    let mut points = Vec::with_capacity(windows.len());
    for w in windows {
        let fit_start = if w.t_end - w.t_start > 1.5 * w.period {
            w.t_start + w.period
        } else {
            w.t_start
        };
        let eps = w.period * 1e-9;
        let idx: Vec<usize> = (0..sol.t.len())
            .filter(|&i| sol.t[i] >= fit_start - eps && sol.t[i] <= w.t_end + eps)
            .collect();
        if idx.len() < 4 {
            return Err(Error::Config(format!(
                "impedance window at {} Hz has too few samples ({})",
                w.freq,
                idx.len()
            )));
        }
        let times: Vec<f64> = idx.iter().map(|&i| sol.t[i]).collect();
        let values: Vec<f64> = idx.iter().map(|&i| j[i]).collect();

        // The voltage perturbation is v_ac sin(w (t - t_start)), whose
        // phasor under the same projection is -i v_ac.
        let j_phasor = fit_phasor(&times, &values, w.freq, w.t_start);
        if j_phasor.norm() == 0.0 {
            return Err(Error::Config(format!(
                "no current response at {} Hz; cannot form impedance",
                w.freq
            )));
        }
        let v_phasor = -Complex64::i() * w.v_ac;
        points.push(ImpedancePoint {
            freq: w.freq,
            z: v_phasor / j_phasor,
        });
    }
    points.sort_by(|a, b| a.freq.partial_cmp(&b.freq).expect("finite frequencies"));
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn phasor_recovers_amplitude_and_phase() {
        let freq = 3.0;
        let omega = 2.0 * std::f64::consts::PI * freq;
        let amp = 0.5;
        let phase = 0.3;
        let n = 64 * 4;
        let times: Vec<f64> = (0..=n).map(|k| k as f64 * 4.0 / freq / n as f64).collect();
        let values: Vec<f64> = times
            .iter()
            .map(|&t| 2.0 + amp * (omega * t + phase).sin())
            .collect();

        let phasor = fit_phasor(&times, &values, freq, 0.0);
        let expected = -Complex64::i() * amp * Complex64::new(0.0, phase).exp();
        assert_relative_eq!(phasor.re, expected.re, epsilon = 1e-4);
        assert_relative_eq!(phasor.im, expected.im, epsilon = 1e-4);
    }

    #[test]
    fn resistor_like_response_gives_real_impedance() {
        // J(t) = v(t) / R with v = v_ac sin(w t): Z should be R, phase 0.
        let freq = 2.0;
        let omega = 2.0 * std::f64::consts::PI * freq;
        let r = 25.0;
        let v_ac = 0.01;
        let n = 256;
        let times: Vec<f64> = (0..=n).map(|k| k as f64 * 3.0 / freq / n as f64).collect();
        let values: Vec<f64> = times.iter().map(|&t| v_ac * (omega * t).sin() / r).collect();

        let j_phasor = fit_phasor(&times, &values, freq, 0.0);
        let z = -Complex64::i() * v_ac / j_phasor;
        assert_relative_eq!(z.re, r, epsilon = 1e-2 * r);
        assert!(z.im.abs() < 1e-2 * r);
    }
}
