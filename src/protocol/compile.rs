//! Protocol compiler: typed instructions in, compiled [`Forcing`] out.

use super::{
    Forcing, ImpedanceSpec, ImpedanceWindow, LightProtocol, Piece, PieceKind, PiecewiseSignal,
    Segment, VoltageProtocol, VoltageStart,
};
use crate::error::{Error, Result};
use crate::models::Params;
use crate::numerics::SolverConfig;

fn check_finite(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() {
        return Err(Error::Config(format!("{name} must be finite (got {v})")));
    }
    Ok(())
}

fn check_segments(name: &str, segments: &[Segment]) -> Result<()> {
    for (i, seg) in segments.iter().enumerate() {
        if !(seg.duration > 0.0) || !seg.duration.is_finite() {
            return Err(Error::Config(format!(
                "{name} segment {i}: duration must be positive (got {})",
                seg.duration
            )));
        }
        check_finite(&format!("{name} segment {i} target"), seg.target)?;
    }
    Ok(())
}

/// Chain ramp segments from an affine start value. Each segment begins at
/// the previous one's end value, which keeps the compiled signal continuous
/// at every internal boundary by construction.
fn chain_segments(start: (f64, f64), segments: &[Segment]) -> Vec<Piece> {
    let mut pieces = Vec::with_capacity(segments.len());
    let (mut a, mut b) = start;
    let mut t = 0.0;
    for seg in segments {
        let piece = Piece {
            t0: t,
            t1: t + seg.duration,
            kind: PieceKind::Ramp {
                shape: seg.shape,
                a0: a,
                b0: b,
                target: seg.target,
            },
        };
        (a, b) = piece.end_affine();
        t = piece.t1;
        pieces.push(piece);
    }
    pieces
}

/// Extend a signal to the negotiated protocol span: empty signals become a
/// single hold, short ones hold their final value.
fn finalize(mut pieces: Vec<Piece>, start: (f64, f64), t_total: f64) -> PiecewiseSignal {
    let t_end = pieces.last().map(|p| p.t1).unwrap_or(0.0);
    if pieces.is_empty() || t_end < t_total {
        let (a, b) = pieces.last().map(|p| p.end_affine()).unwrap_or(start);
        pieces.push(Piece {
            t0: t_end,
            t1: t_total,
            kind: PieceKind::Hold { a, b },
        });
    }
    PiecewiseSignal { pieces }
}

fn light_pieces(light: &LightProtocol) -> Result<(Vec<Piece>, (f64, f64))> {
    match light {
        LightProtocol::Constant(v) => {
            check_finite("light intensity", *v)?;
            if *v < 0.0 {
                return Err(Error::Config(format!("light intensity must be >= 0, got {v}")));
            }
            Ok((Vec::new(), (*v, 0.0)))
        }
        LightProtocol::Program { initial, segments } => {
            check_finite("initial light intensity", *initial)?;
            check_segments("light", segments)?;
            if segments.iter().any(|s| s.target < 0.0) || *initial < 0.0 {
                return Err(Error::Config("light intensity must stay >= 0".into()));
            }
            Ok((chain_segments((*initial, 0.0), segments), (*initial, 0.0)))
        }
    }
}

fn voltage_pieces(
    voltage: &VoltageProtocol,
    cfg: &SolverConfig,
) -> Result<(Vec<Piece>, (f64, f64), Option<Vec<ImpedanceWindow>>)> {
    match voltage {
        VoltageProtocol::Constant(v) => {
            check_finite("applied voltage", *v)?;
            Ok((Vec::new(), (*v, 0.0), None))
        }
        VoltageProtocol::OpenCircuit => Ok((Vec::new(), (0.0, 1.0), None)),
        VoltageProtocol::Program { start, segments } => {
            let start = match start {
                VoltageStart::Voltage(v) => {
                    check_finite("initial voltage", *v)?;
                    (*v, 0.0)
                }
                VoltageStart::OpenCircuit => (0.0, 1.0),
            };
            check_segments("voltage", segments)?;
            Ok((chain_segments(start, segments), start, None))
        }
        VoltageProtocol::Impedance(spec) => {
            let (pieces, windows) = impedance_pieces(spec, cfg)?;
            Ok((pieces, (spec.v_dc, 0.0), Some(windows)))
        }
    }
}

/// Log-spaced frequencies, one sine piece per frequency. The settle span is
/// rounded up to whole periods so every measured window starts at zero
/// phase.
fn impedance_pieces(
    spec: &ImpedanceSpec,
    cfg: &SolverConfig,
) -> Result<(Vec<Piece>, Vec<ImpedanceWindow>)> {
    check_finite("impedance v_dc", spec.v_dc)?;
    check_finite("impedance v_ac", spec.v_ac)?;
    if !(spec.f_min > 0.0) || !spec.f_min.is_finite() {
        return Err(Error::Config(format!(
            "impedance f_min must be positive (got {})",
            spec.f_min
        )));
    }
    if !(spec.f_max >= spec.f_min) {
        return Err(Error::Config(format!(
            "impedance frequency bounds inverted ({} > {})",
            spec.f_min, spec.f_max
        )));
    }
    if spec.n_freqs == 0 || spec.n_periods == 0 {
        return Err(Error::Config(
            "impedance needs at least one frequency and one period".into(),
        ));
    }
    if spec.n_freqs > 1 && spec.f_max == spec.f_min {
        return Err(Error::Config(
            "impedance with several frequencies needs f_max > f_min".into(),
        ));
    }
    if spec.v_ac < 0.0 {
        return Err(Error::Config(format!(
            "impedance v_ac must be >= 0 (got {})",
            spec.v_ac
        )));
    }
    if !(cfg.settle_periods >= 0.0) {
        return Err(Error::Config(format!(
            "settle_periods must be >= 0 (got {})",
            cfg.settle_periods
        )));
    }

    let settle = cfg.settle_periods.ceil() as usize;
    let mut pieces = Vec::with_capacity(spec.n_freqs);
    let mut windows = Vec::with_capacity(spec.n_freqs);
    let mut t = 0.0;
    for i in 0..spec.n_freqs {
        let freq = if spec.n_freqs == 1 {
            spec.f_min
        } else {
            let frac = i as f64 / (spec.n_freqs - 1) as f64;
            spec.f_min * (spec.f_max / spec.f_min).powf(frac)
        };
        let period = 1.0 / freq;
        let t1 = t + (settle + spec.n_periods) as f64 * period;
        pieces.push(Piece {
            t0: t,
            t1,
            kind: PieceKind::Sine {
                v_dc: spec.v_dc,
                v_ac: spec.v_ac,
                freq,
            },
        });
        windows.push(ImpedanceWindow {
            freq,
            period,
            t_start: t + settle as f64 * period,
            t_end: t1,
            v_dc: spec.v_dc,
            v_ac: spec.v_ac,
        });
        t = t1;
    }
    Ok((pieces, windows))
}

/// Sample points and split points contributed by one piece.
fn sample_piece(piece: &Piece, cfg: &SolverConfig, grid: &mut Vec<f64>, splits: &mut Vec<f64>) {
    splits.push(piece.t0);
    splits.push(piece.t1);
    match piece.kind {
        PieceKind::Hold { .. } => {
            grid.push(piece.t0);
            grid.push(piece.t1);
        }
        PieceKind::Ramp { .. } => {
            let m = cfg.points_per_segment;
            for q in 0..=m {
                let frac = q as f64 / m as f64;
                grid.push(piece.t0 + frac * (piece.t1 - piece.t0));
            }
        }
        PieceKind::Sine { freq, .. } => {
            let period = 1.0 / freq;
            let periods = ((piece.t1 - piece.t0) / period).round() as usize;
            let ppp = cfg.points_per_period;
            for q in 0..=(periods * ppp) {
                let t = piece.t0 + q as f64 * period / ppp as f64;
                grid.push(t.min(piece.t1));
            }
            // Integrator restart once per oscillation period.
            for m in 0..=periods {
                splits.push((piece.t0 + m as f64 * period).min(piece.t1));
            }
        }
    }
}

fn sort_dedup(mut v: Vec<f64>, tol: f64) -> Vec<f64> {
    v.sort_by(|a, b| a.partial_cmp(b).expect("grid times are finite"));
    v.dedup_by(|a, b| (*a - *b).abs() <= tol);
    v
}

/// Compile light/voltage instructions into the forcing record: signals,
/// monotone time grid, splits sub-grid and the open-circuit flag.
pub fn compile(
    params: &Params,
    light: &LightProtocol,
    voltage: &VoltageProtocol,
    cfg: &SolverConfig,
) -> Result<Forcing> {
    let (light_raw, light_start) = light_pieces(light)?;
    let (volt_raw, volt_start, impedance) = voltage_pieces(voltage, cfg)?;

    // Negotiate the protocol span: instructions with segments fix it, purely
    // constant protocols default to one time unit.
    let fixed = light_raw
        .last()
        .map(|p| p.t1)
        .unwrap_or(0.0)
        .max(volt_raw.last().map(|p| p.t1).unwrap_or(0.0));
    let t_total = if fixed > 0.0 { fixed } else { 1.0 };

    let light_signal = finalize(light_raw, light_start, t_total);
    let volt_signal = finalize(volt_raw, volt_start, t_total);

    let mut grid = Vec::new();
    let mut splits = Vec::new();
    for piece in light_signal.pieces.iter().chain(&volt_signal.pieces) {
        sample_piece(piece, cfg, &mut grid, &mut splits);
    }
    let tol = t_total * 1e-12;
    let mut splits = sort_dedup(splits, tol);
    grid.extend_from_slice(&splits);
    let grid = sort_dedup(grid, tol);
    // Splits must be grid points (dedup tolerances can drift them apart).
    for s in &mut splits {
        let nearest = grid
            .iter()
            .copied()
            .min_by(|a, b| {
                (a - *s)
                    .abs()
                    .partial_cmp(&(b - *s).abs())
                    .expect("finite")
            })
            .expect("non-empty grid");
        *s = nearest;
    }

    Ok(Forcing::new(
        light_signal,
        volt_signal,
        grid,
        splits,
        impedance,
        params.vbi,
        params.vt,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::perovskite;
    use crate::protocol::{Applied, Shape};
    use approx::assert_relative_eq;

    fn cfg() -> SolverConfig {
        SolverConfig::default()
    }

    #[test]
    fn constant_instructions_give_two_point_grid() {
        let params = perovskite::soft_cell();
        let f = compile(
            &params,
            &LightProtocol::Constant(1.0),
            &VoltageProtocol::Constant(params.vbi),
            &cfg(),
        )
        .unwrap();
        assert_eq!(f.time_grid.len(), 2);
        assert!(!f.find_voc);
        for &t in &f.time_grid {
            assert_relative_eq!(f.light_at(t), 1.0);
            assert_eq!(f.psi_at(t, None), Applied::Imposed(0.0));
        }
    }

    #[test]
    fn segments_are_continuous_at_boundaries() {
        let params = perovskite::soft_cell();
        let light = LightProtocol::Program {
            initial: 0.0,
            segments: vec![
                Segment {
                    shape: Shape::Exponential,
                    duration: 0.5,
                    target: 1.0,
                },
                Segment {
                    shape: Shape::Tanh,
                    duration: 1.0,
                    target: 0.2,
                },
            ],
        };
        let voltage = VoltageProtocol::Program {
            start: VoltageStart::Voltage(0.0),
            segments: vec![
                Segment {
                    shape: Shape::Linear,
                    duration: 0.7,
                    target: 0.9,
                },
                Segment {
                    shape: Shape::Exponential,
                    duration: 0.8,
                    target: 0.3,
                },
            ],
        };
        let f = compile(&params, &light, &voltage, &cfg()).unwrap();
        assert_eq!(f.t_end(), 1.5);

        for &t in &f.splits {
            if t <= 0.0 || t >= f.t_end() {
                continue;
            }
            let eps = 1e-9;
            let before = f.light_at(t - eps);
            let after = f.light_at(t + eps);
            assert!((before - after).abs() < 1e-6, "light jump at {t}");
            let (Applied::Imposed(vb), Applied::Imposed(va)) =
                (f.psi_at(t - eps, None), f.psi_at(t + eps, None))
            else {
                panic!("voltage should be imposed everywhere");
            };
            assert!((vb - va).abs() < 1e-6, "psi jump at {t}");
        }
    }

    #[test]
    fn open_circuit_start_resolves_affinely() {
        let params = perovskite::soft_cell();
        let voltage = VoltageProtocol::Program {
            start: VoltageStart::OpenCircuit,
            segments: vec![Segment {
                shape: Shape::Linear,
                duration: 1.0,
                target: 0.0,
            }],
        };
        let f = compile(&params, &LightProtocol::Constant(1.0), &voltage, &cfg()).unwrap();
        assert!(f.find_voc);
        assert_eq!(f.voltage_at(0.0, None), Applied::SolveForVoc);
        // Once resolved, the ramp runs from V_oc to the target.
        let v_oc = 0.8;
        let Applied::Imposed(v0) = f.voltage_at(0.0, Some(v_oc)) else {
            panic!()
        };
        assert_relative_eq!(v0, v_oc, epsilon = 1e-12);
        let Applied::Imposed(v1) = f.voltage_at(1.0, Some(v_oc)) else {
            panic!()
        };
        assert_relative_eq!(v1, 0.0, epsilon = 1e-12);
        let Applied::Imposed(vm) = f.voltage_at(0.5, Some(v_oc)) else {
            panic!()
        };
        assert_relative_eq!(vm, v_oc / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn impedance_grid_covers_requested_periods() {
        let params = perovskite::soft_cell();
        let mut config = cfg();
        config.settle_periods = 0.0;
        let spec = ImpedanceSpec {
            f_min: 4.0,
            f_max: 4.0,
            v_dc: 0.7,
            v_ac: 0.01,
            n_freqs: 1,
            n_periods: 5,
        };
        let f = compile(
            &params,
            &LightProtocol::Constant(1.0),
            &VoltageProtocol::Impedance(spec),
            &config,
        )
        .unwrap();

        // Exactly five periods of the single frequency.
        assert_relative_eq!(f.t_end(), 5.0 / 4.0, epsilon = 1e-12);
        let windows = f.impedance.as_ref().unwrap();
        assert_eq!(windows.len(), 1);
        assert_relative_eq!(windows[0].t_start, 0.0);
        assert_relative_eq!(windows[0].t_end, 5.0 / 4.0);

        // At least the configured minimum of points per period.
        let period = windows[0].period;
        for w in f.time_grid.windows(2) {
            assert!(w[1] - w[0] <= period / config.points_per_period as f64 + 1e-12);
        }
        // One split per oscillation period.
        for m in 0..=5 {
            let t = m as f64 * period;
            assert!(f.splits.iter().any(|&s| (s - t).abs() < 1e-9), "missing split at {t}");
        }
    }

    #[test]
    fn impedance_frequencies_are_log_spaced() {
        let params = perovskite::soft_cell();
        let spec = ImpedanceSpec {
            f_min: 1.0,
            f_max: 100.0,
            v_dc: 0.7,
            v_ac: 0.01,
            n_freqs: 5,
            n_periods: 2,
        };
        let f = compile(
            &params,
            &LightProtocol::Constant(0.0),
            &VoltageProtocol::Impedance(spec),
            &cfg(),
        )
        .unwrap();
        let freqs: Vec<f64> = f.impedance.as_ref().unwrap().iter().map(|w| w.freq).collect();
        assert_eq!(freqs.len(), 5);
        for pair in freqs.windows(2) {
            assert_relative_eq!(pair[1] / pair[0], 100.0_f64.powf(0.25), epsilon = 1e-9);
        }
    }

    #[test]
    fn malformed_protocols_fail_fast() {
        let params = perovskite::soft_cell();
        let bad_light = LightProtocol::Program {
            initial: 1.0,
            segments: vec![Segment {
                shape: Shape::Linear,
                duration: -1.0,
                target: 0.0,
            }],
        };
        assert!(matches!(
            compile(&params, &bad_light, &VoltageProtocol::Constant(0.0), &cfg()),
            Err(Error::Config(_))
        ));

        let bad_imp = VoltageProtocol::Impedance(ImpedanceSpec {
            f_min: 10.0,
            f_max: 1.0,
            v_dc: 0.0,
            v_ac: 0.01,
            n_freqs: 4,
            n_periods: 2,
        });
        assert!(matches!(
            compile(&params, &LightProtocol::Constant(1.0), &bad_imp, &cfg()),
            Err(Error::Config(_))
        ));

        let bad_imp = VoltageProtocol::Impedance(ImpedanceSpec {
            f_min: 1.0,
            f_max: 10.0,
            v_dc: 0.0,
            v_ac: 0.01,
            n_freqs: 0,
            n_periods: 2,
        });
        assert!(compile(&params, &LightProtocol::Constant(1.0), &bad_imp, &cfg()).is_err());
    }
}
