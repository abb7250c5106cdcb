//! Forcing protocol grammar and the compiled forcing record.
//!
//! Instructions are typed: a light program and a voltage program, each a
//! start value followed by closed-form segments, with the voltage side also
//! accepting the open-circuit start and the impedance sub-protocol. The
//! compiler ([`compile`]) turns them into piecewise closed-form signals, the
//! solver time grid, the splits sub-grid and the `find_voc` flag.
//!
//! Open circuit is a tagged value ([`Applied::SolveForVoc`]), never a numeric
//! sentinel. Voltage segments that chain from an open-circuit start stay
//! affine in the unknown `V_oc`, so the whole program resolves once the
//! root-find pins it down.

mod compile;

pub use compile::compile;

/// Closed-form ramp shapes between a start value and a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Linear,
    Tanh,
    Exponential,
}

/// One protocol segment: evolve from the running value to `target` over
/// `duration` (dimensionless time). The exponential shape approaches its
/// target with time constant `duration / 5`.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub shape: Shape,
    pub duration: f64,
    pub target: f64,
}

/// Light-intensity instruction (suns).
#[derive(Debug, Clone)]
pub enum LightProtocol {
    Constant(f64),
    Program {
        initial: f64,
        segments: Vec<Segment>,
    },
}

/// Start of a voltage program.
#[derive(Debug, Clone, Copy)]
pub enum VoltageStart {
    Voltage(f64),
    OpenCircuit,
}

/// Voltage instruction (volts).
#[derive(Debug, Clone)]
pub enum VoltageProtocol {
    Constant(f64),
    /// Hold the cell at open circuit for the whole protocol.
    OpenCircuit,
    Program {
        start: VoltageStart,
        segments: Vec<Segment>,
    },
    Impedance(ImpedanceSpec),
}

/// Impedance-spectroscopy sub-protocol: log-spaced frequencies between
/// `f_min` and `f_max` (dimensionless, cycles per time unit), a small sine of
/// amplitude `v_ac` on top of `v_dc`, `n_periods` measured periods per
/// frequency.
#[derive(Debug, Clone, Copy)]
pub struct ImpedanceSpec {
    pub f_min: f64,
    pub f_max: f64,
    pub v_dc: f64,
    pub v_ac: f64,
    pub n_freqs: usize,
    pub n_periods: usize,
}

/// Voltage forcing at a time point: imposed, or to be solved for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Applied {
    Imposed(f64),
    SolveForVoc,
}

/// One measured window of an impedance sweep, in protocol time.
#[derive(Debug, Clone, Copy)]
pub struct ImpedanceWindow {
    pub freq: f64,
    pub period: f64,
    pub t_start: f64,
    pub t_end: f64,
    pub v_dc: f64,
    pub v_ac: f64,
}

/// One piece of a compiled signal. Values are affine in the unresolved
/// open-circuit voltage: `value = a + b * v_oc`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PieceKind {
    Hold {
        a: f64,
        b: f64,
    },
    Ramp {
        shape: Shape,
        a0: f64,
        b0: f64,
        target: f64,
    },
    Sine {
        v_dc: f64,
        v_ac: f64,
        freq: f64,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Piece {
    pub t0: f64,
    pub t1: f64,
    pub kind: PieceKind,
}

impl Piece {
    /// Evaluate as `(a, b)` with `value = a + b * v_oc`; `s` is clamped to
    /// the piece.
    fn affine_at(&self, t: f64) -> (f64, f64) {
        let s = (t - self.t0).clamp(0.0, self.t1 - self.t0);
        match self.kind {
            PieceKind::Hold { a, b } => (a, b),
            PieceKind::Ramp {
                shape,
                a0,
                b0,
                target,
            } => {
                let d = self.t1 - self.t0;
                // Weight w runs 0 -> 1 along the ramp (exponential: almost 1).
                let w = match shape {
                    Shape::Linear => s / d,
                    Shape::Tanh => {
                        let k = 3.0_f64;
                        ((k * (2.0 * s / d - 1.0)).tanh() + k.tanh()) / (2.0 * k.tanh())
                    }
                    Shape::Exponential => 1.0 - (-5.0 * s / d).exp(),
                };
                (a0 * (1.0 - w) + target * w, b0 * (1.0 - w))
            }
            PieceKind::Sine { v_dc, v_ac, freq } => {
                let omega = 2.0 * std::f64::consts::PI * freq;
                (v_dc + v_ac * (omega * s).sin(), 0.0)
            }
        }
    }

    /// End value of the piece, affine in `v_oc`.
    pub(crate) fn end_affine(&self) -> (f64, f64) {
        self.affine_at(self.t1)
    }
}

/// A compiled piecewise signal covering `[0, t_end]` contiguously.
#[derive(Debug, Clone)]
pub(crate) struct PiecewiseSignal {
    pub pieces: Vec<Piece>,
}

impl PiecewiseSignal {
    fn affine_at(&self, t: f64) -> (f64, f64) {
        let piece = self
            .pieces
            .iter()
            .rev()
            .find(|p| t >= p.t0)
            .unwrap_or(&self.pieces[0]);
        piece.affine_at(t)
    }

    pub(crate) fn t_end(&self) -> f64 {
        self.pieces.last().map(|p| p.t1).unwrap_or(0.0)
    }

    pub(crate) fn depends_on_voc(&self) -> bool {
        self.pieces.iter().any(|p| match p.kind {
            PieceKind::Hold { b, .. } => b != 0.0,
            PieceKind::Ramp { b0, .. } => b0 != 0.0,
            PieceKind::Sine { .. } => false,
        })
    }
}

/// The compiled forcing record: two signals, the monotone time grid, the
/// splits sub-grid, the open-circuit flag and the impedance window table.
/// Immutable once compiled; shared read-only by the residual engine and the
/// time integration driver.
#[derive(Debug, Clone)]
pub struct Forcing {
    pub(crate) light: PiecewiseSignal,
    pub(crate) voltage: PiecewiseSignal,
    pub time_grid: Vec<f64>,
    pub splits: Vec<f64>,
    pub find_voc: bool,
    pub impedance: Option<Vec<ImpedanceWindow>>,
    vbi: f64,
    vt: f64,
}

impl Forcing {
    /// Light intensity at time `t`.
    pub fn light_at(&self, t: f64) -> f64 {
        let (a, b) = self.light.affine_at(t);
        debug_assert_eq!(b, 0.0);
        a
    }

    /// Applied voltage at time `t`, given the resolved open-circuit voltage
    /// if one is known yet.
    pub fn voltage_at(&self, t: f64, v_oc: Option<f64>) -> Applied {
        let (a, b) = self.voltage.affine_at(t);
        if b == 0.0 {
            Applied::Imposed(a)
        } else {
            match v_oc {
                Some(v) => Applied::Imposed(a + b * v),
                None => Applied::SolveForVoc,
            }
        }
    }

    /// Scaled potential-difference forcing `psi = (Vbi - V) / (2 Vt)`.
    pub fn psi_at(&self, t: f64, v_oc: Option<f64>) -> Applied {
        match self.voltage_at(t, v_oc) {
            Applied::Imposed(v) => Applied::Imposed(self.psi_of_voltage(v)),
            Applied::SolveForVoc => Applied::SolveForVoc,
        }
    }

    /// The `psi` transform for a voltage in volts.
    pub fn psi_of_voltage(&self, v: f64) -> f64 {
        (self.vbi - v) / (2.0 * self.vt)
    }

    pub fn t_end(&self) -> f64 {
        *self.time_grid.last().expect("compiled grid is non-empty")
    }

    pub(crate) fn new(
        light: PiecewiseSignal,
        voltage: PiecewiseSignal,
        time_grid: Vec<f64>,
        splits: Vec<f64>,
        impedance: Option<Vec<ImpedanceWindow>>,
        vbi: f64,
        vt: f64,
    ) -> Self {
        let find_voc = voltage.depends_on_voc();
        Self {
            light,
            voltage,
            time_grid,
            splits,
            find_voc,
            impedance,
            vbi,
            vt,
        }
    }
}
