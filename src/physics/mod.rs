pub mod jacobian;
pub mod recombination;
pub mod residual;

pub use jacobian::{Jacobian, JacobianPath};

use crate::discretization::mesh::DeviceMesh;
use crate::models::{Layout, Params};

/// Engine mode. `Init` freezes the ion vacancies at the mean density and
/// zeroes every mass entry, leaving the purely algebraic balance used by the
/// steady-state initializer; `Transient` evolves all differential rows. Each
/// mode declares its own Jacobian sparsity pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Init,
    Transient,
}

/// Semi-discrete form of the coupled drift-diffusion system.
///
/// For a state vector `u` and forcing values `(light, psi)` the engine
/// evaluates `F(u)` such that the DAE reads `M du/dt = F(u, t)` with the
/// diagonal mass `M` from [`residual::Engine::masses`]: volume-weighted unit
/// mass on ion rows, volume-weighted carrier mass on electron/hole rows, and
/// zero on the Poisson and contact rows (the algebraic constraints).
pub struct Engine<'a> {
    pub params: &'a Params,
    pub mesh: &'a DeviceMesh,
    pub layout: Layout,
    pub mode: Mode,
    /// Ion profile the init mode pins the vacancy rows to (uniform mean
    /// density unless the initializer's ion-equilibration loop updates it).
    pub frozen_ions: Vec<f64>,
    /// Declared sparsity: column stencil per row, fixed by the mode.
    pub stencils: Vec<Vec<usize>>,
    /// Lower/upper bandwidth of the declared pattern.
    pub bandwidths: (usize, usize),
}

impl<'a> Engine<'a> {
    pub fn new(params: &'a Params, mesh: &'a DeviceMesh, mode: Mode) -> Self {
        let layout = Layout::new(mesh);
        let stencils: Vec<Vec<usize>> = (0..layout.n_dof())
            .map(|r| layout.stencil(r, mode))
            .collect();
        let bandwidths = layout.bandwidths(mode);
        let frozen_ions = vec![1.0; layout.n + 1];
        Self {
            params,
            mesh,
            layout,
            mode,
            frozen_ions,
            stencils,
            bandwidths,
        }
    }

    pub fn set_frozen_ions(&mut self, profile: Vec<f64>) {
        assert_eq!(profile.len(), self.layout.n + 1);
        self.frozen_ions = profile;
    }

    pub fn n_dof(&self) -> usize {
        self.layout.n_dof()
    }
}
