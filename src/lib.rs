//! Transient drift-diffusion simulation of perovskite solar cells.
//!
//! The device is a three-layer stack (electron transport layer, perovskite
//! absorber, hole transport layer) carrying four coupled fields: mobile ion
//! vacancies, electric potential, electrons and holes. The crate solves the
//! resulting stiff differential-algebraic system on a tanh-graded 1-D mesh
//! under externally scripted light/voltage forcing, including
//! impedance-spectroscopy sweeps and open-circuit tracking.
//!
//! Everything works in the dimensionless variables of the [`models::Params`]
//! record; unit bookkeeping is the caller's concern.
//!
//! ```no_run
//! use pvcell::models::perovskite;
//! use pvcell::numerics::SolverConfig;
//! use pvcell::protocol::{LightProtocol, VoltageProtocol};
//!
//! let params = perovskite::reference_cell();
//! let cfg = SolverConfig::default();
//! let light = LightProtocol::Constant(1.0);
//! let voltage = VoltageProtocol::Constant(params.vbi);
//! let run = pvcell::simulate(&params, &light, &voltage, &cfg).unwrap();
//! println!("{} saved states", run.solution.states.len());
//! ```

pub mod discretization;
pub mod models;
pub mod numerics;
pub mod physics;
pub mod processing;
pub mod protocol;

mod error;

pub use error::{Error, Result};
pub use numerics::transient::{run_protocol, RunOutcome, Solution};

use discretization::mesh::DeviceMesh;
use models::Params;
use numerics::SolverConfig;
use protocol::{compile, LightProtocol, VoltageProtocol};

/// One-call front end: build the mesh, compile the forcing protocol, find the
/// steady initial state and integrate the whole protocol.
pub fn simulate(
    params: &Params,
    light: &LightProtocol,
    voltage: &VoltageProtocol,
    cfg: &SolverConfig,
) -> Result<RunOutcome> {
    params.validate()?;
    cfg.validate()?;
    let mesh = DeviceMesh::build(params, cfg.n_etl, cfg.n_psk, cfg.n_htl, cfg.stretch)?;
    let forcing = compile(params, light, voltage, cfg)?;
    run_protocol(params, &mesh, &forcing, cfg)
}
