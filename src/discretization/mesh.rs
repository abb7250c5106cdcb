use crate::error::{Error, Result};
use crate::models::Params;

/// One layer's grid: strictly increasing node coordinates and the forward
/// spacings between them (`dx[i] = x[i+1] - x[i]`).
#[derive(Debug, Clone)]
pub struct LayerMesh {
    pub x: Vec<f64>,
    pub dx: Vec<f64>,
}

impl LayerMesh {
    fn from_coords(x: Vec<f64>) -> Self {
        let dx = x.windows(2).map(|w| w[1] - w[0]).collect();
        Self { x, dx }
    }

    /// Number of subdivisions (one less than the number of nodes).
    pub fn cells(&self) -> usize {
        self.dx.len()
    }

    /// Half-cell width attached to the first node.
    pub fn left_half(&self) -> f64 {
        self.dx[0] / 2.0
    }

    /// Half-cell width attached to the last node.
    pub fn right_half(&self) -> f64 {
        self.dx[self.dx.len() - 1] / 2.0
    }

    /// Control volume of interior node `i`.
    pub fn volume(&self, i: usize) -> f64 {
        (self.dx[i - 1] + self.dx[i]) / 2.0
    }
}

/// The complete computational grid: three abutting tanh-graded layers.
///
/// Coordinates are dimensionless with the perovskite on `[0, 1]`, the
/// electron transport layer on `[-w_e, 0]` and the hole transport layer on
/// `[1, 1 + w_h]`. Node density increases toward the internal interfaces,
/// where the field gradients are steepest. The shared interface coordinates
/// are assigned exactly, not through the tanh transform, so the abutment
/// invariant holds with zero tolerance.
#[derive(Debug, Clone)]
pub struct DeviceMesh {
    pub etl: LayerMesh,
    pub perovskite: LayerMesh,
    pub htl: LayerMesh,
}

impl DeviceMesh {
    /// Build the three layer grids with `n_e`, `n` and `n_h` subdivisions and
    /// the given tanh stretching factor.
    pub fn build(params: &Params, n_e: usize, n: usize, n_h: usize, stretch: f64) -> Result<Self> {
        if n_e < 2 || n < 2 || n_h < 2 {
            return Err(Error::Config(format!(
                "each layer needs at least 2 subdivisions (got {n_e}, {n}, {n_h})"
            )));
        }
        if !(stretch > 0.0) || !stretch.is_finite() {
            return Err(Error::Config(format!(
                "mesh stretching factor must be positive and finite (got {stretch})"
            )));
        }
        if !(params.w_e > 0.0) || !(params.w_h > 0.0) {
            return Err(Error::Config(format!(
                "layer widths must be positive (w_e = {}, w_h = {})",
                params.w_e, params.w_h
            )));
        }

        let th = stretch.tanh();

        // Perovskite: symmetric grading, dense at both interfaces.
        let mut xp = Vec::with_capacity(n + 1);
        for j in 0..=n {
            let xi = j as f64 / n as f64;
            xp.push(0.5 * (1.0 + (stretch * (2.0 * xi - 1.0)).tanh() / th));
        }
        xp[0] = 0.0;
        xp[n] = 1.0;

        // ETL: one-sided grading, dense at the right end (the interface).
        let mut xe = Vec::with_capacity(n_e + 1);
        for i in 0..=n_e {
            let xi = i as f64 / n_e as f64;
            xe.push(-params.w_e + params.w_e * (stretch * xi).tanh() / th);
        }
        xe[0] = -params.w_e;
        xe[n_e] = 0.0;

        // HTL: mirror image, dense at the left end.
        let mut xh = Vec::with_capacity(n_h + 1);
        for k in 0..=n_h {
            let xi = k as f64 / n_h as f64;
            xh.push(1.0 + params.w_h * (1.0 - (stretch * (1.0 - xi)).tanh() / th));
        }
        xh[0] = 1.0;
        xh[n_h] = 1.0 + params.w_h;

        Ok(Self {
            etl: LayerMesh::from_coords(xe),
            perovskite: LayerMesh::from_coords(xp),
            htl: LayerMesh::from_coords(xh),
        })
    }
}
