use crate::discretization::mesh::DeviceMesh;
use crate::physics::Mode;

/// Field order within a perovskite node.
const PSK_VARS: usize = 4; // vacancy, potential, electrons, holes
/// Field order within an ETL node.
const ETL_VARS: usize = 2; // potential, electrons
/// Field order within an HTL node.
const HTL_VARS: usize = 2; // potential, holes

/// Identifies which equation a global row index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Potential at ETL node `i` (0 is the outer contact).
    EtlPhi(usize),
    /// Electrons at ETL node `i`.
    EtlN(usize),
    /// Ion vacancies at perovskite node `j`.
    PskV(usize),
    /// Potential at perovskite node `j` (0 and N are the interfaces).
    PskPhi(usize),
    /// Electrons at perovskite node `j`.
    PskN(usize),
    /// Holes at perovskite node `j`.
    PskP(usize),
    /// Potential at HTL node `k` (n_h is the outer contact).
    HtlPhi(usize),
    /// Holes at HTL node `k`.
    HtlP(usize),
}

/// Index arithmetic for the global state vector.
///
/// Nodes are ordered left to right across the device and fields are
/// interleaved per node: ETL exterior nodes carry `[phi, n]`, perovskite
/// nodes `[P, phi, n, p]`, HTL exterior nodes `[phi, p]`. The two interface
/// nodes belong to the perovskite block; the transport-layer values there
/// follow from continuity (`n_E = n / k_e`, `p_H = p / k_h`, shared `phi`).
#[derive(Debug, Clone)]
pub struct Layout {
    pub n_e: usize,
    pub n: usize,
    pub n_h: usize,
}

impl Layout {
    pub fn new(mesh: &DeviceMesh) -> Self {
        Self {
            n_e: mesh.etl.cells(),
            n: mesh.perovskite.cells(),
            n_h: mesh.htl.cells(),
        }
    }

    /// Total number of unknowns.
    pub fn n_dof(&self) -> usize {
        ETL_VARS * self.n_e + PSK_VARS * (self.n + 1) + HTL_VARS * self.n_h
    }

    // ETL exterior nodes i in 0..n_e.
    pub fn etl_phi(&self, i: usize) -> usize {
        ETL_VARS * i
    }
    pub fn etl_n(&self, i: usize) -> usize {
        ETL_VARS * i + 1
    }

    fn psk_base(&self) -> usize {
        ETL_VARS * self.n_e
    }

    // Perovskite nodes j in 0..=n.
    pub fn pk_v(&self, j: usize) -> usize {
        self.psk_base() + PSK_VARS * j
    }
    pub fn pk_phi(&self, j: usize) -> usize {
        self.psk_base() + PSK_VARS * j + 1
    }
    pub fn pk_n(&self, j: usize) -> usize {
        self.psk_base() + PSK_VARS * j + 2
    }
    pub fn pk_p(&self, j: usize) -> usize {
        self.psk_base() + PSK_VARS * j + 3
    }

    fn htl_base(&self) -> usize {
        self.psk_base() + PSK_VARS * (self.n + 1)
    }

    // HTL exterior nodes k in 1..=n_h.
    pub fn htl_phi(&self, k: usize) -> usize {
        self.htl_base() + HTL_VARS * (k - 1)
    }
    pub fn htl_p(&self, k: usize) -> usize {
        self.htl_base() + HTL_VARS * (k - 1) + 1
    }

    /// Map a global row index back to its equation.
    pub fn locate(&self, r: usize) -> RowKind {
        if r < self.psk_base() {
            let i = r / ETL_VARS;
            match r % ETL_VARS {
                0 => RowKind::EtlPhi(i),
                _ => RowKind::EtlN(i),
            }
        } else if r < self.htl_base() {
            let r = r - self.psk_base();
            let j = r / PSK_VARS;
            match r % PSK_VARS {
                0 => RowKind::PskV(j),
                1 => RowKind::PskPhi(j),
                2 => RowKind::PskN(j),
                _ => RowKind::PskP(j),
            }
        } else {
            let r = r - self.htl_base();
            let k = 1 + r / HTL_VARS;
            match r % HTL_VARS {
                0 => RowKind::HtlPhi(k),
                _ => RowKind::HtlP(k),
            }
        }
    }

    /// Column stencil of row `r` under the given engine mode: every unknown
    /// the row's residual can depend on, sorted ascending. This is the
    /// declared sparsity pattern; nearest-neighbor coupling plus same-node
    /// cross terms, with the interface rows reaching across layer boundaries.
    pub fn stencil(&self, r: usize, mode: Mode) -> Vec<usize> {
        let ne = self.n_e;
        let n = self.n;
        let nh = self.n_h;
        let mut cols = match self.locate(r) {
            // Contact rows are Dirichlet: diagonal only.
            RowKind::EtlPhi(0) => vec![self.etl_phi(0)],
            RowKind::EtlN(0) => vec![self.etl_n(0)],
            RowKind::HtlPhi(k) if k == nh => vec![self.htl_phi(nh)],
            RowKind::HtlP(k) if k == nh => vec![self.htl_p(nh)],

            RowKind::EtlPhi(i) => {
                let mut c = vec![self.etl_phi(i - 1), self.etl_phi(i), self.etl_n(i)];
                if i + 1 < ne {
                    c.push(self.etl_phi(i + 1));
                } else {
                    c.push(self.pk_phi(0));
                }
                c
            }
            RowKind::EtlN(i) => {
                let mut c = vec![
                    self.etl_phi(i - 1),
                    self.etl_n(i - 1),
                    self.etl_phi(i),
                    self.etl_n(i),
                ];
                if i + 1 < ne {
                    c.push(self.etl_phi(i + 1));
                    c.push(self.etl_n(i + 1));
                } else {
                    c.push(self.pk_phi(0));
                    c.push(self.pk_n(0));
                }
                c
            }

            RowKind::PskV(j) => match mode {
                Mode::Init => vec![self.pk_v(j)],
                Mode::Transient => {
                    let mut c = Vec::new();
                    if j > 0 {
                        c.push(self.pk_v(j - 1));
                        c.push(self.pk_phi(j - 1));
                    }
                    c.push(self.pk_v(j));
                    c.push(self.pk_phi(j));
                    if j < n {
                        c.push(self.pk_v(j + 1));
                        c.push(self.pk_phi(j + 1));
                    }
                    c
                }
            },

            RowKind::PskPhi(j) => {
                let mut c = Vec::new();
                if j == 0 {
                    c.push(self.etl_phi(ne - 1));
                } else {
                    c.push(self.pk_phi(j - 1));
                }
                c.extend([self.pk_v(j), self.pk_phi(j), self.pk_n(j), self.pk_p(j)]);
                if j == n {
                    c.push(self.htl_phi(1));
                } else {
                    c.push(self.pk_phi(j + 1));
                }
                c
            }

            RowKind::PskN(j) => {
                let mut c = Vec::new();
                if j == 0 {
                    c.push(self.etl_phi(ne - 1));
                    c.push(self.etl_n(ne - 1));
                } else {
                    c.push(self.pk_phi(j - 1));
                    c.push(self.pk_n(j - 1));
                }
                c.extend([self.pk_phi(j), self.pk_n(j), self.pk_p(j)]);
                if j < n {
                    c.push(self.pk_phi(j + 1));
                    c.push(self.pk_n(j + 1));
                }
                c
            }

            RowKind::PskP(j) => {
                let mut c = Vec::new();
                if j > 0 {
                    c.push(self.pk_phi(j - 1));
                    c.push(self.pk_p(j - 1));
                }
                c.extend([self.pk_phi(j), self.pk_n(j), self.pk_p(j)]);
                if j == n {
                    c.push(self.htl_phi(1));
                    c.push(self.htl_p(1));
                } else {
                    c.push(self.pk_phi(j + 1));
                    c.push(self.pk_p(j + 1));
                }
                c
            }

            RowKind::HtlPhi(k) => {
                let mut c = Vec::new();
                if k == 1 {
                    c.push(self.pk_phi(n));
                } else {
                    c.push(self.htl_phi(k - 1));
                }
                c.push(self.htl_phi(k));
                c.push(self.htl_p(k));
                if k + 1 <= nh {
                    c.push(self.htl_phi(k + 1));
                }
                c
            }
            RowKind::HtlP(k) => {
                let mut c = Vec::new();
                if k == 1 {
                    c.push(self.pk_phi(n));
                    c.push(self.pk_p(n));
                } else {
                    c.push(self.htl_phi(k - 1));
                    c.push(self.htl_p(k - 1));
                }
                c.push(self.htl_phi(k));
                c.push(self.htl_p(k));
                if k + 1 <= nh {
                    c.push(self.htl_phi(k + 1));
                    c.push(self.htl_p(k + 1));
                }
                c
            }
        };
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    /// Lower and upper bandwidths of the Jacobian under the given mode.
    pub fn bandwidths(&self, mode: Mode) -> (usize, usize) {
        let mut kl = 0usize;
        let mut ku = 0usize;
        for r in 0..self.n_dof() {
            for &c in &self.stencil(r, mode) {
                if c < r {
                    kl = kl.max(r - c);
                } else {
                    ku = ku.max(c - r);
                }
            }
        }
        (kl, ku)
    }
}
