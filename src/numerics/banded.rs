//! Direct banded LU with partial pivoting.
//!
//! Nearest-neighbor coupling on the 1-D stack keeps every Jacobian inside a
//! narrow band, so the linear solves restrict themselves to the declared
//! sparsity instead of going through a general dense factorization. Storage
//! follows the LAPACK `gbtrf` convention: `kl` extra superdiagonal rows hold
//! the fill created by row pivoting.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

pub struct BandedMatrix {
    n: usize,
    kl: usize,
    ku: usize,
    /// Column-major band storage, `2 kl + ku + 1` rows per column.
    ab: Vec<f64>,
}

impl BandedMatrix {
    pub fn new(n: usize, kl: usize, ku: usize) -> Self {
        Self {
            n,
            kl,
            ku,
            ab: vec![0.0; n * (2 * kl + ku + 1)],
        }
    }

    #[inline]
    fn ld(&self) -> usize {
        2 * self.kl + self.ku + 1
    }

    /// Flat index of entry `(i, j)`; valid for `-(ku + kl) <= i - j <= kl`.
    #[inline]
    fn idx(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.n && j < self.n);
        debug_assert!(j <= i + self.ku + self.kl && i <= j + self.kl);
        j * self.ld() + (self.kl + self.ku + i) - j
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.ab[self.idx(i, j)]
    }

    #[inline]
    pub fn add(&mut self, i: usize, j: usize, v: f64) {
        let k = self.idx(i, j);
        self.ab[k] += v;
    }

    pub fn scale(&mut self, s: f64) {
        for v in &mut self.ab {
            *v *= s;
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(self.n, self.n);
        for j in 0..self.n {
            let lo = j.saturating_sub(self.ku + self.kl);
            let hi = (j + self.kl).min(self.n - 1);
            for i in lo..=hi {
                a[(i, j)] = self.get(i, j);
            }
        }
        a
    }

    /// Factorize in place and solve `A x = b`. Consumes the matrix; a zero
    /// pivot reports the offending column.
    pub fn lu_solve(mut self, b: &DVector<f64>) -> Result<DVector<f64>> {
        let n = self.n;
        let kl = self.kl;
        let ubw = self.kl + self.ku;
        let mut piv = vec![0usize; n];

        for j in 0..n {
            let imax = (j + kl).min(n - 1);
            let mut p = j;
            let mut pmax = self.get(j, j).abs();
            for i in (j + 1)..=imax {
                let v = self.get(i, j).abs();
                if v > pmax {
                    p = i;
                    pmax = v;
                }
            }
            if pmax == 0.0 || !pmax.is_finite() {
                return Err(Error::LinearSolve(format!(
                    "banded LU pivot breakdown at column {j}"
                )));
            }
            piv[j] = p;
            let kmax = (j + ubw).min(n - 1);
            if p != j {
                for k in j..=kmax {
                    let a = self.idx(j, k);
                    let b = self.idx(p, k);
                    self.ab.swap(a, b);
                }
            }
            let d = self.get(j, j);
            for i in (j + 1)..=imax {
                let l = self.get(i, j) / d;
                let li = self.idx(i, j);
                self.ab[li] = l;
                for k in (j + 1)..=kmax {
                    let jk = self.ab[self.idx(j, k)];
                    let ik = self.idx(i, k);
                    self.ab[ik] -= l * jk;
                }
            }
        }

        let mut x = b.clone();
        for j in 0..n {
            if piv[j] != j {
                x.swap_rows(j, piv[j]);
            }
            let xj = x[j];
            for i in (j + 1)..=(j + kl).min(n - 1) {
                x[i] -= self.get(i, j) * xj;
            }
        }
        for j in (0..n).rev() {
            x[j] /= self.get(j, j);
            let xj = x[j];
            for i in j.saturating_sub(ubw)..j {
                x[i] -= self.get(i, j) * xj;
            }
        }
        if !x.iter().all(|v| v.is_finite()) {
            return Err(Error::LinearSolve(
                "banded solve produced non-finite values".into(),
            ));
        }
        Ok(x)
    }
}
