use crate::error::{Error, Result};
use rayon::prelude::*;
use std::fmt;
use std::ops;

pub trait Matrix {
    fn nrows(&self)->usize;
    fn ncols(&self)->usize;
    fn eval(&self, row_index: usize, col_index: usize)->f64;

    /// Return the (C-format / row-major) flattened matrix, e.g., to
    /// be saved to disk.
    fn flattened_array(&self) -> Vec<f64> where Self:Sync {
        (0..self.nrows())
        .into_par_iter()
        .map(move |row_index|
            (0..self.ncols())
            .into_par_iter()
            .map(move |col_index|
                self.eval(row_index, col_index)
            ).collect::<Vec<f64>>()
        )
        .flatten()
        .collect()
    }

    /// Return the (C-format / row-major) matrix as a [Vec<Vec<f64>>]
    fn matrix(&self) -> Vec<Vec<f64>> where Self:Sync {
        (0..self.nrows())
        .into_par_iter()
        .map(|row_index|
            (0..self.ncols())
            .into_par_iter()
            .map(|col_index|
                self.eval(row_index, col_index)
            ).collect::<Vec<f64>>()
        ).collect()
    }

    /// format function, which can be used when implementing Display
    fn format(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for row_index in 0..self.nrows() {
            match row_index {
                0 => write!(f, "[[")?,
                _ => write!(f, "\n [")?,
            }
            for col_index in 0..self.ncols() {
                write!(f, " {:5.2}", self.eval(row_index, col_index))?;
            }
            write!(f, " ]")?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

/// 2x2 real matrix, used for the single-stage longitudinal transport map.
///
/// Entries are addressed `(row, col)` with zero-based indices, and the
/// matrix is immutable once built: each scan sample gets its own freshly
/// computed map.
/// ```
/// use ltwiss::Mat2;
/// let m = Mat2::new(1.0, 2.0, 0.0, 1.0);
/// assert_eq!(m.get(0,1), 2.0);
/// assert_eq!(m.det(), 1.0);
/// let prod = m * Mat2::identity();
/// assert_eq!(prod, m);
/// ```
#[derive(Debug,Clone,Copy,PartialEq)]
pub struct Mat2([[f64; 2]; 2]);

impl Mat2 {
    /// Build a matrix from its entries in reading order.
    pub fn new(m11: f64, m12: f64, m21: f64, m22: f64) -> Self {
        Self([[m11, m12], [m21, m22]])
    }
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0)
    }
    /// Entry at `(row, col)`, zero-based.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row][col]
    }
    /// Determinant. For a valid longitudinal gap+drift map this is 1
    /// (the map is area-preserving).
    pub fn det(&self) -> f64 {
        self.0[0][0]*self.0[1][1] - self.0[0][1]*self.0[1][0]
    }
    /// The `(z, dE) -> z_exit` row of the map.
    pub fn first_row(&self) -> (f64, f64) {
        (self.0[0][0], self.0[0][1])
    }
}

impl_op_ex!(* |a: &Mat2, b: &Mat2| -> Mat2 {
    Mat2::new(
        a.get(0,0)*b.get(0,0) + a.get(0,1)*b.get(1,0),
        a.get(0,0)*b.get(0,1) + a.get(0,1)*b.get(1,1),
        a.get(1,0)*b.get(0,0) + a.get(1,1)*b.get(1,0),
        a.get(1,0)*b.get(0,1) + a.get(1,1)*b.get(1,1),
    )
});

impl_op_ex_commutative!(* |a: &Mat2, b: &f64| -> Mat2 {
    Mat2::new(a.get(0,0)*b, a.get(0,1)*b, a.get(1,0)*b, a.get(1,1)*b)
});

impl Matrix for Mat2 {
    fn nrows(&self) -> usize { 2 }
    fn ncols(&self) -> usize { 2 }
    fn eval(&self, row_index: usize, col_index: usize) -> f64 {
        self.0[row_index][col_index]
    }
}

impl fmt::Display for Mat2 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.format(f)
    }
}

/// Least-squares solution of an overdetermined `n x 3` system by
/// Householder QR.
///
/// Minimizes `||A x - b||^2` for the `n x 3` matrix given as `rows`.
/// QR is used instead of the normal equations so that ill-conditioned
/// scans do not square the condition number.
///
/// Fails with [Error::UnderdeterminedSystem] when `n < 3` or when the
/// columns are (numerically) linearly dependent.
pub fn lstsq_3(rows: &[[f64; 3]], rhs: &[f64]) -> Result<[f64; 3]> {
    let n = rows.len();
    if n != rhs.len() {
        return Err(Error::invalid(format!(
            "system has {n} rows but {} targets", rhs.len()
        )));
    }
    if n < 3 {
        return Err(Error::UnderdeterminedSystem(format!(
            "{n} usable samples, need at least 3"
        )));
    }
    let mut a: Vec<[f64; 3]> = rows.to_vec();
    let mut b: Vec<f64> = rhs.to_vec();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, &x| acc.max(x.abs()));

    // reduce A to upper-triangular form, one Householder reflection per column
    for k in 0..3 {
        let norm = (k..n).map(|i| a[i][k]*a[i][k]).sum::<f64>().sqrt();
        if norm <= scale * 1e-13 {
            return Err(Error::UnderdeterminedSystem(format!(
                "column {k} of the system is numerically rank-deficient"
            )));
        }
        let alpha = if a[k][k] >= 0.0 { -norm } else { norm };
        let mut v: Vec<f64> = (k..n).map(|i| a[i][k]).collect();
        v[0] -= alpha;
        let vtv: f64 = v.iter().map(|x| x*x).sum();
        if vtv > 0.0 {
            for j in k..3 {
                let coeff: f64 = 2.0
                    * v.iter().zip(k..n).map(|(vi, i)| vi * a[i][j]).sum::<f64>()
                    / vtv;
                for (vi, i) in v.iter().zip(k..n) {
                    a[i][j] -= coeff * vi;
                }
            }
            let coeff: f64 = 2.0
                * v.iter().zip(k..n).map(|(vi, i)| vi * b[i]).sum::<f64>()
                / vtv;
            for (vi, i) in v.iter().zip(k..n) {
                b[i] -= coeff * vi;
            }
        }
        a[k][k] = alpha;
    }

    // back-substitution on the 3x3 upper triangle
    let mut x = [0.0_f64; 3];
    for k in (0..3).rev() {
        let mut s = b[k];
        for j in (k+1)..3 {
            s -= a[k][j] * x[j];
        }
        x[k] = s / a[k][k];
    }
    Ok(x)
}
