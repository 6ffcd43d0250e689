//! Shape-checked vector and matrix types used by every filter.
//!
//! Both types wrap `nalgebra` dynamic storage. The wrappers exist so that a
//! shape disagreement surfaces as [`Error::DimensionMismatch`] instead of a
//! panic deep inside an operator overload: a mismatched H/R/state triple is a
//! configuration bug that must abort one track's cycle, not the process.
//!
//! Vectors are column vectors; in error payloads they report shape `(len, 1)`.

use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Pivot / determinant magnitude below which a matrix is treated as singular.
pub const SINGULAR_EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

/// Fixed-length column vector of `f64`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector(DVector<f64>);

impl Vector {
    pub fn zeros(len: usize) -> Self {
        Self(DVector::zeros(len))
    }

    /// Copy `values` into a new vector. The caller's buffer is never aliased.
    pub fn from_slice(values: &[f64]) -> Self {
        Self(DVector::from_column_slice(values))
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(DVector::from_vec(values))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<f64> {
        self.0.get(i).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }

    pub fn as_dvector(&self) -> &DVector<f64> {
        &self.0
    }

    fn shape(&self) -> (usize, usize) {
        (self.0.len(), 1)
    }

    pub fn add(&self, other: &Vector) -> Result<Vector> {
        if self.len() != other.len() {
            return Err(Error::mismatch("Vector::add", self.shape(), other.shape()));
        }
        Ok(Self(&self.0 + &other.0))
    }

    pub fn sub(&self, other: &Vector) -> Result<Vector> {
        if self.len() != other.len() {
            return Err(Error::mismatch("Vector::sub", self.shape(), other.shape()));
        }
        Ok(Self(&self.0 - &other.0))
    }

    pub fn scale(&self, s: f64) -> Vector {
        Self(&self.0 * s)
    }

    pub fn dot(&self, other: &Vector) -> Result<f64> {
        if self.len() != other.len() {
            return Err(Error::mismatch("Vector::dot", self.shape(), other.shape()));
        }
        Ok(self.0.dot(&other.0))
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &Vector) -> Vector {
        let n = self.len() + other.len();
        Self(DVector::from_iterator(
            n,
            self.0.iter().chain(other.0.iter()).copied(),
        ))
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.0[i]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.0[i]
    }
}

impl From<DVector<f64>> for Vector {
    fn from(v: DVector<f64>) -> Self {
        Self(v)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v:.3}")?;
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

/// Fixed-shape `rows × cols` matrix of `f64`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matrix(DMatrix<f64>);

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self(DMatrix::zeros(rows, cols))
    }

    pub fn identity(n: usize) -> Self {
        Self(DMatrix::identity(n, n))
    }

    /// Build from row-major data. Fails if `data.len() != rows * cols`.
    pub fn from_row_slice(rows: usize, cols: usize, data: &[f64]) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::mismatch(
                "Matrix::from_row_slice",
                (rows, cols),
                (data.len(), 1),
            ));
        }
        Ok(Self(DMatrix::from_row_slice(rows, cols, data)))
    }

    /// Build from a list of equally long rows.
    pub fn from_rows(rows: &[&[f64]]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(Error::mismatch(
                "Matrix::from_rows",
                (rows.len(), cols),
                (1, bad.len()),
            ));
        }
        let data: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Ok(Self(DMatrix::from_row_slice(rows.len(), cols, &data)))
    }

    pub fn from_diagonal(diag: &[f64]) -> Self {
        Self(DMatrix::from_diagonal(&DVector::from_column_slice(diag)))
    }

    pub fn nrows(&self) -> usize {
        self.0.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.0.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.0.shape()
    }

    pub fn is_square(&self) -> bool {
        self.nrows() == self.ncols()
    }

    pub fn get(&self, r: usize, c: usize) -> Option<f64> {
        self.0.get((r, c)).copied()
    }

    pub fn as_dmatrix(&self) -> &DMatrix<f64> {
        &self.0
    }

    pub fn set_column(&mut self, c: usize, v: &Vector) -> Result<()> {
        if v.len() != self.nrows() || c >= self.ncols() {
            return Err(Error::mismatch("Matrix::set_column", self.shape(), v.shape()));
        }
        self.0.set_column(c, &v.0);
        Ok(())
    }

    pub fn mul_vec(&self, v: &Vector) -> Result<Vector> {
        if self.ncols() != v.len() {
            return Err(Error::mismatch("Matrix::mul_vec", self.shape(), v.shape()));
        }
        Ok(Vector(&self.0 * &v.0))
    }

    pub fn mul(&self, other: &Matrix) -> Result<Matrix> {
        if self.ncols() != other.nrows() {
            return Err(Error::mismatch("Matrix::mul", self.shape(), other.shape()));
        }
        Ok(Self(&self.0 * &other.0))
    }

    pub fn add(&self, other: &Matrix) -> Result<Matrix> {
        if self.shape() != other.shape() {
            return Err(Error::mismatch("Matrix::add", self.shape(), other.shape()));
        }
        Ok(Self(&self.0 + &other.0))
    }

    pub fn sub(&self, other: &Matrix) -> Result<Matrix> {
        if self.shape() != other.shape() {
            return Err(Error::mismatch("Matrix::sub", self.shape(), other.shape()));
        }
        Ok(Self(&self.0 - &other.0))
    }

    pub fn transpose(&self) -> Matrix {
        Self(self.0.transpose())
    }

    pub fn scale(&self, s: f64) -> Matrix {
        Self(&self.0 * s)
    }

    /// Sum of the diagonal. Non-square matrices sum their leading diagonal.
    pub fn trace(&self) -> f64 {
        self.0.diagonal().sum()
    }

    /// `A·B·Aᵗ`, the covariance propagation sandwich.
    pub fn congruence(&self, b: &Matrix) -> Result<Matrix> {
        self.mul(b)?.mul(&self.transpose())
    }

    pub fn is_symmetric(&self, tol: f64) -> bool {
        self.is_square() && (&self.0 - self.0.transpose()).amax() <= tol
    }

    /// `(A + Aᵗ) / 2`. Only meaningful for square matrices.
    pub fn symmetrize(&self) -> Result<Matrix> {
        if !self.is_square() {
            return Err(Error::UnsupportedShape {
                rows: self.nrows(),
                cols: self.ncols(),
            });
        }
        Ok(Self((&self.0 + self.0.transpose()) * 0.5))
    }

    /// `diag(a, b)` with zero off-diagonal blocks.
    pub fn block_diagonal(a: &Matrix, b: &Matrix) -> Matrix {
        let (ra, ca) = a.shape();
        let (rb, cb) = b.shape();
        let mut m = DMatrix::zeros(ra + rb, ca + cb);
        m.view_mut((0, 0), (ra, ca)).copy_from(&a.0);
        m.view_mut((ra, ca), (rb, cb)).copy_from(&b.0);
        Self(m)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Matrix inverse.
    ///
    /// 1×1 and 2×2 use the closed form with an absolute threshold of
    /// [`SINGULAR_EPS`] on the value / determinant. Larger matrices go through
    /// LU with partial pivoting and are rejected when the smallest pivot falls
    /// below `SINGULAR_EPS · max(1, max|aᵢⱼ|)`.
    pub fn inverse(&self) -> Result<Matrix> {
        let (rows, cols) = self.shape();
        if rows != cols || rows == 0 {
            return Err(Error::UnsupportedShape { rows, cols });
        }
        match rows {
            1 => {
                let a = self.0[(0, 0)];
                if a.abs() < SINGULAR_EPS {
                    return Err(Error::Singular { pivot: a.abs() });
                }
                Ok(Self(DMatrix::from_element(1, 1, 1.0 / a)))
            }
            2 => {
                let (a, b) = (self.0[(0, 0)], self.0[(0, 1)]);
                let (c, d) = (self.0[(1, 0)], self.0[(1, 1)]);
                let det = a * d - b * c;
                if det.abs() < SINGULAR_EPS {
                    return Err(Error::Singular { pivot: det.abs() });
                }
                Ok(Self(DMatrix::from_row_slice(
                    2,
                    2,
                    &[d / det, -b / det, -c / det, a / det],
                )))
            }
            _ => {
                let scale = self.0.amax().max(1.0);
                let lu = self.0.clone().lu();
                let min_pivot = lu
                    .u()
                    .diagonal()
                    .iter()
                    .fold(f64::INFINITY, |m, p| m.min(p.abs()));
                if min_pivot < SINGULAR_EPS * scale {
                    return Err(Error::Singular { pivot: min_pivot });
                }
                lu.try_inverse()
                    .map(Self)
                    .ok_or(Error::Singular { pivot: min_pivot })
            }
        }
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, rc: (usize, usize)) -> &f64 {
        &self.0[rc]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, rc: (usize, usize)) -> &mut f64 {
        &mut self.0[rc]
    }
}

impl From<DMatrix<f64>> for Matrix {
    fn from(m: DMatrix<f64>) -> Self {
        Self(m)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
