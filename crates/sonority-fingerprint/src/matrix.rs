// SPDX-License-Identifier: GPL-3.0-or-later

//! Dense row-major matrices used by the spectral and cepstral stages.
//!
//! Storage is `f32`; accumulations (mean, covariance, inversion) run in `f64`
//! and are narrowed on the way out.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Pivots smaller than this fraction of the largest input magnitude are treated as zero.
const PIVOT_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("{op}: incompatible shapes {left:?} and {right:?}")]
    DimensionMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("matrix is singular")]
    Singular,

    #[error("malformed matrix data: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Wrap a row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, MatrixError> {
        if data.len() != rows * cols {
            return Err(MatrixError::DimensionMismatch {
                op: "from_vec",
                left: (rows, cols),
                right: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a closure over `(row, col)`.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn map_in_place(&mut self, f: impl Fn(f32) -> f32) {
        for v in &mut self.data {
            *v = f(*v);
        }
    }

    /// `self * other`.
    pub fn multiply(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        if self.cols != other.rows {
            return Err(MatrixError::DimensionMismatch {
                op: "multiply",
                left: self.shape(),
                right: other.shape(),
            });
        }
        let mut out = Matrix::zeros(self.rows, other.cols);
        for r in 0..self.rows {
            let lhs = self.row(r);
            let dst = &mut out.data[r * other.cols..(r + 1) * other.cols];
            for (k, &a) in lhs.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for (d, &b) in dst.iter_mut().zip(other.row(k)) {
                    *d += a * b;
                }
            }
        }
        Ok(out)
    }

    /// `self^T * other`, without materializing the transpose.
    pub fn transpose_multiply(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        if self.rows != other.rows {
            return Err(MatrixError::DimensionMismatch {
                op: "transpose_multiply",
                left: self.shape(),
                right: other.shape(),
            });
        }
        let mut out = Matrix::zeros(self.cols, other.cols);
        for k in 0..self.rows {
            let lhs = self.row(k);
            let rhs = other.row(k);
            for (r, &a) in lhs.iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                let dst = &mut out.data[r * other.cols..(r + 1) * other.cols];
                for (d, &b) in dst.iter_mut().zip(rhs) {
                    *d += a * b;
                }
            }
        }
        Ok(out)
    }

    /// Per-row mean over all columns.
    pub fn mean(&self) -> Vec<f32> {
        if self.cols == 0 {
            return vec![0.0; self.rows];
        }
        (0..self.rows)
            .map(|r| {
                let sum: f64 = self.row(r).iter().map(|&v| v as f64).sum();
                (sum / self.cols as f64) as f32
            })
            .collect()
    }

    /// Population covariance between rows, treating each column as one observation.
    pub fn covariance(&self, mean: &[f32]) -> Result<Matrix, MatrixError> {
        if mean.len() != self.rows {
            return Err(MatrixError::DimensionMismatch {
                op: "covariance",
                left: self.shape(),
                right: (mean.len(), 1),
            });
        }
        let mut out = Matrix::zeros(self.rows, self.rows);
        if self.cols == 0 {
            return Ok(out);
        }
        let n = self.cols as f64;
        for i in 0..self.rows {
            let xi = self.row(i);
            let mi = mean[i] as f64;
            for j in i..self.rows {
                let xj = self.row(j);
                let mj = mean[j] as f64;
                let sum: f64 = xi
                    .iter()
                    .zip(xj)
                    .map(|(&a, &b)| (a as f64 - mi) * (b as f64 - mj))
                    .sum();
                let value = (sum / n) as f32;
                out.set(i, j, value);
                out.set(j, i, value);
            }
        }
        Ok(out)
    }

    /// Gauss-Jordan inverse with partial pivoting.
    pub fn inverse(&self) -> Result<Matrix, MatrixError> {
        if self.rows != self.cols {
            return Err(MatrixError::DimensionMismatch {
                op: "inverse",
                left: self.shape(),
                right: self.shape(),
            });
        }
        let n = self.rows;
        let scale = self
            .data
            .iter()
            .fold(0.0f64, |acc, &v| acc.max((v as f64).abs()));
        if n == 0 || scale == 0.0 || !scale.is_finite() {
            return Err(MatrixError::Singular);
        }
        let threshold = scale * PIVOT_EPSILON;

        let mut a: Vec<f64> = self.data.iter().map(|&v| v as f64).collect();
        let mut inv = vec![0.0f64; n * n];
        for i in 0..n {
            inv[i * n + i] = 1.0;
        }

        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|&x, &y| a[x * n + col].abs().total_cmp(&a[y * n + col].abs()))
                .unwrap_or(col);
            let pivot = a[pivot_row * n + col];
            if pivot.abs() <= threshold || !pivot.is_finite() {
                return Err(MatrixError::Singular);
            }
            if pivot_row != col {
                for c in 0..n {
                    a.swap(col * n + c, pivot_row * n + c);
                    inv.swap(col * n + c, pivot_row * n + c);
                }
            }
            for c in 0..n {
                a[col * n + c] /= pivot;
                inv[col * n + c] /= pivot;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a[r * n + col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    a[r * n + c] -= factor * a[col * n + c];
                    inv[r * n + c] -= factor * inv[col * n + c];
                }
            }
        }

        let data: Vec<f32> = inv.into_iter().map(|v| v as f32).collect();
        if data.iter().any(|v| !v.is_finite()) {
            return Err(MatrixError::Singular);
        }
        Ok(Matrix { rows: n, cols: n, data })
    }

    /// New matrix holding the given columns in the given order.
    pub fn select_columns(&self, columns: &[usize]) -> Matrix {
        let mut out = Matrix::zeros(self.rows, columns.len());
        for r in 0..self.rows {
            let src = self.row(r);
            for (dst, &c) in columns.iter().enumerate() {
                out.set(r, dst, src[c]);
            }
        }
        out
    }

    /// Little-endian `i32 rows, i32 cols` header followed by row-major `f32` values.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8 + self.data.len() * 4);
        buf.put_i32_le(self.rows as i32);
        buf.put_i32_le(self.cols as i32);
        for &v in &self.data {
            buf.put_f32_le(v);
        }
        buf.to_vec()
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Matrix, MatrixError> {
        if bytes.remaining() < 8 {
            return Err(MatrixError::Malformed("missing shape header".into()));
        }
        let rows = bytes.get_i32_le();
        let cols = bytes.get_i32_le();
        if rows < 0 || cols < 0 {
            return Err(MatrixError::Malformed(format!(
                "negative shape {}x{}",
                rows, cols
            )));
        }
        let (rows, cols) = (rows as usize, cols as usize);
        let expected = rows * cols * 4;
        if bytes.remaining() != expected {
            return Err(MatrixError::Malformed(format!(
                "expected {} bytes of values for {}x{}, found {}",
                expected,
                rows,
                cols,
                bytes.remaining()
            )));
        }
        let mut data = Vec::with_capacity(rows * cols);
        while bytes.has_remaining() {
            data.push(bytes.get_f32_le());
        }
        Ok(Matrix { rows, cols, data })
    }
}
