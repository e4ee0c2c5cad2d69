// SPDX-License-Identifier: GPL-3.0-or-later

//! Gaussian timbre model and its symmetrized Kullback-Leibler distance.
//!
//! A model summarizes a cepstral matrix by its mean vector and the packed
//! covariance / inverse covariance of its frame columns. Both packed arrays
//! store the plain upper triangle; the distance accounts for the mirrored
//! lower triangle by counting off-diagonal products twice.
//!
//! With that packing the distance is
//!
//! ```text
//! d(a, b) = (tr(Ca Ib) + tr(Cb Ia) + (ma - mb)^T (Ia + Ib) (ma - mb)) / 4 - dim / 2
//! ```
//!
//! which is zero for identical models. Faulty models can drive it below zero;
//! callers decide what to do with those values.

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::matrix::Matrix;
use crate::packed::{pack_upper, packed_index, packed_len};
use crate::{FingerprintError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Scms {
    dim: usize,
    mean: Vec<f32>,
    cov: Vec<f32>,
    icov: Vec<f32>,
}

/// Reusable buffers for a batch of distance computations of one dimension.
#[derive(Debug, Clone)]
pub struct DistanceScratch {
    dim: usize,
    mean_diff: Vec<f64>,
    summed_icov: Vec<f64>,
}

impl DistanceScratch {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            mean_diff: vec![0.0; dim],
            summed_icov: vec![0.0; packed_len(dim)],
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl Scms {
    /// Build a model from a `[coefficients, frames]` cepstral matrix.
    ///
    /// A singular covariance (silence, too few frames) yields
    /// [`FingerprintError::ModelImpossible`].
    pub fn from_cepstral(cepstral: &Matrix) -> Result<Self> {
        let mean = cepstral.mean();
        let covariance = cepstral
            .covariance(&mean)
            .map_err(FingerprintError::ModelImpossible)?;
        let inverse = covariance
            .inverse()
            .map_err(FingerprintError::ModelImpossible)?;

        trace!(
            dim = mean.len(),
            frames = cepstral.cols(),
            "built timbre model"
        );

        Ok(Self {
            dim: mean.len(),
            mean,
            cov: pack_upper(&covariance),
            icov: pack_upper(&inverse),
        })
    }

    /// Assemble a model from already packed parts.
    pub fn from_parts(mean: Vec<f32>, cov: Vec<f32>, icov: Vec<f32>) -> Result<Self> {
        let dim = mean.len();
        if dim == 0 {
            return Err(FingerprintError::InvalidModel(
                "model dimension must be positive".into(),
            ));
        }
        let expected = packed_len(dim);
        if cov.len() != expected || icov.len() != expected {
            return Err(FingerprintError::InvalidModel(format!(
                "packed matrices for dim {} need {} values, got {} and {}",
                dim,
                expected,
                cov.len(),
                icov.len()
            )));
        }
        Ok(Self {
            dim,
            mean,
            cov,
            icov,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn covariance(&self) -> &[f32] {
        &self.cov
    }

    pub fn inverse_covariance(&self) -> &[f32] {
        &self.icov
    }

    /// Symmetrized divergence between two models of equal dimension.
    pub fn distance(&self, other: &Scms, scratch: &mut DistanceScratch) -> Result<f32> {
        if self.dim != scratch.dim {
            return Err(FingerprintError::DimensionMismatch {
                expected: scratch.dim,
                found: self.dim,
            });
        }
        if other.dim != scratch.dim {
            return Err(FingerprintError::DimensionMismatch {
                expected: scratch.dim,
                found: other.dim,
            });
        }
        let dim = self.dim;

        let mut trace_term = 0.0f64;
        for i in 0..dim {
            for k in i..dim {
                let idx = packed_index(i, k, dim);
                let product = self.cov[idx] as f64 * other.icov[idx] as f64
                    + other.cov[idx] as f64 * self.icov[idx] as f64;
                trace_term += if i == k { product } else { 2.0 * product };
            }
        }

        for (dst, (&a, &b)) in scratch
            .summed_icov
            .iter_mut()
            .zip(self.icov.iter().zip(&other.icov))
        {
            *dst = a as f64 + b as f64;
        }
        for (dst, (&a, &b)) in scratch
            .mean_diff
            .iter_mut()
            .zip(self.mean.iter().zip(&other.mean))
        {
            *dst = a as f64 - b as f64;
        }

        let mut quad_term = 0.0f64;
        for i in 0..dim {
            let mut row = 0.0f64;
            for k in 0..dim {
                row += scratch.summed_icov[packed_index(i, k, dim)] * scratch.mean_diff[k];
            }
            quad_term += row * scratch.mean_diff[i];
        }

        Ok(((trace_term + quad_term) / 4.0 - dim as f64 / 2.0) as f32)
    }

    /// Little-endian `i32 dim`, then mean, covariance and inverse covariance as `f32`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_i32_le(self.dim as i32);
        for &v in self.mean.iter().chain(&self.cov).chain(&self.icov) {
            buf.put_f32_le(v);
        }
        buf.to_vec()
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        if bytes.remaining() < 4 {
            return Err(FingerprintError::InvalidModel(
                "missing dimension header".into(),
            ));
        }
        let dim = bytes.get_i32_le();
        if dim <= 0 {
            return Err(FingerprintError::InvalidModel(format!(
                "non-positive dimension {}",
                dim
            )));
        }
        let dim = dim as usize;
        let packed = packed_len(dim);
        let expected = (dim + 2 * packed) * 4;
        if bytes.remaining() != expected {
            return Err(FingerprintError::InvalidModel(format!(
                "dimension {} needs {} payload bytes, found {}",
                dim,
                expected,
                bytes.remaining()
            )));
        }

        let mut read = |n: usize| -> Vec<f32> { (0..n).map(|_| bytes.get_f32_le()).collect() };
        let mean = read(dim);
        let cov = read(packed);
        let icov = read(packed);
        Self::from_parts(mean, cov, icov)
    }

    fn encoded_len(&self) -> usize {
        4 + (self.mean.len() + self.cov.len() + self.icov.len()) * 4
    }
}
