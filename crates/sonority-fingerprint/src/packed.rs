// SPDX-License-Identifier: GPL-3.0-or-later

//! Upper-triangular packing for symmetric matrices.
//!
//! Row `i` of a `dim x dim` symmetric matrix contributes entries `(i, i..dim)`,
//! so the packed array holds `dim * (dim + 1) / 2` values with each diagonal
//! element stored once.

use crate::matrix::Matrix;

/// Number of values in a packed `dim x dim` symmetric matrix.
pub const fn packed_len(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Position of entry `(i, k)` in the packed array. Symmetric: `(k, i)` maps to the same slot.
#[inline]
pub fn packed_index(i: usize, k: usize, dim: usize) -> usize {
    let (row, col) = if i <= k { (i, k) } else { (k, i) };
    debug_assert!(col < dim, "index ({}, {}) out of range for dim {}", i, k, dim);
    // Rows before `row` hold dim + (dim - 1) + ... entries; the row itself starts at its diagonal.
    row * dim - (row * row + row) / 2 + col
}

/// Pack the upper triangle of a square matrix.
pub fn pack_upper(m: &Matrix) -> Vec<f32> {
    let dim = m.rows();
    debug_assert_eq!(dim, m.cols());
    let mut packed = Vec::with_capacity(packed_len(dim));
    for i in 0..dim {
        packed.extend_from_slice(&m.row(i)[i..]);
    }
    packed
}
