// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

use crate::matrix::MatrixError;

pub type Result<T> = std::result::Result<T, FingerprintError>;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Decode canceled")]
    DecodeCanceled,

    #[error("Model dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Cannot build a model from this track: {0}")]
    ModelImpossible(#[source] MatrixError),

    #[error("Cepstral transform failed: {0}")]
    TransformFailed(#[source] MatrixError),

    #[error("Coefficient matrix {name} has shape {found:?}, expected {expected:?}")]
    CoefficientShape {
        name: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid analysis parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid serialized model: {0}")]
    InvalidModel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FingerprintError {
    /// Failures that only concern the track being analyzed. A batch may skip the
    /// track and continue; everything else points at broken wiring or configuration.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::ModelImpossible(_))
    }
}
