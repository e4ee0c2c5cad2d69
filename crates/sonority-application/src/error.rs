// SPDX-License-Identifier: GPL-3.0-or-later

use sonority_fingerprint::FingerprintError;
use sonority_infrastructure::StoreError;
use thiserror::Error;

/// Errors surfaced by the analysis and similarity services
#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Seed weight must be a positive number, got {0}")]
    InvalidWeight(f32),

    #[error("Analysis task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SimilarityError {
    /// Per-track failures that a batch should record and step over.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fingerprint(err) => err.is_recoverable(),
            _ => false,
        }
    }
}

/// Result type for analysis and similarity operations
pub type SimilarityResult<T> = Result<T, SimilarityError>;
