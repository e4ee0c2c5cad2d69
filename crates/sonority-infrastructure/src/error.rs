// SPDX-License-Identifier: GPL-3.0-or-later

use sonority_domain::TrackId;
use sonority_fingerprint::FingerprintError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No fingerprint stored for track {0}")]
    NotFound(TrackId),

    #[error("Schema migration from version {from} to {to} failed: {source}")]
    MigrationFailed {
        from: i64,
        to: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Store schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },

    #[error("Store configuration entry {key} is unreadable: {value}")]
    CorruptConfig { key: &'static str, value: String },

    #[error("Stored fingerprint for track {track_id} is unreadable: {source}")]
    CorruptModel {
        track_id: TrackId,
        #[source]
        source: FingerprintError,
    },

    #[error("Page size must be positive")]
    InvalidPageSize,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
