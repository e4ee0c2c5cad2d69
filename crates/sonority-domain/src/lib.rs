// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Value Objects & IDs
// ============================================================================

/// Library track identifier, owned by the host media library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackId(pub i64);

impl TrackId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Analysis pipeline
// ============================================================================

/// Progress of one analyze-and-store run.
///
/// Runs move strictly forward through
/// `Pending -> Decoding -> Transforming -> ModelBuilding` and end in exactly one of
/// the terminal states `Stored`, `Failed` or `Canceled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum AnalysisState {
    Pending,
    Decoding,
    Transforming,
    ModelBuilding,
    Stored,
    Failed(String),
    Canceled,
}

impl AnalysisState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stored | Self::Failed(_) | Self::Canceled)
    }
}

impl std::fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Decoding => write!(f, "decoding"),
            Self::Transforming => write!(f, "transforming"),
            Self::ModelBuilding => write!(f, "model_building"),
            Self::Stored => write!(f, "stored"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Persisted outcome of the last analysis attempt for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Analyzed,
    /// The audio could not be decoded or produced a degenerate model.
    Impossible,
    /// The model was built but could not be written.
    StoreFailure,
}

impl AnalysisStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Analyzed => 0,
            Self::Impossible => -1,
            Self::StoreFailure => -2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Analyzed),
            -1 => Some(Self::Impossible),
            -2 => Some(Self::StoreFailure),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analyzed => write!(f, "analyzed"),
            Self::Impossible => write!(f, "impossible"),
            Self::StoreFailure => write!(f, "store_failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub track_id: TrackId,
    pub status: AnalysisStatus,
    pub reason: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

// ============================================================================
// Similarity seeds
// ============================================================================

/// How the listener interacted with a seed track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedKind {
    Selected,
    Played,
    Shuffled,
    Discarded,
    Skipped,
}

impl SeedKind {
    /// Divisor applied to a seed's distances; heavier seeds pull candidates closer.
    pub fn weight(self) -> f32 {
        match self {
            Self::Selected => 4.0,
            Self::Played => 2.0,
            Self::Shuffled => 1.0,
            Self::Discarded => 1.0 / 5.0,
            Self::Skipped => 1.0 / 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedSeed {
    pub track_id: TrackId,
    pub weight: f32,
}

impl WeightedSeed {
    pub fn new(track_id: TrackId, kind: SeedKind) -> Self {
        Self {
            track_id,
            weight: kind.weight(),
        }
    }

    pub fn unweighted(track_id: TrackId) -> Self {
        Self {
            track_id,
            weight: 1.0,
        }
    }
}
