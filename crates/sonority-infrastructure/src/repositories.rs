// SPDX-License-Identifier: GPL-3.0-or-later
use sonority_domain::{AnalysisRecord, AnalysisStatus, TrackId};
use sonority_fingerprint::Scms;

use crate::Result;

// ============================================================================
// Scanning
// ============================================================================

/// Position of a paged scan over stored fingerprints.
///
/// Pages are delivered in ascending track id order; the cursor remembers the
/// last id handed out, so a row is never delivered twice even when records are
/// written between pages.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    exclude: Vec<TrackId>,
    last: Option<TrackId>,
    closed: bool,
}

impl ScanCursor {
    pub fn new(exclude: &[TrackId]) -> Self {
        let mut exclude = exclude.to_vec();
        exclude.sort_unstable();
        exclude.dedup();
        Self {
            exclude,
            last: None,
            closed: false,
        }
    }

    pub fn excluded(&self) -> &[TrackId] {
        &self.exclude
    }

    /// Highest id the scan has moved past, delivered or excluded.
    pub fn position(&self) -> Option<TrackId> {
        self.last
    }

    pub fn is_excluded(&self, id: TrackId) -> bool {
        self.exclude.binary_search(&id).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Move the scan position past `id`.
    pub fn skip_past(&mut self, id: TrackId) {
        self.last = Some(id);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub ids: Vec<TrackId>,
    pub models: Vec<Scms>,
}

impl ScanPage {
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_pairs(self) -> impl Iterator<Item = (TrackId, Scms)> {
        self.ids.into_iter().zip(self.models)
    }
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Durable track id -> timbre model storage.
#[async_trait::async_trait]
pub trait FingerprintRepository: Send + Sync {
    /// Insert or replace the model for a track.
    async fn put(&self, track_id: TrackId, model: &Scms) -> Result<()>;
    async fn get(&self, track_id: TrackId) -> Result<Scms>;
    /// Delete a track's model and analysis history. Absent tracks are ignored.
    async fn remove(&self, track_id: TrackId) -> Result<()>;
    fn scan(&self, exclude: &[TrackId]) -> ScanCursor;
    async fn next_page(&self, cursor: &mut ScanCursor, page_size: usize) -> Result<ScanPage>;
    async fn all_track_ids(&self) -> Result<Vec<TrackId>>;
    async fn count(&self) -> Result<u64>;
    /// Delete every stored model and analysis record.
    async fn reset(&self) -> Result<()>;
}

/// Outcome history of analysis attempts.
#[async_trait::async_trait]
pub trait AnalysisLogRepository: Send + Sync {
    async fn record_analysis(
        &self,
        track_id: TrackId,
        status: AnalysisStatus,
        reason: Option<&str>,
    ) -> Result<()>;
    async fn analysis_status(&self, track_id: TrackId) -> Result<Option<AnalysisRecord>>;
    /// Candidates with no recorded attempt, in input order.
    async fn unprocessed(&self, candidates: &[TrackId]) -> Result<Vec<TrackId>>;
}

/// Everything the analysis and similarity services need from storage.
pub trait FingerprintStore: FingerprintRepository + AnalysisLogRepository {}

impl<T: FingerprintRepository + AnalysisLogRepository> FingerprintStore for T {}
