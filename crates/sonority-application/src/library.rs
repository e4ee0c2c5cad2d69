// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sonority_domain::{AnalysisState, AnalysisStatus, TrackId};
use sonority_fingerprint::FingerprintError;
use sonority_infrastructure::{AnalysisLogRepository, FingerprintRepository, FingerprintStore};
use tracing::{debug, info, warn};

use crate::analysis::Analyzer;
use crate::error::SimilarityResult;

/// Receives every state transition of the analyze-and-store pipeline.
pub type StateObserver = Arc<dyn Fn(TrackId, &AnalysisState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTrack {
    pub track_id: TrackId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub skipped: Vec<SkippedTrack>,
    /// The batch stopped early because of a cancel.
    pub canceled: bool,
}

/// Analyzes tracks and persists their models, one track at a time.
pub struct LibraryAnalyzer {
    analyzer: Arc<Analyzer>,
    store: Arc<dyn FingerprintStore>,
    observer: Option<StateObserver>,
    canceled: AtomicBool,
}

impl LibraryAnalyzer {
    pub fn new(analyzer: Arc<Analyzer>, store: Arc<dyn FingerprintStore>) -> Self {
        Self {
            analyzer,
            store,
            observer: None,
            canceled: AtomicBool::new(false),
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    /// Stop the current batch and abort the track being decoded.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.analyzer.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Analyze one track and store its model. Returns the terminal state.
    ///
    /// Per-track failures come back as [`AnalysisState::Failed`]; only errors
    /// that point at broken wiring or storage are returned as `Err`.
    pub async fn analyze_and_store(
        &self,
        track_id: TrackId,
        path: PathBuf,
    ) -> SimilarityResult<AnalysisState> {
        self.canceled.store(false, Ordering::SeqCst);
        self.run_track(track_id, path).await
    }

    /// Analyze every track in order, skipping the ones that cannot be modelled.
    pub async fn analyze_library(
        &self,
        tracks: Vec<(TrackId, PathBuf)>,
    ) -> SimilarityResult<BatchReport> {
        self.canceled.store(false, Ordering::SeqCst);
        let total = tracks.len();
        info!(target: "analysis", total, "starting library analysis");

        let mut report = BatchReport::default();
        for (track_id, path) in tracks {
            if self.is_canceled() {
                report.canceled = true;
                break;
            }
            match self.run_track(track_id, path).await? {
                AnalysisState::Stored => report.succeeded += 1,
                AnalysisState::Failed(reason) => {
                    report.skipped.push(SkippedTrack { track_id, reason })
                }
                AnalysisState::Canceled => {
                    report.canceled = true;
                    break;
                }
                other => debug!(target: "analysis", %track_id, state = %other, "unexpected final state"),
            }
        }

        info!(
            target: "analysis",
            total,
            succeeded = report.succeeded,
            skipped = report.skipped.len(),
            canceled = report.canceled,
            "library analysis finished"
        );
        Ok(report)
    }

    /// Analyze only the tracks with no recorded attempt.
    pub async fn analyze_unprocessed(
        &self,
        tracks: Vec<(TrackId, PathBuf)>,
    ) -> SimilarityResult<BatchReport> {
        let ids: Vec<TrackId> = tracks.iter().map(|(id, _)| *id).collect();
        let pending = self.store.unprocessed(&ids).await?;
        debug!(
            target: "analysis",
            candidates = ids.len(),
            pending = pending.len(),
            "filtered already analyzed tracks"
        );
        let tracks = tracks
            .into_iter()
            .filter(|(id, _)| pending.contains(id))
            .collect();
        self.analyze_library(tracks).await
    }

    async fn run_track(&self, track_id: TrackId, path: PathBuf) -> SimilarityResult<AnalysisState> {
        self.notify(track_id, &AnalysisState::Pending);
        // `cancel` raises the library flag first, so it is checked after the
        // analyzer reset and nothing issued in between is dropped.
        self.analyzer.reset_cancel();
        if self.is_canceled() {
            return Ok(self.finish(track_id, AnalysisState::Canceled));
        }

        let analyzer = Arc::clone(&self.analyzer);
        let observer = self.observer.clone();
        let analyzed = tokio::task::spawn_blocking(move || {
            analyzer.analyze_observed(&path, |state| {
                if let Some(observer) = &observer {
                    observer(track_id, state);
                }
            })
        })
        .await?;

        let model = match analyzed {
            Ok(model) => model,
            Err(FingerprintError::DecodeCanceled) => {
                return Ok(self.finish(track_id, AnalysisState::Canceled))
            }
            Err(err) if err.is_recoverable() => {
                let reason = err.to_string();
                warn!(target: "analysis", %track_id, error = %reason, "skipping track");
                self.store
                    .record_analysis(track_id, AnalysisStatus::Impossible, Some(&reason))
                    .await?;
                return Ok(self.finish(track_id, AnalysisState::Failed(reason)));
            }
            Err(err) => {
                self.notify(track_id, &AnalysisState::Failed(err.to_string()));
                return Err(err.into());
            }
        };

        // A cancel that lands after the decode finished must still keep the model out of the store.
        if self.is_canceled() || self.analyzer.is_canceled() {
            return Ok(self.finish(track_id, AnalysisState::Canceled));
        }

        if let Err(err) = self.store.put(track_id, &model).await {
            let reason = err.to_string();
            warn!(target: "analysis", %track_id, error = %reason, "failed to store fingerprint");
            if let Err(log_err) = self
                .store
                .record_analysis(track_id, AnalysisStatus::StoreFailure, Some(&reason))
                .await
            {
                warn!(target: "analysis", %track_id, error = %log_err, "failed to record store failure");
            }
            return Ok(self.finish(track_id, AnalysisState::Failed(reason)));
        }

        self.store
            .record_analysis(track_id, AnalysisStatus::Analyzed, None)
            .await?;
        Ok(self.finish(track_id, AnalysisState::Stored))
    }

    fn finish(&self, track_id: TrackId, state: AnalysisState) -> AnalysisState {
        debug!(target: "analysis", %track_id, %state, "track finished");
        self.notify(track_id, &state);
        state
    }

    fn notify(&self, track_id: TrackId, state: &AnalysisState) {
        if let Some(observer) = &self.observer {
            observer(track_id, state);
        }
    }
}
