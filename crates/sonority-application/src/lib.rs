// SPDX-License-Identifier: GPL-3.0-or-later
pub mod analysis;
pub mod duplicates;
pub mod error;
pub mod evaluation;
pub mod library;
pub mod similarity;
pub mod telemetry;

pub use analysis::Analyzer;
pub use duplicates::{DuplicateGroup, DuplicateIndex};
pub use error::{SimilarityError, SimilarityResult};
pub use evaluation::{evaluate_nearest_neighbor, EvaluationReport};
pub use library::{BatchReport, LibraryAnalyzer, SkippedTrack, StateObserver};
pub use similarity::{RankedTrack, SimilarityService};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sonority_config::AppConfig;
use sonority_domain::{AnalysisState, TrackId, WeightedSeed};
use sonority_infrastructure::{FingerprintStore, SqliteFingerprintStore};
use tracing::info;

/// The engine as a host application sees it: one store, one analyzer, and the
/// services built on top of them.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<SqliteFingerprintStore>,
    pub library: Arc<LibraryAnalyzer>,
    pub similarity: Arc<SimilarityService>,
}

impl AppState {
    /// Validate `config`, open the configured store and wire the analysis pipeline.
    pub async fn initialize(config: AppConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        let store = Arc::new(
            sonority_infrastructure::open_store(&config)
                .await
                .context("failed to open fingerprint store")?,
        );
        let analyzer = Analyzer::from_config(&config.analysis)
            .context("failed to build analysis pipeline")?;
        Ok(Self::with_parts(config, store, Arc::new(analyzer)))
    }

    pub fn with_parts(
        config: AppConfig,
        store: Arc<SqliteFingerprintStore>,
        analyzer: Arc<Analyzer>,
    ) -> Self {
        let shared: Arc<dyn FingerprintStore> = store.clone();
        Self {
            library: Arc::new(LibraryAnalyzer::new(analyzer, shared.clone())),
            similarity: Arc::new(SimilarityService::new(
                shared,
                config.similarity.page_size,
            )),
            store,
            config,
        }
    }

    pub fn on_start(&self) {
        info!(
            target: "application",
            was_reset = self.store.was_reset(),
            "application state initialized"
        );
    }

    pub async fn analyze(&self, track_id: TrackId, path: PathBuf) -> SimilarityResult<AnalysisState> {
        self.library.analyze_and_store(track_id, path).await
    }

    pub fn cancel_analyze(&self) {
        self.library.cancel();
    }

    /// Playlist for the given seeds using the configured limit and ceiling.
    pub async fn playlist(
        &self,
        seeds: &[WeightedSeed],
        exclude: &[TrackId],
    ) -> SimilarityResult<Vec<TrackId>> {
        let settings = &self.config.similarity;
        self.similarity
            .similar_tracks_weighted(seeds, exclude, settings.playlist_limit, settings.ceiling)
            .await
    }

    pub async fn duplicates(&self, track_id: TrackId) -> SimilarityResult<Vec<TrackId>> {
        self.similarity
            .duplicates(track_id, self.config.similarity.duplicate_threshold)
            .await
    }
}
