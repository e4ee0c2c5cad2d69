// SPDX-License-Identifier: GPL-3.0-or-later

//! Leave-one-out nearest-neighbour check of how well distances follow labels
//! such as genre or album.

use std::collections::HashMap;
use std::sync::Arc;

use sonority_domain::TrackId;
use sonority_infrastructure::{FingerprintRepository, FingerprintStore};
use tracing::info;

use crate::error::SimilarityResult;
use crate::similarity::SimilarityService;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationReport {
    pub evaluated: usize,
    pub correct: usize,
    pub accuracy: f64,
}

/// For every labelled track in the store, check whether its nearest neighbour
/// shares its label. Tracks that are not stored, or have no usable neighbour,
/// are not counted.
pub async fn evaluate_nearest_neighbor(
    store: Arc<dyn FingerprintStore>,
    labels: &HashMap<TrackId, String>,
    page_size: usize,
) -> SimilarityResult<EvaluationReport> {
    let mut stored = store.all_track_ids().await?;
    stored.retain(|id| labels.contains_key(id));
    let service = SimilarityService::new(store, page_size);

    let mut evaluated = 0;
    let mut correct = 0;
    for track_id in stored {
        let nearest = service.similar_tracks(&[track_id], &[], 1, 0.0).await?;
        let Some(neighbor) = nearest.first() else {
            continue;
        };
        evaluated += 1;
        if labels.get(neighbor) == labels.get(&track_id) {
            correct += 1;
        }
    }

    let accuracy = if evaluated == 0 {
        0.0
    } else {
        correct as f64 / evaluated as f64
    };
    info!(target: "similarity", evaluated, correct, accuracy, "nearest-neighbour evaluation");
    Ok(EvaluationReport {
        evaluated,
        correct,
        accuracy,
    })
}
