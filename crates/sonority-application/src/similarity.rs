// SPDX-License-Identifier: GPL-3.0-or-later

//! Playlist ranking against one or more seed tracks.

use std::sync::Arc;

use sonority_domain::{TrackId, WeightedSeed};
use sonority_fingerprint::{DistanceScratch, Scms};
use sonority_infrastructure::{FingerprintRepository, FingerprintStore};
use tracing::{debug, info};

use crate::duplicates::DuplicateIndex;
use crate::error::{SimilarityError, SimilarityResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedTrack {
    pub track_id: TrackId,
    /// Weighted mean distance to the seeds.
    pub distance: f32,
}

pub struct SimilarityService {
    store: Arc<dyn FingerprintStore>,
    page_size: usize,
}

impl SimilarityService {
    pub fn new(store: Arc<dyn FingerprintStore>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        &self.store
    }

    /// Ids of the `limit` candidates closest to the seeds, closest first.
    ///
    /// Seeds never appear in the result. A `ceiling` above zero drops every
    /// candidate whose mean distance is not strictly greater than it.
    pub async fn similar_tracks(
        &self,
        seeds: &[TrackId],
        exclude: &[TrackId],
        limit: usize,
        ceiling: f32,
    ) -> SimilarityResult<Vec<TrackId>> {
        let seeds: Vec<WeightedSeed> = seeds.iter().copied().map(WeightedSeed::unweighted).collect();
        self.similar_tracks_weighted(&seeds, exclude, limit, ceiling)
            .await
    }

    /// [`SimilarityService::similar_tracks`] with per-seed weights; heavier
    /// seeds pull the playlist towards themselves.
    pub async fn similar_tracks_weighted(
        &self,
        seeds: &[WeightedSeed],
        exclude: &[TrackId],
        limit: usize,
        ceiling: f32,
    ) -> SimilarityResult<Vec<TrackId>> {
        Ok(self
            .ranked_tracks(seeds, exclude, limit, ceiling)
            .await?
            .into_iter()
            .map(|ranked| ranked.track_id)
            .collect())
    }

    /// Ranked candidates together with their aggregate distances.
    pub async fn ranked_tracks(
        &self,
        seeds: &[WeightedSeed],
        exclude: &[TrackId],
        limit: usize,
        ceiling: f32,
    ) -> SimilarityResult<Vec<RankedTrack>> {
        if seeds.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if let Some(bad) = seeds
            .iter()
            .find(|seed| !seed.weight.is_finite() || seed.weight <= 0.0)
        {
            return Err(SimilarityError::InvalidWeight(bad.weight));
        }

        let mut seed_models = Vec::with_capacity(seeds.len());
        for seed in seeds {
            seed_models.push((self.store.get(seed.track_id).await?, seed.weight));
        }
        let dim = seed_models[0].0.dim();
        let mut scratch = DistanceScratch::new(dim);

        let mut excluded: Vec<TrackId> = exclude.to_vec();
        excluded.extend(seeds.iter().map(|seed| seed.track_id));
        let mut cursor = self.store.scan(&excluded);

        let mut ranked = Vec::new();
        let mut scanned = 0usize;
        let mut unusable = 0usize;
        loop {
            let page = self.store.next_page(&mut cursor, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            scanned += page.count();
            for (track_id, candidate) in page.into_pairs() {
                match aggregate_distance(&candidate, &seed_models, &mut scratch)? {
                    Some(distance) if ceiling <= 0.0 || distance > ceiling => {
                        ranked.push(RankedTrack { track_id, distance })
                    }
                    Some(_) => {}
                    None => unusable += 1,
                }
            }
        }

        ranked.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.track_id.cmp(&b.track_id))
        });
        ranked.truncate(limit);

        info!(
            target: "similarity",
            seeds = seeds.len(),
            scanned,
            unusable,
            returned = ranked.len(),
            "ranked similar tracks"
        );
        Ok(ranked)
    }

    /// Tracks within `threshold` of `track_id`. Preloads the whole store; O(n) per call.
    pub async fn duplicates(
        &self,
        track_id: TrackId,
        threshold: f32,
    ) -> SimilarityResult<Vec<TrackId>> {
        let index = DuplicateIndex::load(self.store.as_ref(), self.page_size).await?;
        let found = index.duplicates_of(track_id, threshold)?;
        debug!(target: "similarity", %track_id, found = found.len(), "duplicate lookup");
        Ok(found)
    }
}

/// Weighted mean distance from `candidate` to every seed, or `None` when any
/// single distance is negative.
fn aggregate_distance(
    candidate: &Scms,
    seeds: &[(Scms, f32)],
    scratch: &mut DistanceScratch,
) -> SimilarityResult<Option<f32>> {
    let mut sum = 0.0f64;
    for (seed, weight) in seeds {
        let distance = seed.distance(candidate, scratch)?;
        if distance < 0.0 {
            return Ok(None);
        }
        sum += distance as f64 / *weight as f64;
    }
    Ok(Some((sum / seeds.len() as f64) as f32))
}
