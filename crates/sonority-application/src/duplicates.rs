// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory index of every stored model for duplicate detection.
//!
//! Loading materializes the whole store, so memory grows linearly with the
//! library. A single lookup compares one track against all others.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use sonority_domain::TrackId;
use sonority_fingerprint::{DistanceScratch, Scms};
use sonority_infrastructure::{FingerprintRepository, StoreError};
use tracing::{debug, info};

use crate::error::SimilarityResult;

/// Identical recordings land a hair below zero through rounding in the inverse.
const IDENTITY_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub track_id: TrackId,
    pub duplicates: Vec<TrackId>,
}

pub struct DuplicateIndex {
    ids: Vec<TrackId>,
    models: Vec<Scms>,
}

impl DuplicateIndex {
    /// Page through the whole store and keep every model in memory.
    pub async fn load<R>(store: &R, page_size: usize) -> SimilarityResult<Self>
    where
        R: FingerprintRepository + ?Sized,
    {
        let mut cursor = store.scan(&[]);
        let mut index = Self {
            ids: Vec::new(),
            models: Vec::new(),
        };
        loop {
            let page = store.next_page(&mut cursor, page_size).await?;
            if page.is_empty() {
                break;
            }
            index.ids.extend_from_slice(&page.ids);
            index.models.extend(page.models);
        }
        debug!(target: "similarity", tracks = index.len(), "loaded duplicate index");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn track_ids(&self) -> &[TrackId] {
        &self.ids
    }

    /// Every other track whose distance to `track_id` is at most `threshold`,
    /// in ascending id order.
    pub fn duplicates_of(&self, track_id: TrackId, threshold: f32) -> SimilarityResult<Vec<TrackId>> {
        let position = self
            .ids
            .binary_search(&track_id)
            .map_err(|_| StoreError::NotFound(track_id))?;
        let mut scratch = DistanceScratch::new(self.models[position].dim());
        self.matches(position, threshold, &mut scratch, |_| true)
    }

    /// Group the whole library. Each track belongs to at most one group; the
    /// lowest id of a group leads it. Stops between tracks once `cancel` is set
    /// and returns the groups found so far.
    pub fn duplicate_groups(
        &self,
        threshold: f32,
        cancel: &AtomicBool,
    ) -> SimilarityResult<Vec<DuplicateGroup>> {
        let mut claimed = HashSet::new();
        let mut groups = Vec::new();
        let mut scratch = match self.models.first() {
            Some(model) => DistanceScratch::new(model.dim()),
            None => return Ok(groups),
        };

        for (position, &track_id) in self.ids.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                info!(target: "similarity", checked = position, "duplicate sweep canceled");
                break;
            }
            if claimed.contains(&track_id) {
                continue;
            }
            let duplicates = self.matches(position, threshold, &mut scratch, |other| {
                other > track_id && !claimed.contains(&other)
            })?;
            if duplicates.is_empty() {
                continue;
            }
            claimed.extend(duplicates.iter().copied());
            groups.push(DuplicateGroup {
                track_id,
                duplicates,
            });
        }

        info!(target: "similarity", groups = groups.len(), "duplicate sweep finished");
        Ok(groups)
    }

    fn matches<F>(
        &self,
        position: usize,
        threshold: f32,
        scratch: &mut DistanceScratch,
        consider: F,
    ) -> SimilarityResult<Vec<TrackId>>
    where
        F: Fn(TrackId) -> bool,
    {
        let target = &self.models[position];
        let mut found = Vec::new();
        for (other, (&id, model)) in self.ids.iter().zip(&self.models).enumerate() {
            if other == position || !consider(id) {
                continue;
            }
            let distance = target.distance(model, scratch)?;
            if distance >= -IDENTITY_TOLERANCE && distance <= threshold {
                found.push(id);
            }
        }
        Ok(found)
    }
}
