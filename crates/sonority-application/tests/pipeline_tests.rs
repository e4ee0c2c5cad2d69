// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sonority_application::{Analyzer, LibraryAnalyzer, SimilarityError, SimilarityService};
use sonority_domain::{AnalysisState, AnalysisStatus, TrackId};
use sonority_fingerprint::{
    DecodeStatus, DecoderParams, FrameSelection, Matrix, Mfcc, MfccCoefficients, MfccParams,
    RawSpectrum, Scms, SpectralBridge, SpectralDecoder,
};
use sonority_infrastructure::{
    AnalysisLogRepository, FingerprintRepository, FingerprintStore, SqliteFingerprintStore,
};

// ============================================================================
// Fake decoder
// ============================================================================

const BINS: usize = 33;

fn params() -> MfccParams {
    MfccParams {
        sample_rate: 8000,
        window_size: 64,
        mel_bands: 8,
        cepstral_coefficients: 4,
    }
}

/// Behaviour is picked from the file stem:
/// `silent*` decodes to zeros, `corrupt*` fails, `stall*` blocks until
/// canceled, anything else yields a spectrum seeded from the name.
struct ScriptedDecoder {
    params: DecoderParams,
    canceled: AtomicBool,
    decodes: Mutex<Vec<PathBuf>>,
}

impl ScriptedDecoder {
    fn new() -> Self {
        let p = params();
        Self {
            params: DecoderParams {
                sample_rate: p.sample_rate,
                window_size: p.window_size,
                duration_secs: None,
            },
            canceled: AtomicBool::new(false),
            decodes: Mutex::new(Vec::new()),
        }
    }
}

fn seeded_spectrum(name: &str, frames: usize) -> RawSpectrum {
    let mut state = name
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    let rows: Vec<Vec<f32>> = (0..frames)
        .map(|_| {
            (0..BINS)
                .map(|_| {
                    state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    10.0 + (state >> 8) as f32 % 100_000.0
                })
                .collect()
        })
        .collect();
    RawSpectrum::from_frames(BINS, &rows).unwrap()
}

impl SpectralDecoder for ScriptedDecoder {
    fn params(&self) -> &DecoderParams {
        &self.params
    }

    fn decode(&self, path: &Path) -> DecodeStatus {
        self.decodes.lock().unwrap().push(path.to_path_buf());
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if name.starts_with("silent") {
            DecodeStatus::Ok(RawSpectrum::new(BINS, 60, vec![0.0; BINS * 60]).unwrap())
        } else if name.starts_with("corrupt") {
            DecodeStatus::Failed(format!("unsupported container: {}", name))
        } else if name.starts_with("stall") {
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline {
                if self.canceled.load(Ordering::SeqCst) {
                    return DecodeStatus::Canceled;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            DecodeStatus::Failed("stalled decode was never canceled".into())
        } else {
            DecodeStatus::Ok(seeded_spectrum(name, 120))
        }
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn reset_cancel(&self) {
        self.canceled.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct Harness {
    store: Arc<SqliteFingerprintStore>,
    decoder: Arc<ScriptedDecoder>,
    library: Arc<LibraryAnalyzer>,
    transitions: Arc<Mutex<Vec<(TrackId, AnalysisState)>>>,
}

async fn harness() -> Harness {
    let store = Arc::new(SqliteFingerprintStore::open("sqlite::memory:").await.unwrap());
    let decoder = Arc::new(ScriptedDecoder::new());
    let analyzer = Analyzer::new(
        SpectralBridge::new(decoder.clone(), FrameSelection::EnergyRanked),
        Mfcc::new(MfccCoefficients::generate(&params()).unwrap()),
    );
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = transitions.clone();
    let shared: Arc<dyn FingerprintStore> = store.clone();
    let library = LibraryAnalyzer::new(Arc::new(analyzer), shared).with_observer(Arc::new(
        move |track: TrackId, state: &AnalysisState| sink.lock().unwrap().push((track, state.clone())),
    ));
    Harness {
        store,
        decoder,
        library: Arc::new(library),
        transitions,
    }
}

fn track(id: i64, name: &str) -> (TrackId, PathBuf) {
    (TrackId(id), PathBuf::from(format!("/music/{}.flac", name)))
}

/// Unit-covariance model centred on `(x, y)`.
fn model_at(x: f32, y: f32) -> Scms {
    let cepstral = Matrix::from_vec(
        2,
        4,
        vec![x + 1.0, x + 1.0, x - 1.0, x - 1.0, y + 1.0, y - 1.0, y + 1.0, y - 1.0],
    )
    .unwrap();
    Scms::from_cepstral(&cepstral).unwrap()
}

async fn store_with(models: &[(i64, Scms)]) -> Arc<SqliteFingerprintStore> {
    let store = SqliteFingerprintStore::open("sqlite::memory:").await.unwrap();
    for (id, model) in models {
        store.put(TrackId(*id), model).await.unwrap();
    }
    Arc::new(store)
}

// ============================================================================
// Analyze and store
// ============================================================================

#[tokio::test]
async fn analyzed_track_walks_the_full_state_machine() {
    let h = harness().await;
    let (id, path) = track(1, "blue-in-green");

    let state = h.library.analyze_and_store(id, path).await.unwrap();
    assert_eq!(state, AnalysisState::Stored);
    assert_eq!(h.store.get(id).await.unwrap().dim(), 4);

    let seen: Vec<AnalysisState> = h
        .transitions
        .lock()
        .unwrap()
        .iter()
        .map(|(_, s)| s.clone())
        .collect();
    assert_eq!(
        seen,
        vec![
            AnalysisState::Pending,
            AnalysisState::Decoding,
            AnalysisState::Transforming,
            AnalysisState::ModelBuilding,
            AnalysisState::Stored,
        ]
    );

    let record = h.store.analysis_status(id).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Analyzed);
}

#[tokio::test]
async fn cancel_during_decode_returns_promptly_without_storing() {
    let h = harness().await;
    let library = h.library.clone();
    let (id, path) = track(5, "stall-long-take");

    let started = Instant::now();
    let task = tokio::spawn(async move { library.analyze_and_store(id, path).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.library.cancel();

    let state = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("analysis must stop after cancel")
        .unwrap()
        .unwrap();
    assert_eq!(state, AnalysisState::Canceled);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(h.store.count().await.unwrap(), 0);
    assert!(h.store.analysis_status(id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_as_decoding_starts_is_not_lost() {
    let h = harness().await;
    let library = h.library.clone();
    let (id, path) = track(6, "stall-at-once");

    let task = tokio::spawn(async move { library.analyze_and_store(id, path).await });
    let deadline = Instant::now() + Duration::from_secs(2);
    while !h
        .transitions
        .lock()
        .unwrap()
        .iter()
        .any(|(t, s)| *t == id && *s == AnalysisState::Decoding)
    {
        assert!(Instant::now() < deadline, "decoding never started");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    h.library.cancel();

    let state = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("a cancel issued right after decoding starts must reach the decoder")
        .unwrap()
        .unwrap();
    assert_eq!(state, AnalysisState::Canceled);
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn batch_skips_bad_tracks_and_keeps_going() {
    let h = harness().await;
    let report = h
        .library
        .analyze_library(vec![
            track(1, "so-what"),
            track(2, "silent-intro"),
            track(3, "corrupt-rip"),
            track(4, "freddie-freeloader"),
        ])
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert!(!report.canceled);
    let skipped: Vec<TrackId> = report.skipped.iter().map(|s| s.track_id).collect();
    assert_eq!(skipped, vec![TrackId(2), TrackId(3)]);
    assert!(report.skipped[1].reason.contains("unsupported container"));

    assert_eq!(h.store.count().await.unwrap(), 2);
    let silent = h.store.analysis_status(TrackId(2)).await.unwrap().unwrap();
    assert_eq!(silent.status, AnalysisStatus::Impossible);
    assert!(silent.reason.is_some());
}

#[tokio::test]
async fn canceled_batch_stops_before_the_remaining_tracks() {
    let h = harness().await;
    let library = h.library.clone();
    let task = tokio::spawn(async move {
        library
            .analyze_library(vec![track(1, "intro"), track(2, "stall-forever"), track(3, "outro")])
            .await
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.library.cancel();

    let report = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("batch must stop after cancel")
        .unwrap()
        .unwrap();
    assert!(report.canceled);
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.store.all_track_ids().await.unwrap(), vec![TrackId(1)]);
    let decoded = h.decoder.decodes.lock().unwrap().len();
    assert_eq!(decoded, 2);
}

#[tokio::test]
async fn unprocessed_tracks_only_are_analyzed() {
    let h = harness().await;
    h.library
        .analyze_library(vec![track(1, "first"), track(2, "corrupt")])
        .await
        .unwrap();
    h.decoder.decodes.lock().unwrap().clear();

    let report = h
        .library
        .analyze_unprocessed(vec![track(1, "first"), track(2, "corrupt"), track(3, "third")])
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(report.skipped.is_empty());
    assert_eq!(
        *h.decoder.decodes.lock().unwrap(),
        vec![PathBuf::from("/music/third.flac")]
    );
}

#[tokio::test]
async fn analyzed_library_can_be_ranked() {
    let h = harness().await;
    h.library
        .analyze_library(vec![track(1, "a"), track(2, "b"), track(3, "c"), track(4, "a")])
        .await
        .unwrap();

    let service = SimilarityService::new(h.store.clone(), 2);
    let ranked = service
        .ranked_tracks(&[sonority_domain::WeightedSeed::unweighted(TrackId(1))], &[], 3, 0.0)
        .await
        .unwrap();
    assert!(ranked.len() <= 3);
    assert!(ranked.iter().all(|r| r.track_id != TrackId(1)));
    assert!(ranked.windows(2).all(|w| w[0].distance <= w[1].distance));
}

// ============================================================================
// Similarity
// ============================================================================

#[tokio::test]
async fn identical_pair_ranks_before_distant_track() {
    let store = store_with(&[
        (1, model_at(0.0, 0.0)),
        (2, model_at(0.0, 0.0)),
        (3, model_at(10.0, 10.0)),
    ])
    .await;
    let service = SimilarityService::new(store, 100);

    let ids = service
        .similar_tracks(&[TrackId(1)], &[], 2, 0.0)
        .await
        .unwrap();
    assert_eq!(ids, vec![TrackId(2), TrackId(3)]);
}

#[tokio::test]
async fn limit_keeps_the_k_closest_in_order() {
    let models: Vec<(i64, Scms)> = (1..=12).map(|i| (i, model_at(i as f32 - 1.0, 0.0))).collect();
    let service = SimilarityService::new(store_with(&models).await, 5);

    let ranked = service
        .ranked_tracks(&[sonority_domain::WeightedSeed::unweighted(TrackId(1))], &[], 4, 0.0)
        .await
        .unwrap();
    let ids: Vec<TrackId> = ranked.iter().map(|r| r.track_id).collect();
    assert_eq!(ids, vec![TrackId(2), TrackId(3), TrackId(4), TrackId(5)]);
    assert!(ranked.windows(2).all(|w| w[0].distance < w[1].distance));
}

#[tokio::test]
async fn excluded_ids_never_come_back() {
    let models: Vec<(i64, Scms)> = (1..=8).map(|i| (i, model_at(i as f32, 1.0))).collect();
    let service = SimilarityService::new(store_with(&models).await, 3);
    let exclude = [TrackId(2), TrackId(5), TrackId(99)];

    let ids = service
        .similar_tracks(&[TrackId(1), TrackId(8)], &exclude, 100, 0.0)
        .await
        .unwrap();
    let returned: HashSet<TrackId> = ids.iter().copied().collect();
    assert_eq!(ids.len(), 4);
    for forbidden in [TrackId(1), TrackId(2), TrackId(5), TrackId(8)] {
        assert!(!returned.contains(&forbidden));
    }
}

#[tokio::test]
async fn candidates_with_a_negative_seed_distance_are_dropped() {
    let faulty =
        Scms::from_parts(vec![0.0, 0.0], vec![0.25, 0.0, 0.25], vec![1.0, 0.0, 1.0]).unwrap();
    let store = store_with(&[
        (1, model_at(0.0, 0.0)),
        (2, faulty),
        (3, model_at(2.0, 0.0)),
    ])
    .await;
    let service = SimilarityService::new(store, 10);

    let ids = service
        .similar_tracks(&[TrackId(1)], &[], 10, 0.0)
        .await
        .unwrap();
    assert_eq!(ids, vec![TrackId(3)]);
}

#[tokio::test]
async fn mixed_dimensions_are_a_hard_error() {
    let three_dim = Scms::from_parts(
        vec![0.0; 3],
        vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
        vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
    )
    .unwrap();
    let store = store_with(&[(1, model_at(0.0, 0.0)), (2, three_dim)]).await;
    let service = SimilarityService::new(store, 10);

    let err = service
        .similar_tracks(&[TrackId(1)], &[], 10, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, SimilarityError::Fingerprint(_)));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn duplicates_preload_the_store() {
    let store = store_with(&[
        (1, model_at(0.0, 0.0)),
        (2, model_at(0.0, 0.0)),
        (3, model_at(0.5, 0.5)),
        (4, model_at(4.0, 0.0)),
    ])
    .await;
    let service = SimilarityService::new(store, 2);

    let found = service.duplicates(TrackId(1), 1.0).await.unwrap();
    assert_eq!(found, vec![TrackId(2), TrackId(3)]);
}
