// SPDX-License-Identifier: GPL-3.0-or-later

//! Single-track analysis: decode, cepstral transform, timbre model.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sonority_config::{AnalysisConfig, FrameSelectionConfig};
use sonority_domain::AnalysisState;
use sonority_fingerprint::{
    DecoderParams, FingerprintError, FrameSelection, Mfcc, MfccCoefficients, MfccParams, Result,
    Scms, SpectralBridge, SymphoniaDecoder,
};
use tracing::{debug, info, instrument};

/// Runs the decode, MFCC and model stages for one file at a time.
///
/// `analyze` blocks for the duration of the decode; call it from a worker
/// thread. [`Analyzer::cancel`] aborts an in-flight call with
/// [`FingerprintError::DecodeCanceled`].
pub struct Analyzer {
    bridge: SpectralBridge,
    mfcc: Mfcc,
    canceled: AtomicBool,
}

impl Analyzer {
    pub fn new(bridge: SpectralBridge, mfcc: Mfcc) -> Self {
        Self {
            bridge,
            mfcc,
            canceled: AtomicBool::new(false),
        }
    }

    /// Wire the native decoder and coefficient matrices from configuration.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let (duration_secs, selection) = match config.frame_selection {
            FrameSelectionConfig::EnergyRanked => (None, FrameSelection::EnergyRanked),
            FrameSelectionConfig::CenteredWindow {
                duration_secs,
                frame_budget,
            } => {
                if frame_budget == 0 {
                    return Err(FingerprintError::InvalidParameters(
                        "centered window needs a positive frame budget".into(),
                    ));
                }
                (
                    Some(duration_secs),
                    FrameSelection::CenteredWindow { frame_budget },
                )
            }
        };

        let decoder = SymphoniaDecoder::open(DecoderParams {
            sample_rate: config.sample_rate,
            window_size: config.window_size,
            duration_secs,
        })?;

        let params = MfccParams {
            sample_rate: config.sample_rate,
            window_size: config.window_size,
            mel_bands: config.mel_bands,
            cepstral_coefficients: config.cepstral_coefficients,
        };
        let coefficients = match (&config.filterbank_path, &config.dct_path) {
            (Some(filterbank), Some(dct)) => {
                info!(
                    target: "analysis",
                    filterbank = %filterbank.display(),
                    dct = %dct.display(),
                    "loading packaged coefficient matrices"
                );
                MfccCoefficients::load(filterbank, dct, &params)?
            }
            (None, None) => MfccCoefficients::generate(&params)?,
            _ => {
                return Err(FingerprintError::InvalidParameters(
                    "filterbank_path and dct_path must be configured together".into(),
                ))
            }
        };

        Ok(Self::new(
            SpectralBridge::new(Arc::new(decoder), selection),
            Mfcc::new(coefficients),
        ))
    }

    pub fn bridge(&self) -> &SpectralBridge {
        &self.bridge
    }

    /// Forget earlier cancels and analyze `path`.
    pub fn analyze(&self, path: &Path) -> Result<Scms> {
        self.reset_cancel();
        self.analyze_observed(path, |_| {})
    }

    /// Analyze `path`, reporting each stage as it starts.
    ///
    /// Does not clear an earlier cancel: one that arrived since the last
    /// [`Analyzer::reset_cancel`] aborts the call before decoding starts.
    #[instrument(target = "analysis", skip(self, observer), fields(path = %path.display()))]
    pub fn analyze_observed<F>(&self, path: &Path, mut observer: F) -> Result<Scms>
    where
        F: FnMut(&AnalysisState),
    {
        self.check_canceled()?;

        observer(&AnalysisState::Decoding);
        let spectral = self.bridge.decode(path)?;
        self.check_canceled()?;

        observer(&AnalysisState::Transforming);
        let cepstral = self.mfcc.apply(&spectral)?;
        self.check_canceled()?;

        observer(&AnalysisState::ModelBuilding);
        let model = Scms::from_cepstral(&cepstral)?;

        debug!(
            target: "analysis",
            frames = spectral.cols(),
            dim = model.dim(),
            "track analyzed"
        );
        Ok(model)
    }

    /// Abort the analysis currently running, if any.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.bridge.cancel();
    }

    /// Clear a pending cancel on the analyzer and its decoder.
    pub fn reset_cancel(&self) {
        self.canceled.store(false, Ordering::SeqCst);
        self.bridge.reset_cancel();
    }

    /// Whether a cancel arrived since the last [`Analyzer::reset_cancel`].
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn check_canceled(&self) -> Result<()> {
        if self.is_canceled() {
            Err(FingerprintError::DecodeCanceled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonority_fingerprint::{DecodeStatus, RawSpectrum, SpectralDecoder};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Hands back the same spectrum for every path unless canceled.
    struct FixedDecoder {
        params: DecoderParams,
        spectrum: RawSpectrum,
        canceled: AtomicBool,
    }

    impl SpectralDecoder for FixedDecoder {
        fn params(&self) -> &DecoderParams {
            &self.params
        }

        fn decode(&self, _path: &Path) -> DecodeStatus {
            if self.canceled.load(Ordering::SeqCst) {
                DecodeStatus::Canceled
            } else {
                DecodeStatus::Ok(self.spectrum.clone())
            }
        }

        fn cancel(&self) {
            self.canceled.store(true, Ordering::SeqCst);
        }

        fn reset_cancel(&self) {
            self.canceled.store(false, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn small_params() -> MfccParams {
        MfccParams {
            sample_rate: 8000,
            window_size: 64,
            mel_bands: 8,
            cepstral_coefficients: 4,
        }
    }

    fn varied_spectrum(bins: usize, frames: usize) -> RawSpectrum {
        let mut state = 0x2545_f491u32;
        let rows: Vec<Vec<f32>> = (0..frames)
            .map(|_| {
                (0..bins)
                    .map(|_| {
                        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                        10.0 + (state >> 8) as f32 % 100_000.0
                    })
                    .collect()
            })
            .collect();
        RawSpectrum::from_frames(bins, &rows).unwrap()
    }

    fn analyzer(spectrum: RawSpectrum) -> Analyzer {
        let params = small_params();
        let decoder = FixedDecoder {
            params: DecoderParams {
                sample_rate: params.sample_rate,
                window_size: params.window_size,
                duration_secs: None,
            },
            spectrum,
            canceled: AtomicBool::new(false),
        };
        Analyzer::new(
            SpectralBridge::new(Arc::new(decoder), FrameSelection::EnergyRanked),
            Mfcc::new(MfccCoefficients::generate(&params).unwrap()),
        )
    }

    #[test]
    fn stages_run_in_order() {
        let analyzer = analyzer(varied_spectrum(33, 120));
        let seen = Mutex::new(Vec::new());
        let model = analyzer
            .analyze_observed(Path::new("a.wav"), |s| seen.lock().unwrap().push(s.clone()))
            .expect("analysis succeeds");
        assert_eq!(model.dim(), 4);
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                AnalysisState::Decoding,
                AnalysisState::Transforming,
                AnalysisState::ModelBuilding
            ]
        );
    }

    #[test]
    fn silent_track_cannot_be_modelled() {
        let silent = RawSpectrum::new(33, 40, vec![0.0; 33 * 40]).unwrap();
        let err = analyzer(silent).analyze(Path::new("silence.wav")).unwrap_err();
        assert!(matches!(err, FingerprintError::ModelImpossible(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn wrong_bin_count_is_fatal() {
        let err = analyzer(varied_spectrum(17, 60))
            .analyze(Path::new("a.wav"))
            .unwrap_err();
        assert!(matches!(err, FingerprintError::TransformFailed(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn cancel_during_a_stage_aborts_before_the_next() {
        let analyzer = analyzer(varied_spectrum(33, 120));
        let mut stages = 0;
        let result = analyzer.analyze_observed(Path::new("a.wav"), |state| {
            stages += 1;
            if *state == AnalysisState::Decoding {
                analyzer.cancel();
            }
        });
        assert!(matches!(result, Err(FingerprintError::DecodeCanceled)));
        assert_eq!(stages, 1);
    }

    #[test]
    fn new_analysis_clears_a_stale_cancel() {
        let analyzer = analyzer(varied_spectrum(33, 120));
        analyzer.cancel();
        assert!(analyzer.is_canceled());
        assert!(analyzer.analyze(Path::new("a.wav")).is_ok());
        assert!(!analyzer.is_canceled());
    }

    #[test]
    fn cancel_between_reset_and_start_is_not_lost() {
        let analyzer = analyzer(varied_spectrum(33, 120));
        analyzer.reset_cancel();
        analyzer.cancel();

        let mut stages = Vec::new();
        let result = analyzer.analyze_observed(Path::new("a.wav"), |s| stages.push(s.clone()));
        assert!(matches!(result, Err(FingerprintError::DecodeCanceled)));
        assert!(stages.is_empty());
        assert!(matches!(
            analyzer.bridge().decode(Path::new("a.wav")),
            Err(FingerprintError::DecodeCanceled)
        ));
    }

    #[test]
    fn zero_frame_budget_is_rejected() {
        let config = AnalysisConfig {
            frame_selection: FrameSelectionConfig::CenteredWindow {
                duration_secs: 30,
                frame_budget: 0,
            },
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            Analyzer::from_config(&config),
            Err(FingerprintError::InvalidParameters(_))
        ));
    }

    #[test]
    fn half_configured_coefficient_paths_are_rejected() {
        let config = AnalysisConfig {
            filterbank_path: Some(PathBuf::from("filterbank.bin")),
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            Analyzer::from_config(&config),
            Err(FingerprintError::InvalidParameters(_))
        ));
    }

    #[test]
    fn default_configuration_builds_an_analyzer() {
        let analyzer = Analyzer::from_config(&AnalysisConfig::default()).unwrap();
        assert_eq!(analyzer.bridge().selection(), FrameSelection::EnergyRanked);
        assert_eq!(analyzer.bridge().decoder().params().bins(), 257);
    }
}
