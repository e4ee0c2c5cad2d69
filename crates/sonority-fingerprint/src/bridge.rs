// SPDX-License-Identifier: GPL-3.0-or-later

//! Shapes raw decoder output into the spectral matrix fed to the cepstral transform.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::decoder::{DecodeStatus, RawSpectrum, SpectralDecoder};
use crate::matrix::Matrix;
use crate::{FingerprintError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSelection {
    /// Keep the louder half of all frames, ordered by ascending energy.
    EnergyRanked,
    /// Keep at most `frame_budget` contiguous frames around the middle of the decode.
    CenteredWindow { frame_budget: usize },
}

pub struct SpectralBridge {
    decoder: Arc<dyn SpectralDecoder>,
    selection: FrameSelection,
}

impl SpectralBridge {
    pub fn new(decoder: Arc<dyn SpectralDecoder>, selection: FrameSelection) -> Self {
        Self { decoder, selection }
    }

    pub fn decoder(&self) -> &dyn SpectralDecoder {
        self.decoder.as_ref()
    }

    pub fn selection(&self) -> FrameSelection {
        self.selection
    }

    /// Decode `path` into a `[bins, selected_frames]` matrix.
    pub fn decode(&self, path: &Path) -> Result<Matrix> {
        match self.decoder.decode(path) {
            DecodeStatus::Ok(raw) => self.shape(raw),
            DecodeStatus::Failed(reason) => Err(FingerprintError::Decode(reason)),
            DecodeStatus::Canceled => Err(FingerprintError::DecodeCanceled),
        }
    }

    pub fn cancel(&self) {
        self.decoder.cancel();
    }

    pub fn reset_cancel(&self) {
        self.decoder.reset_cancel();
    }

    fn shape(&self, raw: RawSpectrum) -> Result<Matrix> {
        let (bins, frames) = (raw.bins(), raw.frames());
        if bins == 0 || frames == 0 {
            return Err(FingerprintError::Decode(format!(
                "decoder produced an empty spectrum ({} bins, {} frames)",
                bins, frames
            )));
        }
        let spectral = Matrix::from_vec(bins, frames, raw.into_data())
            .map_err(FingerprintError::TransformFailed)?;
        let selected = select_frames(&spectral, self.selection);
        debug!(
            decoder = self.decoder.name(),
            decoded = frames,
            selected = selected.cols(),
            "selected spectral frames"
        );
        Ok(selected)
    }
}

/// Apply a frame-selection policy to a `[bins, frames]` matrix.
pub fn select_frames(spectral: &Matrix, selection: FrameSelection) -> Matrix {
    match selection {
        FrameSelection::CenteredWindow { frame_budget } => {
            let frames = spectral.cols();
            if frames <= frame_budget {
                return spectral.clone();
            }
            let start = frames / 2 - frame_budget / 2;
            let columns: Vec<usize> = (start..start + frame_budget).collect();
            spectral.select_columns(&columns)
        }
        FrameSelection::EnergyRanked => spectral.select_columns(&loudest_half(spectral)),
    }
}

/// Frame indices of the louder half, quietest first.
fn loudest_half(spectral: &Matrix) -> Vec<usize> {
    let frames = spectral.cols();
    let mut energy = vec![0.0f64; frames];
    for bin in 0..spectral.rows() {
        for (e, &v) in energy.iter_mut().zip(spectral.row(bin)) {
            *e += v as f64;
        }
    }
    let mut order: Vec<usize> = (0..frames).collect();
    order.sort_by(|&a, &b| energy[a].total_cmp(&energy[b]));
    let keep = (frames / 2).max(1).min(frames);
    order.split_off(frames - keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderParams;

    struct ScriptedDecoder {
        params: DecoderParams,
        status: DecodeStatus,
    }

    impl SpectralDecoder for ScriptedDecoder {
        fn params(&self) -> &DecoderParams {
            &self.params
        }

        fn decode(&self, _path: &Path) -> DecodeStatus {
            self.status.clone()
        }

        fn cancel(&self) {}

        fn reset_cancel(&self) {}

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn bridge(status: DecodeStatus, selection: FrameSelection) -> SpectralBridge {
        let decoder = ScriptedDecoder {
            params: DecoderParams {
                sample_rate: 11025,
                window_size: 4,
                duration_secs: None,
            },
            status,
        };
        SpectralBridge::new(Arc::new(decoder), selection)
    }

    /// One bin per row; frame `f` has energy `energies[f]` spread over three bins.
    fn spectrum(energies: &[f32]) -> RawSpectrum {
        let frames: Vec<Vec<f32>> = energies.iter().map(|&e| vec![e / 3.0; 3]).collect();
        RawSpectrum::from_frames(3, &frames).unwrap()
    }

    #[test]
    fn centered_window_keeps_middle_slice() {
        let m = Matrix::from_fn(1, 10, |_, c| c as f32);
        let s = select_frames(&m, FrameSelection::CenteredWindow { frame_budget: 4 });
        assert_eq!(s.as_slice(), &[3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn centered_window_keeps_short_tracks_whole() {
        let m = Matrix::from_fn(2, 3, |r, c| (r * 10 + c) as f32);
        let s = select_frames(&m, FrameSelection::CenteredWindow { frame_budget: 8 });
        assert_eq!(s, m);
    }

    #[test]
    fn energy_ranking_keeps_loud_half_in_ascending_order() {
        let bridge = bridge(
            DecodeStatus::Ok(spectrum(&[9.0, 1.0, 6.0, 3.0, 12.0, 0.0])),
            FrameSelection::EnergyRanked,
        );
        let m = bridge.decode(Path::new("any")).unwrap();
        assert_eq!(m.shape(), (3, 3));
        let kept: Vec<f32> = (0..3).map(|c| m.get(0, c) * 3.0).collect();
        assert_eq!(kept, vec![6.0, 9.0, 12.0]);
    }

    #[test]
    fn energy_ranking_on_odd_frame_count_keeps_floor_half() {
        let m = Matrix::from_vec(1, 5, vec![5.0, 4.0, 3.0, 2.0, 1.0]).unwrap();
        let s = select_frames(&m, FrameSelection::EnergyRanked);
        assert_eq!(s.as_slice(), &[4.0, 5.0]);
    }

    #[test]
    fn decoder_failure_maps_to_decode_error() {
        let bridge = bridge(
            DecodeStatus::Failed("corrupt header".into()),
            FrameSelection::EnergyRanked,
        );
        assert!(matches!(
            bridge.decode(Path::new("bad.mp3")),
            Err(FingerprintError::Decode(reason)) if reason == "corrupt header"
        ));
    }

    #[test]
    fn decoder_cancel_maps_to_decode_canceled() {
        let bridge = bridge(DecodeStatus::Canceled, FrameSelection::EnergyRanked);
        assert!(matches!(
            bridge.decode(Path::new("song.flac")),
            Err(FingerprintError::DecodeCanceled)
        ));
    }

    #[test]
    fn empty_spectrum_is_a_decode_error() {
        let empty = RawSpectrum::new(257, 0, Vec::new()).unwrap();
        let bridge = bridge(DecodeStatus::Ok(empty), FrameSelection::EnergyRanked);
        assert!(matches!(
            bridge.decode(Path::new("silent.wav")),
            Err(FingerprintError::Decode(_))
        ));
    }
}
