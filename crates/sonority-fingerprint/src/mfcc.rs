// SPDX-License-Identifier: GPL-3.0-or-later

//! Mel-frequency cepstral transform.
//!
//! The filterbank (`[mel_bands, bins]`) and DCT (`[coefficients, mel_bands]`)
//! matrices are fixed for the lifetime of an [`Mfcc`]; they are either
//! synthesized from the analysis parameters or read from packaged files.

use std::f64::consts::PI;
use std::path::Path;

use tracing::debug;

use crate::matrix::Matrix;
use crate::{FingerprintError, Result};

/// Lowest filter edge in Hz.
const MEL_FLOOR_HZ: f64 = 20.0;

/// Shape parameters shared by the decoder and the coefficient matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfccParams {
    pub sample_rate: u32,
    pub window_size: usize,
    pub mel_bands: usize,
    pub cepstral_coefficients: usize,
}

impl MfccParams {
    pub fn bins(&self) -> usize {
        self.window_size / 2 + 1
    }
}

impl Default for MfccParams {
    fn default() -> Self {
        Self {
            sample_rate: 11025,
            window_size: 512,
            mel_bands: 36,
            cepstral_coefficients: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MfccCoefficients {
    filterbank: Matrix,
    dct: Matrix,
}

impl MfccCoefficients {
    /// Triangular mel filters from 20 Hz to Nyquist and an orthonormal DCT-II.
    pub fn generate(params: &MfccParams) -> Result<Self> {
        let filterbank = mel_filterbank(params);
        let dct = dct_matrix(params.cepstral_coefficients, params.mel_bands);
        Self::from_matrices(filterbank, dct, params)
    }

    /// Read both matrices from their packaged files.
    pub fn load(filterbank_path: &Path, dct_path: &Path, params: &MfccParams) -> Result<Self> {
        let read = |path: &Path| -> Result<Matrix> {
            let bytes = std::fs::read(path)?;
            Matrix::from_bytes(&bytes).map_err(|e| {
                FingerprintError::InvalidModel(format!("{}: {}", path.display(), e))
            })
        };
        let filterbank = read(filterbank_path)?;
        let dct = read(dct_path)?;
        debug!(
            filterbank = %filterbank_path.display(),
            dct = %dct_path.display(),
            "loaded cepstral coefficients"
        );
        Self::from_matrices(filterbank, dct, params)
    }

    /// Accept externally built matrices after checking them against `params`.
    pub fn from_matrices(filterbank: Matrix, dct: Matrix, params: &MfccParams) -> Result<Self> {
        let expected_filterbank = (params.mel_bands, params.bins());
        if filterbank.shape() != expected_filterbank {
            return Err(FingerprintError::CoefficientShape {
                name: "filterbank",
                expected: expected_filterbank,
                found: filterbank.shape(),
            });
        }
        let expected_dct = (params.cepstral_coefficients, params.mel_bands);
        if dct.shape() != expected_dct {
            return Err(FingerprintError::CoefficientShape {
                name: "dct",
                expected: expected_dct,
                found: dct.shape(),
            });
        }
        Ok(Self { filterbank, dct })
    }

    pub fn filterbank(&self) -> &Matrix {
        &self.filterbank
    }

    pub fn dct(&self) -> &Matrix {
        &self.dct
    }
}

pub struct Mfcc {
    coefficients: MfccCoefficients,
}

impl Mfcc {
    pub fn new(coefficients: MfccCoefficients) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> usize {
        self.coefficients.dct.rows()
    }

    /// Map a `[bins, frames]` spectral matrix to a `[coefficients, frames]` cepstral one.
    pub fn apply(&self, spectral: &Matrix) -> Result<Matrix> {
        let mut mel = self
            .coefficients
            .filterbank
            .multiply(spectral)
            .map_err(FingerprintError::TransformFailed)?;
        mel.map_in_place(compress);
        self.coefficients
            .dct
            .multiply(&mel)
            .map_err(FingerprintError::TransformFailed)
    }
}

/// Decibel compression with a floor: anything below unit power maps to 0.
#[inline]
fn compress(v: f32) -> f32 {
    if v < 1.0 {
        0.0
    } else {
        10.0 * v.log10()
    }
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

fn mel_filterbank(params: &MfccParams) -> Matrix {
    let bins = params.bins();
    let bands = params.mel_bands;
    let nyquist = params.sample_rate as f64 / 2.0;
    let bin_hz = params.sample_rate as f64 / params.window_size.max(1) as f64;

    let mel_min = hz_to_mel(MEL_FLOOR_HZ.min(nyquist));
    let mel_max = hz_to_mel(nyquist);
    let edges: Vec<f64> = (0..bands + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (bands + 1) as f64))
        .collect();

    Matrix::from_fn(bands, bins, |band, bin| {
        let (left, center, right) = (edges[band], edges[band + 1], edges[band + 2]);
        let hz = bin as f64 * bin_hz;
        let weight = if hz <= left || hz >= right {
            0.0
        } else if hz <= center {
            (hz - left) / (center - left)
        } else {
            (right - hz) / (right - center)
        };
        weight as f32
    })
}

fn dct_matrix(coefficients: usize, bands: usize) -> Matrix {
    let n = bands.max(1) as f64;
    Matrix::from_fn(coefficients, bands, |k, m| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        (scale * (PI * k as f64 * (m as f64 + 0.5) / n).cos()) as f32
    })
}
