// SPDX-License-Identifier: GPL-3.0-or-later

//! Timbre fingerprinting for audio similarity.
//!
//! This crate provides functionality for:
//! - Decoding audio files into power spectra and selecting representative frames
//! - Projecting spectra onto mel-frequency cepstral coefficients
//! - Summarizing a track as a Gaussian timbre model and comparing two models

pub mod bridge;
pub mod decoder;
pub mod error;
pub mod matrix;
pub mod mfcc;
pub mod packed;
pub mod scms;

pub use bridge::{FrameSelection, SpectralBridge};
pub use decoder::{DecodeStatus, DecoderParams, RawSpectrum, SpectralDecoder, SymphoniaDecoder};
pub use error::{FingerprintError, Result};
pub use matrix::{Matrix, MatrixError};
pub use mfcc::{Mfcc, MfccCoefficients, MfccParams};
pub use packed::{packed_index, packed_len};
pub use scms::{DistanceScratch, Scms};
