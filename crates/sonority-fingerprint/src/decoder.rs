// SPDX-License-Identifier: GPL-3.0-or-later

//! Native audio decoding into power spectra.
//!
//! A [`SpectralDecoder`] turns an audio file into a bin-major power spectrum
//! at a fixed sample rate and window size. Construction plays the role of
//! opening a decoder handle and `Drop` closes it; `cancel` may be called from
//! any thread while a `decode` is running.
//!
//! [`SymphoniaDecoder`] is the production implementation:
//! - demux and decode with symphonia, mixing every buffer down to mono
//! - resample to the analysis rate with rubato when the source rate differs
//! - cut non-overlapping Hann windows and take the power spectrum with realfft

use std::f32::consts::PI;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use rubato::{FftFixedInOut, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, instrument};

use crate::{FingerprintError, Result};

/// Input chunk handed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Samples are scaled to the 16-bit PCM range before windowing.
const PCM_SCALE: f32 = 32768.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderParams {
    pub sample_rate: u32,
    pub window_size: usize,
    /// Stop after this much audio; `None` decodes the whole track.
    pub duration_secs: Option<u32>,
}

impl DecoderParams {
    pub fn bins(&self) -> usize {
        self.window_size / 2 + 1
    }

    pub fn max_frames(&self) -> Option<usize> {
        self.duration_secs
            .map(|secs| self.sample_rate as usize * secs as usize / self.window_size.max(1))
    }
}

/// Power spectrum laid out bin-major: `data[bin * frames + frame]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpectrum {
    bins: usize,
    frames: usize,
    data: Vec<f32>,
}

impl RawSpectrum {
    pub fn new(bins: usize, frames: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != bins * frames {
            return Err(FingerprintError::DimensionMismatch {
                expected: bins * frames,
                found: data.len(),
            });
        }
        Ok(Self { bins, frames, data })
    }

    /// Transpose per-frame spectra into the bin-major layout.
    pub fn from_frames(bins: usize, frames: &[Vec<f32>]) -> Result<Self> {
        let mut data = vec![0.0; bins * frames.len()];
        for (f, frame) in frames.iter().enumerate() {
            if frame.len() != bins {
                return Err(FingerprintError::DimensionMismatch {
                    expected: bins,
                    found: frame.len(),
                });
            }
            for (b, &v) in frame.iter().enumerate() {
                data[b * frames.len() + f] = v;
            }
        }
        Ok(Self {
            bins,
            frames: frames.len(),
            data,
        })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Outcome of one decode call.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStatus {
    Ok(RawSpectrum),
    Failed(String),
    Canceled,
}

impl DecodeStatus {
    /// Integer status: 0 success, -1 failure, -2 canceled.
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok(_) => 0,
            Self::Failed(_) => -1,
            Self::Canceled => -2,
        }
    }
}

/// Blocking file-to-spectrum decoder.
pub trait SpectralDecoder: Send + Sync {
    fn params(&self) -> &DecoderParams;

    /// Decode `path`. A pending cancel request makes it return
    /// [`DecodeStatus::Canceled`] straight away.
    fn decode(&self, path: &Path) -> DecodeStatus;

    /// Ask an in-flight `decode` to stop and return [`DecodeStatus::Canceled`].
    /// The request stays pending until [`SpectralDecoder::reset_cancel`].
    fn cancel(&self);

    /// Forget an earlier cancel request before starting new work.
    fn reset_cancel(&self);

    fn name(&self) -> &'static str;
}

enum Halt {
    Canceled,
    Failed(String),
}

impl From<Halt> for DecodeStatus {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Canceled => DecodeStatus::Canceled,
            Halt::Failed(reason) => DecodeStatus::Failed(reason),
        }
    }
}

fn failed(reason: impl Into<String>) -> Halt {
    Halt::Failed(reason.into())
}

pub struct SymphoniaDecoder {
    params: DecoderParams,
    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
    canceled: AtomicBool,
}

impl SymphoniaDecoder {
    pub fn open(params: DecoderParams) -> Result<Self> {
        if params.sample_rate == 0 {
            return Err(FingerprintError::InvalidParameters(
                "sample rate must be positive".into(),
            ));
        }
        if params.window_size < 2 || params.window_size % 2 != 0 {
            return Err(FingerprintError::InvalidParameters(format!(
                "window size must be an even number of at least 2 samples, got {}",
                params.window_size
            )));
        }
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(params.window_size);
        debug!(
            sample_rate = params.sample_rate,
            window_size = params.window_size,
            duration_secs = ?params.duration_secs,
            "opened spectral decoder"
        );
        Ok(Self {
            window: hann_window(params.window_size),
            params,
            fft,
            canceled: AtomicBool::new(false),
        })
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    fn run(&self, path: &Path) -> std::result::Result<RawSpectrum, Halt> {
        let file = File::open(path)
            .map_err(|e| failed(format!("cannot open {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| failed(format!("unrecognized audio container: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| failed("no audio track found"))?;
        let track_id = track.id;
        let source_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| failed("audio track has no sample rate"))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| failed(format!("unsupported codec: {}", e)))?;

        let mut resampler = if source_rate != self.params.sample_rate {
            debug!(
                from = source_rate,
                to = self.params.sample_rate,
                "resampling decoded audio"
            );
            Some(StreamResampler::new(source_rate, self.params.sample_rate)?)
        } else {
            None
        };
        let mut framer = Framer::new(&self.window, self.fft.clone(), self.params.max_frames());
        let mut mono: Vec<f32> = Vec::new();
        let mut resampled: Vec<f32> = Vec::new();

        loop {
            if self.is_canceled() {
                return Err(Halt::Canceled);
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(failed(format!("error reading packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(error = %e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(failed(format!("failed to decode frame: {}", e))),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            mono.clear();
            mono.extend(
                samples
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );

            let full = match resampler.as_mut() {
                Some(resampler) => {
                    resampled.clear();
                    resampler.push(&mono, &mut resampled)?;
                    framer.push(&resampled)?
                }
                None => framer.push(&mono)?,
            };
            if full {
                break;
            }
        }

        if !framer.is_full() {
            if let Some(resampler) = resampler.as_mut() {
                resampled.clear();
                resampler.finish(&mut resampled)?;
                framer.push(&resampled)?;
            }
        }

        framer.into_spectrum()
    }
}

impl SpectralDecoder for SymphoniaDecoder {
    fn params(&self) -> &DecoderParams {
        &self.params
    }

    #[instrument(skip(self), fields(file = %path.display()))]
    fn decode(&self, path: &Path) -> DecodeStatus {
        match self.run(path) {
            Ok(spectrum) => {
                debug!(
                    frames = spectrum.frames(),
                    bins = spectrum.bins(),
                    "decoded power spectrum"
                );
                DecodeStatus::Ok(spectrum)
            }
            Err(halt) => {
                let status = DecodeStatus::from(halt);
                debug!(status = status.code(), "decode did not complete");
                status
            }
        }
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn reset_cancel(&self) {
        self.canceled.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "symphonia"
    }
}

/// Hann window `0.5 * (1 - cos(2 pi i / (n - 1)))`.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos()))
        .collect()
}

/// Cuts a mono stream into windows and collects one power spectrum per window.
struct Framer<'a> {
    window: &'a [f32],
    fft: Arc<dyn RealToComplex<f32>>,
    pending: Vec<f32>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    frames: Vec<Vec<f32>>,
    max_frames: Option<usize>,
}

impl<'a> Framer<'a> {
    fn new(window: &'a [f32], fft: Arc<dyn RealToComplex<f32>>, max_frames: Option<usize>) -> Self {
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        Self {
            window,
            fft,
            pending: Vec::with_capacity(window.len()),
            input,
            output,
            frames: Vec::new(),
            max_frames,
        }
    }

    fn is_full(&self) -> bool {
        self.max_frames
            .map_or(false, |max| self.frames.len() >= max)
    }

    /// Returns true once the frame budget is exhausted.
    fn push(&mut self, samples: &[f32]) -> std::result::Result<bool, Halt> {
        for &sample in samples {
            if self.is_full() {
                break;
            }
            self.pending.push(sample);
            if self.pending.len() == self.window.len() {
                self.emit()?;
                self.pending.clear();
            }
        }
        Ok(self.is_full())
    }

    fn emit(&mut self) -> std::result::Result<(), Halt> {
        for ((dst, &sample), &w) in self
            .input
            .iter_mut()
            .zip(&self.pending)
            .zip(self.window)
        {
            *dst = sample * PCM_SCALE * w;
        }
        self.fft
            .process(&mut self.input, &mut self.output)
            .map_err(|e| failed(format!("fft failed: {}", e)))?;
        self.frames
            .push(self.output.iter().map(|c| c.norm_sqr()).collect());
        Ok(())
    }

    fn into_spectrum(self) -> std::result::Result<RawSpectrum, Halt> {
        let bins = self.output.len();
        RawSpectrum::from_frames(bins, &self.frames).map_err(|e| failed(e.to_string()))
    }
}

/// Chunked mono resampler that tolerates arbitrary push sizes.
struct StreamResampler {
    inner: FftFixedInOut<f32>,
    pending: Vec<f32>,
    ratio: f64,
}

impl StreamResampler {
    fn new(from: u32, to: u32) -> std::result::Result<Self, Halt> {
        let inner = FftFixedInOut::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 1)
            .map_err(|e| failed(format!("cannot resample {} -> {}: {}", from, to, e)))?;
        Ok(Self {
            inner,
            pending: Vec::new(),
            ratio: to as f64 / from as f64,
        })
    }

    fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) -> std::result::Result<(), Halt> {
        self.pending.extend_from_slice(samples);
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                return Ok(());
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let resampled = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| failed(format!("resampling failed: {}", e)))?;
            if let Some(channel) = resampled.first() {
                out.extend_from_slice(channel);
            }
        }
    }

    /// Flush the zero-padded tail, keeping only output that maps to real input.
    fn finish(&mut self, out: &mut Vec<f32>) -> std::result::Result<(), Halt> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let valid_in = self.pending.len();
        let mut chunk = std::mem::take(&mut self.pending);
        chunk.resize(self.inner.input_frames_next(), 0.0);
        let resampled = self
            .inner
            .process(&[chunk], None)
            .map_err(|e| failed(format!("resampling failed: {}", e)))?;
        if let Some(channel) = resampled.first() {
            let valid_out = ((valid_in as f64) * self.ratio).ceil() as usize;
            out.extend_from_slice(&channel[..valid_out.min(channel.len())]);
        }
        Ok(())
    }
}
