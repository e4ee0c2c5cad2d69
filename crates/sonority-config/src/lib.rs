// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://sonority.db".to_string(),
        }
    }
}

/// How decoded spectral frames are reduced before the cepstral transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FrameSelectionConfig {
    /// Decode the whole track and keep the louder half of its frames.
    EnergyRanked,
    /// Decode at most `duration_secs` and keep a centered slice of `frame_budget` frames.
    CenteredWindow {
        #[serde(default = "default_window_secs")]
        duration_secs: u32,
        #[serde(default = "default_frame_budget")]
        frame_budget: usize,
    },
}

fn default_window_secs() -> u32 {
    135
}

fn default_frame_budget() -> usize {
    2048
}

impl Default for FrameSelectionConfig {
    fn default() -> Self {
        Self::EnergyRanked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    pub window_size: usize,
    pub mel_bands: usize,
    pub cepstral_coefficients: usize,
    pub frame_selection: FrameSelectionConfig,
    /// Packaged mel filterbank matrix. Synthesized when absent.
    pub filterbank_path: Option<PathBuf>,
    /// Packaged DCT matrix. Synthesized when absent.
    pub dct_path: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 11025,
            window_size: 512,
            mel_bands: 36,
            cepstral_coefficients: 20,
            frame_selection: FrameSelectionConfig::default(),
            filterbank_path: None,
            dct_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Rows fetched per store page during library scans.
    pub page_size: usize,
    pub playlist_limit: usize,
    /// Candidates at or below this aggregate distance are dropped from playlists.
    pub ceiling: f32,
    pub duplicate_threshold: f32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            playlist_limit: 25,
            ceiling: 0.0,
            duplicate_threshold: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub analysis: AnalysisConfig,
    pub similarity: SimilarityConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Reject parameter combinations the analysis pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let analysis = &self.analysis;
        if analysis.sample_rate == 0 {
            bail!("analysis.sample_rate must be positive");
        }
        if analysis.window_size == 0 || analysis.window_size % 2 != 0 {
            bail!(
                "analysis.window_size must be a positive even number, got {}",
                analysis.window_size
            );
        }
        if analysis.mel_bands == 0 || analysis.cepstral_coefficients == 0 {
            bail!("analysis.mel_bands and analysis.cepstral_coefficients must be positive");
        }
        if analysis.cepstral_coefficients > analysis.mel_bands {
            bail!(
                "analysis.cepstral_coefficients ({}) exceeds analysis.mel_bands ({})",
                analysis.cepstral_coefficients,
                analysis.mel_bands
            );
        }
        if let FrameSelectionConfig::CenteredWindow {
            duration_secs,
            frame_budget,
        } = analysis.frame_selection
        {
            if duration_secs == 0 || frame_budget == 0 {
                bail!("centered_window needs a positive duration_secs and frame_budget");
            }
        }
        if self.similarity.page_size == 0 {
            bail!("similarity.page_size must be positive");
        }
        if self.similarity.duplicate_threshold < 0.0 {
            bail!("similarity.duplicate_threshold must not be negative");
        }
        Ok(())
    }
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: SONORITY_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("SONORITY_").split("__"));

    let config: AppConfig = figment.extract()?;
    config.validate()?;
    info!(
        target: "config",
        sample_rate = config.analysis.sample_rate,
        window_size = config.analysis.window_size,
        "configuration loaded"
    );
    Ok(config)
}
