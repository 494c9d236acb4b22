use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::frame::FrequencyBand;

/// Configuration complète de la session.
///
/// Sérialisable en TOML. Chaque champ a une valeur par défaut saine, et
/// l'ensemble est validé une seule fois, à la construction du pipeline.
///
/// # Example
/// ```
/// use hf_core::config::SyncConfig;
/// let config = SyncConfig::default();
/// assert_eq!(config.audio.frame_size, 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SyncConfig {
    pub audio: AudioConfig,
    pub bands: BandConfig,
    pub rhythm: RhythmConfig,
    pub light: LightConfig,
}

/// Capture stream parameters.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    /// Sample rate in Hz. 0 = device default.
    pub sample_rate: u32,
    /// Analysis frame size in samples.
    pub frame_size: usize,
    /// Requested input channels (capped at the device maximum).
    pub channels: u16,
    /// Input latency override in ms. 0 = device default.
    pub latency_ms: u64,
}

/// Band edges and rolloff fraction.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BandConfig {
    pub bass: FrequencyBand,
    pub mid: FrequencyBand,
    pub treble: FrequencyBand,
    /// Fraction of total spectral energy under the rolloff frequency (0, 1].
    pub rolloff_ratio: f32,
}

/// Beat and mode detection tuning.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RhythmConfig {
    /// Moving-average window in frames (≈1.1s at 44.1kHz/1024).
    pub energy_window: usize,
    /// Energy must exceed `beat_threshold × moving average` to fire a beat.
    pub beat_threshold: f32,
    pub min_beat_interval_ms: u64,
    pub max_beat_interval_ms: u64,
    pub intensity_alpha: f32,
    /// Minimum time between two mode switches.
    pub mode_hold_ms: u64,
    /// Trailing window for beat density.
    pub beat_window_ms: u64,
}

/// Smoothing constants and actuator rate limit.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LightConfig {
    pub band_alpha: f32,
    pub sparkle_alpha: f32,
    pub saturation_alpha: f32,
    pub brightness_alpha: f32,
    pub centroid_alpha: f32,
    pub rolloff_alpha: f32,
    pub hue_alpha: f32,
    /// Minimum spacing between two commands sent to the bulb.
    pub min_command_spacing_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 0,
            frame_size: 1024,
            channels: 2,
            latency_ms: 0,
        }
    }
}

impl Default for BandConfig {
    fn default() -> Self {
        let [bass, mid, treble] = FrequencyBand::defaults();
        Self {
            bass,
            mid,
            treble,
            rolloff_ratio: 0.85,
        }
    }
}

impl Default for RhythmConfig {
    fn default() -> Self {
        Self {
            energy_window: 48,
            beat_threshold: 1.35,
            min_beat_interval_ms: 160,
            max_beat_interval_ms: 1200,
            intensity_alpha: 0.18,
            mode_hold_ms: 2500,
            beat_window_ms: 2000,
        }
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            band_alpha: 0.14,
            sparkle_alpha: 0.14,
            saturation_alpha: 0.16,
            brightness_alpha: 0.22,
            centroid_alpha: 0.12,
            rolloff_alpha: 0.10,
            hue_alpha: 0.22,
            min_command_spacing_ms: 25,
        }
    }
}

impl BandConfig {
    /// Bands in analyzer order. All-zero bands fall back to the defaults.
    #[must_use]
    pub fn as_array(&self) -> [FrequencyBand; 3] {
        let bands = [self.bass, self.mid, self.treble];
        if bands.iter().all(FrequencyBand::is_unset) {
            FrequencyBand::defaults()
        } else {
            bands
        }
    }
}

impl SyncConfig {
    /// Check every value once, before any stage is built.
    ///
    /// # Errors
    /// Returns the first invalid field as a `CoreError`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.audio.frame_size == 0 {
            return Err(CoreError::Config("audio.frame_size doit être > 0".into()));
        }
        for (index, band) in self.bands.as_array().iter().enumerate() {
            if band.low < 0.0 || band.high < band.low || !band.high.is_finite() {
                return Err(CoreError::InvalidBand {
                    index,
                    low: band.low,
                    high: band.high,
                });
            }
        }
        let ratio = self.bands.rolloff_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(CoreError::Config(format!(
                "bands.rolloff_ratio hors de (0, 1] : {ratio}"
            )));
        }

        let r = &self.rhythm;
        if r.energy_window == 0 {
            return Err(CoreError::Config("rhythm.energy_window doit être > 0".into()));
        }
        if !(r.beat_threshold > 0.0 && r.beat_threshold.is_finite()) {
            return Err(CoreError::Config(format!(
                "rhythm.beat_threshold doit être > 0 : {}",
                r.beat_threshold
            )));
        }
        if r.min_beat_interval_ms > r.max_beat_interval_ms {
            return Err(CoreError::Config(format!(
                "rhythm.min_beat_interval_ms ({}) > max_beat_interval_ms ({})",
                r.min_beat_interval_ms, r.max_beat_interval_ms
            )));
        }
        if r.beat_window_ms == 0 {
            return Err(CoreError::Config("rhythm.beat_window_ms doit être > 0".into()));
        }
        check_alpha("rhythm.intensity_alpha", r.intensity_alpha)?;

        let l = &self.light;
        for (name, alpha) in [
            ("light.band_alpha", l.band_alpha),
            ("light.sparkle_alpha", l.sparkle_alpha),
            ("light.saturation_alpha", l.saturation_alpha),
            ("light.brightness_alpha", l.brightness_alpha),
            ("light.centroid_alpha", l.centroid_alpha),
            ("light.rolloff_alpha", l.rolloff_alpha),
            ("light.hue_alpha", l.hue_alpha),
        ] {
            check_alpha(name, alpha)?;
        }
        Ok(())
    }
}

fn check_alpha(name: &str, alpha: f32) -> Result<(), CoreError> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(CoreError::Config(format!("{name} hors de [0, 1] : {alpha}")))
    }
}

/// Structure TOML intermédiaire pour désérialisation avec valeurs optionnelles.
#[derive(Deserialize)]
struct ConfigFile {
    audio: Option<AudioSection>,
    bands: Option<BandSection>,
    rhythm: Option<RhythmSection>,
    light: Option<LightSection>,
}

#[derive(Deserialize)]
struct AudioSection {
    sample_rate: Option<u32>,
    frame_size: Option<usize>,
    channels: Option<u16>,
    latency_ms: Option<u64>,
}

/// Band edges are written as `[low, high]` pairs in TOML.
#[derive(Deserialize)]
struct BandSection {
    bass: Option<[f32; 2]>,
    mid: Option<[f32; 2]>,
    treble: Option<[f32; 2]>,
    rolloff_ratio: Option<f32>,
}

#[derive(Deserialize)]
struct RhythmSection {
    energy_window: Option<usize>,
    beat_threshold: Option<f32>,
    min_beat_interval_ms: Option<u64>,
    max_beat_interval_ms: Option<u64>,
    intensity_alpha: Option<f32>,
    mode_hold_ms: Option<u64>,
    beat_window_ms: Option<u64>,
}

#[derive(Deserialize)]
struct LightSection {
    band_alpha: Option<f32>,
    sparkle_alpha: Option<f32>,
    saturation_alpha: Option<f32>,
    brightness_alpha: Option<f32>,
    centroid_alpha: Option<f32>,
    rolloff_alpha: Option<f32>,
    hue_alpha: Option<f32>,
    min_command_spacing_ms: Option<u64>,
}

macro_rules! merge {
    ($section:ident, $target:ident, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(v) = $section.$field {
                $target.$field = v;
            }
        )*
    };
}

/// Parse une chaîne TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the TOML is malformed or fails validation.
///
/// # Example
/// ```
/// use hf_core::config::parse_config;
/// let config = parse_config("[rhythm]\nbeat_threshold = 1.5\n").unwrap();
/// assert!((config.rhythm.beat_threshold - 1.5).abs() < f32::EPSILON);
/// assert_eq!(config.rhythm.energy_window, 48);
/// ```
pub fn parse_config(content: &str) -> Result<SyncConfig> {
    let file: ConfigFile = toml::from_str(content).context("Erreur de parsing TOML")?;
    let mut config = SyncConfig::default();

    if let Some(a) = file.audio {
        let audio = &mut config.audio;
        merge!(a, audio, [sample_rate, frame_size, channels, latency_ms]);
    }
    if let Some(b) = file.bands {
        if let Some([low, high]) = b.bass {
            config.bands.bass = FrequencyBand::new(low, high);
        }
        if let Some([low, high]) = b.mid {
            config.bands.mid = FrequencyBand::new(low, high);
        }
        if let Some([low, high]) = b.treble {
            config.bands.treble = FrequencyBand::new(low, high);
        }
        if let Some(v) = b.rolloff_ratio {
            config.bands.rolloff_ratio = v;
        }
    }
    if let Some(r) = file.rhythm {
        let rhythm = &mut config.rhythm;
        merge!(
            r,
            rhythm,
            [
                energy_window,
                beat_threshold,
                min_beat_interval_ms,
                max_beat_interval_ms,
                intensity_alpha,
                mode_hold_ms,
                beat_window_ms,
            ]
        );
    }
    if let Some(l) = file.light {
        let light = &mut config.light;
        merge!(
            l,
            light,
            [
                band_alpha,
                sparkle_alpha,
                saturation_alpha,
                brightness_alpha,
                centroid_alpha,
                rolloff_alpha,
                hue_alpha,
                min_command_spacing_ms,
            ]
        );
    }

    config.validate()?;
    Ok(config)
}

/// Charge un fichier TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed or validated.
///
/// # Example
/// ```no_run
/// use hf_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/default.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<SyncConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Config invalide dans {}", path.display()))
}
