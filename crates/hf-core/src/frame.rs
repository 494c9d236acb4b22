use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Intervalle fermé `[low, high]` en Hz utilisé pour le bucketing d'énergie.
///
/// # Example
/// ```
/// use hf_core::frame::FrequencyBand;
/// let bands = FrequencyBand::defaults();
/// assert_eq!(bands[0], FrequencyBand::new(20.0, 250.0));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    /// Lower edge in Hz.
    pub low: f32,
    /// Upper edge in Hz.
    pub high: f32,
}

impl FrequencyBand {
    /// Create a band from its edges.
    #[must_use]
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    /// Bass / mid / treble groupings for typical music content.
    #[must_use]
    pub const fn defaults() -> [Self; 3] {
        [
            Self::new(20.0, 250.0),
            Self::new(250.0, 2000.0),
            Self::new(2000.0, 8000.0),
        ]
    }

    /// `true` when both edges are zero (unset in a config file).
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.low == 0.0 && self.high == 0.0
    }
}

/// Per-frame DSP metrics consumed by the rhythm and mapping stages.
///
/// Produced once per analysis frame, never mutated afterwards.
#[derive(Clone, Copy, Debug)]
pub struct Features {
    /// Capture time of the frame.
    pub timestamp: Instant,
    /// RMS amplitude of the unwindowed frame.
    pub rms: f32,
    /// Fraction of consecutive-sample sign changes.
    pub zero_crossing_rate: f32,
    /// Energy-weighted mean frequency (Hz).
    pub spectral_centroid: f32,
    /// Centroid normalized by Nyquist [0, 1].
    pub spectral_centroid_norm: f32,
    /// Frequency under which the rolloff fraction of energy lies (Hz).
    pub spectral_rolloff: f32,
    /// Rolloff normalized by Nyquist [0, 1].
    pub spectral_rolloff_norm: f32,
    /// Sum of squared magnitudes per band (bass, mid, treble).
    pub band_energy: [f32; 3],
    /// Band energy divided by total energy [0, 1].
    pub band_energy_norm: [f32; 3],
    /// Sum of squared magnitudes across all bins.
    pub total_energy: f32,
    /// Frequency of the strongest bin (Hz).
    pub peak_frequency: f32,
    /// Magnitude of the strongest bin.
    pub peak_magnitude: f32,
    /// Duration covered by the frame.
    pub frame_duration: Duration,
    /// Bass vs. mid balance [0, 1].
    pub balance_low_mid: f32,
    /// Mid vs. treble balance [0, 1].
    pub balance_mid_high: f32,
}

impl Features {
    /// Silent features stamped at `timestamp`.
    ///
    /// # Example
    /// ```
    /// use hf_core::frame::Features;
    /// use std::time::Instant;
    /// let f = Features::silent(Instant::now());
    /// assert!(f.rms.abs() < f32::EPSILON);
    /// assert!((f.balance_low_mid - 0.5).abs() < f32::EPSILON);
    /// ```
    #[must_use]
    pub fn silent(timestamp: Instant) -> Self {
        Self {
            timestamp,
            rms: 0.0,
            zero_crossing_rate: 0.0,
            spectral_centroid: 0.0,
            spectral_centroid_norm: 0.0,
            spectral_rolloff: 0.0,
            spectral_rolloff_norm: 0.0,
            band_energy: [0.0; 3],
            band_energy_norm: [0.0; 3],
            total_energy: 0.0,
            peak_frequency: 0.0,
            peak_magnitude: 0.0,
            frame_duration: Duration::ZERO,
            balance_low_mid: 0.5,
            balance_mid_high: 0.5,
        }
    }
}

/// Stratégie d'éclairage sélectionnée par l'analyse rythmique.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightingMode {
    /// Transient energy and beat-driven brightness pulses.
    #[default]
    EnergyPulse,
    /// Spectral balance drives flowing color changes.
    SpectrumFlow,
}

impl LightingMode {
    /// Human-friendly, stable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EnergyPulse => "energy-pulse",
            Self::SpectrumFlow => "spectrum-flow",
        }
    }
}

impl fmt::Display for LightingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rhythmic state summarized for the mapping stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RhythmOutput {
    /// A beat fired on this frame.
    pub beat: bool,
    /// How far the beat overshot its threshold [0, 1].
    pub beat_strength: f32,
    /// Instantaneous energy (RMS, floored at epsilon).
    pub energy: f32,
    /// Energy normalized between noise floor and peak envelope [0, 1].
    pub energy_norm: f32,
    /// Smoothed overall intensity [0, 1].
    pub intensity: f32,
    /// Recent beat rate as a fraction of the expected maximum [0, 1].
    pub beat_density: f32,
    /// Current lighting mode.
    pub mode: LightingMode,
}

/// Transition effect requested from the bulb.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Jump directly to the new state.
    #[default]
    Sudden,
    /// Let the bulb fade over `duration`.
    Smooth,
}

/// Commande HSV envoyée à l'actionneur.
///
/// Ranges: hue 0–359, saturation 0–100, brightness 1–100.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightCommand {
    /// Hue in degrees.
    pub hue: u16,
    /// Saturation percentage.
    pub saturation: u8,
    /// Brightness percentage, never 0.
    pub brightness: u8,
    /// Transition effect.
    pub effect: Effect,
    /// Transition duration (ignored for `Effect::Sudden`).
    pub duration: Duration,
}

impl LightCommand {
    /// Quantized `(hue, saturation, brightness)` triple.
    #[must_use]
    pub const fn triple(&self) -> (u16, u8, u8) {
        (self.hue, self.saturation, self.brightness)
    }
}

/// Read-only state snapshot handed to the visualization sink once per mapper call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VizSnapshot {
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub intensity: f32,
    /// Normalized energy.
    pub energy: f32,
    pub beat: bool,
    pub beat_strength: f32,
    pub beat_pulse: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub sparkle: f32,
    pub centroid: f32,
    pub rolloff: f32,
    pub mode: LightingMode,
}

/// Bloc d'échantillons entrelacés tel que livré par la capture.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioFrame {
    /// Interleaved channel count.
    pub channels: usize,
    /// Interleaved samples, `frame_size * channels` long.
    pub samples: Vec<f32>,
    /// Capture time of the frame.
    pub captured_at: Option<Instant>,
}
