use std::time::{Duration, Instant};

use hf_audio::smoothing::Smoother;
use hf_core::config::LightConfig;
use hf_core::frame::{Effect, Features, LightCommand, LightingMode, RhythmOutput, VizSnapshot};
use hf_core::math::{clamp_finite, spectral_balance};
use hf_core::traits::VisualizationSink;

/// Multiplicative decay of the beat pulse on frames without a beat.
const PULSE_DECAY: f32 = 0.88;
/// Gain applied to the beat strength when a beat fires.
const PULSE_GAIN: f32 = 1.2;

/// Smoothing constants and rate limit of [`LightMapper`].
#[derive(Clone, Debug, PartialEq)]
pub struct MapperOptions {
    /// EMA alpha of the three band levels.
    pub band_alpha: f32,
    /// EMA alpha of the treble-driven sparkle level.
    pub sparkle_alpha: f32,
    pub saturation_alpha: f32,
    pub brightness_alpha: f32,
    pub centroid_alpha: f32,
    pub rolloff_alpha: f32,
    /// Fraction of the shortest arc covered per frame by the displayed hue.
    pub hue_alpha: f32,
    /// Minimum spacing between two emitted commands.
    pub min_command_spacing: Duration,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self::from(&LightConfig::default())
    }
}

impl From<&LightConfig> for MapperOptions {
    fn from(c: &LightConfig) -> Self {
        Self {
            band_alpha: c.band_alpha,
            sparkle_alpha: c.sparkle_alpha,
            saturation_alpha: c.saturation_alpha,
            brightness_alpha: c.brightness_alpha,
            centroid_alpha: c.centroid_alpha,
            rolloff_alpha: c.rolloff_alpha,
            hue_alpha: c.hue_alpha,
            min_command_spacing: Duration::from_millis(c.min_command_spacing_ms),
        }
    }
}

/// Target color before smoothing.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Target {
    hue: f32,
    saturation: f32,
    brightness: f32,
}

/// Turns features and rhythm state into rate-limited HSV commands.
///
/// Every call updates the smoothed color state and pushes a snapshot to the
/// optional visualization sink. A command is returned only when the
/// quantized triple changed and the previous one is at least
/// `min_command_spacing` old (measured on the feature timestamps).
///
/// # Example
/// ```
/// use hf_light::mapper::{LightMapper, MapperOptions};
/// use hf_core::frame::{Features, RhythmOutput};
/// use std::time::Instant;
///
/// let mut mapper = LightMapper::new(MapperOptions::default());
/// let now = Instant::now();
/// let cmd = mapper.apply(&Features::silent(now), &RhythmOutput::default());
/// assert_eq!(cmd.map(|c| c.triple()), Some((40, 38, 28)));
/// ```
pub struct LightMapper {
    opts: MapperOptions,

    hue: f32,
    saturation: f32,
    brightness: f32,
    beat_pulse: f32,
    sparkle: f32,
    initialized: bool,

    saturation_smoother: Smoother,
    brightness_smoother: Smoother,
    sparkle_smoother: Smoother,
    band_smoothers: [Smoother; 3],
    bands: [f32; 3],
    centroid_smoother: Smoother,
    rolloff_smoother: Smoother,
    centroid: f32,
    rolloff: f32,

    last_sent_at: Option<Instant>,
    last_sent: Option<LightCommand>,
    snapshot: VizSnapshot,
    sink: Option<Box<dyn VisualizationSink>>,
}

impl LightMapper {
    /// Build a mapper with no sink attached. The first `apply` snaps to its target color.
    #[must_use]
    pub fn new(opts: MapperOptions) -> Self {
        let band = opts.band_alpha;
        Self {
            hue: 0.0,
            saturation: 0.0,
            brightness: 0.0,
            beat_pulse: 0.0,
            sparkle: 0.0,
            initialized: false,
            saturation_smoother: Smoother::new(opts.saturation_alpha),
            brightness_smoother: Smoother::new(opts.brightness_alpha),
            sparkle_smoother: Smoother::new(opts.sparkle_alpha),
            band_smoothers: [Smoother::new(band), Smoother::new(band), Smoother::new(band)],
            bands: [0.0; 3],
            centroid_smoother: Smoother::new(opts.centroid_alpha),
            rolloff_smoother: Smoother::new(opts.rolloff_alpha),
            centroid: 0.0,
            rolloff: 0.0,
            last_sent_at: None,
            last_sent: None,
            snapshot: VizSnapshot::default(),
            sink: None,
            opts,
        }
    }

    /// Attach a visualization sink that receives a snapshot on every call.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn VisualizationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Update the color state for one frame and return the command to send, if any.
    pub fn apply(&mut self, features: &Features, output: &RhythmOutput) -> Option<LightCommand> {
        // Un NaN entré dans un smoother n'en ressort jamais.
        let output = &RhythmOutput {
            beat_strength: unit(output.beat_strength),
            energy_norm: unit(output.energy_norm),
            intensity: unit(output.intensity),
            beat_density: unit(output.beat_density),
            ..*output
        };

        self.beat_pulse = if output.beat {
            (output.beat_strength * PULSE_GAIN).clamp(0.0, 1.0)
        } else {
            self.beat_pulse * PULSE_DECAY
        };
        self.sparkle = self.sparkle_smoother.step(unit(features.band_energy_norm[2]));
        for (band, (smoother, &v)) in self
            .bands
            .iter_mut()
            .zip(self.band_smoothers.iter_mut().zip(&features.band_energy_norm))
        {
            *band = smoother.step(unit(v));
        }
        self.centroid = self.centroid_smoother.step(unit(features.spectral_centroid_norm));
        self.rolloff = self.rolloff_smoother.step(unit(features.spectral_rolloff_norm));

        let target = match output.mode {
            LightingMode::EnergyPulse => self.energy_pulse_target(output),
            LightingMode::SpectrumFlow => self.spectrum_flow_target(output),
        };

        // Premier appel : affectation directe, les smoothers sat/bright ne
        // voient leur première valeur qu'à l'appel suivant.
        if self.initialized {
            self.hue = smooth_hue(self.hue, target.hue, self.opts.hue_alpha);
            self.saturation = self.saturation_smoother.step(target.saturation);
            self.brightness = self.brightness_smoother.step(target.brightness);
        } else {
            self.hue = target.hue;
            self.saturation = target.saturation;
            self.brightness = target.brightness;
            self.initialized = true;
        }

        self.snapshot = VizSnapshot {
            hue: self.hue,
            saturation: self.saturation,
            brightness: self.brightness,
            intensity: output.intensity,
            energy: output.energy_norm,
            beat: output.beat,
            beat_strength: output.beat_strength,
            beat_pulse: self.beat_pulse,
            bass: self.bands[0],
            mid: self.bands[1],
            treble: self.bands[2],
            sparkle: self.sparkle,
            centroid: self.centroid,
            rolloff: self.rolloff,
            mode: output.mode,
        };
        if let Some(sink) = self.sink.as_mut() {
            sink.update(&self.snapshot);
        }

        let cmd = quantize(self.hue, self.saturation, self.brightness);
        let now = features.timestamp;
        if self
            .last_sent_at
            .is_some_and(|t| now.saturating_duration_since(t) < self.opts.min_command_spacing)
        {
            return None;
        }
        if self.last_sent.is_some_and(|prev| prev.triple() == cmd.triple()) {
            return None;
        }

        self.last_sent_at = Some(now);
        self.last_sent = Some(cmd);
        Some(cmd)
    }

    fn energy_pulse_target(&self, output: &RhythmOutput) -> Target {
        let [bass, mid, treble] = self.bands;
        let low_mid = spectral_balance(bass, mid);
        let pulse = self.beat_pulse;

        let hue = 40.0 + 180.0 * self.centroid - 100.0 * bass + 60.0 * treble
            + 20.0 * pulse * (0.5 - low_mid);
        let saturation = 38.0
            + 42.0 * mid
            + 25.0 * treble
            + 20.0 * pulse
            + 16.0 * output.beat_density
            + 18.0 * self.sparkle;
        let brightness = 28.0 + 62.0 * output.intensity + 32.0 * pulse + 26.0 * self.sparkle;

        Target {
            hue: hue.clamp(0.0, 359.0),
            saturation: saturation.clamp(25.0, 100.0),
            brightness: brightness.clamp(8.0, 100.0),
        }
    }

    fn spectrum_flow_target(&self, output: &RhythmOutput) -> Target {
        let [_, mid, treble] = self.bands;
        let mid_high = spectral_balance(mid, treble);

        let hue = 210.0 * self.centroid + 40.0 * (self.rolloff - 0.5) + 90.0 * (mid_high - 0.5) + 40.0;
        let saturation = 42.0 + 50.0 * mid + 18.0 * treble + 12.0 * output.intensity;
        let brightness = 34.0
            + 56.0 * output.intensity
            + 22.0 * treble
            + 12.0 * self.beat_pulse
            + 20.0 * self.sparkle;

        Target {
            hue: hue.clamp(0.0, 359.0),
            saturation: saturation.clamp(28.0, 98.0),
            brightness: brightness.clamp(10.0, 100.0),
        }
    }

    /// State computed by the last `apply` call.
    #[must_use]
    pub fn snapshot(&self) -> VizSnapshot {
        self.snapshot
    }

    /// Last command returned by `apply`.
    #[must_use]
    pub fn last_sent(&self) -> Option<LightCommand> {
        self.last_sent
    }

    #[must_use]
    pub fn options(&self) -> &MapperOptions {
        &self.opts
    }
}

fn unit(v: f32) -> f32 {
    clamp_finite(v, 0.0, 1.0)
}

/// Move `current` toward `target` along the shortest arc of the hue circle.
///
/// # Example
/// ```
/// use hf_light::mapper::smooth_hue;
/// // 350° → 10° goes through 0°, not backwards through 180°.
/// assert!((smooth_hue(350.0, 10.0, 0.5) - 0.0).abs() < 1e-4);
/// ```
#[must_use]
pub fn smooth_hue(current: f32, target: f32, alpha: f32) -> f32 {
    let delta = (target - current + 540.0).rem_euclid(360.0) - 180.0;
    (current + alpha * delta + 360.0).rem_euclid(360.0)
}

/// Round a continuous color into the bulb's integer ranges.
///
/// NaN maps to the lower bound: hue 0, saturation 0, brightness 1.
#[must_use]
pub fn quantize(hue: f32, saturation: f32, brightness: f32) -> LightCommand {
    let hue = if hue.is_finite() { hue } else { 0.0 };
    LightCommand {
        hue: (hue.round() as i32).rem_euclid(360) as u16,
        saturation: clamp_finite(saturation.round(), 0.0, 100.0) as u8,
        brightness: clamp_finite(brightness.round(), 1.0, 100.0) as u8,
        effect: Effect::Sudden,
        duration: Duration::ZERO,
    }
}
