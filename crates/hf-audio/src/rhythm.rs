use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hf_core::config::RhythmConfig;
use hf_core::frame::{Features, LightingMode, RhythmOutput};
use hf_core::math::{EPSILON, clamp_finite, ema};

const NOISE_FLOOR_ALPHA: f32 = 0.01;
const PEAK_ATTACK_ALPHA: f32 = 0.34;
const PEAK_RELEASE_ALPHA: f32 = 0.02;
/// The peak envelope never drops below `noise_floor × PEAK_FLOOR_RATIO`.
const PEAK_FLOOR_RATIO: f32 = 1.5;
/// Expected maximum beat rate (beats/s) used to scale density into [0, 1].
const MAX_BEAT_RATE: f32 = 4.0;
/// Upper bound of the initial beat-time capacity.
const MAX_BEAT_CAPACITY_HINT: usize = 256;

/// Tuning of [`RhythmModeAnalyzer`].
#[derive(Clone, Debug, PartialEq)]
pub struct RhythmOptions {
    /// Moving-average window in frames.
    pub energy_window: usize,
    /// Beat fires when energy exceeds `beat_threshold × moving average`.
    pub beat_threshold: f32,
    /// Debounce between two beats.
    pub min_beat_interval: Duration,
    /// Longest interval still considered part of a rhythm (informational).
    pub max_beat_interval: Duration,
    pub intensity_alpha: f32,
    /// Minimum time between two mode switches.
    pub mode_hold: Duration,
    /// Trailing window for beat density.
    pub beat_window: Duration,
}

impl Default for RhythmOptions {
    fn default() -> Self {
        Self {
            energy_window: 48, // ≈1.1s at 44.1kHz/1024
            beat_threshold: 1.35,
            min_beat_interval: Duration::from_millis(160),
            max_beat_interval: Duration::from_millis(1200),
            intensity_alpha: 0.18,
            mode_hold: Duration::from_millis(2500),
            beat_window: Duration::from_secs(2),
        }
    }
}

impl RhythmOptions {
    /// Replace every unset (zero / non-positive) field with its default.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if self.energy_window == 0 {
            self.energy_window = d.energy_window;
        }
        if self.beat_threshold.is_nan() || self.beat_threshold <= 0.0 {
            self.beat_threshold = d.beat_threshold;
        }
        if self.min_beat_interval.is_zero() {
            self.min_beat_interval = d.min_beat_interval;
        }
        if self.max_beat_interval.is_zero() {
            self.max_beat_interval = d.max_beat_interval;
        }
        if self.intensity_alpha.is_nan() || self.intensity_alpha <= 0.0 {
            self.intensity_alpha = d.intensity_alpha;
        }
        if self.mode_hold.is_zero() {
            self.mode_hold = d.mode_hold;
        }
        if self.beat_window.is_zero() {
            self.beat_window = d.beat_window;
        }
        self
    }
}

impl From<&RhythmConfig> for RhythmOptions {
    fn from(c: &RhythmConfig) -> Self {
        Self {
            energy_window: c.energy_window,
            beat_threshold: c.beat_threshold,
            min_beat_interval: Duration::from_millis(c.min_beat_interval_ms),
            max_beat_interval: Duration::from_millis(c.max_beat_interval_ms),
            intensity_alpha: c.intensity_alpha,
            mode_hold: Duration::from_millis(c.mode_hold_ms),
            beat_window: Duration::from_millis(c.beat_window_ms),
        }
        .sanitized()
    }
}

/// Beat detection, energy tracking and mood (mode) estimation.
///
/// Keeps a fixed-capacity energy ring with a running sum for an O(1)
/// moving average, an adaptive noise floor, a decaying peak envelope and
/// the beat timestamps of the trailing density window. Memory stays
/// bounded for the lifetime of the session.
///
/// # Example
/// ```
/// use hf_audio::rhythm::{RhythmModeAnalyzer, RhythmOptions};
/// use hf_core::frame::{Features, LightingMode};
/// use std::time::Instant;
///
/// let mut analyzer = RhythmModeAnalyzer::new(RhythmOptions::default());
/// let now = Instant::now();
/// let out = analyzer.process(now, &Features::silent(now));
/// assert!(!out.beat);
/// assert_eq!(out.mode, LightingMode::EnergyPulse);
/// ```
pub struct RhythmModeAnalyzer {
    opts: RhythmOptions,

    energy_history: Vec<f32>,
    energy_sum: f64,
    energy_count: usize,
    energy_index: usize,

    last_beat: Option<Instant>,
    beat_times: VecDeque<Instant>,
    current_mode: LightingMode,
    last_mode_switch: Option<Instant>,
    intensity: f32,
    noise_floor: f32,
    peak_energy: f32,
}

impl RhythmModeAnalyzer {
    /// Create an analyzer. Unset options fall back to their defaults.
    #[must_use]
    pub fn new(opts: RhythmOptions) -> Self {
        let opts = opts.sanitized();
        // Debounce bounds how many beats can sit in the density window;
        // au-delà du plafond la deque grandit d'elle-même.
        let max_beats = ((opts.beat_window.as_secs_f64() / opts.min_beat_interval.as_secs_f64())
            .ceil() as usize
            + 1)
        .min(MAX_BEAT_CAPACITY_HINT);
        Self {
            energy_history: vec![0.0; opts.energy_window],
            energy_sum: 0.0,
            energy_count: 0,
            energy_index: 0,
            last_beat: None,
            beat_times: VecDeque::with_capacity(max_beats),
            current_mode: LightingMode::EnergyPulse,
            last_mode_switch: None,
            intensity: 0.0,
            noise_floor: 1e-3,
            peak_energy: 1e-2,
            opts,
        }
    }

    /// Ingest the features of one frame and return the rhythmic state.
    pub fn process(&mut self, ts: Instant, features: &Features) -> RhythmOutput {
        let last_switch = *self.last_mode_switch.get_or_insert(ts);

        let energy = if features.rms > 0.0 && features.rms.is_finite() {
            features.rms
        } else {
            EPSILON
        };

        self.noise_floor = ema(self.noise_floor, energy, NOISE_FLOOR_ALPHA);
        let peak_alpha = if energy > self.peak_energy {
            PEAK_ATTACK_ALPHA
        } else {
            PEAK_RELEASE_ALPHA
        };
        self.peak_energy = ema(self.peak_energy, energy, peak_alpha)
            .max(self.noise_floor * PEAK_FLOOR_RATIO);

        let avg_energy = self.push_energy(energy);

        let energy_norm = ((energy - self.noise_floor)
            / (self.peak_energy - self.noise_floor + EPSILON))
            .clamp(0.0, 1.0);

        let (beat, beat_strength) = self.detect_beat(ts, energy, avg_energy);
        if beat {
            self.last_beat = Some(ts);
            self.beat_times.push_back(ts);
        }
        self.prune_beats(ts);

        let beat_density = (self.beat_times.len() as f32
            / self.opts.beat_window.as_secs_f32()
            / MAX_BEAT_RATE)
            .clamp(0.0, 1.0);

        let centroid_norm = clamp_finite(features.spectral_centroid_norm, 0.0, 1.0);
        let instant =
            (0.65 * energy_norm + 0.25 * beat_density + 0.10 * centroid_norm).clamp(0.0, 1.0);
        self.intensity = ema(self.intensity, instant, self.opts.intensity_alpha);

        self.update_mode(ts, last_switch, energy_norm, beat_density, centroid_norm);

        RhythmOutput {
            beat,
            beat_strength,
            energy,
            energy_norm,
            intensity: self.intensity,
            beat_density,
            mode: self.current_mode,
        }
    }

    /// Push into the ring, evicting the oldest entry, and return the moving average.
    fn push_energy(&mut self, energy: f32) -> f32 {
        let slot = &mut self.energy_history[self.energy_index];
        self.energy_sum -= f64::from(*slot);
        *slot = energy;
        self.energy_sum = (self.energy_sum + f64::from(energy)).max(0.0);
        self.energy_index = (self.energy_index + 1) % self.energy_history.len();
        if self.energy_count < self.energy_history.len() {
            self.energy_count += 1;
        }
        (self.energy_sum / self.energy_count.max(1) as f64) as f32
    }

    fn detect_beat(&self, ts: Instant, energy: f32, avg_energy: f32) -> (bool, f32) {
        if avg_energy <= EPSILON {
            return (false, 0.0);
        }
        if self
            .last_beat
            .is_some_and(|last| ts.saturating_duration_since(last) < self.opts.min_beat_interval)
        {
            return (false, 0.0);
        }

        let threshold = self.opts.beat_threshold * avg_energy;
        if energy <= threshold {
            return (false, 0.0);
        }

        let overdrive =
            ((energy - threshold) / (self.peak_energy - threshold + EPSILON)).clamp(0.0, 1.0);
        (true, overdrive)
    }

    fn prune_beats(&mut self, now: Instant) {
        while let Some(&oldest) = self.beat_times.front() {
            if now.saturating_duration_since(oldest) >= self.opts.beat_window {
                self.beat_times.pop_front();
            } else {
                break;
            }
        }
    }

    fn update_mode(
        &mut self,
        ts: Instant,
        last_switch: Instant,
        energy_norm: f32,
        beat_density: f32,
        centroid_norm: f32,
    ) {
        if ts.saturating_duration_since(last_switch) < self.opts.mode_hold {
            return;
        }

        let next = match self.current_mode {
            LightingMode::EnergyPulse => {
                let bright_and_loud = energy_norm > 0.6 && centroid_norm > 0.45;
                let busy = beat_density > 0.55 && centroid_norm > 0.4 && energy_norm > 0.5;
                if bright_and_loud || busy {
                    LightingMode::SpectrumFlow
                } else {
                    LightingMode::EnergyPulse
                }
            }
            LightingMode::SpectrumFlow => {
                let dull_or_quiet = energy_norm < 0.35 || centroid_norm < 0.3;
                let sparse = beat_density < 0.25 && energy_norm < 0.45;
                if dull_or_quiet || sparse {
                    LightingMode::EnergyPulse
                } else {
                    LightingMode::SpectrumFlow
                }
            }
        };

        if next != self.current_mode {
            log::debug!(
                "mode {} → {} (energy {energy_norm:.2}, density {beat_density:.2}, centroid {centroid_norm:.2})",
                self.current_mode,
                next
            );
            self.current_mode = next;
            self.last_mode_switch = Some(ts);
        }
    }

    /// Current lighting mode.
    #[must_use]
    pub fn mode(&self) -> LightingMode {
        self.current_mode
    }

    /// Smoothed intensity [0, 1].
    #[must_use]
    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Adaptive noise floor.
    #[must_use]
    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    /// Decaying peak envelope.
    #[must_use]
    pub fn peak_envelope(&self) -> f32 {
        self.peak_energy
    }

    /// Effective options.
    #[must_use]
    pub fn options(&self) -> &RhythmOptions {
        &self.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(10);

    fn features(ts: Instant, rms: f32, centroid: f32) -> Features {
        Features {
            rms,
            spectral_centroid_norm: centroid,
            ..Features::silent(ts)
        }
    }

    #[test]
    fn silence_never_beats_and_fades_out() {
        let mut a = RhythmModeAnalyzer::new(RhythmOptions::default());
        let t0 = Instant::now();
        let mut last = RhythmOutput::default();
        for i in 0..400u32 {
            let ts = t0 + STEP * i;
            last = a.process(ts, &features(ts, 0.0, 0.0));
            assert!(!last.beat, "beat on silence at frame {i}");
            assert!(last.energy > 0.0, "energy floored at epsilon");
        }
        assert!(last.intensity < 1e-3, "intensity {}", last.intensity);
        assert!(last.energy_norm.abs() < f32::EPSILON);
        assert_eq!(last.mode, LightingMode::EnergyPulse);
    }

    #[test]
    fn spikes_inside_debounce_yield_one_beat() {
        let mut a = RhythmModeAnalyzer::new(RhythmOptions::default());
        let t0 = Instant::now();
        let mut beats = 0;
        for i in 0..100u32 {
            let ts = t0 + STEP * i;
            // Spikes at 600ms and 700ms: 100ms apart, below the 160ms debounce.
            let rms = if i == 60 || i == 70 { 0.8 } else { 0.05 };
            if a.process(ts, &features(ts, rms, 0.2)).beat {
                beats += 1;
            }
        }
        assert_eq!(beats, 1);
    }

    #[test]
    fn beats_respect_min_interval_and_density_saturates() {
        let mut a = RhythmModeAnalyzer::new(RhythmOptions::default());
        let t0 = Instant::now();
        let mut last_beat: Option<Instant> = None;
        let mut max_density = 0.0f32;
        for i in 0..600u32 {
            let ts = t0 + STEP * i;
            // Every other frame is a spike: far more than the detector may accept.
            let rms = if i % 2 == 0 { 0.9 } else { 0.01 };
            let out = a.process(ts, &features(ts, rms, 0.3));
            assert!((0.0..=1.0).contains(&out.beat_strength));
            assert!((0.0..=1.0).contains(&out.beat_density));
            if out.beat {
                if let Some(prev) = last_beat {
                    assert!(ts - prev >= Duration::from_millis(160));
                }
                last_beat = Some(ts);
            }
            max_density = max_density.max(out.beat_density);
        }
        assert!(max_density <= 1.0);
        assert!(max_density > 0.5, "density only reached {max_density}");
    }

    #[test]
    fn periodic_bursts_raise_density() {
        let mut a = RhythmModeAnalyzer::new(RhythmOptions::default());
        let t0 = Instant::now();
        let mut beat_times = Vec::new();
        let mut last = RhythmOutput::default();
        for i in 0..800u32 {
            let ts = t0 + STEP * i;
            let burst = i % 50 == 0 && i > 0;
            let rms = if burst { 0.5 } else { 0.05 };
            last = a.process(ts, &features(ts, rms, 0.3));
            if last.beat {
                beat_times.push(ts);
            }
            assert!(last.beat_density <= 1.0);
        }
        assert!(beat_times.len() >= 12, "only {} beats", beat_times.len());
        for pair in beat_times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(160));
        }
        // Four bursts in the trailing 2s window: 4 / 2s / 4 = 0.5.
        assert!((last.beat_density - 0.5).abs() < 0.13, "density {}", last.beat_density);
    }

    #[test]
    fn peak_envelope_never_collapses_below_noise_floor() {
        let mut a = RhythmModeAnalyzer::new(RhythmOptions::default());
        let t0 = Instant::now();
        for i in 0..500u32 {
            let ts = t0 + STEP * i;
            let rms = if i < 250 { 0.4 } else { 0.0 };
            a.process(ts, &features(ts, rms, 0.1));
            assert!(a.peak_envelope() >= a.noise_floor() * PEAK_FLOOR_RATIO - 1e-9);
        }
    }

    #[test]
    fn mode_switches_respect_hold() {
        let opts = RhythmOptions::default();
        let hold = opts.mode_hold;
        let mut a = RhythmModeAnalyzer::new(opts);
        let t0 = Instant::now();

        let mut state = 0x9E37_79B9u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        let mut switches: Vec<Instant> = Vec::new();
        let mut mode = a.mode();
        let mut loud = false;
        let mut phase_left = 0u32;
        for i in 0..12_000u32 {
            if phase_left == 0 {
                loud = !loud;
                phase_left = 20 + next() % 400; // 0.2s – 4.2s phases
            }
            phase_left -= 1;
            let ts = t0 + STEP * i;
            let jitter = (next() % 100) as f32 / 1000.0;
            let f = if loud {
                features(ts, 0.45 + jitter, 0.6 + jitter)
            } else {
                features(ts, 0.01 + jitter / 10.0, 0.1 + jitter)
            };
            let out = a.process(ts, &f);
            if out.mode != mode {
                switches.push(ts);
                mode = out.mode;
            }
        }

        assert!(switches.len() >= 2, "only {} switches", switches.len());
        assert!(switches[0] - t0 >= hold);
        for pair in switches.windows(2) {
            assert!(pair[1] - pair[0] >= hold, "switches {:?} apart", pair[1] - pair[0]);
        }
    }

    #[test]
    fn mode_is_held_during_first_hold_period() {
        let mut a = RhythmModeAnalyzer::new(RhythmOptions::default());
        let t0 = Instant::now();
        // Loud and bright from the very first frame: still EnergyPulse until 2.5s.
        for i in 0..249u32 {
            let ts = t0 + STEP * i;
            let out = a.process(ts, &features(ts, 0.6, 0.7));
            assert_eq!(out.mode, LightingMode::EnergyPulse, "frame {i}");
        }
    }

    #[test]
    fn non_finite_energy_is_treated_as_silence() {
        let mut a = RhythmModeAnalyzer::new(RhythmOptions::default());
        let t0 = Instant::now();
        for (i, rms) in [f32::INFINITY, f32::NAN, 0.05, 0.0].into_iter().cycle().take(200).enumerate() {
            let ts = t0 + STEP * i as u32;
            let f = Features {
                spectral_centroid_norm: f32::NAN,
                ..features(ts, rms, 0.0)
            };
            let out = a.process(ts, &f);
            assert!(out.energy.is_finite());
            assert!((0.0..=1.0).contains(&out.energy_norm), "energy_norm {}", out.energy_norm);
            assert!((0.0..=1.0).contains(&out.intensity), "intensity {}", out.intensity);
            assert!((0.0..=1.0).contains(&out.beat_strength));
        }
        assert!(a.noise_floor().is_finite());
        assert!(a.peak_envelope().is_finite());
    }

    #[test]
    fn huge_beat_window_keeps_a_small_initial_capacity() {
        let a = RhythmModeAnalyzer::new(RhythmOptions {
            beat_window: Duration::from_secs(u64::from(u32::MAX)),
            min_beat_interval: Duration::from_nanos(1),
            ..RhythmOptions::default()
        });
        assert!(a.beat_times.capacity() < 1024, "capacity {}", a.beat_times.capacity());
    }

    #[test]
    fn options_from_config_sanitizes() {
        let cfg = RhythmConfig {
            energy_window: 0,
            beat_window_ms: 0,
            ..RhythmConfig::default()
        };
        let opts = RhythmOptions::from(&cfg);
        assert_eq!(opts.energy_window, 48);
        assert_eq!(opts.beat_window, Duration::from_secs(2));
        assert_eq!(opts.min_beat_interval, Duration::from_millis(160));
    }
}
