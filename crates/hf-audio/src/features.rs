use std::time::{Duration, Instant};

use hf_core::error::CoreError;
use hf_core::frame::{Features, FrequencyBand};
use hf_core::math::{EPSILON, clamp_finite, spectral_balance};

use crate::fft::FftPipeline;

/// Fraction of total spectral energy used for the rolloff frequency.
pub const DEFAULT_ROLLOFF_RATIO: f32 = 0.85;

/// Transforme des frames mono en `Features` spectrales.
///
/// Built once per session for a fixed `(sample_rate, frame_size, bands)`.
/// All buffers are sized in the constructor and reused: `process` never
/// allocates.
///
/// # Example
/// ```
/// use hf_audio::features::SpectralAnalyzer;
/// use hf_core::frame::FrequencyBand;
/// use std::time::Instant;
///
/// let mut analyzer = SpectralAnalyzer::new(44100.0, 1024, FrequencyBand::defaults()).unwrap();
/// let features = analyzer.process(&[0.0; 1024], Instant::now()).unwrap();
/// assert!(features.rms.abs() < f32::EPSILON);
/// ```
pub struct SpectralAnalyzer {
    sample_rate: f32,
    frame_size: usize,
    bands: [FrequencyBand; 3],
    /// Inclusive bin ranges, precomputed from `bands`.
    band_bins: [(usize, usize); 3],
    rolloff_ratio: f32,
    bin_width: f32,
    frame_duration: Duration,
    fft: FftPipeline,
}

impl SpectralAnalyzer {
    /// Build an analyzer for `frame_size`-sample frames at `sample_rate` Hz.
    ///
    /// All-zero `bands` fall back to [`FrequencyBand::defaults`].
    ///
    /// # Errors
    /// `CoreError::Config` if `frame_size` is 0 or `sample_rate` is not a
    /// positive finite number, `CoreError::InvalidBand` for inverted bands.
    pub fn new(
        sample_rate: f32,
        frame_size: usize,
        bands: [FrequencyBand; 3],
    ) -> Result<Self, CoreError> {
        if frame_size == 0 {
            return Err(CoreError::Config("frame_size doit être > 0".into()));
        }
        if !(sample_rate > 0.0 && sample_rate.is_finite()) {
            return Err(CoreError::Config(format!(
                "sample_rate doit être > 0 : {sample_rate}"
            )));
        }

        let bands = if bands.iter().all(FrequencyBand::is_unset) {
            FrequencyBand::defaults()
        } else {
            bands
        };
        for (index, band) in bands.iter().enumerate() {
            if band.high < band.low || band.low.is_nan() || band.high.is_nan() {
                return Err(CoreError::InvalidBand {
                    index,
                    low: band.low,
                    high: band.high,
                });
            }
        }

        let fft = FftPipeline::new(frame_size);
        let bin_width = sample_rate / frame_size as f32;
        let bins = fft.bins();
        let band_bins = bands.map(|band| band_bin_range(band, bin_width, bins));

        Ok(Self {
            sample_rate,
            frame_size,
            bands,
            band_bins,
            rolloff_ratio: DEFAULT_ROLLOFF_RATIO,
            bin_width,
            frame_duration: Duration::from_secs_f64(frame_size as f64 / f64::from(sample_rate)),
            fft,
        })
    }

    /// Override the rolloff fraction (default 0.85).
    ///
    /// # Errors
    /// `CoreError::Config` if `ratio` is outside `(0, 1]`.
    pub fn with_rolloff_ratio(mut self, ratio: f32) -> Result<Self, CoreError> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(CoreError::Config(format!(
                "rolloff_ratio hors de (0, 1] : {ratio}"
            )));
        }
        self.rolloff_ratio = ratio;
        Ok(self)
    }

    /// Compute the spectral features of one mono frame.
    ///
    /// # Errors
    /// `CoreError::FrameLength` if `frame.len()` differs from the configured frame size.
    pub fn process(&mut self, frame: &[f32], timestamp: Instant) -> Result<Features, CoreError> {
        if frame.len() != self.frame_size {
            return Err(CoreError::FrameLength {
                expected: self.frame_size,
                actual: frame.len(),
            });
        }

        let bin_width = f64::from(self.bin_width);
        let magnitudes = self.fft.process(frame);

        // Accumulation en f64 : mag² déborde f32 bien avant que les échantillons ne le fassent.
        let mut total_energy = 0.0f64;
        let mut centroid_num = 0.0f64;
        let mut magnitude_sum = 0.0f64;
        let mut peak_magnitude = 0.0f32;
        let mut peak_frequency = 0.0f32;
        for (i, &mag) in magnitudes.iter().enumerate() {
            let m = f64::from(mag);
            let freq = i as f64 * bin_width;
            total_energy += m * m;
            centroid_num += freq * m;
            magnitude_sum += m;
            if mag > peak_magnitude {
                peak_magnitude = mag;
                peak_frequency = freq as f32;
            }
        }

        let nyquist = self.sample_rate / 2.0;
        let centroid = if magnitude_sum > f64::from(EPSILON) {
            (centroid_num / magnitude_sum) as f32
        } else {
            0.0
        };
        let rolloff = self.rolloff(total_energy);

        let mut band_energy = [0.0f64; 3];
        for (energy, &(start, end)) in band_energy.iter_mut().zip(&self.band_bins) {
            *energy = self.fft.magnitudes()[start..=end]
                .iter()
                .map(|&m| f64::from(m) * f64::from(m))
                .sum();
        }
        let band_energy_norm = if total_energy > f64::from(EPSILON) {
            band_energy.map(|e| clamp_finite((e / total_energy) as f32, 0.0, 1.0))
        } else {
            [0.0; 3]
        };

        Ok(Features {
            timestamp,
            rms: rms(frame),
            zero_crossing_rate: zero_crossing_rate(frame),
            spectral_centroid: centroid,
            spectral_centroid_norm: clamp_finite(centroid / nyquist, 0.0, 1.0),
            spectral_rolloff: rolloff,
            spectral_rolloff_norm: clamp_finite(rolloff / nyquist, 0.0, 1.0),
            band_energy: band_energy.map(|e| e as f32),
            band_energy_norm,
            total_energy: total_energy as f32,
            peak_frequency,
            peak_magnitude,
            frame_duration: self.frame_duration,
            balance_low_mid: spectral_balance(band_energy_norm[0], band_energy_norm[1]),
            balance_mid_high: spectral_balance(band_energy_norm[1], band_energy_norm[2]),
        })
    }

    /// Walk bins from the lowest until `rolloff_ratio` of the energy is covered.
    fn rolloff(&self, total_energy: f64) -> f32 {
        if total_energy <= f64::from(EPSILON) {
            return 0.0;
        }
        let target = total_energy * f64::from(self.rolloff_ratio);
        let mut cumulative = 0.0f64;
        for (i, &mag) in self.fft.magnitudes().iter().enumerate() {
            cumulative += f64::from(mag) * f64::from(mag);
            if cumulative >= target {
                return i as f32 * self.bin_width;
            }
        }
        self.sample_rate / 2.0
    }

    /// Configured frame size in samples.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Configured sample rate in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Effective bands (after default substitution).
    #[must_use]
    pub fn bands(&self) -> [FrequencyBand; 3] {
        self.bands
    }

    /// Width of one FFT bin in Hz.
    #[must_use]
    pub fn bin_width(&self) -> f32 {
        self.bin_width
    }
}

/// Bins `[floor(low/bw), ceil(high/bw)]` clamped to the valid range.
fn band_bin_range(band: FrequencyBand, bin_width: f32, bins: usize) -> (usize, usize) {
    let last = bins.saturating_sub(1);
    let low = band.low.max(0.0);
    let high = band.high.max(low);
    let start = ((low / bin_width).floor() as usize).min(last);
    let end = ((high / bin_width).ceil() as usize).min(last);
    (start, end.max(start))
}

/// Root mean square of a frame. 0 for an empty frame.
///
/// # Example
/// ```
/// use hf_audio::features::rms;
/// assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-6);
/// ```
#[must_use]
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / frame.len() as f64).sqrt() as f32
}

/// Fraction of consecutive-sample sign changes. 0 is counted as positive.
///
/// # Example
/// ```
/// use hf_audio::features::zero_crossing_rate;
/// assert!((zero_crossing_rate(&[1.0, -1.0, 1.0]) - 1.0).abs() < 1e-6);
/// assert!(zero_crossing_rate(&[0.5]).abs() < f32::EPSILON);
/// ```
#[must_use]
pub fn zero_crossing_rate(frame: &[f32]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (frame.len() - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;
    const N: usize = 1024;

    fn analyzer() -> SpectralAnalyzer {
        match SpectralAnalyzer::new(SR, N, FrequencyBand::defaults()) {
            Ok(a) => a,
            Err(e) => panic!("analyzer construction failed: {e}"),
        }
    }

    fn sine(freq: f32, amplitude: f32) -> Vec<f32> {
        (0..N)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR).sin())
            .collect()
    }

    /// Deterministic xorshift noise in [-1, 1].
    fn noise(seed: u32, len: usize) -> Vec<f32> {
        let mut state = seed.max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn rejects_bad_construction() {
        assert!(matches!(
            SpectralAnalyzer::new(SR, 0, FrequencyBand::defaults()),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            SpectralAnalyzer::new(0.0, N, FrequencyBand::defaults()),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            SpectralAnalyzer::new(-48000.0, N, FrequencyBand::defaults()),
            Err(CoreError::Config(_))
        ));
        let inverted = [
            FrequencyBand::new(250.0, 20.0),
            FrequencyBand::new(250.0, 2000.0),
            FrequencyBand::new(2000.0, 8000.0),
        ];
        assert!(matches!(
            SpectralAnalyzer::new(SR, N, inverted),
            Err(CoreError::InvalidBand { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_mismatched_frame() {
        let mut a = analyzer();
        let err = a.process(&[0.0; 512], Instant::now());
        assert_eq!(
            err.err(),
            Some(CoreError::FrameLength {
                expected: N,
                actual: 512
            })
        );
    }

    #[test]
    fn rejects_bad_rolloff_ratio() {
        assert!(analyzer().with_rolloff_ratio(0.0).is_err());
        assert!(analyzer().with_rolloff_ratio(1.2).is_err());
        assert!(analyzer().with_rolloff_ratio(0.5).is_ok());
    }

    #[test]
    fn silent_frame_is_all_zero() -> Result<(), CoreError> {
        let f = analyzer().process(&[0.0; N], Instant::now())?;
        assert!(f.rms.abs() < f32::EPSILON);
        assert!(f.total_energy.abs() < f32::EPSILON);
        assert!(f.spectral_centroid_norm.abs() < f32::EPSILON);
        assert!(f.spectral_rolloff_norm.abs() < f32::EPSILON);
        assert!(f.band_energy.iter().all(|e| e.abs() < f32::EPSILON));
        assert!(f.band_energy_norm.iter().all(|e| e.abs() < f32::EPSILON));
        assert!((f.balance_low_mid - 0.5).abs() < f32::EPSILON);
        assert!((f.balance_mid_high - 0.5).abs() < f32::EPSILON);
        Ok(())
    }

    #[test]
    fn sine_peaks_at_nearest_bin() -> Result<(), CoreError> {
        let mut a = analyzer();
        let amplitude = 0.5;
        for freq in [440.0f32, 1000.0, 5000.0] {
            let f = a.process(&sine(freq, amplitude), Instant::now())?;
            let expected_bin = (freq / a.bin_width()).round();
            assert!(
                (f.peak_frequency - expected_bin * a.bin_width()).abs() < 1e-3,
                "{freq} Hz: peak at {} Hz",
                f.peak_frequency
            );
            let expected_rms = amplitude / std::f32::consts::SQRT_2;
            assert!(
                (f.rms - expected_rms).abs() < 0.01,
                "{freq} Hz: rms {} vs {expected_rms}",
                f.rms
            );
        }
        Ok(())
    }

    #[test]
    fn sine_energy_lands_in_its_band() -> Result<(), CoreError> {
        let mut a = analyzer();
        let bass = a.process(&sine(100.0, 0.8), Instant::now())?;
        assert!(bass.band_energy_norm[0] > 0.9, "{:?}", bass.band_energy_norm);
        assert!(bass.balance_low_mid > 0.9);

        let treble = a.process(&sine(4000.0, 0.8), Instant::now())?;
        assert!(treble.band_energy_norm[2] > 0.9, "{:?}", treble.band_energy_norm);
        assert!(treble.balance_mid_high < 0.1);
        assert!(treble.spectral_centroid > bass.spectral_centroid);
        assert!(treble.spectral_rolloff >= 3900.0);
        Ok(())
    }

    #[test]
    fn normalized_fields_stay_in_unit_range() -> Result<(), CoreError> {
        let mut a = analyzer();
        for seed in 1..40u32 {
            let gain = seed as f32 / 10.0;
            let frame: Vec<f32> = noise(seed, N).iter().map(|s| s * gain).collect();
            let f = a.process(&frame, Instant::now())?;
            let normalized = [
                f.spectral_centroid_norm,
                f.spectral_rolloff_norm,
                f.band_energy_norm[0],
                f.band_energy_norm[1],
                f.band_energy_norm[2],
                f.balance_low_mid,
                f.balance_mid_high,
                f.zero_crossing_rate,
            ];
            for v in normalized {
                assert!((0.0..=1.0).contains(&v), "seed {seed}: {v} out of range");
            }
        }
        Ok(())
    }

    #[test]
    fn overloaded_frame_keeps_features_finite() -> Result<(), CoreError> {
        let mut a = analyzer();
        let f = a.process(&sine(100.0, 1e18), Instant::now())?;
        assert!(f.band_energy_norm[0] > 0.9, "{:?}", f.band_energy_norm);
        assert!(f.spectral_centroid_norm > 0.0 && f.spectral_centroid_norm < 0.1);
        let expected_rms = 1e18 / std::f32::consts::SQRT_2;
        assert!((f.rms / expected_rms - 1.0).abs() < 0.01, "rms {}", f.rms);

        // Au-delà, la FFT f32 elle-même déborde : les champs normalisés retombent sur 0.
        let f = a.process(&sine(100.0, f32::MAX), Instant::now())?;
        let normalized = [
            f.spectral_centroid_norm,
            f.spectral_rolloff_norm,
            f.band_energy_norm[0],
            f.band_energy_norm[1],
            f.band_energy_norm[2],
            f.balance_low_mid,
            f.balance_mid_high,
        ];
        for v in normalized {
            assert!((0.0..=1.0).contains(&v), "{v} out of range");
        }
        assert!(f.rms.is_finite());
        Ok(())
    }

    #[test]
    fn frame_duration_matches_rate() -> Result<(), CoreError> {
        let f = analyzer().process(&[0.0; N], Instant::now())?;
        let d = f.frame_duration.as_secs_f64();
        assert!((d - N as f64 / f64::from(SR)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn band_range_clamps_to_spectrum() {
        let (start, end) = band_bin_range(FrequencyBand::new(20000.0, 96000.0), 43.07, 513);
        assert_eq!((start, end), (464, 512));
        let (start, end) = band_bin_range(FrequencyBand::new(-50.0, 0.0), 43.07, 513);
        assert_eq!((start, end), (0, 0));
    }
}
