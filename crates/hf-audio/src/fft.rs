use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

/// FFT pipeline: Hann-windowed real FFT using realfft.
///
/// Pre-allocates the FFT plan, the window and every scratch buffer for a
/// zero-allocation hot path. Magnitudes are raw `|X_k|` (not normalized by N).
///
/// # Example
/// ```
/// use hf_audio::fft::FftPipeline;
/// let fft = FftPipeline::new(2048);
/// assert_eq!(fft.bins(), 1025);
/// ```
pub struct FftPipeline {
    fft_size: usize,
    input_buf: Vec<f32>,
    spectrum_buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
    /// Hann window coefficients.
    window: Vec<f32>,
}

impl FftPipeline {
    /// Create a new FFT pipeline with the given window size.
    ///
    /// # Panics
    /// Panics if `size` is 0. Callers validate the size first.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "FFT size must be > 0");

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);

        let input_buf = plan.make_input_vec();
        let spectrum_buf = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let magnitudes = vec![0.0; spectrum_buf.len()];

        Self {
            fft_size: size,
            input_buf,
            spectrum_buf,
            scratch,
            magnitudes,
            plan,
            window: hann_window(size),
        }
    }

    /// Window `samples`, run the forward FFT and return the `N/2+1` bin magnitudes.
    ///
    /// The returned slice is owned by the pipeline and overwritten on the next call.
    ///
    /// # Example
    /// ```
    /// use hf_audio::fft::FftPipeline;
    /// let mut fft = FftPipeline::new(256);
    /// let samples = vec![0.0f32; 256];
    /// let spectrum = fft.process(&samples);
    /// assert_eq!(spectrum.len(), 129); // N/2 + 1
    /// ```
    pub fn process(&mut self, samples: &[f32]) -> &[f32] {
        let n = self.fft_size.min(samples.len());

        // Copy and window
        for (i, slot) in self.input_buf.iter_mut().enumerate() {
            *slot = if i < n {
                samples[i] * self.window[i]
            } else {
                0.0
            };
        }

        if self
            .plan
            .process_with_scratch(
                &mut self.input_buf,
                &mut self.spectrum_buf,
                &mut self.scratch,
            )
            .is_err()
        {
            // Only reachable with mismatched buffer lengths, which `new` rules out.
            self.magnitudes.fill(0.0);
            return &self.magnitudes;
        }

        // hypot : pas de débordement de re² + im² sur les trames saturées.
        for (mag, c) in self.magnitudes.iter_mut().zip(&self.spectrum_buf) {
            *mag = c.re.hypot(c.im);
        }
        &self.magnitudes
    }

    /// Magnitudes from the last `process` call.
    #[must_use]
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Number of spectrum bins (`N/2 + 1`).
    #[must_use]
    pub fn bins(&self) -> usize {
        self.magnitudes.len()
    }

    /// FFT window size.
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }
}

/// Hann window `0.5 − 0.5·cos(2πi/(n−1))`. A single-sample window is `[1.0]`.
///
/// # Example
/// ```
/// use hf_audio::fft::hann_window;
/// let w = hann_window(5);
/// assert!(w[0].abs() < 1e-6);
/// assert!((w[2] - 1.0).abs() < 1e-6);
/// assert_eq!(hann_window(1), vec![1.0]);
/// ```
#[must_use]
pub fn hann_window(n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (n - 1) as f32;
            (0..n)
                .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
                .collect()
        }
    }
}
