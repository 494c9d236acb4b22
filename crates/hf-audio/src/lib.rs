//! Audio capture, spectral analysis and rhythm tracking for hueflow.

pub mod capture;
pub mod features;
pub mod fft;
pub mod queue;
pub mod rhythm;
pub mod smoothing;
pub mod stage;

pub use features::SpectralAnalyzer;
pub use rhythm::{RhythmModeAnalyzer, RhythmOptions};
