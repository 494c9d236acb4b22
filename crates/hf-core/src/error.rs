use thiserror::Error;

/// Errors originating from the core module.
///
/// Every variant signals a caller contract violation. They are reported as-is,
/// never corrected behind the caller's back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Invalid configuration value or structure.
    #[error("Configuration invalide : {0}")]
    Config(String),

    /// A frame did not have the length the analyzer was built for.
    #[error("Longueur de frame invalide : attendu {expected}, reçu {actual}")]
    FrameLength {
        /// Configured frame size.
        expected: usize,
        /// Length of the frame actually supplied.
        actual: usize,
    },

    /// A frequency band with inverted or negative edges.
    #[error("Bande de fréquence invalide #{index} : [{low}, {high}] Hz")]
    InvalidBand {
        /// Band position (0 = bass, 1 = mid, 2 = treble).
        index: usize,
        /// Lower edge in Hz.
        low: f32,
        /// Upper edge in Hz.
        high: f32,
    },
}
