/// Configuration, types, and shared structures for hueflow.
///
/// This crate contains all shared value types, collaborator traits, and
/// configuration logic used across the hueflow workspace.

pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod math;
pub mod traits;

pub use config::SyncConfig;
pub use error::CoreError;
pub use frame::{
    AudioFrame, Effect, Features, FrequencyBand, LightCommand, LightingMode, RhythmOutput,
    VizSnapshot,
};
