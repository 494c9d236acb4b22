/// Mapping from audio analysis to light commands, plus the actuator and
/// visualization collaborators.
pub mod actuator;
pub mod mapper;
pub mod viz;

pub use actuator::{JsonLinesActuator, LogActuator};
pub use mapper::{LightMapper, MapperOptions};
