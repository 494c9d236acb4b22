/// Command-line surface and stage wiring of the hueflow binary.
pub mod cli;
pub mod pipeline;
