use crate::frame::{LightCommand, VizSnapshot};

/// Applique les commandes HSV sur l'ampoule (ou tout autre actionneur).
///
/// Delivery failures are the implementor's concern: they are returned to the
/// caller, never retried by the pipeline.
///
/// # Example
/// ```
/// use hf_core::traits::Actuator;
/// use hf_core::frame::LightCommand;
///
/// struct Recorder(Vec<(u16, u8, u8)>);
/// impl Actuator for Recorder {
///     fn send(&mut self, cmd: &LightCommand) -> anyhow::Result<()> {
///         self.0.push(cmd.triple());
///         Ok(())
///     }
///     fn name(&self) -> &'static str { "recorder" }
/// }
/// ```
pub trait Actuator: Send {
    /// Deliver one command.
    ///
    /// # Errors
    /// Returns an error if the command could not be delivered.
    fn send(&mut self, cmd: &LightCommand) -> anyhow::Result<()>;

    /// Nom lisible pour les logs.
    fn name(&self) -> &'static str;
}

/// Reçoit un snapshot de l'état du mapper à chaque frame.
///
/// CONTRAT : ne doit PAS bloquer. Le sink peut throttler ou ignorer des
/// snapshots de son côté sans effet sur le pipeline.
///
/// # Example
/// ```
/// use hf_core::traits::VisualizationSink;
/// use hf_core::frame::VizSnapshot;
///
/// struct Last(Option<VizSnapshot>);
/// impl VisualizationSink for Last {
///     fn update(&mut self, snapshot: &VizSnapshot) { self.0 = Some(*snapshot); }
/// }
/// ```
pub trait VisualizationSink: Send {
    /// Accept the latest snapshot.
    fn update(&mut self, snapshot: &VizSnapshot);
}
