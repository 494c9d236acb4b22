use std::io::Write;

use anyhow::{Context, Result};
use hf_core::color::command_rgb;
use hf_core::frame::{Effect, LightCommand};
use hf_core::traits::Actuator;
use serde::Serialize;

/// Dry-run actuator: every command becomes an `info` log line.
#[derive(Debug, Default)]
pub struct LogActuator {
    sent: u64,
}

impl LogActuator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands logged so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Actuator for LogActuator {
    fn send(&mut self, cmd: &LightCommand) -> Result<()> {
        self.sent += 1;
        log::info!(
            "hsv({:3}, {:3}, {:3}) #{:06X}",
            cmd.hue,
            cmd.saturation,
            cmd.brightness,
            command_rgb(cmd.hue, cmd.saturation)
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Une ligne JSON par commande.
#[derive(Debug, Serialize)]
struct CommandRecord {
    hue: u16,
    saturation: u8,
    brightness: u8,
    effect: Effect,
    duration_ms: u64,
    rgb: u32,
}

impl From<&LightCommand> for CommandRecord {
    fn from(cmd: &LightCommand) -> Self {
        Self {
            hue: cmd.hue,
            saturation: cmd.saturation,
            brightness: cmd.brightness,
            effect: cmd.effect,
            duration_ms: u64::try_from(cmd.duration.as_millis()).unwrap_or(u64::MAX),
            rgb: command_rgb(cmd.hue, cmd.saturation),
        }
    }
}

/// Writes each command as one JSON object per line, flushed immediately.
///
/// Useful to pipe commands into another process driving a real bulb.
///
/// # Example
/// ```
/// use hf_light::actuator::JsonLinesActuator;
/// use hf_core::frame::{Effect, LightCommand};
/// use hf_core::traits::Actuator;
/// use std::time::Duration;
///
/// let mut act = JsonLinesActuator::new(Vec::new());
/// let cmd = LightCommand { hue: 120, saturation: 100, brightness: 50, effect: Effect::Sudden, duration: Duration::ZERO };
/// act.send(&cmd)?;
/// let line = String::from_utf8(act.into_inner())?;
/// assert!(line.starts_with("{\"hue\":120,"));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct JsonLinesActuator<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesActuator<W> {
    /// Write commands to `out`, typically stdout or a pipe.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Actuator for JsonLinesActuator<W> {
    fn send(&mut self, cmd: &LightCommand) -> Result<()> {
        serde_json::to_writer(&mut self.out, &CommandRecord::from(cmd))
            .context("Sérialisation de la commande impossible")?;
        self.out
            .write_all(b"\n")
            .and_then(|()| self.out.flush())
            .context("Écriture de la commande impossible")
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}
