use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hf_core::config::{SyncConfig, load_config};

/// hueflow — music-reactive light controller.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fichier de configuration TOML. Défaut : config/default.toml.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Index du périphérique d'entrée (voir --list-devices). Défaut : périphérique système.
    #[arg(long)]
    pub device: Option<usize>,

    /// Lister les périphériques d'entrée puis quitter.
    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    /// Fréquence d'échantillonnage (0 = défaut du périphérique).
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Taille de trame d'analyse en échantillons.
    #[arg(long)]
    pub frame_size: Option<usize>,

    /// Nombre de canaux capturés (plafonné au maximum du périphérique).
    #[arg(long)]
    pub channels: Option<u16>,

    /// Latence d'entrée en ms (0 = défaut du périphérique).
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Écrire les commandes en JSON (une par ligne) sur stdout au lieu de les journaliser.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Journaliser l'état du mapper sous forme de barres (niveau debug).
    #[arg(long, default_value_t = false)]
    pub visualize: bool,

    /// Niveau de log : error, warn, info, debug, trace. Défaut : warn (debug avec --visualize).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Effective log filter.
    #[must_use]
    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level.as_deref() {
            Some(level) => level.parse().unwrap_or(log::LevelFilter::Warn),
            None if self.visualize => log::LevelFilter::Debug,
            None => log::LevelFilter::Warn,
        }
    }

    /// Overwrite config values with the flags given on the command line.
    pub fn apply_overrides(&self, config: &mut SyncConfig) {
        let audio = &mut config.audio;
        if let Some(v) = self.sample_rate {
            audio.sample_rate = v;
        }
        if let Some(v) = self.frame_size {
            audio.frame_size = v;
        }
        if let Some(v) = self.channels {
            audio.channels = v;
        }
        if let Some(v) = self.latency_ms {
            audio.latency_ms = v;
        }
    }

    /// Load the config file (or defaults if it is missing), apply CLI overrides, validate.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or invalid, or if the
    /// merged configuration fails validation.
    pub fn resolve_config(&self) -> Result<SyncConfig> {
        let mut config = if self.config.exists() {
            load_config(&self.config)?
        } else {
            log::warn!(
                "Config introuvable : {}. Utilisation des défauts.",
                self.config.display()
            );
            SyncConfig::default()
        };
        self.apply_overrides(&mut config);
        config
            .validate()
            .context("Configuration invalide après application des options")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        let argv = std::iter::once("hueflow").chain(args.iter().copied());
        match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(e) => panic!("parse failed: {e}"),
        }
    }

    #[test]
    fn log_level_defaults() {
        assert_eq!(parse(&[]).log_filter(), log::LevelFilter::Warn);
        assert_eq!(parse(&["--visualize"]).log_filter(), log::LevelFilter::Debug);
        assert_eq!(
            parse(&["--visualize", "--log-level", "info"]).log_filter(),
            log::LevelFilter::Info
        );
        assert_eq!(parse(&["--log-level", "bogus"]).log_filter(), log::LevelFilter::Warn);
    }

    #[test]
    fn flags_override_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "[audio]\nframe_size = 512\nchannels = 1")?;
        let path = file.path().to_string_lossy().to_string();

        let cli = parse(&["--config", &path, "--channels", "2", "--sample-rate", "48000"]);
        let config = cli.resolve_config()?;
        assert_eq!(config.audio.frame_size, 512);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.sample_rate, 48_000);
        Ok(())
    }

    #[test]
    fn missing_file_falls_back_to_defaults() -> Result<()> {
        let cli = parse(&["--config", "/nonexistent/hueflow.toml"]);
        assert_eq!(cli.resolve_config()?, SyncConfig::default());
        Ok(())
    }

    #[test]
    fn invalid_override_is_rejected() {
        let cli = parse(&["--config", "/nonexistent/hueflow.toml", "--frame-size", "0"]);
        assert!(cli.resolve_config().is_err());
    }

    #[test]
    fn device_flags() {
        let cli = parse(&["--device", "3", "--json", "--list-devices"]);
        assert_eq!(cli.device, Some(3));
        assert!(cli.json);
        assert!(cli.list_devices);
    }
}
