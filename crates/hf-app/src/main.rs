use std::io;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use hf_app::cli::Cli;
use hf_app::pipeline::{PipelineParts, STATE_LOG_INTERVAL, spawn_pipeline};
use hf_audio::capture::{AudioCapture, list_input_devices};
use hf_audio::queue::{DEFAULT_CAPACITY, frame_queue};
use hf_audio::stage::{CancelToken, POLL_INTERVAL};
use hf_core::traits::{Actuator, VisualizationSink};
use hf_light::actuator::{JsonLinesActuator, LogActuator};
use hf_light::viz::LogVisualizer;

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_filter())
        .init();

    if cli.list_devices {
        for device in list_input_devices()? {
            println!("{device}");
        }
        return Ok(());
    }

    // 3. Charger la config (fichier + overrides CLI)
    let mut config = cli.resolve_config()?;

    // 4. Annulation : Ctrl+C ou échec d'un stage
    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || handler_cancel.cancel())
        .context("Installation du handler Ctrl+C impossible")?;

    // 5. Démarrer la capture (le flux reste sur le thread principal)
    let (queue, frames) = frame_queue(DEFAULT_CAPACITY);
    let dropped = queue.drop_counter();
    let capture = AudioCapture::start(cli.device, &config.audio, queue)?;
    let params = capture.params();
    config.audio.frame_size = params.frame_size;

    // 6. Collaborateurs
    let actuator: Box<dyn Actuator> = if cli.json {
        Box::new(JsonLinesActuator::new(io::stdout()))
    } else {
        Box::new(LogActuator::new())
    };
    let sink: Option<Box<dyn VisualizationSink>> = cli
        .visualize
        .then(|| Box::new(LogVisualizer::default()) as Box<dyn VisualizationSink>);

    // 7. Lancer les stages
    let parts = PipelineParts::from_config(&config, params.sample_rate, actuator, sink)?
        .with_buffer_pool(capture.buffer_pool());
    let handles = spawn_pipeline(parts, frames, &cancel)?;

    // Les pertes sont signalées ici, jamais depuis le callback audio.
    let mut reported = 0u64;
    let mut last_report = Instant::now();
    while !cancel.is_cancelled() && !handles.any_finished() {
        thread::sleep(POLL_INTERVAL);
        if last_report.elapsed() >= STATE_LOG_INTERVAL {
            let n = dropped.load(Ordering::Relaxed);
            if n > reported {
                log::warn!("capture queue full: {} frame(s) dropped ({n} total)", n - reported);
                reported = n;
            }
            last_report = Instant::now();
        }
    }

    // 8. Arrêt : couper la capture puis attendre les stages
    cancel.cancel();
    drop(capture);
    let stats = handles.join()?;

    log::info!(
        "session: {} frame(s), {} beat(s), {} command(s), {} mode switch(es), {} frame(s) dropped",
        stats.frames,
        stats.beats,
        stats.commands,
        stats.mode_switches,
        dropped.load(Ordering::Relaxed)
    );
    Ok(())
}
