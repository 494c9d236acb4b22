use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use flume::{Receiver, RecvTimeoutError};
use hf_audio::features::SpectralAnalyzer;
use hf_audio::queue::{BufferPool, DEFAULT_CAPACITY};
use hf_audio::rhythm::{RhythmModeAnalyzer, RhythmOptions};
use hf_audio::stage::{CancelToken, POLL_INTERVAL, run_feature_stage};
use hf_core::config::SyncConfig;
use hf_core::frame::{AudioFrame, Features};
use hf_core::traits::{Actuator, VisualizationSink};
use hf_light::mapper::{LightMapper, MapperOptions};

/// Period of the debug state line of the mapping stage.
pub const STATE_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Session counters returned by the mapping stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MappingStats {
    pub frames: u64,
    pub beats: u64,
    pub commands: u64,
    pub mode_switches: u64,
    pub max_beat_density: f32,
    /// Shortest interval observed between two beats.
    pub min_beat_gap: Option<Duration>,
}

/// Rhythm + mapping stage: track the rhythm, map to a color, deliver commands.
///
/// Ends cleanly when the feature channel disconnects or `cancel` is set.
///
/// # Errors
/// Returns the actuator error (after cancelling the other stages) if a
/// command cannot be delivered.
pub fn run_mapping_stage(
    mut rhythm: RhythmModeAnalyzer,
    mut mapper: LightMapper,
    features: &Receiver<Features>,
    actuator: &mut dyn Actuator,
    cancel: &CancelToken,
) -> Result<MappingStats> {
    log::info!("mapping stage started (actuator: {})", actuator.name());

    let mut stats = MappingStats::default();
    let mut last_beat: Option<Instant> = None;
    let mut mode = rhythm.mode();
    let mut last_state_log = Instant::now();

    while !cancel.is_cancelled() {
        if last_state_log.elapsed() >= STATE_LOG_INTERVAL {
            let s = mapper.snapshot();
            log::debug!(
                "state: mode {} hue {:.1} sat {:.1} bright {:.1} sparkle {:.2} intensity {:.2}",
                s.mode,
                s.hue,
                s.saturation,
                s.brightness,
                s.sparkle,
                s.intensity
            );
            last_state_log = Instant::now();
        }

        let feat = match features.recv_timeout(POLL_INTERVAL) {
            Ok(f) => f,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let output = rhythm.process(feat.timestamp, &feat);
        stats.frames += 1;
        stats.max_beat_density = stats.max_beat_density.max(output.beat_density);
        if output.mode != mode {
            stats.mode_switches += 1;
            mode = output.mode;
        }
        if output.beat {
            stats.beats += 1;
            if let Some(prev) = last_beat {
                let gap = feat.timestamp.saturating_duration_since(prev);
                stats.min_beat_gap = Some(stats.min_beat_gap.map_or(gap, |g| g.min(gap)));
            }
            last_beat = Some(feat.timestamp);
        }

        if let Some(cmd) = mapper.apply(&feat, &output) {
            let sent = actuator.send(&cmd).with_context(|| {
                format!(
                    "Envoi de hsv({}, {}, {}) via {} impossible",
                    cmd.hue,
                    cmd.saturation,
                    cmd.brightness,
                    actuator.name()
                )
            });
            if let Err(e) = sent {
                cancel.cancel();
                return Err(e);
            }
            stats.commands += 1;
        }
    }

    log::info!(
        "mapping stage stopped: {} frame(s), {} beat(s), {} command(s)",
        stats.frames,
        stats.beats,
        stats.commands
    );
    Ok(stats)
}

/// Everything the two processing stages need, besides the captured frames.
pub struct PipelineParts {
    pub analyzer: SpectralAnalyzer,
    pub rhythm: RhythmModeAnalyzer,
    pub mapper: LightMapper,
    pub actuator: Box<dyn Actuator>,
    /// Where the feature stage returns captured sample buffers.
    pub recycle: Option<BufferPool>,
}

impl PipelineParts {
    /// Build the analyzers and mapper from a validated configuration.
    ///
    /// `sample_rate` is the rate the stream was actually opened with.
    ///
    /// # Errors
    /// Returns an error if the analyzer rejects the frame size, sample rate or bands.
    pub fn from_config(
        config: &SyncConfig,
        sample_rate: u32,
        actuator: Box<dyn Actuator>,
        sink: Option<Box<dyn VisualizationSink>>,
    ) -> Result<Self> {
        let analyzer = SpectralAnalyzer::new(
            sample_rate as f32,
            config.audio.frame_size,
            config.bands.as_array(),
        )
        .and_then(|a| a.with_rolloff_ratio(config.bands.rolloff_ratio))
        .context("Construction de l'analyseur spectral impossible")?;

        let mut mapper = LightMapper::new(MapperOptions::from(&config.light));
        if let Some(sink) = sink {
            mapper = mapper.with_sink(sink);
        }

        Ok(Self {
            analyzer,
            rhythm: RhythmModeAnalyzer::new(RhythmOptions::from(&config.rhythm)),
            mapper,
            actuator,
            recycle: None,
        })
    }

    /// Return captured buffers to `pool` once analyzed.
    #[must_use]
    pub fn with_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.recycle = Some(pool);
        self
    }
}

/// Join handles of the two processing threads.
pub struct PipelineHandles {
    feature: JoinHandle<Result<u64>>,
    mapping: JoinHandle<Result<MappingStats>>,
}

impl PipelineHandles {
    /// Both stages have returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.feature.is_finished() && self.mapping.is_finished()
    }

    /// Either stage has returned.
    #[must_use]
    pub fn any_finished(&self) -> bool {
        self.feature.is_finished() || self.mapping.is_finished()
    }

    /// Wait for both stages. The first stage error wins.
    ///
    /// # Errors
    /// Returns the stage error, or an error if a stage thread panicked.
    pub fn join(self) -> Result<MappingStats> {
        let feature = self
            .feature
            .join()
            .map_err(|_| anyhow::anyhow!("Le thread d'analyse a paniqué"))?;
        let mapping = self
            .mapping
            .join()
            .map_err(|_| anyhow::anyhow!("Le thread de mapping a paniqué"))?;
        let analyzed = feature?;
        let stats = mapping?;
        log::info!("pipeline stopped: {analyzed} frame(s) analyzed");
        Ok(stats)
    }
}

/// Spawn the feature-extraction and mapping threads, fed by `frames`.
///
/// # Errors
/// Returns an error if a thread cannot be spawned.
pub fn spawn_pipeline(
    parts: PipelineParts,
    frames: Receiver<AudioFrame>,
    cancel: &CancelToken,
) -> Result<PipelineHandles> {
    let PipelineParts {
        analyzer,
        rhythm,
        mapper,
        mut actuator,
        recycle,
    } = parts;
    let (feat_tx, feat_rx) = flume::bounded(DEFAULT_CAPACITY);

    let feature_cancel = cancel.clone();
    let feature = thread::Builder::new()
        .name("hf-features".to_string())
        .spawn(move || {
            run_feature_stage(analyzer, &frames, &feat_tx, recycle.as_ref(), &feature_cancel)
        })
        .context("Lancement du thread d'analyse impossible")?;

    let mapping_cancel = cancel.clone();
    let mapping = thread::Builder::new()
        .name("hf-mapping".to_string())
        .spawn(move || {
            run_mapping_stage(rhythm, mapper, &feat_rx, actuator.as_mut(), &mapping_cancel)
        })
        .context("Lancement du thread de mapping impossible")?;

    Ok(PipelineHandles { feature, mapping })
}
