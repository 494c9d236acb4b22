use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use hf_app::pipeline::{MappingStats, PipelineParts, spawn_pipeline};
use hf_audio::stage::CancelToken;
use hf_core::config::SyncConfig;
use hf_core::frame::{AudioFrame, LightCommand};
use hf_core::traits::Actuator;
use hf_light::viz::SnapshotBuffer;

const SAMPLE_RATE: u32 = 44_100;
const FRAME_SIZE: usize = 1024;

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<LightCommand>>>);

impl Recorder {
    fn commands(&self) -> Vec<LightCommand> {
        self.0.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Actuator for Recorder {
    fn send(&mut self, cmd: &LightCommand) -> Result<()> {
        if let Ok(mut v) = self.0.lock() {
            v.push(*cmd);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn frame_duration() -> Duration {
    Duration::from_secs_f64(FRAME_SIZE as f64 / f64::from(SAMPLE_RATE))
}

/// Stereo frame of a 100Hz sine at `amplitude`, same signal on both channels.
fn stereo_sine(amplitude: f32, captured_at: Instant) -> AudioFrame {
    let mut samples = Vec::with_capacity(FRAME_SIZE * 2);
    for i in 0..FRAME_SIZE {
        let t = i as f32 / SAMPLE_RATE as f32;
        let v = amplitude * (2.0 * std::f32::consts::PI * 100.0 * t).sin();
        samples.push(v);
        samples.push(v);
    }
    AudioFrame {
        channels: 2,
        samples,
        captured_at: Some(captured_at),
    }
}

/// Push every frame, close the input and run both stages to completion.
fn run(frames: Vec<AudioFrame>, recorder: &Recorder, sink: SnapshotBuffer) -> Result<MappingStats> {
    let mut config = SyncConfig::default();
    config.audio.frame_size = FRAME_SIZE;

    let (tx, rx) = flume::bounded(frames.len().max(1));
    for f in frames {
        tx.send(f)?;
    }
    drop(tx);

    let parts = PipelineParts::from_config(
        &config,
        SAMPLE_RATE,
        Box::new(recorder.clone()),
        Some(Box::new(sink)),
    )?;
    let handles = spawn_pipeline(parts, rx, &CancelToken::new())?;
    handles.join()
}

#[test]
fn silence_end_to_end() -> Result<()> {
    let t0 = Instant::now();
    let frames: Vec<AudioFrame> = (0..200u32)
        .map(|k| AudioFrame {
            channels: 2,
            samples: vec![0.0; FRAME_SIZE * 2],
            captured_at: Some(t0 + frame_duration() * k),
        })
        .collect();

    let recorder = Recorder::default();
    let (sink, mut snapshots) = SnapshotBuffer::new();
    let stats = run(frames, &recorder, sink)?;

    assert_eq!(stats.frames, 200);
    assert_eq!(stats.beats, 0);
    assert!(stats.commands <= 1);
    assert!(recorder.commands().len() <= 1);

    let last = snapshots.read();
    assert!(last.intensity < 1e-3, "intensity {}", last.intensity);
    assert!(!last.beat);
    Ok(())
}

#[test]
fn periodic_bursts_end_to_end() -> Result<()> {
    let t0 = Instant::now();
    let half_second = Duration::from_millis(500);
    let mut frames = Vec::new();
    let mut previous_slot = 0u128;
    for k in 0..350u32 {
        let ts = t0 + frame_duration() * k;
        let slot = (frame_duration() * k).as_millis() / half_second.as_millis();
        let burst = k > 0 && slot != previous_slot;
        previous_slot = slot;
        frames.push(stereo_sine(if burst { 0.8 } else { 0.05 }, ts));
    }

    let recorder = Recorder::default();
    let (sink, _snapshots) = SnapshotBuffer::new();
    let stats = run(frames, &recorder, sink)?;

    assert_eq!(stats.frames, 350);
    assert!(stats.beats >= 10, "only {} beats", stats.beats);
    let Some(gap) = stats.min_beat_gap else { panic!("no beat pair") };
    assert!(gap >= Duration::from_millis(160), "beats {gap:?} apart");
    assert!(stats.max_beat_density > 0.3, "density {}", stats.max_beat_density);
    assert!(stats.max_beat_density <= 1.0);

    let commands = recorder.commands();
    assert!(commands.len() as u64 == stats.commands);
    for cmd in &commands {
        assert!(cmd.hue < 360);
        assert!(cmd.saturation <= 100);
        assert!((1..=100).contains(&cmd.brightness));
    }
    Ok(())
}

#[test]
fn overloaded_frame_then_silence_recovers() -> Result<()> {
    let t0 = Instant::now();
    let mut frames = vec![stereo_sine(1e18, t0)];
    frames.extend((1..200u32).map(|k| AudioFrame {
        channels: 2,
        samples: vec![0.0; FRAME_SIZE * 2],
        captured_at: Some(t0 + frame_duration() * k),
    }));

    let recorder = Recorder::default();
    let (sink, mut snapshots) = SnapshotBuffer::new();
    let stats = run(frames, &recorder, sink)?;
    assert_eq!(stats.frames, 200);

    let commands = recorder.commands();
    assert!(commands.len() >= 2, "mapper froze after the first command");
    for cmd in &commands {
        assert!((1..=100).contains(&cmd.brightness), "{cmd:?}");
    }
    // Retour à la couleur de repos une fois le pic oublié.
    assert_eq!(commands.last().map(LightCommand::triple), Some((40, 38, 28)));

    let last = snapshots.read();
    for v in [last.hue, last.saturation, last.brightness, last.intensity, last.energy] {
        assert!(v.is_finite(), "{last:?}");
    }
    Ok(())
}
