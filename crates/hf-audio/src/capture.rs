use std::fmt;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hf_core::config::AudioConfig;
use hf_core::frame::AudioFrame;

use crate::queue::{BufferPool, FrameQueue, POOL_SPARE};

/// Fallback sample rate when neither the user nor the device provides one.
pub const FALLBACK_SAMPLE_RATE: u32 = 44_100;
/// Fallback analysis frame size.
pub const FALLBACK_FRAME_SIZE: usize = 1024;

/// Requested rate if positive, else the device default, else 44.1kHz.
#[must_use]
pub fn effective_sample_rate(requested: u32, device_default: u32) -> u32 {
    if requested > 0 {
        requested
    } else if device_default > 0 {
        device_default
    } else {
        FALLBACK_SAMPLE_RATE
    }
}

/// Requested frame size if positive, else 1024.
#[must_use]
pub fn effective_frame_size(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        FALLBACK_FRAME_SIZE
    }
}

/// At least one channel, capped at the device maximum when it is known (`max > 0`).
#[must_use]
pub fn sanitize_channel_count(requested: u16, max: u16) -> u16 {
    if requested == 0 {
        1
    } else if max > 0 && requested > max {
        max
    } else {
        requested
    }
}

/// Requested device index if valid, else the fallback if valid, else 0.
#[must_use]
pub fn effective_device_index(requested: Option<usize>, fallback: Option<usize>, len: usize) -> usize {
    match (requested, fallback) {
        _ if len == 0 => 0,
        (Some(i), _) if i < len => i,
        (_, Some(f)) if f < len => f,
        _ => 0,
    }
}

/// Average interleaved channels into `dst` (cleared first). `channels == 0` is read as mono.
///
/// A trailing partial frame is averaged over the samples it has.
///
/// # Example
/// ```
/// use hf_audio::capture::downmix_to_mono;
/// let mut mono = Vec::new();
/// downmix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2, &mut mono);
/// assert_eq!(mono, vec![0.5, 0.5]);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: usize, dst: &mut Vec<f32>) {
    dst.clear();
    if channels <= 1 {
        dst.extend_from_slice(samples);
        return;
    }
    dst.extend(
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32),
    );
}

/// Resolved capture stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub channels: u16,
    /// Device buffer size in frames derived from the latency override, if any.
    pub buffer_frames: Option<u32>,
}

impl StreamParams {
    /// Merge the configured values with the device capabilities.
    #[must_use]
    pub fn resolve(config: &AudioConfig, device_rate: u32, device_max_channels: u16) -> Self {
        let sample_rate = effective_sample_rate(config.sample_rate, device_rate);
        let buffer_frames = (config.latency_ms > 0).then(|| {
            let frames = u64::from(sample_rate) * config.latency_ms / 1000;
            u32::try_from(frames.max(1)).unwrap_or(u32::MAX)
        });
        Self {
            sample_rate,
            frame_size: effective_frame_size(config.frame_size),
            channels: sanitize_channel_count(config.channels, device_max_channels),
            buffer_frames,
        }
    }
}

/// Accumulates callback-sized chunks into fixed-size interleaved frames.
///
/// Device callbacks rarely match the analysis frame size, so samples are
/// buffered until `frame_size × channels` are available.
///
/// # Example
/// ```
/// use hf_audio::capture::FrameAssembler;
/// let mut asm = FrameAssembler::new(2, 1);
/// let mut frames = Vec::new();
/// asm.push(&[0.1, 0.2, 0.3], |f| frames.push(f));
/// assert_eq!(frames.len(), 1);
/// assert_eq!(asm.pending(), 1);
/// ```
pub struct FrameAssembler {
    channels: usize,
    frame_len: usize,
    pending: Vec<f32>,
    pool: Option<BufferPool>,
}

impl FrameAssembler {
    /// Assembler for `frame_size` samples per channel. Each emitted frame gets a fresh buffer.
    #[must_use]
    pub fn new(frame_size: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        let frame_len = frame_size.max(1) * channels;
        Self {
            channels,
            frame_len,
            pending: Vec::with_capacity(frame_len),
            pool: None,
        }
    }

    /// Take the next frame buffers from `pool` instead of allocating them.
    #[must_use]
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        if let Some(buffer) = pool.take() {
            self.pending = buffer;
        }
        self.pool = Some(pool);
        self
    }

    /// Frame length in interleaved samples.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Append interleaved `data`, calling `emit` for every completed frame.
    pub fn push(&mut self, data: &[f32], mut emit: impl FnMut(AudioFrame)) {
        let mut rest = data;
        while !rest.is_empty() {
            let take = (self.frame_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_len {
                // Pool à sec : on alloue plutôt que de perdre la trame.
                let next = self
                    .pool
                    .as_ref()
                    .and_then(BufferPool::take)
                    .unwrap_or_else(|| Vec::with_capacity(self.frame_len));
                let samples = std::mem::replace(&mut self.pending, next);
                emit(AudioFrame {
                    channels: self.channels,
                    samples,
                    captured_at: Some(Instant::now()),
                });
            }
        }
    }

    /// Samples buffered toward the next frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Description of an input device, as listed by `--list-devices`.
#[derive(Clone, Debug)]
pub struct InputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub default_sample_rate: u32,
    pub max_input_channels: u16,
}

impl fmt::Display for InputDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:3}: {:<40}  default:{:<5}  sample_rate:{}  max_in:{}",
            self.index, self.name, self.is_default, self.default_sample_rate, self.max_input_channels
        )
    }
}

/// Enumerate input devices of the default host.
///
/// # Errors
/// Returns an error if the host cannot enumerate its devices.
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .context("Énumération des périphériques audio impossible")?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
            let default_sample_rate = device
                .default_input_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(0);
            InputDeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                default_sample_rate,
                max_input_channels: max_input_channels(&device),
            }
        })
        .collect())
}

fn max_input_channels(device: &cpal::Device) -> u16 {
    device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Live input capture via cpal.
///
/// The input callback assembles fixed-size interleaved frames into buffers
/// from a [`BufferPool`] and pushes them into the lossy [`FrameQueue`].
/// Whoever consumes the frames hands the buffers back through
/// [`AudioCapture::buffer_pool`]. Capture stops when this value is dropped.
///
/// # Example
/// ```no_run
/// use hf_audio::capture::AudioCapture;
/// use hf_audio::queue::frame_queue;
/// use hf_core::config::AudioConfig;
///
/// let (queue, _frames) = frame_queue(32);
/// let capture = AudioCapture::start(None, &AudioConfig::default(), queue)?;
/// println!("{} Hz", capture.params().sample_rate);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct AudioCapture {
    // Garde le flux vivant ; jamais lu.
    _stream: cpal::Stream,
    params: StreamParams,
    device_name: String,
    pool: BufferPool,
}

impl AudioCapture {
    /// Open `device_index` (or the default input device) and start streaming.
    ///
    /// # Errors
    /// Returns an error if no device is available, the device has no input
    /// channels, or the stream cannot be built or started.
    pub fn start(device_index: Option<usize>, config: &AudioConfig, queue: FrameQueue) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_device(&host, device_index)?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());

        let max_channels = max_input_channels(&device);
        if max_channels == 0 {
            bail!("Le périphérique {device_name} n'a aucune entrée ; choisir un périphérique loopback/monitor");
        }
        if config.channels > max_channels {
            log::warn!(
                "{} canaux demandés, le périphérique n'en offre que {max_channels}",
                config.channels
            );
        }

        let default_rate = device
            .default_input_config()
            .map(|c| c.sample_rate().0)
            .unwrap_or(0);
        let params = StreamParams::resolve(config, default_rate, max_channels);

        let stream_config = cpal::StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: params
                .buffer_frames
                .map_or(cpal::BufferSize::Default, cpal::BufferSize::Fixed),
        };

        let assembler = FrameAssembler::new(params.frame_size, usize::from(params.channels));
        let pool = BufferPool::new(queue.capacity() + POOL_SPARE, assembler.frame_len());
        let mut assembler = assembler.with_pool(pool.clone());
        let queue = queue.recycle_into(pool.clone());
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, |frame| {
                        queue.push_latest(frame);
                    });
                },
                |err| {
                    log::error!("Audio stream error: {err}");
                },
                None,
            )
            .context("Ouverture du flux audio impossible")?;

        stream.play().context("Démarrage du flux audio impossible")?;

        log::info!(
            "capture: {device_name} @ {}Hz, {} canal(aux), trames de {}",
            params.sample_rate,
            params.channels,
            params.frame_size
        );

        Ok(Self {
            _stream: stream,
            params,
            device_name,
            pool,
        })
    }

    /// Free list the captured frame buffers should be returned to.
    #[must_use]
    pub fn buffer_pool(&self) -> BufferPool {
        self.pool.clone()
    }

    /// Parameters the stream was opened with.
    #[must_use]
    pub fn params(&self) -> StreamParams {
        self.params
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn select_device(host: &cpal::Host, index: Option<usize>) -> Result<cpal::Device> {
    let Some(wanted) = index else {
        return host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("Pas de périphérique audio trouvé"));
    };

    let mut devices: Vec<cpal::Device> = host
        .input_devices()
        .context("Énumération des périphériques audio impossible")?
        .collect();
    if devices.is_empty() {
        bail!("Pas de périphérique audio trouvé");
    }

    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let fallback = default_name.and_then(|name| {
        devices
            .iter()
            .position(|d| d.name().is_ok_and(|n| n == name))
    });
    let chosen = effective_device_index(Some(wanted), fallback, devices.len());
    if chosen != wanted {
        log::warn!(
            "Périphérique {wanted} introuvable ({} disponibles), utilisation de {chosen}",
            devices.len()
        );
    }
    Ok(devices.swap_remove(chosen))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let mut dst = vec![9.0; 8];
        downmix_to_mono(&[1.0, 3.0, -1.0, 1.0, 0.25, 0.75], 2, &mut dst);
        assert_eq!(dst, vec![2.0, 0.0, 0.5]);
    }

    #[test]
    fn downmix_mono_and_zero_channels_copy() {
        let mut dst = Vec::new();
        downmix_to_mono(&[0.1, 0.2], 0, &mut dst);
        assert_eq!(dst, vec![0.1, 0.2]);
        downmix_to_mono(&[0.3], 1, &mut dst);
        assert_eq!(dst, vec![0.3]);
    }

    #[test]
    fn downmix_partial_trailing_frame() {
        let mut dst = Vec::new();
        downmix_to_mono(&[1.0, 1.0, 1.0, 4.0], 3, &mut dst);
        assert_eq!(dst, vec![1.0, 4.0]);
    }

    #[test]
    fn assembler_splits_and_joins_chunks() {
        let mut asm = FrameAssembler::new(4, 2); // 8 samples per frame
        let mut frames = Vec::new();
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();
        asm.push(&data[..5], |f| frames.push(f));
        assert!(frames.is_empty());
        asm.push(&data[5..], |f| frames.push(f));
        assert_eq!(frames.len(), 2);
        assert_eq!(asm.pending(), 4);
        assert_eq!(frames[0].channels, 2);
        assert_eq!(frames[0].samples, data[..8].to_vec());
        assert_eq!(frames[1].samples, data[8..16].to_vec());
        assert!(frames[1].captured_at.is_some());
    }

    #[test]
    fn pooled_assembler_reuses_returned_buffers() {
        let pool = BufferPool::new(2, 4);
        let mut asm = FrameAssembler::new(2, 2).with_pool(pool.clone());
        assert_eq!(pool.available(), 1);

        let mut frames = Vec::new();
        asm.push(&[1.0; 4], |f| frames.push(f));
        assert_eq!(pool.available(), 0);
        let Some(frame) = frames.pop() else { panic!("no frame") };
        let ptr = frame.samples.as_ptr();
        pool.give_back(frame.samples);

        // The pending buffer was taken from the pool; the next frame reuses the returned one.
        asm.push(&[2.0; 4], |f| frames.push(f));
        asm.push(&[3.0; 4], |f| frames.push(f));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].samples.as_ptr(), ptr);
        assert_eq!(frames[1].samples, vec![3.0; 4]);
    }

    #[test]
    fn sample_rate_resolution() {
        assert_eq!(effective_sample_rate(48_000, 44_100), 48_000);
        assert_eq!(effective_sample_rate(0, 96_000), 96_000);
        assert_eq!(effective_sample_rate(0, 0), 44_100);
    }

    #[test]
    fn frame_size_and_channels_resolution() {
        assert_eq!(effective_frame_size(0), 1024);
        assert_eq!(effective_frame_size(512), 512);
        assert_eq!(sanitize_channel_count(0, 2), 1);
        assert_eq!(sanitize_channel_count(4, 2), 2);
        assert_eq!(sanitize_channel_count(4, 0), 4);
        assert_eq!(sanitize_channel_count(2, 8), 2);
    }

    #[test]
    fn device_index_resolution() {
        assert_eq!(effective_device_index(Some(2), Some(0), 3), 2);
        assert_eq!(effective_device_index(Some(5), Some(1), 3), 1);
        assert_eq!(effective_device_index(None, Some(9), 3), 0);
        assert_eq!(effective_device_index(Some(1), None, 0), 0);
    }

    #[test]
    fn params_resolve_latency_to_buffer_frames() {
        let cfg = AudioConfig {
            sample_rate: 0,
            frame_size: 0,
            channels: 4,
            latency_ms: 10,
        };
        let p = StreamParams::resolve(&cfg, 48_000, 2);
        assert_eq!(p.sample_rate, 48_000);
        assert_eq!(p.frame_size, 1024);
        assert_eq!(p.channels, 2);
        assert_eq!(p.buffer_frames, Some(480));

        let p = StreamParams::resolve(&AudioConfig::default(), 0, 0);
        assert_eq!(p.sample_rate, 44_100);
        assert_eq!(p.buffer_frames, None);
    }
}
