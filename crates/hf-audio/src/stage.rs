use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use hf_core::frame::{AudioFrame, Features};

use crate::capture::downmix_to_mono;
use crate::features::SpectralAnalyzer;
use crate::queue::BufferPool;

/// How long a stage blocks on a channel before re-checking cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared stop flag for every pipeline stage.
///
/// # Example
/// ```
/// use hf_audio::stage::CancelToken;
/// let token = CancelToken::new();
/// let other = token.clone();
/// other.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of a bounded send that polls for cancellation.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The receiving stage is gone.
    Disconnected,
    Cancelled,
}

/// Send `value`, waiting for room in `POLL_INTERVAL` slices until cancelled.
pub fn send_polling<T>(tx: &Sender<T>, value: T, cancel: &CancelToken) -> SendOutcome {
    let mut value = value;
    loop {
        match tx.send_timeout(value, POLL_INTERVAL) {
            Ok(()) => return SendOutcome::Sent,
            Err(SendTimeoutError::Disconnected(_)) => return SendOutcome::Disconnected,
            Err(SendTimeoutError::Timeout(back)) => {
                if cancel.is_cancelled() {
                    return SendOutcome::Cancelled;
                }
                value = back;
            }
        }
    }
}

/// Feature-extraction stage: downmix each captured frame, analyze it and forward the features.
///
/// Returns the number of frames analyzed once the input disconnects, the
/// output disconnects, or `cancel` is set. Once downmixed, each frame's
/// samples go back to `recycle` when given.
///
/// # Errors
/// Returns an error (and cancels the other stages) if a frame does not
/// match the analyzer frame size.
pub fn run_feature_stage(
    mut analyzer: SpectralAnalyzer,
    frames: &Receiver<AudioFrame>,
    features: &Sender<Features>,
    recycle: Option<&BufferPool>,
    cancel: &CancelToken,
) -> Result<u64> {
    log::info!(
        "feature stage started ({} samples @ {}Hz)",
        analyzer.frame_size(),
        analyzer.sample_rate()
    );

    let mut mono = Vec::with_capacity(analyzer.frame_size());
    let mut analyzed = 0u64;

    while !cancel.is_cancelled() {
        let frame = match frames.recv_timeout(POLL_INTERVAL) {
            Ok(f) => f,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        downmix_to_mono(&frame.samples, frame.channels, &mut mono);
        let ts = frame.captured_at.unwrap_or_else(Instant::now);
        if let Some(pool) = recycle {
            pool.give_back(frame.samples);
        }
        let result = analyzer
            .process(&mono, ts)
            .with_context(|| format!("analyse de la trame {analyzed}"));
        let feat = match result {
            Ok(f) => f,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };
        analyzed += 1;

        match send_polling(features, feat, cancel) {
            SendOutcome::Sent => {}
            SendOutcome::Disconnected | SendOutcome::Cancelled => break,
        }
    }

    log::info!("feature stage stopped after {analyzed} frame(s)");
    Ok(analyzed)
}
