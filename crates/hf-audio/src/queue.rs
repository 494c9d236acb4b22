use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender, TrySendError};
use hf_core::frame::AudioFrame;

/// Default capture queue depth.
pub const DEFAULT_CAPACITY: usize = 32;

/// Buffers beyond the queue depth: the frame being assembled, the one being
/// analyzed and the one in hand while the queue evicts.
pub const POOL_SPARE: usize = 3;

/// Recycled sample buffers for the capture callback.
///
/// Buffers are allocated once up front; the callback takes them and the
/// consumer (or the eviction step) gives them back, so steady-state capture
/// never touches the allocator. Clones share the same free list.
///
/// # Example
/// ```
/// use hf_audio::queue::BufferPool;
///
/// let pool = BufferPool::new(2, 8);
/// let Some(mut buf) = pool.take() else { panic!("pool is empty") };
/// assert_eq!(pool.available(), 1);
/// buf.push(1.0);
/// pool.give_back(buf);
/// assert_eq!(pool.available(), 2);
/// assert!(pool.take().is_some_and(|b| b.is_empty() && b.capacity() >= 8));
/// ```
#[derive(Clone)]
pub struct BufferPool {
    free_tx: Sender<Vec<f32>>,
    free_rx: Receiver<Vec<f32>>,
    buffer_len: usize,
}

impl BufferPool {
    /// Pre-allocate `buffers` empty buffers of capacity `buffer_len`.
    #[must_use]
    pub fn new(buffers: usize, buffer_len: usize) -> Self {
        let buffers = buffers.max(1);
        let (free_tx, free_rx) = flume::bounded(buffers);
        for _ in 0..buffers {
            let _ = free_tx.try_send(Vec::with_capacity(buffer_len));
        }
        Self {
            free_tx,
            free_rx,
            buffer_len,
        }
    }

    /// An empty buffer, or `None` when every buffer is in flight.
    #[must_use]
    pub fn take(&self) -> Option<Vec<f32>> {
        self.free_rx.try_recv().ok()
    }

    /// Return a buffer. Extra buffers beyond the pool size are simply dropped.
    pub fn give_back(&self, mut buffer: Vec<f32>) {
        buffer.clear();
        let _ = self.free_tx.try_send(buffer);
    }

    /// Buffers ready to be taken.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Capacity of each buffer.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }
}

/// Producer half of the lossy capture queue.
///
/// Bounded at a fixed capacity. When the queue is full, the oldest frame is
/// evicted so the newest one always gets in. The producer never blocks,
/// which keeps the audio callback real-time safe.
///
/// # Example
/// ```
/// use hf_audio::queue::frame_queue;
/// use hf_core::frame::AudioFrame;
///
/// let (queue, rx) = frame_queue(2);
/// for i in 0..3 {
///     queue.push_latest(AudioFrame { channels: 1, samples: vec![i as f32], captured_at: None });
/// }
/// assert_eq!(queue.dropped(), 1);
/// assert_eq!(rx.try_recv().map(|f| f.samples[0]), Ok(1.0));
/// ```
pub struct FrameQueue {
    tx: Sender<AudioFrame>,
    // Clone du récepteur, utilisé uniquement pour évincer la trame la plus ancienne.
    evict: Receiver<AudioFrame>,
    dropped: Arc<AtomicU64>,
    recycle: Option<BufferPool>,
}

/// Create a lossy queue of `capacity` frames (0 is treated as 1).
#[must_use]
pub fn frame_queue(capacity: usize) -> (FrameQueue, Receiver<AudioFrame>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    let queue = FrameQueue {
        tx,
        evict: rx.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
        recycle: None,
    };
    (queue, rx)
}

impl FrameQueue {
    /// Give the samples of evicted frames back to `pool` instead of freeing them.
    #[must_use]
    pub fn recycle_into(mut self, pool: BufferPool) -> Self {
        self.recycle = Some(pool);
        self
    }

    /// Enqueue `frame`, evicting the oldest queued frames while the queue is full.
    ///
    /// Returns `false` once every consumer is gone; the frame is discarded.
    /// Never blocks, allocates or logs: drops are only counted (see [`Self::drop_counter`]).
    pub fn push_latest(&self, frame: AudioFrame) -> bool {
        // The eviction handle keeps the channel open, so count the other receivers.
        if self.tx.receiver_count() <= 1 {
            return false;
        }
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    // The consumer may have drained the slot in between; retry either way.
                    if let Ok(old) = self.evict.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        if let Some(pool) = &self.recycle {
                            pool.give_back(old.samples);
                        }
                    }
                }
            }
        }
    }

    /// Total number of frames evicted since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle on the drop counter, readable after the queue moved into a callback.
    #[must_use]
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Frames currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(DEFAULT_CAPACITY)
    }
}
