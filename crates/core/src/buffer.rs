use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::{
    format::{PixelFormat, Resolution},
    metrics::PoolMetrics,
};

/// Fixed-capacity pool of planar I420 destination buffers.
///
/// The pool is the pipeline's only flow-control mechanism: when every buffer
/// is leased out, `try_reserve` returns `None` and the admission layer treats
/// the trigger as backpressure. The pool never allocates past its capacity.
///
/// # Example
/// ```rust
/// use tabcast_core::prelude::{FramePool, Resolution};
///
/// let pool = FramePool::new(Resolution::new(640, 480).unwrap(), 2);
/// let a = pool.try_reserve().unwrap();
/// let b = pool.try_reserve().unwrap();
/// assert!(pool.try_reserve().is_none());
/// drop(a);
/// assert!(pool.try_reserve().is_some());
/// drop(b);
/// ```
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolShared>,
}

struct PoolShared {
    free: ArrayQueue<Vec<u8>>,
    coded: Resolution,
    capacity: usize,
    metrics: Arc<PoolMetrics>,
}

impl FramePool {
    /// Create a pool of `capacity` buffers sized for `coded` I420 frames.
    ///
    /// The coded size is snapped to even dimensions; capacity has a floor
    /// of 1.
    pub fn new(coded: Resolution, capacity: usize) -> Self {
        let coded = coded.snapped_to_even(2);
        let capacity = capacity.max(1);
        let bytes = PixelFormat::I420.frame_bytes(coded);
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Queue was sized for exactly this many buffers.
            let _ = free.push(vec![0; bytes]);
        }
        Self {
            inner: Arc::new(PoolShared {
                free,
                coded,
                capacity,
                metrics: Arc::new(PoolMetrics::default()),
            }),
        }
    }

    /// Lease a buffer, or `None` when the pool is exhausted.
    pub fn try_reserve(&self) -> Option<FrameBuffer> {
        match self.inner.free.pop() {
            Some(data) => {
                self.inner.metrics.lease();
                Some(FrameBuffer {
                    pool: self.inner.clone(),
                    data: Some(data),
                })
            }
            None => {
                self.inner.metrics.exhaust();
                None
            }
        }
    }

    /// Coded size of every buffer in the pool.
    pub fn coded_size(&self) -> Resolution {
        self.inner.coded
    }

    /// Total buffer count.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers currently leased out.
    pub fn in_flight(&self) -> usize {
        self.inner.capacity - self.inner.free.len()
    }

    /// Lease/backpressure counters for this pool.
    pub fn metrics(&self) -> Arc<PoolMetrics> {
        self.inner.metrics.clone()
    }
}

/// Exclusive lease on one planar I420 buffer.
///
/// Whichever stage holds the lease owns the pixels; dropping the lease
/// returns the buffer to its pool exactly once.
pub struct FrameBuffer {
    pool: Arc<PoolShared>,
    data: Option<Vec<u8>>,
}

impl FrameBuffer {
    /// Coded size of this buffer.
    pub fn coded_size(&self) -> Resolution {
        self.pool.coded
    }

    /// Y plane stride in bytes.
    pub fn y_stride(&self) -> usize {
        self.pool.coded.width.get() as usize
    }

    /// U/V plane stride in bytes.
    pub fn uv_stride(&self) -> usize {
        self.pool.coded.width.get() as usize / 2
    }

    /// Borrow the Y, U, and V planes.
    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        let (y_len, uv_len) = self.plane_lengths();
        let data = self.data.as_deref().unwrap_or(&[]);
        let (y, rest) = data.split_at(y_len);
        let (u, v) = rest.split_at(uv_len);
        (y, u, v)
    }

    /// Mutably borrow the Y, U, and V planes.
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y_len, uv_len) = self.plane_lengths();
        let data: &mut [u8] = match self.data.as_deref_mut() {
            Some(data) => data,
            None => &mut [],
        };
        let (y, rest) = data.split_at_mut(y_len);
        let (u, v) = rest.split_at_mut(uv_len);
        (y, u, v)
    }

    /// Fill the whole buffer with limited-range black (Y=16, U=V=128).
    ///
    /// The render stage writes only inside the letterbox rectangle; the
    /// consumer pre-fills the border with this.
    pub fn fill_black(&mut self) {
        let (y, u, v) = self.planes_mut();
        y.fill(16);
        u.fill(128);
        v.fill(128);
    }

    fn plane_lengths(&self) -> (usize, usize) {
        let w = self.pool.coded.width.get() as usize;
        let h = self.pool.coded.height.get() as usize;
        (w * h, (w / 2) * (h / 2))
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.metrics.give_back();
            // Capacity bounds the number of live buffers; push cannot fail.
            let _ = self.pool.free.push(data);
        }
    }
}
