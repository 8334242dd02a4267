use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

const DEFAULT_WINDOW: usize = 120;

/// Lease/backpressure counters for a frame pool.
///
/// # Example
/// ```rust
/// use tabcast_core::metrics::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// metrics.lease();
/// assert_eq!(metrics.leases(), 1);
/// ```
#[derive(Debug, Default)]
pub struct PoolMetrics {
    leases: AtomicU64,
    exhausted: AtomicU64,
    returns: AtomicU64,
}

impl PoolMetrics {
    /// Record a successful lease.
    pub fn lease(&self) {
        self.leases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused reservation (pool empty = backpressure).
    pub fn exhaust(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a buffer returning to the pool.
    pub fn give_back(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of successful leases.
    pub fn leases(&self) -> u64 {
        self.leases.load(Ordering::Relaxed)
    }

    /// Snapshot of refused reservations.
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Snapshot of returns.
    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::Relaxed)
    }
}

/// Admission-flow counters for the capture pipeline.
///
/// Rate-limited and encode-limited drops are tracked separately: the former
/// is the oracle pacing output, the latter is downstream backpressure.
///
/// # Example
/// ```rust
/// use tabcast_core::metrics::FlowMetrics;
///
/// let metrics = FlowMetrics::default();
/// metrics.admit();
/// metrics.rate_limit();
/// assert_eq!((metrics.admitted(), metrics.rate_limited()), (1, 1));
/// ```
#[derive(Debug, Default)]
pub struct FlowMetrics {
    admitted: AtomicU64,
    rate_limited: AtomicU64,
    encode_limited: AtomicU64,
    completed: AtomicU64,
    late: AtomicU64,
}

impl FlowMetrics {
    /// Record an admitted capture.
    pub fn admit(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rate-limited drop.
    pub fn rate_limit(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an encode-limited (buffer-starved) drop.
    pub fn encode_limit(&self) {
        self.encode_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful delivery.
    pub fn complete(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stale or abandoned frame.
    pub fn drop_late(&self) {
        self.late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn encode_limited(&self) -> u64 {
        self.encode_limited.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn late(&self) -> u64 {
        self.late.load(Ordering::Relaxed)
    }
}

/// Rolling effective-frame-rate statistics.
///
/// Samples are completion timestamps on the caller's own timeline (the
/// pipeline feeds in event timestamps, not wall-clock reads), so tests can
/// drive this deterministically.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use tabcast_core::metrics::RateStats;
///
/// let stats = RateStats::default();
/// for i in 0..10 {
///     stats.record(Duration::from_millis(i * 100));
/// }
/// assert!(stats.fps().unwrap() > 9.0);
/// ```
#[derive(Clone, Default)]
pub struct RateStats {
    inner: Arc<RateState>,
}

#[derive(Default)]
struct RateState {
    count: AtomicU64,
    window: Mutex<WindowState>,
}

struct WindowState {
    samples: VecDeque<Duration>,
    max: usize,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            samples: VecDeque::new(),
            max: DEFAULT_WINDOW,
        }
    }
}

impl RateStats {
    /// Record one completed frame at `timestamp`.
    pub fn record(&self, timestamp: Duration) {
        self.inner.count.fetch_add(1, Ordering::Relaxed);
        let mut win = self.inner.window.lock();
        win.samples.push_back(timestamp);
        while win.samples.len() > win.max {
            win.samples.pop_front();
        }
    }

    /// Change the rolling window size. Minimum of 2.
    pub fn set_window_size(&self, window: usize) {
        let mut win = self.inner.window.lock();
        win.max = window.max(2);
        while win.samples.len() > win.max {
            win.samples.pop_front();
        }
    }

    /// Total frames recorded over the lifetime.
    pub fn total_frames(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Effective frames per second over the current window, if computable.
    pub fn fps(&self) -> Option<f64> {
        let win = self.inner.window.lock();
        if win.samples.len() < 2 {
            return None;
        }
        let first = *win.samples.front()?;
        let last = *win.samples.back()?;
        let span = last.checked_sub(first)?.as_secs_f64();
        if span > 0.0 {
            Some((win.samples.len() - 1) as f64 / span)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_over_steady_stream() {
        let stats = RateStats::default();
        for i in 0..30u64 {
            stats.record(Duration::from_millis(i * 33));
        }
        let fps = stats.fps().expect("fps");
        assert!((fps - 30.3).abs() < 0.5, "fps was {fps}");
    }

    #[test]
    fn fps_needs_two_samples() {
        let stats = RateStats::default();
        assert!(stats.fps().is_none());
        stats.record(Duration::from_millis(0));
        assert!(stats.fps().is_none());
    }

    #[test]
    fn window_truncates_old_samples() {
        let stats = RateStats::default();
        stats.set_window_size(4);
        for i in 0..100u64 {
            stats.record(Duration::from_millis(i * 10));
        }
        assert_eq!(stats.total_frames(), 100);
        let fps = stats.fps().expect("fps");
        assert!((fps - 100.0).abs() < 1.0, "fps was {fps}");
    }
}
