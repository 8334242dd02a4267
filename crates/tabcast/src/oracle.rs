use std::time::Duration;

use smallvec::SmallVec;
use tabcast_core::prelude::RateStats;

/// Trigger event observed by the oracle.
///
/// Compositor updates and software paints signal dirty content; timer polls
/// are the liveness fallback that keeps static content flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The compositor pushed new content for the surface.
    CompositorUpdate,
    /// A software paint into the surface's backing store completed.
    SoftwarePaint,
    /// Periodic poll tick; fires regardless of content changes.
    TimerPoll,
}

impl CaptureEvent {
    /// Whether this event signals changed content.
    pub fn is_dirty(&self) -> bool {
        matches!(self, CaptureEvent::CompositorUpdate | CaptureEvent::SoftwarePaint)
    }
}

/// Decision engine for frame admission and frame-number bookkeeping.
///
/// The oracle is not thread-safe on its own; `OracleProxy` serializes access.
/// Timestamps live on the caller's timeline (durations since session start),
/// which keeps every decision deterministic under test.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use tabcast::oracle::{CaptureEvent, CaptureOracle};
///
/// let mut oracle = CaptureOracle::new(Duration::from_millis(33), 2);
/// let t0 = Duration::ZERO;
/// assert!(oracle.observe_event_and_decide_capture(CaptureEvent::SoftwarePaint, t0));
/// let frame = oracle.record_capture();
/// assert!(oracle.complete_capture(frame, Some(t0)));
/// ```
pub struct CaptureOracle {
    capture_period: Duration,
    grace: Duration,
    liveness_factor: u32,
    pool_capacity: usize,
    last_admitted: Option<Duration>,
    pending_admission: Option<Duration>,
    next_frame_number: u64,
    in_flight: SmallVec<[u64; 4]>,
    highest_completed: Option<u64>,
    rate: RateStats,
}

impl CaptureOracle {
    /// Create an oracle for the given capture period and buffer-pool
    /// capacity.
    ///
    /// The grace window for slightly-early dirty events is one eighth of the
    /// period; the liveness fallback fires after four idle periods.
    pub fn new(capture_period: Duration, pool_capacity: usize) -> Self {
        Self {
            capture_period,
            grace: capture_period / 8,
            liveness_factor: 4,
            pool_capacity: pool_capacity.max(1),
            last_admitted: None,
            pending_admission: None,
            next_frame_number: 0,
            in_flight: SmallVec::new(),
            highest_completed: None,
            rate: RateStats::default(),
        }
    }

    /// Override the idle-period multiple after which `TimerPoll` admits.
    pub fn liveness_factor(mut self, factor: u32) -> Self {
        self.liveness_factor = factor.max(1);
        self
    }

    /// Decide whether a capture should happen for `event` at `time`.
    ///
    /// Dirty events are admitted once per capture period, with a small grace
    /// window so a frame arriving slightly early is not starved out. Timer
    /// polls admit only after the stream has gone quiet for several periods,
    /// guaranteeing a minimum frame rate over static content.
    ///
    /// A positive decision is provisional until [`record_capture`]
    /// finalizes it; if the buffer reservation fails, the pacing state is
    /// untouched.
    ///
    /// [`record_capture`]: CaptureOracle::record_capture
    pub fn observe_event_and_decide_capture(&mut self, event: CaptureEvent, time: Duration) -> bool {
        let admit = match self.last_admitted {
            None => true,
            Some(last) => {
                let elapsed = time.saturating_sub(last);
                if event.is_dirty() {
                    elapsed + self.grace >= self.capture_period
                } else {
                    elapsed >= self.capture_period * self.liveness_factor
                }
            }
        };
        if admit {
            self.pending_admission = Some(time);
        }
        admit
    }

    /// Issue the next frame number and mark it in flight.
    ///
    /// In-flight frames can never exceed the pool capacity because every
    /// admission first reserved a pooled buffer; the check here turns a
    /// violation of that reasoning into a refusal instead of silent
    /// corruption.
    pub fn record_capture(&mut self) -> u64 {
        debug_assert!(
            self.in_flight.len() < self.pool_capacity,
            "in-flight frames exceed pool capacity"
        );
        if let Some(time) = self.pending_admission.take() {
            self.last_admitted = Some(time);
        }
        let frame_number = self.next_frame_number;
        self.next_frame_number += 1;
        self.in_flight.push(frame_number);
        frame_number
    }

    /// Complete a previously issued frame.
    ///
    /// Returns false when the number was never issued, was already
    /// completed, arrived behind a newer completion (stale), or carries no
    /// timestamp (abandoned). A true return has fed the rolling frame-rate
    /// statistics and means the frame should be delivered.
    pub fn complete_capture(&mut self, frame_number: u64, timestamp: Option<Duration>) -> bool {
        let Some(idx) = self.in_flight.iter().position(|&n| n == frame_number) else {
            return false;
        };
        self.in_flight.remove(idx);
        let Some(timestamp) = timestamp else {
            return false;
        };
        if self.highest_completed.is_some_and(|done| done > frame_number) {
            return false;
        }
        self.highest_completed = Some(frame_number);
        self.rate.record(timestamp);
        true
    }

    /// Frames issued but not yet completed.
    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether another in-flight frame fits under the pool capacity.
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.pool_capacity
    }

    /// Configured capture period.
    pub fn capture_period(&self) -> Duration {
        self.capture_period
    }

    /// Rolling effective-frame-rate statistics over completed frames.
    pub fn rate_stats(&self) -> RateStats {
        self.rate.clone()
    }
}
