use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tabcast_core::prelude::{FlowMetrics, FrameBuffer};

use crate::oracle::{CaptureEvent, CaptureOracle};
use crate::source::FrameConsumer;
use crate::CaptureError;

/// Outcome of one admission attempt.
pub enum Admission {
    /// Capture now: a buffer is reserved and `deliver` must be finished
    /// (or dropped) exactly once.
    Admitted {
        frame_number: u64,
        buffer: FrameBuffer,
        deliver: DeliverHandle,
    },
    /// Content changed but the last admitted frame is too recent.
    RateLimited,
    /// Pacing allowed the frame but no output buffer was available.
    EncodeLimited,
    /// The session is stopped or has no consumer attached.
    Refused,
}

struct ProxyState {
    oracle: CaptureOracle,
    consumer: Option<Arc<dyn FrameConsumer>>,
    started: bool,
}

struct ProxyShared {
    state: Mutex<ProxyState>,
    /// Bumped on consumer invalidation; stale deliver handles compare
    /// against their snapshot and bail out.
    generation: AtomicU64,
    error_reported: AtomicBool,
    flow: FlowMetrics,
}

/// Thread-safe front end over [`CaptureOracle`].
///
/// Event sources on any thread call [`observe`](OracleProxy::observe); the
/// decision, the buffer reservation, and the frame-number issue happen
/// atomically under one lock. Consumer callbacks always run after the lock
/// is released, so a consumer may call back into the proxy freely.
#[derive(Clone)]
pub struct OracleProxy {
    shared: Arc<ProxyShared>,
}

impl OracleProxy {
    pub fn new(oracle: CaptureOracle, consumer: Arc<dyn FrameConsumer>) -> Self {
        Self {
            shared: Arc::new(ProxyShared {
                state: Mutex::new(ProxyState {
                    oracle,
                    consumer: Some(consumer),
                    started: false,
                }),
                generation: AtomicU64::new(0),
                error_reported: AtomicBool::new(false),
                flow: FlowMetrics::default(),
            }),
        }
    }

    /// Begin admitting frames.
    pub fn start(&self) {
        self.shared.state.lock().started = true;
    }

    /// Stop admitting frames. In-flight deliveries still complete.
    pub fn stop(&self) {
        self.shared.state.lock().started = false;
    }

    /// Run one event through the oracle and, on admission, reserve an
    /// output buffer and issue a frame number.
    ///
    /// The buffer reservation is a lock-free pool pop, so holding the state
    /// lock across it cannot deadlock. When pacing admits but the pool is
    /// dry the outcome is [`Admission::EncodeLimited`] and the pacing state
    /// is left untouched, so the very next event gets another chance.
    pub fn observe_event_and_decide_capture(&self, event: CaptureEvent, time: Duration) -> Admission {
        let mut state = self.shared.state.lock();
        if !state.started {
            return Admission::Refused;
        }
        let Some(consumer) = state.consumer.clone() else {
            return Admission::Refused;
        };

        let decision = state.oracle.observe_event_and_decide_capture(event, time);
        // The in-flight cap holds even when the consumer's pool is larger
        // than the configured capacity.
        if decision && !state.oracle.has_capacity() {
            self.shared.flow.encode_limit();
            return Admission::EncodeLimited;
        }
        let buffer = consumer.reserve_output_buffer();
        match (decision, buffer) {
            (false, None) => Admission::Refused,
            (false, Some(buffer)) => {
                drop(state);
                drop(buffer);
                self.shared.flow.rate_limit();
                Admission::RateLimited
            }
            (true, None) => {
                self.shared.flow.encode_limit();
                Admission::EncodeLimited
            }
            (true, Some(buffer)) => {
                let frame_number = state.oracle.record_capture();
                drop(state);
                self.shared.flow.admit();
                Admission::Admitted {
                    frame_number,
                    buffer,
                    deliver: DeliverHandle {
                        shared: Arc::downgrade(&self.shared),
                        generation: self.shared.generation.load(Ordering::Acquire),
                        frame_number,
                        done: false,
                    },
                }
            }
        }
    }

    /// Report a fatal error to the consumer, at most once per session.
    pub fn report_error(&self, error: CaptureError) {
        if self.shared.error_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        let consumer = self.shared.state.lock().consumer.clone();
        if let Some(consumer) = consumer {
            tracing::warn!(code = error.code(), %error, "reporting fatal capture error");
            consumer.on_error(error);
        }
    }

    /// Detach the consumer and invalidate every outstanding deliver handle.
    ///
    /// After this returns, no consumer callback will fire again: handles
    /// created before the call see a stale generation and recycle their
    /// buffer instead of delivering.
    pub fn invalidate_consumer(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        let mut state = self.shared.state.lock();
        state.consumer = None;
        state.started = false;
    }

    /// Frame-flow counters for this session.
    pub fn flow_metrics(&self) -> &FlowMetrics {
        &self.shared.flow
    }

    /// Frames admitted but not yet completed.
    pub fn frames_in_flight(&self) -> usize {
        self.shared.state.lock().oracle.frames_in_flight()
    }
}

/// One-shot completion token for an admitted frame.
///
/// Call [`finish`](DeliverHandle::finish) with the populated buffer; if the
/// handle is dropped instead, the frame is recorded as abandoned and its
/// pool slot is freed.
pub struct DeliverHandle {
    shared: Weak<ProxyShared>,
    generation: u64,
    frame_number: u64,
    done: bool,
}

impl DeliverHandle {
    /// Frame number this handle completes.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Complete the frame. With `success`, a valid completion delivers the
    /// buffer to the consumer; a stale or invalidated completion silently
    /// recycles it. Returns whether the frame was delivered.
    pub fn finish(mut self, buffer: FrameBuffer, timestamp: Duration, success: bool) -> bool {
        self.done = true;
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        if shared.generation.load(Ordering::Acquire) != self.generation {
            return false;
        }

        let mut state = shared.state.lock();
        let completed = state
            .oracle
            .complete_capture(self.frame_number, success.then_some(timestamp));
        let consumer = if success && completed {
            state.consumer.clone()
        } else {
            None
        };
        drop(state);

        match consumer {
            Some(consumer) => {
                shared.flow.complete();
                consumer.on_incoming_captured_frame(buffer, timestamp);
                true
            }
            None => {
                if success && !completed {
                    shared.flow.drop_late();
                }
                false
            }
        }
    }
}

impl Drop for DeliverHandle {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.generation.load(Ordering::Acquire) != self.generation {
            return;
        }
        shared.state.lock().oracle.complete_capture(self.frame_number, None);
    }
}
