use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tabcast_core::prelude::{CaptureFormat, PixelFormat, Resolution};

use crate::machine::{CaptureMachine, CaptureSubscription};
use crate::oracle::CaptureOracle;
use crate::proxy::OracleProxy;
use crate::source::{CaptureTarget, FrameConsumer, TargetResolver, UpdateNotifier, UpdateSink};
use crate::worker::{PollTimer, WorkerContext};
use crate::CaptureError;

/// Lifecycle state of a [`CaptureDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No session; the device holds no resources.
    Idle,
    /// Workers and pipeline exist but no frames are being admitted.
    Allocated,
    /// Frames flow.
    Capturing,
    /// A fatal error ended the session; only `deallocate` leaves this state.
    Error,
}

/// Knobs for a capture session, applied at allocation.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureTunables {
    /// Output buffers in the pool, which bounds frames in flight.
    pub pool_capacity: usize,
    /// Smallest allowed coded dimension after even-snapping.
    pub min_dimension: u32,
    /// Smallest allowed content-region dimension inside the letterbox.
    pub min_content_dim: u32,
    /// Idle capture periods before the poll timer forces a frame.
    pub liveness_factor: u32,
}

impl Default for CaptureTunables {
    fn default() -> Self {
        Self {
            pool_capacity: 2,
            min_dimension: 16,
            min_content_dim: 4,
            liveness_factor: 4,
        }
    }
}

struct Session {
    coordinator: WorkerContext,
    render: WorkerContext,
    proxy: OracleProxy,
    subscription: Arc<CaptureSubscription>,
    machine_slot: Arc<Mutex<Option<Arc<CaptureMachine>>>>,
    format: CaptureFormat,
    epoch: Instant,
    timer: Option<PollTimer>,
}

/// One capture device for one target, owned by a single host.
///
/// Lifecycle is strictly `Idle -> Allocated -> Capturing -> Allocated ->
/// Idle`; a fatal error anywhere inside a session parks the device in
/// `Error` until the host deallocates. Every transition method is a no-op
/// from the wrong state, so a host driving the device from stale knowledge
/// cannot corrupt it.
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use tabcast::prelude::*;
///
/// # fn demo(resolver: Arc<dyn TargetResolver>, notifier: Arc<dyn UpdateNotifier>,
/// #         consumer: Arc<dyn FrameConsumer>) {
/// let mut device = CaptureDevice::new(
///     CaptureTarget(7),
///     resolver,
///     notifier,
///     CaptureTunables::default(),
/// );
/// device.allocate(1280, 720, 30.0, consumer);
/// device.start();
/// assert_eq!(device.state(), DeviceState::Capturing);
/// device.stop();
/// device.deallocate();
/// # }
/// ```
pub struct CaptureDevice {
    target: CaptureTarget,
    resolver: Arc<dyn TargetResolver>,
    notifier: Arc<dyn UpdateNotifier>,
    tunables: CaptureTunables,
    session: Option<Session>,
    capturing: bool,
    fatal: Arc<AtomicBool>,
    /// Bumped on deallocate so work posted by a dead session is skipped.
    allocation: Arc<AtomicU64>,
}

impl CaptureDevice {
    pub fn new(
        target: CaptureTarget,
        resolver: Arc<dyn TargetResolver>,
        notifier: Arc<dyn UpdateNotifier>,
        tunables: CaptureTunables,
    ) -> Self {
        Self {
            target,
            resolver,
            notifier,
            tunables,
            session: None,
            capturing: false,
            fatal: Arc::new(AtomicBool::new(false)),
            allocation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        if self.session.is_some() && self.fatal.load(Ordering::Acquire) {
            return DeviceState::Error;
        }
        match (&self.session, self.capturing) {
            (None, _) => DeviceState::Idle,
            (Some(_), false) => DeviceState::Allocated,
            (Some(_), true) => DeviceState::Capturing,
        }
    }

    /// Negotiated capture format, available once allocated.
    pub fn capture_format(&self) -> Option<CaptureFormat> {
        self.session.as_ref().map(|s| s.format)
    }

    /// Build the session: validate the format, spawn the coordination and
    /// render workers, wire the pipeline, and announce the format to the
    /// consumer.
    ///
    /// An invalid format reports `on_error` and leaves the device `Idle`.
    /// The initial target resolve runs on the coordination worker, so this
    /// returns without blocking on the resolver.
    pub fn allocate(
        &mut self,
        width: u32,
        height: u32,
        frame_rate: f32,
        consumer: Arc<dyn FrameConsumer>,
    ) {
        if self.state() != DeviceState::Idle {
            tracing::warn!(state = ?self.state(), "allocate ignored outside Idle");
            return;
        }

        let resolution = Resolution::new(width, height)
            .filter(|_| frame_rate.is_finite() && frame_rate > 0.0);
        let Some(resolution) = resolution else {
            consumer.on_error(CaptureError::InvalidFormat(format!(
                "{width}x{height}@{frame_rate}"
            )));
            return;
        };
        let resolution = resolution.snapped_to_even(self.tunables.min_dimension);
        let format = CaptureFormat {
            resolution,
            frame_rate,
            pixel_format: PixelFormat::I420,
        };

        let coordinator = match WorkerContext::spawn("tabcast-coord") {
            Ok(w) => w,
            Err(e) => {
                consumer.on_error(CaptureError::WorkerUnavailable(e));
                return;
            }
        };
        let render = match WorkerContext::spawn("tabcast-render") {
            Ok(w) => w,
            Err(e) => {
                consumer.on_error(CaptureError::WorkerUnavailable(e));
                coordinator.stop();
                return;
            }
        };

        let oracle = CaptureOracle::new(format.capture_period(), self.tunables.pool_capacity)
            .liveness_factor(self.tunables.liveness_factor);
        let proxy = OracleProxy::new(oracle, consumer.clone());
        consumer.on_frame_info(format);

        let subscription = CaptureSubscription::new(proxy.clone(), coordinator.poster());
        let on_fatal = {
            let proxy = proxy.clone();
            let fatal = self.fatal.clone();
            Arc::new(move |error: CaptureError| {
                proxy.report_error(error);
                proxy.invalidate_consumer();
                fatal.store(true, Ordering::Release);
            })
        };
        let machine = Arc::new(CaptureMachine::new(
            self.target,
            self.resolver.clone(),
            self.notifier.clone(),
            render.poster(),
            subscription.clone() as Arc<dyn UpdateSink>,
            self.tunables.min_content_dim,
            on_fatal,
        ));
        subscription.attach_machine(&machine);
        let machine_slot = Arc::new(Mutex::new(Some(machine.clone())));

        // First resolve happens on the coordination worker. The allocation
        // check skips it if the session was torn down before it ran.
        let allocation = self.allocation.clone();
        let current = allocation.load(Ordering::Acquire);
        coordinator.poster().post(move || {
            if allocation.load(Ordering::Acquire) == current {
                machine.ensure_subscribed();
            }
        });

        tracing::debug!(capture_target = %self.target, %resolution, frame_rate, "session allocated");
        self.session = Some(Session {
            coordinator,
            render,
            proxy,
            subscription,
            machine_slot,
            format,
            epoch: Instant::now(),
            timer: None,
        });
    }

    /// Begin admitting frames and start the liveness poll timer.
    pub fn start(&mut self) {
        if self.state() != DeviceState::Allocated {
            tracing::warn!(state = ?self.state(), "start ignored outside Allocated");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.proxy.start();
        let subscription = session.subscription.clone();
        let epoch = session.epoch;
        match PollTimer::start(session.format.capture_period(), move || {
            subscription.poll(epoch.elapsed());
        }) {
            Ok(timer) => session.timer = Some(timer),
            Err(e) => {
                session.proxy.stop();
                let proxy = session.proxy.clone();
                proxy.report_error(CaptureError::WorkerUnavailable(e));
                proxy.invalidate_consumer();
                self.fatal.store(true, Ordering::Release);
                return;
            }
        }
        self.capturing = true;
    }

    /// Stop admitting frames. The session stays allocated; in-flight
    /// deliveries still complete.
    pub fn stop(&mut self) {
        if self.state() != DeviceState::Capturing {
            tracing::warn!(state = ?self.state(), "stop ignored outside Capturing");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if let Some(timer) = session.timer.take() {
                timer.stop();
            }
            session.proxy.stop();
        }
        self.capturing = false;
    }

    /// Tear the session down and return to `Idle`. Safe from any state,
    /// including `Error`, and safe to call repeatedly.
    pub fn deallocate(&mut self) {
        if self.capturing {
            self.stop();
        }
        if let Some(mut session) = self.session.take() {
            if let Some(timer) = session.timer.take() {
                timer.stop();
            }
            // No consumer callback fires past this point.
            session.proxy.invalidate_consumer();
            self.allocation.fetch_add(1, Ordering::AcqRel);

            let slot = session.machine_slot.clone();
            session.coordinator.poster().post(move || {
                if let Some(machine) = slot.lock().take() {
                    machine.shutdown();
                }
            });
            // stop() drains pending work, so the shutdown above runs
            // before the join completes.
            session.coordinator.stop();
            session.render.stop();
            tracing::debug!(capture_target = %self.target, "session deallocated");
        }
        self.capturing = false;
        self.fatal.store(false, Ordering::Release);
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        self.deallocate();
    }
}
