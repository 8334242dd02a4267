use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tabcast_core::prelude::FrameBuffer;

use crate::oracle::CaptureEvent;
use crate::proxy::{Admission, DeliverHandle, OracleProxy};
use crate::source::{
    CaptureTarget, LiveSource, SnapshotCapability, SourceId, SubscriptionId, TargetResolver,
    UpdateNotifier, UpdateSink,
};
use crate::worker::TaskPoster;
use crate::{render, CaptureError};

struct MachineState {
    subscription: Option<(SourceId, SubscriptionId)>,
}

/// Tracks the live source behind a capture target and drives admitted
/// frames through snapshot and render.
///
/// The machine runs entirely on the coordination worker; only the render
/// stage is posted elsewhere. Every capture re-resolves the target, because
/// the backing source can be swapped out underneath it at any time; the
/// update subscription follows the current source, never covering two
/// sources at once.
pub struct CaptureMachine {
    target: CaptureTarget,
    resolver: Arc<dyn TargetResolver>,
    notifier: Arc<dyn UpdateNotifier>,
    render_poster: TaskPoster,
    sink: Arc<dyn UpdateSink>,
    state: Mutex<MachineState>,
    min_content_dim: u32,
    on_fatal: Arc<dyn Fn(CaptureError) + Send + Sync>,
}

impl CaptureMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: CaptureTarget,
        resolver: Arc<dyn TargetResolver>,
        notifier: Arc<dyn UpdateNotifier>,
        render_poster: TaskPoster,
        sink: Arc<dyn UpdateSink>,
        min_content_dim: u32,
        on_fatal: Arc<dyn Fn(CaptureError) + Send + Sync>,
    ) -> Self {
        Self {
            target,
            resolver,
            notifier,
            render_poster,
            sink,
            state: Mutex::new(MachineState { subscription: None }),
            min_content_dim,
            on_fatal,
        }
    }

    /// Resolve the target and move the update subscription onto whatever
    /// source currently backs it. Called once at session setup and again on
    /// every capture.
    pub fn ensure_subscribed(&self) -> Option<LiveSource> {
        match self.resolver.resolve(self.target) {
            Ok(Some(source)) => {
                self.follow_source(&source);
                Some(source)
            }
            Ok(None) => None,
            Err(lost) => {
                tracing::info!(capture_target = %self.target, "capture target destroyed");
                (self.on_fatal)(lost.into());
                None
            }
        }
    }

    /// Run one admitted frame: snapshot the current source into `buffer`
    /// and complete `deliver`.
    ///
    /// Failure paths finish the handle unsuccessfully, which frees the
    /// in-flight slot without delivering; the handle's drop guard covers
    /// the render-worker-gone case.
    pub fn capture(&self, time: Duration, mut buffer: FrameBuffer, deliver: DeliverHandle) {
        let Some(source) = self.ensure_subscribed() else {
            deliver.finish(buffer, time, false);
            return;
        };

        match source.snapshot {
            SnapshotCapability::DirectCopy(snapshot) => {
                if source.size != buffer.coded_size() {
                    // The source has not re-laid-out to the session size
                    // yet; skip this frame rather than deliver a crop.
                    deliver.finish(buffer, time, false);
                    return;
                }
                let ok = snapshot.copy_into(&mut buffer);
                deliver.finish(buffer, time, ok);
            }
            SnapshotCapability::BackingStore(snapshot) => {
                let Some(raw) = snapshot.snapshot() else {
                    deliver.finish(buffer, time, false);
                    return;
                };
                let min_dim = self.min_content_dim;
                self.render_poster.post(move || {
                    let ok = match render::render_into(&raw, &mut buffer, min_dim) {
                        Ok(_) => true,
                        Err(e) => {
                            tracing::debug!(error = %e, "render stage rejected frame");
                            false
                        }
                    };
                    deliver.finish(buffer, time, ok);
                });
            }
        }
    }

    fn follow_source(&self, source: &LiveSource) {
        let mut state = self.state.lock();
        if state.subscription.map(|(id, _)| id) == Some(source.id) {
            return;
        }
        if let Some((_, old)) = state.subscription.take() {
            self.notifier.unsubscribe(old);
        }
        let id = self.notifier.subscribe(source.id, self.sink.clone());
        state.subscription = Some((source.id, id));
    }

    /// Drop the update subscription. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some((_, id)) = self.state.lock().subscription.take() {
            self.notifier.unsubscribe(id);
        }
    }
}

/// Event entry point for one capture session.
///
/// Content-change callbacks and poll ticks land here from arbitrary
/// threads; each one is bounced onto the coordination worker, where the
/// admission decision and the machine run single-file.
pub struct CaptureSubscription {
    proxy: OracleProxy,
    machine: Mutex<Weak<CaptureMachine>>,
    coordinator: TaskPoster,
    weak_self: Weak<CaptureSubscription>,
}

impl CaptureSubscription {
    pub fn new(proxy: OracleProxy, coordinator: TaskPoster) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            proxy,
            machine: Mutex::new(Weak::new()),
            coordinator,
            weak_self: weak_self.clone(),
        })
    }

    /// Point the subscription at its machine. Held weakly so a torn-down
    /// session cannot be revived by a late event.
    pub fn attach_machine(&self, machine: &Arc<CaptureMachine>) {
        *self.machine.lock() = Arc::downgrade(machine);
    }

    /// Timer-poll entry, driven by the session's poll timer.
    pub fn poll(&self, time: Duration) {
        self.trigger(CaptureEvent::TimerPoll, time);
    }

    fn trigger(&self, event: CaptureEvent, time: Duration) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        self.coordinator.post(move || this.run_trigger(event, time));
    }

    fn run_trigger(&self, event: CaptureEvent, time: Duration) {
        let Some(machine) = self.machine.lock().upgrade() else {
            return;
        };
        if let Admission::Admitted {
            buffer, deliver, ..
        } = self.proxy.observe_event_and_decide_capture(event, time)
        {
            machine.capture(time, buffer, deliver);
        }
    }
}

impl UpdateSink for CaptureSubscription {
    fn compositor_update(&self, timestamp: Duration) {
        self.trigger(CaptureEvent::CompositorUpdate, timestamp);
    }

    fn software_paint(&self, timestamp: Duration) {
        self.trigger(CaptureEvent::SoftwarePaint, timestamp);
    }
}
