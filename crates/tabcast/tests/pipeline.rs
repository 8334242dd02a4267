//! End-to-end session tests: real workers, real timer, mock target.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tabcast::prelude::*;

struct RecordingConsumer {
    pool: FramePool,
    delivered: Mutex<Vec<Duration>>,
    infos: Mutex<Vec<CaptureFormat>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingConsumer {
    fn new(width: u32, height: u32) -> Arc<Self> {
        let coded = Resolution::new(width, height).expect("coded size");
        Arc::new(Self {
            pool: FramePool::new(coded, 2),
            delivered: Mutex::new(Vec::new()),
            infos: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        })
    }

    fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

impl FrameConsumer for RecordingConsumer {
    fn reserve_output_buffer(&self) -> Option<FrameBuffer> {
        self.pool.try_reserve()
    }

    fn on_incoming_captured_frame(&self, buffer: FrameBuffer, timestamp: Duration) {
        assert_eq!(buffer.coded_size(), self.pool.coded_size());
        self.delivered.lock().unwrap().push(timestamp);
    }

    fn on_frame_info(&self, format: CaptureFormat) {
        self.infos.lock().unwrap().push(format);
    }

    fn on_error(&self, error: CaptureError) {
        self.errors.lock().unwrap().push(error.code().to_string());
    }
}

struct WhiteBackingStore {
    width: u32,
    height: u32,
}

impl BackingStoreSnapshot for WhiteBackingStore {
    fn snapshot(&self) -> Option<RawImage> {
        let len = self.width as usize * self.height as usize * 4;
        Some(RawImage::packed(vec![255; len], self.width, self.height))
    }
}

struct SwappableResolver {
    source: Mutex<Option<LiveSource>>,
    lost: Mutex<bool>,
}

impl SwappableResolver {
    fn new(source: LiveSource) -> Arc<Self> {
        Arc::new(Self {
            source: Mutex::new(Some(source)),
            lost: Mutex::new(false),
        })
    }

    fn swap(&self, source: LiveSource) {
        *self.source.lock().unwrap() = Some(source);
    }

    fn destroy(&self) {
        *self.lost.lock().unwrap() = true;
    }
}

impl TargetResolver for SwappableResolver {
    fn resolve(&self, _target: CaptureTarget) -> Result<Option<LiveSource>, TargetLost> {
        if *self.lost.lock().unwrap() {
            return Err(TargetLost);
        }
        Ok(self.source.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    next: AtomicU64,
    live: Mutex<Vec<(SourceId, SubscriptionId, Arc<dyn UpdateSink>)>>,
}

impl RecordingNotifier {
    fn current_sink(&self) -> Option<Arc<dyn UpdateSink>> {
        self.live.lock().unwrap().last().map(|(_, _, sink)| sink.clone())
    }

    fn live_sources(&self) -> Vec<SourceId> {
        self.live.lock().unwrap().iter().map(|&(id, _, _)| id).collect()
    }
}

impl UpdateNotifier for RecordingNotifier {
    fn subscribe(&self, source: SourceId, sink: Arc<dyn UpdateSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next.fetch_add(1, Ordering::SeqCst));
        self.live.lock().unwrap().push((source, id, sink));
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.live.lock().unwrap().retain(|&(_, id, _)| id != subscription);
    }
}

fn white_source(id: u64, width: u32, height: u32) -> LiveSource {
    LiveSource {
        id: SourceId(id),
        size: Resolution::new(width, height).expect("source size"),
        snapshot: SnapshotCapability::BackingStore(Arc::new(WhiteBackingStore { width, height })),
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn settle() {
    thread::sleep(Duration::from_millis(30));
}

/// Tunables with the liveness fallback pushed far out, so only the
/// explicitly injected events drive captures.
fn event_only_tunables() -> CaptureTunables {
    CaptureTunables {
        liveness_factor: 100_000,
        ..CaptureTunables::default()
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn full_session_flow() {
    let consumer = RecordingConsumer::new(640, 480);
    let resolver = SwappableResolver::new(white_source(1, 1920, 1080));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut device = CaptureDevice::new(
        CaptureTarget(7),
        resolver,
        notifier.clone(),
        event_only_tunables(),
    );

    device.allocate(640, 480, 30.0, consumer.clone());
    assert_eq!(device.state(), DeviceState::Allocated);
    {
        let infos = consumer.infos.lock().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].resolution.width.get(), 640);
        assert!((infos[0].frame_rate - 30.0).abs() < f32::EPSILON);
    }

    device.start();
    assert_eq!(device.state(), DeviceState::Capturing);
    wait_until("update subscription", || notifier.current_sink().is_some());
    let sink = notifier.current_sink().expect("sink");

    sink.software_paint(ms(0));
    wait_until("first frame", || consumer.delivered_count() == 1);
    assert_eq!(consumer.delivered.lock().unwrap()[0], ms(0));

    // Within the 33ms capture period: rate limited, nothing delivered.
    sink.software_paint(ms(10));
    settle();
    assert_eq!(consumer.delivered_count(), 1);

    sink.compositor_update(ms(40));
    wait_until("second frame", || consumer.delivered_count() == 2);

    device.stop();
    assert_eq!(device.state(), DeviceState::Allocated);
    sink.software_paint(ms(80));
    settle();
    assert_eq!(consumer.delivered_count(), 2);

    device.deallocate();
    assert_eq!(device.state(), DeviceState::Idle);
    assert!(notifier.live_sources().is_empty());
    assert!(consumer.errors.lock().unwrap().is_empty());
}

#[test]
fn poll_timer_keeps_static_content_alive() {
    let consumer = RecordingConsumer::new(64, 48);
    let resolver = SwappableResolver::new(white_source(1, 64, 48));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut device = CaptureDevice::new(
        CaptureTarget(7),
        resolver,
        notifier,
        CaptureTunables::default(),
    );

    device.allocate(64, 48, 30.0, consumer.clone());
    device.start();

    // No injected events at all: the poll timer alone must produce frames.
    wait_until("poll-driven frames", || consumer.delivered_count() >= 2);

    device.deallocate();
}

#[test]
fn no_delivery_after_deallocate() {
    let consumer = RecordingConsumer::new(64, 48);
    let resolver = SwappableResolver::new(white_source(1, 64, 48));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut device = CaptureDevice::new(
        CaptureTarget(7),
        resolver,
        notifier.clone(),
        event_only_tunables(),
    );

    device.allocate(64, 48, 30.0, consumer.clone());
    device.start();
    wait_until("update subscription", || notifier.current_sink().is_some());
    let sink = notifier.current_sink().expect("sink");

    sink.software_paint(ms(0));
    wait_until("first frame", || consumer.delivered_count() == 1);

    device.deallocate();
    // The sink outlives the session; late events must go nowhere.
    sink.software_paint(ms(100));
    settle();
    assert_eq!(consumer.delivered_count(), 1);
}

#[test]
fn lost_target_parks_device_in_error() {
    let consumer = RecordingConsumer::new(64, 48);
    let resolver = SwappableResolver::new(white_source(1, 64, 48));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut device = CaptureDevice::new(
        CaptureTarget(7),
        resolver.clone(),
        notifier.clone(),
        event_only_tunables(),
    );

    device.allocate(64, 48, 30.0, consumer.clone());
    device.start();
    wait_until("update subscription", || notifier.current_sink().is_some());
    let sink = notifier.current_sink().expect("sink");

    resolver.destroy();
    sink.software_paint(ms(0));
    wait_until("error state", || device.state() == DeviceState::Error);
    assert_eq!(consumer.errors.lock().unwrap().as_slice(), ["target_lost"]);
    assert!(consumer.delivered.lock().unwrap().is_empty());

    device.deallocate();
    assert_eq!(device.state(), DeviceState::Idle);
}

#[test]
fn subscription_follows_source_swap() {
    let consumer = RecordingConsumer::new(64, 48);
    let resolver = SwappableResolver::new(white_source(1, 64, 48));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut device = CaptureDevice::new(
        CaptureTarget(7),
        resolver.clone(),
        notifier.clone(),
        event_only_tunables(),
    );

    device.allocate(64, 48, 30.0, consumer.clone());
    device.start();
    wait_until("update subscription", || notifier.current_sink().is_some());
    let sink = notifier.current_sink().expect("sink");

    sink.software_paint(ms(0));
    wait_until("first frame", || consumer.delivered_count() == 1);
    assert_eq!(notifier.live_sources(), [SourceId(1)]);

    // Navigation: a new source backs the same target.
    resolver.swap(white_source(2, 64, 48));
    sink.software_paint(ms(100));
    wait_until("second frame", || consumer.delivered_count() == 2);
    assert_eq!(notifier.live_sources(), [SourceId(2)]);

    device.deallocate();
}
