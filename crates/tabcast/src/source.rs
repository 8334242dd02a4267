use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tabcast_core::prelude::{CaptureFormat, FrameBuffer, Resolution};

use crate::{CaptureError, TargetLost};

/// Identifier for the logical entity being captured.
///
/// The target is stable across navigations and surface swaps; resolving it
/// yields whichever live source currently backs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureTarget(pub u64);

/// Identifier for one live, compositable source backing a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// Handle for one registered update subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target:{}", self.0)
    }
}

/// A tightly-packed-or-strided RGBA snapshot of a source's backing store.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// RGBA pixel data, `stride` bytes per row.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row; at least `width * 4`.
    pub stride: usize,
}

impl RawImage {
    /// A tightly packed image, stride equal to `width * 4`.
    pub fn packed(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self { data, width, height, stride: width as usize * 4 }
    }
}

/// Receives the output of a capture session.
///
/// `reserve_output_buffer` is the backpressure point: returning `None`
/// refuses the frame without blocking the capture path. All other methods
/// are notifications and must not call back into the device.
pub trait FrameConsumer: Send + Sync {
    /// Hand out a pooled output buffer, or `None` when the consumer cannot
    /// accept another frame right now.
    ///
    /// The render stage writes only the letterboxed content region, so the
    /// consumer pre-fills the buffer (typically `fill_black`) if it cares
    /// about the bars.
    fn reserve_output_buffer(&self) -> Option<FrameBuffer>;

    /// Deliver one completed frame with its capture timestamp.
    fn on_incoming_captured_frame(&self, buffer: FrameBuffer, timestamp: Duration);

    /// Announce the negotiated capture format before the first frame.
    fn on_frame_info(&self, format: CaptureFormat);

    /// Report a fatal session error; no frames follow.
    fn on_error(&self, error: CaptureError);
}

/// Source that can compose itself directly into a caller-provided buffer.
pub trait DirectCopySnapshot: Send + Sync {
    /// Fill `buffer` with the current content. Returns false when the
    /// source could not produce a frame; the buffer contents are then
    /// unspecified and the frame must not be delivered.
    fn copy_into(&self, buffer: &mut FrameBuffer) -> bool;
}

/// Source whose content is read back from a backing store.
pub trait BackingStoreSnapshot: Send + Sync {
    /// Snapshot the current content as RGBA, or `None` if nothing is
    /// available yet.
    fn snapshot(&self) -> Option<RawImage>;
}

/// How a live source exposes its pixels.
#[derive(Clone)]
pub enum SnapshotCapability {
    /// The source composes I420 directly at the requested size.
    DirectCopy(Arc<dyn DirectCopySnapshot>),
    /// The source yields RGBA that the render stage must scale and convert.
    BackingStore(Arc<dyn BackingStoreSnapshot>),
}

impl fmt::Debug for SnapshotCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotCapability::DirectCopy(_) => f.write_str("SnapshotCapability::DirectCopy"),
            SnapshotCapability::BackingStore(_) => f.write_str("SnapshotCapability::BackingStore"),
        }
    }
}

/// One live source currently backing a capture target.
#[derive(Debug, Clone)]
pub struct LiveSource {
    pub id: SourceId,
    /// Current content size in pixels.
    pub size: Resolution,
    pub snapshot: SnapshotCapability,
}

/// Maps a capture target to its current live source.
///
/// Resolution happens on every capture attempt because the backing source
/// can change at any time (navigation, surface swap).
pub trait TargetResolver: Send + Sync {
    /// `Ok(None)` means the target exists but has no live source right now;
    /// `Err(TargetLost)` means the target is gone for good.
    fn resolve(&self, target: CaptureTarget) -> Result<Option<LiveSource>, TargetLost>;
}

/// Callback surface for content-change events on a subscribed source.
pub trait UpdateSink: Send + Sync {
    /// The compositor produced a new frame at `timestamp`.
    fn compositor_update(&self, timestamp: Duration);

    /// A software paint into the backing store finished at `timestamp`.
    fn software_paint(&self, timestamp: Duration);
}

/// Registry of update subscriptions, one per live source.
pub trait UpdateNotifier: Send + Sync {
    fn subscribe(&self, source: SourceId, sink: Arc<dyn UpdateSink>) -> SubscriptionId;
    fn unsubscribe(&self, subscription: SubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_image_stride_matches_width() {
        let img = RawImage::packed(vec![0; 8 * 2 * 4], 8, 2);
        assert_eq!(img.stride, 32);
    }

    #[test]
    fn target_display_is_stable() {
        assert_eq!(CaptureTarget(42).to_string(), "target:42");
    }
}
