#![doc = include_str!("../README.md")]

pub mod device;
pub mod machine;
pub mod oracle;
pub mod proxy;
pub mod render;
pub mod source;
pub mod worker;

/// The capture target was destroyed and will never resolve again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("capture target destroyed")]
pub struct TargetLost;

/// Fatal session errors reported to the consumer through
/// [`FrameConsumer::on_error`](source::FrameConsumer::on_error).
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The requested capture format failed validation.
    #[error("invalid capture format: {0}")]
    InvalidFormat(String),

    /// The capture target is gone for good.
    #[error(transparent)]
    TargetLost(#[from] TargetLost),

    /// A worker thread could not be spawned.
    #[error("capture worker unavailable: {0}")]
    WorkerUnavailable(#[from] std::io::Error),
}

impl CaptureError {
    /// Stable machine-readable error code, independent of the display text.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::InvalidFormat(_) => "invalid_format",
            CaptureError::TargetLost(_) => "target_lost",
            CaptureError::WorkerUnavailable(_) => "worker_unavailable",
        }
    }
}

pub mod prelude {
    //! Convenient re-exports for embedding a capture session.
    pub use crate::device::{CaptureDevice, CaptureTunables, DeviceState};
    pub use crate::oracle::{CaptureEvent, CaptureOracle};
    pub use crate::proxy::{Admission, DeliverHandle, OracleProxy};
    pub use crate::render::{render_into, RenderError};
    pub use crate::source::{
        BackingStoreSnapshot, CaptureTarget, DirectCopySnapshot, FrameConsumer, LiveSource,
        RawImage, SnapshotCapability, SourceId, SubscriptionId, TargetResolver, UpdateNotifier,
        UpdateSink,
    };
    pub use crate::{CaptureError, TargetLost};
    pub use tabcast_core::prelude::*;
}
