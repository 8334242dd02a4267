#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod format;
pub mod geometry;
pub mod metrics;

pub mod prelude {
    pub use crate::{
        buffer::{FrameBuffer, FramePool},
        format::{CaptureFormat, PixelFormat, Resolution},
        geometry::{letterbox_region, Rect},
        metrics::{FlowMetrics, PoolMetrics, RateStats},
    };
}
