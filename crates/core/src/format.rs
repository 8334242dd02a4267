use std::{fmt, num::NonZeroU32};

/// Resolution of a frame or capture surface.
///
/// # Example
/// ```rust
/// use tabcast_core::prelude::Resolution;
///
/// let res = Resolution::new(640, 480).unwrap();
/// assert_eq!(res.width.get(), 640);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    /// Round both dimensions down to even values, clamped to `min_dim`.
    ///
    /// 4:2:0 chroma subsampling requires even plane dimensions, so every
    /// destination surface in the pipeline passes through this.
    ///
    /// # Example
    /// ```rust
    /// use tabcast_core::prelude::Resolution;
    ///
    /// let res = Resolution::new(641, 479).unwrap().snapped_to_even(16);
    /// assert_eq!((res.width.get(), res.height.get()), (640, 478));
    /// ```
    pub fn snapped_to_even(self, min_dim: u32) -> Self {
        let min = min_dim.max(2) & !1;
        let snap = |v: u32| NonZeroU32::new((v & !1).max(min)).unwrap_or(NonZeroU32::MIN);
        Self {
            width: snap(self.width.get()),
            height: snap(self.height.get()),
        }
    }

    /// Whether both dimensions are even.
    pub fn is_even(&self) -> bool {
        self.width.get() % 2 == 0 && self.height.get() % 2 == 0
    }

    /// Total pixel count.
    pub fn area(&self) -> u64 {
        self.width.get() as u64 * self.height.get() as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of image data moving through the pipeline.
///
/// Raw snapshots arrive as packed RGBA; destination buffers are planar 4:2:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PixelFormat {
    /// Packed RGBA, 8 bits per channel (4 bytes per pixel).
    Rgba,
    /// Planar YUV 4:2:0 (Y, U, V in separate planes).
    I420,
}

impl PixelFormat {
    /// Total bytes for a tightly-packed frame at `res`.
    pub fn frame_bytes(&self, res: Resolution) -> usize {
        let area = res.area() as usize;
        match self {
            PixelFormat::Rgba => area * 4,
            // Y plane plus two quarter-size chroma planes.
            PixelFormat::I420 => area + 2 * (area / 4),
        }
    }
}

/// Negotiated capture format reported to the consumer.
///
/// # Example
/// ```rust
/// use tabcast_core::prelude::{CaptureFormat, PixelFormat, Resolution};
///
/// let format = CaptureFormat {
///     resolution: Resolution::new(640, 480).unwrap(),
///     frame_rate: 30.0,
///     pixel_format: PixelFormat::I420,
/// };
/// assert!(format.capture_period().as_millis() >= 33);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaptureFormat {
    /// Coded size of delivered frames.
    pub resolution: Resolution,
    /// Target frames per second.
    pub frame_rate: f32,
    /// Pixel layout of delivered frames.
    pub pixel_format: PixelFormat,
}

impl CaptureFormat {
    /// Duration of one frame at the target rate.
    pub fn capture_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.frame_rate.max(f32::EPSILON) as f64)
    }
}
