use crate::format::Resolution;

/// Integer rectangle in destination pixel coordinates.
///
/// # Example
/// ```rust
/// use tabcast_core::prelude::Rect;
///
/// let rect = Rect { x: 0, y: 60, width: 640, height: 360 };
/// assert!(rect.is_even());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Whether origin and both dimensions are even.
    ///
    /// Required before writing 4:2:0 chroma planes: an odd origin or size
    /// would split a chroma sample across the rectangle edge.
    pub fn is_even(&self) -> bool {
        self.x % 2 == 0 && self.y % 2 == 0 && self.width % 2 == 0 && self.height % 2 == 0
    }

    /// Whether the rectangle fits entirely inside `bounds`.
    pub fn fits_within(&self, bounds: Resolution) -> bool {
        self.x
            .checked_add(self.width)
            .is_some_and(|r| r <= bounds.width.get())
            && self
                .y
                .checked_add(self.height)
                .is_some_and(|b| b <= bounds.height.get())
    }
}

/// Compute the centered letterbox fit of `source`'s aspect ratio inside
/// `dest`'s coded size.
///
/// The returned rectangle always has even origin and dimensions, dimensions
/// no smaller than `min_dim` (rounded to even, floor 2) where `dest` allows
/// it, and never exceeds `dest`.
///
/// # Example
/// ```rust
/// use tabcast_core::prelude::{letterbox_region, Resolution};
///
/// let src = Resolution::new(1920, 1080).unwrap();
/// let dst = Resolution::new(640, 480).unwrap();
/// let rect = letterbox_region(src, dst, 4);
/// assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 60, 640, 360));
/// ```
pub fn letterbox_region(source: Resolution, dest: Resolution, min_dim: u32) -> Rect {
    let src_w = source.width.get() as u64;
    let src_h = source.height.get() as u64;
    let dst_w = dest.width.get() as u64;
    let dst_h = dest.height.get() as u64;

    // Pick the limiting axis; the other scales by the source aspect ratio.
    let (mut w, mut h) = if src_w * dst_h >= src_h * dst_w {
        (dst_w, (dst_w * src_h / src_w).max(1))
    } else {
        ((dst_h * src_w / src_h).max(1), dst_h)
    };

    let min = (min_dim.max(2) & !1) as u64;
    let max_w = (dst_w & !1).max(2);
    let max_h = (dst_h & !1).max(2);
    w = (w & !1).clamp(min.min(max_w), max_w);
    h = (h & !1).clamp(min.min(max_h), max_h);

    // Center with an even origin.
    let x = (dst_w.saturating_sub(w) / 2) & !1;
    let y = (dst_h.saturating_sub(h) / 2) & !1;

    Rect {
        x: x as u32,
        y: y as u32,
        width: w as u32,
        height: h as u32,
    }
}
