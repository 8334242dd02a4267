use image::imageops::{self, FilterType};
use image::RgbaImage;
use rayon::prelude::*;
use tabcast_core::prelude::{letterbox_region, FrameBuffer, Rect, Resolution};
use yuvutils_rs::{
    rgba_to_yuv420, BufferStoreMut, YuvConversionMode, YuvPlanarImageMut, YuvRange,
    YuvStandardMatrix,
};

use crate::source::RawImage;

/// Errors from the RGBA-to-I420 render stage.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("source image is empty")]
    EmptySource,

    #[error("source stride {stride} shorter than a row of {width} pixels")]
    BadStride { stride: usize, width: u32 },

    #[error("source buffer too short: {actual} bytes, need {required}")]
    SourceTooShort { required: usize, actual: usize },

    #[error("source dimensions overflow")]
    DimensionOverflow,

    #[error("yuv conversion failed: {0}")]
    Convert(String),
}

/// Scale `raw` into the letterboxed content region of `dst` and convert to
/// limited-range BT.709 I420.
///
/// The content region preserves the source aspect ratio, is snapped to even
/// coordinates for 4:2:0 chroma alignment, and is never smaller than
/// `min_content_dim` on either axis. Only the content region is written;
/// letterbox bars keep whatever the consumer pre-filled the buffer with.
///
/// Downscaling uses an area average, which suppresses the shimmer a point
/// sampler produces on text-heavy content; upscaling uses Catmull-Rom.
/// Validation happens before any write, so a failed call leaves `dst`
/// untouched.
///
/// Returns the content rectangle that was written.
pub fn render_into(
    raw: &RawImage,
    dst: &mut FrameBuffer,
    min_content_dim: u32,
) -> Result<Rect, RenderError> {
    let Some(source) = Resolution::new(raw.width, raw.height) else {
        return Err(RenderError::EmptySource);
    };
    let row_bytes = (raw.width as usize)
        .checked_mul(4)
        .ok_or(RenderError::DimensionOverflow)?;
    if raw.stride < row_bytes {
        return Err(RenderError::BadStride {
            stride: raw.stride,
            width: raw.width,
        });
    }
    let required = raw
        .stride
        .checked_mul(raw.height as usize - 1)
        .and_then(|v| v.checked_add(row_bytes))
        .ok_or(RenderError::DimensionOverflow)?;
    if raw.data.len() < required {
        return Err(RenderError::SourceTooShort {
            required,
            actual: raw.data.len(),
        });
    }

    let coded = dst.coded_size();
    let rect = letterbox_region(source, coded, min_content_dim);
    debug_assert!(rect.is_even() && rect.fits_within(coded));

    let same_size = rect.width == raw.width && rect.height == raw.height;
    let scaled: Option<Vec<u8>> = if same_size {
        None
    } else if rect.width <= raw.width && rect.height <= raw.height {
        Some(shrink_area_average(raw, rect.width, rect.height))
    } else {
        Some(upscale_catmull_rom(raw, rect.width, rect.height)?)
    };
    let (rgba, rgba_stride) = match &scaled {
        Some(buf) => (buf.as_slice(), rect.width * 4),
        None => (raw.data.as_slice(), raw.stride as u32),
    };

    // Convert into tight rect-sized planes first: the converter wants full
    // stride*height windows, which an offset view into the destination
    // cannot provide once the rect touches the bottom edge with x > 0.
    let (rw, rh) = (rect.width as usize, rect.height as usize);
    let (cw, ch) = (rw / 2, rh / 2);
    let mut y_tmp = vec![0u8; rw * rh];
    let mut u_tmp = vec![0u8; cw * ch];
    let mut v_tmp = vec![0u8; cw * ch];
    let mut planar = YuvPlanarImageMut {
        y_plane: BufferStoreMut::Borrowed(&mut y_tmp),
        y_stride: rect.width,
        u_plane: BufferStoreMut::Borrowed(&mut u_tmp),
        u_stride: rect.width / 2,
        v_plane: BufferStoreMut::Borrowed(&mut v_tmp),
        v_stride: rect.width / 2,
        width: rect.width,
        height: rect.height,
    };
    rgba_to_yuv420(
        &mut planar,
        rgba,
        rgba_stride,
        YuvRange::Limited,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|e| RenderError::Convert(e.to_string()))?;

    let y_stride = dst.y_stride();
    let uv_stride = dst.uv_stride();
    let (y, u, v) = dst.planes_mut();
    for row in 0..rh {
        let dst_off = (rect.y as usize + row) * y_stride + rect.x as usize;
        y[dst_off..dst_off + rw].copy_from_slice(&y_tmp[row * rw..(row + 1) * rw]);
    }
    let (cx, cy) = (rect.x as usize / 2, rect.y as usize / 2);
    for row in 0..ch {
        let dst_off = (cy + row) * uv_stride + cx;
        u[dst_off..dst_off + cw].copy_from_slice(&u_tmp[row * cw..(row + 1) * cw]);
        v[dst_off..dst_off + cw].copy_from_slice(&v_tmp[row * cw..(row + 1) * cw]);
    }

    Ok(rect)
}

/// Integer box-filter downscale into a tightly packed RGBA buffer.
///
/// Each output pixel averages its full source footprint, rows in parallel.
fn shrink_area_average(raw: &RawImage, out_w: u32, out_h: u32) -> Vec<u8> {
    let (sw, sh) = (raw.width as usize, raw.height as usize);
    let (ow, oh) = (out_w as usize, out_h as usize);
    let mut out = vec![0u8; ow * oh * 4];
    out.par_chunks_mut(ow * 4).enumerate().for_each(|(oy, row)| {
        let sy0 = oy * sh / oh;
        let sy1 = ((oy + 1) * sh / oh).max(sy0 + 1);
        for ox in 0..ow {
            let sx0 = ox * sw / ow;
            let sx1 = ((ox + 1) * sw / ow).max(sx0 + 1);
            let mut acc = [0u64; 4];
            for sy in sy0..sy1 {
                let base = sy * raw.stride;
                for sx in sx0..sx1 {
                    let px = base + sx * 4;
                    for (channel, sum) in acc.iter_mut().enumerate() {
                        *sum += u64::from(raw.data[px + channel]);
                    }
                }
            }
            let count = ((sy1 - sy0) * (sx1 - sx0)) as u64;
            let dst = ox * 4;
            for (channel, sum) in acc.iter().enumerate() {
                row[dst + channel] = (sum / count) as u8;
            }
        }
    });
    out
}

fn upscale_catmull_rom(raw: &RawImage, out_w: u32, out_h: u32) -> Result<Vec<u8>, RenderError> {
    let tight = tight_copy(raw);
    let img = RgbaImage::from_raw(raw.width, raw.height, tight)
        .ok_or_else(|| RenderError::Convert("resample buffer mismatch".into()))?;
    Ok(imageops::resize(&img, out_w, out_h, FilterType::CatmullRom).into_raw())
}

fn tight_copy(raw: &RawImage) -> Vec<u8> {
    let row_bytes = raw.width as usize * 4;
    if raw.stride == row_bytes {
        return raw.data[..row_bytes * raw.height as usize].to_vec();
    }
    let mut out = Vec::with_capacity(row_bytes * raw.height as usize);
    for row in 0..raw.height as usize {
        let base = row * raw.stride;
        out.extend_from_slice(&raw.data[base..base + row_bytes]);
    }
    out
}

#[cfg(test)]
mod tests {
    use tabcast_core::prelude::FramePool;

    use super::*;

    fn buffer(width: u32, height: u32) -> FrameBuffer {
        let coded = Resolution::new(width, height).unwrap();
        FramePool::new(coded, 1).try_reserve().unwrap()
    }

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RawImage {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        RawImage::packed(data, width, height)
    }

    #[test]
    fn empty_source_leaves_buffer_untouched() {
        let mut dst = buffer(64, 48);
        {
            let (y, _, _) = dst.planes_mut();
            y.fill(200);
        }
        let raw = RawImage::packed(Vec::new(), 0, 0);
        assert!(matches!(render_into(&raw, &mut dst, 4), Err(RenderError::EmptySource)));
        let (y, _, _) = dst.planes();
        assert!(y.iter().all(|&p| p == 200));
    }

    #[test]
    fn short_buffer_rejected() {
        let mut dst = buffer(64, 48);
        let raw = RawImage::packed(vec![0; 10], 8, 8);
        assert!(matches!(
            render_into(&raw, &mut dst, 4),
            Err(RenderError::SourceTooShort { .. })
        ));
    }

    #[test]
    fn undersized_stride_rejected() {
        let mut dst = buffer(64, 48);
        let raw = RawImage {
            data: vec![0; 8 * 8 * 4],
            width: 8,
            height: 8,
            stride: 8, // needs 32
        };
        assert!(matches!(render_into(&raw, &mut dst, 4), Err(RenderError::BadStride { .. })));
    }

    #[test]
    fn widescreen_into_4x3_letterboxes_and_keeps_prefilled_bars() {
        let mut dst = buffer(640, 480);
        dst.fill_black();
        let raw = solid(1920, 1080, [255, 255, 255, 255]);
        let rect = render_into(&raw, &mut dst, 4).unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 60, 640, 360));

        let (y, u, v) = dst.planes();
        // Bars keep the pre-fill; only the content rect is written.
        assert!(y[..60 * 640].iter().all(|&p| p == 16));
        assert!(y[420 * 640..].iter().all(|&p| p == 16));
        assert!(u[..30 * 320].iter().all(|&p| p == 128));
        assert!(v[..30 * 320].iter().all(|&p| p == 128));
        // Content region is uniform white.
        let first_content = y[60 * 640];
        assert!(first_content > 200, "white luma was {first_content}");
        assert!(y[60 * 640..420 * 640].iter().all(|&p| p == first_content));
    }

    #[test]
    fn matching_aspect_fills_the_whole_frame() {
        let mut dst = buffer(640, 360);
        let raw = solid(1920, 1080, [255, 255, 255, 255]);
        let rect = render_into(&raw, &mut dst, 4).unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 640, 360));
        assert!(rect.is_even());
    }

    #[test]
    fn area_shrink_preserves_solid_color() {
        let mut dst = buffer(64, 48);
        let raw = solid(100, 100, [255, 0, 0, 255]);
        let rect = render_into(&raw, &mut dst, 4).unwrap();
        assert_eq!((rect.width, rect.height), (48, 48));

        let (y, _, _) = dst.planes();
        let inside = rect.y as usize * 64 + rect.x as usize;
        let luma = y[inside];
        // BT.709 limited-range red sits well above black.
        assert!(luma > 40 && luma < 90, "red luma was {luma}");
        for row in 0..rect.height as usize {
            let base = (rect.y as usize + row) * 64 + rect.x as usize;
            assert!(y[base..base + rect.width as usize].iter().all(|&p| p == luma));
        }
    }

    #[test]
    fn pillarbox_fit_writes_the_bottom_content_rows() {
        let mut dst = buffer(64, 48);
        dst.fill_black();
        // Square source pillarboxes to 48x48 at x=8: content reaches the
        // last row of the buffer.
        let raw = solid(100, 100, [255, 0, 0, 255]);
        let rect = render_into(&raw, &mut dst, 4).unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (8, 0, 48, 48));

        let (y, _, v) = dst.planes();
        let top = y[rect.x as usize];
        assert!(top > 16, "red luma was {top}");
        for row in [46usize, 47] {
            let base = row * 64 + rect.x as usize;
            assert!(
                y[base..base + 48].iter().all(|&p| p == top),
                "row {row} not fully written"
            );
        }
        // Last chroma row inside the rect carries red's Cr, not neutral.
        let cbase = 23 * 32 + 4;
        assert!(v[cbase..cbase + 24].iter().all(|&p| p > 200));
        // Side bars keep the pre-fill.
        assert!(y.chunks(64).all(|row| row[..8].iter().all(|&p| p == 16)));
        assert!(y.chunks(64).all(|row| row[56..].iter().all(|&p| p == 16)));
    }

    #[test]
    fn upscale_keeps_solid_color_uniform() {
        let mut dst = buffer(64, 48);
        let raw = solid(4, 4, [0, 255, 0, 255]);
        let rect = render_into(&raw, &mut dst, 4).unwrap();
        assert!(rect.width > 4 && rect.height > 4);

        let (y, _, _) = dst.planes();
        let inside = rect.y as usize * 64 + rect.x as usize;
        let luma = y[inside] as i16;
        for row in 0..rect.height as usize {
            let base = (rect.y as usize + row) * 64 + rect.x as usize;
            for &p in &y[base..base + rect.width as usize] {
                assert!((p as i16 - luma).abs() <= 2, "luma drifted: {p} vs {luma}");
            }
        }
    }

    #[test]
    fn same_size_source_respects_padded_stride() {
        let mut dst = buffer(64, 48);
        // 64x48 content with 16 bytes of row padding.
        let stride = 64 * 4 + 16;
        let mut data = vec![0u8; stride * 48];
        for row in 0..48 {
            for col in 0..64 {
                let px = row * stride + col * 4;
                data[px..px + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        let raw = RawImage { data, width: 64, height: 48, stride };
        let rect = render_into(&raw, &mut dst, 4).unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 0, 64, 48));
        let (y, _, _) = dst.planes();
        assert!(y.iter().all(|&p| p > 200));
    }
}
