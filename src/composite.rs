//! Blend-with-mask compositing of a color frame and a luminance mask frame.

use crate::foundation::core::{PixelBuffer, PixelFormat, TimeRange};
use crate::foundation::error::{MuxError, MuxResult};
use crate::foundation::math::{luma_u8, mul_div255};

/// Premultiplied RGBA, fully transparent.
pub const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Identifier of a track inside a composed read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

/// For one time range: which track is color, which is mask, and what to blend onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositionInstruction {
    pub time_range: TimeRange,
    pub color_track: TrackId,
    pub mask_track: TrackId,
    /// Premultiplied RGBA shown where the mask is black.
    pub background: [u8; 4],
}

impl CompositionInstruction {
    pub fn new(time_range: TimeRange, color_track: TrackId, mask_track: TrackId) -> Self {
        Self {
            time_range,
            color_track,
            mask_track,
            background: TRANSPARENT,
        }
    }

    /// Composite, falling back to the unmasked color frame when the blend cannot run.
    pub fn render(&self, color: PixelBuffer, mask: &PixelBuffer) -> PixelBuffer {
        match composite(&color, mask, self.background) {
            Ok(out) => out,
            Err(err) => {
                tracing::warn!(error = %err, "mask composite failed, passing color frame through");
                color
            }
        }
    }
}

/// `out = color * luma(mask) + background * (1 - luma(mask))`, in premultiplied space.
///
/// The result has `color`'s dimensions, canonical BGRA byte order, and premultiplied alpha.
/// Mismatched dimensions or a failed allocation surface as [`MuxError::CompositeUnavailable`].
pub fn composite(color: &PixelBuffer, mask: &PixelBuffer, background: [u8; 4]) -> MuxResult<PixelBuffer> {
    if color.size != mask.size {
        return Err(MuxError::composite(format!(
            "color is {} but mask is {}",
            color.size, mask.size
        )));
    }

    let mut data = Vec::new();
    data.try_reserve_exact(color.byte_len())
        .map_err(|e| MuxError::composite(format!("output buffer allocation failed: {e}")))?;
    data.resize(color.byte_len(), 0);

    let src = color.format.channel_offsets();
    let msk = mask.format.channel_offsets();
    let dst = PixelFormat::Bgra8.channel_offsets();
    let bg = background.map(u16::from);

    for ((d, c), m) in data
        .chunks_exact_mut(4)
        .zip(color.data.chunks_exact(4))
        .zip(mask.data.chunks_exact(4))
    {
        let ca = u16::from(c[src[3]]);
        let mut rgba = [
            u16::from(c[src[0]]),
            u16::from(c[src[1]]),
            u16::from(c[src[2]]),
            ca,
        ];
        if !color.premultiplied {
            for ch in rgba.iter_mut().take(3) {
                *ch = mul_div255(*ch, ca);
            }
        }

        let mut stencil = u16::from(luma_u8(m[msk[0]], m[msk[1]], m[msk[2]]));
        if !mask.premultiplied {
            stencil = mul_div255(stencil, u16::from(m[msk[3]]));
        }
        let inv = 255 - stencil;

        for ch in 0..4 {
            let v = mul_div255(rgba[ch], stencil) + mul_div255(bg[ch], inv);
            d[dst[ch]] = v.min(255) as u8;
        }
    }

    Ok(PixelBuffer {
        size: color.size,
        format: PixelFormat::Bgra8,
        premultiplied: true,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::{MediaTime, Size};

    fn solid(size: Size, format: PixelFormat, rgba: [u8; 4]) -> PixelBuffer {
        let [r, g, b, a] = format.channel_offsets();
        let mut px = [0u8; 4];
        px[r] = rgba[0];
        px[g] = rgba[1];
        px[b] = rgba[2];
        px[a] = rgba[3];
        let data = px.repeat(size.pixel_count());
        PixelBuffer::new(size, format, false, data).unwrap()
    }

    #[test]
    fn white_mask_keeps_color_opaque() {
        let size = Size::new(3, 2);
        let color = solid(size, PixelFormat::Bgra8, [200, 100, 50, 255]);
        let mask = solid(size, PixelFormat::Bgra8, [255, 255, 255, 255]);
        let out = composite(&color, &mask, TRANSPARENT).unwrap();
        assert_eq!(out.size, size);
        assert_eq!(out.rgba_at(2, 1), Some([200, 100, 50, 255]));
    }

    #[test]
    fn black_mask_yields_transparent() {
        let size = Size::new(2, 2);
        let color = solid(size, PixelFormat::Rgba8, [200, 100, 50, 255]);
        let mask = solid(size, PixelFormat::Rgba8, [0, 0, 0, 255]);
        let out = composite(&color, &mask, TRANSPARENT).unwrap();
        assert_eq!(out.format, PixelFormat::Bgra8);
        assert!(out.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn gray_mask_scales_premultiplied_channels() {
        let size = Size::new(1, 1);
        let color = solid(size, PixelFormat::Bgra8, [255, 0, 0, 255]);
        let mask = solid(size, PixelFormat::Bgra8, [128, 128, 128, 255]);
        let out = composite(&color, &mask, TRANSPARENT).unwrap();
        assert!(out.premultiplied);
        assert_eq!(out.rgba_at(0, 0), Some([128, 0, 0, 128]));
    }

    #[test]
    fn mismatched_dimensions_are_unavailable() {
        let color = solid(Size::new(2, 2), PixelFormat::Bgra8, [1, 2, 3, 255]);
        let mask = solid(Size::new(2, 1), PixelFormat::Bgra8, [255, 255, 255, 255]);
        assert!(matches!(
            composite(&color, &mask, TRANSPARENT),
            Err(MuxError::CompositeUnavailable(_))
        ));
    }

    #[test]
    fn instruction_render_passes_color_through_on_failure() {
        let range = TimeRange::new(MediaTime::ZERO, MediaTime::new(1, 1));
        let instruction = CompositionInstruction::new(range, TrackId(1), TrackId(2));
        let color = solid(Size::new(2, 2), PixelFormat::Bgra8, [9, 8, 7, 255]);
        let mask = solid(Size::new(1, 1), PixelFormat::Bgra8, [0, 0, 0, 255]);
        let out = instruction.render(color.clone(), &mask);
        assert_eq!(out, color);
    }
}
