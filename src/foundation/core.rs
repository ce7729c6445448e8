use std::cmp::Ordering;
use std::fmt;

use crate::foundation::error::{MuxError, MuxResult};

/// Nanosecond timescale used when two rational times cannot share an exact common scale.
pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Rational presentation time `value / scale` seconds.
///
/// Values are kept reduced, so `1/10` and `100/1000` compare equal.
#[derive(Clone, Copy, Debug, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaTime {
    value: i64,
    scale: u32,
}

impl MediaTime {
    pub const ZERO: Self = Self { value: 0, scale: 1 };

    /// Create a time of `value / scale` seconds. A zero scale is treated as `1`.
    pub fn new(value: i64, scale: u32) -> Self {
        reduce(i128::from(value), u64::from(scale.max(1)))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new((secs * f64::from(NANOS_PER_SEC)).round() as i64, NANOS_PER_SEC)
    }

    pub fn value(self) -> i64 {
        self.value
    }

    pub fn scale(self) -> u32 {
        self.scale
    }

    pub fn as_secs_f64(self) -> f64 {
        self.value as f64 / f64::from(self.scale)
    }

    pub fn is_zero(self) -> bool {
        self.value == 0
    }

    /// Exact addition when the common scale fits, nanosecond rounding otherwise.
    pub fn add(self, rhs: Self) -> Self {
        let a_scale = u64::from(self.scale);
        let b_scale = u64::from(rhs.scale);
        let lcm = a_scale / gcd_u64(a_scale, b_scale) * b_scale;
        if lcm <= u64::from(u32::MAX) {
            let v = i128::from(self.value) * i128::from(lcm / a_scale)
                + i128::from(rhs.value) * i128::from(lcm / b_scale);
            return reduce(v, lcm);
        }
        let v = self.rescaled_nanos() + rhs.rescaled_nanos();
        reduce(v, u64::from(NANOS_PER_SEC))
    }

    pub fn sub(self, rhs: Self) -> Self {
        self.add(Self {
            value: -rhs.value,
            scale: rhs.scale,
        })
    }

    fn rescaled_nanos(self) -> i128 {
        let num = i128::from(self.value) * i128::from(NANOS_PER_SEC);
        let den = i128::from(self.scale);
        // round half away from zero
        if num >= 0 {
            (num + den / 2) / den
        } else {
            (num - den / 2) / den
        }
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i128::from(self.value) * i128::from(other.scale);
        let rhs = i128::from(other.value) * i128::from(self.scale);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

fn reduce(value: i128, scale: u64) -> MediaTime {
    let g = gcd_u128(value.unsigned_abs(), u128::from(scale)).max(1);
    let value = value / g as i128;
    let scale = (u128::from(scale) / g) as u64;
    MediaTime {
        value: value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64,
        scale: scale.min(u64::from(u32::MAX)) as u32,
    }
}

fn gcd_u64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn gcd_u128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Half-open time range `[start, start + duration)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self { start, duration }
    }

    pub fn end(self) -> MediaTime {
        self.start.add(self.duration)
    }

    pub fn contains(self, t: MediaTime) -> bool {
        self.start <= t && t < self.end()
    }
}

/// Pixel dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Byte layout of a 32-bit pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// Canonical pipeline format.
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Byte offsets of `(r, g, b, a)` inside one pixel.
    pub const fn channel_offsets(self) -> [usize; 4] {
        match self {
            Self::Bgra8 => [2, 1, 0, 3],
            Self::Rgba8 => [0, 1, 2, 3],
        }
    }
}

/// Tightly packed row-major raster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    pub size: Size,
    pub format: PixelFormat,
    /// `true` when color channels are already multiplied by alpha.
    pub premultiplied: bool,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(size: Size, format: PixelFormat, premultiplied: bool, data: Vec<u8>) -> MuxResult<Self> {
        let expected = size
            .pixel_count()
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(|| MuxError::validation("pixel buffer size overflow"))?;
        if data.len() != expected {
            return Err(MuxError::validation(format!(
                "pixel buffer data is {} bytes, expected {expected} for {size}",
                data.len()
            )));
        }
        Ok(Self {
            size,
            format,
            premultiplied,
            data,
        })
    }

    /// Fully transparent buffer.
    pub fn transparent(size: Size, format: PixelFormat) -> Self {
        Self {
            size,
            format,
            premultiplied: true,
            data: vec![0u8; size.pixel_count() * format.bytes_per_pixel()],
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// `(r, g, b, a)` of the pixel at `(x, y)`, independent of byte order.
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let idx = (y as usize * self.size.width as usize + x as usize) * 4;
        let [r, g, b, a] = self.format.channel_offsets();
        let px = &self.data[idx..idx + 4];
        Some([px[r], px[g], px[b], px[a]])
    }

    /// Return a copy in `format`, swizzling channels as needed.
    pub fn converted(&self, format: PixelFormat) -> PixelBuffer {
        if format == self.format {
            return self.clone();
        }
        let src = self.format.channel_offsets();
        let dst = format.channel_offsets();
        let mut data = vec![0u8; self.data.len()];
        for (d, s) in data.chunks_exact_mut(4).zip(self.data.chunks_exact(4)) {
            for c in 0..4 {
                d[dst[c]] = s[src[c]];
            }
        }
        PixelBuffer {
            size: self.size,
            format,
            premultiplied: self.premultiplied,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_time_reduces_and_compares_across_scales() {
        assert_eq!(MediaTime::new(1, 10), MediaTime::new(100, 1000));
        assert_eq!(MediaTime::new(100, 1000).scale(), 10);
        assert!(MediaTime::new(1, 3) < MediaTime::new(34, 100));
        assert_eq!(MediaTime::new(3, 0), MediaTime::new(3, 1));
    }

    #[test]
    fn media_time_addition_is_exact_for_mixed_scales() {
        let t = MediaTime::new(1, 10)
            .add(MediaTime::new(1, 5))
            .add(MediaTime::new(3, 20));
        assert_eq!(t, MediaTime::new(9, 20));
        assert_eq!(t.sub(MediaTime::new(3, 20)), MediaTime::new(3, 10));
    }

    #[test]
    fn media_time_falls_back_to_nanos_on_scale_overflow() {
        let a = MediaTime::new(1_000_000, 4_294_967_291);
        let b = MediaTime::new(1_000_000, 4_294_967_279);
        let sum = a.add(b);
        assert!(sum.scale() <= NANOS_PER_SEC);
        assert!((sum.as_secs_f64() - (a.as_secs_f64() + b.as_secs_f64())).abs() < 1e-9);
    }

    #[test]
    fn time_range_is_half_open() {
        let r = TimeRange::new(MediaTime::new(1, 1), MediaTime::new(2, 1));
        assert!(r.contains(MediaTime::new(1, 1)));
        assert!(r.contains(MediaTime::new(29, 10)));
        assert!(!r.contains(MediaTime::new(3, 1)));
    }

    #[test]
    fn pixel_buffer_rejects_wrong_length() {
        assert!(PixelBuffer::new(Size::new(2, 2), PixelFormat::Bgra8, false, vec![0; 15]).is_err());
        assert!(PixelBuffer::new(Size::new(2, 2), PixelFormat::Bgra8, false, vec![0; 16]).is_ok());
    }

    #[test]
    fn converted_swizzles_rgba_to_bgra() {
        let rgba = PixelBuffer::new(Size::new(1, 1), PixelFormat::Rgba8, false, vec![10, 20, 30, 40])
            .unwrap();
        let bgra = rgba.converted(PixelFormat::Bgra8);
        assert_eq!(bgra.data, vec![30, 20, 10, 40]);
        assert_eq!(bgra.rgba_at(0, 0), Some([10, 20, 30, 40]));
        assert_eq!(bgra.converted(PixelFormat::Rgba8), rgba);
    }
}
