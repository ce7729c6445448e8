use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::Context as _;

use crate::foundation::core::{MediaTime, PixelBuffer, PixelFormat, Size};
use crate::foundation::error::{MuxError, MuxResult};

/// One fully composited animation frame and how long it is displayed.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub buffer: PixelBuffer,
    pub duration: MediaTime,
}

/// Frame-animated image decoder with a cache of already-decoded frames.
///
/// Frames are decoded strictly in order; `decode_next` decodes the frame at index
/// `decoded_count()` and caches it.
pub trait AnimatedImageDecoder: Send {
    fn frame_count(&self) -> usize;
    fn canvas_size(&self) -> Size;
    fn decoded_count(&self) -> usize;
    fn decode_next(&mut self) -> MuxResult<()>;
    fn cached_frame(&self, index: usize) -> Option<&DecodedFrame>;
}

/// APNG decoder backed by the `png` crate.
pub struct ApngDecoder<R: Read> {
    reader: png::Reader<R>,
    size: Size,
    frame_count: usize,
    /// Straight-alpha RGBA canvas the frames are composited onto.
    canvas: Vec<u8>,
    scratch: Vec<u8>,
    frames: Vec<DecodedFrame>,
}

impl ApngDecoder<BufReader<File>> {
    pub fn open(path: &Path) -> MuxResult<Self> {
        let file = File::open(path).with_context(|| format!("open image '{}'", path.display()))?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> ApngDecoder<R> {
    pub fn new(r: R) -> MuxResult<Self> {
        let mut decoder = png::Decoder::new(r);
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info().map_err(decode_err)?;

        let info = reader.info();
        let size = Size::new(info.width, info.height);
        let Some(actl) = info.animation_control else {
            return Err(MuxError::construction("image is not an animated PNG (no acTL chunk)"));
        };
        if actl.num_frames == 0 {
            return Err(MuxError::construction("animated PNG declares zero frames"));
        }
        // Without an fcTL before IDAT the default image is not part of the animation.
        let default_image_hidden = info.frame_control.is_none();

        let mut scratch = vec![0u8; reader.output_buffer_size()];
        if default_image_hidden {
            reader.next_frame(&mut scratch).map_err(decode_err)?;
        }

        Ok(Self {
            reader,
            size,
            frame_count: actl.num_frames as usize,
            canvas: vec![0u8; size.pixel_count() * 4],
            scratch,
            frames: Vec::new(),
        })
    }

    fn decode_frame(&mut self) -> MuxResult<DecodedFrame> {
        let out = self.reader.next_frame(&mut self.scratch).map_err(decode_err)?;
        let fctl = self
            .reader
            .info()
            .frame_control
            .ok_or_else(|| MuxError::Other(anyhow::anyhow!("animation frame without fcTL")))?;

        let region = Region {
            x: fctl.x_offset,
            y: fctl.y_offset,
            width: out.width,
            height: out.height,
        };
        if region.x + region.width > self.size.width || region.y + region.height > self.size.height {
            return Err(MuxError::Other(anyhow::anyhow!(
                "frame region {}x{}+{}+{} exceeds canvas {}",
                region.width,
                region.height,
                region.x,
                region.y,
                self.size
            )));
        }

        let rgba = expand_to_rgba(&self.scratch, out.color_type, out.line_size, out.width, out.height)?;
        let first = self.frames.is_empty();
        let dispose = match fctl.dispose_op {
            png::DisposeOp::Previous if first => png::DisposeOp::Background,
            op => op,
        };
        let saved = (dispose == png::DisposeOp::Previous).then(|| self.canvas.clone());

        match fctl.blend_op {
            png::BlendOp::Source => self.blit(&rgba, region, copy_px),
            png::BlendOp::Over => self.blit(&rgba, region, over_px),
        }

        let buffer = PixelBuffer::new(self.size, PixelFormat::Rgba8, false, self.canvas.clone())?;

        match dispose {
            png::DisposeOp::None => {}
            png::DisposeOp::Background => self.blit(&[], region, clear_px),
            png::DisposeOp::Previous => {
                if let Some(saved) = saved {
                    self.canvas = saved;
                }
            }
        }

        Ok(DecodedFrame {
            buffer,
            duration: frame_delay(fctl.delay_num, fctl.delay_den),
        })
    }

    fn blit(&mut self, src: &[u8], region: Region, op: fn(&mut [u8], &[u8])) {
        let canvas_w = self.size.width as usize;
        for row in 0..region.height as usize {
            for col in 0..region.width as usize {
                let d = ((region.y as usize + row) * canvas_w + region.x as usize + col) * 4;
                let s = (row * region.width as usize + col) * 4;
                let src_px = src.get(s..s + 4).unwrap_or(&CLEAR);
                op(&mut self.canvas[d..d + 4], src_px);
            }
        }
    }
}

impl<R: Read + Send> AnimatedImageDecoder for ApngDecoder<R> {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn canvas_size(&self) -> Size {
        self.size
    }

    fn decoded_count(&self) -> usize {
        self.frames.len()
    }

    fn decode_next(&mut self) -> MuxResult<()> {
        if self.frames.len() >= self.frame_count {
            return Ok(());
        }
        let frame = self.decode_frame()?;
        self.frames.push(frame);
        Ok(())
    }

    fn cached_frame(&self, index: usize) -> Option<&DecodedFrame> {
        self.frames.get(index)
    }
}

const CLEAR: [u8; 4] = [0; 4];

#[derive(Clone, Copy, Debug)]
struct Region {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// APNG delays are `num / den` seconds; a zero denominator means hundredths.
fn frame_delay(num: u16, den: u16) -> MediaTime {
    let den = if den == 0 { 100 } else { den };
    MediaTime::new(i64::from(num), u32::from(den))
}

fn decode_err(e: png::DecodingError) -> MuxError {
    MuxError::Other(anyhow::anyhow!("png decode failed: {e}"))
}

fn expand_to_rgba(
    data: &[u8],
    color_type: png::ColorType,
    line_size: usize,
    width: u32,
    height: u32,
) -> MuxResult<Vec<u8>> {
    let channels = match color_type {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::Indexed => {
            return Err(MuxError::Other(anyhow::anyhow!(
                "indexed PNG data was not expanded"
            )));
        }
    };
    let mut out = Vec::with_capacity(width as usize * height as usize * 4);
    for row in 0..height as usize {
        let line = data
            .get(row * line_size..row * line_size + width as usize * channels)
            .ok_or_else(|| MuxError::Other(anyhow::anyhow!("png row {row} out of bounds")))?;
        for px in line.chunks_exact(channels) {
            let rgba = match channels {
                1 => [px[0], px[0], px[0], 255],
                2 => [px[0], px[0], px[0], px[1]],
                3 => [px[0], px[1], px[2], 255],
                _ => [px[0], px[1], px[2], px[3]],
            };
            out.extend_from_slice(&rgba);
        }
    }
    Ok(out)
}

fn copy_px(dst: &mut [u8], src: &[u8]) {
    dst.copy_from_slice(src);
}

fn clear_px(dst: &mut [u8], _src: &[u8]) {
    dst.fill(0);
}

/// Straight-alpha source-over.
fn over_px(dst: &mut [u8], src: &[u8]) {
    let sa = u32::from(src[3]);
    if sa == 255 {
        dst.copy_from_slice(src);
        return;
    }
    if sa == 0 {
        return;
    }
    let da = u32::from(dst[3]);
    let da_w = da * (255 - sa); // scaled by 255
    let out_a = sa * 255 + da_w; // scaled by 255
    for c in 0..3 {
        let v = (u32::from(src[c]) * sa * 255 + u32::from(dst[c]) * da_w + out_a / 2) / out_a;
        dst[c] = v.min(255) as u8;
    }
    dst[3] = ((out_a + 127) / 255).min(255) as u8;
}
