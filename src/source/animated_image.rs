use crate::decode::apng::AnimatedImageDecoder;
use crate::foundation::core::{MediaTime, Size};
use crate::foundation::error::{MuxError, MuxResult};
use crate::source::{Frame, FrameSource, FrameTiming};

/// Walks an animated image frame by frame, forcing decode of each frame on demand.
pub struct AnimatedImageSource {
    decoder: Box<dyn AnimatedImageDecoder>,
    size: Size,
    current: usize,
    cancelled: bool,
}

impl AnimatedImageSource {
    /// Frame 0 is decoded eagerly; output dimensions come from it.
    pub fn new(mut decoder: Box<dyn AnimatedImageDecoder>) -> MuxResult<Self> {
        if decoder.frame_count() == 0 {
            return Err(MuxError::construction("animated image has no frames"));
        }
        if decoder.decoded_count() == 0 {
            decoder
                .decode_next()
                .map_err(|e| e.into_construction("decode first frame"))?;
        }
        let first = decoder
            .cached_frame(0)
            .ok_or_else(|| MuxError::construction("first animation frame is unavailable"))?;
        let size = first.buffer.size;
        if size.is_empty() {
            return Err(MuxError::construction("first animation frame is empty"));
        }
        if size != decoder.canvas_size() {
            return Err(MuxError::construction(format!(
                "first animation frame is {size} but the canvas is {}",
                decoder.canvas_size()
            )));
        }

        tracing::debug!(frames = decoder.frame_count(), %size, "animated image source ready");
        Ok(Self {
            decoder,
            size,
            current: 0,
            cancelled: false,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.decoder.frame_count()
    }
}

impl FrameSource for AnimatedImageSource {
    fn output_size(&self) -> Size {
        self.size
    }

    fn start_time(&self) -> MediaTime {
        MediaTime::ZERO
    }

    fn has_next(&self) -> bool {
        !self.cancelled && self.current < self.decoder.frame_count()
    }

    fn next_frame(&mut self) -> MuxResult<Option<Frame>> {
        if !self.has_next() {
            return Ok(None);
        }
        while self.decoder.decoded_count() <= self.current {
            let before = self.decoder.decoded_count();
            self.decoder.decode_next()?;
            if self.decoder.decoded_count() == before {
                return Err(MuxError::Other(anyhow::anyhow!(
                    "decoder made no progress at frame {}",
                    self.current
                )));
            }
        }
        let cached = self.decoder.cached_frame(self.current).ok_or_else(|| {
            MuxError::Other(anyhow::anyhow!("frame {} missing from cache", self.current))
        })?;
        let frame = Frame {
            buffer: cached.buffer.clone(),
            timing: FrameTiming::Duration(cached.duration),
        };
        self.current += 1;
        Ok(Some(frame))
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}
