//! Frame sources: lazy, ordered producers of `(buffer, timing)` pairs.
//!
//! The encode loop only sees [`FrameSource`]; it never branches on which kind of input it is
//! draining.

use std::path::PathBuf;

use crate::config::ExportConfig;
use crate::decode::apng::ApngDecoder;
use crate::decode::track::open_video_track;
use crate::foundation::core::{MediaTime, PixelBuffer, Size};
use crate::foundation::error::{MuxError, MuxResult};

pub mod animated_image;
pub mod track_pair;

pub use animated_image::AnimatedImageSource;
pub use track_pair::TrackPairSource;

/// How a frame is placed on the output timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameTiming {
    /// Shown for `duration`, starting where the previous frame ended.
    Duration(MediaTime),
    /// Shown at its own presentation timestamp.
    Timestamp { pts: MediaTime, duration: MediaTime },
}

/// A decoded raster plus its timing.
#[derive(Clone, Debug)]
pub struct Frame {
    pub buffer: PixelBuffer,
    pub timing: FrameTiming,
}

pub trait FrameSource: Send {
    /// Dimensions every produced frame has.
    fn output_size(&self) -> Size;

    /// Timestamp the sink's write session starts at.
    fn start_time(&self) -> MediaTime;

    /// `true` until the source is exhausted, failed, or cancelled.
    fn has_next(&self) -> bool;

    /// Produce the next frame, or `Ok(None)` at end of sequence.
    fn next_frame(&mut self) -> MuxResult<Option<Frame>>;

    /// Stop producing and release in-flight decode state. Idempotent.
    fn cancel(&mut self);
}

/// Already-resolved input locations for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    TrackPair { color: PathBuf, mask: PathBuf },
    AnimatedImage { path: PathBuf },
}

impl SourceSpec {
    pub fn describe(&self) -> String {
        match self {
            Self::TrackPair { color, mask } => {
                format!("{} + mask {}", color.display(), mask.display())
            }
            Self::AnimatedImage { path } => path.display().to_string(),
        }
    }
}

/// Open the decoder(s) behind `spec` and wrap them in the matching source.
pub fn open_source(spec: &SourceSpec, cfg: &ExportConfig) -> MuxResult<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::TrackPair { color, mask } => {
            let color = open_video_track(color, cfg).map_err(|e| e.into_construction("open color track"))?;
            let mask = open_video_track(mask, cfg).map_err(|e| e.into_construction("open mask track"))?;
            Ok(Box::new(TrackPairSource::new(color, mask)?))
        }
        SourceSpec::AnimatedImage { path } => {
            let decoder = ApngDecoder::open(path).map_err(|e| e.into_construction("open animated image"))?;
            Ok(Box::new(AnimatedImageSource::new(Box::new(decoder))?))
        }
    }
}

pub(crate) fn source_gone() -> MuxError {
    MuxError::Other(anyhow::anyhow!("frame source worker is gone"))
}
