//! alphamux turns a color video plus a luminance mask video, or an animated PNG, into a single
//! alpha-carrying video.
//!
//! The public API is session-oriented:
//!
//! - Open a [`FrameSource`] (a [`TrackPairSource`] or an [`AnimatedImageSource`])
//! - Create a [`SessionController`] around it and a [`Sink`]
//! - `start()` it and receive exactly one success or failure continuation
#![forbid(unsafe_code)]

mod foundation;

pub mod composite;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod queue;
pub mod session;
pub mod sink;
pub mod source;

pub use crate::foundation::core::{MediaTime, PixelBuffer, PixelFormat, Size, TimeRange};
pub use crate::foundation::error::{MuxError, MuxResult};

pub use crate::composite::{CompositionInstruction, TrackId, composite};
pub use crate::config::{ExportConfig, VideoCodec};
pub use crate::decode::apng::{AnimatedImageDecoder, ApngDecoder, DecodedFrame};
pub use crate::decode::track::{Sample, TrackReader, open_video_track};
pub use crate::dispatch::{BatchReport, MergeTask, SourceMaskPair, TaskOutcome};
pub use crate::session::{Completion, EncodeLoop, LoopState, SessionController, run_session};
pub use crate::sink::{
    FfmpegSink, InMemorySink, ReadyNotifier, Sink, SinkStatus, VideoInputSettings,
};
pub use crate::source::{
    AnimatedImageSource, Frame, FrameSource, FrameTiming, SourceSpec, TrackPairSource,
    open_source,
};
