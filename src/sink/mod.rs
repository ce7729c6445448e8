//! Sinks: container/codec writers the encode loop appends frames to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::VideoCodec;
use crate::foundation::core::{MediaTime, PixelBuffer, PixelFormat, Size};
use crate::foundation::error::{MuxError, MuxResult};

pub mod ffmpeg;
pub mod memory;
pub mod pump;

pub use ffmpeg::FfmpegSink;
pub use memory::{AppendedFrame, Gate, InMemoryRecord, InMemorySink};
pub use pump::FramePump;

/// Callback a sink invokes whenever it transitions from not-ready to ready.
pub type ReadyNotifier = Arc<dyn Fn() + Send + Sync>;

/// Tag that marks transient files a sink writes next to its output.
pub const SIDECAR_TAG: &str = "sb";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

/// The single video input a session declares on its sink.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInputSettings {
    pub size: Size,
    pub pixel_format: PixelFormat,
    pub codec: VideoCodec,
    pub quality: f32,
}

impl VideoInputSettings {
    /// Settings with the canonical pixel format.
    pub fn new(size: Size, codec: VideoCodec, quality: f32) -> Self {
        Self {
            size,
            pixel_format: PixelFormat::Bgra8,
            codec,
            quality,
        }
    }

    pub(crate) fn check(&self, buffer: &PixelBuffer) -> MuxResult<()> {
        if buffer.size != self.size {
            return Err(MuxError::append_rejected(format!(
                "buffer is {} but the video input is {}",
                buffer.size, self.size
            )));
        }
        if buffer.format != self.pixel_format {
            return Err(MuxError::append_rejected(format!(
                "buffer format {:?} does not match input format {:?}",
                buffer.format, self.pixel_format
            )));
        }
        Ok(())
    }
}

/// Writer contract, modelled on a readiness-gated asset writer with one video input.
///
/// Lifecycle: `add_video_input` → `start_writing` → `start_session` → appends while
/// `is_ready_for_more_data` → `mark_as_finished` → `finish_writing`. `cancel_writing` may be
/// called at any point and leaves the status `Cancelled`.
pub trait Sink: Send {
    fn output_path(&self) -> &Path;

    fn add_video_input(&mut self, settings: VideoInputSettings) -> MuxResult<()>;

    fn start_writing(&mut self) -> MuxResult<()>;

    fn start_session(&mut self, at: MediaTime);

    fn is_ready_for_more_data(&self) -> bool;

    /// Register the callback that re-enters the producer once the sink has capacity again.
    fn request_media_data_when_ready(&mut self, notifier: ReadyNotifier);

    /// Append one buffer at `pts`. Refusals surface as [`MuxError::AppendRejected`].
    fn append(&mut self, buffer: PixelBuffer, pts: MediaTime) -> MuxResult<()>;

    /// Timestamp at which the last appended frame stops being shown.
    fn end_session(&mut self, _at: MediaTime) {}

    fn mark_as_finished(&mut self);

    /// Finalize the output; the final status is available once this returns.
    fn finish_writing(&mut self);

    fn cancel_writing(&mut self);

    fn status(&self) -> SinkStatus;

    /// Underlying error for a `Failed` status, if the sink has one.
    fn take_error(&mut self) -> Option<MuxError>;
}

/// `"<output file name>.sb-"`: every sidecar of every session of `output` starts with this.
pub fn sidecar_prefix(output: &Path) -> Option<String> {
    let name = output.file_name()?;
    Some(format!("{}.{SIDECAR_TAG}-", name.to_string_lossy()))
}

/// `<output>.sb-<session id><suffix>`, next to `output`.
pub fn sidecar_path(output: &Path, session_id: &str, suffix: &str) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{SIDECAR_TAG}-{session_id}{suffix}"));
    output.with_file_name(name)
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn is_tool_available(tool: &Path) -> bool {
    std::process::Command::new(tool)
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
