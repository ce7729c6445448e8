use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::foundation::core::{MediaTime, PixelBuffer, PixelFormat, Size};
use crate::foundation::error::{MuxError, MuxResult};
use crate::sink::pump::FramePump;
use crate::sink::{ReadyNotifier, Sink, SinkStatus, VideoInputSettings, new_session_id, sidecar_path};

/// What an [`InMemorySink`] saw for one appended buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendedFrame {
    pub pts: MediaTime,
    pub size: Size,
    pub format: PixelFormat,
    /// First pixel as straight RGBA, enough to tell masked from passthrough frames.
    pub first_pixel: Option<[u8; 4]>,
}

/// Shared view of everything an [`InMemorySink`] recorded; cloneable so tests can keep one
/// after handing the sink to a session.
#[derive(Clone, Default)]
pub struct InMemoryRecord {
    inner: Arc<Mutex<RecordInner>>,
}

#[derive(Default)]
struct RecordInner {
    frames: Vec<AppendedFrame>,
    settings: Option<VideoInputSettings>,
    session_start: Option<MediaTime>,
    session_end: Option<MediaTime>,
    final_status: Option<SinkStatus>,
}

impl InMemoryRecord {
    pub fn frames(&self) -> Vec<AppendedFrame> {
        self.inner.lock().frames.clone()
    }

    pub fn timestamps(&self) -> Vec<MediaTime> {
        self.inner.lock().frames.iter().map(|f| f.pts).collect()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn settings(&self) -> Option<VideoInputSettings> {
        self.inner.lock().settings
    }

    pub fn session_start(&self) -> Option<MediaTime> {
        self.inner.lock().session_start
    }

    pub fn session_end(&self) -> Option<MediaTime> {
        self.inner.lock().session_end
    }

    pub fn final_status(&self) -> Option<SinkStatus> {
        self.inner.lock().final_status
    }
}

/// Holds the sink's worker before it processes each buffer, modelling a sink that is busy.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn held() -> Self {
        let gate = Self::default();
        gate.hold();
        gate
    }

    pub fn hold(&self) {
        *self.inner.0.lock() = true;
    }

    pub fn release(&self) {
        *self.inner.0.lock() = false;
        self.inner.1.notify_all();
    }

    fn wait_open(&self) {
        let (lock, cvar) = &*self.inner;
        let mut held = lock.lock();
        while *held {
            cvar.wait(&mut held);
        }
    }
}

/// In-memory sink for tests and debugging.
///
/// Buffers go through the same [`FramePump`] readiness as the ffmpeg sink. It writes a stub
/// output file and one sidecar so that completion cleanup is observable on disk.
pub struct InMemorySink {
    output: PathBuf,
    sidecar: PathBuf,
    depth: usize,
    reject_append_at: Option<usize>,
    fail_on_finish: bool,
    gate: Gate,
    record: InMemoryRecord,
    settings: Option<VideoInputSettings>,
    pump: Option<FramePump<AppendedFrame>>,
    notifier: Option<ReadyNotifier>,
    status: SinkStatus,
    error: Option<MuxError>,
    appended: usize,
    last_pts: Option<MediaTime>,
    input_finished: bool,
}

impl InMemorySink {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        let output = output.into();
        let sidecar = sidecar_path(&output, &new_session_id(), ".tmp");
        Self {
            output,
            sidecar,
            depth: 2,
            reject_append_at: None,
            fail_on_finish: false,
            gate: Gate::default(),
            record: InMemoryRecord::default(),
            settings: None,
            pump: None,
            notifier: None,
            status: SinkStatus::Unknown,
            error: None,
            appended: 0,
            last_pts: None,
            input_finished: false,
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    /// Refuse the append with this zero-based index.
    pub fn reject_append_at(mut self, index: usize) -> Self {
        self.reject_append_at = Some(index);
        self
    }

    /// Report `Failed` from `finish_writing`.
    pub fn fail_on_finish(mut self) -> Self {
        self.fail_on_finish = true;
        self
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    pub fn record(&self) -> InMemoryRecord {
        self.record.clone()
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }

    fn close_pump(&mut self) -> MuxResult<()> {
        match self.pump.as_mut() {
            Some(pump) => pump.close(),
            None => Ok(()),
        }
    }

    fn settle(&mut self, status: SinkStatus, error: Option<MuxError>) {
        self.status = status;
        if error.is_some() {
            self.error = error;
        }
        self.record.inner.lock().final_status = Some(status);
    }
}

impl Sink for InMemorySink {
    fn output_path(&self) -> &Path {
        &self.output
    }

    fn add_video_input(&mut self, settings: VideoInputSettings) -> MuxResult<()> {
        if self.status != SinkStatus::Unknown || self.settings.is_some() {
            return Err(MuxError::construction("video input already declared"));
        }
        if settings.size.is_empty() {
            return Err(MuxError::construction("video input has empty dimensions"));
        }
        self.settings = Some(settings);
        self.record.inner.lock().settings = Some(settings);
        Ok(())
    }

    fn start_writing(&mut self) -> MuxResult<()> {
        if self.settings.is_none() {
            return Err(MuxError::construction("start_writing before add_video_input"));
        }
        std::fs::File::create(&self.output)?;
        std::fs::File::create(&self.sidecar)?;

        let gate = self.gate.clone();
        let record = self.record.clone();
        let pump = FramePump::spawn("alphamux-memory-sink", self.depth, move |frame: AppendedFrame| {
            gate.wait_open();
            record.inner.lock().frames.push(frame);
            Ok(())
        })?;
        if let Some(notifier) = &self.notifier {
            pump.set_notifier(Arc::clone(notifier));
        }
        self.pump = Some(pump);
        self.status = SinkStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.record.inner.lock().session_start = Some(at);
    }

    fn is_ready_for_more_data(&self) -> bool {
        self.status == SinkStatus::Writing
            && !self.input_finished
            && self.pump.as_ref().is_some_and(|p| p.is_ready())
    }

    fn request_media_data_when_ready(&mut self, notifier: ReadyNotifier) {
        if let Some(pump) = &self.pump {
            pump.set_notifier(Arc::clone(&notifier));
        }
        self.notifier = Some(notifier);
    }

    fn append(&mut self, buffer: PixelBuffer, pts: MediaTime) -> MuxResult<()> {
        if self.status != SinkStatus::Writing || self.input_finished {
            return Err(MuxError::append_rejected("sink is not accepting data"));
        }
        let settings = self
            .settings
            .ok_or_else(|| MuxError::append_rejected("no video input declared"))?;
        settings.check(&buffer)?;
        if self.reject_append_at == Some(self.appended) {
            return Err(MuxError::append_rejected(format!(
                "append {} refused by configuration",
                self.appended
            )));
        }
        if let Some(last) = self.last_pts
            && pts <= last
        {
            return Err(MuxError::append_rejected(format!(
                "timestamp {pts} does not follow the previous frame at {last}"
            )));
        }
        let first_pixel = buffer
            .rgba_at(0, 0)
            .map(|px| straight(px, buffer.premultiplied));
        let pump = self
            .pump
            .as_ref()
            .ok_or_else(|| MuxError::append_rejected("sink is not started"))?;
        pump.submit(AppendedFrame {
            pts,
            size: buffer.size,
            format: buffer.format,
            first_pixel,
        })?;
        self.appended += 1;
        self.last_pts = Some(pts);
        Ok(())
    }

    fn end_session(&mut self, at: MediaTime) {
        self.record.inner.lock().session_end = Some(at);
    }

    fn mark_as_finished(&mut self) {
        self.input_finished = true;
    }

    fn finish_writing(&mut self) {
        if self.status != SinkStatus::Writing {
            return;
        }
        if let Err(err) = self.close_pump() {
            self.settle(SinkStatus::Failed, Some(err));
            return;
        }
        if self.fail_on_finish {
            self.settle(
                SinkStatus::Failed,
                Some(MuxError::sink("finalizing the output failed")),
            );
            return;
        }
        let written = std::fs::write(&self.output, format!("frames={}\n", self.appended));
        match written {
            Ok(()) => self.settle(SinkStatus::Completed, None),
            Err(err) => self.settle(SinkStatus::Failed, Some(err.into())),
        }
    }

    fn cancel_writing(&mut self) {
        if matches!(
            self.status,
            SinkStatus::Completed | SinkStatus::Cancelled | SinkStatus::Failed
        ) {
            return;
        }
        self.gate.release();
        let _ = self.close_pump();
        if let Err(err) = std::fs::remove_file(&self.sidecar)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.sidecar.display(), error = %err, "failed to remove sidecar");
        }
        self.settle(SinkStatus::Cancelled, None);
    }

    fn status(&self) -> SinkStatus {
        self.status
    }

    fn take_error(&mut self) -> Option<MuxError> {
        self.error.take()
    }
}

fn straight(px: [u8; 4], premultiplied: bool) -> [u8; 4] {
    if !premultiplied {
        return px;
    }
    let [r, g, b, a] = px;
    let un = |c: u8| crate::foundation::math::unpremultiply_u8(c, a);
    [un(r), un(g), un(b), a]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoCodec;

    fn settings(size: Size) -> VideoInputSettings {
        VideoInputSettings::new(size, VideoCodec::default(), 0.5)
    }

    #[test]
    fn records_appends_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a.mov");
        let mut sink = InMemorySink::new(&out);
        let record = sink.record();
        let size = Size::new(2, 1);
        sink.add_video_input(settings(size)).unwrap();
        sink.start_writing().unwrap();
        sink.start_session(MediaTime::ZERO);
        assert!(sink.sidecar_path().exists());

        for i in 0..3 {
            sink.append(PixelBuffer::transparent(size, PixelFormat::Bgra8), MediaTime::new(i, 10))
                .unwrap();
        }
        sink.mark_as_finished();
        assert!(!sink.is_ready_for_more_data());
        sink.finish_writing();

        assert_eq!(sink.status(), SinkStatus::Completed);
        assert_eq!(record.frame_count(), 3);
        assert_eq!(record.timestamps()[2], MediaTime::new(2, 10));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "frames=3\n");
    }

    #[test]
    fn scripted_rejection_and_finish_failure() {
        let dir = tempfile::tempdir().unwrap();
        let size = Size::new(1, 1);
        let mut sink = InMemorySink::new(dir.path().join("b.mov"))
            .reject_append_at(1)
            .fail_on_finish();
        sink.add_video_input(settings(size)).unwrap();
        sink.start_writing().unwrap();
        let frame = PixelBuffer::transparent(size, PixelFormat::Bgra8);
        sink.append(frame.clone(), MediaTime::ZERO).unwrap();
        assert!(matches!(
            sink.append(frame, MediaTime::new(1, 10)),
            Err(MuxError::AppendRejected(_))
        ));
        sink.finish_writing();
        assert_eq!(sink.status(), SinkStatus::Failed);
        assert!(matches!(sink.take_error(), Some(MuxError::SinkFailure(_))));
    }

    #[test]
    fn repeated_timestamp_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let size = Size::new(1, 1);
        let mut sink = InMemorySink::new(dir.path().join("d.mov"));
        let record = sink.record();
        sink.add_video_input(settings(size)).unwrap();
        sink.start_writing().unwrap();
        let frame = PixelBuffer::transparent(size, PixelFormat::Bgra8);
        sink.append(frame.clone(), MediaTime::new(1, 10)).unwrap();
        assert!(matches!(
            sink.append(frame.clone(), MediaTime::new(1, 10)),
            Err(MuxError::AppendRejected(_))
        ));
        assert!(matches!(
            sink.append(frame.clone(), MediaTime::ZERO),
            Err(MuxError::AppendRejected(_))
        ));
        sink.append(frame, MediaTime::new(2, 10)).unwrap();
        sink.mark_as_finished();
        sink.finish_writing();
        assert_eq!(record.timestamps(), vec![MediaTime::new(1, 10), MediaTime::new(2, 10)]);
    }

    #[test]
    fn cancel_releases_held_worker_and_removes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let size = Size::new(1, 1);
        let mut sink = InMemorySink::new(dir.path().join("c.mov"))
            .with_queue_depth(1)
            .with_gate(Gate::held());
        sink.add_video_input(settings(size)).unwrap();
        sink.start_writing().unwrap();
        sink.append(PixelBuffer::transparent(size, PixelFormat::Bgra8), MediaTime::ZERO)
            .unwrap();
        assert!(!sink.is_ready_for_more_data());

        sink.cancel_writing();
        assert_eq!(sink.status(), SinkStatus::Cancelled);
        assert!(!sink.sidecar_path().exists());
        assert!(sink.take_error().is_none());
    }
}
