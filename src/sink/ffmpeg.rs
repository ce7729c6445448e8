use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::Context as _;

use crate::config::ExportConfig;
use crate::foundation::core::{MediaTime, PixelBuffer};
use crate::foundation::error::{MuxError, MuxResult};
use crate::foundation::math::unpremultiply_u8;
use crate::sink::pump::FramePump;
use crate::sink::{
    ReadyNotifier, Sink, SinkStatus, VideoInputSettings, is_tool_available, new_session_id,
    sidecar_path,
};

struct SpoolItem {
    path: PathBuf,
    buffer: PixelBuffer,
}

/// Alpha-preserving writer built on the system `ffmpeg` binary.
///
/// Appended buffers are spooled as PNG sidecars by a background worker. `finish_writing` lists
/// them in an ffconcat sidecar with exact per-frame durations and encodes the output in one
/// `ffmpeg` run.
pub struct FfmpegSink {
    output: PathBuf,
    cfg: ExportConfig,
    session_id: String,
    settings: Option<VideoInputSettings>,
    pump: Option<FramePump<SpoolItem>>,
    notifier: Option<ReadyNotifier>,
    frames: Vec<(PathBuf, MediaTime)>,
    session_start: MediaTime,
    session_end: Option<MediaTime>,
    input_finished: bool,
    status: SinkStatus,
    error: Option<MuxError>,
}

impl FfmpegSink {
    #[tracing::instrument(skip(cfg))]
    pub fn open(output: &Path, cfg: &ExportConfig) -> MuxResult<Self> {
        cfg.validate()?;
        if !is_tool_available(&cfg.ffmpeg_path) {
            return Err(MuxError::construction(format!(
                "'{}' is required for encoding, but could not be run",
                cfg.ffmpeg_path.display()
            )));
        }
        Ok(Self::new(output, cfg))
    }

    fn new(output: &Path, cfg: &ExportConfig) -> Self {
        Self {
            output: output.to_path_buf(),
            cfg: cfg.clone(),
            session_id: new_session_id(),
            settings: None,
            pump: None,
            notifier: None,
            frames: Vec::new(),
            session_start: MediaTime::ZERO,
            session_end: None,
            input_finished: false,
            status: SinkStatus::Unknown,
            error: None,
        }
    }

    fn frame_path(&self, index: usize) -> PathBuf {
        sidecar_path(&self.output, &self.session_id, &format!("-{index:06}.png"))
    }

    fn concat_path(&self) -> PathBuf {
        sidecar_path(&self.output, &self.session_id, ".ffconcat")
    }

    fn fail(&mut self, err: MuxError) {
        tracing::warn!(output = %self.output.display(), error = %err, "ffmpeg sink failed");
        self.status = SinkStatus::Failed;
        self.error = Some(err);
        self.remove_sidecars();
    }

    fn remove_sidecars(&mut self) {
        let mut paths: Vec<PathBuf> = self.frames.drain(..).map(|(p, _)| p).collect();
        paths.push(self.concat_path());
        for path in paths {
            if let Err(err) = std::fs::remove_file(&path)
                && err.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove sidecar");
            }
        }
    }

    /// One `file`/`duration` pair per frame; the last file is repeated so its duration holds.
    fn write_concat_list(&self) -> MuxResult<PathBuf> {
        let mut list = String::from("ffconcat version 1.0\n");
        for (i, (path, pts)) in self.frames.iter().enumerate() {
            let next = match self.frames.get(i + 1) {
                Some((_, next_pts)) => *next_pts,
                None => self.last_frame_end(*pts),
            };
            list.push_str(&format!("file '{}'\n", concat_escape(path)));
            list.push_str(&format!("duration {:.6}\n", next.sub(*pts).as_secs_f64()));
        }
        if let Some((path, _)) = self.frames.last() {
            list.push_str(&format!("file '{}'\n", concat_escape(path)));
        }

        let concat = self.concat_path();
        std::fs::write(&concat, list)
            .with_context(|| format!("write concat list '{}'", concat.display()))?;
        Ok(concat)
    }

    fn last_frame_end(&self, pts: MediaTime) -> MediaTime {
        if let Some(end) = self.session_end
            && end > pts
        {
            return end;
        }
        let n = self.frames.len();
        if n >= 2 {
            let step = self.frames[n - 1].1.sub(self.frames[n - 2].1);
            if step > MediaTime::ZERO {
                return pts.add(step);
            }
        }
        // no declared end and no previous step: assume 30 fps
        pts.add(MediaTime::new(1, 30))
    }

    /// The concat list repeats the last file so its duration holds; `-frames:v` keeps that
    /// repeat out of the output.
    fn encode_command(&self, concat: &Path) -> MuxResult<Command> {
        let settings = self
            .settings
            .ok_or_else(|| MuxError::sink("no video input declared"))?;
        let mut cmd = Command::new(&self.cfg.ffmpeg_path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .args(["-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"])
            .arg(concat)
            .args(["-an", "-fps_mode", "vfr"])
            .args(["-frames:v".to_string(), self.frames.len().to_string()]);
        if !self.session_start.is_zero() {
            cmd.args([
                "-output_ts_offset".to_string(),
                format!("{:.6}", self.session_start.as_secs_f64()),
            ]);
        }
        cmd.args(settings.codec.ffmpeg_args(settings.quality))
            .arg(&self.output);
        Ok(cmd)
    }

    fn encode(&self, concat: &Path) -> MuxResult<()> {
        let output = self.encode_command(concat)?.output().map_err(|e| {
            MuxError::sink(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MuxError::sink(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Sink for FfmpegSink {
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
        Ok(())
    }

    fn start_writing(&mut self) -> MuxResult<()> {
        if self.settings.is_none() {
            return Err(MuxError::construction("start_writing before add_video_input"));
        }
        let pump = FramePump::spawn("alphamux-ffmpeg-spool", self.cfg.queue_depth, |item: SpoolItem| {
            write_png(&item.path, &item.buffer)
        })?;
        if let Some(notifier) = &self.notifier {
            pump.set_notifier(Arc::clone(notifier));
        }
        self.pump = Some(pump);
        self.status = SinkStatus::Writing;
        tracing::debug!(output = %self.output.display(), session = %self.session_id, "ffmpeg sink writing");
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.session_start = at;
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
        if let Some((_, last)) = self.frames.last()
            && pts <= *last
        {
            return Err(MuxError::append_rejected(format!(
                "timestamp {pts} does not follow the previous frame at {last}"
            )));
        }

        let path = self.frame_path(self.frames.len());
        let pump = self
            .pump
            .as_ref()
            .ok_or_else(|| MuxError::append_rejected("sink is not started"))?;
        pump.submit(SpoolItem {
            path: path.clone(),
            buffer,
        })?;
        self.frames.push((path, pts));
        Ok(())
    }

    fn end_session(&mut self, at: MediaTime) {
        self.session_end = Some(at);
    }

    fn mark_as_finished(&mut self) {
        self.input_finished = true;
    }

    fn finish_writing(&mut self) {
        if self.status != SinkStatus::Writing {
            return;
        }
        let spooled = match self.pump.as_mut() {
            Some(pump) => pump.close(),
            None => Ok(()),
        };
        if let Err(err) = spooled {
            self.fail(err);
            return;
        }
        if self.frames.is_empty() {
            self.fail(MuxError::sink("no frames were appended"));
            return;
        }

        let encoded = self
            .write_concat_list()
            .and_then(|concat| self.encode(&concat));
        match encoded {
            Ok(()) => {
                self.status = SinkStatus::Completed;
                tracing::debug!(frames = self.frames.len(), output = %self.output.display(), "ffmpeg sink completed");
            }
            Err(err) => self.fail(err),
        }
    }

    fn cancel_writing(&mut self) {
        if matches!(
            self.status,
            SinkStatus::Completed | SinkStatus::Cancelled | SinkStatus::Failed
        ) {
            return;
        }
        if let Some(pump) = self.pump.as_mut() {
            let _ = pump.close();
        }
        self.remove_sidecars();
        self.status = SinkStatus::Cancelled;
    }

    fn status(&self) -> SinkStatus {
        self.status
    }

    fn take_error(&mut self) -> Option<MuxError> {
        self.error.take()
    }
}

/// Straight-alpha RGBA PNG of `buffer`.
fn write_png(path: &Path, buffer: &PixelBuffer) -> MuxResult<()> {
    let [r, g, b, a] = buffer.format.channel_offsets();
    let mut rgba = Vec::with_capacity(buffer.size.pixel_count() * 4);
    for px in buffer.data.chunks_exact(buffer.format.bytes_per_pixel()) {
        let alpha = px[a];
        let mut out = [px[r], px[g], px[b], alpha];
        if buffer.premultiplied {
            for c in out.iter_mut().take(3) {
                *c = unpremultiply_u8(*c, alpha);
            }
        }
        rgba.extend_from_slice(&out);
    }
    image::save_buffer_with_format(
        path,
        &rgba,
        buffer.size.width,
        buffer.size.height,
        image::ExtendedColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write frame '{}'", path.display()))?;
    Ok(())
}

/// ffconcat single-quoted path.
fn concat_escape(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoCodec;
    use crate::foundation::core::{PixelFormat, Size};

    fn started_sink(output: &Path, cfg: &ExportConfig, size: Size) -> FfmpegSink {
        let mut sink = FfmpegSink::new(output, cfg);
        sink.add_video_input(VideoInputSettings::new(size, VideoCodec::Qtrle, 0.5))
            .unwrap();
        sink.start_writing().unwrap();
        sink.start_session(MediaTime::ZERO);
        sink
    }

    fn sidecars_in(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".sb-"))
            .collect()
    }

    #[test]
    fn quotes_are_escaped_for_concat() {
        assert_eq!(concat_escape(Path::new("/a/it's.png")), r"/a/it'\''s.png");
    }

    #[test]
    fn png_spool_unpremultiplies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.png");
        // BGRA premultiplied: red at half alpha.
        let buffer = PixelBuffer::new(Size::new(1, 1), PixelFormat::Bgra8, true, vec![0, 0, 128, 128]).unwrap();
        write_png(&path, &buffer).unwrap();
        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0, 128]);
    }

    #[test]
    fn encode_stops_at_the_appended_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FfmpegSink::new(&dir.path().join("a.mov"), &ExportConfig::default());
        sink.settings = Some(VideoInputSettings::new(Size::new(2, 2), VideoCodec::Qtrle, 0.5));
        sink.frames = (0..3)
            .map(|i| (sink.frame_path(i), MediaTime::new(i as i64, 30)))
            .collect();

        let cmd = sink.encode_command(&sink.concat_path()).unwrap();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let at = args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(args[at + 1], "3");
        assert!(!args.iter().any(|a| a == "-output_ts_offset"));
    }

    #[test]
    fn repeated_timestamp_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let size = Size::new(1, 1);
        let mut sink = started_sink(&dir.path().join("r.mov"), &ExportConfig::default(), size);
        let frame = PixelBuffer::transparent(size, PixelFormat::Bgra8);
        sink.append(frame.clone(), MediaTime::new(1, 10)).unwrap();
        assert!(matches!(
            sink.append(frame, MediaTime::new(1, 10)),
            Err(MuxError::AppendRejected(_))
        ));
        sink.cancel_writing();
    }

    #[test]
    fn cancel_removes_spooled_frames() {
        let dir = tempfile::tempdir().unwrap();
        let size = Size::new(2, 2);
        let mut sink = started_sink(&dir.path().join("c.mov"), &ExportConfig::default(), size);
        for i in 0..3 {
            sink.append(PixelBuffer::transparent(size, PixelFormat::Bgra8), MediaTime::new(i, 30))
                .unwrap();
        }

        sink.cancel_writing();
        assert_eq!(sink.status(), SinkStatus::Cancelled);
        assert!(sidecars_in(dir.path()).is_empty());
        assert!(!dir.path().join("c.mov").exists());
    }

    #[test]
    fn failed_encode_removes_frames_and_concat_list() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExportConfig {
            ffmpeg_path: dir.path().join("no-such-ffmpeg"),
            ..ExportConfig::default()
        };
        let size = Size::new(2, 2);
        let mut sink = started_sink(&dir.path().join("f.mov"), &cfg, size);
        for i in 0..2 {
            sink.append(PixelBuffer::transparent(size, PixelFormat::Bgra8), MediaTime::new(i, 30))
                .unwrap();
        }
        sink.end_session(MediaTime::new(2, 30));
        sink.mark_as_finished();

        sink.finish_writing();
        assert_eq!(sink.status(), SinkStatus::Failed);
        assert!(matches!(sink.take_error(), Some(MuxError::SinkFailure(_))));
        assert!(sidecars_in(dir.path()).is_empty());
        assert!(!dir.path().join("f.mov").exists());
    }
}
