use std::path::Path;

use crate::config::ExportConfig;
use crate::foundation::core::{MediaTime, PixelBuffer, Size, TimeRange};
use crate::foundation::error::MuxResult;

/// One decoded video sample.
#[derive(Clone, Debug)]
pub struct Sample {
    pub pts: MediaTime,
    pub duration: MediaTime,
    pub buffer: PixelBuffer,
}

impl Sample {
    pub fn end(&self) -> MediaTime {
        self.pts.add(self.duration)
    }

    pub fn covers(&self, t: MediaTime) -> bool {
        self.pts <= t && t < self.end()
    }
}

/// Pull-style reader over the first video track of a container.
///
/// `copy_next_sample` returns samples in presentation order and `Ok(None)` once the track's
/// time range is exhausted.
pub trait TrackReader: Send {
    fn natural_size(&self) -> Size;
    fn time_range(&self) -> TimeRange;
    fn copy_next_sample(&mut self) -> MuxResult<Option<Sample>>;
    fn cancel(&mut self);
}

/// Stream facts gathered before decoding starts.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackInfo {
    pub size: Size,
    pub fps_num: u32,
    pub fps_den: u32,
    pub time_range: TimeRange,
}

impl TrackInfo {
    pub fn frame_duration(&self) -> MediaTime {
        MediaTime::new(i64::from(self.fps_den), self.fps_num)
    }

    pub fn pts_of(&self, index: u64) -> MediaTime {
        let offset = MediaTime::new(index as i64 * i64::from(self.fps_den), self.fps_num);
        self.time_range.start.add(offset)
    }
}

/// Open the first video track at `path` with the configured ffmpeg tools.
#[tracing::instrument(skip(cfg))]
pub fn open_video_track(path: &Path, cfg: &ExportConfig) -> MuxResult<Box<dyn TrackReader>> {
    #[cfg(feature = "media-ffmpeg")]
    {
        let info = ffmpeg::probe_track(path, &cfg.ffprobe_path)?;
        let reader = ffmpeg::FfmpegTrackReader::spawn(path, &cfg.ffmpeg_path, info)?;
        Ok(Box::new(reader))
    }
    #[cfg(not(feature = "media-ffmpeg"))]
    {
        let _ = cfg;
        Err(crate::MuxError::construction(format!(
            "reading video track '{}' requires the 'media-ffmpeg' feature",
            path.display()
        )))
    }
}

#[cfg(feature = "media-ffmpeg")]
mod ffmpeg {
    use std::io::Read;
    use std::path::Path;
    use std::process::{Child, ChildStdout, Command, Stdio};
    use std::thread::JoinHandle;

    use super::{Sample, TrackInfo, TrackReader};
    use crate::foundation::core::{MediaTime, PixelBuffer, PixelFormat, Size, TimeRange};
    use crate::foundation::error::{MuxError, MuxResult};

    pub(super) fn probe_track(source_path: &Path, ffprobe: &Path) -> MuxResult<TrackInfo> {
        #[derive(serde::Deserialize)]
        struct StreamInfo {
            codec_type: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
            r_frame_rate: Option<String>,
            start_time: Option<String>,
            duration: Option<String>,
            nb_frames: Option<String>,
        }
        #[derive(serde::Deserialize)]
        struct FormatInfo {
            duration: Option<String>,
        }
        #[derive(serde::Deserialize)]
        struct MediaInfo {
            streams: Vec<StreamInfo>,
            format: Option<FormatInfo>,
        }

        let out = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(source_path)
            .output()
            .map_err(|e| MuxError::construction(format!("failed to run ffprobe: {e}")))?;
        if !out.status.success() {
            return Err(MuxError::construction(format!(
                "ffprobe failed for '{}': {}",
                source_path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }

        let parsed: MediaInfo = serde_json::from_slice(&out.stdout)
            .map_err(|e| MuxError::construction(format!("ffprobe json parse failed: {e}")))?;
        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| {
                MuxError::construction(format!(
                    "no video track found in '{}'",
                    source_path.display()
                ))
            })?;
        let width = video
            .width
            .ok_or_else(|| MuxError::construction("missing video width from ffprobe"))?;
        let height = video
            .height
            .ok_or_else(|| MuxError::construction("missing video height from ffprobe"))?;
        let (fps_num, fps_den) = parse_ff_ratio(video.r_frame_rate.as_deref().unwrap_or("0/1"))
            .ok_or_else(|| MuxError::construction("invalid video r_frame_rate"))?;

        let start = video
            .start_time
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .map(MediaTime::from_secs_f64)
            .unwrap_or(MediaTime::ZERO);
        let frame_count = video.nb_frames.as_deref().and_then(|s| s.parse::<u64>().ok());
        let duration = match frame_count {
            Some(n) if n > 0 => MediaTime::new(n as i64 * i64::from(fps_den), fps_num),
            _ => video
                .duration
                .as_deref()
                .or(parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|s| s.parse::<f64>().ok())
                .map(MediaTime::from_secs_f64)
                .unwrap_or(MediaTime::ZERO),
        };

        Ok(TrackInfo {
            size: Size::new(width, height),
            fps_num,
            fps_den,
            time_range: TimeRange::new(start, duration),
        })
    }

    fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
        let mut parts = s.split('/');
        let a = parts.next()?.parse::<u32>().ok()?;
        let b = parts.next()?.parse::<u32>().ok()?;
        if a == 0 || b == 0 {
            return None;
        }
        Some((a, b))
    }

    /// Decodes BGRA frames from a streaming `ffmpeg` child, one exact frame per read.
    pub(super) struct FfmpegTrackReader {
        info: TrackInfo,
        child: Option<Child>,
        stdout: Option<ChildStdout>,
        stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
        next_index: u64,
    }

    impl FfmpegTrackReader {
        pub(super) fn spawn(path: &Path, ffmpeg: &Path, info: TrackInfo) -> MuxResult<Self> {
            let mut child = Command::new(ffmpeg)
                .args(["-v", "error", "-i"])
                .arg(path)
                .args([
                    "-map",
                    "0:v:0",
                    "-an",
                    "-fps_mode",
                    "passthrough",
                    "-f",
                    "rawvideo",
                    "-pix_fmt",
                    "bgra",
                    "pipe:1",
                ])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| {
                    MuxError::construction(format!(
                        "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
                    ))
                })?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| MuxError::construction("failed to open ffmpeg stdout"))?;
            let stderr_drain = child.stderr.take().map(|mut stderr| {
                std::thread::spawn(move || {
                    let mut buf = Vec::new();
                    stderr.read_to_end(&mut buf)?;
                    Ok(buf)
                })
            });

            Ok(Self {
                info,
                child: Some(child),
                stdout: Some(stdout),
                stderr_drain,
                next_index: 0,
            })
        }

        fn frame_len(&self) -> usize {
            self.info.size.pixel_count() * PixelFormat::Bgra8.bytes_per_pixel()
        }

        fn read_frame(&mut self) -> MuxResult<Option<Vec<u8>>> {
            let len = self.frame_len();
            let Some(stdout) = self.stdout.as_mut() else {
                return Ok(None);
            };
            let mut buf = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                let n = stdout.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                self.finish_child()?;
                return Ok(None);
            }
            if filled < len {
                return Err(MuxError::Other(anyhow::anyhow!(
                    "ffmpeg produced a truncated frame ({filled} of {len} bytes)"
                )));
            }
            Ok(Some(buf))
        }

        fn finish_child(&mut self) -> MuxResult<()> {
            self.stdout = None;
            let Some(mut child) = self.child.take() else {
                return Ok(());
            };
            let status = child.wait()?;
            let stderr = match self.stderr_drain.take() {
                Some(handle) => handle
                    .join()
                    .map_err(|_| MuxError::Other(anyhow::anyhow!("ffmpeg stderr drain panicked")))??,
                None => Vec::new(),
            };
            if !status.success() {
                return Err(MuxError::Other(anyhow::anyhow!(
                    "ffmpeg decode exited with status {status}: {}",
                    String::from_utf8_lossy(&stderr).trim()
                )));
            }
            Ok(())
        }
    }

    impl TrackReader for FfmpegTrackReader {
        fn natural_size(&self) -> Size {
            self.info.size
        }

        fn time_range(&self) -> TimeRange {
            self.info.time_range
        }

        fn copy_next_sample(&mut self) -> MuxResult<Option<Sample>> {
            let Some(data) = self.read_frame()? else {
                return Ok(None);
            };
            let pts = self.info.pts_of(self.next_index);
            self.next_index += 1;
            let buffer = PixelBuffer::new(self.info.size, PixelFormat::Bgra8, false, data)?;
            Ok(Some(Sample {
                pts,
                duration: self.info.frame_duration(),
                buffer,
            }))
        }

        fn cancel(&mut self) {
            self.stdout = None;
            if let Some(mut child) = self.child.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
            self.stderr_drain = None;
        }
    }

    impl Drop for FfmpegTrackReader {
        fn drop(&mut self) {
            self.cancel();
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pts_follow_the_frame_grid_from_range_start() {
        let info = TrackInfo {
            size: Size::new(2, 2),
            fps_num: 30000,
            fps_den: 1001,
            time_range: TimeRange::new(MediaTime::new(1, 2), MediaTime::new(10, 1)),
        };
        assert_eq!(info.pts_of(0), MediaTime::new(1, 2));
        assert_eq!(info.pts_of(30), MediaTime::new(1, 2).add(MediaTime::new(30 * 1001, 30000)));
        assert_eq!(info.frame_duration(), MediaTime::new(1001, 30000));
    }

    #[test]
    fn sample_coverage_is_half_open() {
        let s = Sample {
            pts: MediaTime::new(1, 10),
            duration: MediaTime::new(1, 10),
            buffer: PixelBuffer::transparent(Size::new(1, 1), crate::PixelFormat::Bgra8),
        };
        assert!(s.covers(MediaTime::new(1, 10)));
        assert!(!s.covers(MediaTime::new(2, 10)));
        assert_eq!(s.end(), MediaTime::new(1, 5));
    }
}
