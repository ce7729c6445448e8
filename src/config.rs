use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::error::{MuxError, MuxResult};

/// Alpha-capable output codecs offered by the ffmpeg sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    #[default]
    ProRes4444,
    Qtrle,
    HevcVideoToolbox,
    Vp9,
}

impl VideoCodec {
    /// Container extension matching the codec.
    pub fn extension(self) -> &'static str {
        match self {
            Self::ProRes4444 | Self::Qtrle | Self::HevcVideoToolbox => "mov",
            Self::Vp9 => "webm",
        }
    }

    /// ffmpeg output arguments for this codec at `quality` in `(0, 1]`.
    pub fn ffmpeg_args(self, quality: f32) -> Vec<String> {
        let q = quality.clamp(0.0, 1.0);
        let mut args: Vec<String> = match self {
            Self::ProRes4444 => {
                // prores_ks qscale: 0 best .. 32 worst
                let qscale = ((1.0 - q) * 32.0).round() as u32;
                vec![
                    "-c:v".into(),
                    "prores_ks".into(),
                    "-profile:v".into(),
                    "4444".into(),
                    "-pix_fmt".into(),
                    "yuva444p10le".into(),
                    "-q:v".into(),
                    qscale.to_string(),
                ]
            }
            Self::Qtrle => vec![
                "-c:v".into(),
                "qtrle".into(),
                "-pix_fmt".into(),
                "argb".into(),
            ],
            Self::HevcVideoToolbox => vec![
                "-c:v".into(),
                "hevc_videotoolbox".into(),
                "-allow_sw".into(),
                "1".into(),
                "-alpha_quality".into(),
                format!("{q:.2}"),
                "-q:v".into(),
                ((q * 100.0).round() as u32).max(1).to_string(),
                "-tag:v".into(),
                "hvc1".into(),
                "-pix_fmt".into(),
                "bgra".into(),
            ],
            Self::Vp9 => {
                // libvpx crf: 0 best .. 63 worst
                let crf = ((1.0 - q) * 63.0).round() as u32;
                vec![
                    "-c:v".into(),
                    "libvpx-vp9".into(),
                    "-pix_fmt".into(),
                    "yuva420p".into(),
                    "-b:v".into(),
                    "0".into(),
                    "-crf".into(),
                    crf.to_string(),
                ]
            }
        };
        if self.extension() == "mov" {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }
        args
    }
}

/// Export settings shared by every session of a run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub codec: VideoCodec,
    /// Encoder quality in `(0, 1]`.
    pub quality: f32,
    /// How many appended buffers the sink may hold before it reports "not ready".
    pub queue_depth: usize,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::default(),
            quality: 0.1,
            queue_depth: 4,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> MuxResult<()> {
        if !(self.quality > 0.0 && self.quality <= 1.0) {
            return Err(MuxError::validation(format!(
                "quality must be in (0, 1], got {}",
                self.quality
            )));
        }
        if self.queue_depth == 0 {
            return Err(MuxError::validation("queue_depth must be >= 1"));
        }
        if self.ffmpeg_path.as_os_str().is_empty() {
            return Err(MuxError::validation("ffmpeg_path must not be empty"));
        }
        if self.ffprobe_path.as_os_str().is_empty() {
            return Err(MuxError::validation("ffprobe_path must not be empty"));
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> MuxResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read export config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse export config '{}'", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_catches_bad_values() {
        assert!(ExportConfig::default().validate().is_ok());
        assert!(
            ExportConfig {
                quality: 0.0,
                ..ExportConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            ExportConfig {
                quality: 1.5,
                ..ExportConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            ExportConfig {
                queue_depth: 0,
                ..ExportConfig::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ExportConfig = serde_json::from_str(r#"{ "codec": "vp9" }"#).unwrap();
        assert_eq!(cfg.codec, VideoCodec::Vp9);
        assert_eq!(cfg.queue_depth, 4);
        assert_eq!(cfg.codec.extension(), "webm");
    }

    #[test]
    fn codec_args_name_the_encoder() {
        let args = VideoCodec::ProRes4444.ffmpeg_args(1.0);
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "prores_ks"));
        assert!(args.windows(2).any(|w| w[0] == "-q:v" && w[1] == "0"));
        assert!(args.contains(&"+faststart".to_string()));
        assert!(!VideoCodec::Vp9.ffmpeg_args(0.5).contains(&"+faststart".to_string()));
    }
}
