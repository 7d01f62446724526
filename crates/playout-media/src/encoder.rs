//! Broadcast encoder.
//!
//! Renders a [`RenderSource`] into an H.264/AAC MP4 with a fixed frame size
//! and rate, verifies it with ffprobe and uploads it to media storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use playout_models::{ConferenceId, ContentItemId, RenderJobId, RenderSource};
use playout_storage::MediaStore;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{self, Frame, SILENT_AUDIO};
use crate::probe::probe_video;

/// Metric name constants.
pub mod names {
    /// Render wall time in seconds by source kind.
    pub const RENDER_SECONDS: &str = "playout_media_render_seconds";

    /// Renders by source kind and outcome.
    pub const RENDERS_TOTAL: &str = "playout_media_renders_total";
}

/// What to render, and for whom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub job_id: RenderJobId,
    pub conference_id: ConferenceId,
    pub content_item_id: ContentItemId,
    pub source: RenderSource,
}

/// Reference to produced media plus metadata recorded on the render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOutput {
    pub s3_url: String,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// External encoder contract.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> MediaResult<RenderOutput>;
}

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u8,
    pub preset: String,
    pub audio_bitrate: String,
    /// Per-FFmpeg-invocation limit
    pub timeout: Duration,
    /// Scratch space; each render gets its own temporary directory here
    pub work_dir: PathBuf,
    /// Storage key prefix for rendered files
    pub key_prefix: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            crf: 20,
            preset: "veryfast".to_string(),
            audio_bitrate: "160k".to_string(),
            timeout: Duration::from_secs(3600),
            work_dir: std::env::temp_dir(),
            key_prefix: "broadcast".to_string(),
        }
    }
}

impl EncoderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            width: env_parse("ENCODER_WIDTH").unwrap_or(defaults.width),
            height: env_parse("ENCODER_HEIGHT").unwrap_or(defaults.height),
            fps: env_parse("ENCODER_FPS").unwrap_or(defaults.fps),
            crf: env_parse("ENCODER_CRF").unwrap_or(defaults.crf),
            preset: std::env::var("ENCODER_PRESET").unwrap_or(defaults.preset),
            audio_bitrate: std::env::var("ENCODER_AUDIO_BITRATE").unwrap_or(defaults.audio_bitrate),
            timeout: env_parse("ENCODER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            work_dir: std::env::var("ENCODER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            key_prefix: std::env::var("ENCODER_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }

    fn frame(&self) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// FFmpeg-backed [`Encoder`].
pub struct FfmpegEncoder {
    config: EncoderConfig,
    storage: Arc<dyn MediaStore>,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig, storage: Arc<dyn MediaStore>) -> Self {
        Self { config, storage }
    }

    /// Storage key for the rendered file of `request`.
    pub fn output_key(&self, request: &RenderRequest) -> String {
        format!(
            "{}/{}/{}/{}.mp4",
            self.config.key_prefix.trim_end_matches('/'),
            request.conference_id,
            request.content_item_id,
            request.job_id
        )
    }

    /// Build the FFmpeg invocation for `source`, fetching it into `work_dir`
    /// first when it lives in our storage.
    pub async fn build_command(&self, source: &RenderSource, work_dir: &Path, output: &Path) -> MediaResult<FfmpegCommand> {
        let frame = self.config.frame();
        let command = match source {
            RenderSource::Transcode { source_url } => {
                let input = self.resolve_input(source_url, work_dir).await?;
                let info = probe_video(&input).await?;
                let mut command = FfmpegCommand::new(output)
                    .input(input.to_string_lossy())
                    .video_filter(filters::fit_to_frame(frame))
                    .map("0:v:0");
                if info.has_audio {
                    command = command.map("0:a:0");
                } else {
                    command = command.lavfi(SILENT_AUDIO).map("1:a:0").shortest();
                }
                command
            }
            RenderSource::TitleCard {
                title,
                subtitle,
                template,
            } => {
                let seconds = template.title_duration_seconds.max(1);
                FfmpegCommand::new(output)
                    .lavfi(filters::color_source(template, frame, seconds))
                    .lavfi(SILENT_AUDIO)
                    .video_filter(filters::title_card(template, title, subtitle.as_deref()))
                    .duration(f64::from(seconds))
            }
            RenderSource::Countdown { seconds, template } => {
                let seconds = (*seconds).max(1);
                FfmpegCommand::new(output)
                    .lavfi(filters::color_source(template, frame, seconds))
                    .lavfi(SILENT_AUDIO)
                    .video_filter(filters::countdown(template, seconds))
                    .duration(f64::from(seconds))
            }
        };

        let rate = self.config.fps.to_string();
        let gop = (self.config.fps * 2).to_string();
        Ok(command
            .video_codec("libx264")
            .preset(self.config.preset.clone())
            .crf(self.config.crf)
            .output_args(["-r", rate.as_str(), "-g", gop.as_str()])
            .audio_codec("aac")
            .audio_bitrate(self.config.audio_bitrate.clone())
            .output_args(["-ar", "48000", "-ac", "2"])
            .faststart())
    }

    /// Local path (downloaded) or remote URL FFmpeg can read directly.
    async fn resolve_input(&self, source_url: &str, work_dir: &Path) -> MediaResult<PathBuf> {
        if self.storage.owns_url(source_url) {
            let local = work_dir.join("source");
            self.storage.download_file(source_url, &local).await?;
            return Ok(local);
        }
        if source_url.starts_with("https://") || source_url.starts_with("http://") {
            return Ok(PathBuf::from(source_url));
        }
        Err(MediaError::unsupported_source(format!(
            "{source_url} is neither in media storage nor an http(s) url"
        )))
    }
}

fn source_kind(source: &RenderSource) -> &'static str {
    match source {
        RenderSource::Transcode { .. } => "transcode",
        RenderSource::TitleCard { .. } => "title_card",
        RenderSource::Countdown { .. } => "countdown",
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn render(&self, request: &RenderRequest) -> MediaResult<RenderOutput> {
        let started = Instant::now();
        let kind = source_kind(&request.source);

        let result = async {
            tokio::fs::create_dir_all(&self.config.work_dir).await?;
            let scratch = tempfile::Builder::new()
                .prefix("render-")
                .tempdir_in(&self.config.work_dir)?;
            let output = scratch.path().join("output.mp4");

            let command = self.build_command(&request.source, scratch.path(), &output).await?;
            let job_id = request.job_id.clone();
            FfmpegRunner::new()
                .with_timeout(self.config.timeout)
                .run_with_progress(&command, move |progress| {
                    debug!(render_job_id = %job_id, out_time_ms = progress.out_time_ms, speed = progress.speed, "Encoding");
                })
                .await?;

            let info = probe_video(&output).await?;
            if info.duration <= 0.0 {
                return Err(MediaError::InvalidVideo("rendered output has no duration".to_string()));
            }

            let key = self.output_key(request);
            let s3_url = self.storage.upload_file(&output, &key, "video/mp4").await?;
            info!(
                render_job_id = %request.job_id,
                kind,
                duration = info.duration,
                url = s3_url.as_str(),
                "Rendered broadcast media"
            );

            Ok(RenderOutput {
                s3_url,
                duration_seconds: info.duration,
                width: info.width,
                height: info.height,
                size_bytes: info.size,
            })
        }
        .await;

        histogram!(names::RENDER_SECONDS, "kind" => kind).record(started.elapsed().as_secs_f64());
        counter!(
            names::RENDERS_TOTAL,
            "kind" => kind,
            "outcome" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }
}
