//! FFmpeg CLI wrapper and broadcast encoder.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with file, URL and lavfi inputs
//! - Progress parsing from `-progress pipe:2`
//! - Timeout and cancellation support via tokio
//! - FFprobe inspection of rendered output
//! - The [`Encoder`] contract and an FFmpeg implementation rendering
//!   transcodes, titles cards and countdowns into broadcast MP4

pub mod command;
pub mod encoder;
pub mod error;
pub mod filters;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{Encoder, EncoderConfig, FfmpegEncoder, RenderOutput, RenderRequest};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
