//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Lines of FFmpeg diagnostics kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone, PartialEq)]
struct Input {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output: PathBuf,
    output_args: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command writing to `output`. Add inputs before running.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// Add a file or URL input.
    pub fn input(self, source: impl Into<String>) -> Self {
        self.input_with(Vec::<String>::new(), source)
    }

    /// Add an input preceded by its own options.
    pub fn input_with<I, S>(mut self, args: I, source: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Input {
            args: args.into_iter().map(Into::into).collect(),
            source: source.into(),
        });
        self
    }

    /// Add a libavfilter virtual input, e.g. `color=c=black:s=1280x720`.
    pub fn lavfi(self, graph: impl Into<String>) -> Self {
        self.input_with(["-f", "lavfi"], graph)
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Limit output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Select an input stream for the output, e.g. `0:v:0`.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Stop when the shortest input ends.
    pub fn shortest(self) -> Self {
        self.output_arg("-shortest")
    }

    /// Move the moov atom to the front so playback can start while downloading.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ];

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Runner for FFmpeg commands with progress tracking, timeout and cancellation.
#[derive(Default)]
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill FFmpeg when the watched value turns true.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("FFmpeg stderr was not captured", None, None))?;
        let mut reader = BufReader::new(stderr).lines();

        // Progress blocks and diagnostics share stderr.
        let stderr_task = tokio::spawn(async move {
            let mut current = FfmpegProgress::default();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = reader.next_line().await {
                if line.contains('=') && !line.contains(' ') {
                    if let Some(progress) = current.apply_line(&line) {
                        progress_callback(progress);
                    }
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        });

        let result = self.wait_for_completion(&mut child).await;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::ffmpeg_failed(
                format!("FFmpeg exited with status {}", status.code().unwrap_or(-1)),
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                status.code(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let timeout = self.timeout.unwrap_or(Duration::MAX);
        let mut cancel_rx = self.cancel_rx.clone();

        let cancelled = async {
            match cancel_rx.as_mut() {
                Some(rx) => {
                    while !*rx.borrow_and_update() {
                        if rx.changed().await.is_err() {
                            // Sender gone: cancellation can no longer happen.
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = tokio::time::timeout(timeout, child.wait()) => match status {
                Ok(status) => Ok(status?),
                Err(_) => {
                    let secs = timeout.as_secs();
                    warn!("FFmpeg timed out after {} seconds, killing process", secs);
                    let _ = child.kill().await;
                    Err(MediaError::Timeout(secs))
                }
            },
            _ = cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_keep_their_options() {
        let cmd = FfmpegCommand::new("out.mp4")
            .lavfi("color=c=black:s=1280x720:r=30")
            .input("https://media.example.com/in.mov")
            .video_codec("libx264")
            .crf(20)
            .faststart();

        let args = cmd.build_args();
        let lavfi = args.iter().position(|a| a == "lavfi").unwrap();
        assert_eq!(args[lavfi - 1], "-f");
        assert_eq!(args[lavfi + 1], "-i");
        assert_eq!(args[lavfi + 2], "color=c=black:s=1280x720:r=30");

        let second = args.iter().position(|a| a == "https://media.example.com/in.mov").unwrap();
        assert_eq!(args[second - 1], "-i");
        assert!(args.contains(&"+faststart".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_global_flags_come_first() {
        let args = FfmpegCommand::new("o.mp4").input("i.mp4").log_level("warning").build_args();
        assert_eq!(&args[..6], ["-y", "-nostdin", "-v", "warning", "-progress", "pipe:2"]);
    }

    #[test]
    fn test_duration_format() {
        let args = FfmpegCommand::new("o.mp4").input("i.mp4").duration(5.0).build_args();
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "5.000");
    }
}
