//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress snapshot from FFmpeg's `-progress` key/value output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fold one `key=value` line into the snapshot. Returns a copy at the end
    /// of each block (`progress=continue|end`).
    pub fn apply_line(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            // Despite the name, FFmpeg reports microseconds here too.
            "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.frame = frame;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.speed = speed;
                }
            }
            "progress" => {
                self.is_complete = value == "end";
                return Some(self.clone());
            }
            _ => {}
        }
        None
    }

    /// Progress percentage given the expected output duration.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_parsing() {
        let mut progress = FfmpegProgress::default();
        assert!(progress.apply_line("frame=120").is_none());
        assert!(progress.apply_line("out_time_us=4000000").is_none());
        assert!(progress.apply_line("speed=2.5x").is_none());
        assert!(progress.apply_line("garbage").is_none());

        let snapshot = progress.apply_line("progress=continue").unwrap();
        assert_eq!(snapshot.frame, 120);
        assert_eq!(snapshot.out_time_ms, 4000);
        assert!((snapshot.speed - 2.5).abs() < 0.01);
        assert!(!snapshot.is_complete);

        progress.apply_line("speed=N/A");
        assert!((progress.speed - 2.5).abs() < 0.01);
        assert!(progress.apply_line("progress=end").unwrap().is_complete);
    }

    #[test]
    fn test_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };
        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(2000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
    }
}
