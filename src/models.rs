/// Core data model for the transcode service (spec.md §3).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// An immutable (name, width, height, codec, bitrate) tuple (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub video_codec: String,
    pub bitrate_kbps: i32,
}

impl VideoFormat {
    /// Expand one of the predefined standard format names; any other name is
    /// an error at standard-expansion time (spec.md §3).
    pub fn standard(name: &str) -> Result<Self> {
        let (width, height, bitrate_kbps) = match name {
            "1080p" => (1920, 1080, 5000),
            "720p" => (1280, 720, 2500),
            "480p" => (854, 480, 1000),
            "360p" => (640, 360, 750),
            other => {
                return Err(AppError::ValidationError(format!(
                    "unknown standard format: {other}"
                )))
            }
        };
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            video_codec: "libx264".to_string(),
            bitrate_kbps,
        })
    }
}

/// Optional per-job transcode knobs (spec.md §3). Absent fields default at
/// the point of use (§4.3): no audio codec override means `-c:a aac -b:a
/// 128k`, two_pass defaults false, crf/frame_rate default to "unset" (0).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscodeOptions {
    pub audio_codec: Option<String>,
    pub audio_bitrate_kbps: Option<i32>,
    pub frame_rate: Option<f64>,
    pub two_pass: bool,
    pub crf: Option<i32>,
}

/// Probed source metadata (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: i32,
    pub height: i32,
    pub duration_seconds: f64,
    pub bitrate_kbps: i32,
    pub video_codec: String,
    pub audio_codec: String,
}

/// A derived file produced by one successful per-format encode (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub format: String,
    pub location: std::path::PathBuf,
    pub size_bytes: u64,
    pub duration_seconds: f64,
    pub bitrate_kbps: i32,
}

/// The job lifecycle (spec.md §4.5 state machine). Terminal states are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A single transcode job (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub video_id: String,
    pub input_path: std::path::PathBuf,
    pub output_dir: std::path::PathBuf,
    pub formats: Vec<VideoFormat>,
    pub output_container: String,
    pub options: TranscodeOptions,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub metadata: Option<VideoMetadata>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: i32,
    pub current_stage: String,
    pub output_files: Vec<OutputFile>,
    pub estimated_time_remaining_seconds: i64,
}

impl Job {
    pub fn new(
        job_id: String,
        video_id: String,
        input_path: std::path::PathBuf,
        output_dir: std::path::PathBuf,
        formats: Vec<VideoFormat>,
        output_container: String,
        options: TranscodeOptions,
        metadata: VideoMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        // round(duration_minutes * formats * 0.5) * 60, per spec.md §4.5
        let duration_minutes = metadata.duration_seconds / 60.0;
        let estimated_time_remaining_seconds =
            (duration_minutes * formats.len() as f64 * 0.5).round() as i64 * 60;

        Self {
            job_id,
            video_id,
            input_path,
            output_dir,
            formats,
            output_container,
            options,
            status: JobStatus::Queued,
            error_message: None,
            metadata: Some(metadata),
            created_at: now,
            started_at: None,
            completed_at: None,
            progress: 0,
            current_stage: String::new(),
            output_files: Vec::new(),
            estimated_time_remaining_seconds,
        }
    }
}
