/// Structured parsing of probe-tool output into `VideoMetadata` (spec.md
/// §4.3, §9). Uses `serde_json` against the probe tool's JSON output rather
/// than line-oriented substring matching — the fix the spec's Open
/// Questions section mandates over the reference's ad-hoc parser.
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::VideoMetadata;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<i32>,
    #[serde(default)]
    height: Option<i32>,
}

/// Parse the probe tool's `-print_format json -show_format -show_streams`
/// output. Duration must be present and parse as a positive number or the
/// whole probe fails; other fields fall back to reasonable defaults, per
/// spec.md §3 ("other fields may be set to reasonable defaults if
/// unavailable").
pub fn parse_probe_json(raw: &str) -> Result<VideoMetadata> {
    let parsed: ProbeOutput = serde_json::from_str(raw)
        .map_err(|e| AppError::Internal(format!("failed to parse probe output: {e}")))?;

    let duration_seconds: f64 = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| AppError::Internal("probe output did not contain a duration".to_string()))?;

    let bitrate_kbps = parsed
        .format
        .as_ref()
        .and_then(|f| f.bit_rate.as_ref())
        .and_then(|b| b.parse::<i64>().ok())
        .map(|bps| (bps / 1000) as i32)
        .unwrap_or(0);

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoMetadata {
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        duration_seconds,
        bitrate_kbps,
        video_codec: video_stream
            .and_then(|s| s.codec_name.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        audio_codec: audio_stream
            .and_then(|s| s.codec_name.clone())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}
