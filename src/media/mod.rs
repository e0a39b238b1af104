/// Media Driver (spec.md §4.3): probes a source file for metadata and
/// spawns a transcoding subprocess for one (source, target-format) pair,
/// reporting progress via a callback until the subprocess exits.
mod probe;
pub mod progress;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{TranscodeOptions, VideoFormat, VideoMetadata};

/// One progress notification from an in-flight encode (spec.md §4.3). A
/// failed encode reports `(-1, descriptive message)` through this same
/// channel in addition to returning an `Err` from `encode`.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub percent: i32,
    pub stage: String,
}

pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<ProgressEvent>;

/// Everything needed to invoke one per-format encode.
pub struct EncodeRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub format: &'a VideoFormat,
    pub options: &'a TranscodeOptions,
    pub stage_label: String,
    pub duration_seconds: f64,
}

/// Capability-set {probe, encode}, defined as an abstraction so tests can
/// inject a deterministic fake driver (spec.md §9 Design Notes).
#[async_trait]
pub trait MediaDriver: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<VideoMetadata>;

    async fn encode(
        &self,
        request: EncodeRequest<'_>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Build the encoder argument list per the argument-construction contract
/// of spec.md §4.3, in the exact order specified.
pub fn build_encode_args(
    input: &Path,
    output: &Path,
    format: &VideoFormat,
    options: &TranscodeOptions,
) -> Vec<String> {
    let mut args = vec![input.to_string_lossy().into_owned()];

    args.push("-c:v".to_string());
    args.push(format.video_codec.clone());

    args.push("-s".to_string());
    args.push(format!("{}x{}", format.width, format.height));

    if format.bitrate_kbps > 0 {
        args.push("-b:v".to_string());
        args.push(format!("{}k", format.bitrate_kbps));
    }

    if options.two_pass {
        args.push("-pass".to_string());
        args.push("1".to_string());
    }

    if let Some(crf) = options.crf {
        if crf > 0 {
            args.push("-crf".to_string());
            args.push(crf.to_string());
        }
    }

    if let Some(rate) = options.frame_rate {
        if rate > 0.0 {
            args.push("-r".to_string());
            args.push(rate.to_string());
        }
    }

    match &options.audio_codec {
        Some(codec) => {
            args.push("-c:a".to_string());
            args.push(codec.clone());
            if let Some(bitrate) = options.audio_bitrate_kbps {
                if bitrate > 0 {
                    args.push("-b:a".to_string());
                    args.push(format!("{bitrate}k"));
                }
            }
        }
        None => {
            args.push("-c:a".to_string());
            args.push("aac".to_string());
            args.push("-b:a".to_string());
            args.push("128k".to_string());
        }
    }

    args.push("-y".to_string());
    args.push(output.to_string_lossy().into_owned());

    args
}

/// A `MediaDriver` backed by real probe/encoder subprocesses.
pub struct ProcessMediaDriver {
    probe_bin: PathBuf,
    encoder_bin: PathBuf,
    probe_timeout: Duration,
}

impl ProcessMediaDriver {
    pub fn new(probe_bin: PathBuf, encoder_bin: PathBuf, probe_timeout: Duration) -> Self {
        Self {
            probe_bin,
            encoder_bin,
            probe_timeout,
        }
    }
}

#[async_trait]
impl MediaDriver for ProcessMediaDriver {
    async fn probe(&self, input: &Path) -> Result<VideoMetadata> {
        let mut cmd = Command::new(&self.probe_bin);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(input)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Internal(format!("failed to spawn probe tool: {e}")))?;

        let output = match tokio::time::timeout(self.probe_timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| AppError::Internal(format!("probe I/O error: {e}")))?,
            Err(_) => {
                return Err(AppError::Internal(format!(
                    "probe timed out after {:?}",
                    self.probe_timeout
                )));
            }
        };

        if !output.status.success() {
            return Err(AppError::Internal(format!(
                "probe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        probe::parse_probe_json(&String::from_utf8_lossy(&output.stdout))
    }

    async fn encode(
        &self,
        request: EncodeRequest<'_>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let args = build_encode_args(request.input, request.output, request.format, request.options);

        let mut child = Command::new(&self.encoder_bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                let msg = format!("failed to spawn encoder: {e}");
                let _ = progress.send(ProgressEvent {
                    percent: -1,
                    stage: msg.clone(),
                });
                AppError::Internal(msg)
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let duration = request.duration_seconds;
        let stage_label = request.stage_label.clone();
        let progress_for_reader = progress.clone();

        let reader_task = tokio::spawn(async move {
            let stdout_tx = progress_for_reader.clone();
            let stdout_stage = stage_label.clone();
            let stdout_loop = async move {
                if let Some(out) = stdout {
                    let mut reader = BufReader::new(out).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        if let Some(current) = progress::parse_time_position(&line) {
                            let percent = progress::percent_of(current, duration);
                            let _ = stdout_tx.send(ProgressEvent {
                                percent,
                                stage: stdout_stage.clone(),
                            });
                        }
                    }
                }
            };

            let stderr_tx = progress_for_reader;
            let stderr_stage = stage_label;
            let stderr_loop = async move {
                if let Some(err) = stderr {
                    let mut reader = BufReader::new(err).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        if let Some(current) = progress::parse_time_position(&line) {
                            let percent = progress::percent_of(current, duration);
                            let _ = stderr_tx.send(ProgressEvent {
                                percent,
                                stage: stderr_stage.clone(),
                            });
                        }
                    }
                }
            };

            tokio::join!(stdout_loop, stderr_loop);
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let status = child.wait().await;
                reader_task.abort();
                return match status {
                    Ok(_) => Err(AppError::Cancelled(format!("{} cancelled", request.stage_label))),
                    Err(e) => Err(AppError::Internal(format!("encoder kill error: {e}"))),
                };
            }
        };

        let _ = reader_task.await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                let msg = format!("encoder exited with {status}");
                let _ = progress.send(ProgressEvent {
                    percent: -1,
                    stage: msg.clone(),
                });
                Err(AppError::Internal(msg))
            }
            Err(e) => {
                let msg = format!("encoder I/O error: {e}");
                let _ = progress.send(ProgressEvent {
                    percent: -1,
                    stage: msg.clone(),
                });
                Err(AppError::Internal(msg))
            }
        }
    }
}

pub mod fake;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_order_matches_the_construction_contract() {
        let format = VideoFormat {
            name: "720p".to_string(),
            width: 1280,
            height: 720,
            video_codec: "libx264".to_string(),
            bitrate_kbps: 2500,
        };
        let options = TranscodeOptions {
            audio_codec: Some("aac".to_string()),
            audio_bitrate_kbps: Some(128),
            frame_rate: Some(30.0),
            two_pass: true,
            crf: Some(23),
        };
        let args = build_encode_args(
            Path::new("/in.mp4"),
            Path::new("/out.mp4"),
            &format,
            &options,
        );

        assert_eq!(
            args,
            vec![
                "/in.mp4",
                "-c:v",
                "libx264",
                "-s",
                "1280x720",
                "-b:v",
                "2500k",
                "-pass",
                "1",
                "-crf",
                "23",
                "-r",
                "30",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-y",
                "/out.mp4",
            ]
        );
    }

    #[test]
    fn absent_audio_options_default_to_aac_128k() {
        let format = VideoFormat {
            name: "360p".to_string(),
            width: 640,
            height: 360,
            video_codec: "libx264".to_string(),
            bitrate_kbps: 750,
        };
        let options = TranscodeOptions::default();
        let args = build_encode_args(
            Path::new("/in.mp4"),
            Path::new("/out.mp4"),
            &format,
            &options,
        );
        let audio_idx = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[audio_idx + 1], "aac");
        assert_eq!(args[audio_idx + 2], "-b:a");
        assert_eq!(args[audio_idx + 3], "128k");
    }

    #[test]
    fn zero_crf_and_bitrate_are_omitted() {
        let format = VideoFormat {
            name: "360p".to_string(),
            width: 640,
            height: 360,
            video_codec: "libx264".to_string(),
            bitrate_kbps: 0,
        };
        let options = TranscodeOptions {
            crf: Some(0),
            ..Default::default()
        };
        let args = build_encode_args(
            Path::new("/in.mp4"),
            Path::new("/out.mp4"),
            &format,
            &options,
        );
        assert!(!args.contains(&"-b:v".to_string()));
        assert!(!args.contains(&"-crf".to_string()));
    }
}
