/// Configuration management for the transcode service.
///
/// Loads configuration from environment variables with sensible defaults,
/// matching the reference codebase's `Config::from_env` style.
use std::path::PathBuf;

use crate::models::VideoFormat;

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub tools: ToolConfig,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub grpc_port: u16,
    /// Fixed worker pool size (§4.5).
    pub worker_pool_size: usize,
    /// Default format set applied when a transcode request omits `output_formats`.
    pub default_formats: Vec<String>,
    /// Default output container when a transcode request omits it.
    pub default_container: String,
    /// Maximum inbound gRPC message size, in bytes.
    pub max_inbound_message_size: usize,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ToolConfig {
    pub probe_bin: PathBuf,
    pub encoder_bin: PathBuf,
    pub probe_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                host: std::env::var("TRANSCODE_SERVICE_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                grpc_port: std::env::var("TRANSCODE_SERVICE_GRPC_PORT")
                    .unwrap_or_else(|_| "9090".to_string())
                    .parse()
                    .unwrap_or(9090),
                worker_pool_size: std::env::var("TRANSCODE_WORKER_POOL_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
                default_formats: std::env::var("TRANSCODE_DEFAULT_FORMATS")
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_else(|_| {
                        vec![
                            "1080p".to_string(),
                            "720p".to_string(),
                            "480p".to_string(),
                            "360p".to_string(),
                        ]
                    }),
                default_container: std::env::var("TRANSCODE_DEFAULT_CONTAINER")
                    .unwrap_or_else(|_| "mp4".to_string()),
                max_inbound_message_size: std::env::var("TRANSCODE_MAX_INBOUND_MESSAGE_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(16 * 1024 * 1024),
            },
            storage: StorageConfig {
                staging_dir: std::env::var("TRANSCODE_STAGING_DIR")
                    .unwrap_or_else(|_| "./data/staging".to_string())
                    .into(),
                output_dir: std::env::var("TRANSCODE_OUTPUT_DIR")
                    .unwrap_or_else(|_| "./data/output".to_string())
                    .into(),
            },
            tools: ToolConfig {
                probe_bin: std::env::var("TRANSCODE_PROBE_BIN")
                    .unwrap_or_else(|_| "ffprobe".to_string())
                    .into(),
                encoder_bin: std::env::var("TRANSCODE_ENCODER_BIN")
                    .unwrap_or_else(|_| "ffmpeg".to_string())
                    .into(),
                probe_timeout_secs: std::env::var("TRANSCODE_PROBE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            },
        })
    }

    /// Expand the default format name list into `VideoFormat` tuples (§4.3/§6).
    pub fn default_video_formats(&self) -> crate::error::Result<Vec<VideoFormat>> {
        self.app
            .default_formats
            .iter()
            .map(|name| VideoFormat::standard(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_any_env() {
        for key in [
            "TRANSCODE_SERVICE_HOST",
            "TRANSCODE_SERVICE_GRPC_PORT",
            "TRANSCODE_WORKER_POOL_SIZE",
            "TRANSCODE_DEFAULT_FORMATS",
        ] {
            std::env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.app.worker_pool_size, 5);
        assert_eq!(config.app.default_formats.len(), 4);
        assert_eq!(config.app.default_container, "mp4");
    }
}
