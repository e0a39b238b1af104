/// A deterministic, scripted `MediaDriver` used in tests so the manager's
/// scheduling and job state-machine logic can be exercised without
/// spawning a real subprocess (spec.md §9 Design Notes).
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{EncodeRequest, MediaDriver, ProgressEvent, ProgressSender};
use crate::error::{AppError, Result};
use crate::models::VideoMetadata;

#[derive(Debug, Clone)]
pub enum ScriptedEncode {
    /// Emit the given (percent, stage) events, in order, then succeed.
    Succeed(Vec<(i32, &'static str)>),
    /// Emit the given events, then fail with this message.
    Fail(Vec<(i32, &'static str)>, String),
    /// Never returns until cancelled — used to exercise cancellation.
    HangUntilCancelled,
}

pub struct FakeMediaDriver {
    pub metadata: VideoMetadata,
    /// Per-format-name script; formats absent from the map default to an
    /// immediate, eventless success.
    pub scripts: Mutex<HashMap<String, ScriptedEncode>>,
}

impl FakeMediaDriver {
    pub fn new(metadata: VideoMetadata) -> Self {
        Self {
            metadata,
            scripts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_script(self, format_name: &str, script: ScriptedEncode) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(format_name.to_string(), script);
        self
    }
}

#[async_trait]
impl MediaDriver for FakeMediaDriver {
    async fn probe(&self, _input: &Path) -> Result<VideoMetadata> {
        Ok(self.metadata.clone())
    }

    async fn encode(
        &self,
        request: EncodeRequest<'_>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.format.name)
            .cloned()
            .unwrap_or(ScriptedEncode::Succeed(Vec::new()));

        match script {
            ScriptedEncode::Succeed(events) => {
                for (percent, stage) in events {
                    let _ = progress.send(ProgressEvent {
                        percent,
                        stage: stage.to_string(),
                    });
                    tokio::task::yield_now().await;
                }
                tokio::fs::write(request.output, b"fake-encoded-output")
                    .await
                    .map_err(AppError::Io)?;
                Ok(())
            }
            ScriptedEncode::Fail(events, message) => {
                for (percent, stage) in events {
                    let _ = progress.send(ProgressEvent {
                        percent,
                        stage: stage.to_string(),
                    });
                    tokio::task::yield_now().await;
                }
                let _ = progress.send(ProgressEvent {
                    percent: -1,
                    stage: message.clone(),
                });
                Err(AppError::Internal(message))
            }
            ScriptedEncode::HangUntilCancelled => {
                cancel.cancelled().await;
                Err(AppError::Cancelled(format!(
                    "{} cancelled",
                    request.stage_label
                )))
            }
        }
    }
}
