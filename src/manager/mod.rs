/// Transcode Manager (spec.md §4.5): a bounded worker pool that drains
/// queued jobs, driving each one through its formats in sequence and
/// reporting progress within a per-format window of the job's overall
/// percentage.
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::media::{EncodeRequest, MediaDriver, ProgressEvent};
use crate::models::{Job, JobStatus, OutputFile, TranscodeOptions, VideoFormat};
use crate::registry::{JobHandle, JobRegistry};
use crate::storage::Storage;

#[derive(Clone)]
pub struct TranscodeManager {
    registry: JobRegistry,
    storage: Storage,
    driver: Arc<dyn MediaDriver>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl TranscodeManager {
    pub fn new(
        registry: JobRegistry,
        storage: Storage,
        driver: Arc<dyn MediaDriver>,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            registry,
            storage,
            driver,
            semaphore: Arc::new(tokio::sync::Semaphore::new(worker_pool_size.max(1))),
        }
    }

    /// Locate the source video, probe it, and create a `queued` job record.
    /// Does not start encoding; call `schedule_job` to hand it to the worker
    /// pool (spec.md §4.5).
    pub async fn create_job(
        &self,
        video_id: &str,
        formats: Vec<VideoFormat>,
        output_container: String,
        options: TranscodeOptions,
    ) -> Result<Job> {
        let input_path = self
            .storage
            .locate_video(video_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("video not found: {video_id}")))?;

        let metadata = self.driver.probe(&input_path).await?;

        // UUIDv7 (not v4): its text form is lexicographically monotonic with
        // creation time, which the Job Registry's pagination cursor relies on
        // (job_id > page_token must agree with the ascending created_at order
        // it pages over; see registry::JobRegistry::list).
        let job_id = Uuid::now_v7().to_string();
        let output_dir = self.storage.create_job_output_dir(&job_id).await?;

        let job = Job::new(
            job_id,
            video_id.to_string(),
            input_path,
            output_dir,
            formats,
            output_container,
            options,
            metadata,
            Utc::now(),
        );

        let handle = self.registry.insert(job);
        Ok(handle.snapshot())
    }

    /// Hand a queued job off to the worker pool; returns immediately.
    pub fn schedule_job(&self, job_id: String) {
        let manager = self.clone();
        tokio::spawn(
            async move { manager.run_job(&job_id).await }
                .instrument(tracing::info_span!("transcode_job", job_id = %job_id)),
        );
    }

    /// Flip a job to `cancelled` and signal its cancellation token. A
    /// terminal job is left untouched (spec.md §4.5).
    pub fn cancel(&self, job_id: &str) -> Result<Job> {
        let handle = self
            .registry
            .get(job_id)
            .ok_or_else(|| AppError::NotFound(format!("job not found: {job_id}")))?;

        let snapshot = handle.snapshot();
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }

        handle.cancel_token.cancel();
        Ok(handle.update(|j| {
            j.status = JobStatus::Cancelled;
            j.completed_at = Some(Utc::now());
        }))
    }

    async fn run_job(&self, job_id: &str) {
        let _permit = self.semaphore.acquire().await;
        let Some(handle) = self.registry.get(job_id) else {
            tracing::warn!("job disappeared before scheduling");
            return;
        };

        if handle.snapshot().status.is_terminal() {
            return;
        }

        let job = handle.update(|j| {
            j.status = JobStatus::InProgress;
            j.started_at = Some(Utc::now());
        });

        let outcome = self.encode_all_formats(&handle, &job).await;

        match outcome {
            Ok(()) => {
                handle.update(|j| {
                    j.status = JobStatus::Completed;
                    j.progress = 100;
                    j.current_stage = "completed".to_string();
                    j.completed_at = Some(Utc::now());
                });
            }
            Err(AppError::Cancelled(_)) => {
                handle.update(|j| {
                    if j.status != JobStatus::Cancelled {
                        j.status = JobStatus::Cancelled;
                        j.completed_at = Some(Utc::now());
                    }
                });
            }
            Err(err) => {
                handle.update(|j| {
                    j.status = JobStatus::Failed;
                    j.error_message = Some(err.to_string());
                    j.completed_at = Some(Utc::now());
                });
            }
        }
    }

    async fn encode_all_formats(&self, handle: &Arc<JobHandle>, job: &Job) -> Result<()> {
        let total = job.formats.len().max(1);
        let duration_seconds = job
            .metadata
            .as_ref()
            .map(|m| m.duration_seconds)
            .unwrap_or(0.0);

        for (index, format) in job.formats.iter().enumerate() {
            if handle.cancel_token.is_cancelled() {
                return Err(AppError::Cancelled(format!("{} cancelled", job.job_id)));
            }

            let base = (index * 100 / total) as i32;
            let next = ((index + 1) * 100 / total) as i32;
            let stage_label = format!("encoding {}", format.name);

            let output_path = self.storage.output_path(
                &job.job_id,
                &job.video_id,
                &format.name,
                &job.output_container,
            );

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
            let reader_handle = handle.clone();
            let reader = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if event.percent < 0 {
                        reader_handle.update(|j| j.current_stage = event.stage.clone());
                        continue;
                    }
                    let mapped = window_percent(base, next, event.percent);
                    reader_handle.update(|j| {
                        j.progress = mapped;
                        j.current_stage = event.stage.clone();
                    });
                }
            });

            let request = EncodeRequest {
                input: &job.input_path,
                output: &output_path,
                format,
                options: &job.options,
                stage_label: stage_label.clone(),
                duration_seconds,
            };

            let result = self
                .driver
                .encode(request, tx, handle.cancel_token.clone())
                .await;
            let _ = reader.await;

            result?;

            let size_bytes = tokio::fs::metadata(&output_path).await.map(|m| m.len()).unwrap_or(0);
            handle.update(|j| {
                j.progress = next;
                j.output_files.push(OutputFile {
                    format: format.name.clone(),
                    location: output_path.clone(),
                    size_bytes,
                    duration_seconds,
                    bitrate_kbps: format.bitrate_kbps,
                });
            });
        }

        Ok(())
    }
}

fn window_percent(base: i32, next: i32, encoder_percent: i32) -> i32 {
    let encoder_percent = encoder_percent.clamp(0, 100);
    base + (next - base) * encoder_percent / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake::{FakeMediaDriver, ScriptedEncode};
    use crate::models::VideoMetadata;

    async fn setup() -> (tempfile::TempDir, Storage, JobRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::init(dir.path().join("staging"), dir.path().join("output"))
            .await
            .unwrap();
        (dir, storage, JobRegistry::new())
    }

    fn metadata() -> VideoMetadata {
        VideoMetadata {
            width: 1920,
            height: 1080,
            duration_seconds: 120.0,
            bitrate_kbps: 5000,
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_job_runs_every_format_and_completes() {
        let (_dir, storage, registry) = setup().await;
        tokio::fs::write(storage.staging_root().join("vid1.mp4"), b"source")
            .await
            .unwrap();

        let driver = Arc::new(FakeMediaDriver::new(metadata()));
        let manager = TranscodeManager::new(registry.clone(), storage, driver, 2);

        let formats = vec![
            VideoFormat::standard("720p").unwrap(),
            VideoFormat::standard("360p").unwrap(),
        ];
        let job = manager
            .create_job("vid1", formats, "mp4".to_string(), TranscodeOptions::default())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        manager.run_job(&job.job_id).await;

        let final_job = registry.get(&job.job_id).unwrap().snapshot();
        assert_eq!(final_job.status, JobStatus::Completed);
        assert_eq!(final_job.progress, 100);
        assert_eq!(final_job.output_files.len(), 2);
    }

    #[tokio::test]
    async fn a_failing_format_marks_the_whole_job_failed_and_stops_early() {
        let (_dir, storage, registry) = setup().await;
        tokio::fs::write(storage.staging_root().join("vid2.mp4"), b"source")
            .await
            .unwrap();

        let driver = Arc::new(
            FakeMediaDriver::new(metadata())
                .with_script("720p", ScriptedEncode::Fail(Vec::new(), "boom".to_string())),
        );
        let manager = TranscodeManager::new(registry.clone(), storage, driver, 2);

        let formats = vec![
            VideoFormat::standard("720p").unwrap(),
            VideoFormat::standard("360p").unwrap(),
        ];
        let job = manager
            .create_job("vid2", formats, "mp4".to_string(), TranscodeOptions::default())
            .await
            .unwrap();

        manager.run_job(&job.job_id).await;

        let final_job = registry.get(&job.job_id).unwrap().snapshot();
        assert_eq!(final_job.status, JobStatus::Failed);
        assert_eq!(final_job.output_files.len(), 0);
        assert!(final_job.error_message.is_some());
    }

    #[tokio::test]
    async fn cancelling_an_in_flight_job_stops_it_without_marking_failed() {
        let (_dir, storage, registry) = setup().await;
        tokio::fs::write(storage.staging_root().join("vid3.mp4"), b"source")
            .await
            .unwrap();

        let driver = Arc::new(
            FakeMediaDriver::new(metadata()).with_script("720p", ScriptedEncode::HangUntilCancelled),
        );
        let manager = TranscodeManager::new(registry.clone(), storage, driver, 2);

        let formats = vec![VideoFormat::standard("720p").unwrap()];
        let job = manager
            .create_job("vid3", formats, "mp4".to_string(), TranscodeOptions::default())
            .await
            .unwrap();

        let manager_clone = manager.clone();
        let job_id = job.job_id.clone();
        let run = tokio::spawn(async move { manager_clone.run_job(&job_id).await });

        tokio::task::yield_now().await;
        manager.cancel(&job.job_id).unwrap();
        run.await.unwrap();

        let final_job = registry.get(&job.job_id).unwrap().snapshot();
        assert_eq!(final_job.status, JobStatus::Cancelled);
    }
}
