// gRPC service implementations for the transcode service
use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::manager::TranscodeManager;
use crate::models::{Job, JobStatus as CoreJobStatus, TranscodeOptions, VideoFormat};
use crate::registry::{JobRegistry, ListFilter};
use crate::storage::Storage;
use crate::upload::{SessionTable, UploadStatusView};

// Import generated proto code
pub mod transcode {
    pub mod v1 {
        tonic::include_proto!("transcode.v1");
    }
    pub use v1::*;
}

use transcode::status_service_server::{StatusService, StatusServiceServer};
use transcode::transcode_service_server::{TranscodeService, TranscodeServiceServer};
use transcode::upload_service_server::{UploadService, UploadServiceServer};
use transcode::{
    CancelRequest, CancelResponse, GetJobStatusRequest, GetUploadStatusRequest,
    GetUploadStatusResponse, JobStatusResponse, ListJobsRequest, ListJobsResponse,
    StreamJobStatusRequest, TranscodeRequest, TranscodeResponse, UploadChunk, UploadResponse,
    UploadStatus,
};

fn job_status_to_proto(status: CoreJobStatus) -> i32 {
    match status {
        CoreJobStatus::Queued => transcode::JobStatus::Queued as i32,
        CoreJobStatus::InProgress => transcode::JobStatus::InProgress as i32,
        CoreJobStatus::Completed => transcode::JobStatus::Completed as i32,
        CoreJobStatus::Failed => transcode::JobStatus::Failed as i32,
        CoreJobStatus::Cancelled => transcode::JobStatus::Cancelled as i32,
    }
}

fn proto_to_job_status(value: i32) -> Option<CoreJobStatus> {
    match transcode::JobStatus::try_from(value).ok()? {
        transcode::JobStatus::Queued => Some(CoreJobStatus::Queued),
        transcode::JobStatus::InProgress => Some(CoreJobStatus::InProgress),
        transcode::JobStatus::Completed => Some(CoreJobStatus::Completed),
        transcode::JobStatus::Failed => Some(CoreJobStatus::Failed),
        transcode::JobStatus::Cancelled => Some(CoreJobStatus::Cancelled),
        transcode::JobStatus::Unknown => None,
    }
}

fn job_to_status_response(job: &Job) -> JobStatusResponse {
    JobStatusResponse {
        job_id: job.job_id.clone(),
        video_id: job.video_id.clone(),
        status: job_status_to_proto(job.status),
        progress: job.progress,
        current_stage: job.current_stage.clone(),
        start_time: job.started_at.map(|t| t.timestamp_millis()).unwrap_or(0),
        end_time: job.completed_at.map(|t| t.timestamp_millis()).unwrap_or(0),
        estimated_time_remaining_seconds: job.estimated_time_remaining_seconds,
        error_message: job.error_message.clone().unwrap_or_default(),
        output_files: job
            .output_files
            .iter()
            .map(|f| transcode::OutputFile {
                format: f.format.clone(),
                location: f.location.to_string_lossy().into_owned(),
                size_bytes: f.size_bytes as i64,
                duration_seconds: f.duration_seconds,
                bitrate_kbps: f.bitrate_kbps,
            })
            .collect(),
    }
}

fn proto_to_video_format(f: &transcode::VideoFormat) -> VideoFormat {
    VideoFormat {
        name: f.name.clone(),
        width: f.width,
        height: f.height,
        video_codec: if f.video_codec.is_empty() {
            "libx264".to_string()
        } else {
            f.video_codec.clone()
        },
        bitrate_kbps: f.bitrate_kbps,
    }
}

fn proto_to_options(opts: Option<transcode::TranscodeOptions>) -> TranscodeOptions {
    match opts {
        Some(o) => TranscodeOptions {
            audio_codec: if o.audio_codec.is_empty() {
                None
            } else {
                Some(o.audio_codec)
            },
            audio_bitrate_kbps: if o.audio_bitrate_kbps > 0 {
                Some(o.audio_bitrate_kbps)
            } else {
                None
            },
            frame_rate: if o.frame_rate > 0.0 {
                Some(o.frame_rate)
            } else {
                None
            },
            two_pass: o.two_pass,
            crf: if o.crf > 0 { Some(o.crf) } else { None },
        },
        None => TranscodeOptions::default(),
    }
}

pub struct UploadServiceImpl {
    sessions: SessionTable,
    storage: Storage,
}

impl UploadServiceImpl {
    pub fn new(sessions: SessionTable, storage: Storage) -> Self {
        Self { sessions, storage }
    }
}

#[tonic::async_trait]
impl UploadService for UploadServiceImpl {
    async fn upload(
        &self,
        request: Request<tonic::Streaming<UploadChunk>>,
    ) -> Result<Response<UploadResponse>, Status> {
        let mut stream = request.into_inner();
        let mut upload_id: Option<String> = None;

        while let Some(chunk) = stream.message().await? {
            // Resolve the upload id before touching storage: an implicit
            // session (no id on the first chunk) must mint its id here, not
            // fall back to a shared placeholder, or two concurrent implicit
            // uploads whose first chunk carries the same sequence number
            // would write the same staging path and clobber each other
            // (spec.md §5: distinct path namespaces per upload id).
            let id_for_put = if !chunk.upload_id.is_empty() {
                chunk.upload_id.clone()
            } else if let Some(existing) = upload_id.clone() {
                existing
            } else {
                uuid::Uuid::new_v4().to_string()
            };

            let chunk_path = self
                .storage
                .put_chunk(&id_for_put, chunk.sequence_number, &chunk.content)
                .await
                .map_err(Status::from)?;

            let resolved_id = self
                .sessions
                .put_chunk(
                    Some(id_for_put),
                    chunk.filename,
                    if chunk.content_type.is_empty() {
                        None
                    } else {
                        Some(chunk.content_type)
                    },
                    chunk.sequence_number,
                    chunk.is_last_chunk,
                    chunk_path,
                )
                .map_err(Status::from)?;

            upload_id = Some(resolved_id);
        }

        let upload_id = upload_id
            .ok_or_else(|| Status::invalid_argument("upload stream contained no chunks"))?;

        match self.sessions.finish(&upload_id).await {
            Ok(video_id) => Ok(Response::new(UploadResponse {
                video_id,
                status: UploadStatus::Completed as i32,
                error_message: String::new(),
            })),
            Err(err) => Ok(Response::new(UploadResponse {
                video_id: String::new(),
                status: UploadStatus::Failed as i32,
                error_message: err.to_string(),
            })),
        }
    }

    async fn get_upload_status(
        &self,
        request: Request<GetUploadStatusRequest>,
    ) -> Result<Response<GetUploadStatusResponse>, Status> {
        let upload_id = request.into_inner().upload_id;
        let response = match self.sessions.status(&upload_id) {
            UploadStatusView::Unknown => GetUploadStatusResponse {
                status: UploadStatus::Unknown as i32,
                percent_complete: 0,
                video_id: String::new(),
                error_message: String::new(),
            },
            UploadStatusView::InProgress { percent_complete } => GetUploadStatusResponse {
                status: UploadStatus::InProgress as i32,
                percent_complete,
                video_id: String::new(),
                error_message: String::new(),
            },
            UploadStatusView::Completed { video_id } => GetUploadStatusResponse {
                status: UploadStatus::Completed as i32,
                percent_complete: 100,
                video_id,
                error_message: String::new(),
            },
            UploadStatusView::Failed { error_message } => GetUploadStatusResponse {
                status: UploadStatus::Failed as i32,
                percent_complete: 0,
                video_id: String::new(),
                error_message,
            },
        };
        Ok(Response::new(response))
    }
}

pub struct TranscodeServiceImpl {
    manager: TranscodeManager,
    config: Config,
}

impl TranscodeServiceImpl {
    pub fn new(manager: TranscodeManager, config: Config) -> Self {
        Self { manager, config }
    }
}

#[tonic::async_trait]
impl TranscodeService for TranscodeServiceImpl {
    async fn transcode(
        &self,
        request: Request<TranscodeRequest>,
    ) -> Result<Response<TranscodeResponse>, Status> {
        let req = request.into_inner();

        let formats = if req.output_formats.is_empty() {
            self.config.default_video_formats().map_err(Status::from)?
        } else {
            req.output_formats.iter().map(proto_to_video_format).collect()
        };

        let container = if req.output_container.is_empty() {
            self.config.app.default_container.clone()
        } else {
            req.output_container
        };

        let options = proto_to_options(req.options);

        let job = self
            .manager
            .create_job(&req.video_id, formats, container, options)
            .await
            .map_err(Status::from)?;

        self.manager.schedule_job(job.job_id.clone());

        Ok(Response::new(TranscodeResponse {
            job_id: job.job_id,
            status: job_status_to_proto(job.status),
            estimated_time_seconds: job.estimated_time_remaining_seconds,
            error_message: String::new(),
        }))
    }

    async fn cancel(
        &self,
        request: Request<CancelRequest>,
    ) -> Result<Response<CancelResponse>, Status> {
        let job_id = request.into_inner().job_id;
        match self.manager.cancel(&job_id) {
            Ok(_) => Ok(Response::new(CancelResponse {
                success: true,
                error_message: String::new(),
            })),
            Err(err) => Ok(Response::new(CancelResponse {
                success: false,
                error_message: err.to_string(),
            })),
        }
    }
}

pub struct StatusServiceImpl {
    registry: JobRegistry,
}

impl StatusServiceImpl {
    pub fn new(registry: JobRegistry) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl StatusService for StatusServiceImpl {
    async fn get_job_status(
        &self,
        request: Request<GetJobStatusRequest>,
    ) -> Result<Response<JobStatusResponse>, Status> {
        let job_id = request.into_inner().job_id;
        let handle = self
            .registry
            .get(&job_id)
            .ok_or_else(|| Status::not_found(format!("job not found: {job_id}")))?;
        Ok(Response::new(job_to_status_response(&handle.snapshot())))
    }

    type StreamJobStatusStream = ReceiverStream<Result<JobStatusResponse, Status>>;

    async fn stream_job_status(
        &self,
        request: Request<StreamJobStatusRequest>,
    ) -> Result<Response<Self::StreamJobStatusStream>, Status> {
        let job_id = request.into_inner().job_id;
        let handle = self
            .registry
            .get(&job_id)
            .ok_or_else(|| Status::not_found(format!("job not found: {job_id}")))?;

        let initial = handle.snapshot();
        let mut rx = handle.subscribe();

        let (tx, out_rx) = mpsc::channel(32);

        tokio::spawn(async move {
            if tx.send(Ok(job_to_status_response(&initial))).await.is_err() {
                return;
            }
            if initial.status.is_terminal() {
                return;
            }

            loop {
                match rx.recv().await {
                    Ok(job) => {
                        let terminal = job.status.is_terminal();
                        if tx.send(Ok(job_to_status_response(&job))).await.is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(out_rx)))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let req = request.into_inner();
        let statuses: Option<HashSet<CoreJobStatus>> = if req.status_filter.is_empty() {
            None
        } else {
            Some(
                req.status_filter
                    .iter()
                    .filter_map(|v| proto_to_job_status(*v))
                    .collect(),
            )
        };

        let page = self.registry.list(ListFilter {
            limit: req.limit,
            statuses,
            page_token: if req.page_token.is_empty() {
                None
            } else {
                Some(req.page_token)
            },
        });

        Ok(Response::new(ListJobsResponse {
            jobs: page.jobs.iter().map(job_to_status_response).collect(),
            next_page_token: page.next_page_token,
            total_count: self.registry.total_count() as i64,
        }))
    }
}

pub fn upload_server(
    sessions: SessionTable,
    storage: Storage,
) -> UploadServiceServer<UploadServiceImpl> {
    UploadServiceServer::new(UploadServiceImpl::new(sessions, storage))
}

pub fn transcode_server(
    manager: TranscodeManager,
    config: Config,
) -> TranscodeServiceServer<TranscodeServiceImpl> {
    TranscodeServiceServer::new(TranscodeServiceImpl::new(manager, config))
}

pub fn status_server(registry: JobRegistry) -> StatusServiceServer<StatusServiceImpl> {
    StatusServiceServer::new(StatusServiceImpl::new(registry))
}
