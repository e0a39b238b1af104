use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transcode_service::config::Config;
use transcode_service::grpc::{
    status_server, transcode_server, upload_server, StatusServiceImpl, TranscodeServiceImpl,
    UploadServiceImpl,
};
use transcode_service::manager::TranscodeManager;
use transcode_service::media::{MediaDriver, ProcessMediaDriver};
use transcode_service::registry::JobRegistry;
use transcode_service::storage::Storage;
use transcode_service::upload::SessionTable;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,transcode_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        grpc_port = config.app.grpc_port,
        worker_pool_size = config.app.worker_pool_size,
        "transcode service starting"
    );

    let storage = Storage::init(
        config.storage.staging_dir.clone(),
        config.storage.output_dir.clone(),
    )
    .await
    .context("failed to initialize storage roots")?;

    let sessions = SessionTable::new(storage.clone());
    let registry = JobRegistry::new();

    let driver: Arc<dyn MediaDriver> = Arc::new(ProcessMediaDriver::new(
        config.tools.probe_bin.clone(),
        config.tools.encoder_bin.clone(),
        Duration::from_secs(config.tools.probe_timeout_secs),
    ));

    let manager = TranscodeManager::new(
        registry.clone(),
        storage.clone(),
        driver,
        config.app.worker_pool_size,
    );

    let max_message_size = config.app.max_inbound_message_size;

    let (mut health, health_service) = health_reporter();
    health
        .set_serving::<transcode_service::grpc::transcode::upload_service_server::UploadServiceServer<UploadServiceImpl>>()
        .await;
    health
        .set_serving::<transcode_service::grpc::transcode::transcode_service_server::TranscodeServiceServer<TranscodeServiceImpl>>()
        .await;
    health
        .set_serving::<transcode_service::grpc::transcode::status_service_server::StatusServiceServer<StatusServiceImpl>>()
        .await;

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.grpc_port)
        .parse()
        .context("failed to parse gRPC bind address")?;

    info!(%addr, "gRPC server listening");

    Server::builder()
        .add_service(health_service)
        .add_service(
            upload_server(sessions, storage).max_decoding_message_size(max_message_size),
        )
        .add_service(
            transcode_server(manager, config.clone()).max_decoding_message_size(max_message_size),
        )
        .add_service(status_server(registry).max_decoding_message_size(max_message_size))
        .serve(addr)
        .await
        .context("gRPC server error")?;

    Ok(())
}
