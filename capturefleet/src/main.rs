use std::sync::Arc;

use capturefleet::config::Config;
use capturefleet::coordinator::{Coordinator, ViewportDefaults};
use capturefleet::object_store::s3::S3ObjectStore;
use capturefleet::queue::sqs::SqsQueue;
use capturefleet::record_store::dynamodb::DynamoRecordStore;
use capturefleet::renderer::chromium::ChromiumRenderer;
use capturefleet::worker::{WorkerConfig, WorkerRuntime};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    capturefleet::telemetry::init(&config.log_level);

    tracing::info!(region = %config.aws_region, queue = %config.sqs_queue_url, "starting capture worker");

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await;

    let record_store = Arc::new(DynamoRecordStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        config.dynamodb_table_name.clone(),
    ));
    let object_store = Arc::new(S3ObjectStore::new(
        aws_sdk_s3::Client::new(&aws_config),
        config.s3_bucket_name.clone(),
        config.aws_region.clone(),
    ));
    let renderer = Arc::new(ChromiumRenderer::new());
    let queue = Arc::new(SqsQueue::new(
        aws_sdk_sqs::Client::new(&aws_config),
        config.sqs_queue_url.clone(),
        config.visibility_timeout(),
    ));

    let defaults = ViewportDefaults {
        width: config.screenshot_width,
        height: config.screenshot_height,
        timeout: config.render_timeout(),
    };
    let coordinator = Arc::new(Coordinator::new(record_store, object_store, renderer.clone(), defaults));

    let worker_config = WorkerConfig {
        batch_size: config.sqs_batch_size,
        wait_time: config.wait_time(),
        health_addr: config.health_addr(),
    };
    let runtime = Arc::new(WorkerRuntime::new(coordinator, queue, renderer, worker_config));

    let shutdown = CancellationToken::new();
    tokio::spawn(listen_for_shutdown(shutdown.clone()));

    match runtime.run(shutdown).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "worker runtime exited with error");
            std::process::exit(1);
        }
    }
}

async fn listen_for_shutdown(token: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down gracefully"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down gracefully"),
    }

    token.cancel();
}
