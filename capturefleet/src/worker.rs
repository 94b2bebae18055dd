//! Worker Runtime: bounded-concurrency dispatch of the Coordinator over
//! messages pulled from the Queue Adapter, a health endpoint, and graceful
//! shutdown - grounded on `batcher::daemon::Daemon::run`'s
//! `JoinSet`+`Semaphore` permit pattern and `dwctl`'s
//! `CancellationToken`-driven shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Json;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

use crate::coordinator::{Coordinator, Disposition};
use crate::object_store::ObjectStore;
use crate::queue::Queue;
use crate::record_store::RecordStore;
use crate::renderer::Renderer;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

pub struct WorkerConfig {
    pub batch_size: usize,
    pub wait_time: Duration,
    pub health_addr: std::net::SocketAddr,
}

pub struct WorkerRuntime<R, O, C, Q>
where
    R: RecordStore + 'static,
    O: ObjectStore + 'static,
    C: Renderer + 'static,
    Q: Queue + 'static,
{
    coordinator: Arc<Coordinator<R, O, C>>,
    queue: Arc<Q>,
    renderer: Arc<C>,
    config: WorkerConfig,
}

impl<R, O, C, Q> WorkerRuntime<R, O, C, Q>
where
    R: RecordStore + 'static,
    O: ObjectStore + 'static,
    C: Renderer + 'static,
    Q: Queue + 'static,
{
    pub fn new(coordinator: Arc<Coordinator<R, O, C>>, queue: Arc<Q>, renderer: Arc<C>, config: WorkerConfig) -> Self {
        Self { coordinator, queue, renderer, config }
    }

    /// Start the health endpoint and the receive loop; block until
    /// `shutdown` fires, then drain in-flight handlers and close the
    /// renderer.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let health_handle = tokio::spawn(Self::serve_health(self.config.health_addr, shutdown.clone()));

        info!(batch_size = self.config.batch_size, "warming renderer before accepting work");
        if let Err(e) = self.renderer.warm().await {
            error!(error = %e, "renderer failed to warm up, exiting");
            health_handle.abort();
            return Err(e.context("fatal: renderer warm-up failed"));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.batch_size));
        let mut join_set: JoinSet<()> = JoinSet::new();

        info!(batch_size = self.config.batch_size, "worker runtime started");

        loop {
            while let Some(result) = join_set.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "handler task panicked");
                }
            }

            if shutdown.is_cancelled() {
                break;
            }

            let receive = self.queue.receive(self.config.batch_size, self.config.wait_time);
            let messages = tokio::select! {
                result = receive => result?,
                _ = shutdown.cancelled() => break,
            };

            for message in messages {
                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Capacity exhausted; the visibility timeout will
                        // make the message reappear rather than stalling
                        // the receive loop on an `acquire().await`.
                        warn!("no capacity available, leaving message for redelivery");
                        continue;
                    }
                };

                let coordinator = self.coordinator.clone();
                let queue = self.queue.clone();

                join_set.spawn(async move {
                    let _permit = permit;
                    let (disposition, error) = coordinator.handle(&message.body).await;
                    if let Some(e) = &error {
                        warn!(error = %e, "handler reported an error");
                    }
                    if disposition == Disposition::Ack {
                        if let Err(e) = queue.ack(&message.receipt_handle).await {
                            error!(error = %e, "failed to ack message");
                        }
                    }
                });
            }
        }

        info!("shutdown signal received, draining in-flight handlers");
        let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("shutdown deadline exceeded with handlers still in flight");
        }

        self.renderer.close().await;
        health_handle.abort();

        if drained.is_err() {
            anyhow::bail!("shutdown deadline exceeded");
        }
        Ok(())
    }

    async fn serve_health(addr: std::net::SocketAddr, shutdown: CancellationToken) {
        let app = axum::Router::new().route("/health", get(health)).layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "failed to bind health endpoint");
                return;
            }
        };

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        if let Err(e) = result {
            error!(error = %e, "health endpoint exited with error");
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "message": "ok" }))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use uuid::Uuid;

    use super::*;
    use crate::coordinator::{Coordinator, ViewportDefaults};
    use crate::object_store::in_memory::InMemoryObjectStore;
    use crate::queue::in_memory::InMemoryQueue;
    use crate::record_store::in_memory::InMemoryRecordStore;
    use crate::renderer::mock::MockRenderer;

    type TestRuntime = WorkerRuntime<InMemoryRecordStore, InMemoryObjectStore, MockRenderer, InMemoryQueue>;

    fn runtime(batch_size: usize) -> (Arc<TestRuntime>, Arc<InMemoryQueue>) {
        let renderer = Arc::new(MockRenderer::new());
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryObjectStore::new()),
            renderer.clone(),
            ViewportDefaults { width: 1920, height: 1080, timeout: Duration::from_secs(30) },
        ));
        let queue = Arc::new(InMemoryQueue::new());
        let config = WorkerConfig {
            batch_size,
            wait_time: Duration::from_millis(10),
            health_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        (Arc::new(WorkerRuntime::new(coordinator, queue.clone(), renderer, config)), queue)
    }

    #[tokio::test]
    async fn shutdown_before_any_message_returns_promptly() {
        let (runtime, _queue) = runtime(5);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), runtime.run(shutdown)).await;
        assert!(result.is_ok(), "run() should return well within the shutdown deadline");
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn in_flight_message_is_drained_before_shutdown_returns() {
        let (runtime, queue) = runtime(5);
        let id = Uuid::new_v4();
        queue.enqueue(format!(r#"{{"requestId":"{id}","url":"example.com"}}"#));

        let shutdown = CancellationToken::new();
        let run_shutdown = shutdown.clone();
        let handle = tokio::spawn(runtime.clone().run(run_shutdown));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "run() should finish within the shutdown deadline");
        assert!(result.unwrap().unwrap().is_ok());
        assert!(queue.is_empty(), "in-flight message should have been acked before shutdown returned");
    }

    struct UnwarmableRenderer;

    #[async_trait::async_trait]
    impl crate::renderer::Renderer for UnwarmableRenderer {
        async fn warm(&self) -> anyhow::Result<()> {
            anyhow::bail!("engine launch exhausted retries")
        }

        async fn render(&self, _request: crate::renderer::RenderRequest) -> crate::renderer::Result<bytes::Bytes> {
            unreachable!("warm() fails before any render is attempted")
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn warm_up_failure_is_fatal_and_returned_before_the_receive_loop_starts() {
        let renderer = Arc::new(UnwarmableRenderer);
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryObjectStore::new()),
            renderer.clone(),
            ViewportDefaults { width: 1920, height: 1080, timeout: Duration::from_secs(30) },
        ));
        let queue = Arc::new(InMemoryQueue::new());
        let config = WorkerConfig {
            batch_size: 5,
            wait_time: Duration::from_millis(10),
            health_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        };
        let runtime = Arc::new(WorkerRuntime::new(coordinator, queue, renderer, config));

        let result = tokio::time::timeout(Duration::from_secs(5), runtime.run(CancellationToken::new())).await;
        assert!(result.is_ok(), "warm-up failure must be detected without waiting on the receive loop");
        assert!(result.unwrap().is_err(), "a renderer that fails to warm up must be a fatal startup error");
    }
}
