//! Request Lifecycle Coordinator - the state machine that turns one queue
//! message into a terminal `success`/`failed` record while tolerating
//! duplicate deliveries, crashed peers, and partial failures.
//!
//! Generic over the three capability traits so tests run entirely against
//! in-memory fakes, the same way `batcher`'s daemon tests run against
//! `InMemoryBatcher` and a mocked `HttpClient`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, RecordStoreError, Result};
use crate::object_store::{key::derive_key, ObjectStore};
use crate::record_store::RecordStore;
use crate::renderer::{RenderRequest, Renderer};
use crate::types::{Format, RequestRecord, ScreenshotMessage, ScreenshotParams, Status, StatusPatch};

/// A record in `consumerProcessing` older than this is presumed abandoned by
/// a crashed owner and eligible for takeover.
const T_STALE: chrono::Duration = chrono::Duration::minutes(10);

/// Backoff schedule for transient record-store errors during a single
/// `handle` call - not a second attempt counter, just absorbing brief
/// throttling before handing the outer retry loop (queue redelivery) back
/// the failure.
const RECORD_STORE_RETRY_BACKOFF: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Disposition returned to the worker runtime: whether to ack (delete) or
/// nack (leave for redelivery) the queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// Per-message viewport/quality defaults that step 1 falls back to when the
/// message omits them.
#[derive(Debug, Clone, Copy)]
pub struct ViewportDefaults {
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
}

pub struct Coordinator<R, O, C>
where
    R: RecordStore,
    O: ObjectStore,
    C: Renderer,
{
    record_store: Arc<R>,
    object_store: Arc<O>,
    renderer: Arc<C>,
    defaults: ViewportDefaults,
}

impl<R, O, C> Coordinator<R, O, C>
where
    R: RecordStore,
    O: ObjectStore,
    C: Renderer,
{
    pub fn new(record_store: Arc<R>, object_store: Arc<O>, renderer: Arc<C>, defaults: ViewportDefaults) -> Self {
        Self { record_store, object_store, renderer, defaults }
    }

    /// Process one queue message body to completion. Never returns an error
    /// that should be treated as anything other than a log line plus a
    /// `Nack` - the disposition embedded in `Ok` is the thing the caller
    /// actually acts on.
    #[instrument(skip(self, body), fields(request_id))]
    pub async fn handle(&self, body: &str) -> (Disposition, Option<Error>) {
        let (request_id, url, params) = match self.validate(body) {
            Ok(parsed) => parsed,
            Err(e) => return (Disposition::Nack, Some(e)),
        };
        tracing::Span::current().record("request_id", tracing::field::display(request_id));

        match self.process(request_id, url, params).await {
            Ok(()) => (Disposition::Ack, None),
            Err(e) => (Disposition::Nack, Some(e)),
        }
    }

    /// Step 1: parse and validate the message body, filling defaults.
    fn validate(&self, body: &str) -> Result<(Uuid, String, ScreenshotParams)> {
        let msg: ScreenshotMessage =
            serde_json::from_str(body).map_err(|e| Error::Malformed(format!("invalid JSON: {e}")))?;

        let url = msg.url.ok_or_else(|| Error::Malformed("missing url".into()))?;
        let request_id = msg.request_id.ok_or_else(|| Error::Malformed("missing requestId".into()))?;

        let url = crate::renderer::normalize_url(&url);
        let params = ScreenshotParams {
            width: msg.width.unwrap_or(self.defaults.width),
            height: msg.height.unwrap_or(self.defaults.height),
            format: msg.format.unwrap_or_default(),
            quality: msg.quality.unwrap_or(80),
            full_page: msg.full_page.unwrap_or(false),
        };

        Ok((request_id, url, params))
    }

    async fn process(&self, request_id: Uuid, url: String, params: ScreenshotParams) -> Result<()> {
        let record = match self.read_or_create(request_id, &url, &params).await? {
            Some(record) => record,
            None => return Ok(()), // steps 2(b)/2(c): already handled, skip-ack
        };

        self.claim(request_id, &params).await?;

        // Steps 4 and 5 share one failure path: either a render error or an
        // upload error gets the same disposition (write `failed`, `Nack`),
        // and the record must never be left stranded in `consumerProcessing`
        // if either one fails.
        let outcome = self.render_and_upload(request_id, &url, &params).await;
        if let Err(e) = &outcome {
            self.write_failure(request_id, e).await;
        }
        outcome
    }

    /// Steps 4 and 5: render, then upload and finalize. Wrapped together so
    /// `process` has a single point to route both error kinds through the
    /// step-6 failure path.
    async fn render_and_upload(&self, request_id: Uuid, url: &str, params: &ScreenshotParams) -> Result<()> {
        let (bytes, render_ms) = self.render(url, params).await?;
        self.upload_and_finalize(request_id, url, params, bytes, render_ms).await
    }

    /// Step 2: read the existing record and decide whether `process` should
    /// continue claiming it. `Ok(None)` means the message should be acked
    /// with no further work (steps 2b/2c).
    async fn read_or_create(
        &self,
        request_id: Uuid,
        url: &str,
        params: &ScreenshotParams,
    ) -> Result<Option<RequestRecord>> {
        let existing = self.retry_transient(|| self.record_store.get(request_id)).await?;

        let record = match existing {
            None => {
                // 2(a): absent record. Anomalous - the enqueuer should have
                // written it first - but tolerated for the create-on-first-sight
                // enqueuer path.
                let now = Utc::now();
                let fresh = RequestRecord::new_processing(request_id, url.to_string(), params, now);
                match self.record_store.create(fresh.clone(), true).await {
                    Ok(()) => fresh,
                    Err(RecordStoreError::AlreadyExists) => self
                        .retry_transient(|| self.record_store.get(request_id))
                        .await?
                        .ok_or_else(|| Error::Fatal(anyhow::anyhow!("record vanished after AlreadyExists race")))?,
                    Err(e) => return Err(e.into()),
                }
            }
            Some(record) => record,
        };

        match record.status {
            Status::Success => {
                info!("record already succeeded, acking as duplicate delivery");
                Ok(None)
            }
            Status::ConsumerProcessing if Utc::now() - record.updated_at <= T_STALE => {
                info!("record owned by a live worker, skipping");
                Ok(None)
            }
            Status::ConsumerProcessing => {
                warn!(age_secs = (Utc::now() - record.updated_at).num_seconds(), "stale owner, taking over");
                Ok(Some(record))
            }
            Status::Failed | Status::Processing => Ok(Some(record)),
        }
    }

    /// Step 3: claim ownership. Not conditional on prior status - takeover
    /// needs to succeed regardless - but always refreshes `updatedAt` so
    /// staleness is measured from the new owner.
    async fn claim(&self, request_id: Uuid, params: &ScreenshotParams) -> Result<()> {
        let patch = StatusPatch {
            width: Some(params.width),
            height: Some(params.height),
            format: Some(params.format),
            ..Default::default()
        };
        self.retry_transient(|| self.record_store.update_status(request_id, Status::ConsumerProcessing, patch.clone()))
            .await?;
        Ok(())
    }

    /// Step 4: render, timing the call for the `renderMs` patch field.
    async fn render(&self, url: &str, params: &ScreenshotParams) -> Result<(bytes::Bytes, u32)> {
        let request = RenderRequest {
            url: url.to_string(),
            width: params.width,
            height: params.height,
            format: params.format,
            quality: params.quality,
            full_page: params.full_page,
            timeout: self.defaults.timeout,
        };

        let started = std::time::Instant::now();
        let bytes = self.renderer.render(request).await?;
        let render_ms = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        Ok((bytes, render_ms))
    }

    /// Step 5: upload, then write `success`.
    async fn upload_and_finalize(
        &self,
        request_id: Uuid,
        url: &str,
        params: &ScreenshotParams,
        bytes: bytes::Bytes,
        render_ms: u32,
    ) -> Result<()> {
        let key = derive_key(url, request_id, params.format, Utc::now());
        let object_url = self.object_store.put(&key, bytes, params.format.content_type()).await?;

        let patch = StatusPatch {
            object_url: Some(object_url),
            object_key: Some(key),
            render_ms: Some(render_ms),
            ..Default::default()
        };
        self.retry_transient(|| self.record_store.update_status(request_id, Status::Success, patch.clone())).await?;
        Ok(())
    }

    /// Step 6: best-effort failure write. A secondary failure here is
    /// logged but never masks the primary error already in flight.
    async fn write_failure(&self, request_id: Uuid, error: &Error) {
        let patch = StatusPatch { error_message: Some(error.to_string()), ..Default::default() };
        if let Err(e) = self.retry_transient(|| self.record_store.update_status(request_id, Status::Failed, patch.clone())).await {
            warn!(error = %e, "failed to persist failure record, primary error still reported");
        }
    }

    /// Retry a record-store operation up to 3 times on `Throttled`,
    /// backing off 1s/2s/4s, before surfacing `RecordStoreTransient`. Any
    /// other error kind is not retried.
    async fn retry_transient<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RecordStoreError>>,
    {
        let mut last_message = String::new();
        for backoff in RECORD_STORE_RETRY_BACKOFF {
            match op().await {
                Ok(value) => return Ok(value),
                Err(RecordStoreError::Throttled(msg)) => {
                    last_message = msg;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::RecordStoreTransient(last_message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::in_memory::InMemoryObjectStore;
    use crate::record_store::in_memory::InMemoryRecordStore;
    use crate::renderer::mock::MockRenderer;

    fn defaults() -> ViewportDefaults {
        ViewportDefaults { width: 1920, height: 1080, timeout: Duration::from_secs(30) }
    }

    fn coordinator() -> Coordinator<InMemoryRecordStore, InMemoryObjectStore, MockRenderer> {
        Coordinator::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(MockRenderer::new()),
            defaults(),
        )
    }

    fn message(request_id: Uuid, url: &str) -> String {
        format!(r#"{{"requestId":"{request_id}","url":"{url}"}}"#)
    }

    #[tokio::test]
    async fn scenario_1_fresh_record_ends_success() {
        let coordinator = coordinator();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = RequestRecord::new_processing(
            id,
            "https://example.com".into(),
            &ScreenshotParams { width: 1920, height: 1080, format: Format::Png, quality: 80, full_page: false },
            now,
        );
        coordinator.record_store.create(record, true).await.unwrap();

        let (disposition, err) = coordinator.handle(&message(id, "example.com")).await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(err.is_none());

        let stored = coordinator.record_store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Success);
        assert!(stored.object_url.unwrap().contains(&format!("{id}_example_com.png")));
    }

    #[tokio::test]
    async fn scenario_2_concurrent_deliveries_both_ack_and_converge() {
        let coordinator = coordinator();
        let id = Uuid::new_v4();

        let (d1, e1) = coordinator.handle(&message(id, "example.com")).await;
        let (d2, e2) = coordinator.handle(&message(id, "example.com")).await;

        assert_eq!(d1, Disposition::Ack);
        assert_eq!(d2, Disposition::Ack);
        assert!(e1.is_none() && e2.is_none());

        let stored = coordinator.record_store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Success);
    }

    #[tokio::test]
    async fn scenario_3_already_success_is_acked_without_render_or_upload() {
        let coordinator = coordinator();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut record = RequestRecord::new_processing(
            id,
            "https://example.com".into(),
            &ScreenshotParams { width: 1920, height: 1080, format: Format::Png, quality: 80, full_page: false },
            now,
        );
        record.status = Status::Success;
        record.object_url = Some("https://bucket.s3.region.amazonaws.com/U".into());
        coordinator.record_store.create(record, true).await.unwrap();

        let (disposition, err) = coordinator.handle(&message(id, "example.com")).await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(err.is_none());
        assert_eq!(coordinator.renderer.call_count(), 0);
    }

    #[tokio::test]
    async fn scenario_4_fresh_consumer_processing_is_skipped() {
        let coordinator = coordinator();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut record = RequestRecord::new_processing(
            id,
            "https://example.com".into(),
            &ScreenshotParams { width: 1920, height: 1080, format: Format::Png, quality: 80, full_page: false },
            now - chrono::Duration::minutes(2),
        );
        record.status = Status::ConsumerProcessing;
        record.updated_at = now - chrono::Duration::minutes(2);
        coordinator.record_store.create(record, true).await.unwrap();

        let (disposition, _) = coordinator.handle(&message(id, "example.com")).await;
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(coordinator.renderer.call_count(), 0);
    }

    #[tokio::test]
    async fn scenario_5_stale_consumer_processing_is_taken_over() {
        let coordinator = coordinator();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut record = RequestRecord::new_processing(
            id,
            "https://example.com".into(),
            &ScreenshotParams { width: 1920, height: 1080, format: Format::Png, quality: 80, full_page: false },
            now - chrono::Duration::minutes(15),
        );
        record.status = Status::ConsumerProcessing;
        record.updated_at = now - chrono::Duration::minutes(15);
        coordinator.record_store.create(record, true).await.unwrap();

        let (disposition, _) = coordinator.handle(&message(id, "example.com")).await;
        assert_eq!(disposition, Disposition::Ack);

        let stored = coordinator.record_store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Success);
    }

    #[tokio::test]
    async fn scenario_6_render_failure_writes_failed_and_nacks() {
        let coordinator = coordinator();
        coordinator.renderer.push_failure("navigation failed");
        let id = Uuid::new_v4();

        let (disposition, err) = coordinator.handle(&message(id, "bad://x")).await;
        assert_eq!(disposition, Disposition::Nack);
        assert!(matches!(err, Some(Error::Render(_))));

        let stored = coordinator.record_store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn upload_failure_writes_failed_and_nacks() {
        let coordinator = coordinator();
        coordinator.object_store.push_failure("access denied");
        let id = Uuid::new_v4();

        let (disposition, err) = coordinator.handle(&message(id, "example.com")).await;
        assert_eq!(disposition, Disposition::Nack);
        assert!(matches!(err, Some(Error::Upload(_))));

        let stored = coordinator.record_store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(stored.error_message.is_some());

        // Redelivery must retry, not skip-ack: a failed record routes back
        // through case 2(e), not the 2(c) consumerProcessing early-skip that
        // would strand the message forever.
        let (disposition, err) = coordinator.handle(&message(id, "example.com")).await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(err.is_none());
        let stored = coordinator.record_store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Success);
    }

    #[tokio::test]
    async fn malformed_message_is_nacked_without_touching_any_adapter() {
        let coordinator = coordinator();
        let (disposition, err) = coordinator.handle(r#"{"url":"example.com"}"#).await;
        assert_eq!(disposition, Disposition::Nack);
        assert!(matches!(err, Some(Error::Malformed(_))));
        assert_eq!(coordinator.renderer.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_record_is_retried_on_redelivery() {
        let coordinator = coordinator();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut record = RequestRecord::new_processing(
            id,
            "https://example.com".into(),
            &ScreenshotParams { width: 1920, height: 1080, format: Format::Png, quality: 80, full_page: false },
            now,
        );
        record.status = Status::Failed;
        record.error_message = Some("previous attempt failed".into());
        coordinator.record_store.create(record, true).await.unwrap();

        let (disposition, err) = coordinator.handle(&message(id, "example.com")).await;
        assert_eq!(disposition, Disposition::Ack);
        assert!(err.is_none());

        let stored = coordinator.record_store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Success);
    }
}
