//! Mock renderer for coordinator tests - grounded on
//! `batcher::http::MockHttpClient`'s canned-response-queue shape.

use std::collections::VecDeque;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{RenderRequest, Renderer, Result};
use crate::error::RenderError;

#[derive(Default)]
pub struct MockRenderer {
    responses: Mutex<VecDeque<Result<Bytes>>>,
    calls: Mutex<Vec<RenderRequest>>,
    default_bytes: Bytes,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self { default_bytes: Bytes::from_static(b"fake-png-bytes"), ..Default::default() }
    }

    /// Queue a canned result; FIFO order across calls.
    pub fn push_response(&self, response: Result<Bytes>) {
        self.responses.lock().push_back(response);
    }

    pub fn push_failure(&self, message: &str) {
        self.push_response(Err(RenderError(anyhow!(message.to_string()))));
    }

    pub fn calls(&self) -> Vec<RenderRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn warm(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn render(&self, request: RenderRequest) -> Result<Bytes> {
        self.calls.lock().push(request);
        if let Some(response) = self.responses.lock().pop_front() {
            response
        } else {
            Ok(self.default_bytes.clone())
        }
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Format;
    use std::time::Duration;

    fn req() -> RenderRequest {
        RenderRequest {
            url: "https://example.com".into(),
            width: 1920,
            height: 1080,
            format: Format::Png,
            quality: 80,
            full_page: false,
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn defaults_to_canned_bytes_when_nothing_queued() {
        let renderer = MockRenderer::new();
        let bytes = renderer.render(req()).await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"fake-png-bytes"));
        assert_eq!(renderer.call_count(), 1);
    }

    #[tokio::test]
    async fn queued_failure_surfaces_as_render_error() {
        let renderer = MockRenderer::new();
        renderer.push_failure("navigation timed out");
        let err = renderer.render(req()).await.unwrap_err();
        assert!(err.0.to_string().contains("navigation timed out"));
    }
}
