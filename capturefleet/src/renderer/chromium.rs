//! Production `Renderer` driving a headless Chromium engine via
//! `chromiumoxide`.
//!
//! The engine handle is a process-wide singleton guarded by a mutex only
//! during (re-)initialization; renders against an already-live handle
//! proceed concurrently, one fresh page context per render.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{normalize_url, RenderRequest, Renderer, Result};
use crate::error::RenderError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const LATE_CONTENT_WAIT: Duration = Duration::from_secs(2);
const LAUNCH_ATTEMPTS: u32 = 3;
const LAUNCH_BACKOFF: [Duration; 3] = [Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(6)];

struct EngineHandle {
    browser: Browser,
    /// Keeps the event-handling task alive for as long as the browser is
    /// alive; dropping it would stall every CDP call.
    _handler_task: JoinHandle<()>,
}

pub struct ChromiumRenderer {
    engine: Mutex<Option<EngineHandle>>,
}

impl ChromiumRenderer {
    pub fn new() -> Self {
        Self { engine: Mutex::new(None) }
    }

    async fn launch_engine() -> anyhow::Result<EngineHandle> {
        let config = BrowserConfig::builder().build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = Browser::launch(config).await.context("failed to launch chromium")?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });
        Ok(EngineHandle { browser, _handler_task: handler_task })
    }

    async fn launch_with_retry() -> anyhow::Result<EngineHandle> {
        let mut last_err = None;
        for (attempt, backoff) in LAUNCH_BACKOFF.iter().enumerate().take(LAUNCH_ATTEMPTS as usize) {
            match Self::launch_engine().await {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "engine launch failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(*backoff).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("engine launch failed with no recorded error")))
    }

    /// Probe the current handle with a cheap metadata call; destroy and
    /// relaunch if the probe fails, so every render starts from a live
    /// engine.
    async fn ensure_engine(&self) -> anyhow::Result<()> {
        let mut guard = self.engine.lock().await;

        if let Some(handle) = guard.as_ref() {
            if handle.browser.version().await.is_ok() {
                return Ok(());
            }
            tracing::warn!("engine handle failed health probe, relaunching");
            *guard = None;
        }

        let handle = Self::launch_with_retry().await.context("engine launch exhausted retries")?;
        *guard = Some(handle);
        Ok(())
    }

    async fn render_on_page(page: &Page, request: &RenderRequest) -> anyhow::Result<Bytes> {
        page.set_user_agent(USER_AGENT).await.context("failed to set user agent")?;
        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(request.width as i64)
                .height(request.height as i64)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(|e| anyhow!(e))?,
        )
        .await
        .context("failed to set viewport")?;

        page.goto(normalize_url(&request.url)).await.context("navigation failed")?;
        page.wait_for_navigation().await.context("networkidle wait failed")?;

        tokio::time::sleep(LATE_CONTENT_WAIT).await;

        let format = match request.format {
            crate::types::Format::Png => CaptureScreenshotFormat::Png,
            crate::types::Format::Jpeg => CaptureScreenshotFormat::Jpeg,
        };

        let mut params = CaptureScreenshotParams::builder().format(format).capture_beyond_viewport(request.full_page);
        if matches!(request.format, crate::types::Format::Jpeg) {
            params = params.quality(request.quality as i64);
        }

        let bytes = page
            .screenshot(params.build())
            .await
            .context("screenshot capture failed")?;

        Ok(Bytes::from(bytes))
    }
}

impl Default for ChromiumRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn warm(&self) -> anyhow::Result<()> {
        self.ensure_engine().await
    }

    async fn render(&self, request: RenderRequest) -> Result<Bytes> {
        self.ensure_engine().await.map_err(RenderError)?;

        let browser = {
            let guard = self.engine.lock().await;
            guard.as_ref().expect("ensure_engine just populated this").browser.clone()
        };

        let timeout = request.timeout;
        // Opening the page and rendering on it share one deadline, so a slow
        // page can't consume two independent timeout budgets back to back.
        // The page handle is stashed here as soon as it opens so it can
        // still be closed below even if the deadline fires mid-render.
        let page_holder: Arc<Mutex<Option<Page>>> = Arc::new(Mutex::new(None));
        let holder = page_holder.clone();

        let result = tokio::time::timeout(timeout, async move {
            let page = browser.new_page("about:blank").await.context("failed to open page")?;
            *holder.lock().await = Some(page.clone());
            Self::render_on_page(&page, &request).await
        })
        .await
        .map_err(|_| anyhow!("render timed out"))
        .and_then(|inner| inner);

        // The page context is closed on every exit path, success, failure,
        // or timeout.
        if let Some(page) = page_holder.lock().await.take() {
            if let Err(e) = page.close().await {
                tracing::warn!(error = %e, "failed to close page context");
            }
        }

        result.map_err(RenderError)
    }

    async fn close(&self) {
        if let Some(handle) = self.engine.lock().await.take() {
            if let Err(e) = handle.browser.close().await {
                tracing::warn!(error = %e, "failed to close chromium engine cleanly");
            }
        }
    }
}
