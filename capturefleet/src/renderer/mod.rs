//! Renderer.
//!
//! A capability trait shaped like `batcher::http::HttpClient`: one
//! production implementation driving a real engine, one mock used
//! throughout the coordinator's tests. `warm` is split out from `render` so
//! the worker runtime can force engine launch (and its retry budget) once
//! at startup, before the first message is ever handled.

pub mod chromium;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RenderError;
use crate::types::Format;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub quality: u8,
    pub full_page: bool,
    pub timeout: Duration,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<Bytes>;

    /// Launch (or verify) the engine handle before the worker starts taking
    /// traffic. A failure here is fatal for the process - the engine launch
    /// retry budget is already spent inside this call, so there is nothing
    /// left to fall back to.
    async fn warm(&self) -> anyhow::Result<()>;

    /// Release engine resources. Called once, on worker shutdown.
    async fn close(&self);
}

/// Trim whitespace and prepend `https://` if neither `http://` nor
/// `https://` is present. A free function so both the Renderer and the
/// Coordinator's validation step can share it without either depending on
/// the other.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prepends_https_when_missing() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("  example.com  "), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
    }
}
