//! Wire and record types shared across adapters and the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Image format a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Png,
    Jpeg,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Png => "png",
            Format::Jpeg => "jpeg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Format::Png => "image/png",
            Format::Jpeg => "image/jpeg",
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::Png
    }
}

/// Lifecycle status of a request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Processing,
    ConsumerProcessing,
    Success,
    Failed,
}

/// The per-request record kept in the record store, keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub url: String,
    pub status: Status,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub quality: u8,
    pub full_page: bool,
    pub object_url: Option<String>,
    pub object_key: Option<String>,
    pub error_message: Option<String>,
    pub render_ms: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestRecord {
    /// A brand-new record in the `processing` state, as the enqueuer (or, in
    /// the absent-record path, the coordinator itself) would create it.
    pub fn new_processing(id: Uuid, url: String, params: &ScreenshotParams, now: DateTime<Utc>) -> Self {
        Self {
            id,
            url,
            status: Status::Processing,
            width: params.width,
            height: params.height,
            format: params.format,
            quality: params.quality,
            full_page: params.full_page,
            object_url: None,
            object_key: None,
            error_message: None,
            render_ms: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A patch applied as part of `update_status`. Only the fields relevant to
/// the transition being made are set; the rest are left alone by the
/// adapter.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub object_url: Option<String>,
    pub object_key: Option<String>,
    pub error_message: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<Format>,
    pub render_ms: Option<u32>,
}

/// Inbound queue message body. Unknown fields are ignored by `serde`'s
/// default behavior (fields not declared here are simply dropped).
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotMessage {
    pub url: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<Uuid>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<Format>,
    pub quality: Option<u8>,
    #[serde(rename = "fullPage")]
    pub full_page: Option<bool>,
}

/// Fully-defaulted render parameters, after step 1 (validate) has run.
#[derive(Debug, Clone, Copy)]
pub struct ScreenshotParams {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub quality: u8,
    pub full_page: bool,
}
