//! Object Store Adapter.

pub mod in_memory;
pub mod key;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::UploadError;

pub type Result<T> = std::result::Result<T, UploadError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent put: a second `put` under the same key succeeds and
    /// overwrites - the Coordinator only reaches here with exclusive-enough
    /// claim of the requestId that overwrite is safe.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String>;
}
