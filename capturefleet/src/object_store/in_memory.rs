//! In-memory object store used by tests.

use std::collections::{HashMap, VecDeque};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{ObjectStore, Result};
use crate::error::UploadError;

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    put_count: Mutex<HashMap<String, u32>>,
    /// Canned failures `put` should return before falling back to its
    /// normal succeed-and-store behavior - the same queued-response shape
    /// `MockRenderer` uses, so `UploadError` can be exercised the same way
    /// `RenderError` already is.
    pending_failures: Mutex<VecDeque<String>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().get(key).cloned()
    }

    /// Number of times `put` has been called for `key` - used to assert the
    /// "last writer wins, overwrite is safe" hazard analysis in tests.
    pub fn put_count(&self, key: &str) -> u32 {
        *self.put_count.lock().get(key).unwrap_or(&0)
    }

    /// Make the next `put` call fail with `message` instead of storing
    /// anything. FIFO order across calls, same as `MockRenderer::push_failure`.
    pub fn push_failure(&self, message: &str) {
        self.pending_failures.lock().push_back(message.to_string());
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        if let Some(message) = self.pending_failures.lock().pop_front() {
            return Err(UploadError(anyhow!(message)));
        }
        self.objects.lock().insert(key.to_string(), (bytes, content_type.to_string()));
        *self.put_count.lock().entry(key.to_string()).or_insert(0) += 1;
        Ok(format!("https://objects.test/{key}"))
    }
}
