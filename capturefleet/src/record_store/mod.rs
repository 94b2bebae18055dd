//! Record Store Adapter.
//!
//! Conditional create, point read, atomic status update, and a
//! `(status, createdAt)` secondary-index query over the per-request record.
//! Conditional *transitions* (e.g. "only claim if not already `success`")
//! are the Coordinator's job, not the adapter's.

pub mod dynamodb;
pub mod in_memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RecordStoreError;
use crate::types::{RequestRecord, Status, StatusPatch};

pub type Result<T> = std::result::Result<T, RecordStoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Atomic insert. When `only_if_absent` is set, fails with
    /// `RecordStoreError::AlreadyExists` if the primary key is already
    /// present.
    async fn create(&self, record: RequestRecord, only_if_absent: bool) -> Result<()>;

    /// Point read by primary key.
    async fn get(&self, id: Uuid) -> Result<Option<RequestRecord>>;

    /// Sets `status`, `updatedAt`, and the caller-supplied subset of patch
    /// fields in a single atomic write. Not conditional on the prior status -
    /// a stale-owner takeover requires this update to succeed regardless of
    /// current status.
    async fn update_status(&self, id: Uuid, new_status: Status, patch: StatusPatch) -> Result<()>;

    /// Descending-`createdAt` scan of the `(status, createdAt)` secondary
    /// index.
    async fn query_by_status(&self, status: Status, limit: usize) -> Result<Vec<RequestRecord>>;
}
