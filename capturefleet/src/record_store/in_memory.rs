//! In-memory record store used by the coordinator's unit and scenario tests.
//!
//! Grounded on `batcher::storage::in_memory::InMemoryStorage`: a
//! `tokio::sync::Mutex`-guarded map standing in for the production backend,
//! reproducing the same conditional semantics the real adapter must provide.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RecordStore, Result};
use crate::error::RecordStoreError;
use crate::types::{RequestRecord, Status, StatusPatch};

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<Uuid, RequestRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: RequestRecord, only_if_absent: bool) -> Result<()> {
        let mut records = self.records.lock().await;
        if only_if_absent && records.contains_key(&record.id) {
            return Err(RecordStoreError::AlreadyExists);
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RequestRecord>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, new_status: Status, patch: StatusPatch) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&id).ok_or(RecordStoreError::NotFound)?;
        record.status = new_status;
        record.updated_at = Utc::now();
        if let Some(v) = patch.object_url {
            record.object_url = Some(v);
        }
        if let Some(v) = patch.object_key {
            record.object_key = Some(v);
        }
        if let Some(v) = patch.error_message {
            record.error_message = Some(v);
        }
        if let Some(v) = patch.width {
            record.width = v;
        }
        if let Some(v) = patch.height {
            record.height = v;
        }
        if let Some(v) = patch.format {
            record.format = v;
        }
        if let Some(v) = patch.render_ms {
            record.render_ms = Some(v);
        }
        Ok(())
    }

    async fn query_by_status(&self, status: Status, limit: usize) -> Result<Vec<RequestRecord>> {
        let records = self.records.lock().await;
        let mut matching: Vec<RequestRecord> = records.values().filter(|r| r.status == status).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}
