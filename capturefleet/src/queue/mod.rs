//! Queue Adapter.
//!
//! Long-poll receive with a configurable batch size and visibility timeout;
//! ack = delete. Retry bookkeeping and the DLQ redrive policy live on the
//! queue side - the Coordinator never tracks attempt counts.

pub mod in_memory;
pub mod sqs;

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct Message {
    pub receipt_handle: String,
    pub body: String,
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Long-poll receive, up to `max_messages`, waiting up to `wait_time`
    /// (up to 20s).
    async fn receive(&self, max_messages: usize, wait_time: std::time::Duration) -> anyhow::Result<Vec<Message>>;

    /// Ack = delete. Per-message, never batched: a failure on one message in
    /// a batch must never block acking its siblings.
    async fn ack(&self, receipt_handle: &str) -> anyhow::Result<()>;
}
