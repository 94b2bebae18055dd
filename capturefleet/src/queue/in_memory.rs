//! In-memory queue used by worker-runtime and coordinator tests.
//!
//! Models at-least-once delivery: a message stays "in flight" after
//! `receive` and only disappears on `ack`. If nothing acks it, a test can
//! call [`InMemoryQueue::redeliver`] to simulate the queue's visibility
//! timeout expiring and putting it back at the head of the line.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Message, Queue};

#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<String>>,
    in_flight: Mutex<HashMap<String, String>>,
    /// Test-only counter of how many times each message has been received -
    /// never consulted by the Coordinator, only by tests asserting DLQ-like
    /// behavior at the harness level.
    receive_counts: Mutex<HashMap<String, u32>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, body: impl Into<String>) -> String {
        let receipt = Uuid::new_v4().to_string();
        self.pending.lock().push_back(body.into());
        receipt
    }

    pub fn receive_count(&self, receipt_handle: &str) -> u32 {
        *self.receive_counts.lock().get(receipt_handle).unwrap_or(&0)
    }

    /// Simulate the visibility timeout expiring on an unacked message.
    pub fn redeliver(&self, receipt_handle: &str) {
        if let Some(body) = self.in_flight.lock().remove(receipt_handle) {
            self.pending.lock().push_back(body);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty() && self.in_flight.lock().is_empty()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn receive(&self, max_messages: usize, _wait_time: std::time::Duration) -> anyhow::Result<Vec<Message>> {
        let mut out = Vec::new();
        let mut pending = self.pending.lock();
        let mut in_flight = self.in_flight.lock();
        let mut counts = self.receive_counts.lock();

        while out.len() < max_messages {
            let Some(body) = pending.pop_front() else { break };
            let receipt_handle = Uuid::new_v4().to_string();
            in_flight.insert(receipt_handle.clone(), body.clone());
            *counts.entry(receipt_handle.clone()).or_insert(0) += 1;
            out.push(Message { receipt_handle, body });
        }

        Ok(out)
    }

    async fn ack(&self, receipt_handle: &str) -> anyhow::Result<()> {
        self.in_flight.lock().remove(receipt_handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_removes_message_permanently() {
        let queue = InMemoryQueue::new();
        queue.enqueue(r#"{"url":"example.com"}"#);
        let messages = queue.receive(5, std::time::Duration::ZERO).await.unwrap();
        assert_eq!(messages.len(), 1);
        queue.ack(&messages[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn unacked_message_can_be_redelivered() {
        let queue = InMemoryQueue::new();
        queue.enqueue(r#"{"url":"example.com"}"#);
        let first = queue.receive(5, std::time::Duration::ZERO).await.unwrap();
        queue.redeliver(&first[0].receipt_handle);
        let second = queue.receive(5, std::time::Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
    }
}
