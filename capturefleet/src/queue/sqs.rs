//! Production `Queue` backed by SQS.
//!
//! The DLQ (`maxReceiveCount = 3`) is a redrive policy configured on the
//! queue itself at provisioning time, not enforced here.

use async_trait::async_trait;
use aws_sdk_sqs::Client;

use super::{Message, Queue};

pub struct SqsQueue {
    client: Client,
    queue_url: String,
    visibility_timeout: std::time::Duration,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>, visibility_timeout: std::time::Duration) -> Self {
        Self { client, queue_url: queue_url.into(), visibility_timeout }
    }
}

#[async_trait]
impl Queue for SqsQueue {
    async fn receive(&self, max_messages: usize, wait_time: std::time::Duration) -> anyhow::Result<Vec<Message>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.min(10) as i32)
            .wait_time_seconds(wait_time.as_secs() as i32)
            .visibility_timeout(self.visibility_timeout.as_secs() as i32)
            .send()
            .await?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                let receipt_handle = m.receipt_handle()?.to_string();
                let body = m.body()?.to_string();
                Some(Message { receipt_handle, body })
            })
            .collect())
    }

    async fn ack(&self, receipt_handle: &str) -> anyhow::Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await?;
        Ok(())
    }
}
