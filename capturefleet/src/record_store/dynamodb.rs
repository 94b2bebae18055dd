//! Production `RecordStore` backed by DynamoDB.

use anyhow::{anyhow, Context};
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::{RecordStore, Result};
use crate::error::RecordStoreError;
use crate::types::{Format, RequestRecord, Status, StatusPatch};

/// GSI name backing the `(status, createdAt)` secondary index.
const STATUS_CREATED_AT_INDEX: &str = "status-createdAt-index";

pub struct DynamoRecordStore {
    client: Client,
    table: String,
}

impl DynamoRecordStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self { client, table: table.into() }
    }
}

fn status_str(status: Status) -> &'static str {
    match status {
        Status::Processing => "processing",
        Status::ConsumerProcessing => "consumerProcessing",
        Status::Success => "success",
        Status::Failed => "failed",
    }
}

fn parse_status(s: &str) -> anyhow::Result<Status> {
    Ok(match s {
        "processing" => Status::Processing,
        "consumerProcessing" => Status::ConsumerProcessing,
        "success" => Status::Success,
        "failed" => Status::Failed,
        other => return Err(anyhow!("unknown status {other}")),
    })
}

fn item_from_record(record: &RequestRecord) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        ("id".to_string(), AttributeValue::S(record.id.to_string())),
        ("url".to_string(), AttributeValue::S(record.url.clone())),
        ("status".to_string(), AttributeValue::S(status_str(record.status).to_string())),
        ("width".to_string(), AttributeValue::N(record.width.to_string())),
        ("height".to_string(), AttributeValue::N(record.height.to_string())),
        ("format".to_string(), AttributeValue::S(record.format.as_str().to_string())),
        ("quality".to_string(), AttributeValue::N(record.quality.to_string())),
        ("fullPage".to_string(), AttributeValue::Bool(record.full_page)),
        ("createdAt".to_string(), AttributeValue::S(record.created_at.to_rfc3339())),
        ("updatedAt".to_string(), AttributeValue::S(record.updated_at.to_rfc3339())),
    ]);
    if let Some(v) = &record.object_url {
        item.insert("objectUrl".to_string(), AttributeValue::S(v.clone()));
    }
    if let Some(v) = &record.object_key {
        item.insert("objectKey".to_string(), AttributeValue::S(v.clone()));
    }
    if let Some(v) = &record.error_message {
        item.insert("errorMessage".to_string(), AttributeValue::S(v.clone()));
    }
    if let Some(v) = record.render_ms {
        item.insert("renderMs".to_string(), AttributeValue::N(v.to_string()));
    }
    item
}

fn record_from_item(item: &HashMap<String, AttributeValue>) -> anyhow::Result<RequestRecord> {
    let get_s = |k: &str| -> anyhow::Result<String> {
        item.get(k)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .with_context(|| format!("missing string field {k}"))
    };
    let get_n = |k: &str| -> anyhow::Result<u32> {
        item.get(k)
            .and_then(|v| v.as_n().ok())
            .with_context(|| format!("missing numeric field {k}"))?
            .parse()
            .with_context(|| format!("field {k} is not a u32"))
    };
    let get_opt_s = |k: &str| -> Option<String> { item.get(k).and_then(|v| v.as_s().ok()).cloned() };
    let get_opt_n = |k: &str| -> Option<u32> { item.get(k).and_then(|v| v.as_n().ok()).and_then(|n| n.parse().ok()) };
    let get_bool = |k: &str| -> bool { item.get(k).and_then(|v| v.as_bool().ok()).copied().unwrap_or(false) };
    let get_dt = |k: &str| -> anyhow::Result<DateTime<Utc>> {
        let s = get_s(k)?;
        DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)).with_context(|| format!("field {k} is not rfc3339"))
    };

    Ok(RequestRecord {
        id: get_s("id")?.parse().context("id is not a uuid")?,
        url: get_s("url")?,
        status: parse_status(&get_s("status")?)?,
        width: get_n("width")?,
        height: get_n("height")?,
        format: match get_s("format")?.as_str() {
            "png" => Format::Png,
            "jpeg" => Format::Jpeg,
            other => return Err(anyhow!("unknown format {other}")),
        },
        quality: get_n("quality")? as u8,
        full_page: get_bool("fullPage"),
        object_url: get_opt_s("objectUrl"),
        object_key: get_opt_s("objectKey"),
        error_message: get_opt_s("errorMessage"),
        render_ms: get_opt_n("renderMs"),
        created_at: get_dt("createdAt")?,
        updated_at: get_dt("updatedAt")?,
    })
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn create(&self, record: RequestRecord, only_if_absent: bool) -> Result<()> {
        let mut request = self.client.put_item().table_name(&self.table).set_item(Some(item_from_record(&record)));
        if only_if_absent {
            request = request.condition_expression("attribute_not_exists(id)");
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(e)) if matches!(e.err(), PutItemError::ConditionalCheckFailedException(_)) => {
                Err(RecordStoreError::AlreadyExists)
            }
            Err(e) => Err(classify_sdk_error(e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<RequestRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        match output.item() {
            Some(item) => record_from_item(item).map(Some).map_err(RecordStoreError::Fatal),
            None => Ok(None),
        }
    }

    async fn update_status(&self, id: Uuid, new_status: Status, patch: StatusPatch) -> Result<()> {
        let now = Utc::now();
        let mut names = HashMap::new();
        let mut values = HashMap::new();
        let mut sets = vec!["#status = :status".to_string(), "#updatedAt = :updatedAt".to_string()];

        names.insert("#status".to_string(), "status".to_string());
        names.insert("#updatedAt".to_string(), "updatedAt".to_string());
        values.insert(":status".to_string(), AttributeValue::S(status_str(new_status).to_string()));
        values.insert(":updatedAt".to_string(), AttributeValue::S(now.to_rfc3339()));

        macro_rules! set_field {
            ($field:expr, $name:literal, $attr:expr) => {
                if let Some(v) = $field {
                    sets.push(format!("#{0} = :{0}", $name));
                    names.insert(format!("#{}", $name), $name.to_string());
                    values.insert(format!(":{}", $name), $attr(v));
                }
            };
        }

        set_field!(patch.object_url, "objectUrl", AttributeValue::S);
        set_field!(patch.object_key, "objectKey", AttributeValue::S);
        set_field!(patch.error_message, "errorMessage", AttributeValue::S);
        set_field!(patch.width, "width", |v: u32| AttributeValue::N(v.to_string()));
        set_field!(patch.height, "height", |v: u32| AttributeValue::N(v.to_string()));
        set_field!(patch.render_ms, "renderMs", |v: u32| AttributeValue::N(v.to_string()));
        if let Some(format) = patch.format {
            sets.push("#format = :format".to_string());
            names.insert("#format".to_string(), "format".to_string());
            values.insert(":format".to_string(), AttributeValue::S(format.as_str().to_string()));
        }

        let update_expression = format!("SET {}", sets.join(", "));

        self.client
            .update_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(id.to_string()))
            .update_expression(update_expression)
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(())
    }

    async fn query_by_status(&self, status: Status, limit: usize) -> Result<Vec<RequestRecord>> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .index_name(STATUS_CREATED_AT_INDEX)
            .key_condition_expression("#status = :status")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(status_str(status).to_string()))
            .scan_index_forward(false)
            .limit(limit as i32)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        output
            .items()
            .iter()
            .map(|item| record_from_item(item).map_err(RecordStoreError::Fatal))
            .collect()
    }
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> RecordStoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let is_throttling_code = matches!(
        err.code(),
        Some("ThrottlingException") | Some("ProvisionedThroughputExceededException") | Some("RequestLimitExceeded")
    );

    if is_throttling_code || matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        RecordStoreError::Throttled(err.to_string())
    } else {
        RecordStoreError::Fatal(anyhow!(err.to_string()))
    }
}
