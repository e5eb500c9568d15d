//! DynamoDB-backed store.
//!
//! Table layout: partition key `short_id` (S), plus `original_url` (S),
//! `created_at` (S, RFC 3339), `expire_at` (N) and `clicks` (N).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    config::Region,
    error::DisplayErrorContext,
    types::{AttributeValue, ReturnValue},
    Client,
};
use chrono::{DateTime, Utc};

use super::{ScanPage, StoreResult, UrlStore};
use crate::{
    config::DynamoConfig,
    error::StoreError,
    models::{UrlPatch, UrlRecord},
};

const KEY: &str = "short_id";

#[derive(Clone, Debug)]
pub struct DynamoStore {
    client: Client,
    table: String,
}

impl DynamoStore {
    /// Build a client from the default AWS credential chain and the
    /// configured region / endpoint.
    pub async fn connect(config: &DynamoConfig) -> anyhow::Result<Self> {
        let region = config
            .region
            .clone()
            .ok_or_else(|| anyhow::anyhow!("AWS_REGION must be set for the dynamodb backend"))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        tracing::info!(table = %config.table, "Connected DynamoDB client");
        Ok(Self::new(Client::new(&sdk_config), config.table.clone()))
    }

    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    fn key(short_id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([(KEY.to_owned(), AttributeValue::S(short_id.to_owned()))])
    }
}

fn backend(err: impl std::error::Error) -> StoreError {
    StoreError::Backend(DisplayErrorContext(err).to_string())
}

fn to_item(record: &UrlRecord) -> HashMap<String, AttributeValue> {
    HashMap::from([
        (KEY.to_owned(), AttributeValue::S(record.short_id.clone())),
        (
            "original_url".to_owned(),
            AttributeValue::S(record.original_url.clone()),
        ),
        (
            "created_at".to_owned(),
            AttributeValue::S(record.created_at.to_rfc3339()),
        ),
        (
            "expire_at".to_owned(),
            AttributeValue::N(record.expire_at.to_string()),
        ),
        ("clicks".to_owned(), AttributeValue::N(record.clicks.to_string())),
    ])
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> StoreResult<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Corrupt(format!("missing string attribute {name}")))
}

fn number_attr(item: &HashMap<String, AttributeValue>, name: &str) -> StoreResult<i64> {
    match item.get(name) {
        // Older rows may lack the attribute entirely.
        None => Ok(0),
        Some(value) => value
            .as_n()
            .ok()
            .and_then(|n| n.parse::<i64>().ok())
            .ok_or_else(|| StoreError::Corrupt(format!("attribute {name} is not an integer"))),
    }
}

fn from_item(item: &HashMap<String, AttributeValue>) -> StoreResult<UrlRecord> {
    let created_at = string_attr(item, "created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt(format!("bad created_at {created_at:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(UrlRecord {
        short_id: string_attr(item, KEY)?,
        original_url: string_attr(item, "original_url")?,
        created_at,
        expire_at: number_attr(item, "expire_at")?,
        clicks: number_attr(item, "clicks")?,
    })
}

/// `SET` expression, attribute names and values for a partial update.
fn update_expression(
    patch: &UrlPatch,
) -> (
    String,
    HashMap<String, String>,
    HashMap<String, AttributeValue>,
) {
    let mut clauses = Vec::new();
    let mut names = HashMap::new();
    let mut values = HashMap::new();

    if let Some(url) = &patch.original_url {
        clauses.push("#url = :u");
        names.insert("#url".to_owned(), "original_url".to_owned());
        values.insert(":u".to_owned(), AttributeValue::S(url.clone()));
    }
    if let Some(expire_at) = patch.expire_at {
        clauses.push("#exp = :e");
        names.insert("#exp".to_owned(), "expire_at".to_owned());
        values.insert(":e".to_owned(), AttributeValue::N(expire_at.to_string()));
    }

    (format!("SET {}", clauses.join(", ")), names, values)
}

#[async_trait]
impl UrlStore for DynamoStore {
    async fn put_if_absent(&self, record: &UrlRecord) -> StoreResult<()> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(record)))
            .condition_expression("attribute_not_exists(short_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::KeyExists(record.short_id.clone()))
            }
            Err(err) => Err(backend(err)),
        }
    }

    async fn put(&self, record: &UrlRecord) -> StoreResult<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(record)))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, short_id: &str) -> StoreResult<Option<UrlRecord>> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(short_id)))
            .send()
            .await
            .map_err(backend)?;

        out.item().map(from_item).transpose()
    }

    async fn increment(&self, short_id: &str, delta: i64) -> StoreResult<i64> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(short_id)))
            .update_expression("SET clicks = clicks + :incr")
            .condition_expression("attribute_exists(short_id)")
            .expression_attribute_values(":incr", AttributeValue::N(delta.to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                return Err(StoreError::NotFound(short_id.to_owned()));
            }
            Err(err) => return Err(backend(err)),
        };

        let attributes = out
            .attributes()
            .ok_or_else(|| StoreError::Corrupt("increment returned no attributes".into()))?;
        number_attr(attributes, "clicks")
    }

    async fn update_fields(&self, short_id: &str, patch: &UrlPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let (expression, names, values) = update_expression(patch);
        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(short_id)))
            .update_expression(expression)
            .condition_expression("attribute_exists(short_id)")
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::NotFound(short_id.to_owned()))
            }
            Err(err) => Err(backend(err)),
        }
    }

    async fn delete(&self, short_id: &str) -> StoreResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(short_id)))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let out = self
            .client
            .scan()
            .table_name(&self.table)
            .limit(limit)
            .set_exclusive_start_key(start_after.map(Self::key))
            .send()
            .await
            .map_err(backend)?;

        let records = out
            .items()
            .iter()
            .map(from_item)
            .collect::<StoreResult<Vec<_>>>()?;

        let last_key = out
            .last_evaluated_key()
            .and_then(|key| key.get(KEY))
            .and_then(|v| v.as_s().ok())
            .cloned();

        Ok(ScanPage { records, last_key })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }
}
