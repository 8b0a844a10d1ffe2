//! DynamoDB-backed table store and the hybrid store façade built on it.
//!
//! Rows live in a table with a single binary partition key. Values that
//! exceed [`ITEM_MAX`] together with their key are redirected to the
//! blob store, leaving only [`OVERSIZE_SENTINEL`] in the row.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::describe_table::DescribeTableError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, PutRequest,
    ScalarAttributeType, TableStatus, WriteRequest,
};
use aws_sdk_dynamodb::Client;

use crate::config::DynamoConfig;
use crate::error::{Error, Result};
use crate::limits::{ITEM_MAX, OVERSIZE_SENTINEL, WORKER_NUM};
use crate::metrics::BatchWriteMetrics;
use crate::store::batch::DynamoBatch;
use crate::store::blob::{BlobStore, S3BlobStore};
use crate::store::writer::WriterPool;
use crate::store::{KvStore, NullIterator};

const ATTR_KEY: &str = "Key";
const ATTR_VAL: &str = "Val";

/// One table record: an opaque key mapped to an opaque value.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRow {
    pub key: Vec<u8>,
    pub val: Vec<u8>,
}

impl TableRow {
    pub fn new(key: Vec<u8>, val: Vec<u8>) -> Self {
        Self { key, val }
    }

    /// Combined key+value size in bytes.
    pub fn size(&self) -> usize {
        self.key.len() + self.val.len()
    }
}

/// Lifecycle state of the backing table.
#[derive(Clone, Debug, PartialEq)]
pub enum TableState {
    Active,
    Creating,
    Updating,
    Deleting,
    Archiving,
    Archived,
    Missing,
    Other(String),
}

impl std::fmt::Display for TableState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TableState::Active => write!(f, "active"),
            TableState::Creating => write!(f, "creating"),
            TableState::Updating => write!(f, "updating"),
            TableState::Deleting => write!(f, "deleting"),
            TableState::Archiving => write!(f, "archiving"),
            TableState::Archived => write!(f, "archived"),
            TableState::Missing => write!(f, "missing"),
            TableState::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Row-level operations against the backing table.
///
/// One call maps to one request; the retry-until-empty discipline for
/// bulk writes lives in the writer pool.
#[async_trait]
pub trait TableClient: Send + Sync {
    /// Current table state, `Missing` if the table does not exist.
    async fn status(&self) -> Result<TableState>;

    /// Create the table with a single binary partition key.
    async fn create(&self) -> Result<()>;

    /// Insert or replace one row.
    async fn put_row(&self, row: TableRow) -> Result<()>;

    /// Strongly-consistent read of one row. A row whose value attribute
    /// is absent decodes to an empty value.
    async fn get_row(&self, key: &[u8]) -> Result<Option<TableRow>>;

    /// Delete one row.
    async fn delete_row(&self, key: &[u8]) -> Result<()>;

    /// One bulk-write attempt. Returns the rows the table reported as
    /// unprocessed; the caller resubmits those in the same shape.
    async fn write_rows(&self, rows: &[TableRow]) -> Result<Vec<TableRow>>;

    /// Drop the whole table. Operational tooling only.
    async fn delete_table(&self) -> Result<()>;
}

/// [`TableClient`] over the DynamoDB SDK.
pub struct DynamoClient {
    client: Client,
    table_name: String,
}

impl DynamoClient {
    pub fn new(sdk_config: &SdkConfig, config: &DynamoConfig) -> Self {
        let conf = aws_sdk_dynamodb::config::Builder::from(sdk_config)
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .build();
        Self {
            client: Client::from_conf(conf),
            table_name: config.table_name.clone(),
        }
    }

    fn key_attr(key: &[u8]) -> AttributeValue {
        AttributeValue::B(Blob::new(key.to_vec()))
    }

    fn row_from_item(
        item: &std::collections::HashMap<String, AttributeValue>,
    ) -> Result<TableRow> {
        let key = item
            .get(ATTR_KEY)
            .ok_or_else(|| Error::Decode("row is missing the Key attribute".into()))?
            .as_b()
            .map_err(|_| Error::Decode("Key attribute is not binary".into()))?
            .as_ref()
            .to_vec();
        let val = match item.get(ATTR_VAL) {
            None => Vec::new(),
            Some(attr) => attr
                .as_b()
                .map_err(|_| Error::Decode("Val attribute is not binary".into()))?
                .as_ref()
                .to_vec(),
        };
        Ok(TableRow { key, val })
    }

    fn is_resource_not_found(err: &SdkError<DescribeTableError>) -> bool {
        match err {
            SdkError::ServiceError(se) => {
                matches!(se.err(), DescribeTableError::ResourceNotFoundException(_))
            }
            _ => false,
        }
    }
}

#[async_trait]
impl TableClient for DynamoClient {
    async fn status(&self) -> Result<TableState> {
        let response = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await;

        match response {
            Ok(output) => {
                let status = output
                    .table()
                    .and_then(|t| t.table_status())
                    .ok_or_else(|| Error::Decode("table description without a status".into()))?;
                Ok(match status {
                    TableStatus::Active => TableState::Active,
                    TableStatus::Creating => TableState::Creating,
                    TableStatus::Updating => TableState::Updating,
                    TableStatus::Deleting => TableState::Deleting,
                    TableStatus::Archiving => TableState::Archiving,
                    TableStatus::Archived => TableState::Archived,
                    other => TableState::Other(other.as_str().to_string()),
                })
            }
            Err(err) if Self::is_resource_not_found(&err) => Ok(TableState::Missing),
            Err(err) => Err(Error::Table(format!("DescribeTable failed: {err}"))),
        }
    }

    async fn create(&self) -> Result<()> {
        let key_def = AttributeDefinition::builder()
            .attribute_name(ATTR_KEY)
            .attribute_type(ScalarAttributeType::B)
            .build()
            .map_err(|e| Error::Table(e.to_string()))?;
        let key_schema = KeySchemaElement::builder()
            .attribute_name(ATTR_KEY)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| Error::Table(e.to_string()))?;

        self.client
            .create_table()
            .table_name(&self.table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .attribute_definitions(key_def)
            .key_schema(key_schema)
            .send()
            .await
            .map_err(|e| Error::Table(format!("CreateTable failed: {e}")))?;

        tracing::info!(table = %self.table_name, "created the table");
        Ok(())
    }

    async fn put_row(&self, row: TableRow) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(ATTR_KEY, AttributeValue::B(Blob::new(row.key)))
            .item(ATTR_VAL, AttributeValue::B(Blob::new(row.val)))
            .send()
            .await
            .map_err(|e| Error::Table(format!("PutItem failed: {e}")))?;
        Ok(())
    }

    async fn get_row(&self, key: &[u8]) -> Result<Option<TableRow>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(ATTR_KEY, Self::key_attr(key))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| Error::Table(format!("GetItem failed: {e}")))?;

        match output.item() {
            None => Ok(None),
            Some(item) => Ok(Some(Self::row_from_item(item)?)),
        }
    }

    async fn delete_row(&self, key: &[u8]) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(ATTR_KEY, Self::key_attr(key))
            .send()
            .await
            .map_err(|e| Error::Table(format!("DeleteItem failed: {e}")))?;
        Ok(())
    }

    async fn write_rows(&self, rows: &[TableRow]) -> Result<Vec<TableRow>> {
        let mut requests = Vec::with_capacity(rows.len());
        for row in rows {
            let put = PutRequest::builder()
                .item(ATTR_KEY, AttributeValue::B(Blob::new(row.key.clone())))
                .item(ATTR_VAL, AttributeValue::B(Blob::new(row.val.clone())))
                .build()
                .map_err(|e| Error::Table(e.to_string()))?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }

        let output = self
            .client
            .batch_write_item()
            .request_items(&self.table_name, requests)
            .send()
            .await
            .map_err(|e| Error::Table(format!("BatchWriteItem failed: {e}")))?;

        let mut unprocessed = Vec::new();
        if let Some(remaining) = output
            .unprocessed_items()
            .and_then(|m| m.get(&self.table_name))
        {
            for request in remaining {
                let put = request
                    .put_request()
                    .ok_or_else(|| Error::Decode("unprocessed entry without a put request".into()))?;
                unprocessed.push(Self::row_from_item(put.item())?);
            }
        }
        Ok(unprocessed)
    }

    async fn delete_table(&self) -> Result<()> {
        self.client
            .delete_table()
            .table_name(&self.table_name)
            .send()
            .await
            .map_err(|e| Error::Table(format!("DeleteTable failed: {e}")))?;
        tracing::info!(table = %self.table_name, "deleted the table");
        Ok(())
    }
}

/// Hybrid key-value store fronting a DynamoDB table with an S3 bucket
/// for oversized values.
pub struct DynamoStore {
    config: DynamoConfig,
    table: Arc<dyn TableClient>,
    blob: Arc<dyn BlobStore>,
    pool: WriterPool,
    metrics: Arc<OnceLock<BatchWriteMetrics>>,
}

impl DynamoStore {
    /// Open the store against real AWS backends: make sure the blob
    /// bucket exists, wait for the table to become active (creating it
    /// when missing) and spawn the writer pool.
    pub async fn open(config: DynamoConfig) -> Result<Self> {
        config.check()?;

        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        tracing::info!(bucket = %config.bucket_name(), "creating the blob store");
        let blob = Arc::new(
            S3BlobStore::connect(&sdk_config, &config.region, config.bucket_name()).await?,
        );
        let table = Arc::new(DynamoClient::new(&sdk_config, &config));
        Self::with_parts(config, table, blob).await
    }

    /// Open the store over pre-built adapters. Runs the same table
    /// initialization and pool spawn as [`open`](Self::open).
    pub async fn with_parts(
        config: DynamoConfig,
        table: Arc<dyn TableClient>,
        blob: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        config.check()?;
        wait_for_table(table.as_ref(), &config.table_name).await?;

        let metrics = Arc::new(OnceLock::new());
        let pool = WriterPool::spawn(Arc::clone(&table), Arc::clone(&metrics));
        tracing::info!(table = %config.table_name, workers = WORKER_NUM, "spawned batch write workers");

        Ok(Self {
            config,
            table,
            blob,
            pool,
            metrics,
        })
    }

    /// Handle to the blob store holding overflow values.
    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blob
    }

    /// Drop the backing table. Operational tooling only.
    pub async fn drop_table(&self) -> Result<()> {
        self.table.delete_table().await
    }

    /// Scans are unsupported; the returned iterator is always empty.
    pub fn new_iterator(&self) -> NullIterator {
        NullIterator
    }

    /// Scans are unsupported; the returned iterator is always empty.
    pub fn new_iterator_with_start(&self, _start: &[u8]) -> NullIterator {
        NullIterator
    }

    /// Scans are unsupported; the returned iterator is always empty.
    pub fn new_iterator_with_prefix(&self, _prefix: &[u8]) -> NullIterator {
        NullIterator
    }
}

/// Poll the table until it can serve, creating it when missing.
async fn wait_for_table(table: &dyn TableClient, table_name: &str) -> Result<()> {
    loop {
        match table.status().await? {
            TableState::Active => {
                tracing::info!(table = table_name, "table is active");
                return Ok(());
            }
            TableState::Missing => {
                tracing::info!(table = table_name, "table not found, creating it");
                table.create().await?;
            }
            state @ (TableState::Deleting | TableState::Archiving | TableState::Archived) => {
                return Err(Error::Init(format!(
                    "table {table_name} is unusable, status: {state}"
                )));
            }
            state => {
                tracing::info!(table = table_name, status = %state, "waiting for the table to be ready");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl KvStore for DynamoStore {
    type Batch = DynamoBatch;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }

        if key.len() + value.len() > ITEM_MAX {
            self.blob.write(key, value).await?;
            return self
                .table
                .put_row(TableRow::new(key.to_vec(), OVERSIZE_SENTINEL.to_vec()))
                .await;
        }

        self.table
            .put_row(TableRow::new(key.to_vec(), value.to_vec()))
            .await
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self.table.get_row(key).await? {
            None => Err(Error::NotFound),
            Some(row) if row.val == OVERSIZE_SENTINEL => self.blob.read(key).await,
            Some(row) => Ok(row.val),
        }
    }

    async fn has(&self, key: &[u8]) -> Result<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Deletes the row only. An overflow blob written for this key stays
    /// behind in the bucket.
    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.table.delete_row(key).await
    }

    fn new_batch(&self) -> DynamoBatch {
        DynamoBatch::new(self.pool.sender(), Arc::clone(&self.blob))
    }

    fn meter(&self, prefix: &str) {
        let _ = self.metrics.set(BatchWriteMetrics::register(prefix));
    }

    fn close(&self) {
        self.pool.close();
    }

    fn path(&self) -> String {
        format!("{}-{}", self.config.region, self.config.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{open_store, test_config, MemBlobStore, MemTableClient};

    #[tokio::test]
    async fn test_put_get_round_trip() -> Result<()> {
        let store = open_store(MemTableClient::new(), MemBlobStore::new()).await;

        store.put(b"alpha", b"beta").await?;
        assert_eq!(store.get(b"alpha").await?, b"beta".to_vec());
        assert!(store.has(b"alpha").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_key_put_is_a_noop() -> Result<()> {
        let table = MemTableClient::new();
        let store = open_store(Arc::clone(&table), MemBlobStore::new()).await;

        store.put(b"", b"value").await?;
        assert_eq!(table.row_count(), 0);
        assert!(!store.has(b"").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_values_persist_through_put() -> Result<()> {
        // Unlike batch puts, direct puts keep empty values.
        let store = open_store(MemTableClient::new(), MemBlobStore::new()).await;

        store.put(b"key", b"").await?;
        assert_eq!(store.get(b"key").await?, Vec::<u8>::new());
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_put_overflows_to_the_blob_store() -> Result<()> {
        let table = MemTableClient::new();
        let blob = MemBlobStore::new();
        let store = open_store(Arc::clone(&table), Arc::clone(&blob)).await;

        let value = vec![0x41u8; 500_000];
        store.put(b"big", &value).await?;

        assert_eq!(table.raw_val(b"big"), Some(OVERSIZE_SENTINEL.to_vec()));
        assert_eq!(blob.object(b"big"), Some(value.clone()));
        assert_eq!(store.get(b"big").await?, value);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_keys_report_not_found() -> Result<()> {
        let store = open_store(MemTableClient::new(), MemBlobStore::new()).await;

        assert_eq!(store.get(b"never-written").await, Err(Error::NotFound));
        assert!(!store.has(b"never-written").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_last_writer_wins() -> Result<()> {
        let store = open_store(MemTableClient::new(), MemBlobStore::new()).await;

        store.put(b"key", b"first").await?;
        store.put(b"key", b"second").await?;
        assert_eq!(store.get(b"key").await?, b"second".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn test_inline_overwrite_orphans_the_overflow_blob() -> Result<()> {
        let table = MemTableClient::new();
        let blob = MemBlobStore::new();
        let store = open_store(Arc::clone(&table), Arc::clone(&blob)).await;

        let value = vec![1u8; ITEM_MAX + 1];
        store.put(b"key", &value).await?;
        store.put(b"key", b"small").await?;

        assert_eq!(store.get(b"key").await?, b"small".to_vec());
        // The blob is stranded, as documented.
        assert_eq!(blob.object(b"key"), Some(value));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_the_row_but_not_the_blob() -> Result<()> {
        let table = MemTableClient::new();
        let blob = MemBlobStore::new();
        let store = open_store(Arc::clone(&table), Arc::clone(&blob)).await;

        let value = vec![2u8; ITEM_MAX + 1];
        store.put(b"key", &value).await?;
        store.delete(b"key").await?;

        assert!(!store.has(b"key").await?);
        assert_eq!(blob.object(b"key"), Some(value));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_table_is_created_and_polled_until_active() -> Result<()> {
        let table = MemTableClient::new();
        table.script_states([
            TableState::Missing,
            TableState::Creating,
            TableState::Active,
        ]);

        let store = open_store(Arc::clone(&table), MemBlobStore::new()).await;
        assert_eq!(table.creates(), 1);
        store.put(b"key", b"value").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unusable_table_state_fails_construction() {
        for state in [
            TableState::Deleting,
            TableState::Archiving,
            TableState::Archived,
        ] {
            let table = MemTableClient::new();
            table.script_states([state]);

            let result = DynamoStore::with_parts(test_config(), table, MemBlobStore::new()).await;
            assert!(matches!(result, Err(Error::Init(_))));
        }
    }

    #[tokio::test]
    async fn test_invalid_config_fails_construction() {
        let config = DynamoConfig::new("", "endpoint", "table");
        let result =
            DynamoStore::with_parts(config, MemTableClient::new(), MemBlobStore::new()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_path_names_region_and_endpoint() {
        let store = open_store(MemTableClient::new(), MemBlobStore::new()).await;
        assert_eq!(store.path(), "ap-northeast-2-http://localhost:8000");
    }

    #[tokio::test]
    async fn test_iterators_are_empty() {
        let store = open_store(MemTableClient::new(), MemBlobStore::new()).await;
        store.put(b"key", b"value").await.unwrap();

        assert_eq!(store.new_iterator().count(), 0);
        assert_eq!(store.new_iterator_with_start(b"a").count(), 0);
        assert_eq!(store.new_iterator_with_prefix(b"k").count(), 0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn round_trip(key: Vec<u8>, value: Vec<u8>) -> Vec<u8> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = open_store(MemTableClient::new(), MemBlobStore::new()).await;
                store.put(&key, &value).await.unwrap();
                store.get(&key).await.unwrap()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn test_inline_values_round_trip(
                key in proptest::collection::vec(any::<u8>(), 1..64),
                value in proptest::collection::vec(any::<u8>(), 0..1024),
            ) {
                prop_assert_eq!(round_trip(key, value.clone()), value);
            }

            #[test]
            fn test_oversized_values_round_trip(
                key in proptest::collection::vec(any::<u8>(), 1..32),
                fill in any::<u8>(),
                extra in 0usize..64,
            ) {
                let value = vec![fill; ITEM_MAX + 1 + extra];
                prop_assert_eq!(round_trip(key, value.clone()), value);
            }
        }
    }
}
