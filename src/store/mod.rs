pub mod batch;
pub mod blob;
pub mod table;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::DynamoBatch;
pub use blob::{BlobStore, S3BlobStore};
pub use table::{DynamoClient, DynamoStore, TableClient, TableRow, TableState};
pub use writer::{BatchRequest, WriterPool};

use async_trait::async_trait;

use crate::error::Result;

/// Byte-oriented key-value contract exposed to callers.
///
/// Keys and values are arbitrary byte strings. A write through a batch is
/// durable only once the batch's [`KvBatch::write`] barrier has returned.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// The batch accumulator returned by new_batch().
    type Batch: KvBatch;

    /// Inserts or updates a key-value pair. Empty keys succeed as no-ops.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Retrieves the value for a given key, failing with
    /// [`Error::NotFound`](crate::Error::NotFound) if absent.
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Returns true if a value exists for the given key. Errors other
    /// than not-found propagate.
    async fn has(&self, key: &[u8]) -> Result<bool>;

    /// Deletes the row for the given key. Overflow blobs are not
    /// reclaimed.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Creates a new write batch. One batch is a single-producer object.
    fn new_batch(&self) -> Self::Batch
    where
        Self: Sized;

    /// Register the batch-write meters under the given prefix.
    fn meter(&self, prefix: &str);

    /// Signal the writer pool to terminate. In-flight batches are
    /// abandoned; callers flush their batches first for a clean shutdown.
    fn close(&self);

    /// Diagnostic path identifying the backing stores.
    fn path(&self) -> String;
}

/// Write accumulator handed out by [`KvStore::new_batch`].
#[async_trait]
pub trait KvBatch: Send {
    /// Queue a key-value pair. Empty values are silently dropped (unlike
    /// [`KvStore::put`], which persists them). May suspend on writer
    /// queue backpressure once a full chunk is assembled.
    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Submit any residual rows and wait until every queued chunk and
    /// blob upload has been acknowledged.
    async fn write(&mut self) -> Result<()>;

    /// Accumulated byte count of queued rows.
    fn value_size(&self) -> usize;

    /// Discard accumulated rows. Must not be called while in-flight
    /// units exist.
    fn reset(&mut self);
}

/// Iterator over key-value pairs. Scans are unsupported by the hybrid
/// store, so every iterator is empty.
#[derive(Debug, Default)]
pub struct NullIterator;

impl Iterator for NullIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        None
    }
}
