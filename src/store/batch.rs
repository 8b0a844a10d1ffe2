//! Client-side write accumulator feeding the writer pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::completion::CompletionGroup;
use crate::error::{Error, Result};
use crate::limits::{BATCH_MAX, ITEM_MAX, OVERSIZE_SENTINEL};
use crate::store::blob::BlobStore;
use crate::store::table::TableRow;
use crate::store::writer::BatchRequest;
use crate::store::KvBatch;

/// Accumulates writes into queue-ready chunks of at most
/// [`BATCH_MAX`] rows, spawning parallel blob uploads for oversized
/// values. Not safe for concurrent `put`; one batch has one producer.
pub struct DynamoBatch {
    queue: mpsc::Sender<BatchRequest>,
    blob: Arc<dyn BlobStore>,
    completion: CompletionGroup,
    rows: Vec<TableRow>,
    size: usize,
}

impl DynamoBatch {
    pub(crate) fn new(queue: mpsc::Sender<BatchRequest>, blob: Arc<dyn BlobStore>) -> Self {
        Self {
            queue,
            blob,
            completion: CompletionGroup::new(),
            rows: Vec::new(),
            size: 0,
        }
    }

    /// Hand the accumulated rows to the writer pool as one request.
    /// The completion unit is registered before submission.
    async fn submit(&mut self) -> Result<()> {
        let rows = std::mem::take(&mut self.rows);
        self.completion.add(1);
        if self
            .queue
            .send(BatchRequest {
                rows,
                completion: self.completion.clone(),
            })
            .await
            .is_err()
        {
            self.completion.done();
            return Err(Error::Table("batch write queue is closed".into()));
        }
        Ok(())
    }

    /// Upload an oversized value in the background, retrying forever.
    /// The completion unit is registered before the task is spawned.
    fn spawn_upload(&self, key: Vec<u8>, value: Vec<u8>) {
        self.completion.add(1);
        let blob = Arc::clone(&self.blob);
        let completion = self.completion.clone();
        tokio::spawn(async move {
            let mut fail_count = 0u32;
            tracing::debug!(key_len = key.len(), value_len = value.len(), "writing oversized value into the blob store");
            while let Err(err) = blob.write(&key, &value).await {
                fail_count += 1;
                tracing::error!(%err, retries = fail_count, "cannot write the oversized value, check the blob store");
                tokio::time::sleep(Duration::from_secs(1)).await;
                tracing::warn!(retries = fail_count, "retrying the oversized value write");
            }
            completion.done();
        });
    }
}

#[async_trait]
impl KvBatch for DynamoBatch {
    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }

        let row = if key.len() + value.len() > ITEM_MAX {
            self.spawn_upload(key.to_vec(), value.to_vec());
            TableRow::new(key.to_vec(), OVERSIZE_SENTINEL.to_vec())
        } else {
            TableRow::new(key.to_vec(), value.to_vec())
        };

        self.size += row.val.len();
        self.rows.push(row);

        if self.rows.len() == BATCH_MAX {
            self.submit().await?;
            self.size = 0;
        }
        Ok(())
    }

    async fn write(&mut self) -> Result<()> {
        while !self.rows.is_empty() {
            let chunk = if self.rows.len() > BATCH_MAX {
                let remainder = self.rows.split_off(BATCH_MAX);
                std::mem::replace(&mut self.rows, remainder)
            } else {
                std::mem::take(&mut self.rows)
            };

            self.completion.add(1);
            if self
                .queue
                .send(BatchRequest {
                    rows: chunk,
                    completion: self.completion.clone(),
                })
                .await
                .is_err()
            {
                self.completion.done();
                return Err(Error::Table("batch write queue is closed".into()));
            }
        }
        self.size = 0;

        // Wait for every queued chunk and blob upload, including chunks
        // that were auto-submitted while the batch was filling.
        self.completion.wait().await;
        Ok(())
    }

    fn value_size(&self) -> usize {
        self.size
    }

    fn reset(&mut self) {
        self.rows.clear();
        self.size = 0;
    }
}
