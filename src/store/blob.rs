//! S3-backed blob store for values that overflow the table row limit.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::error::{Error, Result};

const OCTET_STREAM: &str = "application/octet-stream";

/// Object store holding overflow values, addressed by the lowercase hex
/// encoding of the original KV key.
///
/// Implementations perform no internal retries; retry is the caller's
/// concern.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `value` under the hex encoding of `key`, returning the
    /// object name. Overwrites replace.
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<String>;

    /// Download the full object body for `key`.
    async fn read(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Remove the object for `key`. Missing objects do not error.
    async fn delete(&self, key: &[u8]) -> Result<()>;
}

/// [`BlobStore`] backed by an S3 bucket.
pub struct S3BlobStore {
    bucket: String,
    client: Client,
}

impl S3BlobStore {
    /// Connect to S3 in the given region and make sure `bucket` exists,
    /// creating it when absent.
    pub async fn connect(
        sdk_config: &SdkConfig,
        region: &str,
        bucket: impl Into<String>,
    ) -> Result<Self> {
        let config = aws_sdk_s3::config::Builder::from(sdk_config)
            .region(Region::new(region.to_string()))
            .force_path_style(true)
            .build();

        let store = Self {
            bucket: bucket.into(),
            client: Client::from_conf(config),
        };
        store.ensure_bucket().await?;
        Ok(store)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| Error::Init(format!("failed to list buckets: {e}")))?;

        let exists = output
            .buckets()
            .iter()
            .any(|b| b.name() == Some(self.bucket.as_str()));
        if !exists {
            tracing::warn!(bucket = %self.bucket, "cannot find the bucket, creating it");
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| Error::Init(format!("failed to create bucket {}: {e}", self.bucket)))?;
        }
        Ok(())
    }

    /// Best-effort bucket removal for operational tooling. The bucket
    /// must already be empty.
    pub async fn delete_bucket(&self) {
        if let Err(err) = self
            .client
            .delete_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            tracing::error!(bucket = %self.bucket, %err, "failed to delete the bucket");
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<String> {
        let name = hex::encode(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&name)
            .content_type(OCTET_STREAM)
            .body(ByteStream::from(value.to_vec()))
            .send()
            .await
            .map_err(|e| Error::Blob(format!("failed to write object {name}: {e}")))?;
        Ok(name)
    }

    async fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        let name = hex::encode(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&name)
            .response_content_type(OCTET_STREAM)
            .send()
            .await
            .map_err(|e| Error::Blob(format!("failed to read object {name}: {e}")))?;

        // A single body read may return less than the full object, so
        // drain the stream to end-of-body into a buffer sized from the
        // advertised length.
        let advertised = output.content_length().unwrap_or(0).max(0) as usize;
        let mut value = Vec::with_capacity(advertised);
        let mut body = output.body;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| Error::Blob(format!("failed to stream object {name}: {e}")))?
        {
            value.extend_from_slice(&chunk);
        }
        Ok(value)
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let name = hex::encode(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&name)
            .send()
            .await
            .map_err(|e| Error::Blob(format!("failed to delete object {name}: {e}")))?;
        Ok(())
    }
}
