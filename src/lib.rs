pub mod completion;
pub mod config;
pub mod error;
pub mod limits;
pub mod metrics;
pub mod store;

pub use completion::CompletionGroup;
pub use config::DynamoConfig;
pub use error::{Error, Result};
pub use metrics::BatchWriteMetrics;
pub use store::{BlobStore, DynamoBatch, DynamoStore, KvBatch, KvStore};
