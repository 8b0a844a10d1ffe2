use crate::error::{Error, Result};
use crate::limits::{READ_CAPACITY, WRITE_CAPACITY};

/// Configuration for the hybrid store.
#[derive(Debug, Clone)]
pub struct DynamoConfig {
    /// Cloud region used by both the table store and the blob store.
    pub region: String,

    /// Table store endpoint URL.
    pub endpoint: String,

    /// Table identifier. The blob bucket is derived from it.
    pub table_name: String,

    /// Advisory read provisioning hint. The table is created
    /// pay-per-request, so this is carried for diagnostics only.
    pub read_capacity: i64,

    /// Advisory write provisioning hint, same caveat as above.
    pub write_capacity: i64,
}

impl DynamoConfig {
    /// Create a new config with the given region, endpoint and table name.
    pub fn new(
        region: impl Into<String>,
        endpoint: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            endpoint: endpoint.into(),
            table_name: table_name.into(),
            read_capacity: READ_CAPACITY,
            write_capacity: WRITE_CAPACITY,
        }
    }

    /// Set the advisory read capacity
    pub fn read_capacity(mut self, units: i64) -> Self {
        self.read_capacity = units;
        self
    }

    /// Set the advisory write capacity
    pub fn write_capacity(mut self, units: i64) -> Self {
        self.write_capacity = units;
        self
    }

    /// Name of the blob bucket backing oversized values.
    pub fn bucket_name(&self) -> String {
        format!("{}-bucket", self.table_name)
    }

    /// Validate all required fields
    pub fn check(&self) -> Result<()> {
        if self.region.is_empty() {
            return Err(Error::Config("region must not be empty".into()));
        }
        if self.endpoint.is_empty() {
            return Err(Error::Config("endpoint must not be empty".into()));
        }
        if self.table_name.is_empty() {
            return Err(Error::Config("table_name must not be empty".into()));
        }
        Ok(())
    }
}
