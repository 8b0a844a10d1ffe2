//! In-memory fakes for the adapter seams, mirroring the behaviors the
//! real backends exhibit: unprocessed subsets, transient failures and
//! table lifecycle states.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::DynamoConfig;
use crate::error::{Error, Result};
use crate::store::blob::BlobStore;
use crate::store::table::{DynamoStore, TableClient, TableRow, TableState};

pub(crate) fn test_config() -> DynamoConfig {
    DynamoConfig::new("ap-northeast-2", "http://localhost:8000", "dynastore-test")
}

/// Open a store over fakes, running the normal bootstrap.
pub(crate) async fn open_store(
    table: Arc<MemTableClient>,
    blob: Arc<MemBlobStore>,
) -> DynamoStore {
    DynamoStore::with_parts(test_config(), table, blob)
        .await
        .expect("store should open against fakes")
}

#[derive(Default)]
pub(crate) struct MemTableClient {
    rows: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    /// Scripted status() responses; Active once drained.
    states: Mutex<VecDeque<TableState>>,
    creates: AtomicUsize,
    /// Errors returned by the next bulk-write calls, consumed first.
    write_errors: Mutex<VecDeque<Error>>,
    /// Scripted row indices to bounce as unprocessed, one entry per
    /// accepted bulk-write call.
    unprocessed: Mutex<VecDeque<Vec<usize>>>,
    /// Row counts of every accepted bulk-write call.
    batches: Mutex<Vec<usize>>,
    write_calls: AtomicUsize,
}

impl MemTableClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_states(&self, states: impl IntoIterator<Item = TableState>) {
        self.states.lock().unwrap().extend(states);
    }

    pub fn inject_write_errors(&self, count: usize) {
        let mut errors = self.write_errors.lock().unwrap();
        for _ in 0..count {
            errors.push_back(Error::Table("injected failure".into()));
        }
    }

    pub fn bounce_next(&self, indices: Vec<usize>) {
        self.unprocessed.lock().unwrap().push_back(indices);
    }

    pub fn raw_val(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableClient for MemTableClient {
    async fn status(&self) -> Result<TableState> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TableState::Active))
    }

    async fn create(&self) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_row(&self, row: TableRow) -> Result<()> {
        self.rows.lock().unwrap().insert(row.key, row.val);
        Ok(())
    }

    async fn get_row(&self, key: &[u8]) -> Result<Option<TableRow>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(key)
            .map(|val| TableRow::new(key.to_vec(), val.clone())))
    }

    async fn delete_row(&self, key: &[u8]) -> Result<()> {
        self.rows.lock().unwrap().remove(key);
        Ok(())
    }

    async fn write_rows(&self, rows: &[TableRow]) -> Result<Vec<TableRow>> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.write_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.batches.lock().unwrap().push(rows.len());
        let bounce = self
            .unprocessed
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let mut kept = Vec::new();
        let mut persisted = self.rows.lock().unwrap();
        for (i, row) in rows.iter().enumerate() {
            if bounce.contains(&i) {
                kept.push(row.clone());
            } else {
                persisted.insert(row.key.clone(), row.val.clone());
            }
        }
        Ok(kept)
    }

    async fn delete_table(&self) -> Result<()> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    /// Number of upcoming writes to fail.
    failures: AtomicUsize,
    write_calls: AtomicUsize,
}

impl MemBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inject_write_errors(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn object(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(&hex::encode(key)).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<String> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Blob("injected failure".into()));
        }

        let name = hex::encode(key);
        self.objects
            .lock()
            .unwrap()
            .insert(name.clone(), value.to_vec());
        Ok(name)
    }

    async fn read(&self, key: &[u8]) -> Result<Vec<u8>> {
        let name = hex::encode(key);
        self.objects
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::Blob(format!("no such object: {name}")))
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.objects.lock().unwrap().remove(&hex::encode(key));
        Ok(())
    }
}
