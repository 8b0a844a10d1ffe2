//! Fixed pool of workers draining the bounded batch-write queue.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::completion::CompletionGroup;
use crate::error::{Error, Result};
use crate::limits::{MAX_RETRY, QUEUE_CAP, WORKER_NUM};
use crate::metrics::BatchWriteMetrics;
use crate::store::table::{TableClient, TableRow};

/// One unit of work for the pool: a chunk of rows and the barrier to
/// signal once every row is persisted.
pub struct BatchRequest {
    pub rows: Vec<TableRow>,
    pub completion: CompletionGroup,
}

/// Cohort of [`WORKER_NUM`] workers sharing one bounded queue.
///
/// Submission suspends while the queue is full, which throttles batch
/// producers. Termination is broadcast; workers exit without draining.
pub struct WriterPool {
    queue: mpsc::Sender<BatchRequest>,
    shutdown: broadcast::Sender<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WriterPool {
    /// Spawn the worker cohort against the given table client.
    pub fn spawn(
        table: Arc<dyn TableClient>,
        metrics: Arc<OnceLock<BatchWriteMetrics>>,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(QUEUE_CAP);
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown, _) = broadcast::channel(1);

        let workers = (0..WORKER_NUM)
            .map(|id| {
                let table = Arc::clone(&table);
                let receiver = Arc::clone(&receiver);
                let metrics = Arc::clone(&metrics);
                let shutdown = shutdown.subscribe();
                tokio::spawn(worker_loop(id, table, receiver, shutdown, metrics))
            })
            .collect();

        Self {
            queue,
            shutdown,
            workers,
        }
    }

    /// Producer handle to the bounded queue.
    pub fn sender(&self) -> mpsc::Sender<BatchRequest> {
        self.queue.clone()
    }

    /// Enqueue one request, suspending while the queue is full.
    pub async fn submit(&self, request: BatchRequest) -> Result<()> {
        self.queue
            .send(request)
            .await
            .map_err(|_| Error::Table("batch write queue is closed".into()))
    }

    /// Broadcast termination. In-flight requests are abandoned.
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }

    /// Signal termination and wait for every worker to exit, surfacing
    /// workers that panicked or were cancelled.
    pub async fn join(self) -> Result<()> {
        self.close();
        for worker in self.workers {
            worker.await?;
        }
        Ok(())
    }
}

async fn worker_loop(
    id: usize,
    table: Arc<dyn TableClient>,
    receiver: Arc<Mutex<mpsc::Receiver<BatchRequest>>>,
    mut shutdown: broadcast::Receiver<()>,
    metrics: Arc<OnceLock<BatchWriteMetrics>>,
) {
    tracing::debug!(worker = id, "batch write worker started");
    let mut fail_count: u32 = 0;

    loop {
        let request = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(worker = id, "batch write worker stopped");
                return;
            }
            request = recv_next(&receiver) => match request {
                Some(request) => request,
                // All producers are gone.
                None => return,
            },
        };

        let started = Instant::now();
        let total_rows = request.rows.len();
        let total_bytes: usize = request.rows.iter().map(TableRow::size).sum();
        let mut pending = request.rows;

        loop {
            match table.write_rows(&pending).await {
                Ok(unprocessed) if unprocessed.is_empty() => break,
                Ok(unprocessed) => {
                    tracing::debug!(
                        worker = id,
                        unprocessed = unprocessed.len(),
                        "bulk write left unprocessed rows"
                    );
                    pending = unprocessed;
                }
                Err(err) => {
                    fail_count += 1;
                    tracing::warn!(worker = id, %err, fail_count, "failed to write batch rows");
                    if fail_count > MAX_RETRY {
                        tracing::error!(
                            worker = id,
                            fail_count,
                            "bulk writes keep failing, backing off before the next attempt"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        fail_count = 0;
        if let Some(metrics) = metrics.get() {
            metrics.record(started.elapsed(), total_rows, total_bytes);
        }
        request.completion.done();
    }
}

async fn recv_next(
    receiver: &Arc<Mutex<mpsc::Receiver<BatchRequest>>>,
) -> Option<BatchRequest> {
    receiver.lock().await.recv().await
}
