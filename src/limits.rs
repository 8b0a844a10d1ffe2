//! Compile-time limits shared by the table store, writer pool and batches.

/// Maximum combined key+value size in bytes for a single table row.
/// Values that exceed this (together with their key) overflow to the
/// blob store.
pub const ITEM_MAX: usize = 400 * 1024;

/// Maximum number of rows per bulk-write call.
pub const BATCH_MAX: usize = 25;

/// Number of writer pool workers.
pub const WORKER_NUM: usize = 10;

/// Capacity of the bounded batch-write queue.
pub const QUEUE_CAP: usize = WORKER_NUM * 2;

/// Failure-count threshold above which a worker sleeps one second
/// between bulk-write attempts.
pub const MAX_RETRY: u32 = 5;

/// Row value marking an oversized item whose real value lives in the
/// blob store under the same key. Part of the on-disk format: existing
/// data becomes unreadable if this changes. A user value equal to these
/// exact 13 bytes will misroute reads to the blob store.
pub const OVERSIZE_SENTINEL: &[u8] = b"oversizeditem";

/// Advisory provisioning defaults. Tables are created pay-per-request,
/// so these are carried for diagnostics only.
pub const READ_CAPACITY: i64 = 10_000;
pub const WRITE_CAPACITY: i64 = 10_000;
