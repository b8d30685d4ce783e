use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use pkg_types::lease::{Lease, LeaseKey};

use crate::store::{LeaseStore, WriteOutcome, compare_and_bump, decode_stored};

/// Process-local lease store. Clones share the same records, so several
/// electors built on clones race exactly as separate processes would against
/// a real backend.
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicUsize,
    conflict_writes: AtomicUsize,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write attempts that reached the store.
    pub fn write_attempts(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Store a record as-is, bypassing the version check.
    pub async fn insert(&self, key: &LeaseKey, lease: &Lease) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(lease)?;
        self.insert_raw(key, bytes).await;
        Ok(())
    }

    /// Store arbitrary bytes, e.g. to simulate a corrupted record.
    pub async fn insert_raw(&self, key: &LeaseKey, bytes: Vec<u8>) {
        self.inner
            .records
            .lock()
            .await
            .insert(key.storage_key(), bytes);
    }

    /// Make every subsequent read fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a backend error.
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Report the next `n` writes as lost races.
    pub fn conflict_next_writes(&self, n: usize) {
        self.inner.conflict_writes.store(n, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn get(&self, key: &LeaseKey) -> anyhow::Result<Option<Lease>> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("memory store: injected read failure");
        }
        let records = self.inner.records.lock().await;
        Ok(records
            .get(&key.storage_key())
            .map(|bytes| decode_stored(key, bytes)))
    }

    async fn write(&self, key: &LeaseKey, lease: &Lease) -> anyhow::Result<WriteOutcome> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.inner.fail_writes) {
            anyhow::bail!("memory store: injected write failure");
        }
        if take_one(&self.inner.conflict_writes) {
            return Ok(WriteOutcome::Conflict);
        }

        let mut records = self.inner.records.lock().await;
        let storage_key = key.storage_key();
        match compare_and_bump(key, records.get(&storage_key).map(Vec::as_slice), lease)? {
            Some((stored, bytes)) => {
                records.insert(storage_key, bytes);
                Ok(WriteOutcome::Applied(stored))
            }
            None => Ok(WriteOutcome::Conflict),
        }
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
