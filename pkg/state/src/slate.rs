use async_trait::async_trait;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use pkg_types::lease::{Lease, LeaseKey};

use crate::store::{LeaseStore, WriteOutcome, compare_and_bump, decode_stored};

/// Lease store backed by SlateDB on a local filesystem.
///
/// SlateDB admits a single writer per database, so compare-and-swap is a
/// read-compare-put serialized by `write_lock`. Every elector sharing this
/// store must share the same handle.
#[derive(Clone)]
pub struct SlateLeaseStore {
    db: Db,
    write_lock: Arc<Mutex<()>>,
}

impl SlateLeaseStore {
    /// Open (or create) a lease store rooted at `path` on the local filesystem.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB lease store at {}", path);

        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e)),
        }
    }

    async fn put_raw(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB put failed: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for SlateLeaseStore {
    async fn get(&self, key: &LeaseKey) -> anyhow::Result<Option<Lease>> {
        Ok(self
            .get_raw(&key.storage_key())
            .await?
            .map(|bytes| decode_stored(key, &bytes)))
    }

    async fn write(&self, key: &LeaseKey, lease: &Lease) -> anyhow::Result<WriteOutcome> {
        let _guard = self.write_lock.lock().await;
        let storage_key = key.storage_key();
        let stored = self.get_raw(&storage_key).await?;

        match compare_and_bump(key, stored.as_deref(), lease)? {
            Some((next, bytes)) => {
                self.put_raw(&storage_key, &bytes).await?;
                Ok(WriteOutcome::Applied(next))
            }
            None => Ok(WriteOutcome::Conflict),
        }
    }

    fn backend(&self) -> &'static str {
        "slatedb"
    }

    async fn close(&self) -> anyhow::Result<()> {
        info!("Closing SlateDB lease store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }
}
