//! [`MemoryEngine`]: wires a [`StorageBackend`], [`VectorIndex`] and
//! [`Embedder`] behind a single-writer mutex, matching the original's
//! single long-running-process, single-writer concurrency model.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::MemoryConfig;
use crate::embedder::Embedder;
use crate::storage_backend::StorageBackend;
use crate::vector::VectorIndex;

/// The assembled engine. All mutating operations acquire `write_lock`
/// first so a single dispatched call's effects commit as one unit before
/// any other call observes intermediate state (spec.md concurrency model).
pub struct MemoryEngine {
    pub storage: Arc<dyn StorageBackend>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub config: MemoryConfig,
    write_lock: Mutex<()>,
}

impl MemoryEngine {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            storage,
            vector_index,
            embedder,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Run the startup migration/integrity-repair pass.
    pub async fn init(&self) -> crate::Result<()> {
        self.storage.init().await
    }

    /// Acquire the single-writer lock for the duration of a mutating
    /// operation. Readers (retrieval, stats) do not need this.
    pub async fn writer(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }
}
