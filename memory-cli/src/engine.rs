//! Assembles a [`ToolDispatcher`] from on-disk configuration: opens the
//! SQLite backend, runs the startup migration, and wires in the
//! no-op embedder/vector-index and filesystem extraction queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use memory_core::config::MemoryConfig;
use memory_core::embedder::NullEmbedder;
use memory_core::engine::MemoryEngine;
use memory_core::extraction::FsExtractionQueue;
use memory_core::raw_log::RawLog;
use memory_core::tools::ToolDispatcher;
use memory_core::vector::NullVectorIndex;
use memory_storage_sqlite::SqliteStorage;

use crate::errors::{helpers, EnhancedError};

/// Build a `MemoryConfig`, overriding the memory-dir with `--memory-dir`
/// if given.
pub fn load_config(memory_dir: Option<PathBuf>) -> MemoryConfig {
    let mut config = MemoryConfig::from_env();
    if let Some(dir) = memory_dir {
        config.memory_dir = dir;
    }
    config
}

/// Open storage, run init, and return a ready-to-use dispatcher.
pub async fn build_dispatcher(config: &MemoryConfig) -> Result<ToolDispatcher> {
    std::fs::create_dir_all(&config.memory_dir)
        .with_context(|| format!("creating memory directory {}", config.memory_dir.display()))?;

    let storage = SqliteStorage::open(config.db_path())
        .await
        .context_with_help("failed to open storage", helpers::STORAGE_HELP)?;
    let engine = MemoryEngine::new(
        Arc::new(storage),
        Arc::new(NullVectorIndex),
        Arc::new(NullEmbedder),
        config.clone(),
    );
    engine.init().await.context_with_help("failed to run startup migration", helpers::STORAGE_HELP)?;

    let extraction_queue = Arc::new(FsExtractionQueue::new(config.extraction_queue_dir()));
    let raw_log = RawLog::new(config.raw_dir());
    Ok(ToolDispatcher::new(Arc::new(engine), extraction_queue, raw_log))
}
