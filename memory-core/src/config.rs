//! Runtime configuration, loaded from environment variables with documented
//! defaults (spec.md §6).

use std::path::PathBuf;

use crate::constants::defaults;

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Root directory for all on-disk state (`$CLAUDE_MEMORY_DIR`).
    pub memory_dir: PathBuf,
    /// Name of the configured embedding model, if any (`$EMBEDDING_MODEL`).
    pub embedding_model: Option<String>,
    /// Decay half-life in days used by retrieval ranking.
    pub decay_half_life_days: i64,
    /// Days of inactivity before an active item is archived.
    pub archive_after_days: i64,
    /// Days of inactivity before an archived item is purged.
    pub purge_after_days: i64,
    /// Days before an observation row is eligible for TTL cleanup.
    pub observation_retention_days: i64,
    /// Port the (out-of-scope) read-only dashboard should bind, carried
    /// through for completeness.
    pub dashboard_port: u16,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_dir: default_memory_dir(),
            embedding_model: None,
            decay_half_life_days: defaults::DECAY_HALF_LIFE_DAYS,
            archive_after_days: defaults::ARCHIVE_AFTER_DAYS,
            purge_after_days: defaults::PURGE_AFTER_DAYS,
            observation_retention_days: defaults::OBSERVATION_RETENTION_DAYS,
            dashboard_port: defaults::DASHBOARD_PORT,
        }
    }
}

fn default_memory_dir() -> PathBuf {
    dirs_home().join(".claude-memory")
}

/// Minimal home-directory lookup so memory-core need not depend on the
/// `dirs` crate for a single call site.
fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl MemoryConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(dir) = std::env::var("CLAUDE_MEMORY_DIR") {
            if !dir.is_empty() {
                cfg.memory_dir = PathBuf::from(dir);
            }
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            if !model.is_empty() {
                cfg.embedding_model = Some(model);
            }
        }
        if let Some(v) = env_i64("DECAY_HALF_LIFE") {
            cfg.decay_half_life_days = v;
        }
        if let Some(v) = env_i64("ARCHIVE_AFTER_DAYS") {
            cfg.archive_after_days = v;
        }
        if let Some(v) = env_i64("PURGE_AFTER_DAYS") {
            cfg.purge_after_days = v;
        }
        if let Some(v) = env_i64("OBSERVATION_RETENTION_DAYS") {
            cfg.observation_retention_days = v;
        }
        if let Some(v) = env_i64("DASHBOARD_PORT") {
            if v > 0 && v <= u16::MAX as i64 {
                cfg.dashboard_port = v as u16;
            }
        }
        cfg
    }

    /// Path to the primary relational database file.
    pub fn db_path(&self) -> PathBuf {
        self.memory_dir.join(crate::constants::paths::DB_FILE_NAME)
    }

    /// Path to the raw per-session append log directory.
    pub fn raw_dir(&self) -> PathBuf {
        self.memory_dir.join(crate::constants::paths::RAW_DIR)
    }

    /// Path to the extraction queue directory.
    pub fn extraction_queue_dir(&self) -> PathBuf {
        self.memory_dir
            .join(crate::constants::paths::EXTRACTION_QUEUE_DIR)
    }

    /// Path to the raw session-transcript directory.
    pub fn transcripts_dir(&self) -> PathBuf {
        self.memory_dir.join(crate::constants::paths::TRANSCRIPTS_DIR)
    }

    /// Path to the vector-index directory.
    pub fn vector_dir(&self) -> PathBuf {
        self.memory_dir.join(crate::constants::paths::VECTOR_DIR)
    }

    /// Path to the queue directory.
    pub fn queue_dir(&self) -> PathBuf {
        self.memory_dir.join(crate::constants::paths::QUEUE_DIR)
    }

    /// Path to the backups directory.
    pub fn backups_dir(&self) -> PathBuf {
        self.memory_dir.join(crate::constants::paths::BACKUPS_DIR)
    }

    /// Every named subdirectory under `memory_dir`, for the stats tool's
    /// per-directory storage-footprint breakdown.
    pub fn footprint_dirs(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("raw", self.raw_dir()),
            ("transcripts", self.transcripts_dir()),
            ("vector", self.vector_dir()),
            ("queue", self.queue_dir()),
            ("extraction_queue", self.extraction_queue_dir()),
            ("backups", self.backups_dir()),
        ]
    }
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = MemoryConfig::default();
        assert_eq!(cfg.decay_half_life_days, 90);
        assert_eq!(cfg.archive_after_days, 180);
        assert_eq!(cfg.purge_after_days, 365);
        assert_eq!(cfg.observation_retention_days, 30);
        assert_eq!(cfg.dashboard_port, 37737);
    }
}
