//! Per-session append-only raw log (spec.md §6 external interfaces): every
//! saved knowledge item and observation is appended as one JSON line to
//! `raw/<session_id>.jsonl`, fsynced before the call returns. Independent of
//! the SQL WAL — this is the durability floor if the database file itself
//! is lost or corrupted mid-session.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::Result;

pub struct RawLog {
    dir: PathBuf,
}

impl RawLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }

    /// Append one JSON record as a line, creating the directory and file on
    /// first use, and fsyncing before returning.
    pub async fn append(&self, session_id: &str, record: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let path = self.path_for(session_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn append_creates_file_and_writes_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let log = RawLog::new(tmp.path().join("raw"));
        log.append("s1", &json!({"tool": "memory_save", "id": 1})).await.unwrap();
        log.append("s1", &json!({"tool": "memory_save", "id": 2})).await.unwrap();

        let content = tokio::fs::read_to_string(log.path_for("s1")).await.unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
